//! # Byte Dispatcher & Line Buffer
//!
//! Runs in the serial receive context. Classifies every incoming byte as a
//! real-time command, a line terminator, or line content, and hands
//! complete lines to the main loop.
//!
//! Real-time bytes act within a few cycles of arrival: they are latched
//! into [`SystemFlags`] directly from this context and never queue behind
//! G-code.

use crate::flags::SystemFlags;
use heapless::{Deque, String};

/// Bounded line length, terminator excluded.
pub const LINE_BUFFER_SIZE: usize = 128;

/// Complete lines waiting for the main loop. Senders await each line's
/// response before sending the next, so depth beyond a couple of slots is
/// never used in practice.
pub const LINE_QUEUE_DEPTH: usize = 4;

/// The soft-reset real-time byte (Ctrl-X).
pub const BYTE_SOFT_RESET: u8 = 0x18;

/// One complete received line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub text: String<LINE_BUFFER_SIZE>,
    /// The line exceeded the buffer; its tail was discarded and the whole
    /// line must be answered with the overflow error.
    pub overflowed: bool,
}

/// Byte classifier and line assembler.
pub struct Dispatcher {
    current: String<LINE_BUFFER_SIZE>,
    overflowed: bool,
    /// Swallows the `\n` of a `\r\n` pair (and blank lines generally).
    at_line_start: bool,
    ready: Deque<Line, LINE_QUEUE_DEPTH>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub const fn new() -> Self {
        Self {
            current: String::new(),
            overflowed: false,
            at_line_start: true,
            ready: Deque::new(),
        }
    }

    /// Classifies one received byte. Interrupt-context safe: bounded work,
    /// no allocation.
    pub fn push_byte(&mut self, byte: u8, flags: &SystemFlags) {
        match byte {
            b'?' => flags.request_status(),
            b'!' => flags.request_feed_hold(),
            b'~' => flags.request_cycle_start(),
            BYTE_SOFT_RESET => flags.request_soft_reset(),
            b'\r' | b'\n' => self.terminate_line(),
            // Printable ASCII with the high bit clear joins the line.
            0x20..=0x7E => {
                self.at_line_start = false;
                if self.current.push(byte as char).is_err() {
                    // Discard the rest of the line; answered as error 7.
                    self.overflowed = true;
                }
            }
            // Everything else (control bytes, high-bit bytes) is dropped.
            _ => {}
        }
    }

    fn terminate_line(&mut self) {
        if self.at_line_start && self.current.is_empty() && !self.overflowed {
            // Second half of \r\n, or a blank line: nothing to report.
            return;
        }
        let line = Line {
            text: core::mem::take(&mut self.current),
            overflowed: core::mem::take(&mut self.overflowed),
        };
        self.at_line_start = true;
        // With response-per-line flow control the queue cannot fill; if a
        // misbehaving sender overruns it anyway the line is dropped whole.
        let _ = self.ready.push_back(line);
    }

    /// Hands the oldest complete line to the main loop.
    pub fn poll_line(&mut self) -> Option<Line> {
        self.ready.pop_front()
    }

    /// True if a complete line is waiting.
    pub fn has_line(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Drops all buffered input (soft reset).
    pub fn reset(&mut self) {
        self.current.clear();
        self.overflowed = false;
        self.at_line_start = true;
        self.ready.clear();
    }
}
