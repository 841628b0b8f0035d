//! # Status & Response Formatting
//!
//! Everything the controller puts on the wire: the welcome banner, per-line
//! `ok`/`error:N` responses, the `<…>` real-time status report and the
//! bracketed `$` query payloads.
//!
//! All formatters write into a caller-supplied `fmt::Write` sink (the
//! bounded response ring in production, a plain string in tests); nothing
//! here allocates.

use core::fmt::{self, Write};
use gcode::ErrorCode;
use motion::NUM_AXES;

/// Firmware identity on the wire. Deployed senders key their handshakes
/// off this exact banner shape.
pub const FIRMWARE_VERSION: &str = "1.1f";
pub const BUILD_DATE: &str = "20260801";
pub const BUILD_LABEL: &str = "4axis";

/// Reportable machine states.
///
/// The wire protocol defines Idle, Run, Hold, Alarm, Door, Check, Home and
/// Sleep; only the first four are reachable in this controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Run,
    Hold,
    Alarm,
}

impl MachineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            MachineState::Idle => "Idle",
            MachineState::Run => "Run",
            MachineState::Hold => "Hold",
            MachineState::Alarm => "Alarm",
        }
    }
}

/// A coherent snapshot for one status report, sampled under a critical
/// section and formatted lock-free afterwards.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub state: MachineState,
    pub mpos: [f32; NUM_AXES],
    pub feed_mm_per_min: u32,
    pub spindle_rpm: u32,
    pub planner_free: usize,
    pub segment_free: usize,
}

/// `Grbl 1.1f ['$' for help]`
pub fn write_welcome<W: Write>(w: &mut W) -> fmt::Result {
    write!(w, "\r\nGrbl {FIRMWARE_VERSION} ['$' for help]\r\n")
}

pub fn write_ok<W: Write>(w: &mut W) -> fmt::Result {
    w.write_str("ok\r\n")
}

pub fn write_error<W: Write>(w: &mut W, code: ErrorCode) -> fmt::Result {
    write!(w, "error:{code}\r\n")
}

/// `<Idle|MPos:0.000,0.000,0.000,0.000|FS:0,0|Bf:16,11>`
pub fn write_status<W: Write>(w: &mut W, s: &StatusSnapshot) -> fmt::Result {
    write!(w, "<{}|MPos:", s.state.as_str())?;
    for (i, p) in s.mpos.iter().enumerate() {
        if i > 0 {
            w.write_char(',')?;
        }
        write!(w, "{p:.3}")?;
    }
    write!(
        w,
        "|FS:{},{}|Bf:{},{}>\r\n",
        s.feed_mm_per_min, s.spindle_rpm, s.planner_free, s.segment_free
    )
}

/// `$I` payload.
pub fn write_build_info<W: Write>(w: &mut W) -> fmt::Result {
    writeln!(w, "[VER:{FIRMWARE_VERSION}.{BUILD_DATE}:{BUILD_LABEL}]\r")?;
    writeln!(w, "[OPT:V,{},{}]\r", motion::BLOCK_BUFFER_SIZE, crate::dispatcher::LINE_BUFFER_SIZE)
}

/// `$#` payload: the G92 runtime offset (the only offset this controller
/// carries).
pub fn write_offsets<W: Write>(w: &mut W, g92: &[f32; NUM_AXES]) -> fmt::Result {
    w.write_str("[G92:")?;
    for (i, p) in g92.iter().enumerate() {
        if i > 0 {
            w.write_char(',')?;
        }
        write!(w, "{p:.3}")?;
    }
    w.write_str("]\r\n")
}

/// `$` help payload.
pub fn write_help<W: Write>(w: &mut W) -> fmt::Result {
    w.write_str("[HLP:$$ $# $G $I $N $H $x=val ~ ! ? ctrl-x]\r\n")
}
