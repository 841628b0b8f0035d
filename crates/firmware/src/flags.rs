//! Real-time system flags.
//!
//! Set from the serial receive hook, consumed from the main loop. Each flag
//! is edge-style: multiple raises coalesce into one service action, so a
//! burst of `?` bytes produces a single report.

use core::sync::atomic::{AtomicBool, Ordering};

/// The four real-time command flags.
#[derive(Debug, Default)]
pub struct SystemFlags {
    feed_hold: AtomicBool,
    cycle_start: AtomicBool,
    soft_reset: AtomicBool,
    status_requested: AtomicBool,
}

impl SystemFlags {
    pub const fn new() -> Self {
        Self {
            feed_hold: AtomicBool::new(false),
            cycle_start: AtomicBool::new(false),
            soft_reset: AtomicBool::new(false),
            status_requested: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn request_feed_hold(&self) {
        self.feed_hold.store(true, Ordering::Release);
    }

    #[inline]
    pub fn request_cycle_start(&self) {
        self.cycle_start.store(true, Ordering::Release);
    }

    #[inline]
    pub fn request_soft_reset(&self) {
        self.soft_reset.store(true, Ordering::Release);
    }

    #[inline]
    pub fn request_status(&self) {
        self.status_requested.store(true, Ordering::Release);
    }

    /// Consumes a pending feed-hold edge.
    #[inline]
    pub fn take_feed_hold(&self) -> bool {
        self.feed_hold.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn take_cycle_start(&self) -> bool {
        self.cycle_start.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn take_soft_reset(&self) -> bool {
        self.soft_reset.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn take_status_request(&self) -> bool {
        self.status_requested.swap(false, Ordering::AcqRel)
    }

    /// Clears everything (after a soft reset has been serviced).
    pub fn clear_all(&self) {
        self.feed_hold.store(false, Ordering::Release);
        self.cycle_start.store(false, Ordering::Release);
        self.soft_reset.store(false, Ordering::Release);
        self.status_requested.store(false, Ordering::Release);
    }
}
