//! The simulated machine: four virtual output-compare timers on a common
//! clock, pulse/direction/enable recording, and a virtual time base.

use crate::trace::PulseEvent;
use cnc_firmware::hal::StepperHal;
use motion::{AxisId, NUM_AXES};

/// Default simulated timer clock, ticks per second.
pub const SIM_CLOCK_HZ: u32 = 1_500_000;

#[derive(Debug, Clone, Copy, Default)]
struct SimTimer {
    period: u16,
    running: bool,
    deadline: u64,
}

/// A `StepperHal` that records everything and advances time only when the
/// harness fires a timer.
pub struct SimMachine {
    clock_hz: u32,
    now: u64,
    timers: [SimTimer; NUM_AXES],
    pulses: [u64; NUM_AXES],
    dir_level: [bool; NUM_AXES],
    enabled: [bool; NUM_AXES],
    record_trace: bool,
    events: Vec<PulseEvent>,
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMachine {
    pub fn new() -> Self {
        Self {
            clock_hz: SIM_CLOCK_HZ,
            now: 0,
            timers: [SimTimer::default(); NUM_AXES],
            pulses: [0; NUM_AXES],
            dir_level: [false; NUM_AXES],
            enabled: [false; NUM_AXES],
            record_trace: false,
            events: Vec::new(),
        }
    }

    /// Enables per-pulse event recording (for trace dumps).
    pub fn record_trace(&mut self, on: bool) {
        self.record_trace = on;
    }

    /// Virtual time in timer ticks.
    pub fn now_ticks(&self) -> u64 {
        self.now
    }

    /// Total pulses recorded per axis.
    pub fn pulses(&self, axis: AxisId) -> u64 {
        self.pulses[axis.index()]
    }

    pub fn direction_level(&self, axis: AxisId) -> bool {
        self.dir_level[axis.index()]
    }

    pub fn is_enabled(&self, axis: AxisId) -> bool {
        self.enabled[axis.index()]
    }

    pub fn any_timer_running(&self) -> bool {
        self.timers.iter().any(|t| t.running)
    }

    pub fn take_events(&mut self) -> Vec<PulseEvent> {
        std::mem::take(&mut self.events)
    }

    /// The earliest pending timer expiry.
    pub fn next_expiry(&self) -> Option<(AxisId, u64)> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.running)
            .min_by_key(|(_, t)| t.deadline)
            .map(|(i, t)| (AxisId::from_index(i), t.deadline))
    }

    /// Jumps virtual time to the given deadline.
    pub fn advance_to(&mut self, deadline: u64) {
        debug_assert!(deadline >= self.now);
        self.now = deadline;
    }

    /// Re-arms a periodic timer after its interrupt was serviced, picking
    /// up any period reprogramming the ISR performed.
    pub fn reschedule(&mut self, axis: AxisId) {
        let t = &mut self.timers[axis.index()];
        if t.running && t.deadline <= self.now {
            t.deadline = self.now + t.period.max(1) as u64;
        }
    }
}

impl StepperHal for SimMachine {
    fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    fn set_direction(&mut self, axis: AxisId, level: bool) {
        self.dir_level[axis.index()] = level;
    }

    fn set_enable(&mut self, axis: AxisId, enabled: bool) {
        self.enabled[axis.index()] = enabled;
    }

    fn program_period(&mut self, axis: AxisId, ticks: u16) {
        self.timers[axis.index()].period = ticks.max(1);
    }

    fn start_timer(&mut self, axis: AxisId) {
        let t = &mut self.timers[axis.index()];
        t.running = true;
        t.deadline = self.now + t.period.max(1) as u64;
    }

    fn stop_timer(&mut self, axis: AxisId) {
        self.timers[axis.index()].running = false;
    }

    fn pulse(&mut self, axis: AxisId) {
        self.pulses[axis.index()] += 1;
        if self.record_trace {
            self.events.push(PulseEvent {
                tick: self.now,
                axis: axis.letter(),
                dir_level: self.dir_level[axis.index()],
            });
        }
    }
}
