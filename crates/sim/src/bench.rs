//! The bench: a controller wired to the simulated machine, with helpers to
//! stream bytes and interleave main-loop passes with timer interrupts the
//! way the real interrupt priority scheme does.

use crate::machine::SimMachine;
use cnc_firmware::report::MachineState;
use cnc_firmware::Controller;
use motion::settings::Settings;
use motion::{AxisId, NUM_AXES};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SimError {
    #[error("simulation did not go idle within {0} iterations")]
    Timeout(usize),
    #[error("controller entered alarm state")]
    Alarm,
}

/// Timer interrupts serviced per main-loop pass. The executor outruns the
/// main loop in reality; a handful per pass models that without letting the
/// preparer starve artificially.
const TIMER_FIRES_PER_PASS: usize = 16;

pub struct Bench {
    controller: Controller<SimMachine>,
    responses: String,
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}

impl Bench {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let mut bench = Self {
            controller: Controller::with_settings(SimMachine::new(), settings),
            responses: String::new(),
        };
        // Swallow the boot banner so tests start from a clean transcript.
        bench.pump_responses();
        bench.responses.clear();
        bench
    }

    pub fn controller(&self) -> &Controller<SimMachine> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller<SimMachine> {
        &mut self.controller
    }

    /// Streams one line (terminator appended) through the receive hook.
    pub fn send_line(&mut self, line: &str) {
        debug!(line, "send");
        for b in line.bytes() {
            self.controller.on_serial_byte(b);
        }
        self.controller.on_serial_byte(b'\n');
    }

    /// Injects a single real-time byte.
    pub fn send_realtime(&mut self, byte: u8) {
        self.controller.on_serial_byte(byte);
    }

    /// One pass of the cooperative loop plus due timer interrupts.
    pub fn step(&mut self) {
        self.controller.poll();
        for _ in 0..TIMER_FIRES_PER_PASS {
            // Model the §5 priority guarantee: the preparer is never starved
            // for more than a few milliseconds, so the executor must not be
            // allowed to outrun it to a false mid-block stall here.
            if self.controller.segments_queued() == 0 && self.controller.has_pending_blocks() {
                break;
            }
            if !self.fire_next_timer() {
                break;
            }
        }
        self.pump_responses();
    }

    /// Services the next pending timer interrupt, advancing virtual time.
    fn fire_next_timer(&mut self) -> bool {
        let Some((axis, deadline)) = self.controller.hw().next_expiry() else {
            return false;
        };
        self.controller.hw_mut().advance_to(deadline);
        self.controller.on_step_interrupt();
        self.controller.hw_mut().reschedule(axis);
        true
    }

    fn pump_responses(&mut self) {
        while let Some(b) = self.controller.pop_response_byte() {
            self.responses.push(b as char);
        }
    }

    /// Runs until the whole pipeline drains. Errors on alarm or timeout.
    pub fn run_until_idle(&mut self, max_iters: usize) -> Result<(), SimError> {
        for _ in 0..max_iters {
            self.step();
            if self.controller.state() == MachineState::Alarm {
                return Err(SimError::Alarm);
            }
            if !self.controller.is_busy() {
                return Ok(());
            }
        }
        Err(SimError::Timeout(max_iters))
    }

    /// Runs a fixed number of passes (for hold/pause scenarios that never
    /// go idle on their own).
    pub fn run_passes(&mut self, passes: usize) {
        for _ in 0..passes {
            self.step();
        }
    }

    /// Takes everything the controller has transmitted since the last call.
    pub fn take_responses(&mut self) -> String {
        self.pump_responses();
        std::mem::take(&mut self.responses)
    }

    pub fn position_mm(&self) -> [f32; NUM_AXES] {
        self.controller.position_mm()
    }

    pub fn pulses(&self, axis: AxisId) -> u64 {
        self.controller.hw().pulses(axis)
    }

    pub fn state(&self) -> MachineState {
        self.controller.state()
    }
}

/// Pulls every `MPos:` X coordinate out of a response transcript, in order.
pub fn mpos_x_history(transcript: &str) -> Vec<f32> {
    transcript
        .match_indices("MPos:")
        .filter_map(|(i, _)| {
            let rest = &transcript[i + 5..];
            let end = rest.find(',')?;
            rest[..end].parse::<f32>().ok()
        })
        .collect()
}
