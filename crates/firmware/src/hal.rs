//! # Hardware Abstraction
//!
//! The executor drives four identical per-axis channels, each consisting of
//! a direction pin, a driver-enable pin and an output-compare unit that
//! both times dominant step events and fires one-shot subordinate pulses
//! with the required minimum pulse width.
//!
//! [`StepperHal`] is the single trait the pipeline sees. Boards with
//! `embedded-hal` GPIO can assemble one from plain [`OutputPin`]s and an
//! [`OutputCompareBank`] via [`PinStepperHal`]; the simulator implements
//! the trait directly.

use embedded_hal::digital::OutputPin;
use motion::AxisId;

/// Minimum step pulse width the one-shot compare pair must guarantee, in
/// nanoseconds. Matches common stepper driver datasheets (≥ 2 µs).
pub const MIN_STEP_PULSE_NS: u32 = 2_000;

/// Everything the step executor needs from the hardware.
///
/// All methods are called from interrupt context and must be cheap; no
/// method may block.
pub trait StepperHal {
    /// Tick rate of the output-compare timers.
    fn clock_hz(&self) -> u32;

    /// Drives an axis's direction pin. `level` is the electrical level,
    /// invert masks already applied by the caller.
    fn set_direction(&mut self, axis: AxisId, level: bool);

    /// Enables or disables an axis's stepper driver.
    fn set_enable(&mut self, axis: AxisId, enabled: bool);

    /// Programs the period of an axis's output-compare unit.
    fn program_period(&mut self, axis: AxisId, ticks: u16);

    /// Starts the periodic compare interrupt for an axis (the dominant
    /// role's timer).
    fn start_timer(&mut self, axis: AxisId);

    /// Stops the periodic compare interrupt for an axis.
    fn stop_timer(&mut self, axis: AxisId);

    /// Fires one step pulse on an axis via its one-shot compare pair. The
    /// unit re-disables itself on the falling edge.
    fn pulse(&mut self, axis: AxisId);
}

/// The timer half of a [`PinStepperHal`]: four output-compare units on a
/// common clock.
pub trait OutputCompareBank {
    fn clock_hz(&self) -> u32;
    fn set_period(&mut self, axis: AxisId, ticks: u16);
    fn start(&mut self, axis: AxisId);
    fn stop(&mut self, axis: AxisId);
    /// One-shot dual-compare pulse honoring [`MIN_STEP_PULSE_NS`].
    fn pulse(&mut self, axis: AxisId);
}

/// Assembles a [`StepperHal`] from `embedded-hal` pins plus an
/// [`OutputCompareBank`].
///
/// Pin write errors are ignored: on the MCUs this targets GPIO writes are
/// infallible, and there is nothing useful to do with a pin error inside a
/// step interrupt.
pub struct PinStepperHal<DIR, EN, OC> {
    dir_pins: [DIR; 4],
    enable_pins: [EN; 4],
    oc: OC,
    /// Electrical inversion for the enable pins (active-low drivers).
    enable_active_low: bool,
}

impl<DIR, EN, OC> PinStepperHal<DIR, EN, OC>
where
    DIR: OutputPin,
    EN: OutputPin,
    OC: OutputCompareBank,
{
    pub fn new(dir_pins: [DIR; 4], enable_pins: [EN; 4], oc: OC, enable_active_low: bool) -> Self {
        Self {
            dir_pins,
            enable_pins,
            oc,
            enable_active_low,
        }
    }
}

impl<DIR, EN, OC> StepperHal for PinStepperHal<DIR, EN, OC>
where
    DIR: OutputPin,
    EN: OutputPin,
    OC: OutputCompareBank,
{
    fn clock_hz(&self) -> u32 {
        self.oc.clock_hz()
    }

    fn set_direction(&mut self, axis: AxisId, level: bool) {
        let pin = &mut self.dir_pins[axis.index()];
        if level {
            pin.set_high().ok();
        } else {
            pin.set_low().ok();
        }
    }

    fn set_enable(&mut self, axis: AxisId, enabled: bool) {
        let pin = &mut self.enable_pins[axis.index()];
        if enabled != self.enable_active_low {
            pin.set_high().ok();
        } else {
            pin.set_low().ok();
        }
    }

    fn program_period(&mut self, axis: AxisId, ticks: u16) {
        self.oc.set_period(axis, ticks);
    }

    fn start_timer(&mut self, axis: AxisId) {
        self.oc.start(axis);
    }

    fn stop_timer(&mut self, axis: AxisId) {
        self.oc.stop(axis);
    }

    fn pulse(&mut self, axis: AxisId) {
        self.oc.pulse(axis);
    }
}
