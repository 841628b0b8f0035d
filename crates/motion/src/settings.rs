//! # Axis Calibration & Runtime Settings
//!
//! The keyed numeric store behind the `$<id>=<value>` protocol surface and
//! the steps↔mm conversions used throughout the pipeline.
//!
//! Settings are read by the pipeline only at block-planning time: a change
//! affects blocks planned after the write, never blocks already in the ring.
//! The store itself is plain data; persistence is a collaborator's job.

use crate::error::SettingError;
use crate::float;
use crate::{AxisId, NUM_AXES};

/// Default steps-per-mm used whenever a stored value is unusable.
///
/// 80 steps/mm is the common belt-drive calibration (20-tooth GT2 pulley,
/// 1/16 microstepping). Lead-screw machines typically run 1280 steps/mm; see
/// [`LEADSCREW_STEPS_PER_MM`]. This constant is the single source of the
/// default; nothing else in the workspace hard-codes it.
pub const DEFAULT_STEPS_PER_MM: f32 = 80.0;

/// Reference calibration for 8 mm-pitch lead screws at 1/16 microstepping.
pub const LEADSCREW_STEPS_PER_MM: f32 = 1280.0;

const DEFAULT_MAX_RATE_MM_PER_MIN: f32 = 5000.0;
const DEFAULT_MAX_ACCEL_MM_PER_S2: f32 = 200.0;
const DEFAULT_MAX_TRAVEL_MM: f32 = 200.0;
const DEFAULT_JUNCTION_DEVIATION_MM: f32 = 0.01;
const DEFAULT_ARC_TOLERANCE_MM: f32 = 0.002;

/// Calibration and limits for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSettings {
    pub steps_per_mm: f32,
    pub max_rate_mm_per_min: f32,
    pub max_accel_mm_per_s2: f32,
    /// Informational only; no limit enforcement happens at this layer.
    pub max_travel_mm: f32,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            steps_per_mm: DEFAULT_STEPS_PER_MM,
            max_rate_mm_per_min: DEFAULT_MAX_RATE_MM_PER_MIN,
            max_accel_mm_per_s2: DEFAULT_MAX_ACCEL_MM_PER_S2,
            max_travel_mm: DEFAULT_MAX_TRAVEL_MM,
        }
    }
}

/// The process-wide settings store.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub axes: [AxisSettings; NUM_AXES],
    pub junction_deviation_mm: f32,
    pub arc_tolerance_mm: f32,
    pub status_report_mask: u8,
    pub step_invert_mask: u8,
    pub dir_invert_mask: u8,
    /// Floor speed the planner falls back to at full reversals. Not
    /// addressable over the `$` surface.
    pub min_planner_speed_mm_s: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            axes: [AxisSettings::default(); NUM_AXES],
            junction_deviation_mm: DEFAULT_JUNCTION_DEVIATION_MM,
            arc_tolerance_mm: DEFAULT_ARC_TOLERANCE_MM,
            status_report_mask: 1,
            step_invert_mask: 0,
            dir_invert_mask: 0,
            min_planner_speed_mm_s: 0.0,
        }
    }
}

/// All `$` ids this store answers to, in dump order.
pub const SETTING_IDS: [u16; 21] = [
    2, 3, 10, 11, 12, 100, 101, 102, 103, 110, 111, 112, 113, 120, 121, 122, 123, 130, 131, 132,
    133,
];

impl Settings {
    /// Reads one setting by its `$` id.
    pub fn get(&self, id: u16) -> Result<f32, SettingError> {
        let value = match id {
            2 => self.step_invert_mask as f32,
            3 => self.dir_invert_mask as f32,
            10 => self.status_report_mask as f32,
            11 => self.junction_deviation_mm,
            12 => self.arc_tolerance_mm,
            100..=103 => self.axes[(id - 100) as usize].steps_per_mm,
            110..=113 => self.axes[(id - 110) as usize].max_rate_mm_per_min,
            120..=123 => self.axes[(id - 120) as usize].max_accel_mm_per_s2,
            130..=133 => self.axes[(id - 130) as usize].max_travel_mm,
            _ => return Err(SettingError::UnknownId),
        };
        Ok(value)
    }

    /// Writes one setting by its `$` id, range-checked.
    pub fn set(&mut self, id: u16, value: f32) -> Result<(), SettingError> {
        if !value.is_finite() {
            return Err(SettingError::OutOfRange);
        }
        match id {
            2 | 3 | 10 => {
                if value < 0.0 || value > 255.0 || value != float::floorf(value) {
                    return Err(SettingError::OutOfRange);
                }
                let mask = value as u8;
                match id {
                    2 => self.step_invert_mask = mask,
                    3 => self.dir_invert_mask = mask,
                    _ => self.status_report_mask = mask,
                }
            }
            11 => {
                if value < 0.0 {
                    return Err(SettingError::OutOfRange);
                }
                self.junction_deviation_mm = value;
            }
            12 => {
                if value <= 0.0 {
                    return Err(SettingError::OutOfRange);
                }
                self.arc_tolerance_mm = value;
            }
            100..=103 => {
                if value <= 0.0 {
                    return Err(SettingError::OutOfRange);
                }
                self.axes[(id - 100) as usize].steps_per_mm = value;
            }
            110..=113 => {
                if value <= 0.0 {
                    return Err(SettingError::OutOfRange);
                }
                self.axes[(id - 110) as usize].max_rate_mm_per_min = value;
            }
            120..=123 => {
                if value <= 0.0 {
                    return Err(SettingError::OutOfRange);
                }
                self.axes[(id - 120) as usize].max_accel_mm_per_s2 = value;
            }
            130..=133 => {
                if value < 0.0 {
                    return Err(SettingError::OutOfRange);
                }
                self.axes[(id - 130) as usize].max_travel_mm = value;
            }
            _ => return Err(SettingError::UnknownId),
        }
        Ok(())
    }

    /// Steps-per-mm for an axis, sanitized: a non-finite or non-positive
    /// stored value falls back to [`DEFAULT_STEPS_PER_MM`] so conversions
    /// never divide by zero.
    #[inline]
    pub fn steps_per_mm(&self, axis: AxisId) -> f32 {
        let v = self.axes[axis.index()].steps_per_mm;
        if v.is_finite() && v > 0.0 {
            v
        } else {
            DEFAULT_STEPS_PER_MM
        }
    }

    /// Max rate for an axis in mm/s (the `$` surface stores mm/min).
    #[inline]
    pub fn max_rate_mm_s(&self, axis: AxisId) -> f32 {
        self.axes[axis.index()].max_rate_mm_per_min / 60.0
    }

    #[inline]
    pub fn max_accel_mm_s2(&self, axis: AxisId) -> f32 {
        self.axes[axis.index()].max_accel_mm_per_s2
    }

    /// Converts a distance to whole steps, rounding half to even to avoid
    /// directional bias over long step sequences.
    pub fn steps_from_mm(&self, axis: AxisId, mm: f32) -> i32 {
        round_half_even(mm * self.steps_per_mm(axis))
    }

    /// Converts a step count back to millimeters.
    pub fn mm_from_steps(&self, axis: AxisId, steps: i32) -> f32 {
        steps as f32 / self.steps_per_mm(axis)
    }
}

fn round_half_even(v: f32) -> i32 {
    let floor = float::floorf(v);
    let frac = v - floor;
    let f = floor as i32;
    if frac > 0.5 {
        f + 1
    } else if frac < 0.5 {
        f
    } else if f % 2 == 0 {
        f
    } else {
        f + 1
    }
}
