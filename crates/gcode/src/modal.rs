//! Modal state: everything that persists from one G-code line to the next.

use core::fmt;
use motion::NUM_AXES;

/// Group 1 motion modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// G0: rapid positioning.
    #[default]
    Rapid,
    /// G1: linear interpolation at feed rate.
    Linear,
    /// G2: clockwise arc.
    CwArc,
    /// G3: counter-clockwise arc.
    CcwArc,
    /// G80: motion canceled.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMode {
    /// G90.
    #[default]
    Absolute,
    /// G91.
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    /// G21.
    #[default]
    Millimeters,
    /// G20.
    Inches,
}

/// Only the XY plane (G17) is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plane {
    #[default]
    Xy,
}

/// Only units-per-minute (G94) is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedRateMode {
    #[default]
    UnitsPerMinute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpindleState {
    #[default]
    Off,
    Cw,
    Ccw,
}

/// Coolant output state; tracked, never actuated at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coolant {
    pub mist: bool,
    pub flood: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramFlow {
    #[default]
    Running,
    /// M0/M1: paused awaiting cycle start.
    Paused,
    /// M2/M30: program ended.
    Ended,
}

/// The complete modal state owned by the parser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModalState {
    pub motion: MotionMode,
    pub distance: DistanceMode,
    pub units: Units,
    pub plane: Plane,
    pub feed_rate_mode: FeedRateMode,
    pub spindle: SpindleState,
    pub spindle_rpm: f32,
    pub coolant: Coolant,
    pub flow: ProgramFlow,
    /// Last commanded feed, already converted to mm/min.
    pub feed_mm_per_min: f32,
    pub tool: u8,
    /// G92 runtime offset, machine minus logical, per axis.
    pub g92_offset: [f32; NUM_AXES],
    /// Predicted machine position after all parsed moves, mm.
    pub position: [f32; NUM_AXES],
}

impl Default for ModalState {
    fn default() -> Self {
        Self {
            motion: MotionMode::default(),
            distance: DistanceMode::default(),
            units: Units::default(),
            plane: Plane::default(),
            feed_rate_mode: FeedRateMode::default(),
            spindle: SpindleState::default(),
            spindle_rpm: 0.0,
            coolant: Coolant::default(),
            flow: ProgramFlow::default(),
            feed_mm_per_min: 0.0,
            tool: 0,
            g92_offset: [0.0; NUM_AXES],
            position: [0.0; NUM_AXES],
        }
    }
}

impl ModalState {
    /// The logical position (machine position minus the G92 offset).
    pub fn logical_position(&self) -> [f32; NUM_AXES] {
        let mut out = [0.0; NUM_AXES];
        for i in 0..NUM_AXES {
            out[i] = self.position[i] - self.g92_offset[i];
        }
        out
    }

    /// Writes the `$G` parser-state payload:
    /// `[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]`.
    ///
    /// G54 is printed as the single, fixed coordinate system. Re-parsing
    /// the emitted words reproduces this state (`G54` and the `[GC:]`
    /// framing aside).
    pub fn format_gcode_state<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        let motion = match self.motion {
            MotionMode::Rapid => "G0",
            MotionMode::Linear => "G1",
            MotionMode::CwArc => "G2",
            MotionMode::CcwArc => "G3",
            MotionMode::None => "G80",
        };
        let units = match self.units {
            Units::Millimeters => "G21",
            Units::Inches => "G20",
        };
        let distance = match self.distance {
            DistanceMode::Absolute => "G90",
            DistanceMode::Incremental => "G91",
        };
        let spindle = match self.spindle {
            SpindleState::Off => "M5",
            SpindleState::Cw => "M3",
            SpindleState::Ccw => "M4",
        };
        write!(w, "[GC:{motion} G54 G17 {units} {distance} G94 {spindle}")?;
        match (self.coolant.mist, self.coolant.flood) {
            (false, false) => write!(w, " M9")?,
            (mist, flood) => {
                if mist {
                    write!(w, " M7")?;
                }
                if flood {
                    write!(w, " M8")?;
                }
            }
        }
        write!(
            w,
            " T{} F{} S{}]",
            self.tool, self.feed_mm_per_min, self.spindle_rpm
        )
    }
}
