//! The parser→planner interface types.

use motion::arc::ArcTurn;
use motion::NUM_AXES;

/// What kind of move an intent describes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionKind {
    /// G0: run at the machine's rapid rate.
    Rapid,
    /// G1: run at the commanded feed rate.
    Feed,
    /// G2/G3: arc through the XY plane. `offset` is the (I, J) vector
    /// from the start point to the arc center.
    Arc { turn: ArcTurn, offset: [f32; 2] },
    /// G4: hold position for the given duration.
    Dwell { seconds: f32 },
}

/// One motion command, fully resolved into machine coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionIntent {
    pub kind: MotionKind,
    /// Target in machine coordinates, mm. For dwells this equals the
    /// current position.
    pub target: [f32; NUM_AXES],
    /// Commanded feed in mm/min; ignored for rapids and dwells.
    pub feed_mm_per_min: f32,
    /// `N` word if present, else the running line count. For error
    /// reporting only.
    pub line_number: u32,
}
