//! Error types for the motion core.

/// Errors surfaced while queuing moves into the planner.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlannerError {
    /// The block ring is full and cannot accept new moves.
    QueueFull,
}

/// Errors surfaced while validating arc geometry.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArcError {
    /// I and J offsets are both zero; the arc has no radius.
    ZeroRadius,
    /// The target point does not lie on the circle defined by the center
    /// offsets, beyond the allowed tolerance.
    RadiusMismatch,
}

/// Errors surfaced from the keyed settings store.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SettingError {
    /// No setting exists for the given `$` id.
    UnknownId,
    /// The value fails the range check for that setting.
    OutOfRange,
}
