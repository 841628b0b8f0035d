//! The numeric error taxonomy surfaced on the wire as `error:<code>`.

use core::fmt;

/// Everything a line can be rejected for.
///
/// The discriminants are the wire codes and must never be renumbered; CNC
/// senders key their messages off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Unsupported or unrecognized G/M command.
    UnsupportedCommand = 1,
    /// A word letter with no parseable number behind it.
    BadNumberFormat = 2,
    /// Malformed `$` system command.
    InvalidStatement = 3,
    /// Value outside the acceptable range.
    ValueOutOfRange = 4,
    /// Arc geometry inconsistent with its center offsets.
    InvalidArcGeometry = 5,
    /// Two words from the same modal group on one line.
    ModalGroupViolation = 6,
    /// Incoming line exceeded the line buffer.
    LineOverflow = 7,
    /// Motion word present but no axis target to move to.
    UndefinedAxisTarget = 8,
    /// An unrecognized word letter.
    InvalidGcodeWord = 10,
}

impl ErrorCode {
    /// The numeric wire code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
