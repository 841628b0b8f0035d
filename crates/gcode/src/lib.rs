//! # G-code Front End
//!
//! Line-at-a-time modal G-code parsing for the motion controller.
//!
//! One call to [`Parser::parse_line`] consumes one complete line (comments
//! already allowed inline) and either:
//!
//! - produces at most one [`MotionIntent`] for the planner,
//! - updates modal state only (feed, spindle, coolant, units, …), or
//! - rejects the whole line with a single numeric [`ErrorCode`] and leaves
//!   every piece of modal state untouched.
//!
//! The parser owns the [`ModalState`], including the `G92` runtime offset
//! and the logical position used to resolve `G90`/`G91` targets.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(clippy::all)]

pub mod error;
pub mod modal;
pub mod parser;
pub mod types;

pub use error::ErrorCode;
pub use modal::{
    Coolant, DistanceMode, FeedRateMode, ModalState, MotionMode, Plane, ProgramFlow, SpindleState,
    Units,
};
pub use parser::Parser;
pub use types::{MotionIntent, MotionKind};
