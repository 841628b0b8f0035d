//! # Simulation Harness
//!
//! Runs the complete controller against a virtual machine: simulated
//! output-compare timers, recorded step pulses, virtual time. The same
//! firmware code that runs on silicon runs here, interrupt entry points
//! included, which is what makes the end-to-end scenario tests meaningful.

pub mod bench;
pub mod machine;
pub mod trace;

pub use bench::{Bench, SimError};
pub use machine::SimMachine;
pub use trace::{PulseEvent, SimTrace};
