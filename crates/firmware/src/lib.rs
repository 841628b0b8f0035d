//! # CNC Controller Firmware Core
//!
//! The hardware-facing half of the controller: everything between the
//! serial byte stream and the step/direction pins, built over the motion
//! core and the G-code front end.
//!
//! ## Execution contexts
//!
//! The crate is written around the four contexts of the concurrency model,
//! surfaced as entry points on [`controller::Controller`]:
//!
//! 1. Per-axis output-compare interrupts run
//!    [`executor::StepExecutor::on_timer_tick`]: integer math only, no
//!    allocation, bounded work.
//! 2. The serial receive hook runs [`dispatcher::Dispatcher::push_byte`],
//!    which classifies and appends a single byte.
//! 3. A ~100 Hz context (or the main loop) tops up the segment FIFO.
//! 4. The cooperative main loop parses lines, steps arc expansion, runs
//!    planner recomputes and formats responses.
//!
//! Real-time bytes never queue behind G-code: the dispatcher latches them
//! into [`flags::SystemFlags`] atomics the moment they arrive.
//!
//! Hardware access is abstracted behind [`hal::StepperHal`] so the whole
//! pipeline runs identically on silicon and under the simulator.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(clippy::all)]

pub mod controller;
pub mod dispatcher;
pub mod executor;
pub mod flags;
pub mod hal;
pub mod report;
pub mod system;

pub use controller::Controller;
pub use executor::StepExecutor;
pub use flags::SystemFlags;
pub use hal::StepperHal;
pub use report::MachineState;
