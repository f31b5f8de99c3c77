//! Hardware independent core of the sequencer.
//!
//! Everything here is usable from both execution contexts of the firmware,
//! the real-time clock interrupt and the control loop, and runs on the host
//! for tests.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod channel;
pub mod clock;
pub mod controller;
pub mod cv;
pub mod debounce;
pub mod display;
pub mod pattern;
pub mod quadrature;
pub mod sequencer;
pub mod storage;

pub use channel::{Channel, StepCommand};
pub use clock::{ClockConfig, ClockOutput, TickGenerator};
pub use controller::{ControlInputSnapshot, Controller};
pub use debounce::{Debouncer, Edge};
pub use display::{Display, DisplayFrame, View};
pub use pattern::{Pattern, PatternBank};
pub use quadrature::{PendingDelta, QuadratureDecoder};
pub use sequencer::{Sequencer, SequencerSnapshot};
pub use storage::Storage;
