//! Persistence of the pattern bank.
//!
//! The byte-level protocol of the device is up to the implementor. The bank
//! talks to storage only while the sequencer is stopped.
//!
//! `read_pattern` failing for a single slot is recoverable, the bank restores
//! that slot alone. Failures of the other operations disable storage.

use crate::pattern::Pattern;

pub trait Storage {
    type Error;

    /// Whether the storage was formatted by this firmware.
    fn has_valid_data(&mut self) -> Result<bool, Self::Error>;

    /// Mark the storage as formatted.
    fn mark_valid(&mut self) -> Result<(), Self::Error>;

    fn read_pattern(&mut self, slot: usize) -> Result<Pattern, Self::Error>;

    fn write_pattern(&mut self, slot: usize, pattern: &Pattern) -> Result<(), Self::Error>;
}
