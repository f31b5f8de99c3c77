//! Step sequencer state machine.
//!
//! The sequencer is either stopped or playing. While playing, every consumed
//! tick calls [`Sequencer::advance`] exactly once. Pattern swaps queued with
//! [`Sequencer::queue_pattern`] take effect only when the step counter wraps
//! from the last step back to the first one.
//!
//! The state is owned and mutated by the control loop alone. Everybody else
//! gets a [`SequencerSnapshot`].

use crate::clock::{ClockConfig, DEFAULT_BPM, DEFAULT_PPQN};
use crate::pattern::{Pattern, PatternBank, SLOTS, STEPS};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The operation is allowed only while stopped.
    Playing,
    SlotOutOfRange,
    StepOutOfRange,
}

/// The step a tick lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Step {
    pub index: usize,
    pub note: u8,
    pub gate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequencerSnapshot {
    pub bpm: u32,
    pub playing: bool,
    pub current_step: usize,
    pub step_count: usize,
    pub gate_mask: u16,
    pub notes: [u8; STEPS],
    pub pattern_slot: usize,
    pub pending_slot: Option<usize>,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sequencer {
    clock: ClockConfig,
    playing: bool,
    current_step: usize,
    pattern: Pattern,
    pattern_slot: usize,
    pending_slot: Option<usize>,
    bank: PatternBank,
}

impl Sequencer {
    /// Stopped sequencer with the first slot of the bank active.
    pub fn new(bank: PatternBank) -> Self {
        let pattern = bank.get(0).unwrap_or_default();
        Self {
            clock: ClockConfig::new(DEFAULT_BPM, DEFAULT_PPQN),
            playing: false,
            current_step: pattern.step_count() - 1,
            pattern,
            pattern_slot: 0,
            pending_slot: None,
            bank,
        }
    }

    pub fn clock(&self) -> ClockConfig {
        self.clock
    }

    pub fn bpm(&self) -> u32 {
        self.clock.bpm()
    }

    /// Set tempo, zero falls back to the default. Returns the applied bpm.
    pub fn set_bpm(&mut self, bpm: u32) -> u32 {
        self.clock = ClockConfig::new(bpm, self.clock.ppqn());
        self.clock.bpm()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Flip between playing and stopped. Returns whether it now plays.
    ///
    /// Stopping rewinds to the last step, so the first advance after the
    /// next start lands on step 0.
    pub fn toggle_play(&mut self) -> bool {
        self.playing = !self.playing;
        if !self.playing {
            self.rewind();
        }
        debug!("Sequencer playing={}", self.playing);
        self.playing
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn next_step(&self) -> usize {
        (self.current_step + 1) % self.pattern.step_count()
    }

    /// Move to the next step. Returns whether a queued pattern got swapped
    /// in. Does nothing while stopped.
    pub fn advance(&mut self) -> bool {
        if !self.playing {
            return false;
        }

        let previous = self.current_step;
        self.current_step = self.next_step();

        if previous == self.pattern.step_count() - 1 {
            if let Some(slot) = self.pending_slot.take() {
                self.activate(slot);
                debug!("Swapped to pattern={} on boundary", slot);
                return true;
            }
        }

        false
    }

    /// The step the next tick lands on, taking a pending swap into account.
    pub fn upcoming(&self) -> Step {
        let wraps = self.current_step == self.pattern.step_count() - 1;
        let pattern = match self.pending_slot {
            Some(slot) if wraps => self.bank.get(slot).unwrap_or(self.pattern),
            _ => self.pattern,
        };
        let index = if wraps { 0 } else { self.next_step() };
        Step {
            index,
            note: pattern.note(index),
            gate: pattern.gate(index),
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn pattern_slot(&self) -> usize {
        self.pattern_slot
    }

    pub fn pending_slot(&self) -> Option<usize> {
        self.pending_slot
    }

    pub fn bank(&self) -> &PatternBank {
        &self.bank
    }

    /// Queue a pattern to replace the active one at the next boundary.
    pub fn queue_pattern(&mut self, slot: usize) -> Result<(), Error> {
        if slot >= SLOTS {
            return Err(Error::SlotOutOfRange);
        }
        self.pending_slot = Some(slot);
        Ok(())
    }

    /// Replace the active pattern immediately. Only while stopped.
    pub fn load_pattern(&mut self, slot: usize) -> Result<(), Error> {
        if self.playing {
            return Err(Error::Playing);
        }
        if slot >= SLOTS {
            return Err(Error::SlotOutOfRange);
        }
        self.pending_slot = None;
        self.activate(slot);
        self.rewind();
        Ok(())
    }

    pub fn set_note(&mut self, step: usize, note: u8) -> Result<(), Error> {
        if step >= self.pattern.step_count() {
            return Err(Error::StepOutOfRange);
        }
        self.pattern.set_note(step, note);
        self.sync_bank();
        Ok(())
    }

    pub fn toggle_gate(&mut self, step: usize) -> Result<(), Error> {
        if step >= self.pattern.step_count() {
            return Err(Error::StepOutOfRange);
        }
        self.pattern.toggle_gate(step);
        self.sync_bank();
        Ok(())
    }

    /// Change the pattern length, keeping the position valid.
    pub fn set_step_count(&mut self, step_count: usize) {
        self.pattern.set_step_count(step_count);
        self.sync_bank();

        let step_count = self.pattern.step_count();
        if !self.playing || self.current_step >= step_count {
            self.current_step = step_count - 1;
        }
    }

    /// Persist every modified pattern. Only while stopped.
    pub fn flush<S: Storage>(&mut self, storage: &mut S) -> Result<usize, Error> {
        if self.playing {
            return Err(Error::Playing);
        }
        let written = self.bank.flush(storage);
        if !self.bank.is_dirty(self.pattern_slot) {
            self.pattern.mark_clean();
        }
        Ok(written)
    }

    /// Request saving the active pattern, even if unmodified. While playing
    /// the save waits for the next stop.
    pub fn save<S: Storage>(&mut self, storage: &mut S) -> Result<usize, Error> {
        self.bank.mark_dirty(self.pattern_slot);
        self.pattern.mark_dirty();
        self.flush(storage)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.bank.dirty_count() > 0
    }

    pub fn snapshot(&self) -> SequencerSnapshot {
        SequencerSnapshot {
            bpm: self.bpm(),
            playing: self.playing,
            current_step: self.current_step,
            step_count: self.pattern.step_count(),
            gate_mask: self.pattern.gate_mask(),
            notes: *self.pattern.notes(),
            pattern_slot: self.pattern_slot,
            pending_slot: self.pending_slot,
        }
    }

    fn activate(&mut self, slot: usize) {
        if let Some(pattern) = self.bank.get(slot) {
            self.pattern = pattern;
            self.pattern_slot = slot;
        }
    }

    fn rewind(&mut self) {
        self.current_step = self.pattern.step_count() - 1;
    }

    fn sync_bank(&mut self) {
        self.bank.store(self.pattern_slot, self.pattern);
    }
}
