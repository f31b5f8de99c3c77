//! Patterns and the bank holding all of them.

use crate::storage::Storage;

/// Step capacity of a pattern.
pub const STEPS: usize = 16;

/// Number of pattern slots in the bank.
pub const SLOTS: usize = 10;

/// Note range playable by the CV output, four octaves from C1.
pub const NOTE_MIN: u8 = 36;
pub const NOTE_MAX: u8 = 84;

/// Size of a pattern serialized by [`Pattern::to_bytes`].
pub const RECORD_LEN: usize = STEPS + 3;

const MIDI_MAX: u8 = 127;

// C major scale starting from C3.
const DEFAULT_NOTES: [u8; STEPS] = [
    48, 50, 52, 53, 55, 57, 59, 60, 62, 64, 65, 67, 69, 71, 72, 74,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pattern {
    notes: [u8; STEPS],
    gate_mask: u16,
    step_count: usize,
    dirty: bool,
}

impl Default for Pattern {
    fn default() -> Self {
        Self {
            notes: DEFAULT_NOTES,
            gate_mask: u16::MAX,
            step_count: STEPS,
            dirty: false,
        }
    }
}

impl Pattern {
    pub fn new(notes: [u8; STEPS], gate_mask: u16, step_count: usize) -> Self {
        Self {
            notes: notes.map(|note| note.min(MIDI_MAX)),
            gate_mask,
            step_count: clamp_step_count(step_count),
            dirty: false,
        }
    }

    pub fn notes(&self) -> &[u8; STEPS] {
        &self.notes
    }

    /// Note of the given step. Steps past the capacity read as step 0.
    pub fn note(&self, step: usize) -> u8 {
        self.notes[if step < STEPS { step } else { 0 }]
    }

    pub fn set_note(&mut self, step: usize, note: u8) {
        if step < STEPS {
            self.notes[step] = note.min(MIDI_MAX);
            self.dirty = true;
        }
    }

    pub fn gate_mask(&self) -> u16 {
        self.gate_mask
    }

    pub fn gate(&self, step: usize) -> bool {
        step < STEPS && self.gate_mask & (1 << step) != 0
    }

    pub fn toggle_gate(&mut self, step: usize) {
        if step < STEPS {
            self.gate_mask ^= 1 << step;
            self.dirty = true;
        }
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Set the number of played steps, clamped to `1..=STEPS`.
    pub fn set_step_count(&mut self, step_count: usize) {
        let step_count = clamp_step_count(step_count);
        if step_count != self.step_count {
            self.step_count = step_count;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Notes, gate mask in big endian, step count.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0; RECORD_LEN];
        bytes[..STEPS].copy_from_slice(&self.notes);
        bytes[STEPS..STEPS + 2].copy_from_slice(&self.gate_mask.to_be_bytes());
        bytes[STEPS + 2] = self.step_count as u8;
        bytes
    }

    /// Decode a record written by [`Pattern::to_bytes`]. Values out of range
    /// are clamped rather than rejected.
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Self {
        let mut notes = [0; STEPS];
        notes.copy_from_slice(&bytes[..STEPS]);
        let gate_mask = u16::from_be_bytes([bytes[STEPS], bytes[STEPS + 1]]);
        let step_count = bytes[STEPS + 2] as usize;
        Self::new(notes, gate_mask, step_count)
    }
}

fn clamp_step_count(step_count: usize) -> usize {
    step_count.clamp(1, STEPS)
}

/// All pattern slots, each tracking whether it differs from storage.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternBank {
    patterns: [Pattern; SLOTS],
    persistent: bool,
}

impl Default for PatternBank {
    fn default() -> Self {
        Self::volatile()
    }
}

impl PatternBank {
    /// Bank of default patterns, never written anywhere.
    pub fn volatile() -> Self {
        Self {
            patterns: [Pattern::default(); SLOTS],
            persistent: false,
        }
    }

    /// Load all slots from storage.
    ///
    /// Storage without valid data gets formatted with default patterns.
    /// A slot that cannot be read gets the default pattern, marked dirty so
    /// the next flush rewrites it. Storage that fails as a whole is treated
    /// as absent and the bank stays volatile.
    pub fn load<S: Storage>(storage: &mut S) -> Self {
        match Self::try_load(storage) {
            Ok(bank) => bank,
            Err(_) => {
                warn!("Storage is not responding, keeping patterns in RAM only");
                Self::volatile()
            }
        }
    }

    fn try_load<S: Storage>(storage: &mut S) -> Result<Self, S::Error> {
        if storage.has_valid_data()? {
            let mut patterns = [Pattern::default(); SLOTS];
            for (slot, pattern) in patterns.iter_mut().enumerate() {
                match storage.read_pattern(slot) {
                    Ok(stored) => {
                        *pattern = stored;
                        pattern.mark_clean();
                    }
                    Err(_) => {
                        warn!("Pattern={} is unreadable, restoring the default", slot);
                        pattern.mark_dirty();
                    }
                }
            }
            info!("Loaded patterns from storage");
            Ok(Self {
                patterns,
                persistent: true,
            })
        } else {
            info!("Storage holds no patterns, formatting it");
            let mut bank = Self {
                patterns: [Pattern::default(); SLOTS],
                persistent: true,
            };
            bank.patterns.iter_mut().for_each(Pattern::mark_dirty);
            bank.try_flush(storage)?;
            Ok(bank)
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Copy of the pattern in `slot`, `None` for slots out of range.
    pub fn get(&self, slot: usize) -> Option<Pattern> {
        self.patterns.get(slot).copied()
    }

    /// Replace the pattern in `slot`, keeping its dirty flag.
    pub fn store(&mut self, slot: usize, pattern: Pattern) {
        if let Some(stored) = self.patterns.get_mut(slot) {
            *stored = pattern;
        }
    }

    pub fn is_dirty(&self, slot: usize) -> bool {
        self.patterns
            .get(slot)
            .map(Pattern::is_dirty)
            .unwrap_or(false)
    }

    pub fn mark_dirty(&mut self, slot: usize) {
        if let Some(pattern) = self.patterns.get_mut(slot) {
            pattern.mark_dirty();
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.patterns.iter().filter(|p| p.is_dirty()).count()
    }

    /// Write every dirty slot. Returns how many slots were written.
    ///
    /// The first failure switches the bank to volatile mode for good; the
    /// patterns stay in RAM and are not retried.
    pub fn flush<S: Storage>(&mut self, storage: &mut S) -> usize {
        if !self.persistent {
            return 0;
        }

        match self.try_flush(storage) {
            Ok(written) => written,
            Err(_) => {
                warn!("Failed writing patterns, storage disabled");
                self.persistent = false;
                0
            }
        }
    }

    fn try_flush<S: Storage>(&mut self, storage: &mut S) -> Result<usize, S::Error> {
        let mut written = 0;
        for (slot, pattern) in self.patterns.iter_mut().enumerate() {
            if pattern.is_dirty() {
                storage.write_pattern(slot, pattern)?;
                pattern.mark_clean();
                written += 1;
            }
        }
        if written > 0 {
            storage.mark_valid()?;
        }
        Ok(written)
    }
}
