//! Pitch to DAC code conversion.
//!
//! The output follows 1 V/oct with MIDI note 36 (C1) at 0 V. The 12-bit DAC
//! spans four octaves.

use libm::roundf;

pub const MIDI_BASE: u8 = 36;
pub const DAC_MAX: u16 = 0x0FFF;

const OCTAVES: f32 = 4.0;
const DAC_PER_SEMITONE: f32 = 4096.0 / (OCTAVES * 12.0);

pub fn note_to_code(note: u8) -> u16 {
    let semitones = note as f32 - MIDI_BASE as f32;
    let code = roundf(semitones * DAC_PER_SEMITONE);
    code.clamp(0.0, DAC_MAX as f32) as u16
}
