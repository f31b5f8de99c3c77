//! Status display printed over the debug probe.
//!
//! The module has no screen of its own; frames are rendered as log lines.

use tact_control::Display;

#[derive(Debug, Default)]
pub struct DefmtDisplay;

impl Display for DefmtDisplay {
    fn render_bpm(&mut self, bpm: u32, slot: usize) {
        defmt::info!("BPM={} pattern={}", bpm, slot);
    }

    fn render_steps(&mut self, current_step: Option<usize>, step_count: usize, gate_mask: u16) {
        let mut row = [b'.'; tact_control::pattern::STEPS];
        for (step, cell) in row.iter_mut().enumerate().take(step_count) {
            *cell = if Some(step) == current_step {
                b'>'
            } else if gate_mask & (1 << step) != 0 {
                b'x'
            } else {
                b'-'
            };
        }
        // Only ASCII is written above.
        let row = core::str::from_utf8(&row).unwrap_or_default();
        defmt::info!("[{=str}]", row);
    }

    fn render_edit(&mut self, step: usize, note: u8, gate: bool) {
        defmt::info!("Edit step={} note={} gate={}", step + 1, note, gate);
    }

    fn render_pattern_select(&mut self, slot: usize) {
        defmt::info!("Select pattern={}", slot);
    }
}
