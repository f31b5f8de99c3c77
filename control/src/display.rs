//! Status display collaborator.
//!
//! The control loop never draws. It produces [`DisplayFrame`]s, detached
//! copies of what should be shown, and whoever owns the display renders the
//! latest one when it gets to it.

use crate::pattern::STEPS;
use crate::sequencer::SequencerSnapshot;

pub trait Display {
    fn render_bpm(&mut self, bpm: u32, slot: usize);

    /// `current_step` is `None` when no step should be highlighted.
    fn render_steps(&mut self, current_step: Option<usize>, step_count: usize, gate_mask: u16);

    fn render_edit(&mut self, step: usize, note: u8, gate: bool);

    fn render_pattern_select(&mut self, slot: usize);
}

/// What part of the user interface is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum View {
    Tempo,
    EditStep { step: usize },
    EditNote { step: usize },
    PatternSelect { slot: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayFrame {
    pub view: View,
    pub snapshot: SequencerSnapshot,
}

impl DisplayFrame {
    pub fn render<D: Display>(&self, display: &mut D) {
        let snapshot = &self.snapshot;
        match self.view {
            View::Tempo => {
                let current_step = if snapshot.playing {
                    Some(snapshot.current_step)
                } else {
                    None
                };
                display.render_steps(current_step, snapshot.step_count, snapshot.gate_mask);
                display.render_bpm(snapshot.bpm, snapshot.pattern_slot);
            }
            View::EditStep { step } | View::EditNote { step } => {
                let note = snapshot.notes.get(step).copied().unwrap_or_default();
                let gate = step < STEPS && snapshot.gate_mask & (1 << step) != 0;
                display.render_edit(step, note, gate);
            }
            View::PatternSelect { slot } => {
                display.render_pattern_select(slot);
            }
        }
    }
}
