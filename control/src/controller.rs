//! Control loop logic.
//!
//! The controller turns debounced user input into sequencer operations,
//! advances the sequencer on ticks taken from the [`Channel`] and requests
//! gate and CV of the upcoming step back through it.
//!
//! The request always targets the step the *next* tick lands on. The
//! real-time context applies it at that tick, at the same instant the
//! control loop advances onto the step, so gate and CV never lag the
//! sequencer position.
//!
//! Pending ticks are drained completely on every call to
//! [`Controller::tick`], one advance per tick. A slow iteration therefore
//! never loses steps. Ticks that fire before the control loop catches up
//! replay the last requested step on the outputs: its CV is applied again
//! and its gate reopens if it has closed in the meantime.

use crate::channel::Channel;
use crate::cv;
use crate::display::{DisplayFrame, View};
use crate::pattern::{PatternBank, NOTE_MAX, NOTE_MIN, SLOTS};
use crate::sequencer::{Error, Sequencer};
use crate::storage::Storage;

pub const BPM_MIN: u32 = 20;
pub const BPM_MAX: u32 = 300;

const FINE_BPM_STEP: i32 = 1;
const COARSE_BPM_STEP: i32 = 10;

/// How long the status LED stays on after a quarter note.
pub const LED_BLINK_MS: u32 = 30;

const STEPS_PER_QUARTER: usize = 4;

/// Debounced input collected during one control loop iteration.
///
/// Buttons report presses, not levels, except for the held step button.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlInputSnapshot {
    pub play: bool,
    pub stop: bool,
    pub edit: bool,
    pub pattern: bool,
    pub save: bool,
    pub encoder_switch: bool,
    pub step_held: bool,
    pub encoder_delta: i32,
}

impl ControlInputSnapshot {
    fn is_idle(&self) -> bool {
        *self
            == Self {
                step_held: self.step_held,
                ..Self::default()
            }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Controller {
    sequencer: Sequencer,
    view: View,
    coarse: bool,
    blink_until: Option<u32>,
}

impl Controller {
    pub fn new(bank: PatternBank) -> Self {
        Self {
            sequencer: Sequencer::new(bank),
            view: View::Tempo,
            coarse: false,
            blink_until: None,
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Publish the initial tempo and silence the outputs.
    pub fn start(&mut self, channel: &Channel) -> DisplayFrame {
        channel.set_tempo(self.sequencer.clock());
        channel.request_step(false, 0);
        info!(
            "Controller started with bpm={} slot={}",
            self.sequencer.bpm(),
            self.sequencer.pattern_slot()
        );
        self.frame()
    }

    pub fn frame(&self) -> DisplayFrame {
        DisplayFrame {
            view: self.view,
            snapshot: self.sequencer.snapshot(),
        }
    }

    /// Whether the status LED should be lit at `now` milliseconds.
    pub fn led(&self, now: u32) -> bool {
        self.blink_until
            .map(|until| (until.wrapping_sub(now) as i32) > 0)
            .unwrap_or(false)
    }

    /// Apply one iteration's worth of input. Returns a frame when the
    /// display needs an update.
    pub fn apply_input_snapshot<S: Storage>(
        &mut self,
        input: &ControlInputSnapshot,
        channel: &Channel,
        storage: &mut S,
    ) -> Option<DisplayFrame> {
        if input.is_idle() {
            return None;
        }

        if input.play {
            self.toggle_play(channel, storage);
        }
        if input.stop && self.sequencer.is_playing() {
            self.toggle_play(channel, storage);
        }
        if input.edit {
            self.cycle_edit_view();
        }
        if input.pattern {
            self.press_pattern(channel);
        }
        if input.encoder_switch {
            self.press_encoder(channel);
        }
        if input.encoder_delta != 0 {
            self.turn_encoder(input.encoder_delta, input.step_held, channel);
        }
        if input.save {
            self.save(storage);
        }

        Some(self.frame())
    }

    /// Consume all pending ticks. Returns a frame when the step display
    /// needs an update.
    pub fn tick(&mut self, channel: &Channel, now: u32) -> Option<DisplayFrame> {
        let mut advanced = false;
        while channel.try_consume_tick() {
            if !self.sequencer.is_playing() {
                continue;
            }
            if self.sequencer.advance() {
                self.clamp_view();
            }
            advanced = true;
        }

        if !advanced {
            return None;
        }

        self.request_upcoming(channel);

        if self.sequencer.current_step() % STEPS_PER_QUARTER == 0 {
            self.blink_until = Some(now.wrapping_add(LED_BLINK_MS));
        }

        if self.view == View::Tempo {
            Some(self.frame())
        } else {
            None
        }
    }

    fn toggle_play<S: Storage>(&mut self, channel: &Channel, storage: &mut S) {
        if self.sequencer.toggle_play() {
            // Republishing the tempo restarts the real-time accumulator, so
            // no tick fires for a full interval. Only then are the ticks that
            // piled up while stopped thrown away.
            channel.set_tempo(self.sequencer.clock());
            self.request_upcoming(channel);
            channel.discard_ticks();
        } else {
            channel.request_gate(false);
            if let Ok(written) = self.sequencer.flush(storage) {
                if written > 0 {
                    info!("Saved patterns={} on stop", written);
                }
            }
        }
    }

    fn cycle_edit_view(&mut self) {
        self.view = match self.view {
            View::Tempo | View::PatternSelect { .. } => View::EditStep { step: 0 },
            View::EditStep { step } => View::EditNote { step },
            View::EditNote { .. } => View::Tempo,
        };
        self.clamp_view();
    }

    fn press_pattern(&mut self, channel: &Channel) {
        self.view = match self.view {
            View::PatternSelect { slot } => {
                self.select_pattern(slot, channel);
                View::Tempo
            }
            _ => View::PatternSelect {
                slot: self.sequencer.pattern_slot(),
            },
        };
    }

    fn press_encoder(&mut self, channel: &Channel) {
        match self.view {
            View::Tempo => {
                self.coarse = !self.coarse;
            }
            View::EditStep { step } | View::EditNote { step } => {
                if self.sequencer.toggle_gate(step).is_ok() {
                    self.request_upcoming(channel);
                }
            }
            View::PatternSelect { slot } => {
                self.select_pattern(slot, channel);
                self.view = View::Tempo;
            }
        }
    }

    fn turn_encoder(&mut self, delta: i32, step_held: bool, channel: &Channel) {
        match self.view {
            View::Tempo if step_held => {
                let step_count = self.sequencer.pattern().step_count() as i32 + delta;
                self.sequencer.set_step_count(step_count.max(1) as usize);
                self.request_upcoming(channel);
            }
            View::Tempo => {
                let step = if self.coarse {
                    COARSE_BPM_STEP
                } else {
                    FINE_BPM_STEP
                };
                let bpm = (self.sequencer.bpm() as i32 + delta * step)
                    .clamp(BPM_MIN as i32, BPM_MAX as i32) as u32;
                if bpm != self.sequencer.bpm() {
                    self.sequencer.set_bpm(bpm);
                    channel.set_tempo(self.sequencer.clock());
                    debug!("Tempo set to bpm={}", bpm);
                }
            }
            View::EditStep { step } => {
                let step_count = self.sequencer.pattern().step_count() as i32;
                let step = (step as i32 + delta).rem_euclid(step_count) as usize;
                self.view = View::EditStep { step };
            }
            View::EditNote { step } => {
                let note = (self.sequencer.pattern().note(step) as i32 + delta)
                    .clamp(NOTE_MIN as i32, NOTE_MAX as i32) as u8;
                if self.sequencer.set_note(step, note).is_ok() {
                    self.request_upcoming(channel);
                }
            }
            View::PatternSelect { slot } => {
                let slot = (slot as i32 + delta).rem_euclid(SLOTS as i32) as usize;
                self.view = View::PatternSelect { slot };
            }
        }
    }

    fn select_pattern(&mut self, slot: usize, channel: &Channel) {
        if self.sequencer.is_playing() {
            if self.sequencer.queue_pattern(slot).is_ok() {
                debug!("Queued pattern={}", slot);
                self.request_upcoming(channel);
            }
        } else if self.sequencer.load_pattern(slot).is_ok() {
            debug!("Loaded pattern={}", slot);
        }
    }

    fn save<S: Storage>(&mut self, storage: &mut S) {
        match self.sequencer.save(storage) {
            Ok(written) => info!("Saved patterns={}", written),
            Err(Error::Playing) => debug!("Saving postponed until stop"),
            Err(_) => (),
        }
    }

    fn request_upcoming(&self, channel: &Channel) {
        let upcoming = self.sequencer.upcoming();
        let note = upcoming.note.clamp(NOTE_MIN, NOTE_MAX);
        let gate = upcoming.gate && self.sequencer.is_playing();
        channel.request_step(gate, cv::note_to_code(note));
    }

    fn clamp_view(&mut self) {
        let last_step = self.sequencer.pattern().step_count() - 1;
        self.view = match self.view {
            View::EditStep { step } => View::EditStep {
                step: step.min(last_step),
            },
            View::EditNote { step } => View::EditNote {
                step: step.min(last_step),
            },
            view => view,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StepCommand;
    use crate::clock::{ClockConfig, ClockOutput, TickGenerator, BASE_RESOLUTION_US};
    use crate::pattern::{Pattern, STEPS};
    use crate::storage::tests::MemoryStorage;

    struct Fixture {
        controller: Controller,
        channel: Channel,
        storage: MemoryStorage,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_gate_mask(u16::MAX)
        }

        fn with_gate_mask(gate_mask: u16) -> Self {
            let mut storage = MemoryStorage::default();
            let mut bank = PatternBank::load(&mut storage);
            for slot in 0..SLOTS {
                let mut notes = [0; STEPS];
                for (step, note) in notes.iter_mut().enumerate() {
                    *note = 36 + slot as u8 + step as u8;
                }
                bank.store(slot, Pattern::new(notes, gate_mask, STEPS));
            }
            let mut controller = Controller::new(bank);
            let channel = Channel::new();
            controller.start(&channel);
            Self {
                controller,
                channel,
                storage,
            }
        }

        fn input(&mut self, input: ControlInputSnapshot) -> Option<DisplayFrame> {
            self.controller
                .apply_input_snapshot(&input, &self.channel, &mut self.storage)
        }

        fn press_play(&mut self) {
            self.input(ControlInputSnapshot {
                play: true,
                ..Default::default()
            });
        }

        fn turn(&mut self, delta: i32) {
            self.input(ControlInputSnapshot {
                encoder_delta: delta,
                ..Default::default()
            });
        }

        fn ticks(&mut self, ticks: u32) -> Option<DisplayFrame> {
            self.channel.publish_ticks(ticks);
            self.controller.tick(&self.channel, 0)
        }

        fn current_step(&self) -> usize {
            self.controller.sequencer().current_step()
        }
    }

    fn command_for(gate: bool, note: u8) -> StepCommand {
        StepCommand::new(gate, cv::note_to_code(note))
    }

    #[test]
    fn starting_requests_first_step() {
        let mut fixture = Fixture::new();
        assert_eq!(fixture.channel.step_command(), StepCommand::silent());

        fixture.press_play();
        assert_eq!(fixture.channel.step_command(), command_for(true, 36));
    }

    #[test]
    fn tick_advances_and_requests_next_step() {
        let mut fixture = Fixture::new();
        fixture.press_play();

        assert!(fixture.ticks(1).is_some());
        assert_eq!(fixture.current_step(), 0);
        assert_eq!(fixture.channel.step_command(), command_for(true, 37));
    }

    #[test]
    fn rest_steps_request_closed_gate() {
        let mut fixture = Fixture::with_gate_mask(0b0101);
        fixture.press_play();
        assert!(fixture.channel.step_command().gate());

        fixture.ticks(1);
        assert!(!fixture.channel.step_command().gate());
        fixture.ticks(1);
        assert!(fixture.channel.step_command().gate());
    }

    #[test]
    fn late_loop_catches_up_on_every_tick() {
        let mut fixture = Fixture::new();
        fixture.press_play();

        fixture.ticks(3);
        assert_eq!(fixture.current_step(), 2);
        assert_eq!(fixture.channel.pending_ticks(), 0);
    }

    #[test]
    fn ticks_before_catching_up_replay_last_request() {
        let mut fixture = Fixture::new();
        let mut generator = TickGenerator::new();
        let mut outputs = Outputs::default();
        fixture.press_play();
        let interval = fixture.channel.tempo_word().interval_us();

        // Two steps pass without the control loop running.
        let mut ticks = 0;
        for _ in 0..(2 * interval / BASE_RESOLUTION_US) {
            ticks += generator.process(BASE_RESOLUTION_US, &fixture.channel, &mut outputs);
        }
        assert_eq!(ticks, 2);
        assert_eq!(outputs.gate_rises, 2);
        assert_eq!(outputs.cv, cv::note_to_code(36));

        fixture.controller.tick(&fixture.channel, 0);
        assert_eq!(fixture.current_step(), 1);
        assert_eq!(fixture.channel.step_command(), command_for(true, 38));
    }

    #[test]
    fn first_step_after_start_gets_full_interval() {
        let mut fixture = Fixture::new();
        let mut generator = TickGenerator::new();
        let mut outputs = Outputs::default();
        let interval = fixture.channel.tempo_word().interval_us();

        // Stopped for most of an interval under the old phase.
        for _ in 0..(interval / BASE_RESOLUTION_US - 1) {
            generator.process(BASE_RESOLUTION_US, &fixture.channel, &mut outputs);
        }
        fixture.press_play();
        assert_eq!(fixture.channel.pending_ticks(), 0);

        let mut elapsed = 0;
        loop {
            elapsed += BASE_RESOLUTION_US;
            if generator.process(BASE_RESOLUTION_US, &fixture.channel, &mut outputs) > 0 {
                break;
            }
        }
        assert_eq!(elapsed, interval);
        assert!(outputs.gate);
        assert_eq!(outputs.cv, cv::note_to_code(36));

        fixture.controller.tick(&fixture.channel, 0);
        assert_eq!(fixture.current_step(), 0);
    }

    #[test]
    fn ticks_while_stopped_are_dropped() {
        let mut fixture = Fixture::new();
        assert!(fixture.ticks(5).is_none());

        fixture.channel.publish_ticks(2);
        fixture.press_play();
        assert_eq!(fixture.channel.pending_ticks(), 0);

        fixture.ticks(1);
        assert_eq!(fixture.current_step(), 0);
    }

    #[test]
    fn stopping_closes_gate_and_saves_edits() {
        let mut fixture = Fixture::new();
        fixture.press_play();
        fixture.ticks(1);

        fixture.input(ControlInputSnapshot {
            edit: true,
            ..Default::default()
        });
        fixture.input(ControlInputSnapshot {
            edit: true,
            ..Default::default()
        });
        fixture.turn(5);
        let writes = fixture.storage.writes;

        fixture.input(ControlInputSnapshot {
            stop: true,
            ..Default::default()
        });
        assert!(!fixture.controller.sequencer().is_playing());
        assert!(!fixture.channel.step_command().gate());
        assert_eq!(fixture.storage.writes, writes + 1);
        assert_eq!(fixture.storage.patterns[0].map(|p| p.note(0)), Some(41));
    }

    #[test]
    fn stop_button_does_not_start_playback() {
        let mut fixture = Fixture::new();
        fixture.input(ControlInputSnapshot {
            stop: true,
            ..Default::default()
        });
        assert!(!fixture.controller.sequencer().is_playing());
    }

    #[test]
    fn restart_begins_at_first_step() {
        let mut fixture = Fixture::new();
        fixture.press_play();
        fixture.ticks(7);
        fixture.press_play();
        fixture.press_play();

        assert_eq!(fixture.channel.step_command(), command_for(true, 36));
        fixture.ticks(1);
        assert_eq!(fixture.current_step(), 0);
    }

    #[test]
    fn encoder_changes_tempo_within_limits() {
        let mut fixture = Fixture::new();
        fixture.turn(3);
        assert_eq!(fixture.controller.sequencer().bpm(), 123);
        assert_eq!(
            fixture.channel.tempo_word().interval_us(),
            ClockConfig::new(123, 4).interval_us()
        );

        fixture.turn(-1000);
        assert_eq!(fixture.controller.sequencer().bpm(), BPM_MIN);
        fixture.turn(1000);
        assert_eq!(fixture.controller.sequencer().bpm(), BPM_MAX);
    }

    #[test]
    fn encoder_switch_toggles_coarse_tempo() {
        let mut fixture = Fixture::new();
        fixture.input(ControlInputSnapshot {
            encoder_switch: true,
            ..Default::default()
        });
        fixture.turn(2);
        assert_eq!(fixture.controller.sequencer().bpm(), 140);

        fixture.input(ControlInputSnapshot {
            encoder_switch: true,
            ..Default::default()
        });
        fixture.turn(-1);
        assert_eq!(fixture.controller.sequencer().bpm(), 139);
    }

    #[test]
    fn held_step_button_changes_pattern_length() {
        let mut fixture = Fixture::new();
        fixture.input(ControlInputSnapshot {
            step_held: true,
            encoder_delta: -4,
            ..Default::default()
        });
        assert_eq!(fixture.controller.sequencer().pattern().step_count(), 12);
        assert_eq!(fixture.controller.sequencer().bpm(), 120);

        fixture.input(ControlInputSnapshot {
            step_held: true,
            encoder_delta: -40,
            ..Default::default()
        });
        assert_eq!(fixture.controller.sequencer().pattern().step_count(), 1);
    }

    #[test]
    fn held_step_button_alone_does_not_redraw() {
        let mut fixture = Fixture::new();
        let frame = fixture.input(ControlInputSnapshot {
            step_held: true,
            ..Default::default()
        });
        assert!(frame.is_none());
    }

    #[test]
    fn edit_views_cycle() {
        let mut fixture = Fixture::new();
        let edit = ControlInputSnapshot {
            edit: true,
            ..Default::default()
        };

        fixture.input(edit);
        assert_eq!(fixture.controller.view(), View::EditStep { step: 0 });
        fixture.turn(-1);
        assert_eq!(fixture.controller.view(), View::EditStep { step: 15 });
        fixture.input(edit);
        assert_eq!(fixture.controller.view(), View::EditNote { step: 15 });
        fixture.input(edit);
        assert_eq!(fixture.controller.view(), View::Tempo);
    }

    #[test]
    fn note_edit_is_clamped_to_playable_range() {
        let mut fixture = Fixture::new();
        let edit = ControlInputSnapshot {
            edit: true,
            ..Default::default()
        };
        fixture.input(edit);
        fixture.input(edit);

        fixture.turn(-10);
        assert_eq!(fixture.controller.sequencer().pattern().note(0), NOTE_MIN);
        fixture.turn(100);
        assert_eq!(fixture.controller.sequencer().pattern().note(0), NOTE_MAX);
    }

    #[test]
    fn editing_upcoming_step_refreshes_request() {
        let mut fixture = Fixture::new();
        fixture.press_play();
        fixture.input(ControlInputSnapshot {
            edit: true,
            ..Default::default()
        });

        fixture.input(ControlInputSnapshot {
            encoder_switch: true,
            ..Default::default()
        });
        assert!(!fixture.controller.sequencer().pattern().gate(0));
        assert!(!fixture.channel.step_command().gate());
    }

    #[test]
    fn pattern_selected_while_stopped_loads_immediately() {
        let mut fixture = Fixture::new();
        let pattern = ControlInputSnapshot {
            pattern: true,
            ..Default::default()
        };

        fixture.input(pattern);
        assert_eq!(fixture.controller.view(), View::PatternSelect { slot: 0 });
        fixture.turn(-2);
        assert_eq!(fixture.controller.view(), View::PatternSelect { slot: 8 });
        fixture.input(pattern);

        assert_eq!(fixture.controller.view(), View::Tempo);
        assert_eq!(fixture.controller.sequencer().pattern_slot(), 8);
    }

    #[test]
    fn pattern_selected_while_playing_waits_for_boundary() {
        let mut fixture = Fixture::new();
        fixture.press_play();
        fixture.ticks(3);

        fixture.input(ControlInputSnapshot {
            pattern: true,
            ..Default::default()
        });
        fixture.turn(1);
        fixture.input(ControlInputSnapshot {
            encoder_switch: true,
            ..Default::default()
        });
        assert_eq!(fixture.controller.sequencer().pending_slot(), Some(1));

        fixture.ticks(12);
        assert_eq!(fixture.current_step(), 14);
        assert_eq!(fixture.controller.sequencer().pattern_slot(), 0);
        fixture.ticks(1);
        assert_eq!(fixture.current_step(), 15);
        // The request for the first step already comes from the new pattern.
        assert_eq!(fixture.channel.step_command(), command_for(true, 37));

        fixture.ticks(1);
        assert_eq!(fixture.current_step(), 0);
        assert_eq!(fixture.controller.sequencer().pattern_slot(), 1);
    }

    #[test]
    fn save_while_stopped_writes_active_pattern() {
        let mut fixture = Fixture::new();
        let writes = fixture.storage.writes;
        fixture.input(ControlInputSnapshot {
            save: true,
            ..Default::default()
        });
        assert_eq!(fixture.storage.writes, writes + 1);
    }

    #[test]
    fn led_blinks_on_quarter_notes() {
        let mut fixture = Fixture::new();
        fixture.press_play();

        fixture.channel.publish_ticks(1);
        fixture.controller.tick(&fixture.channel, 1_000);
        assert!(fixture.controller.led(1_000));
        assert!(fixture.controller.led(1_000 + LED_BLINK_MS - 1));
        assert!(!fixture.controller.led(1_000 + LED_BLINK_MS));

        fixture.channel.publish_ticks(1);
        fixture.controller.tick(&fixture.channel, 2_000);
        assert!(!fixture.controller.led(2_000));
    }

    #[derive(Default)]
    struct Outputs {
        gate: bool,
        cv: u16,
        gate_rises: u32,
    }

    impl ClockOutput for Outputs {
        fn set_gate(&mut self, high: bool) {
            if high && !self.gate {
                self.gate_rises += 1;
            }
            self.gate = high;
        }

        fn set_cv(&mut self, code: u16) {
            self.cv = code;
        }
    }

    #[test]
    fn outputs_follow_the_step_sequencer_lands_on() {
        let gate_mask = 0b1011_0110_1100_1101;
        let mut fixture = Fixture::with_gate_mask(gate_mask);
        let mut generator = TickGenerator::new();
        let mut outputs = Outputs::default();
        fixture.press_play();

        let mut now_us = 0_u32;
        let mut steps = 0;
        while steps < 40 {
            now_us += BASE_RESOLUTION_US;
            let ticks = generator.process(BASE_RESOLUTION_US, &fixture.channel, &mut outputs);
            fixture.controller.tick(&fixture.channel, now_us / 1000);
            if ticks == 0 {
                continue;
            }
            steps += 1;

            let step = fixture.current_step();
            let pattern = fixture.controller.sequencer().pattern();
            assert_eq!(step, (steps - 1) % STEPS);
            assert_eq!(outputs.cv, cv::note_to_code(pattern.note(step)));
            assert_eq!(outputs.gate, pattern.gate(step));
        }
    }
}
