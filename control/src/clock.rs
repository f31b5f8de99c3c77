//! Real-time tick generation and gate timing.
//!
//! [`TickGenerator`] lives in the real-time context and is called at a fixed
//! base resolution. It turns elapsed time into ticks published on the
//! [`Channel`], applies the CV requested for the upcoming step and drives the
//! gate through [`GateTimer`]. It must stay short and bounded: no logging,
//! no storage, no display.

use crate::channel::Channel;

/// Period of the real-time callback.
pub const BASE_RESOLUTION_US: u32 = 100;

pub const DEFAULT_BPM: u32 = 120;
pub const DEFAULT_PPQN: u32 = 4;

/// Outputs owned by the real-time context.
pub trait ClockOutput {
    fn set_gate(&mut self, high: bool);
    fn set_cv(&mut self, code: u16);
}

/// Tempo the step interval is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    bpm: u32,
    ppqn: u32,
}

impl ClockConfig {
    pub const DEFAULT: Self = Self {
        bpm: DEFAULT_BPM,
        ppqn: DEFAULT_PPQN,
    };

    /// Zero bpm or ppqn fall back to their defaults.
    pub fn new(bpm: u32, ppqn: u32) -> Self {
        Self {
            bpm: if bpm == 0 { DEFAULT_BPM } else { bpm },
            ppqn: if ppqn == 0 { DEFAULT_PPQN } else { ppqn },
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    /// Duration of one step in microseconds.
    pub const fn interval_us(&self) -> u32 {
        let interval = 60_000_000 / self.bpm / self.ppqn;
        if interval == 0 {
            1
        } else {
            interval
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Gate output timing, owned by the real-time context.
///
/// The duration is fixed when the gate opens, so a tempo change never
/// stretches or shortens a gate that is already high.
#[derive(Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GateTimer {
    active: bool,
    start_us: u32,
    duration_us: u32,
}

impl GateTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn open<O: ClockOutput>(&mut self, now_us: u32, duration_us: u32, output: &mut O) {
        output.set_gate(true);
        self.active = true;
        self.start_us = now_us;
        self.duration_us = duration_us;
    }

    /// Close the gate once its duration elapsed. Called on every callback.
    pub fn update<O: ClockOutput>(&mut self, now_us: u32, output: &mut O) {
        if self.active && now_us.wrapping_sub(self.start_us) >= self.duration_us {
            output.set_gate(false);
            self.active = false;
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickGenerator {
    now_us: u32,
    accumulator_us: u32,
    tempo_word: Option<crate::channel::TempoWord>,
    gate: GateTimer,
}

impl TickGenerator {
    pub fn new() -> Self {
        Self {
            now_us: 0,
            accumulator_us: 0,
            tempo_word: None,
            gate: GateTimer::new(),
        }
    }

    /// Advance time by `elapsed_us`. Returns the number of ticks fired.
    pub fn process<O: ClockOutput>(
        &mut self,
        elapsed_us: u32,
        channel: &Channel,
        output: &mut O,
    ) -> u32 {
        let tempo_word = channel.tempo_word();
        if self.tempo_word != Some(tempo_word) {
            self.tempo_word = Some(tempo_word);
            self.accumulator_us = 0;
        }
        let interval_us = tempo_word.interval_us();

        self.now_us = self.now_us.wrapping_add(elapsed_us);
        self.accumulator_us = self.accumulator_us.saturating_add(elapsed_us);

        let mut ticks = 0;
        while self.accumulator_us >= interval_us {
            self.accumulator_us -= interval_us;
            ticks += 1;
        }

        if ticks > 0 {
            channel.publish_ticks(ticks);

            let command = channel.step_command();
            output.set_cv(command.cv());
            if command.gate() && !self.gate.is_active() {
                self.gate.open(self.now_us, interval_us / 2, output);
            }
        }

        self.gate.update(self.now_us, output);

        ticks
    }

    pub fn gate_active(&self) -> bool {
        self.gate.is_active()
    }
}

impl Default for TickGenerator {
    fn default() -> Self {
        Self::new()
    }
}
