//! Lock-free hand-over between the control loop and the real-time clock.
//!
//! Every field has exactly one writing context:
//!
//! | field   | written by          | read by             |
//! |---------|---------------------|---------------------|
//! | ticks   | real-time (`+`), control (`-`) | both     |
//! | tempo   | control             | real-time           |
//! | command | control             | real-time           |
//!
//! The tick counter is the only field touched by both sides, and only through
//! read-modify-write operations: the real-time context adds, the control
//! loop subtracts. Nothing here blocks or spins on the other context.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::clock::ClockConfig;

const INTERVAL_BITS: u32 = 26;
const INTERVAL_MASK: u32 = (1 << INTERVAL_BITS) - 1;
const GENERATION_MASK: u32 = !INTERVAL_MASK;

/// Longest interval the tempo word can carry, above one step per minute.
pub const MAX_INTERVAL_US: u32 = INTERVAL_MASK;

const CV_MASK: u32 = 0x0FFF;
const GATE_BIT: u32 = 1 << 15;

#[derive(Debug)]
pub struct Channel {
    ticks: AtomicU32,
    tempo: AtomicU32,
    command: AtomicU32,
}

impl Channel {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU32::new(0),
            tempo: AtomicU32::new(TempoWord::initial().0),
            command: AtomicU32::new(StepCommand::silent().to_bits()),
        }
    }

    /// Take one pending tick, if any. Called from the control loop.
    pub fn try_consume_tick(&self) -> bool {
        self.ticks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ticks| {
                ticks.checked_sub(1)
            })
            .is_ok()
    }

    /// Throw away all pending ticks, returning how many there were.
    pub fn discard_ticks(&self) -> u32 {
        let pending = self.ticks.load(Ordering::Acquire);
        self.ticks.fetch_sub(pending, Ordering::AcqRel);
        pending
    }

    /// Number of ticks waiting to be consumed.
    pub fn pending_ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Publish ticks produced by the real-time context.
    pub fn publish_ticks(&self, ticks: u32) {
        if ticks > 0 {
            self.ticks.fetch_add(ticks, Ordering::AcqRel);
        }
    }

    /// Recompute the step interval. The real-time context picks it up with
    /// its next callback and restarts its sub-interval accumulator.
    pub fn set_tempo(&self, config: ClockConfig) {
        let previous = TempoWord(self.tempo.load(Ordering::Relaxed));
        let next = previous.succeed(config.interval_us());
        self.tempo.store(next.0, Ordering::Release);
    }

    pub fn tempo_word(&self) -> TempoWord {
        TempoWord(self.tempo.load(Ordering::Acquire))
    }

    /// Request the gate for the step the next tick lands on.
    pub fn request_gate(&self, enabled: bool) {
        let command = self.step_command();
        self.request(StepCommand::new(enabled, command.cv()));
    }

    /// Request the CV code applied on the next tick.
    pub fn request_cv(&self, value: u16) {
        let command = self.step_command();
        self.request(StepCommand::new(command.gate(), value));
    }

    /// Request both gate and CV of the upcoming step in a single store, so
    /// the real-time context can never observe one without the other.
    pub fn request_step(&self, gate: bool, cv: u16) {
        self.request(StepCommand::new(gate, cv));
    }

    pub fn step_command(&self) -> StepCommand {
        StepCommand::from_bits(self.command.load(Ordering::Acquire))
    }

    fn request(&self, command: StepCommand) {
        self.command.store(command.to_bits(), Ordering::Release);
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// Step interval together with a generation counter.
///
/// Both live in one word so the real-time context reads them without
/// tearing. The generation changes with every tempo update, even one that
/// keeps the interval, and tells the real-time context to restart its
/// accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempoWord(u32);

impl TempoWord {
    const fn initial() -> Self {
        Self(ClockConfig::DEFAULT.interval_us() & INTERVAL_MASK)
    }

    fn succeed(self, interval_us: u32) -> Self {
        let generation = (self.0 & GENERATION_MASK).wrapping_add(1 << INTERVAL_BITS);
        Self(generation | interval_us.clamp(1, MAX_INTERVAL_US))
    }

    pub fn interval_us(self) -> u32 {
        (self.0 & INTERVAL_MASK).max(1)
    }
}

/// Gate and CV of one step, packed into a single atomic word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepCommand {
    gate: bool,
    cv: u16,
}

impl StepCommand {
    pub fn new(gate: bool, cv: u16) -> Self {
        Self {
            gate,
            cv: cv.min(CV_MASK as u16),
        }
    }

    pub const fn silent() -> Self {
        Self { gate: false, cv: 0 }
    }

    pub fn gate(&self) -> bool {
        self.gate
    }

    pub fn cv(&self) -> u16 {
        self.cv
    }

    const fn to_bits(self) -> u32 {
        let gate = if self.gate { GATE_BIT } else { 0 };
        gate | (self.cv as u32 & CV_MASK)
    }

    fn from_bits(bits: u32) -> Self {
        Self {
            gate: bits & GATE_BIT != 0,
            cv: (bits & CV_MASK) as u16,
        }
    }
}
