//! Rotary encoder decoding.
//!
//! [`QuadratureDecoder`] runs in the encoder interrupt and turns raw CLK and
//! DATA levels into detent steps. Steps are handed over to the control loop
//! through [`PendingDelta`], which is drained in a single atomic exchange.

use core::sync::atomic::{AtomicI32, Ordering};

/// Minimum net transitions a detent needs before it counts.
pub const DETENT_THRESHOLD: i8 = 2;

/// Indexed by `(previous_phase << 2) | current_phase`, where a phase is
/// `(clk << 1) | data`. Invalid double transitions decode as zero.
const TRANSITIONS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

/// Phase a full-step encoder rests at between detents. One quadrature
/// cycle runs per detent, starting and ending at this phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DetentPhase {
    /// Both lines low, `00`.
    Low,
    /// Both lines high, `11`. Contacts open at rest with pull-ups.
    High,
}

impl DetentPhase {
    fn phase(self) -> u8 {
        match self {
            Self::Low => 0b00,
            Self::High => 0b11,
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QuadratureDecoder {
    threshold: i8,
    detent_phase: u8,
    previous_phase: u8,
    accumulator: i8,
}

impl QuadratureDecoder {
    /// Start from the levels the lines currently rest at.
    pub fn new(threshold: i8, detent: DetentPhase, clk: bool, data: bool) -> Self {
        Self {
            threshold: threshold.max(1),
            detent_phase: detent.phase(),
            previous_phase: phase(clk, data),
            accumulator: 0,
        }
    }

    /// Feed levels sampled at the same instant.
    ///
    /// Returns `1` for a completed clockwise detent (CLK leading DATA), `-1`
    /// for counter-clockwise and `0` otherwise. The travelled distance is
    /// accumulated through the whole cycle and judged once the lines return
    /// to the detent phase, so a rotation reversed midway cancels out and
    /// contact bounce never reaches the threshold.
    pub fn update(&mut self, clk: bool, data: bool) -> i8 {
        let current_phase = phase(clk, data);
        let index = ((self.previous_phase << 2) | current_phase) as usize;
        self.previous_phase = current_phase;

        self.accumulator = self.accumulator.saturating_add(TRANSITIONS[index]);

        if current_phase != self.detent_phase {
            return 0;
        }

        let accumulated = self.accumulator;
        self.accumulator = 0;
        if accumulated >= self.threshold {
            1
        } else if accumulated <= -self.threshold {
            -1
        } else {
            0
        }
    }
}

fn phase(clk: bool, data: bool) -> u8 {
    ((clk as u8) << 1) | data as u8
}

/// Decoded steps waiting for the control loop.
///
/// Written by the encoder interrupt, drained by the control loop.
#[derive(Debug)]
pub struct PendingDelta {
    delta: AtomicI32,
}

impl PendingDelta {
    pub const fn new() -> Self {
        Self {
            delta: AtomicI32::new(0),
        }
    }

    pub fn add(&self, steps: i8) {
        if steps != 0 {
            self.delta.fetch_add(steps as i32, Ordering::AcqRel);
        }
    }

    /// Take all accumulated steps, leaving zero behind.
    pub fn take(&self) -> i32 {
        self.delta.swap(0, Ordering::AcqRel)
    }
}

impl Default for PendingDelta {
    fn default() -> Self {
        Self::new()
    }
}
