use crate::system::hal::gpio;

use stm32h7xx_hal::dac::{Enabled, C1};
use stm32h7xx_hal::device::DAC;
use stm32h7xx_hal::traits::DacOut;
use tact_control::ClockOutput;

/// Gate and CV jacks, driven from the real-time clock interrupt only.
pub struct ClockOutputInterface {
    gate: Gate,
    dac: C1<DAC, Enabled>,
}

pub struct ClockOutputConfig {
    pub gate: Gate,
    pub dac: C1<DAC, Enabled>,
}

pub type Gate = gpio::gpioc::PC13<gpio::Output>;

impl ClockOutputInterface {
    pub fn new(config: ClockOutputConfig) -> Self {
        let mut interface = Self {
            gate: config.gate,
            dac: config.dac,
        };
        interface.set_gate(false);
        interface.set_cv(0);
        interface
    }
}

impl ClockOutput for ClockOutputInterface {
    fn set_gate(&mut self, high: bool) {
        self.gate.set_state(high.into());
    }

    fn set_cv(&mut self, code: u16) {
        self.dac.set_value(code);
    }
}

pub struct ControlOutputState {
    pub led: bool,
}

/// Outputs owned by the control loop.
pub struct ControlOutputInterface {
    pins: Pins,
}

pub struct Config {
    pub pins: Pins,
}

#[derive(Debug, defmt::Format)]
pub struct Pins {
    pub led: Led,
}

pub type Led = gpio::gpiob::PB15<gpio::Output>;

impl ControlOutputInterface {
    pub fn new(config: Config) -> Self {
        Self { pins: config.pins }
    }

    pub fn set_state(&mut self, state: &ControlOutputState) {
        self.pins.led.set_state(state.led.into());
    }
}
