use tact_control::debounce::{Debouncer, DEBOUNCE_WINDOW_MS};

use crate::system::hal::gpio;

#[derive(Debug, defmt::Format)]
pub struct Buttons {
    play: Button,
    stop: Button,
    edit: Button,
    pattern: Button,
    save: Button,
    step: Button,
    encoder: Button,
    pins: Pins,
}

/// Presses detected during one sampling, plus the held step button.
#[derive(Debug, Default, Clone, Copy, defmt::Format)]
pub struct Presses {
    pub play: bool,
    pub stop: bool,
    pub edit: bool,
    pub pattern: bool,
    pub save: bool,
    pub encoder: bool,
    pub step_held: bool,
}

#[derive(Debug, defmt::Format)]
struct Button {
    debouncer: Debouncer,
}

#[derive(Debug, defmt::Format)]
pub struct Pins {
    pub play: PlayPin,
    pub stop: StopPin,
    pub edit: EditPin,
    pub pattern: PatternPin,
    pub save: SavePin,
    pub step: StepPin,
    pub encoder: EncoderSwitchPin,
}

pub type PlayPin = gpio::gpiod::PD3<gpio::Input>;
pub type EditPin = gpio::gpiob::PB4<gpio::Input>;
pub type PatternPin = gpio::gpioc::PC12<gpio::Input>;
pub type SavePin = gpio::gpiod::PD2<gpio::Input>;
pub type StopPin = gpio::gpioc::PC2<gpio::Input>;
pub type StepPin = gpio::gpioc::PC11<gpio::Input>;
pub type EncoderSwitchPin = gpio::gpioc::PC9<gpio::Input>;

impl Buttons {
    /// Buttons are active low. The current pin levels are taken as the
    /// settled state, so a button held during boot is not a press.
    pub fn new(pins: Pins) -> Self {
        Self {
            play: Button::new(pins.play.is_high()),
            stop: Button::new(pins.stop.is_high()),
            edit: Button::new(pins.edit.is_high()),
            pattern: Button::new(pins.pattern.is_high()),
            save: Button::new(pins.save.is_high()),
            step: Button::new(pins.step.is_high()),
            encoder: Button::new(pins.encoder.is_high()),
            pins,
        }
    }

    pub fn sample(&mut self, now: u32) -> Presses {
        // The step button only matters as a modifier.
        self.step.poll(self.pins.step.is_high(), now);
        Presses {
            play: self.play.poll(self.pins.play.is_high(), now),
            stop: self.stop.poll(self.pins.stop.is_high(), now),
            edit: self.edit.poll(self.pins.edit.is_high(), now),
            pattern: self.pattern.poll(self.pins.pattern.is_high(), now),
            save: self.save.poll(self.pins.save.is_high(), now),
            encoder: self.encoder.poll(self.pins.encoder.is_high(), now),
            step_held: self.step.debouncer.is_pressed(),
        }
    }
}

impl Button {
    fn new(is_high: bool) -> Self {
        Self {
            debouncer: Debouncer::new(DEBOUNCE_WINDOW_MS, is_high),
        }
    }

    fn poll(&mut self, is_high: bool, now: u32) -> bool {
        self.debouncer.poll_press(is_high, now)
    }
}
