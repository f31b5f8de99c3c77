mod buttons;
mod encoder;

pub use self::buttons::Pins as ButtonsPins;
pub use self::encoder::Encoder;
pub use self::encoder::Pins as EncoderPins;

use tact_control::ControlInputSnapshot;

use self::buttons::Buttons;

pub struct ControlInputInterface {
    buttons: Buttons,
}

pub struct Config {
    pub buttons_pins: ButtonsPins,
}

impl ControlInputInterface {
    pub fn new(config: Config) -> Self {
        Self {
            buttons: Buttons::new(config.buttons_pins),
        }
    }

    /// Debounce buttons at `now` milliseconds and combine them with detents
    /// collected by the encoder interrupts since the last call.
    pub fn sample(&mut self, now: u32, encoder_delta: i32) -> ControlInputSnapshot {
        let presses = self.buttons.sample(now);
        ControlInputSnapshot {
            play: presses.play,
            stop: presses.stop,
            edit: presses.edit,
            pattern: presses.pattern,
            save: presses.save,
            encoder_switch: presses.encoder,
            step_held: presses.step_held,
            encoder_delta,
        }
    }
}
