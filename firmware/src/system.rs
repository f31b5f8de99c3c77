pub use stm32h7xx_hal as hal;

use hal::delay::DelayFromCountDownTimer;
use hal::pac::CorePeripherals;
use hal::pac::Peripherals as DevicePeripherals;
use hal::pac::TIM3;
use hal::prelude::*;
use hal::timer::{Event, Timer};
use systick_monotonic::Systick;
use tact_control::clock::BASE_RESOLUTION_US;

use crate::control_input::{
    ButtonsPins as ControlInputButtonsPins, Config as ControlInputConfig, ControlInputInterface,
    Encoder, EncoderPins,
};
use crate::control_output::{
    ClockOutputConfig, ClockOutputInterface, Config as ControlOutputConfig,
    ControlOutputInterface, Pins as ControlOutputPins,
};
use crate::storage::FlashStorage;

pub struct System {
    pub mono: Systick<1000>,
    pub tick_timer: Timer<TIM3>,
    pub clock_output_interface: ClockOutputInterface,
    pub control_input_interface: ControlInputInterface,
    pub control_output_interface: ControlOutputInterface,
    pub encoder: Encoder,
    pub storage: FlashStorage,
}

impl System {
    /// Initialize system abstraction.
    ///
    /// The tick timer and encoder interrupts are enabled on return, their
    /// handlers must be bound before this is called.
    ///
    /// # Panics
    ///
    /// The system can be initialized only once. It panics otherwise.
    pub fn init(mut cp: CorePeripherals, dp: DevicePeripherals) -> Self {
        enable_cache(&mut cp);

        let board = daisy::Board::take().unwrap();
        let ccdr = daisy::board_freeze_clocks!(board, dp);
        let pins = daisy::board_split_gpios!(board, ccdr, dp);

        let system_frequency = ccdr.clocks.sys_ck();
        let mono = Systick::new(cp.SYST, system_frequency.raw());
        let mut delay = DelayFromCountDownTimer::new(dp.TIM2.timer(
            100.Hz(),
            ccdr.peripheral.TIM2,
            &ccdr.clocks,
        ));

        let clock_output_interface = {
            let (dac1, _dac2) = dp
                .DAC
                .dac((pins.GPIO.PIN_C10, pins.GPIO.PIN_C1), ccdr.peripheral.DAC12);
            ClockOutputInterface::new(ClockOutputConfig {
                gate: pins.GPIO.PIN_B6.into_push_pull_output(),
                dac: dac1.calibrate_buffer(&mut delay).enable(),
            })
        };

        let control_input_interface = ControlInputInterface::new(ControlInputConfig {
            buttons_pins: ControlInputButtonsPins {
                play: pins.GPIO.PIN_D10.into_pull_up_input(),
                stop: pins.GPIO.PIN_D8.into_pull_up_input(),
                edit: pins.GPIO.PIN_D1.into_pull_up_input(),
                pattern: pins.GPIO.PIN_D6.into_pull_up_input(),
                save: pins.GPIO.PIN_D7.into_pull_up_input(),
                step: pins.GPIO.PIN_D2.into_pull_up_input(),
                encoder: pins.GPIO.PIN_D4.into_pull_up_input(),
            },
        });

        let control_output_interface = ControlOutputInterface::new(ControlOutputConfig {
            pins: ControlOutputPins {
                led: pins.GPIO.PIN_A9.into_push_pull_output(),
            },
        });

        let storage = FlashStorage::new(daisy::board_split_flash!(ccdr, dp, pins));

        let encoder = {
            let mut syscfg = dp.SYSCFG;
            let mut exti = dp.EXTI;
            let mut encoder = Encoder::new(EncoderPins {
                clk: pins.GPIO.PIN_D9.into_pull_up_input(),
                data: pins.GPIO.PIN_D5.into_pull_up_input(),
            });
            encoder.listen(&mut syscfg, &mut exti);
            encoder
        };

        let tick_timer = {
            let frequency = (1_000_000 / BASE_RESOLUTION_US).Hz();
            let mut timer = dp.TIM3.timer(frequency, ccdr.peripheral.TIM3, &ccdr.clocks);
            timer.listen(Event::TimeOut);
            timer
        };

        Self {
            mono,
            tick_timer,
            clock_output_interface,
            control_input_interface,
            control_output_interface,
            encoder,
            storage,
        }
    }
}

/// AN5212: Improve application performance when fetching instruction and
/// data, from both internal and external memories.
fn enable_cache(cp: &mut CorePeripherals) {
    cp.SCB.enable_icache();
    // NOTE: This requires cache management around all use of DMA.
    cp.SCB.enable_dcache(&mut cp.CPUID);
}
