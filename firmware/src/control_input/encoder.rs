use tact_control::quadrature::{DetentPhase, QuadratureDecoder, DETENT_THRESHOLD};

use crate::system::hal::gpio::{self, Edge, ExtiPin};
use crate::system::hal::pac::{EXTI, SYSCFG};

/// Rotary encoder sampled from interrupts on both of its lines.
///
/// Expects a full-step encoder, one quadrature cycle per detent, with its
/// common pin grounded. Both contacts are open at a detent, so the pulled-up
/// lines rest high. Half-step encoders would report every other detent.
pub struct Encoder {
    decoder: QuadratureDecoder,
    pins: Pins,
}

#[derive(Debug, defmt::Format)]
pub struct Pins {
    pub clk: ClkPin,
    pub data: DataPin,
}

pub type ClkPin = gpio::gpioc::PC3<gpio::Input>;
pub type DataPin = gpio::gpioc::PC8<gpio::Input>;

impl Encoder {
    pub fn new(pins: Pins) -> Self {
        Self {
            decoder: QuadratureDecoder::new(
                DETENT_THRESHOLD,
                DetentPhase::High,
                pins.clk.is_high(),
                pins.data.is_high(),
            ),
            pins,
        }
    }

    /// Route both lines to EXTI, triggering on every edge.
    pub fn listen(&mut self, syscfg: &mut SYSCFG, exti: &mut EXTI) {
        self.pins.clk.make_interrupt_source(syscfg);
        self.pins.clk.trigger_on_edge(exti, Edge::RisingFalling);
        self.pins.clk.enable_interrupt(exti);

        self.pins.data.make_interrupt_source(syscfg);
        self.pins.data.trigger_on_edge(exti, Edge::RisingFalling);
        self.pins.data.enable_interrupt(exti);
    }

    /// Handle an edge on the CLK line. Returns completed detents.
    pub fn clk_changed(&mut self) -> i8 {
        self.pins.clk.clear_interrupt_pending_bit();
        self.sample()
    }

    /// Handle an edge on the DATA line. Returns completed detents.
    pub fn data_changed(&mut self) -> i8 {
        self.pins.data.clear_interrupt_pending_bit();
        self.sample()
    }

    fn sample(&mut self) -> i8 {
        self.decoder
            .update(self.pins.clk.is_high(), self.pins.data.is_high())
    }
}
