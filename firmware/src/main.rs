#![no_main]
#![no_std]

use tact_firmware as _; // Global logger and panicking behavior.

#[rtic::app(device = stm32h7xx_hal::pac, peripherals = true, dispatchers = [EXTI0, EXTI1, EXTI2])]
mod app {
    use fugit::ExtU64;
    use heapless::spsc::{Consumer, Producer, Queue};
    use stm32h7xx_hal::pac::TIM3;
    use stm32h7xx_hal::timer::Timer;
    use systick_monotonic::Systick;

    use tact_control::clock::BASE_RESOLUTION_US;
    use tact_control::{
        Channel, Controller, DisplayFrame, PatternBank, PendingDelta, TickGenerator,
    };
    use tact_firmware::control_input::{ControlInputInterface, Encoder};
    use tact_firmware::control_output::{
        ClockOutputInterface, ControlOutputInterface, ControlOutputState,
    };
    use tact_firmware::display::DefmtDisplay;
    use tact_firmware::queue_utils;
    use tact_firmware::storage::FlashStorage;
    use tact_firmware::system::System;

    const DISPLAY_QUEUE: usize = 4;

    // The only state crossing between the clock interrupt and the control
    // loop. Both are lock-free.
    static CHANNEL: Channel = Channel::new();
    static ENCODER_DELTA: PendingDelta = PendingDelta::new();

    // 1 kHz granularity for task scheduling.
    #[monotonic(binds = SysTick, default = true)]
    type Mono = Systick<1000>;

    #[shared]
    struct Shared {
        // Shared by the two encoder interrupts, both at the same priority.
        #[lock_free]
        encoder: Encoder,
    }

    #[local]
    struct Local {
        tick_timer: Timer<TIM3>,
        tick_generator: TickGenerator,
        clock_output_interface: ClockOutputInterface,
        controller: Controller,
        control_input_interface: ControlInputInterface,
        control_output_interface: ControlOutputInterface,
        storage: FlashStorage,
        display: DefmtDisplay,
        display_frame_producer: Producer<'static, DisplayFrame, DISPLAY_QUEUE>,
        display_frame_consumer: Consumer<'static, DisplayFrame, DISPLAY_QUEUE>,
    }

    #[init(
        local = [
            display_frame_queue: Queue<DisplayFrame, DISPLAY_QUEUE> = Queue::new(),
        ]
    )]
    fn init(mut cx: init::Context) -> (Shared, Local, init::Monotonics) {
        defmt::info!("Starting the firmware, initializing resources");

        if cfg!(feature = "idle-measuring") {
            cx.core.DCB.enable_trace();
            cx.core.DWT.enable_cycle_counter();
        }

        let (mut display_frame_producer, display_frame_consumer) =
            cx.local.display_frame_queue.split();

        let system = System::init(cx.core, cx.device);
        let mono = system.mono;
        let mut storage = system.storage;

        let bank = PatternBank::load(&mut storage);
        if !bank.is_persistent() {
            defmt::warn!("Running without pattern storage");
        }
        let mut controller = Controller::new(bank);
        let _ = display_frame_producer.enqueue(controller.start(&CHANNEL));

        defmt::info!("Spawning tasks");

        control_loop::spawn().unwrap();
        display_loop::spawn().unwrap();

        (
            Shared {
                encoder: system.encoder,
            },
            Local {
                tick_timer: system.tick_timer,
                tick_generator: TickGenerator::new(),
                clock_output_interface: system.clock_output_interface,
                controller,
                control_input_interface: system.control_input_interface,
                control_output_interface: system.control_output_interface,
                storage,
                display: DefmtDisplay,
                display_frame_producer,
                display_frame_consumer,
            },
            init::Monotonics(mono),
        )
    }

    #[task(
        binds = TIM3,
        local = [
            tick_timer,
            tick_generator,
            clock_output_interface,
        ],
        priority = 4,
    )]
    fn clock_tick(cx: clock_tick::Context) {
        cx.local.tick_timer.clear_irq();
        cx.local
            .tick_generator
            .process(BASE_RESOLUTION_US, &CHANNEL, cx.local.clock_output_interface);
    }

    #[task(binds = EXTI3, shared = [encoder], priority = 3)]
    fn encoder_clk(cx: encoder_clk::Context) {
        let steps = cx.shared.encoder.clk_changed();
        if steps != 0 {
            ENCODER_DELTA.add(steps);
        }
    }

    #[task(binds = EXTI9_5, shared = [encoder], priority = 3)]
    fn encoder_data(cx: encoder_data::Context) {
        let steps = cx.shared.encoder.data_changed();
        if steps != 0 {
            ENCODER_DELTA.add(steps);
        }
    }

    #[task(
        local = [
            controller,
            control_input_interface,
            control_output_interface,
            storage,
            display_frame_producer,
        ],
        priority = 2,
    )]
    fn control_loop(cx: control_loop::Context) {
        if control_loop::spawn_after(1.millis()).is_err() {
            defmt::warn!("Failed rescheduling the control loop");
        }

        let controller = cx.local.controller;
        let control_input_interface = cx.local.control_input_interface;
        let control_output_interface = cx.local.control_output_interface;
        let storage = cx.local.storage;
        let display_frame_producer = cx.local.display_frame_producer;

        let now = monotonics::now().ticks() as u32;

        let input = control_input_interface.sample(now, ENCODER_DELTA.take());
        let input_frame = controller.apply_input_snapshot(&input, &CHANNEL, storage);
        let tick_frame = controller.tick(&CHANNEL, now);

        control_output_interface.set_state(&ControlOutputState {
            led: controller.led(now),
        });

        if let Some(frame) = tick_frame.or(input_frame) {
            if display_frame_producer.enqueue(frame).is_ok() {
                // Already pending spawn renders the latest frame as well.
                let _ = display_loop::spawn();
            }
        }
    }

    #[task(local = [display, display_frame_consumer], priority = 1)]
    fn display_loop(cx: display_loop::Context) {
        let display = cx.local.display;
        let display_frame_consumer = cx.local.display_frame_consumer;

        queue_utils::warn_about_capacity("display_frame", display_frame_consumer);

        if let Some(frame) = queue_utils::dequeue_last(display_frame_consumer) {
            frame.render(display);
        }
    }

    #[idle(local = [idling: u32 = 0, start: u32 = 0])]
    fn idle(cx: idle::Context) -> ! {
        if cfg!(feature = "idle-measuring") {
            use core::sync::atomic::{self, Ordering};
            use stm32h7xx_hal::pac::DWT;

            const USECOND: u32 = 480;
            const TIME_LIMIT: u32 = USECOND * 10_000; // 0.01 second

            defmt::info!("Idle measuring is enabled");

            let idling: &'static mut u32 = cx.local.idling;
            let start: &'static mut u32 = cx.local.start;

            atomic::compiler_fence(Ordering::Acquire);
            *start = DWT::cycle_count();

            loop {
                cortex_m::interrupt::free(|_cs| {
                    cortex_m::asm::delay(USECOND);
                    *idling += USECOND;
                });

                if *idling >= TIME_LIMIT {
                    let now = DWT::cycle_count();
                    atomic::compiler_fence(Ordering::Release);

                    let elapsed = now.wrapping_sub(*start);

                    #[allow(clippy::cast_precision_loss)]
                    let idling_relative = *idling as f32 / elapsed as f32;
                    log_idle_time(idling_relative);

                    atomic::compiler_fence(Ordering::Acquire);
                    *start = DWT::cycle_count();
                    *idling = 0;
                }
            }
        } else {
            loop {
                cortex_m::asm::nop();
            }
        }
    }

    fn log_idle_time(idling_relative: f32) {
        const IDLE_LIMIT: f32 = 0.9;
        let idling_percent = idling_relative * 100.0;
        if idling_relative < IDLE_LIMIT {
            defmt::warn!("Idle time={}% is below the limit", idling_percent);
        } else {
            defmt::debug!("Idle time={}%", idling_percent);
        }
    }
}
