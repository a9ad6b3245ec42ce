#![no_std]
#![no_main]

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::flash::Flash;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::multicore::{spawn_core1, Stack};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_time::{Duration, Instant, Ticker};
use embassy_usb::class::hid::State;
use embassy_usb::{Builder, Config as UsbConfig};
use static_cell::StaticCell;

use adapter_core::{
    addr, apply, drivers::hid_gamepad, Feedback, InputDriver, OutputSink, OutputTarget,
    PipelineConfig, Pipeline, PlayerPolicy, Profile, ProfileSet, RouterConfig, RouterMode,
    SocdMemory, SourceClass,
};
use flash_journal::Journal;
use maple_proto::{Condition, MaplePacket, MapleResponder};
use retro_adapter_rp2040::{
    button, configure_usb_hid, usb_output, ButtonEvent, ButtonSignal, LatestEventTap, MaplePort,
    MapleTx, NeoGeoSink, RpFlash, UsbHidSink, WirelessPort, FLASH_SIZE,
};

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
});

/// Registered input decoders; first match claims the device.
static DRIVERS: [InputDriver; 1] = [hid_gamepad::DRIVER];

/// Built-in profiles for the USB target: identity plus a shoulders-swapped
/// alternative.
static USB_PROFILES: [Profile; 2] = [Profile::IDENTITY, {
    let mut p = Profile::IDENTITY;
    p.name = *b"swap-sb\0";
    p.button_map[0] = Some(adapter_core::MapEntry {
        input: adapter_core::Buttons::L1,
        target: adapter_core::MapTarget::To(adapter_core::Buttons::L2),
    });
    p.button_map[1] = Some(adapter_core::MapEntry {
        input: adapter_core::Buttons::L2,
        target: adapter_core::MapTarget::To(adapter_core::Buttons::L1),
    });
    p.button_map[2] = Some(adapter_core::MapEntry {
        input: adapter_core::Buttons::R1,
        target: adapter_core::MapTarget::To(adapter_core::Buttons::R2),
    });
    p.button_map[3] = Some(adapter_core::MapEntry {
        input: adapter_core::Buttons::R2,
        target: adapter_core::MapTarget::To(adapter_core::Buttons::R1),
    });
    p
}];

static DC_PROFILES: [Profile; 1] = [Profile::IDENTITY];

/// USB device configuration buffers.
static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static MSOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
static HID_STATE: StaticCell<State> = StaticCell::new();

static REPORT_SIGNAL: StaticCell<usb_output::ReportSignal> = StaticCell::new();
static BUTTON_SIGNAL: StaticCell<ButtonSignal> = StaticCell::new();
static DC_TAP: StaticCell<LatestEventTap> = StaticCell::new();
static DATAGRAMS: StaticCell<retro_adapter_rp2040::DatagramChannel> = StaticCell::new();
static COMMANDS: StaticCell<retro_adapter_rp2040::CommandChannel> = StaticCell::new();

static mut CORE1_STACK: Stack<8192> = Stack::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("controller adapter starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    // --- Maple real-time worker on core 1 ---
    let (maple_producer, maple_consumer) = retro_adapter_rp2040::maple_port::split_ring();
    let mut maple_port = MaplePort::new(p.PIO1, p.PIN_14, p.PIN_15);
    spawn_core1(
        p.CORE1,
        unsafe { &mut *core::ptr::addr_of_mut!(CORE1_STACK) },
        move || maple_port.run_decode_worker(maple_producer),
    );

    // --- USB device ---
    let usb_driver = Driver::new(p.USB, Irqs);

    let mut usb_config = UsbConfig::new(0x1209, 0x2F00); // pid.codes open-source VID
    usb_config.manufacturer = Some("Retro Adapter");
    usb_config.product = Some("Multi-Protocol Controller Adapter");
    usb_config.serial_number = Some("0001");
    usb_config.max_power = 100;
    usb_config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        usb_driver,
        usb_config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        MSOS_DESCRIPTOR.init([0; 256]),
        CONTROL_BUF.init([0; 64]),
    );
    let hid_writer = configure_usb_hid(&mut builder, HID_STATE.init(State::new()));
    let usb_device = builder.build();

    let report_signal = REPORT_SIGNAL.init(usb_output::ReportSignal::new());

    // --- Pipeline ---
    let config = PipelineConfig {
        router: RouterConfig {
            mode: RouterMode::Simple,
            ..Default::default()
        },
        policy: PlayerPolicy::Fixed,
        max_players: 4,
        assign_on_press: false,
    };
    let mut pipeline = Pipeline::new(config, &DRIVERS);
    pipeline
        .router
        .add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
    pipeline
        .router
        .add_route(SourceClass::Bt, OutputTarget::UsbDevice, 0);
    pipeline
        .router
        .add_route(SourceClass::Wireless, OutputTarget::UsbDevice, 0);
    pipeline
        .router
        .add_route(SourceClass::Usb, OutputTarget::Dreamcast, 0);
    pipeline
        .router
        .add_route(SourceClass::Wireless, OutputTarget::Dreamcast, 0);
    pipeline
        .router
        .add_route(SourceClass::Usb, OutputTarget::NeoGeo, 0);

    pipeline.profiles.init(
        OutputTarget::UsbDevice,
        ProfileSet {
            profiles: &USB_PROFILES,
            default_index: 0,
            switch_combo: ProfileSet::DEFAULT_SWITCH_COMBO,
        },
    );
    pipeline.profiles.init(
        OutputTarget::Dreamcast,
        ProfileSet {
            profiles: &DC_PROFILES,
            default_index: 0,
            switch_combo: ProfileSet::DEFAULT_SWITCH_COMBO,
        },
    );

    // The Dreamcast responder reads its state through an exclusive tap so a
    // request between cooperative ticks still sees the newest input.
    let dc_tap = DC_TAP.init(LatestEventTap::new());
    pipeline
        .router
        .set_tap_exclusive(OutputTarget::Dreamcast, dc_tap);

    // --- Settings ---
    let flash = Flash::<_, _, FLASH_SIZE>::new_blocking(p.FLASH);
    let mut journal = Journal::new(RpFlash::new(flash));
    match journal.load() {
        Ok(outcome) => info!("settings: {:?}", outcome),
        Err(e) => defmt::warn!("settings load failed: {:?}", e),
    }
    pipeline
        .profiles
        .set_custom(journal.get().custom_profiles());
    pipeline.profiles.set_active(
        OutputTarget::UsbDevice,
        usize::from(journal.get().active_profile),
    );

    // --- Sinks ---
    // NeoGeo lines park released before the console side is enabled.
    let mut neogeo = NeoGeoSink::new([
        Output::new(p.PIN_2, Level::High),
        Output::new(p.PIN_3, Level::High),
        Output::new(p.PIN_4, Level::High),
        Output::new(p.PIN_5, Level::High),
        Output::new(p.PIN_6, Level::High),
        Output::new(p.PIN_7, Level::High),
        Output::new(p.PIN_8, Level::High),
        Output::new(p.PIN_9, Level::High),
        Output::new(p.PIN_10, Level::High),
        Output::new(p.PIN_11, Level::High),
    ]);
    neogeo.init();
    let usb_sink = UsbHidSink::new(report_signal);

    // --- Board button ---
    let button_signal = BUTTON_SIGNAL.init(ButtonSignal::new());
    let button_pin = Input::new(p.PIN_24, Pull::Up);

    // --- Wireless intake (socket plumbing lives elsewhere) ---
    let datagrams = DATAGRAMS.init(retro_adapter_rp2040::DatagramChannel::new());
    let commands = COMMANDS.init(retro_adapter_rp2040::CommandChannel::new());

    spawner.spawn(usb_task(usb_device)).unwrap();
    spawner.spawn(writer_task(hid_writer, report_signal)).unwrap();
    spawner.spawn(button_task(button_pin, button_signal)).unwrap();
    spawner
        .spawn(core_task(
            pipeline,
            usb_sink,
            neogeo,
            journal,
            maple_consumer,
            dc_tap,
            button_signal,
            datagrams,
            commands,
        ))
        .unwrap();

    info!("controller adapter initialised");
}

/// USB device task - runs the USB stack.
#[embassy_executor::task]
async fn usb_task(mut device: embassy_usb::UsbDevice<'static, Driver<'static, USB>>) {
    device.run().await;
}

/// HID writer task - latest report wins.
#[embassy_executor::task]
async fn writer_task(
    writer: embassy_usb::class::hid::HidWriter<
        'static,
        Driver<'static, USB>,
        { retro_adapter_rp2040::GamepadReport::SIZE },
    >,
    signal: &'static usb_output::ReportSignal,
) {
    usb_output::run_writer(writer, signal).await
}

/// Button gesture task.
#[embassy_executor::task]
async fn button_task(pin: Input<'static>, events: &'static ButtonSignal) {
    button::run(pin, events).await
}

/// The cooperative core: everything except USB transfers and gestures.
#[embassy_executor::task]
#[allow(clippy::too_many_arguments)]
async fn core_task(
    mut pipeline: Pipeline<'static>,
    mut usb_sink: UsbHidSink,
    mut neogeo: NeoGeoSink,
    mut journal: Journal<RpFlash, fn() -> bool>,
    mut maple_rx: heapless::spsc::Consumer<'static, MaplePacket, { retro_adapter_rp2040::RING_DEPTH }>,
    dc_tap: &'static LatestEventTap,
    button_events: &'static ButtonSignal,
    datagrams: &'static retro_adapter_rp2040::DatagramChannel,
    commands: &'static retro_adapter_rp2040::CommandChannel,
) {
    let mut wireless = WirelessPort::new();
    let mut responder = MapleResponder::new();
    let mut maple_tx = MapleTx::new();
    let mut dc_socd = SocdMemory::default();
    let mut held: Option<MaplePacket> = None;

    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        ticker.next().await;
        let now = Instant::now();
        let now_ms = now.as_millis();

        // Wireless datagrams into the router.
        while let Ok(datagram) = datagrams.try_receive() {
            wireless.on_datagram(&datagram, &mut pipeline, now_ms);
        }

        // Cooperative pipeline tick: pull, profile, emit.
        {
            let mut sinks: [&mut dyn OutputSink; 2] = [&mut usb_sink, &mut neogeo];
            pipeline.tick(now_ms, &mut sinks);
        }

        // Maple service: drain the ring, one response per request, in
        // order, waiting out any in-flight DMA.
        responder.poll(&maple_tx);
        if held.is_none() {
            held = maple_rx.dequeue();
        }
        if let Some(packet) = held.take() {
            let condition = match dc_tap.take_latest() {
                Some(event) => {
                    let profile = *pipeline.profiles.get_active(OutputTarget::Dreamcast);
                    let out = apply(&profile, event.buttons, &event.analog, &mut dc_socd);
                    Condition::from_output(&out)
                }
                None => Condition::NEUTRAL,
            };
            if !responder.process(&packet, &condition, &mut maple_tx) {
                held = Some(packet);
            }
        }
        if let Some(power) = responder.take_rumble() {
            pipeline.feedback.publish(
                OutputTarget::Dreamcast,
                0,
                &pipeline.players,
                Feedback {
                    rumble_left: power,
                    rumble_right: power,
                    ..Default::default()
                },
            );
        }

        // Wireless feedback out, rate-gated per controller.
        for slot in 0..4u8 {
            let dev = addr::wireless(slot);
            if let Some(feedback) = pipeline.feedback.take(dev, 0) {
                wireless.flush_feedback(
                    slot,
                    &feedback,
                    commands,
                    now_ms,
                    now.as_micros() as u32,
                );
            }
        }

        // Board button gestures.
        if let Some(event) = button_events.try_take() {
            match event {
                ButtonEvent::Click => {
                    pipeline.profiles.cycle_next(OutputTarget::UsbDevice);
                    let active = pipeline.profiles.active_index(OutputTarget::UsbDevice) as u8;
                    journal.save(now_ms, |r| r.active_profile = active);
                }
                ButtonEvent::DoubleClick => {
                    journal.save(now_ms, |r| r.output_mode = r.output_mode.wrapping_add(1));
                }
                ButtonEvent::TripleClick => {
                    journal.save(now_ms, |r| {
                        r.output_mode = 0;
                        r.active_profile = 0;
                    });
                    pipeline.profiles.set_active(OutputTarget::UsbDevice, 0);
                }
                ButtonEvent::Hold => {
                    info!("pairing window opened");
                }
            }
        }

        // Debounced settings flush.
        journal.tick(now_ms);
    }
}
