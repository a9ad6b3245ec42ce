//! USB HID gamepad sink.
//!
//! The cooperative pipeline hands profiled reports to [`UsbHidSink`], which
//! signals the latest report to the async writer task ("latest value wins",
//! so a slow host never backs the pipeline up). Rumble arrives as HID
//! output reports through the request handler and flows back to the source
//! controller as feedback.

use adapter_core::{
    Axis, Feedback, InputEvent, OutputSink, OutputTarget, ProfileOutput, SinkError,
};
use defmt::Format;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_usb::class::hid::{HidWriter, ReportId, RequestHandler, State};
use embassy_usb::control::OutResponse;
use embassy_usb::Builder;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// USB HID gamepad report.
///
/// Matches the report descriptor below: 18 buttons (+6 pad bits), five
/// unsigned 8-bit axes, two triggers. Total size: 10 bytes.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Format)]
#[repr(C)]
pub struct GamepadReport {
    /// Button bitfield, low 18 bits used.
    pub buttons: u32,
    pub lx: u8,
    pub ly: u8,
    pub rx: u8,
    pub ry: u8,
    pub rz: u8,
    pub l2: u8,
    pub r2: u8,
}

impl GamepadReport {
    /// Size of the report on the wire in bytes.
    pub const SIZE: usize = 10;

    /// Convert the report to wire bytes.
    #[must_use]
    pub fn as_bytes(&self) -> [u8; Self::SIZE] {
        let b = self.buttons.to_le_bytes();
        [
            b[0], b[1], b[2], self.lx, self.ly, self.rx, self.ry, self.rz, self.l2, self.r2,
        ]
    }

    /// Neutral/zero report.
    #[must_use]
    pub const fn neutral() -> Self {
        Self {
            buttons: 0,
            lx: 128,
            ly: 128,
            rx: 128,
            ry: 128,
            rz: 128,
            l2: 0,
            r2: 0,
        }
    }
}

impl From<&ProfileOutput> for GamepadReport {
    fn from(out: &ProfileOutput) -> Self {
        Self {
            buttons: out.buttons.raw() & 0x0003_FFFF,
            lx: out.analog[Axis::Lx as usize],
            ly: out.analog[Axis::Ly as usize],
            rx: out.analog[Axis::Rx as usize],
            ry: out.analog[Axis::Ry as usize],
            rz: out.analog[Axis::Rz as usize],
            l2: out.analog[Axis::L2 as usize],
            r2: out.analog[Axis::R2 as usize],
        }
    }
}

/// Standard HID gamepad report descriptor: 18 buttons, X/Y/Z/Rz sticks,
/// Rx/Ry triggers.
#[cfg(feature = "standard-hid")]
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Gamepad)
    0xA1, 0x01, // Collection (Application)
    //
    // --- Buttons (18 buttons + 6 bits padding) ---
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (Button 1)
    0x29, 0x12, //   Usage Maximum (Button 18)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x95, 0x12, //   Report Count (18)
    0x75, 0x01, //   Report Size (1)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x06, //   Report Count (6)
    0x81, 0x03, //   Input (Constant) - padding to a byte boundary
    //
    // --- Sticks + twist ---
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x32, //   Usage (Z)
    0x09, 0x35, //   Usage (Rz)
    0x09, 0x36, //   Usage (Slider) - twist axis
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    // --- Triggers ---
    0x09, 0x33, //   Usage (Rx) - Left trigger
    0x09, 0x34, //   Usage (Ry) - Right trigger
    0x95, 0x02, //   Report Count (2)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    0xC0, // End Collection
];

/// Xbox-style descriptor for better Windows game support: same fields,
/// nested physical collection.
#[cfg(feature = "xinput-compat")]
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Gamepad)
    0xA1, 0x01, // Collection (Application)
    0xA1, 0x00, //   Collection (Physical)
    //
    0x05, 0x09, //     Usage Page (Button)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x12, //     Usage Maximum (Button 18)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x12, //     Report Count (18)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x06, //     Report Count (6)
    0x81, 0x03, //     Input (Constant)
    //
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x32, //     Usage (Z)
    0x09, 0x35, //     Usage (Rz)
    0x09, 0x36, //     Usage (Slider)
    0x15, 0x00, //     Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x95, 0x05, //     Report Count (5)
    0x75, 0x08, //     Report Size (8)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    //
    0x09, 0x33, //     Usage (Rx)
    0x09, 0x34, //     Usage (Ry)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    //
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Latest-report hand-off between the cooperative tick and the USB writer.
pub type ReportSignal = Signal<CriticalSectionRawMutex, GamepadReport>;

/// Rumble state written by the HID request handler, read by the sink.
/// Low byte: left motor, next byte: right motor, bit 31: fresh flag.
static RUMBLE: AtomicU32 = AtomicU32::new(0);

/// Set once USB enumeration completes.
static USB_READY: AtomicBool = AtomicBool::new(false);

/// The cooperative half of the USB gamepad output.
pub struct UsbHidSink {
    signal: &'static ReportSignal,
    last: Option<GamepadReport>,
}

impl UsbHidSink {
    #[must_use]
    pub fn new(signal: &'static ReportSignal) -> Self {
        Self { signal, last: None }
    }
}

impl OutputSink for UsbHidSink {
    fn target(&self) -> OutputTarget {
        OutputTarget::UsbDevice
    }

    fn is_ready(&self) -> bool {
        USB_READY.load(Ordering::Acquire)
    }

    fn send_report(
        &mut self,
        _player: usize,
        _event: &InputEvent,
        out: &ProfileOutput,
    ) -> Result<Option<Feedback>, SinkError> {
        let report = GamepadReport::from(out);
        if self.last != Some(report) {
            self.last = Some(report);
            self.signal.signal(report);
        }

        let rumble = RUMBLE.load(Ordering::Acquire);
        if rumble & FRESH != 0 {
            RUMBLE.store(rumble & !FRESH, Ordering::Release);
            return Ok(Some(Feedback {
                rumble_left: (rumble & 0xFF) as u8,
                rumble_right: ((rumble >> 8) & 0xFF) as u8,
                ..Default::default()
            }));
        }
        Ok(None)
    }
}

const FRESH: u32 = 1 << 31;

/// HID request handler: accepts rumble output reports from the host.
pub struct GamepadRequestHandler;

impl RequestHandler for GamepadRequestHandler {
    fn get_report(&mut self, _id: ReportId, _buf: &mut [u8]) -> Option<usize> {
        None
    }

    fn set_report(&mut self, _id: ReportId, data: &[u8]) -> OutResponse {
        if data.len() >= 2 {
            let value = u32::from(data[0]) | u32::from(data[1]) << 8 | FRESH;
            RUMBLE.store(value, Ordering::Release);
        }
        OutResponse::Accepted
    }

    fn set_idle_ms(&mut self, _id: Option<ReportId>, _duration_ms: u32) {}

    fn get_idle_ms(&mut self, _id: Option<ReportId>) -> Option<u32> {
        None
    }
}

/// Configure the USB HID class in the USB builder.
///
/// Returns the HID writer for the writer task.
pub fn configure_usb_hid<'d>(
    builder: &mut Builder<'d, embassy_rp::usb::Driver<'d, embassy_rp::peripherals::USB>>,
    state: &'d mut State<'d>,
) -> HidWriter<'d, embassy_rp::usb::Driver<'d, embassy_rp::peripherals::USB>, { GamepadReport::SIZE }>
{
    let config = embassy_usb::class::hid::Config {
        report_descriptor: REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: 1,
        max_packet_size: GamepadReport::SIZE as u16,
        hid_subclass: embassy_usb::class::hid::HidSubclass::No,
        hid_boot_protocol: embassy_usb::class::hid::HidBootProtocol::None,
    };

    embassy_usb::class::hid::HidWriter::new(builder, state, config)
}

/// USB writer task half: waits for report signals and pushes them out.
pub async fn run_writer(
    mut writer: HidWriter<
        'static,
        embassy_rp::usb::Driver<'static, embassy_rp::peripherals::USB>,
        { GamepadReport::SIZE },
    >,
    signal: &'static ReportSignal,
) -> ! {
    writer.ready().await;
    USB_READY.store(true, Ordering::Release);
    defmt::info!("USB HID ready");

    loop {
        let report = signal.wait().await;
        if let Err(e) = writer.write(&report.as_bytes()).await {
            defmt::error!("HID write failed: {:?}", e);
        }
    }
}
