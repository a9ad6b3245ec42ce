//! NeoGeo direct-wired sink: one open-drain line per button.
//!
//! The console reads lines as active-low contacts. All lines must be parked
//! released (high) from the very first instant, or the console boots seeing
//! every button pressed; the sink therefore raises them in `init`, which
//! the runtime schedules before the bus side is enabled.

use adapter_core::{
    Buttons, Feedback, InputEvent, OutputSink, OutputTarget, ProfileOutput, SinkError,
};
use embassy_rp::gpio::Output;

/// Lines a NeoGeo port carries, in output order.
const LINE_MAP: [Buttons; 10] = [
    Buttons::DPAD_UP,
    Buttons::DPAD_DOWN,
    Buttons::DPAD_LEFT,
    Buttons::DPAD_RIGHT,
    Buttons::B1, // A
    Buttons::B2, // B
    Buttons::B3, // C
    Buttons::B4, // D
    Buttons::S2, // Start
    Buttons::S1, // Select
];

/// Direct GPIO sink for one NeoGeo controller port.
pub struct NeoGeoSink {
    lines: [Output<'static>; LINE_MAP.len()],
    initialised: bool,
}

impl NeoGeoSink {
    /// Take ownership of the port lines. Callers construct the `Output`s
    /// with `Level::High` so the lines read released even before `init`.
    #[must_use]
    pub fn new(lines: [Output<'static>; LINE_MAP.len()]) -> Self {
        Self {
            lines,
            initialised: false,
        }
    }
}

impl OutputSink for NeoGeoSink {
    fn target(&self) -> OutputTarget {
        OutputTarget::NeoGeo
    }

    fn init(&mut self) {
        for line in &mut self.lines {
            line.set_high();
        }
        self.initialised = true;
    }

    fn is_ready(&self) -> bool {
        self.initialised
    }

    fn send_report(
        &mut self,
        player: usize,
        _event: &InputEvent,
        out: &ProfileOutput,
    ) -> Result<Option<Feedback>, SinkError> {
        if player != 0 {
            return Ok(None);
        }
        for (line, &button) in self.lines.iter_mut().zip(&LINE_MAP) {
            if out.buttons.contains(button) {
                line.set_low();
            } else {
                line.set_high();
            }
        }
        Ok(None)
    }
}
