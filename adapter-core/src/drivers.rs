//! Input driver registry: polymorphic vendor decoders behind capability
//! records.
//!
//! A driver is a record of function fields. The registry walks the list at
//! mount time and the first `matches` claims the device. Decode turns a raw
//! vendor report into a normalised [`InputEvent`]; the registry handles
//! back-to-back duplicate filtering, activity bookkeeping and submit.

use crate::buttons::Buttons;
use crate::event::{Axis, EventKind, InputEvent, Transport, AXIS_CENTER};
use crate::feedback::{Feedback, FeedbackHub};
use crate::players::PlayerManager;
use crate::router::Router;

use heapless::Vec;

/// Largest raw report the registry retains for duplicate filtering.
pub const MAX_REPORT_LEN: usize = 64;

/// Samples collected before stick auto-calibration locks in.
pub const CALIBRATION_WINDOW: usize = 8;

/// Per-instance driver scratch. Drivers own no other long-lived state.
pub struct Scratch {
    /// Previous raw report, for identical-report dedup.
    pub last_raw: Vec<u8, MAX_REPORT_LEN>,
    /// Monotonic event sequence for this instance.
    pub seq: u32,
    /// Auto-calibration accumulator for LX/LY/RX/RY.
    pub calib_sum: [u32; 4],
    pub calib_samples: usize,
    /// Offsets applied after calibration (signed, around 0).
    pub calib_offset: [i16; 4],
    /// Feedback the shell should transmit on its next transfer.
    pub pending_feedback: Option<Feedback>,
}

impl Scratch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_raw: Vec::new(),
            seq: 0,
            calib_sum: [0; 4],
            calib_samples: 0,
            calib_offset: [0; 4],
            pending_feedback: None,
        }
    }

    /// Feed one raw stick sample set; locks offsets once the window fills.
    pub fn calibrate(&mut self, sticks: [u8; 4]) {
        if self.calib_samples >= CALIBRATION_WINDOW {
            return;
        }
        for (sum, v) in self.calib_sum.iter_mut().zip(sticks) {
            *sum += u32::from(v);
        }
        self.calib_samples += 1;
        if self.calib_samples == CALIBRATION_WINDOW {
            for (offset, sum) in self.calib_offset.iter_mut().zip(self.calib_sum) {
                let mean = (sum / CALIBRATION_WINDOW as u32) as i16;
                *offset = mean - i16::from(AXIS_CENTER);
            }
        }
    }

    /// Apply the locked (or nominal) centre correction to a stick value.
    #[must_use]
    pub fn corrected(&self, axis_index: usize, value: u8) -> u8 {
        let offset = self.calib_offset.get(axis_index).copied().unwrap_or(0);
        (i16::from(value) - offset).clamp(0, 255) as u8
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability record one vendor decoder registers.
#[derive(Clone, Copy)]
pub struct InputDriver {
    pub name: &'static str,
    /// Claim check against the mounted device's IDs.
    pub matches: fn(vid: u16, pid: u16) -> bool,
    /// Optional setup when the device is claimed.
    pub on_mount: Option<fn(&mut Scratch, dev_addr: u8, instance: u8)>,
    /// Turn a raw report into a normalised event. `None` drops the report.
    pub decode: fn(&mut Scratch, dev_addr: u8, instance: u8, raw: &[u8]) -> Option<InputEvent>,
    /// Optional per-tick hook; consumes pending feedback into scratch.
    pub tick: Option<fn(&mut Scratch, feedback: Feedback)>,
    /// Optional teardown when the device leaves.
    pub on_unmount: Option<fn(&mut Scratch, dev_addr: u8, instance: u8)>,
}

struct Mounted {
    dev_addr: u8,
    instance: u8,
    driver: usize,
    scratch: Scratch,
}

/// Maximum concurrently mounted device instances.
pub const MAX_MOUNTED: usize = 8;

/// Walks the driver list at mount time; first match claims the device.
pub struct InputRegistry {
    drivers: &'static [InputDriver],
    mounted: Vec<Mounted, MAX_MOUNTED>,
    dropped_reports: u32,
}

impl InputRegistry {
    #[must_use]
    pub fn new(drivers: &'static [InputDriver]) -> Self {
        Self {
            drivers,
            mounted: Vec::new(),
            dropped_reports: 0,
        }
    }

    /// A device appeared; returns the claiming driver's name.
    pub fn on_mount(
        &mut self,
        vid: u16,
        pid: u16,
        dev_addr: u8,
        instance: u8,
        players: &mut PlayerManager,
        now_ms: u64,
    ) -> Option<&'static str> {
        let driver = self.drivers.iter().position(|d| (d.matches)(vid, pid))?;
        if self.index_of(dev_addr, instance).is_some() {
            return Some(self.drivers[driver].name);
        }
        let mut scratch = Scratch::new();
        if let Some(hook) = self.drivers[driver].on_mount {
            hook(&mut scratch, dev_addr, instance);
        }
        self.mounted
            .push(Mounted {
                dev_addr,
                instance,
                driver,
                scratch,
            })
            .ok()?;
        players.on_mount(dev_addr, instance, now_ms);
        Some(self.drivers[driver].name)
    }

    /// A device left; releases scratch and the player slot.
    pub fn on_unmount(
        &mut self,
        dev_addr: u8,
        instance: u8,
        players: &mut PlayerManager,
        feedback: &mut FeedbackHub,
    ) {
        if let Some(i) = self.index_of(dev_addr, instance) {
            let mut entry = self.mounted.swap_remove(i);
            if let Some(hook) = self.drivers[entry.driver].on_unmount {
                hook(&mut entry.scratch, dev_addr, instance);
            }
        }
        players.on_unmount(dev_addr, instance);
        feedback.forget(dev_addr, instance);
    }

    /// Feed one raw report from the transport.
    ///
    /// Identical back-to-back reports are filtered before decode; decoded
    /// events are submitted to the router and counted as device activity.
    pub fn on_report(
        &mut self,
        dev_addr: u8,
        instance: u8,
        raw: &[u8],
        router: &mut Router<'_>,
        players: &mut PlayerManager,
        now_ms: u64,
    ) {
        let Some(i) = self.index_of(dev_addr, instance) else {
            return;
        };
        if raw.len() > MAX_REPORT_LEN {
            self.dropped_reports = self.dropped_reports.wrapping_add(1);
            return;
        }
        let entry = &mut self.mounted[i];
        if entry.scratch.last_raw.as_slice() == raw {
            return;
        }
        entry.scratch.last_raw.clear();
        let _ = entry.scratch.last_raw.extend_from_slice(raw);

        let decode = self.drivers[entry.driver].decode;
        match decode(&mut entry.scratch, dev_addr, instance, raw) {
            Some(mut event) => {
                entry.scratch.seq = entry.scratch.seq.wrapping_add(1);
                event.seq = entry.scratch.seq;
                players.on_activity(
                    dev_addr,
                    instance,
                    !event.buttons.is_empty(),
                    now_ms,
                );
                router.submit(&event, players);
            }
            None => {
                self.dropped_reports = self.dropped_reports.wrapping_add(1);
                #[cfg(feature = "defmt")]
                defmt::debug!(
                    "dropped malformed report from {=u8}:{=u8}",
                    dev_addr,
                    instance
                );
            }
        }
    }

    /// Cooperative tick: hand pending feedback to each driver's hook.
    pub fn tick(&mut self, feedback: &mut FeedbackHub) {
        for entry in self.mounted.iter_mut() {
            let Some(hook) = self.drivers[entry.driver].tick else {
                continue;
            };
            if let Some(fb) = feedback.take(entry.dev_addr, entry.instance) {
                hook(&mut entry.scratch, fb);
            }
        }
    }

    /// Reports dropped as malformed or oversized.
    #[must_use]
    pub const fn dropped_reports(&self) -> u32 {
        self.dropped_reports
    }

    /// Pending feedback the shell should flush for a device, if any.
    pub fn take_pending_feedback(&mut self, dev_addr: u8, instance: u8) -> Option<Feedback> {
        let i = self.index_of(dev_addr, instance)?;
        self.mounted[i].scratch.pending_feedback.take()
    }

    fn index_of(&self, dev_addr: u8, instance: u8) -> Option<usize> {
        self.mounted
            .iter()
            .position(|m| m.dev_addr == dev_addr && m.instance == instance)
    }
}

// --- Representative decoders -----------------------------------------------

/// Generic HID gamepad report layout (9 bytes):
/// buttons u16 LE, hat, lx, ly, rx, ry, l2, r2.
pub mod hid_gamepad {
    use super::*;

    const REPORT_LEN: usize = 9;

    /// Button order within the 16-bit field of the generic report.
    const BUTTON_ORDER: [Buttons; 16] = [
        Buttons::B1,
        Buttons::B2,
        Buttons::B3,
        Buttons::B4,
        Buttons::L1,
        Buttons::R1,
        Buttons::L2,
        Buttons::R2,
        Buttons::S1,
        Buttons::S2,
        Buttons::L3,
        Buttons::R3,
        Buttons::A1,
        Buttons::A2,
        Buttons::NONE,
        Buttons::NONE,
    ];

    fn matches(_vid: u16, _pid: u16) -> bool {
        // Fallback driver: claims anything the vendor-specific list passed on.
        true
    }

    fn decode(scratch: &mut Scratch, dev_addr: u8, instance: u8, raw: &[u8]) -> Option<InputEvent> {
        if raw.len() < REPORT_LEN {
            return None;
        }
        let mut event = InputEvent::neutral(dev_addr, instance, Transport::Usb);

        let field = u16::from_le_bytes([raw[0], raw[1]]);
        for (i, &bit) in BUTTON_ORDER.iter().enumerate() {
            if field & (1 << i) != 0 {
                event.buttons |= bit;
            }
        }
        event.buttons |= hat_to_dpad(raw[2]);

        scratch.calibrate([raw[3], raw[4], raw[5], raw[6]]);
        event.set_axis(Axis::Lx, scratch.corrected(0, raw[3]));
        event.set_axis(Axis::Ly, scratch.corrected(1, raw[4]));
        event.set_axis(Axis::Rx, scratch.corrected(2, raw[5]));
        event.set_axis(Axis::Ry, scratch.corrected(3, raw[6]));
        event.set_axis(Axis::L2, raw[7]);
        event.set_axis(Axis::R2, raw[8]);
        Some(event)
    }

    fn tick(scratch: &mut Scratch, feedback: Feedback) {
        scratch.pending_feedback = Some(feedback);
    }

    /// HID hat switch (0..7 clockwise from north, 8+ = released).
    #[must_use]
    pub fn hat_to_dpad(hat: u8) -> Buttons {
        match hat {
            0 => Buttons::DPAD_UP,
            1 => Buttons::DPAD_UP | Buttons::DPAD_RIGHT,
            2 => Buttons::DPAD_RIGHT,
            3 => Buttons::DPAD_DOWN | Buttons::DPAD_RIGHT,
            4 => Buttons::DPAD_DOWN,
            5 => Buttons::DPAD_DOWN | Buttons::DPAD_LEFT,
            6 => Buttons::DPAD_LEFT,
            7 => Buttons::DPAD_UP | Buttons::DPAD_LEFT,
            _ => Buttons::NONE,
        }
    }

    pub const DRIVER: InputDriver = InputDriver {
        name: "hid-gamepad",
        matches,
        on_mount: None,
        decode,
        tick: Some(tick),
        on_unmount: None,
    };
}

/// USB boot-protocol keyboard: modifier byte + reserved + 6 keycodes.
pub mod boot_keyboard {
    use super::*;

    fn matches(_vid: u16, _pid: u16) -> bool {
        true
    }

    fn decode(_scratch: &mut Scratch, dev_addr: u8, instance: u8, raw: &[u8]) -> Option<InputEvent> {
        if raw.len() < 8 {
            return None;
        }
        let mut event = InputEvent::neutral(dev_addr, instance, Transport::Usb);
        event.kind = EventKind::Keyboard;
        // Fold the six keycodes into the 32-bit bitmap, modifiers in the top byte.
        for &code in &raw[2..8] {
            if code != 0 {
                event.keys |= 1 << (code % 24);
            }
        }
        event.keys |= u32::from(raw[0]) << 24;
        Some(event)
    }

    pub const DRIVER: InputDriver = InputDriver {
        name: "boot-keyboard",
        matches,
        on_mount: None,
        decode,
        tick: None,
        on_unmount: None,
    };
}

/// USB boot-protocol mouse: buttons, dx, dy.
pub mod boot_mouse {
    use super::*;

    fn matches(_vid: u16, _pid: u16) -> bool {
        true
    }

    fn decode(_scratch: &mut Scratch, dev_addr: u8, instance: u8, raw: &[u8]) -> Option<InputEvent> {
        if raw.len() < 3 {
            return None;
        }
        let mut event = InputEvent::neutral(dev_addr, instance, Transport::Usb);
        event.kind = EventKind::Mouse;
        if raw[0] & 0x01 != 0 {
            event.buttons |= Buttons::B1;
        }
        if raw[0] & 0x02 != 0 {
            event.buttons |= Buttons::B2;
        }
        if raw[0] & 0x04 != 0 {
            event.buttons |= Buttons::B3;
        }
        // Deltas ride the left-stick axes, offset-binary around centre.
        let dx = raw[1] as i8;
        let dy = raw[2] as i8;
        event.set_axis(
            Axis::Lx,
            (i16::from(AXIS_CENTER) + i16::from(dx)).clamp(0, 255) as u8,
        );
        event.set_axis(
            Axis::Ly,
            (i16::from(AXIS_CENTER) + i16::from(dy)).clamp(0, 255) as u8,
        );
        Some(event)
    }

    pub const DRIVER: InputDriver = InputDriver {
        name: "boot-mouse",
        matches,
        on_mount: None,
        decode,
        tick: None,
        on_unmount: None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::PlayerPolicy;
    use crate::router::{OutputTarget, RouterConfig, SourceClass};

    static DRIVERS: [InputDriver; 1] = [hid_gamepad::DRIVER];

    fn harness() -> (InputRegistry, Router<'static>, PlayerManager, FeedbackHub) {
        let mut registry = InputRegistry::new(&DRIVERS);
        let mut router = Router::new(RouterConfig::default());
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let mut players = PlayerManager::new(PlayerPolicy::Fixed, 4, false);
        let name = registry.on_mount(0x045E, 0x02EA, 0x01, 0, &mut players, 0);
        assert_eq!(name, Some("hid-gamepad"));
        (registry, router, players, FeedbackHub::new())
    }

    fn report(buttons: u16, hat: u8) -> [u8; 9] {
        let b = buttons.to_le_bytes();
        [b[0], b[1], hat, 128, 128, 128, 128, 0, 0]
    }

    #[test]
    fn test_decode_submits_to_router() {
        let (mut registry, mut router, mut players, _) = harness();
        registry.on_report(0x01, 0, &report(0b1, 8), &mut router, &mut players, 0);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert!(out.buttons.contains(Buttons::B1));
        assert_eq!(out.seq, 1);
    }

    #[test]
    fn test_duplicate_reports_filtered() {
        let (mut registry, mut router, mut players, _) = harness();
        let raw = report(0b10, 8);
        registry.on_report(0x01, 0, &raw, &mut router, &mut players, 0);
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_some());
        assert!(!router.has_update(OutputTarget::UsbDevice, 0));

        registry.on_report(0x01, 0, &raw, &mut router, &mut players, 1);
        assert!(!router.has_update(OutputTarget::UsbDevice, 0));

        registry.on_report(0x01, 0, &report(0b100, 8), &mut router, &mut players, 2);
        assert!(router.has_update(OutputTarget::UsbDevice, 0));
    }

    #[test]
    fn test_short_report_dropped_silently() {
        let (mut registry, mut router, mut players, _) = harness();
        registry.on_report(0x01, 0, &[0x00, 0x01], &mut router, &mut players, 0);
        assert_eq!(registry.dropped_reports(), 1);
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_none());
    }

    #[test]
    fn test_unmount_releases_device() {
        let (mut registry, mut router, mut players, mut feedback) = harness();
        registry.on_unmount(0x01, 0, &mut players, &mut feedback);
        registry.on_report(0x01, 0, &report(1, 8), &mut router, &mut players, 0);
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_none());
    }

    #[test]
    fn test_hat_decode() {
        assert_eq!(hid_gamepad::hat_to_dpad(0), Buttons::DPAD_UP);
        assert_eq!(
            hid_gamepad::hat_to_dpad(3),
            Buttons::DPAD_DOWN | Buttons::DPAD_RIGHT
        );
        assert_eq!(hid_gamepad::hat_to_dpad(8), Buttons::NONE);
        assert_eq!(hid_gamepad::hat_to_dpad(15), Buttons::NONE);
    }

    #[test]
    fn test_calibration_corrects_drift() {
        let (mut registry, mut router, mut players, _) = harness();
        // Sticks rest slightly off-centre; vary another byte so dedup
        // doesn't swallow the samples.
        for i in 0..CALIBRATION_WINDOW as u8 {
            let mut raw = report(0, 8);
            raw[3] = 136; // LX resting at +8
            raw[7] = i; // L2 wiggles
            registry.on_report(0x01, 0, &raw, &mut router, &mut players, 0);
        }
        let mut raw = report(0, 8);
        raw[3] = 136;
        raw[7] = 200;
        registry.on_report(0x01, 0, &raw, &mut router, &mut players, 0);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert_eq!(out.axis(Axis::Lx), 128);
    }

    #[test]
    fn test_boot_keyboard_decodes_keys_bitmap() {
        let mut scratch = Scratch::new();
        // LeftShift modifier (0x02), keycodes 0x04 ('a') and 0x1D ('z').
        let raw = [0x02, 0x00, 0x04, 0x1D, 0x00, 0x00, 0x00, 0x00];
        let event = (boot_keyboard::DRIVER.decode)(&mut scratch, 0x02, 0, &raw).unwrap();
        assert_eq!(event.kind, crate::event::EventKind::Keyboard);
        assert_ne!(event.keys & (1 << (0x04 % 24)), 0);
        assert_ne!(event.keys & (1 << (0x1D % 24)), 0);
        assert_eq!(event.keys >> 24, 0x02);
        assert!((boot_keyboard::DRIVER.decode)(&mut scratch, 0x02, 0, &[0u8; 4]).is_none());
    }

    #[test]
    fn test_boot_mouse_decodes_deltas() {
        let mut scratch = Scratch::new();
        // Left button, dx=+16, dy=-8.
        let raw = [0x01, 16, (-8i8) as u8];
        let event = (boot_mouse::DRIVER.decode)(&mut scratch, 0x03, 0, &raw).unwrap();
        assert_eq!(event.kind, crate::event::EventKind::Mouse);
        assert!(event.buttons.contains(Buttons::B1));
        assert_eq!(event.axis(Axis::Lx), 128 + 16);
        assert_eq!(event.axis(Axis::Ly), 128 - 8);
    }

    #[test]
    fn test_feedback_tick_lands_in_scratch() {
        let (mut registry, _, _, mut feedback) = harness();
        feedback.write(
            0x01,
            0,
            Feedback {
                rumble_left: 99,
                ..Default::default()
            },
        );
        registry.tick(&mut feedback);
        let pending = registry.take_pending_feedback(0x01, 0).unwrap();
        assert_eq!(pending.rumble_left, 99);
    }
}
