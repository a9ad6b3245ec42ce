//! The 64-byte INPUT payload and its mapping onto the adapter event model.

use adapter_core::{addr, Axis, Buttons, InputEvent, Transport};

/// INPUT payload length on the wire.
pub const INPUT_LEN: usize = 64;

/// Touch point: 1-byte state + x/y as u16 plus a pressure byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchPoint {
    pub active: bool,
    pub x: u16,
    pub y: u16,
    pub pressure: u8,
}

impl TouchPoint {
    fn parse(data: &[u8; 6]) -> Self {
        Self {
            active: data[0] != 0,
            x: u16::from_le_bytes([data[1], data[2]]),
            y: u16::from_le_bytes([data[3], data[4]]),
            pressure: data[5],
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = u8::from(self.active);
        out[1..3].copy_from_slice(&self.x.to_le_bytes());
        out[3..5].copy_from_slice(&self.y.to_le_bytes());
        out[5] = self.pressure;
    }
}

/// Parsed controller state report.
///
/// Buttons use the adapter's logical bit layout directly; this protocol is
/// native to the firmware. Stick axes are signed 16-bit with positive Y
/// pointing down, triggers unsigned 16-bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InputPayload {
    pub buttons: u32,
    pub lx: i16,
    pub ly: i16,
    pub rx: i16,
    pub ry: i16,
    pub lt: u16,
    pub rt: u16,
    pub imu: [i16; 6],
    pub imu_timestamp_us: u32,
    pub touch: [TouchPoint; 2],
    pub battery: u8,
    pub status: u8,
    pub controller_id: u8,
}

/// Payload parse failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InputTruncated;

impl InputPayload {
    /// Parse the 64-byte INPUT payload.
    pub fn parse(data: &[u8]) -> Result<Self, InputTruncated> {
        if data.len() < INPUT_LEN {
            return Err(InputTruncated);
        }
        let i16_at = |off: usize| i16::from_le_bytes([data[off], data[off + 1]]);
        let mut imu = [0i16; 6];
        for (i, v) in imu.iter_mut().enumerate() {
            *v = i16_at(16 + i * 2);
        }
        Ok(Self {
            buttons: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            lx: i16_at(4),
            ly: i16_at(6),
            rx: i16_at(8),
            ry: i16_at(10),
            lt: u16::from_le_bytes([data[12], data[13]]),
            rt: u16::from_le_bytes([data[14], data[15]]),
            imu,
            imu_timestamp_us: u32::from_le_bytes([data[28], data[29], data[30], data[31]]),
            touch: [
                TouchPoint::parse(data[32..38].try_into().unwrap()),
                TouchPoint::parse(data[38..44].try_into().unwrap()),
            ],
            battery: data[44],
            status: data[45],
            controller_id: data[46],
            // 17 reserved bytes follow.
        })
    }

    /// Serialise to the 64-byte wire layout.
    #[must_use]
    pub fn write(&self) -> [u8; INPUT_LEN] {
        let mut out = [0u8; INPUT_LEN];
        out[0..4].copy_from_slice(&self.buttons.to_le_bytes());
        out[4..6].copy_from_slice(&self.lx.to_le_bytes());
        out[6..8].copy_from_slice(&self.ly.to_le_bytes());
        out[8..10].copy_from_slice(&self.rx.to_le_bytes());
        out[10..12].copy_from_slice(&self.ry.to_le_bytes());
        out[12..14].copy_from_slice(&self.lt.to_le_bytes());
        out[14..16].copy_from_slice(&self.rt.to_le_bytes());
        for (i, v) in self.imu.iter().enumerate() {
            out[16 + i * 2..18 + i * 2].copy_from_slice(&v.to_le_bytes());
        }
        out[28..32].copy_from_slice(&self.imu_timestamp_us.to_le_bytes());
        self.touch[0].write(&mut out[32..38]);
        self.touch[1].write(&mut out[38..44]);
        out[44] = self.battery;
        out[45] = self.status;
        out[46] = self.controller_id;
        out
    }

    /// Map onto the adapter's abstract event.
    ///
    /// The device address is the wireless slot base plus the controller id;
    /// IMU and touch data stay protocol-local (no event fields exist for
    /// them).
    #[must_use]
    pub fn to_event(&self, seq: u32) -> InputEvent {
        let mut event = InputEvent::neutral(
            addr::wireless(self.controller_id),
            0,
            Transport::Wifi,
        );
        event.buttons = Buttons(self.buttons);
        event.set_axis(Axis::Lx, stick_to_axis(self.lx));
        event.set_axis(Axis::Ly, stick_to_axis(self.ly));
        event.set_axis(Axis::Rx, stick_to_axis(self.rx));
        event.set_axis(Axis::Ry, stick_to_axis(self.ry));
        event.set_axis(Axis::L2, (self.lt >> 8) as u8);
        event.set_axis(Axis::R2, (self.rt >> 8) as u8);
        event.seq = seq;
        event
    }
}

/// Scale a signed 16-bit stick value to the unsigned 8-bit convention.
#[inline]
#[must_use]
pub fn stick_to_axis(value: i16) -> u8 {
    ((value >> 8) + 128) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let payload = InputPayload {
            buttons: Buttons::B1.raw() | Buttons::DPAD_UP.raw(),
            lx: -12_000,
            ly: 32_000,
            rx: 500,
            ry: -500,
            lt: 0xFFFF,
            rt: 0x8000,
            imu: [1, -2, 3, -4, 5, -6],
            imu_timestamp_us: 0xDEAD_BEEF,
            touch: [
                TouchPoint {
                    active: true,
                    x: 1000,
                    y: 700,
                    pressure: 30,
                },
                TouchPoint::default(),
            ],
            battery: 87,
            status: 0x01,
            controller_id: 2,
        };
        let wire = payload.write();
        assert_eq!(wire.len(), INPUT_LEN);
        assert_eq!(InputPayload::parse(&wire), Ok(payload));
    }

    #[test]
    fn test_parse_rejects_short_payload() {
        assert_eq!(InputPayload::parse(&[0u8; 32]), Err(InputTruncated));
    }

    #[test]
    fn test_stick_scaling() {
        assert_eq!(stick_to_axis(0), 128);
        assert_eq!(stick_to_axis(i16::MAX), 255);
        assert_eq!(stick_to_axis(i16::MIN), 0);
    }

    #[test]
    fn test_event_mapping() {
        let payload = InputPayload {
            buttons: Buttons::B2.raw(),
            lx: i16::MAX,
            lt: 0xFF00,
            controller_id: 1,
            ..Default::default()
        };
        let event = payload.to_event(7);
        assert_eq!(event.dev_addr, 0xE1);
        assert_eq!(event.transport, Transport::Wifi);
        assert!(event.buttons.contains(Buttons::B2));
        assert_eq!(event.axis(Axis::Lx), 255);
        assert_eq!(event.axis(Axis::L2), 0xFF);
        assert_eq!(event.seq, 7);
    }
}
