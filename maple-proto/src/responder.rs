//! Peripheral-side responder: answers host requests within the bus
//! turnaround window.
//!
//! The real-time worker only decodes; packets surface to the cooperative
//! core, which runs this state machine. Responses are pre-built into a DMA
//! buffer and armed through a [`TxPort`], so transmission starts in
//! microseconds once the bus turns around. A pending response must drain
//! before the next request is served; the host reads anything else as a
//! disconnect.

use crate::packet::{address, function, Command, FrameError, MaplePacket, MAX_FRAME_LEN};

use adapter_core::{Axis, Buttons, ProfileOutput};

/// Fixed device-information block plus the free-form version text.
pub const DEVICE_INFO_WORDS: usize = 48;
const DEVICE_INFO_LEN: usize = DEVICE_INFO_WORDS * 4;

/// Capability bits advertised in the second device-info word.
pub mod caps {
    pub const C: u32 = 1 << 24;
    pub const B: u32 = 1 << 25;
    pub const A: u32 = 1 << 26;
    pub const START: u32 = 1 << 27;
    pub const DPAD_UP: u32 = 1 << 28;
    pub const DPAD_DOWN: u32 = 1 << 29;
    pub const DPAD_LEFT: u32 = 1 << 30;
    pub const DPAD_RIGHT: u32 = 1 << 31;
    pub const Z: u32 = 1 << 16;
    pub const Y: u32 = 1 << 17;
    pub const X: u32 = 1 << 18;
    pub const D: u32 = 1 << 19;
    pub const RTRIG: u32 = 1 << 8;
    pub const LTRIG: u32 = 1 << 9;
    pub const ANALOG_X: u32 = 1 << 10;
    pub const ANALOG_Y: u32 = 1 << 11;

    pub const STANDARD_CONTROLLER: u32 = A
        | B
        | X
        | Y
        | START
        | DPAD_UP
        | DPAD_DOWN
        | DPAD_LEFT
        | DPAD_RIGHT
        | LTRIG
        | RTRIG
        | ANALOG_X
        | ANALOG_Y;
}

/// Controller condition as it appears on the wire: buttons are active-low.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Condition {
    pub buttons: u16,
    pub rtrig: u8,
    pub ltrig: u8,
    pub joy_x: u8,
    pub joy_y: u8,
    pub joy_x2: u8,
    pub joy_y2: u8,
}

/// Active-low button bits of the condition word.
mod cond_bits {
    pub const C: u16 = 1 << 0;
    pub const B: u16 = 1 << 1;
    pub const A: u16 = 1 << 2;
    pub const START: u16 = 1 << 3;
    pub const UP: u16 = 1 << 4;
    pub const DOWN: u16 = 1 << 5;
    pub const LEFT: u16 = 1 << 6;
    pub const RIGHT: u16 = 1 << 7;
    pub const Z: u16 = 1 << 8;
    pub const Y: u16 = 1 << 9;
    pub const X: u16 = 1 << 10;
    pub const D: u16 = 1 << 11;
}

impl Condition {
    /// Everything released, sticks centred.
    pub const NEUTRAL: Self = Self {
        buttons: 0xFFFF,
        rtrig: 0,
        ltrig: 0,
        joy_x: 0x80,
        joy_y: 0x80,
        joy_x2: 0x80,
        joy_y2: 0x80,
    };

    /// Map a profiled output onto the vendor encoding.
    #[must_use]
    pub fn from_output(out: &ProfileOutput) -> Self {
        let mut buttons = 0xFFFFu16;
        let mut press = |pressed: bool, bit: u16| {
            if pressed {
                buttons &= !bit;
            }
        };
        press(out.buttons.contains(Buttons::B1), cond_bits::A);
        press(out.buttons.contains(Buttons::B2), cond_bits::B);
        press(out.buttons.contains(Buttons::B3), cond_bits::X);
        press(out.buttons.contains(Buttons::B4), cond_bits::Y);
        press(out.buttons.contains(Buttons::S2), cond_bits::START);
        press(out.buttons.contains(Buttons::DPAD_UP), cond_bits::UP);
        press(out.buttons.contains(Buttons::DPAD_DOWN), cond_bits::DOWN);
        press(out.buttons.contains(Buttons::DPAD_LEFT), cond_bits::LEFT);
        press(out.buttons.contains(Buttons::DPAD_RIGHT), cond_bits::RIGHT);
        press(out.buttons.contains(Buttons::R1), cond_bits::C);
        press(out.buttons.contains(Buttons::L1), cond_bits::Z);
        press(out.buttons.contains(Buttons::A2), cond_bits::D);

        Self {
            buttons,
            rtrig: out.analog[Axis::R2 as usize],
            ltrig: out.analog[Axis::L2 as usize],
            joy_x: out.analog[Axis::Lx as usize],
            joy_y: out.analog[Axis::Ly as usize],
            joy_x2: out.analog[Axis::Rx as usize],
            joy_y2: out.analog[Axis::Ry as usize],
        }
    }

    fn write(&self, pkt: &mut MaplePacket) -> Result<(), FrameError> {
        let b = self.buttons.to_le_bytes();
        pkt.push_word(u32::from_le_bytes([b[0], b[1], self.rtrig, self.ltrig]))?;
        pkt.push_word(u32::from_le_bytes([
            self.joy_x,
            self.joy_y,
            self.joy_x2,
            self.joy_y2,
        ]))
    }
}

/// DMA transmit port the shell provides.
pub trait TxPort {
    /// A previous transmission is still in flight.
    fn busy(&self) -> bool;
    /// Hand a complete frame to the DMA engine. Only called when idle.
    fn arm(&mut self, frame: &[u8]);
}

/// Responder phases; anything but `Idle` means a response is draining.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponderState {
    #[default]
    Idle,
    PendingInfo,
    PendingStatus,
    PendingAck,
}

/// The peripheral responder for one bus port.
pub struct MapleResponder {
    state: ResponderState,
    device_info: [u8; DEVICE_INFO_LEN],
    tx_buf: [u8; MAX_FRAME_LEN],
    rumble: Option<u8>,
    unknown: u32,
}

impl MapleResponder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ResponderState::Idle,
            device_info: build_device_info(),
            tx_buf: [0; MAX_FRAME_LEN],
            rumble: None,
            unknown: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ResponderState {
        self.state
    }

    /// Return to `Idle` once the armed transmission has drained.
    pub fn poll<T: TxPort>(&mut self, tx: &T) {
        if self.state != ResponderState::Idle && !tx.busy() {
            self.state = ResponderState::Idle;
        }
    }

    /// Latest vibration power reported by the host, for rumble feedback.
    pub fn take_rumble(&mut self) -> Option<u8> {
        self.rumble.take()
    }

    /// Requests ignored for an unknown command.
    #[must_use]
    pub const fn unknown_commands(&self) -> u32 {
        self.unknown
    }

    /// Serve one decoded request.
    ///
    /// Returns `false` when a previous response has not drained yet; the
    /// caller holds the packet and retries after [`Self::poll`]. Exactly
    /// one response leaves per accepted request.
    pub fn process<T: TxPort>(
        &mut self,
        pkt: &MaplePacket,
        condition: &Condition,
        tx: &mut T,
    ) -> bool {
        if self.state != ResponderState::Idle || tx.busy() {
            return false;
        }
        if address::peripheral(pkt.destination) & address::MAIN == 0 {
            // Addressed to a sub-peripheral we do not emulate.
            return true;
        }
        let port = address::port(pkt.destination);
        let origin = address::main_on_port(port);
        let dest = address::host_on_port(port);

        let (response, next) = match pkt.command {
            Command::DeviceRequest | Command::AllStatusRequest => {
                let mut resp = MaplePacket::new(Command::DeviceStatus, dest, origin);
                if resp.payload.extend_from_slice(&self.device_info).is_err() {
                    return true;
                }
                (Some(resp), ResponderState::PendingInfo)
            }
            Command::GetCondition if pkt.function() == Some(function::CONTROLLER) => {
                let mut resp = MaplePacket::new(Command::DataTransfer, dest, origin);
                if resp.push_word(function::CONTROLLER).is_err()
                    || condition.write(&mut resp).is_err()
                {
                    return true;
                }
                (Some(resp), ResponderState::PendingStatus)
            }
            Command::SetCondition if pkt.function() == Some(function::VIBRATION) => {
                // Power byte lives in the low byte of the setting word.
                if let Some(setting) = pkt.word(1) {
                    self.rumble = Some((setting & 0xFF) as u8);
                }
                let resp = MaplePacket::new(Command::Ack, dest, origin);
                (Some(resp), ResponderState::PendingAck)
            }
            Command::Reset => {
                let resp = MaplePacket::new(Command::Ack, dest, origin);
                (Some(resp), ResponderState::PendingAck)
            }
            _ => {
                self.unknown = self.unknown.wrapping_add(1);
                (None, ResponderState::Idle)
            }
        };

        if let Some(resp) = response {
            match resp.build(&mut self.tx_buf) {
                Ok(len) => {
                    tx.arm(&self.tx_buf[..len]);
                    self.state = next;
                }
                Err(_) => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("response build failed");
                }
            }
        }
        true
    }
}

impl Default for MapleResponder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_device_info() -> [u8; DEVICE_INFO_LEN] {
    let mut out = [0u8; DEVICE_INFO_LEN];
    out[0..4].copy_from_slice(&function::CONTROLLER.to_le_bytes());
    out[4..8].copy_from_slice(&caps::STANDARD_CONTROLLER.to_le_bytes());
    // function_data[1..3] stay zero.
    out[16] = 0xFF; // region: all
    out[17] = 0x00; // connector direction

    write_padded(&mut out[18..48], b"Dreamcast Controller");
    write_padded(
        &mut out[48..108],
        b"Produced By or Under License From SEGA ENTERPRISES,LTD.",
    );
    out[108..110].copy_from_slice(&0x01AEu16.to_le_bytes()); // standby power
    out[110..112].copy_from_slice(&0x01F4u16.to_le_bytes()); // max power
    write_padded(
        &mut out[112..192],
        b"Version 1.010,1998/09/28,315-6211-AB   ,Analog Module : The 4th Edition.5/8",
    );
    out
}

fn write_padded(dst: &mut [u8], text: &[u8]) {
    dst.fill(b' ');
    let n = text.len().min(dst.len());
    dst[..n].copy_from_slice(&text[..n]);
}
