//! Maple Bus packet model.
//!
//! A frame is a big-endian header `(command, destination, origin, num_words)`
//! followed by `num_words * 4` payload bytes and one XOR CRC byte. The port
//! number rides in the top two bits of the address bytes; the peripheral id
//! in the low six.

use heapless::Vec;

/// Longest payload this implementation handles, in 32-bit words.
pub const MAX_WORDS: usize = 64;

/// Longest complete frame: header + payload + CRC.
pub const MAX_FRAME_LEN: usize = 4 + MAX_WORDS * 4 + 1;

/// Bus commands. Negative command bytes are host-side error markers and
/// parse as `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    DeviceRequest,
    AllStatusRequest,
    Reset,
    Shutdown,
    DeviceStatus,
    AllStatus,
    Ack,
    DataTransfer,
    GetCondition,
    GetMemoryInfo,
    BlockRead,
    BlockWrite,
    SetCondition,
    Unknown(u8),
}

impl Command {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Command::DeviceRequest,
            0x02 => Command::AllStatusRequest,
            0x03 => Command::Reset,
            0x04 => Command::Shutdown,
            0x05 => Command::DeviceStatus,
            0x06 => Command::AllStatus,
            0x07 => Command::Ack,
            0x08 => Command::DataTransfer,
            0x09 => Command::GetCondition,
            0x0A => Command::GetMemoryInfo,
            0x0B => Command::BlockRead,
            0x0C => Command::BlockWrite,
            0x0E => Command::SetCondition,
            other => Command::Unknown(other),
        }
    }

    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Command::DeviceRequest => 0x01,
            Command::AllStatusRequest => 0x02,
            Command::Reset => 0x03,
            Command::Shutdown => 0x04,
            Command::DeviceStatus => 0x05,
            Command::AllStatus => 0x06,
            Command::Ack => 0x07,
            Command::DataTransfer => 0x08,
            Command::GetCondition => 0x09,
            Command::GetMemoryInfo => 0x0A,
            Command::BlockRead => 0x0B,
            Command::BlockWrite => 0x0C,
            Command::SetCondition => 0x0E,
            Command::Unknown(other) => other,
        }
    }
}

/// Function codes carried in the first payload word.
pub mod function {
    pub const CONTROLLER: u32 = 0x0100_0000;
    pub const MEMORY_CARD: u32 = 0x0200_0000;
    pub const LCD: u32 = 0x0400_0000;
    pub const CLOCK: u32 = 0x0800_0000;
    pub const VIBRATION: u32 = 0x0001_0000;
}

/// Address helpers: port in bits 7..6, peripheral id in bits 5..0.
pub mod address {
    /// Main-peripheral flag in the low six bits.
    pub const MAIN: u8 = 0x20;

    #[inline]
    #[must_use]
    pub const fn port(addr: u8) -> u8 {
        addr >> 6
    }

    #[inline]
    #[must_use]
    pub const fn peripheral(addr: u8) -> u8 {
        addr & 0x3F
    }

    /// Bus address of the main peripheral on `port`.
    #[inline]
    #[must_use]
    pub const fn main_on_port(port: u8) -> u8 {
        (port << 6) | MAIN
    }

    /// Bus address of the host on `port`.
    #[inline]
    #[must_use]
    pub const fn host_on_port(port: u8) -> u8 {
        port << 6
    }
}

/// XOR fold over all frame bytes; a valid frame XORs to zero including its
/// CRC byte.
#[inline]
#[must_use]
pub fn xor_crc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Frame parse failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Shorter than header + CRC.
    Truncated,
    /// Length does not match `num_words`.
    Length,
    /// XOR over the frame is nonzero.
    Crc,
    /// Payload longer than this implementation handles.
    TooLong,
}

/// A parsed Maple frame.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MaplePacket {
    pub command: Command,
    pub destination: u8,
    pub origin: u8,
    pub payload: Vec<u8, { MAX_WORDS * 4 }>,
}

impl MaplePacket {
    #[must_use]
    pub fn new(command: Command, destination: u8, origin: u8) -> Self {
        Self {
            command,
            destination,
            origin,
            payload: Vec::new(),
        }
    }

    /// Payload length in 32-bit words.
    #[must_use]
    pub fn num_words(&self) -> u8 {
        (self.payload.len() / 4) as u8
    }

    /// First payload word (the function code on most commands).
    #[must_use]
    pub fn function(&self) -> Option<u32> {
        self.word(0)
    }

    /// Payload word by index.
    #[must_use]
    pub fn word(&self, index: usize) -> Option<u32> {
        let off = index * 4;
        let bytes = self.payload.get(off..off + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Append one payload word.
    pub fn push_word(&mut self, word: u32) -> Result<(), FrameError> {
        self.payload
            .extend_from_slice(&word.to_le_bytes())
            .map_err(|()| FrameError::TooLong)
    }

    /// Parse a complete frame including its CRC byte.
    pub fn parse(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < 5 {
            return Err(FrameError::Truncated);
        }
        let num_words = frame[3] as usize;
        if num_words > MAX_WORDS {
            return Err(FrameError::TooLong);
        }
        if frame.len() != 4 + num_words * 4 + 1 {
            return Err(FrameError::Length);
        }
        if xor_crc(frame) != 0 {
            return Err(FrameError::Crc);
        }
        let mut payload = Vec::new();
        payload
            .extend_from_slice(&frame[4..4 + num_words * 4])
            .map_err(|()| FrameError::TooLong)?;
        Ok(Self {
            command: Command::from_byte(frame[0]),
            destination: frame[1],
            origin: frame[2],
            payload,
        })
    }

    /// Serialise into `out`, appending the CRC. Returns the frame length.
    pub fn build(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let len = 4 + self.payload.len() + 1;
        if out.len() < len || self.payload.len() % 4 != 0 {
            return Err(FrameError::Length);
        }
        out[0] = self.command.to_byte();
        out[1] = self.destination;
        out[2] = self.origin;
        out[3] = self.num_words();
        out[4..4 + self.payload.len()].copy_from_slice(&self.payload);
        out[len - 1] = xor_crc(&out[..len - 1]);
        Ok(len)
    }
}
