//! Output commands on the TCP control channel, and the per-controller rate
//! gate.
//!
//! A command message is the common header followed by one command-type byte
//! and a fixed-size payload. Controllers tolerate at most one command per
//! 50 ms, so senders go through [`RateGate`].

use crate::header::{Header, MsgType, HEADER_LEN};

/// Minimum spacing between commands to one controller.
pub const COMMAND_INTERVAL_MS: u64 = 50;

/// Wireless slots the gate tracks.
pub const MAX_CONTROLLERS: usize = 4;

/// Longest serialised command message: header + type + rumble payload.
pub const COMMAND_MAX_LEN: usize = HEADER_LEN + 1 + 6;

/// An output command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Left/right motor power plus a bounded duration.
    Rumble {
        left: u8,
        right: u8,
        duration_ms: u16,
    },
    /// Lightbar colour.
    RgbLed { r: u8, g: u8, b: u8 },
    /// 1-based player indicator, 0 = off.
    PlayerLed(u8),
}

/// Command parse failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    Truncated,
    BadType,
}

impl Command {
    const RUMBLE: u8 = 0x01;
    const RGB_LED: u8 = 0x02;
    const PLAYER_LED: u8 = 0x03;

    /// Serialise header + command into `out`; returns the message length.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`COMMAND_MAX_LEN`].
    pub fn write(&self, header: &Header, out: &mut [u8]) -> usize {
        debug_assert_eq!(header.msg_type, MsgType::Command);
        header.write(out);
        let body = &mut out[HEADER_LEN..];
        match *self {
            Command::Rumble {
                left,
                right,
                duration_ms,
            } => {
                body[0] = Self::RUMBLE;
                body[1] = left;
                body[2] = right;
                body[3..5].copy_from_slice(&duration_ms.to_le_bytes());
                body[5] = 0;
                body[6] = 0;
                HEADER_LEN + 1 + 6
            }
            Command::RgbLed { r, g, b } => {
                body[0] = Self::RGB_LED;
                body[1] = r;
                body[2] = g;
                body[3] = b;
                HEADER_LEN + 1 + 3
            }
            Command::PlayerLed(index) => {
                body[0] = Self::PLAYER_LED;
                body[1] = index;
                HEADER_LEN + 1 + 1
            }
        }
    }

    /// Parse the command body that follows a [`MsgType::Command`] header.
    pub fn parse(body: &[u8]) -> Result<Self, CommandError> {
        let (&kind, rest) = body.split_first().ok_or(CommandError::Truncated)?;
        match kind {
            Self::RUMBLE => {
                if rest.len() < 6 {
                    return Err(CommandError::Truncated);
                }
                Ok(Command::Rumble {
                    left: rest[0],
                    right: rest[1],
                    duration_ms: u16::from_le_bytes([rest[2], rest[3]]),
                })
            }
            Self::RGB_LED => {
                if rest.len() < 3 {
                    return Err(CommandError::Truncated);
                }
                Ok(Command::RgbLed {
                    r: rest[0],
                    g: rest[1],
                    b: rest[2],
                })
            }
            Self::PLAYER_LED => rest
                .first()
                .map(|&index| Command::PlayerLed(index))
                .ok_or(CommandError::Truncated),
            _ => Err(CommandError::BadType),
        }
    }
}

/// Per-controller command pacing: one command per 50 ms window.
#[derive(Default)]
pub struct RateGate {
    last_sent_ms: [Option<u64>; MAX_CONTROLLERS],
}

impl RateGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a command to `controller_id` may go out now; records the
    /// send time when it may.
    pub fn try_send(&mut self, controller_id: u8, now_ms: u64) -> bool {
        let Some(slot) = self.last_sent_ms.get_mut(controller_id as usize) else {
            return false;
        };
        match *slot {
            Some(last) if now_ms.saturating_sub(last) < COMMAND_INTERVAL_MS => false,
            _ => {
                *slot = Some(now_ms);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_header() -> Header {
        Header::new(MsgType::Command, 9, 1_000)
    }

    #[test]
    fn test_rumble_round_trip() {
        let cmd = Command::Rumble {
            left: 200,
            right: 10,
            duration_ms: 500,
        };
        let mut buf = [0u8; COMMAND_MAX_LEN];
        let len = cmd.write(&command_header(), &mut buf);
        assert_eq!(len, HEADER_LEN + 7);

        let (header, body) = Header::parse(&buf[..len]).unwrap();
        assert_eq!(header.msg_type, MsgType::Command);
        assert_eq!(Command::parse(body), Ok(cmd));
    }

    #[test]
    fn test_led_payload_sizes() {
        let mut buf = [0u8; COMMAND_MAX_LEN];
        let rgb = Command::RgbLed { r: 1, g: 2, b: 3 };
        assert_eq!(rgb.write(&command_header(), &mut buf), HEADER_LEN + 4);

        let led = Command::PlayerLed(2);
        assert_eq!(led.write(&command_header(), &mut buf), HEADER_LEN + 2);
        let (_, body) = Header::parse(&buf[..HEADER_LEN + 2]).unwrap();
        assert_eq!(Command::parse(body), Ok(led));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert_eq!(Command::parse(&[0x7F, 0, 0]), Err(CommandError::BadType));
    }

    #[test]
    fn test_rate_gate_enforces_window() {
        let mut gate = RateGate::new();
        assert!(gate.try_send(0, 0));
        assert!(!gate.try_send(0, 49));
        assert!(gate.try_send(0, 50));

        // Independent per controller.
        assert!(gate.try_send(1, 51));
        assert!(!gate.try_send(1, 52));
        assert!(!gate.try_send(9, 0)); // out-of-range slot
    }
}
