//! Wireless controller protocol (UDP input channel, TCP control channel).
//!
//! Chip- and socket-agnostic: the shell owns the network stack and hands
//! received datagrams to [`parse_datagram`]; outgoing commands serialise
//! into caller buffers, paced by [`RateGate`].
//!
//! # Features
//!
//! - `std`: Enable standard library support (for testing)
//! - `defmt`: Enable defmt formatting for embedded logging

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod command;
pub mod header;
pub mod input;

// Re-export main types at crate root
pub use command::{Command, CommandError, RateGate, COMMAND_INTERVAL_MS, COMMAND_MAX_LEN};
pub use header::{Header, HeaderError, MsgType, HEADER_LEN, MAGIC, VERSION};
pub use input::{stick_to_axis, InputPayload, TouchPoint, INPUT_LEN};

use adapter_core::InputEvent;

/// What a received datagram contained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Datagram {
    /// A controller state report, already mapped to the adapter event.
    Input {
        event: InputEvent,
        battery: u8,
        controller_id: u8,
    },
    /// A presence announcement from `controller_id`.
    Hello { controller_id: u8 },
}

/// Datagram-level failures. Transient: count, drop, continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DatagramError {
    Header(HeaderError),
    Truncated,
    /// Commands are not valid on the input channel.
    WrongChannel,
}

impl From<HeaderError> for DatagramError {
    fn from(err: HeaderError) -> Self {
        DatagramError::Header(err)
    }
}

/// Parse one UDP datagram from a controller.
///
/// The header sequence number becomes the event sequence so stale-datagram
/// detection composes with the router's ordering guarantees.
pub fn parse_datagram(data: &[u8]) -> Result<Datagram, DatagramError> {
    let (header, body) = Header::parse(data)?;
    match header.msg_type {
        MsgType::Input => {
            let payload = InputPayload::parse(body).map_err(|_| DatagramError::Truncated)?;
            Ok(Datagram::Input {
                event: payload.to_event(u32::from(header.seq)),
                battery: payload.battery,
                controller_id: payload.controller_id,
            })
        }
        MsgType::Hello => {
            let controller_id = *body.first().ok_or(DatagramError::Truncated)?;
            Ok(Datagram::Hello { controller_id })
        }
        MsgType::Command => Err(DatagramError::WrongChannel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_core::Buttons;

    #[test]
    fn test_input_datagram_parses_to_event() {
        let payload = InputPayload {
            buttons: Buttons::B1.raw(),
            controller_id: 3,
            battery: 55,
            ..Default::default()
        };
        let mut buf = [0u8; HEADER_LEN + INPUT_LEN];
        Header::new(MsgType::Input, 42, 0).write(&mut buf);
        buf[HEADER_LEN..].copy_from_slice(&payload.write());

        match parse_datagram(&buf).unwrap() {
            Datagram::Input {
                event,
                battery,
                controller_id,
            } => {
                assert_eq!(event.dev_addr, 0xE3);
                assert_eq!(event.seq, 42);
                assert!(event.buttons.contains(Buttons::B1));
                assert_eq!(battery, 55);
                assert_eq!(controller_id, 3);
            }
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_hello_datagram() {
        let mut buf = [0u8; HEADER_LEN + 1];
        Header::new(MsgType::Hello, 0, 0).write(&mut buf);
        buf[HEADER_LEN] = 2;
        assert_eq!(
            parse_datagram(&buf),
            Ok(Datagram::Hello { controller_id: 2 })
        );
    }

    #[test]
    fn test_command_on_input_channel_rejected() {
        let mut buf = [0u8; HEADER_LEN + 1];
        Header::new(MsgType::Command, 0, 0).write(&mut buf);
        assert_eq!(parse_datagram(&buf), Err(DatagramError::WrongChannel));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut buf = [0u8; HEADER_LEN + 10];
        Header::new(MsgType::Input, 0, 0).write(&mut buf);
        assert_eq!(parse_datagram(&buf), Err(DatagramError::Truncated));
    }
}
