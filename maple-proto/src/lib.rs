//! Maple Bus peripheral protocol: packet model, transition decoding, and
//! the request responder.
//!
//! Everything here is chip-agnostic. The shell owns the I/O front-end that
//! captures line transitions and the DMA engine that transmits responses;
//! this crate turns capture bytes into packets on the real-time worker and
//! packets into responses on the cooperative core.
//!
//! # Features
//!
//! - `std`: Enable standard library support (for testing)
//! - `defmt`: Enable defmt formatting for embedded logging

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod decoder;
pub mod packet;
pub mod responder;
pub mod wire;

// Re-export main types at crate root
pub use decoder::{MapleDecoder, TransitionTable, STATE_COUNT};
pub use packet::{
    address, function, xor_crc, Command, FrameError, MaplePacket, MAX_FRAME_LEN, MAX_WORDS,
};
pub use responder::{
    caps, Condition, MapleResponder, ResponderState, TxPort, DEVICE_INFO_WORDS,
};
pub use wire::{encode_frame, line_state, WireOverflow};
