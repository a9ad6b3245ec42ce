//! Multi-protocol controller adapter firmware for the RP2040.
//!
//! Heterogeneous controllers come in over USB host, Bluetooth HID, native
//! console buses and the wireless UDP protocol; every source normalises
//! into the shared abstract event, flows through the router and profile
//! service, and leaves through one of the console-side sinks.
//!
//! # Architecture
//!
//! Core 0 runs the Embassy cooperative executor:
//!
//! - **USB task**: the device stack
//! - **Writer task**: latest-report HID writes
//! - **Core task**: pipeline tick (drivers, router, sinks, players,
//!   profiles), Maple responder, settings debounce
//! - **Button task**: click/hold gesture classification
//!
//! Core 1 is the dedicated real-time worker: it spins on the PIO capture
//! FIFO, runs the Maple transition decoder, and publishes packets through a
//! lock-free SPSC ring. Nothing on core 1 waits on core 0.
//!
//! # Features
//!
//! - **`dev-panic`** (default): `panic-probe` with RTT output
//! - **`prod-panic`**: `panic-reset` for production
//! - **`standard-hid`** (default): cross-platform HID gamepad descriptor
//! - **`xinput-compat`**: Xbox-style HID descriptor

#![no_std]

// Ensure mutually exclusive HID descriptor features
#[cfg(all(feature = "standard-hid", feature = "xinput-compat"))]
compile_error!("Cannot enable both `standard-hid` and `xinput-compat` features - they define conflicting HID descriptors");

pub mod button;
pub mod flash;
pub mod maple_port;
pub mod neogeo;
pub mod usb_output;
pub mod wireless;

pub use button::{ButtonEvent, ButtonSignal};
pub use flash::{RpFlash, FLASH_SIZE, SETTINGS_BASE};
pub use maple_port::{LatestEventTap, MaplePort, MapleTx, RING_DEPTH};
pub use neogeo::NeoGeoSink;
pub use usb_output::{configure_usb_hid, GamepadReport, GamepadRequestHandler, UsbHidSink};
pub use wireless::{CommandChannel, DatagramChannel, WirelessPort};
