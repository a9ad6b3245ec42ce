//! Platform-agnostic controller adapter core.
//!
//! This crate provides the normalisation, routing and output pipeline that
//! lets heterogeneous input drivers feed console-side emitters without N×M
//! coupling, with no platform-specific dependencies. It can be used both in
//! embedded `no_std` environments and on host for testing.
//!
//! # Features
//!
//! - `std`: Enable standard library support (for testing)
//! - `defmt`: Enable defmt formatting for embedded logging

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod buttons;
pub mod drivers;
pub mod event;
pub mod feedback;
pub mod pipeline;
pub mod players;
pub mod profile;
pub mod router;
pub mod sink;

// Re-export main types at crate root
pub use buttons::{Buttons, BUTTON_BITS};
pub use drivers::{InputDriver, InputRegistry, Scratch};
pub use event::{addr, Axis, EventKind, InputEvent, Transport, AXIS_CENTER, AXIS_COUNT};
pub use feedback::{Feedback, FeedbackHub};
pub use pipeline::{Pipeline, PipelineConfig};
pub use players::{PlayerManager, PlayerPolicy, MAX_SLOTS, WIRELESS_TIMEOUT_MS};
pub use profile::{
    apply, Combo, MapEntry, MapTarget, Profile, ProfileOutput, ProfileService, ProfileSet,
    SocdMemory, SocdMode, TriggerBehavior, TriggerMode,
};
pub use router::{
    MergeRule, MouseParams, MouseTarget, OutputTarget, Route, Router, RouterConfig, RouterMode,
    SourceClass, Tap, MAX_PLAYERS,
};
pub use sink::{OutputSink, SinkError};
