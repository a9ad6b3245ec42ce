//! Output sink trait: console-side emitters consuming routed events.

use crate::event::InputEvent;
use crate::feedback::Feedback;
use crate::profile::ProfileOutput;
use crate::router::OutputTarget;

/// Error type for sink operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkError {
    /// Bus/transfer I/O error.
    Io,
    /// Device not ready (e.g. USB not enumerated, console not polling).
    NotReady,
    /// Previous transfer still in flight.
    Busy,
}

/// A console-side output emitter.
///
/// The cooperative pipeline pulls the routed state each tick, applies the
/// active profile and hands the result to `send_report`; sink-specific wire
/// construction must be deterministic. A sink that needs microsecond
/// turnaround registers a router tap instead and runs its hot half on the
/// real-time worker.
pub trait OutputSink {
    /// The target this sink serves.
    fn target(&self) -> OutputTarget;

    /// One-time setup. Runs before the bus driver is enabled so lines can be
    /// parked in their released state from the first instant.
    fn init(&mut self) {}

    /// Whether the console side is ready to accept reports.
    fn is_ready(&self) -> bool;

    /// Emit one wire report for a player.
    ///
    /// Returns actuator feedback reported by the console, if any changed.
    fn send_report(
        &mut self,
        player: usize,
        event: &InputEvent,
        out: &ProfileOutput,
    ) -> Result<Option<Feedback>, SinkError>;
}
