//! Feedback channel: rumble/LED back-propagation from sinks to sources.
//!
//! Sinks publish feedback against a logical player index; the player manager
//! resolves that to the originating `(dev_addr, instance)` and the hub parks
//! it until the owning input driver's `tick` consumes it.

use crate::players::PlayerManager;
use crate::router::OutputTarget;

use heapless::Vec;

/// Desired actuator state for one device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Feedback {
    /// Low-frequency rumble power.
    pub rumble_left: u8,
    /// High-frequency rumble power.
    pub rumble_right: u8,
    /// Player indicator (1-based; 0 = off).
    pub player_led: u8,
    /// RGB lightbar, when the device has one.
    pub rgb: [u8; 3],
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    dev_addr: u8,
    instance: u8,
    feedback: Feedback,
    dirty: bool,
}

/// Maximum devices with an outstanding feedback record.
pub const MAX_FEEDBACK_ENTRIES: usize = 8;

/// Parking lot for sink-to-source feedback.
#[derive(Default)]
pub struct FeedbackHub {
    entries: Vec<Entry, MAX_FEEDBACK_ENTRIES>,
}

impl FeedbackHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish feedback from a sink against a logical player.
    ///
    /// Returns `false` when the player resolves to no device or the hub is
    /// full; the sink keeps running either way.
    pub fn publish(
        &mut self,
        _target: OutputTarget,
        player: usize,
        players: &PlayerManager,
        feedback: Feedback,
    ) -> bool {
        let Some((dev_addr, instance)) = players.resolve(player) else {
            return false;
        };
        self.write(dev_addr, instance, feedback)
    }

    /// Write feedback straight to a device, bypassing player resolution.
    pub fn write(&mut self, dev_addr: u8, instance: u8, feedback: Feedback) -> bool {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.dev_addr == dev_addr && e.instance == instance)
        {
            if entry.feedback != feedback {
                entry.feedback = feedback;
                entry.dirty = true;
            }
            return true;
        }
        self.entries
            .push(Entry {
                dev_addr,
                instance,
                feedback,
                dirty: true,
            })
            .is_ok()
    }

    /// Take the pending feedback for a device, if it changed since the last
    /// take. Input drivers call this from `tick`.
    pub fn take(&mut self, dev_addr: u8, instance: u8) -> Option<Feedback> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.dev_addr == dev_addr && e.instance == instance)?;
        if entry.dirty {
            entry.dirty = false;
            Some(entry.feedback)
        } else {
            None
        }
    }

    /// Current state regardless of freshness (for drivers that retransmit
    /// periodically).
    #[must_use]
    pub fn peek(&self, dev_addr: u8, instance: u8) -> Option<Feedback> {
        self.entries
            .iter()
            .find(|e| e.dev_addr == dev_addr && e.instance == instance)
            .map(|e| e.feedback)
    }

    /// Drop a device's record on unmount.
    pub fn forget(&mut self, dev_addr: u8, instance: u8) {
        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.dev_addr == dev_addr && e.instance == instance)
        {
            self.entries.swap_remove(i);
        }
    }
}
