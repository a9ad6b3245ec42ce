//! Player manager: physical-device to logical-slot assignment.

use crate::event::addr;

/// Slot assignment policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerPolicy {
    /// First-seen devices take the lowest free slot and keep it until an
    /// explicit reset, surviving unmount/remount cycles.
    Fixed,
    /// Slot 0 is always the most recently assigned device; joins shift the
    /// rest down, disconnects close the gap upward.
    Shift,
}

/// How long a wireless controller may stay silent before its slot expires.
pub const WIRELESS_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug)]
struct SlotEntry {
    dev_addr: u8,
    instance: u8,
    last_seen_ms: u64,
    /// FIXED policy keeps unplugged devices reserved; SHIFT never does.
    connected: bool,
}

/// Maximum logical player slots.
pub const MAX_SLOTS: usize = 4;

/// Physical-device to logical-slot assignment under a policy.
pub struct PlayerManager {
    policy: PlayerPolicy,
    max_slots: usize,
    /// Wait for the first nonzero button report before assigning.
    assign_on_press: bool,
    slots: [Option<SlotEntry>; MAX_SLOTS],
    /// Devices mounted but not yet assigned (assign-on-press).
    pending: [Option<(u8, u8)>; MAX_SLOTS],
    rejected: u32,
}

impl PlayerManager {
    #[must_use]
    pub fn new(policy: PlayerPolicy, max_slots: usize, assign_on_press: bool) -> Self {
        Self {
            policy,
            max_slots: max_slots.min(MAX_SLOTS),
            assign_on_press,
            slots: [None; MAX_SLOTS],
            pending: [None; MAX_SLOTS],
            rejected: 0,
        }
    }

    /// A device appeared on the bus.
    ///
    /// Under assign-on-press the device parks as pending until its first
    /// nonzero button report; otherwise it is assigned immediately.
    pub fn on_mount(&mut self, dev_addr: u8, instance: u8, now_ms: u64) {
        if self.assign_on_press {
            if self.slot_of(dev_addr, instance).is_none()
                && !self.pending.iter().flatten().any(|&p| p == (dev_addr, instance))
            {
                if let Some(free) = self.pending.iter_mut().find(|p| p.is_none()) {
                    *free = Some((dev_addr, instance));
                }
            }
            // A FIXED reservation from an earlier session reconnects here.
            self.reconnect(dev_addr, instance, now_ms);
        } else if !self.reconnect(dev_addr, instance, now_ms) {
            self.assign(dev_addr, instance, now_ms);
        }
    }

    /// A device left the bus.
    pub fn on_unmount(&mut self, dev_addr: u8, instance: u8) {
        self.pending
            .iter_mut()
            .filter(|p| **p == Some((dev_addr, instance)))
            .for_each(|p| *p = None);

        let Some(slot) = self.slot_of(dev_addr, instance) else {
            return;
        };
        match self.policy {
            PlayerPolicy::Fixed => {
                if let Some(entry) = self.slots[slot].as_mut() {
                    entry.connected = false;
                }
            }
            PlayerPolicy::Shift => {
                // Close the gap upward.
                for i in slot..self.max_slots - 1 {
                    self.slots[i] = self.slots[i + 1];
                }
                self.slots[self.max_slots - 1] = None;
            }
        }
    }

    /// Report input activity from a device.
    ///
    /// Completes a pending assign-on-press assignment when `has_input` and
    /// refreshes the liveness timestamp either way.
    pub fn on_activity(&mut self, dev_addr: u8, instance: u8, has_input: bool, now_ms: u64) {
        if has_input {
            if let Some(p) = self
                .pending
                .iter_mut()
                .find(|p| **p == Some((dev_addr, instance)))
            {
                *p = None;
                if !self.reconnect(dev_addr, instance, now_ms) {
                    self.assign(dev_addr, instance, now_ms);
                }
            }
        }
        if let Some(slot) = self.slot_of(dev_addr, instance) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.last_seen_ms = now_ms;
                entry.connected = true;
            }
        }
    }

    /// Drop wireless-range devices that have gone silent.
    pub fn expire_stale(&mut self, now_ms: u64) {
        loop {
            let stale = self
                .slots
                .iter()
                .flatten()
                .find(|e| {
                    (addr::NATIVE_BASE..=addr::NATIVE_LAST).contains(&e.dev_addr)
                        && now_ms.saturating_sub(e.last_seen_ms) >= WIRELESS_TIMEOUT_MS
                })
                .map(|e| (e.dev_addr, e.instance));
            match stale {
                // Expiry is a real departure even under FIXED.
                Some((a, i)) => self.remove(a, i),
                None => break,
            }
        }
    }

    /// Logical slot of a device, if assigned.
    #[must_use]
    pub fn slot_of(&self, dev_addr: u8, instance: u8) -> Option<usize> {
        self.slots.iter().position(|e| {
            matches!(e, Some(e) if e.dev_addr == dev_addr && e.instance == instance)
        })
    }

    /// Originating device of a logical slot, for feedback back-propagation.
    #[must_use]
    pub fn resolve(&self, slot: usize) -> Option<(u8, u8)> {
        self.slots
            .get(slot)?
            .map(|e| (e.dev_addr, e.instance))
    }

    /// Number of populated slots.
    #[must_use]
    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Assignments rejected for want of a free slot.
    #[must_use]
    pub const fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Clear every assignment and pending entry.
    pub fn reset(&mut self) {
        self.slots = [None; MAX_SLOTS];
        self.pending = [None; MAX_SLOTS];
    }

    fn reconnect(&mut self, dev_addr: u8, instance: u8, now_ms: u64) -> bool {
        if let Some(slot) = self.slot_of(dev_addr, instance) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.connected = true;
                entry.last_seen_ms = now_ms;
            }
            return true;
        }
        false
    }

    fn assign(&mut self, dev_addr: u8, instance: u8, now_ms: u64) {
        let entry = SlotEntry {
            dev_addr,
            instance,
            last_seen_ms: now_ms,
            connected: true,
        };
        match self.policy {
            PlayerPolicy::Fixed => {
                match self.slots[..self.max_slots]
                    .iter_mut()
                    .find(|s| s.is_none())
                {
                    Some(free) => *free = Some(entry),
                    None => self.rejected = self.rejected.wrapping_add(1),
                }
            }
            PlayerPolicy::Shift => {
                if self.count() >= self.max_slots {
                    self.rejected = self.rejected.wrapping_add(1);
                    return;
                }
                for i in (1..self.max_slots).rev() {
                    self.slots[i] = self.slots[i - 1];
                }
                self.slots[0] = Some(entry);
            }
        }
    }

    fn remove(&mut self, dev_addr: u8, instance: u8) {
        let Some(slot) = self.slot_of(dev_addr, instance) else {
            return;
        };
        for i in slot..self.max_slots - 1 {
            self.slots[i] = self.slots[i + 1];
        }
        self.slots[self.max_slots - 1] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_assigns_lowest_free_slot() {
        let mut pm = PlayerManager::new(PlayerPolicy::Fixed, 4, false);
        pm.on_mount(0x01, 0, 0);
        pm.on_mount(0x02, 0, 0);
        assert_eq!(pm.slot_of(0x01, 0), Some(0));
        assert_eq!(pm.slot_of(0x02, 0), Some(1));
        assert_eq!(pm.count(), 2);
    }

    #[test]
    fn test_fixed_assignment_survives_remount() {
        let mut pm = PlayerManager::new(PlayerPolicy::Fixed, 4, false);
        pm.on_mount(0x01, 0, 0);
        pm.on_mount(0x02, 0, 0);
        for _ in 0..3 {
            pm.on_unmount(0x01, 0);
            pm.on_mount(0x01, 0, 10);
        }
        assert_eq!(pm.slot_of(0x01, 0), Some(0));
        assert_eq!(pm.slot_of(0x02, 0), Some(1));
    }

    #[test]
    fn test_shift_newest_takes_slot_zero() {
        let mut pm = PlayerManager::new(PlayerPolicy::Shift, 4, false);
        pm.on_mount(0xA1, 0, 0); // A
        assert_eq!(pm.resolve(0), Some((0xA1, 0)));

        pm.on_mount(0xA2, 0, 1); // B
        assert_eq!(pm.resolve(0), Some((0xA2, 0)));
        assert_eq!(pm.resolve(1), Some((0xA1, 0)));

        pm.on_mount(0xA3, 0, 2); // C
        assert_eq!(pm.resolve(0), Some((0xA3, 0)));
        assert_eq!(pm.resolve(1), Some((0xA2, 0)));
        assert_eq!(pm.resolve(2), Some((0xA1, 0)));
    }

    #[test]
    fn test_shift_disconnect_closes_gap() {
        let mut pm = PlayerManager::new(PlayerPolicy::Shift, 4, false);
        pm.on_mount(0xA1, 0, 0); // A
        pm.on_mount(0xA2, 0, 1); // B
        pm.on_mount(0xA3, 0, 2); // C -> [C, B, A]

        pm.on_unmount(0xA2, 0); // -> [C, A]
        assert_eq!(pm.resolve(0), Some((0xA3, 0)));
        assert_eq!(pm.resolve(1), Some((0xA1, 0)));
        assert_eq!(pm.resolve(2), None);
        assert_eq!(pm.count(), 2);
    }

    #[test]
    fn test_no_duplicate_assignment() {
        let mut pm = PlayerManager::new(PlayerPolicy::Fixed, 4, false);
        pm.on_mount(0x01, 0, 0);
        pm.on_mount(0x01, 0, 5);
        assert_eq!(pm.count(), 1);
    }

    #[test]
    fn test_assign_on_press_waits_for_input() {
        let mut pm = PlayerManager::new(PlayerPolicy::Fixed, 4, true);
        pm.on_mount(0x01, 0, 0);
        assert_eq!(pm.count(), 0);

        pm.on_activity(0x01, 0, false, 10);
        assert_eq!(pm.count(), 0);

        pm.on_activity(0x01, 0, true, 20);
        assert_eq!(pm.slot_of(0x01, 0), Some(0));
    }

    #[test]
    fn test_full_table_rejects() {
        let mut pm = PlayerManager::new(PlayerPolicy::Fixed, 2, false);
        pm.on_mount(0x01, 0, 0);
        pm.on_mount(0x02, 0, 0);
        pm.on_mount(0x03, 0, 0);
        assert_eq!(pm.count(), 2);
        assert_eq!(pm.rejected(), 1);
        assert_eq!(pm.slot_of(0x03, 0), None);
    }

    #[test]
    fn test_wireless_expiry() {
        let mut pm = PlayerManager::new(PlayerPolicy::Shift, 4, false);
        pm.on_mount(0xE0, 0, 0); // wireless slot 0
        pm.on_mount(0x01, 0, 0); // USB stays

        pm.on_activity(0xE0, 0, true, 1_000);
        pm.expire_stale(3_000);
        assert_eq!(pm.count(), 2);

        pm.expire_stale(6_001);
        assert_eq!(pm.slot_of(0xE0, 0), None);
        assert_eq!(pm.slot_of(0x01, 0), Some(0));
    }
}
