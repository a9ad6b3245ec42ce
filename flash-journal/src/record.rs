//! The 256-byte persisted settings record.

use adapter_core::profile::{Profile, PROFILE_WIRE_LEN};

use crate::PAGE_LEN;

/// Slot magic, "GCPR".
pub const MAGIC: [u8; 4] = *b"GCPR";

/// Sequence value of an erased slot.
pub const SEQ_ERASED: u32 = 0xFFFF_FFFF;

/// Custom profiles a record carries.
pub const MAX_CUSTOM: usize = 4;

/// In-RAM settings state, serialised 1:1 into a flash page.
///
/// Page layout: magic[4], sequence u32 LE, active profile, USB output mode,
/// auxiliary orientation, custom count, then four 56-byte profile blobs.
/// The tail pads with 0xFF.
#[derive(Clone, Copy, Debug)]
pub struct SettingsRecord {
    /// Strictly monotonic across the life of the store.
    pub sequence: u32,
    pub active_profile: u8,
    pub output_mode: u8,
    pub aux_orientation: u8,
    pub custom_count: u8,
    pub custom: [Profile; MAX_CUSTOM],
}

impl SettingsRecord {
    /// Factory state: no custom profiles, defaults everywhere.
    pub const DEFAULT: Self = Self {
        sequence: 0,
        active_profile: 0,
        output_mode: 0,
        aux_orientation: 0,
        custom_count: 0,
        custom: [Profile::IDENTITY; MAX_CUSTOM],
    };

    /// The populated custom profiles.
    #[must_use]
    pub fn custom_profiles(&self) -> &[Profile] {
        &self.custom[..usize::from(self.custom_count).min(MAX_CUSTOM)]
    }

    /// Serialise into one flash page.
    #[must_use]
    pub fn encode(&self) -> [u8; PAGE_LEN] {
        let mut page = [0xFFu8; PAGE_LEN];
        page[0..4].copy_from_slice(&MAGIC);
        page[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        page[8] = self.active_profile;
        page[9] = self.output_mode;
        page[10] = self.aux_orientation;
        page[11] = self.custom_count.min(MAX_CUSTOM as u8);
        for (i, profile) in self.custom.iter().enumerate() {
            let off = 12 + i * PROFILE_WIRE_LEN;
            page[off..off + PROFILE_WIRE_LEN].copy_from_slice(&profile.to_wire());
        }
        page
    }

    /// Decode a flash page; `None` when the slot is empty or unrecognised.
    #[must_use]
    pub fn decode(page: &[u8; PAGE_LEN]) -> Option<Self> {
        if page[0..4] != MAGIC {
            return None;
        }
        let sequence = u32::from_le_bytes(page[4..8].try_into().unwrap());
        if sequence == SEQ_ERASED {
            return None;
        }
        let mut custom = [Profile::IDENTITY; MAX_CUSTOM];
        for (i, profile) in custom.iter_mut().enumerate() {
            let off = 12 + i * PROFILE_WIRE_LEN;
            let blob: &[u8; PROFILE_WIRE_LEN] =
                page[off..off + PROFILE_WIRE_LEN].try_into().unwrap();
            *profile = Profile::from_wire(blob);
        }
        Some(Self {
            sequence,
            active_profile: page[8],
            output_mode: page[9],
            aux_orientation: page[10],
            custom_count: page[11].min(MAX_CUSTOM as u8),
            custom,
        })
    }

    /// A slot is empty when its sequence field still reads erased.
    #[must_use]
    pub fn slot_is_empty(page: &[u8; PAGE_LEN]) -> bool {
        page[4..8] == [0xFF; 4]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_core::Buttons;
    use adapter_core::profile::{MapEntry, MapTarget};

    #[test]
    fn test_encode_decode_round_trip() {
        let mut record = SettingsRecord::DEFAULT;
        record.sequence = 7;
        record.active_profile = 2;
        record.output_mode = 1;
        record.custom_count = 1;
        record.custom[0].name = *b"custom1\0";
        record.custom[0].button_map[0] = Some(MapEntry {
            input: Buttons::B1,
            target: MapTarget::Drop,
        });

        let page = record.encode();
        let back = SettingsRecord::decode(&page).unwrap();
        assert_eq!(back.sequence, 7);
        assert_eq!(back.active_profile, 2);
        assert_eq!(back.output_mode, 1);
        assert_eq!(back.custom_count, 1);
        assert_eq!(back.custom[0].name, *b"custom1\0");
    }

    #[test]
    fn test_erased_page_is_empty_and_invalid() {
        let page = [0xFFu8; PAGE_LEN];
        assert!(SettingsRecord::slot_is_empty(&page));
        assert!(SettingsRecord::decode(&page).is_none());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut record = SettingsRecord::DEFAULT;
        record.sequence = 1;
        let mut page = record.encode();
        page[0] = b'X';
        assert!(SettingsRecord::decode(&page).is_none());
    }
}
