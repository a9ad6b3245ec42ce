//! Profile service: button/combo remapping, trigger behaviour, analog
//! shaping and SOCD cleaning applied between the router and each sink.
//!
//! Profiles are immutable once published. Built-in profiles live in program
//! memory as consts; up to four user-defined profiles come out of the
//! settings store as 56-byte records and join the set at runtime.

use crate::buttons::{Buttons, BUTTON_BITS};
use crate::event::{Axis, AXIS_CENTER, AXIS_COUNT};
use crate::router::OutputTarget;

/// Sparse button-map entry target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MapTarget {
    /// Keep the input bit.
    Passthrough,
    /// Suppress the input bit.
    Drop,
    /// Rewrite to another logical button.
    To(Buttons),
}

/// One sparse rewrite: a single input button and what becomes of it.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MapEntry {
    pub input: Buttons,
    pub target: MapTarget,
}

/// Simultaneous input pattern that emits an extra button.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Combo {
    pub pattern: Buttons,
    pub emit: Buttons,
}

/// Per-trigger behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerMode {
    /// Keep both the analog value and the digital bit.
    #[default]
    Hybrid,
    /// Analog is zeroed; the digital bit follows `analog >= threshold`.
    DigitalOnly,
    /// Digital bit cleared; analog passes through.
    AnalogOnly,
    /// While the digital bit is held, analog reads `fixed`.
    FixedOnPress,
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TriggerBehavior {
    pub mode: TriggerMode,
    pub threshold: u8,
    pub fixed: u8,
}

impl TriggerBehavior {
    pub const HYBRID: Self = Self {
        mode: TriggerMode::Hybrid,
        threshold: 128,
        fixed: 255,
    };
}

/// Simultaneous-opposite-cardinal-direction policy for the d-pad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocdMode {
    #[default]
    Passthrough,
    /// Opposing presses cancel both.
    Neutral,
    /// Up beats down; left+right cancel.
    UpPriority,
    /// The most recent press of an opposing pair wins.
    LastWin,
}

/// Cross-call state for [`SocdMode::LastWin`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SocdMemory {
    prev: Buttons,
    /// Most recently pressed of left/right.
    lr_last: Buttons,
    /// Most recently pressed of up/down.
    ud_last: Buttons,
}

pub const MAX_MAP_ENTRIES: usize = 8;
pub const MAX_COMBOS: usize = 4;

/// Size of a serialised user profile.
pub const PROFILE_WIRE_LEN: usize = 56;

/// An immutable remap + shape rule set.
#[derive(Clone, Copy, Debug)]
pub struct Profile {
    /// NUL-padded ASCII name.
    pub name: [u8; 8],
    pub button_map: [Option<MapEntry>; MAX_MAP_ENTRIES],
    pub combos: [Option<Combo>; MAX_COMBOS],
    /// L2 then R2.
    pub triggers: [TriggerBehavior; 2],
    pub swap_sticks: bool,
    pub invert_ly: bool,
    pub invert_ry: bool,
    /// Sensitivity ×100 per stick axis (LX, LY, RX, RY).
    pub sensitivity: [u8; 4],
    pub socd: SocdMode,
}

impl Profile {
    /// The do-nothing profile.
    pub const IDENTITY: Self = Self {
        name: *b"default\0",
        button_map: [None; MAX_MAP_ENTRIES],
        combos: [None; MAX_COMBOS],
        triggers: [TriggerBehavior::HYBRID; 2],
        swap_sticks: false,
        invert_ly: false,
        invert_ry: false,
        sensitivity: [100; 4],
        socd: SocdMode::Passthrough,
    };

    /// Serialise to the 56-byte persisted layout.
    #[must_use]
    pub fn to_wire(&self) -> [u8; PROFILE_WIRE_LEN] {
        let mut out = [0u8; PROFILE_WIRE_LEN];
        out[..8].copy_from_slice(&self.name);

        // Per-button map: 0 = drop, 0xFF = passthrough, else target index + 1.
        for (i, &bit) in BUTTON_BITS.iter().enumerate() {
            out[8 + i] = match self.map_target(bit) {
                MapTarget::Passthrough => 0xFF,
                MapTarget::Drop => 0,
                MapTarget::To(t) => t.index().map_or(0xFF, |x| x as u8 + 1),
            };
        }

        let mut off = 26;
        for slot in &self.combos {
            let (pattern, emit) = match slot {
                Some(c) => (c.pattern.raw(), c.emit.index().map_or(0, |x| x as u8 + 1)),
                None => (0, 0),
            };
            out[off..off + 4].copy_from_slice(&pattern.to_le_bytes());
            out[off + 4] = emit;
            off += 5;
        }

        for t in &self.triggers {
            out[off] = match t.mode {
                TriggerMode::Hybrid => 0,
                TriggerMode::DigitalOnly => 1,
                TriggerMode::AnalogOnly => 2,
                TriggerMode::FixedOnPress => 3,
            };
            out[off + 1] = t.threshold;
            out[off + 2] = t.fixed;
            off += 3;
        }

        out[off] = u8::from(self.swap_sticks)
            | u8::from(self.invert_ly) << 1
            | u8::from(self.invert_ry) << 2;
        out[off + 1] = match self.socd {
            SocdMode::Passthrough => 0,
            SocdMode::Neutral => 1,
            SocdMode::UpPriority => 2,
            SocdMode::LastWin => 3,
        };
        out[off + 2] = self.sensitivity[0];
        out[off + 3] = self.sensitivity[2];
        out
    }

    /// Rebuild from the 56-byte persisted layout.
    ///
    /// Unknown enum values clamp to their defaults rather than failing; a
    /// stored profile must never brick the pipeline.
    #[must_use]
    pub fn from_wire(bytes: &[u8; PROFILE_WIRE_LEN]) -> Self {
        let mut profile = Profile::IDENTITY;
        profile.name.copy_from_slice(&bytes[..8]);

        let mut maps = 0;
        for (i, &bit) in BUTTON_BITS.iter().enumerate() {
            let target = match bytes[8 + i] {
                0xFF => continue,
                0 => MapTarget::Drop,
                idx => {
                    let t = Buttons::from_index(idx as usize - 1);
                    if t == Buttons::NONE {
                        continue;
                    }
                    MapTarget::To(t)
                }
            };
            if maps < MAX_MAP_ENTRIES {
                profile.button_map[maps] = Some(MapEntry { input: bit, target });
                maps += 1;
            }
        }

        let mut off = 26;
        for slot in profile.combos.iter_mut() {
            let pattern = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            let emit = bytes[off + 4];
            if pattern != 0 && emit != 0 {
                *slot = Some(Combo {
                    pattern: Buttons(pattern),
                    emit: Buttons::from_index(emit as usize - 1),
                });
            }
            off += 5;
        }

        for t in profile.triggers.iter_mut() {
            t.mode = match bytes[off] {
                1 => TriggerMode::DigitalOnly,
                2 => TriggerMode::AnalogOnly,
                3 => TriggerMode::FixedOnPress,
                _ => TriggerMode::Hybrid,
            };
            t.threshold = bytes[off + 1];
            t.fixed = bytes[off + 2];
            off += 3;
        }

        let flags = bytes[off];
        profile.swap_sticks = flags & 1 != 0;
        profile.invert_ly = flags & 2 != 0;
        profile.invert_ry = flags & 4 != 0;
        profile.socd = match bytes[off + 1] {
            1 => SocdMode::Neutral,
            2 => SocdMode::UpPriority,
            3 => SocdMode::LastWin,
            _ => SocdMode::Passthrough,
        };
        profile.sensitivity = [
            bytes[off + 2],
            bytes[off + 2],
            bytes[off + 3],
            bytes[off + 3],
        ];
        profile
    }

    fn map_target(&self, input: Buttons) -> MapTarget {
        for entry in self.button_map.iter().flatten() {
            if entry.input == input {
                return entry.target;
            }
        }
        MapTarget::Passthrough
    }
}

/// Result of applying a profile to one routed event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProfileOutput {
    pub buttons: Buttons,
    pub analog: [u8; AXIS_COUNT],
    pub l2_digital: bool,
    pub r2_digital: bool,
}

/// Run the five passes in strict order: combos, button remap, trigger
/// behaviour, analog shape, SOCD cleaning.
#[must_use]
pub fn apply(
    profile: &Profile,
    buttons: Buttons,
    analog: &[u8; AXIS_COUNT],
    socd: &mut SocdMemory,
) -> ProfileOutput {
    // 1. Combo pass: matching combos OR their emit bits together.
    let mut out = Buttons::NONE;
    for combo in profile.combos.iter().flatten() {
        if buttons.contains(combo.pattern) {
            out |= combo.emit;
        }
    }

    // 2. Button remap over the input bits; unmapped bits pass through.
    for &bit in &BUTTON_BITS {
        if !buttons.contains(bit) {
            continue;
        }
        match profile.map_target(bit) {
            MapTarget::Passthrough => out |= bit,
            MapTarget::Drop => {}
            MapTarget::To(target) => out |= target,
        }
    }

    // 3. Trigger behaviour.
    let mut shaped = *analog;
    for (i, (axis, bit)) in [(Axis::L2, Buttons::L2), (Axis::R2, Buttons::R2)]
        .into_iter()
        .enumerate()
    {
        let behavior = profile.triggers[i];
        let value = shaped[axis as usize];
        match behavior.mode {
            TriggerMode::Hybrid => {}
            TriggerMode::DigitalOnly => {
                shaped[axis as usize] = 0;
                if value >= behavior.threshold {
                    out |= bit;
                }
            }
            TriggerMode::AnalogOnly => {
                out.set(bit, false);
            }
            TriggerMode::FixedOnPress => {
                if out.contains(bit) {
                    shaped[axis as usize] = behavior.fixed;
                }
            }
        }
    }

    // 4. Analog shape: swap, invert, sensitivity.
    if profile.swap_sticks {
        shaped.swap(Axis::Lx as usize, Axis::Rx as usize);
        shaped.swap(Axis::Ly as usize, Axis::Ry as usize);
    }
    if profile.invert_ly {
        shaped[Axis::Ly as usize] = 255 - shaped[Axis::Ly as usize];
    }
    if profile.invert_ry {
        shaped[Axis::Ry as usize] = 255 - shaped[Axis::Ry as usize];
    }
    for (i, axis) in [Axis::Lx, Axis::Ly, Axis::Rx, Axis::Ry].into_iter().enumerate() {
        shaped[axis as usize] = scale_axis(shaped[axis as usize], profile.sensitivity[i]);
    }

    // 5. SOCD cleaning on the d-pad.
    let cleaned = clean_socd(profile.socd, out, socd);

    ProfileOutput {
        buttons: cleaned,
        analog: shaped,
        l2_digital: cleaned.contains(Buttons::L2),
        r2_digital: cleaned.contains(Buttons::R2),
    }
}

fn scale_axis(value: u8, sensitivity: u8) -> u8 {
    if sensitivity == 100 {
        return value;
    }
    let offset = i32::from(value) - i32::from(AXIS_CENTER);
    let scaled = i32::from(AXIS_CENTER) + offset * i32::from(sensitivity) / 100;
    scaled.clamp(0, 255) as u8
}

fn clean_socd(mode: SocdMode, buttons: Buttons, memory: &mut SocdMemory) -> Buttons {
    // Track new presses for last-win before resolving.
    let pressed = buttons & !memory.prev;
    if pressed.intersects(Buttons::DPAD_LEFT) {
        memory.lr_last = Buttons::DPAD_LEFT;
    }
    if pressed.intersects(Buttons::DPAD_RIGHT) {
        memory.lr_last = Buttons::DPAD_RIGHT;
    }
    if pressed.intersects(Buttons::DPAD_UP) {
        memory.ud_last = Buttons::DPAD_UP;
    }
    if pressed.intersects(Buttons::DPAD_DOWN) {
        memory.ud_last = Buttons::DPAD_DOWN;
    }
    memory.prev = buttons;

    let mut out = buttons;
    let lr = Buttons::DPAD_LEFT | Buttons::DPAD_RIGHT;
    let ud = Buttons::DPAD_UP | Buttons::DPAD_DOWN;
    match mode {
        SocdMode::Passthrough => {}
        SocdMode::Neutral => {
            if out.contains(lr) {
                out &= !lr;
            }
            if out.contains(ud) {
                out &= !ud;
            }
        }
        SocdMode::UpPriority => {
            if out.contains(ud) {
                out.set(Buttons::DPAD_DOWN, false);
            }
            if out.contains(lr) {
                out &= !lr;
            }
        }
        SocdMode::LastWin => {
            if out.contains(lr) {
                out &= !lr;
                out |= memory.lr_last;
            }
            if out.contains(ud) {
                out &= !ud;
                out |= memory.ud_last;
            }
        }
    }
    out
}

/// Profiles bound to one output target, with a designated default.
#[derive(Clone, Copy)]
pub struct ProfileSet {
    pub profiles: &'static [Profile],
    pub default_index: usize,
    /// Held-then-released combo that cycles to the next profile.
    pub switch_combo: Buttons,
}

impl ProfileSet {
    pub const DEFAULT_SWITCH_COMBO: Buttons = Buttons(Buttons::S1.0 | Buttons::DPAD_UP.0);
}

/// Hold duration before the switch combo arms.
pub const SWITCH_HOLD_MS: u64 = 400;

/// Maximum user-defined profiles appended to a set.
pub const MAX_CUSTOM_PROFILES: usize = 4;

#[derive(Clone, Copy, Default)]
struct ComboTracker {
    held_since: Option<u64>,
    /// Buttons outside the combo at arm time; any change disarms.
    other: Buttons,
    disarmed: bool,
}

/// Per-target profile selection and the combo-to-switch tracker.
pub struct ProfileService {
    sets: [Option<ProfileSet>; OutputTarget::COUNT],
    active: [usize; OutputTarget::COUNT],
    custom: [Option<Profile>; MAX_CUSTOM_PROFILES],
    trackers: [ComboTracker; OutputTarget::COUNT],
    config_errors: u32,
}

impl ProfileService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: [None; OutputTarget::COUNT],
            active: [0; OutputTarget::COUNT],
            custom: [None; MAX_CUSTOM_PROFILES],
            trackers: [ComboTracker::default(); OutputTarget::COUNT],
            config_errors: 0,
        }
    }

    /// Bind a profile set to a target and select its default.
    pub fn init(&mut self, target: OutputTarget, set: ProfileSet) {
        self.active[target as usize] = set.default_index.min(set.profiles.len().saturating_sub(1));
        self.sets[target as usize] = Some(set);
    }

    /// Install user-defined profiles from the settings store.
    ///
    /// They append to every set, after the built-ins.
    pub fn set_custom(&mut self, profiles: &[Profile]) {
        self.custom = [None; MAX_CUSTOM_PROFILES];
        for (slot, p) in self.custom.iter_mut().zip(profiles.iter()) {
            *slot = Some(*p);
        }
    }

    /// Total selectable profiles for a target.
    #[must_use]
    pub fn count(&self, target: OutputTarget) -> usize {
        let built_in = self.sets[target as usize].map_or(0, |s| s.profiles.len());
        built_in + self.custom.iter().flatten().count()
    }

    /// The profile a sink must apply right now.
    ///
    /// Falls back to the identity profile for an unconfigured target.
    #[must_use]
    pub fn get_active(&self, target: OutputTarget) -> &Profile {
        let index = self.active[target as usize];
        self.profile_at(target, index).unwrap_or(&Profile::IDENTITY)
    }

    #[must_use]
    pub fn active_index(&self, target: OutputTarget) -> usize {
        self.active[target as usize]
    }

    /// Select a profile; out-of-range requests clamp to the default.
    pub fn set_active(&mut self, target: OutputTarget, index: usize) {
        if self.profile_at(target, index).is_some() {
            self.active[target as usize] = index;
        } else {
            self.config_errors = self.config_errors.wrapping_add(1);
            #[cfg(feature = "defmt")]
            defmt::warn!("profile index {} out of range, keeping default", index);
            self.active[target as usize] = self.sets[target as usize]
                .map_or(0, |s| s.default_index);
        }
    }

    pub fn cycle_next(&mut self, target: OutputTarget) {
        let count = self.count(target);
        if count > 0 {
            self.active[target as usize] = (self.active[target as usize] + 1) % count;
        }
    }

    pub fn cycle_prev(&mut self, target: OutputTarget) {
        let count = self.count(target);
        if count > 0 {
            self.active[target as usize] =
                (self.active[target as usize] + count - 1) % count;
        }
    }

    /// Feed the current button state to the combo-to-switch tracker.
    ///
    /// Returns `true` when a switch fired (combo released after being held
    /// at least [`SWITCH_HOLD_MS`] with no other input changes).
    pub fn combo_tick(&mut self, target: OutputTarget, buttons: Buttons, now_ms: u64) -> bool {
        let Some(set) = self.sets[target as usize] else {
            return false;
        };
        let combo = set.switch_combo;
        let tracker = &mut self.trackers[target as usize];
        let other = buttons & !combo;

        if buttons.contains(combo) {
            match tracker.held_since {
                None => {
                    tracker.held_since = Some(now_ms);
                    tracker.other = other;
                    tracker.disarmed = false;
                }
                Some(_) if other != tracker.other => tracker.disarmed = true,
                Some(_) => {}
            }
            false
        } else if let Some(since) = tracker.held_since.take() {
            let fired = !tracker.disarmed && now_ms.saturating_sub(since) >= SWITCH_HOLD_MS;
            if fired {
                self.cycle_next(target);
            }
            fired
        } else {
            false
        }
    }

    fn profile_at(&self, target: OutputTarget, index: usize) -> Option<&Profile> {
        let set = self.sets[target as usize].as_ref()?;
        if index < set.profiles.len() {
            set.profiles.get(index)
        } else {
            self.custom
                .iter()
                .flatten()
                .nth(index - set.profiles.len())
        }
    }
}

impl Default for ProfileService {
    fn default() -> Self {
        Self::new()
    }
}
