//! Event router: fans heterogeneous input sources into per-output,
//! per-player slots.
//!
//! Drivers call [`Router::submit`] with a normalised [`InputEvent`]. The
//! router either delivers the event synchronously to a registered tap (the
//! push fast path used by latency-critical sinks) or stores it in the
//! `(target, player)` slot for pull consumption by the sink's cooperative
//! tick. There is no queue: each source naturally rate-limits to its polling
//! frequency, so the newest state is all that matters.

use crate::event::{addr, Axis, InputEvent, Transport, AXIS_CENTER};
use crate::players::PlayerManager;

use heapless::Vec;

/// Console-side output targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum OutputTarget {
    UsbDevice = 0,
    Dreamcast = 1,
    NeoGeo = 2,
    GameCube = 3,
    XboxOriginal = 4,
}

impl OutputTarget {
    /// Number of output targets.
    pub const COUNT: usize = 5;

    /// Fixed player capacity of the console side.
    #[must_use]
    pub const fn max_players(self) -> usize {
        match self {
            OutputTarget::UsbDevice => 4,
            OutputTarget::Dreamcast => 4,
            OutputTarget::NeoGeo => 1,
            OutputTarget::GameCube => 4,
            OutputTarget::XboxOriginal => 4,
        }
    }
}

/// Hard upper bound on players per target.
pub const MAX_PLAYERS: usize = 4;

/// Maximum number of routing-table entries.
pub const MAX_ROUTES: usize = 16;

/// Source class derived from the device address namespace and transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SourceClass {
    /// USB host devices (0x01..=0x1F).
    Usb,
    /// Bluetooth HID devices (USB address range, `Transport::Bt`).
    Bt,
    /// Native console ports (0xE0..=0xEF).
    Native,
    /// Wireless controllers over the UDP protocol (0xE0 + slot, `Transport::Wifi`).
    Wireless,
}

impl SourceClass {
    /// Classify an event by address range and transport tag.
    #[must_use]
    pub fn of(event: &InputEvent) -> Option<SourceClass> {
        match event.dev_addr {
            a if (addr::USB_FIRST..=addr::USB_LAST).contains(&a) => {
                if event.transport == Transport::Bt {
                    Some(SourceClass::Bt)
                } else {
                    Some(SourceClass::Usb)
                }
            }
            a if (addr::NATIVE_BASE..=addr::NATIVE_LAST).contains(&a) => {
                if event.transport == Transport::Wifi {
                    Some(SourceClass::Wireless)
                } else {
                    Some(SourceClass::Native)
                }
            }
            _ => None,
        }
    }
}

/// Routing mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouterMode {
    /// One source, one target, player resolved by the player manager.
    #[default]
    Simple,
    /// All sources collapse onto player 0 of the target.
    Merge,
    /// Route hints pick the destination player.
    Fanout,
}

/// How concurrent events combine in MERGE mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MergeRule {
    /// Buttons OR, first-divergent-from-centre analog wins, triggers max.
    #[default]
    Blend,
    /// The newest event replaces the slot outright.
    LastWriter,
}

/// Which stick absorbs mouse motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MouseTarget {
    Left,
    #[default]
    Right,
}

/// Mouse-to-analog transform parameters.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseParams {
    /// Counts the accumulated offset decays toward centre each cooperative
    /// tick. 0 disables decay (position-style).
    pub drain: u8,
    pub target: MouseTarget,
}

impl Default for MouseParams {
    fn default() -> Self {
        Self {
            drain: 16,
            target: MouseTarget::Right,
        }
    }
}

/// Router configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouterConfig {
    pub mode: RouterMode,
    pub merge_rule: MergeRule,
    /// Convert mouse events into stick motion.
    pub mouse_to_analog: bool,
    pub mouse: MouseParams,
    /// Clip out-of-range fanout hints to the last player instead of dropping.
    pub fanout_clip: bool,
    /// Targets whose sinks consume-and-hold: a second read with no
    /// intervening submit returns `None`.
    pub consume: [bool; OutputTarget::COUNT],
}

/// A routing-table entry: events from `src` may land on `dst`.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Route {
    pub src: SourceClass,
    pub dst: OutputTarget,
    /// Destination player in FANOUT mode.
    pub player_hint: u8,
}

/// Push-mode subscriber on an output target.
///
/// Delivery happens synchronously inside `submit`, so implementations must
/// be cheap and must not block; a typical firmware tap stores the event in
/// an interior-mutable cell the real-time side reads.
pub trait Tap {
    fn deliver(&self, target: OutputTarget, player: usize, event: &InputEvent);
}

#[derive(Clone, Copy, Default)]
struct OutputSlot {
    event: Option<InputEvent>,
    has_update: bool,
}

#[derive(Clone, Copy, Default)]
struct MouseAccum {
    x: i16,
    y: i16,
}

/// The fan-in/fan-out engine.
pub struct Router<'a> {
    config: RouterConfig,
    routes: Vec<Route, MAX_ROUTES>,
    slots: [[OutputSlot; MAX_PLAYERS]; OutputTarget::COUNT],
    taps: [Option<&'a dyn Tap>; OutputTarget::COUNT],
    tap_exclusive: [bool; OutputTarget::COUNT],
    mouse: MouseAccum,
    /// Distinct (addr, instance) pairs seen per target.
    seen: [Vec<(u8, u8), MAX_PLAYERS>; OutputTarget::COUNT],
    dropped: u32,
}

impl<'a> Router<'a> {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        const NO_TAP: Option<&dyn Tap> = None;
        Self {
            config,
            routes: Vec::new(),
            slots: [[OutputSlot::default(); MAX_PLAYERS]; OutputTarget::COUNT],
            taps: [NO_TAP; OutputTarget::COUNT],
            tap_exclusive: [false; OutputTarget::COUNT],
            mouse: MouseAccum::default(),
            seen: [const { Vec::new() }; OutputTarget::COUNT],
            dropped: 0,
        }
    }

    /// Register a route. Returns `false` when the table is full.
    pub fn add_route(&mut self, src: SourceClass, dst: OutputTarget, player_hint: u8) -> bool {
        self.routes
            .push(Route {
                src,
                dst,
                player_hint,
            })
            .is_ok()
    }

    /// Register a push subscriber; the event is delivered *and* stored.
    pub fn set_tap(&mut self, target: OutputTarget, tap: &'a dyn Tap) {
        self.taps[target as usize] = Some(tap);
        self.tap_exclusive[target as usize] = false;
    }

    /// Register an exclusive push subscriber; delivery bypasses the slot.
    pub fn set_tap_exclusive(&mut self, target: OutputTarget, tap: &'a dyn Tap) {
        self.taps[target as usize] = Some(tap);
        self.tap_exclusive[target as usize] = true;
    }

    /// Number of distinct devices that have landed on `target`.
    #[must_use]
    pub fn get_player_count(&self, target: OutputTarget) -> usize {
        self.seen[target as usize].len()
    }

    /// Events dropped for want of a destination.
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Route one event. See the module docs for the delivery rules.
    pub fn submit(&mut self, event: &InputEvent, players: &PlayerManager) {
        let Some(src) = SourceClass::of(event) else {
            self.dropped = self.dropped.wrapping_add(1);
            return;
        };

        let event = if self.config.mouse_to_analog && event.kind == crate::event::EventKind::Mouse
        {
            self.transform_mouse(event)
        } else {
            *event
        };

        for i in 0..self.routes.len() {
            let route = self.routes[i];
            if route.src != src {
                continue;
            }
            let max = route.dst.max_players().min(MAX_PLAYERS);
            let player = match self.config.mode {
                RouterMode::Simple => {
                    match players.slot_of(event.dev_addr, event.instance) {
                        Some(p) if p < max => p,
                        _ => {
                            self.dropped = self.dropped.wrapping_add(1);
                            continue;
                        }
                    }
                }
                RouterMode::Merge => 0,
                RouterMode::Fanout => {
                    let hint = route.player_hint as usize;
                    if hint < max {
                        hint
                    } else if self.config.fanout_clip {
                        max - 1
                    } else {
                        self.dropped = self.dropped.wrapping_add(1);
                        continue;
                    }
                }
            };
            self.deliver(route.dst, player, &event);
        }
    }

    fn deliver(&mut self, target: OutputTarget, player: usize, event: &InputEvent) {
        self.note_seen(target, event);

        if let Some(tap) = self.taps[target as usize] {
            tap.deliver(target, player, event);
            if self.tap_exclusive[target as usize] {
                return;
            }
        }

        let slot = &mut self.slots[target as usize][player];
        let merged = match (self.config.mode, self.config.merge_rule) {
            (RouterMode::Merge, MergeRule::Blend) if slot.has_update => {
                let mut base = slot.event.unwrap_or(*event);
                blend(&mut base, event);
                base
            }
            _ => *event,
        };
        slot.event = Some(merged);
        slot.has_update = true;
    }

    /// Pull the routed state for `(target, player)`.
    ///
    /// Reading clears the fresh flag but retains the value, so sinks that
    /// poll infrequently keep emitting the last known state. Targets
    /// configured as consume-and-hold instead get `None` until the next
    /// submit.
    pub fn get_output(&mut self, target: OutputTarget, player: usize) -> Option<InputEvent> {
        if player >= MAX_PLAYERS {
            return None;
        }
        let consume = self.config.consume[target as usize];
        let slot = &mut self.slots[target as usize][player];
        let event = slot.event?;
        if slot.has_update {
            slot.has_update = false;
            Some(event)
        } else if consume {
            None
        } else {
            Some(event)
        }
    }

    /// Whether `(target, player)` has a submit pending since the last read.
    #[must_use]
    pub fn has_update(&self, target: OutputTarget, player: usize) -> bool {
        player < MAX_PLAYERS && self.slots[target as usize][player].has_update
    }

    /// Cooperative tick: decay the mouse accumulator toward centre.
    pub fn tick(&mut self) {
        let drain = i16::from(self.config.mouse.drain);
        if drain == 0 {
            return;
        }
        self.mouse.x -= self.mouse.x.clamp(-drain, drain);
        self.mouse.y -= self.mouse.y.clamp(-drain, drain);
    }

    fn transform_mouse(&mut self, event: &InputEvent) -> InputEvent {
        // Mouse deltas arrive offset-binary around the stick centre.
        let dx = i16::from(event.axis(Axis::Lx)) - i16::from(AXIS_CENTER);
        let dy = i16::from(event.axis(Axis::Ly)) - i16::from(AXIS_CENTER);
        self.mouse.x = (self.mouse.x + dx).clamp(-127, 127);
        self.mouse.y = (self.mouse.y + dy).clamp(-127, 127);

        let mut out = *event;
        out.kind = crate::event::EventKind::Gamepad;
        out.analog = InputEvent::neutral(out.dev_addr, out.instance, out.transport).analog;
        let (ax, ay) = match self.config.mouse.target {
            MouseTarget::Left => (Axis::Lx, Axis::Ly),
            MouseTarget::Right => (Axis::Rx, Axis::Ry),
        };
        out.set_axis(ax, (i16::from(AXIS_CENTER) + self.mouse.x) as u8);
        out.set_axis(ay, (i16::from(AXIS_CENTER) + self.mouse.y) as u8);
        out
    }

    fn note_seen(&mut self, target: OutputTarget, event: &InputEvent) {
        let seen = &mut self.seen[target as usize];
        let key = (event.dev_addr, event.instance);
        if !seen.contains(&key) {
            let _ = seen.push(key);
        }
    }
}

/// Analog deadband for BLEND merging: values this close to centre are
/// considered idle and lose to a diverging source.
const BLEND_DEADBAND: u8 = 8;

fn blend(base: &mut InputEvent, new: &InputEvent) {
    base.buttons |= new.buttons;
    base.keys |= new.keys;
    for axis in [Axis::Lx, Axis::Ly, Axis::Rx, Axis::Ry, Axis::Rz] {
        let cur = base.axis(axis);
        let candidate = new.axis(axis);
        if !diverges(cur) && diverges(candidate) {
            base.set_axis(axis, candidate);
        }
    }
    for axis in [Axis::L2, Axis::R2] {
        base.set_axis(axis, base.axis(axis).max(new.axis(axis)));
    }
    base.seq = base.seq.max(new.seq);
}

#[inline]
fn diverges(value: u8) -> bool {
    value.abs_diff(AXIS_CENTER) > BLEND_DEADBAND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::Buttons;
    use crate::event::{EventKind, Transport};
    use crate::players::{PlayerManager, PlayerPolicy};

    extern crate std;
    use std::cell::RefCell;
    use std::vec::Vec as StdVec;

    fn usb_event(addr: u8) -> InputEvent {
        InputEvent::neutral(addr, 0, Transport::Usb)
    }

    fn simple_router() -> (Router<'static>, PlayerManager) {
        let mut router = Router::new(RouterConfig::default());
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let mut players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);
        players.on_mount(0x01, 0, 0);
        (router, players)
    }

    #[test]
    fn test_simple_round_trip() {
        let (mut router, players) = simple_router();
        let mut ev = usb_event(0x01);
        ev.buttons = Buttons::B1 | Buttons::DPAD_UP;
        ev.set_axis(Axis::Lx, 200);
        router.submit(&ev, &players);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert_eq!(out.buttons, ev.buttons);
        assert_eq!(out.analog, ev.analog);
    }

    #[test]
    fn test_read_retains_value_and_clears_fresh_flag() {
        let (mut router, players) = simple_router();
        router.submit(&usb_event(0x01), &players);

        assert!(router.has_update(OutputTarget::UsbDevice, 0));
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_some());
        assert!(!router.has_update(OutputTarget::UsbDevice, 0));
        // Stale read still returns the held state by default.
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_some());
    }

    #[test]
    fn test_consume_and_hold() {
        let mut config = RouterConfig::default();
        config.consume[OutputTarget::UsbDevice as usize] = true;
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let mut players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);
        players.on_mount(0x01, 0, 0);

        router.submit(&usb_event(0x01), &players);
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_some());
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_none());
    }

    #[test]
    fn test_blend_merge_ors_buttons_and_keeps_divergent_analog() {
        let config = RouterConfig {
            mode: RouterMode::Merge,
            merge_rule: MergeRule::Blend,
            ..Default::default()
        };
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);

        let mut a = usb_event(0x01);
        a.buttons = Buttons::B1;
        a.set_axis(Axis::Lx, 200);
        let mut b = usb_event(0x02);
        b.buttons = Buttons::B2;
        b.set_axis(Axis::Lx, 128);

        router.submit(&a, &players);
        router.submit(&b, &players);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert_eq!(out.buttons, Buttons::B1 | Buttons::B2);
        assert_eq!(out.axis(Axis::Lx), 200);
    }

    #[test]
    fn test_blend_triggers_take_max() {
        let config = RouterConfig {
            mode: RouterMode::Merge,
            ..Default::default()
        };
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);

        let mut a = usb_event(0x01);
        a.set_axis(Axis::L2, 90);
        let mut b = usb_event(0x02);
        b.set_axis(Axis::L2, 40);
        router.submit(&a, &players);
        router.submit(&b, &players);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert_eq!(out.axis(Axis::L2), 90);
    }

    #[test]
    fn test_last_writer_replaces() {
        let config = RouterConfig {
            mode: RouterMode::Merge,
            merge_rule: MergeRule::LastWriter,
            ..Default::default()
        };
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);

        let mut a = usb_event(0x01);
        a.buttons = Buttons::B1;
        let mut b = usb_event(0x02);
        b.buttons = Buttons::B2;
        router.submit(&a, &players);
        router.submit(&b, &players);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert_eq!(out.buttons, Buttons::B2);
    }

    struct RecordingTap {
        delivered: RefCell<StdVec<(OutputTarget, usize, Buttons)>>,
    }

    impl Tap for RecordingTap {
        fn deliver(&self, target: OutputTarget, player: usize, event: &InputEvent) {
            self.delivered
                .borrow_mut()
                .push((target, player, event.buttons));
        }
    }

    #[test]
    fn test_exclusive_tap_bypasses_slot() {
        let tap = RecordingTap {
            delivered: RefCell::new(StdVec::new()),
        };
        let (mut router, players) = {
            let mut router = Router::new(RouterConfig::default());
            router.add_route(SourceClass::Usb, OutputTarget::Dreamcast, 0);
            let mut players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);
            players.on_mount(0x01, 0, 0);
            (router, players)
        };
        router.set_tap_exclusive(OutputTarget::Dreamcast, &tap);

        let mut ev = usb_event(0x01);
        ev.buttons = Buttons::B4;
        router.submit(&ev, &players);

        assert_eq!(
            tap.delivered.borrow().as_slice(),
            &[(OutputTarget::Dreamcast, 0, Buttons::B4)]
        );
        // Exclusive delivery owns the event; nothing lands in the slot.
        assert!(router.get_output(OutputTarget::Dreamcast, 0).is_none());
    }

    #[test]
    fn test_non_exclusive_tap_also_stores() {
        let tap = RecordingTap {
            delivered: RefCell::new(StdVec::new()),
        };
        let mut router = Router::new(RouterConfig::default());
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let mut players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);
        players.on_mount(0x01, 0, 0);
        router.set_tap(OutputTarget::UsbDevice, &tap);

        router.submit(&usb_event(0x01), &players);
        assert_eq!(tap.delivered.borrow().len(), 1);
        assert!(router.get_output(OutputTarget::UsbDevice, 0).is_some());
    }

    #[test]
    fn test_fanout_hint_and_clipping() {
        let config = RouterConfig {
            mode: RouterMode::Fanout,
            fanout_clip: true,
            ..Default::default()
        };
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::GameCube, 2);
        router.add_route(SourceClass::Native, OutputTarget::GameCube, 9);
        let players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);

        router.submit(&usb_event(0x01), &players);
        assert!(router.get_output(OutputTarget::GameCube, 2).is_some());

        let native = InputEvent::neutral(0xE1, 0, Transport::Native);
        router.submit(&native, &players);
        // Hint 9 clips to the last GameCube player.
        assert!(router.get_output(OutputTarget::GameCube, 3).is_some());
    }

    #[test]
    fn test_unrouted_source_is_dropped() {
        let (mut router, players) = simple_router();
        let ev = InputEvent::neutral(0xE0, 0, Transport::Native);
        router.submit(&ev, &players);
        assert!(router.get_output(OutputTarget::Dreamcast, 0).is_none());
    }

    #[test]
    fn test_mouse_transform_accumulates_and_drains() {
        let config = RouterConfig {
            mode: RouterMode::Merge,
            mouse_to_analog: true,
            mouse: MouseParams {
                drain: 16,
                target: MouseTarget::Right,
            },
            ..Default::default()
        };
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);

        let mut ev = usb_event(0x01);
        ev.kind = EventKind::Mouse;
        ev.set_axis(Axis::Lx, 128 + 40); // +40 counts of motion
        router.submit(&ev, &players);

        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        assert_eq!(out.axis(Axis::Rx), 168);
        assert_eq!(out.kind, EventKind::Gamepad);

        router.tick();
        router.tick();
        let mut idle = usb_event(0x01);
        idle.kind = EventKind::Mouse;
        router.submit(&idle, &players);
        let out = router.get_output(OutputTarget::UsbDevice, 0).unwrap();
        // 40 - 2*16 = 8 counts of residual offset.
        assert_eq!(out.axis(Axis::Rx), 136);
    }

    #[test]
    fn test_player_count_tracks_distinct_devices() {
        let config = RouterConfig {
            mode: RouterMode::Merge,
            ..Default::default()
        };
        let mut router = Router::new(config);
        router.add_route(SourceClass::Usb, OutputTarget::UsbDevice, 0);
        let players = PlayerManager::new(PlayerPolicy::Fixed, MAX_PLAYERS, false);

        router.submit(&usb_event(0x01), &players);
        router.submit(&usb_event(0x02), &players);
        router.submit(&usb_event(0x01), &players);
        assert_eq!(router.get_player_count(OutputTarget::UsbDevice), 2);
    }
}
