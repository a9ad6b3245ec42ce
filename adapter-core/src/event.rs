//! The universal controller snapshot passed between layers.
//!
//! Every input driver decodes its vendor report into an [`InputEvent`] and
//! submits it to the router. The event is allocated on the driver's stack,
//! copied into the router's slot, and never referenced after `submit`
//! returns.

use crate::buttons::Buttons;

/// Analog axis indices into [`InputEvent::analog`].
///
/// Unsigned 8-bit convention: 128 = stick centre, 0 = trigger released,
/// Y axes grow downward (0 = up).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum Axis {
    Lx = 0,
    Ly = 1,
    Rx = 2,
    Ry = 3,
    L2 = 4,
    R2 = 5,
    /// Twist / extra axis, centre-relative like the sticks.
    Rz = 6,
}

/// Number of analog axes carried by an event.
pub const AXIS_COUNT: usize = 7;

/// Centre value for stick axes.
pub const AXIS_CENTER: u8 = 128;

/// Transport the originating device arrived over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transport {
    Usb,
    Bt,
    Native,
    Wifi,
}

/// What kind of device produced the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    #[default]
    None,
    Gamepad,
    Mouse,
    Keyboard,
}

/// Device-address namespace (see the routing layer for how addresses map to
/// source classes).
pub mod addr {
    /// First USB host address.
    pub const USB_FIRST: u8 = 0x01;
    /// Last USB host address.
    pub const USB_LAST: u8 = 0x1F;
    /// Base address for native joybus ports and wireless slots.
    pub const NATIVE_BASE: u8 = 0xE0;
    /// Last native/wireless address.
    pub const NATIVE_LAST: u8 = 0xEF;

    /// Address of wireless controller `slot`.
    #[inline]
    #[must_use]
    pub const fn wireless(slot: u8) -> u8 {
        NATIVE_BASE + slot
    }
}

/// A normalised controller snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InputEvent {
    /// Originating device address (see [`addr`]).
    pub dev_addr: u8,
    /// Interface instance on the device (composite devices).
    pub instance: u8,
    pub transport: Transport,
    pub kind: EventKind,
    /// 32-bit logical button mask.
    pub buttons: Buttons,
    /// Analog axes, indexed by [`Axis`].
    pub analog: [u8; AXIS_COUNT],
    /// Keyboard keys bitmap for keyboard-capable sources.
    pub keys: u32,
    /// Monotonic per-driver sequence counter.
    pub seq: u32,
}

impl InputEvent {
    /// A neutral gamepad event from the given device.
    #[must_use]
    pub const fn neutral(dev_addr: u8, instance: u8, transport: Transport) -> Self {
        Self {
            dev_addr,
            instance,
            transport,
            kind: EventKind::Gamepad,
            buttons: Buttons::NONE,
            analog: [
                AXIS_CENTER,
                AXIS_CENTER,
                AXIS_CENTER,
                AXIS_CENTER,
                0,
                0,
                AXIS_CENTER,
            ],
            keys: 0,
            seq: 0,
        }
    }

    /// Read one analog axis.
    #[inline]
    #[must_use]
    pub const fn axis(&self, axis: Axis) -> u8 {
        self.analog[axis as usize]
    }

    /// Write one analog axis.
    #[inline]
    pub fn set_axis(&mut self, axis: Axis, value: u8) {
        self.analog[axis as usize] = value;
    }
}
