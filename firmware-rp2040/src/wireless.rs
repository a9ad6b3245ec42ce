//! Wireless controller intake over the UDP protocol.
//!
//! The network stack (AP setup, sockets) lives outside this module; it
//! pushes raw datagrams into [`DatagramChannel`] and drains
//! [`CommandChannel`] onto the TCP control connections. This module owns
//! the protocol work: parse, dedup, mount bookkeeping, feedback commands
//! under the per-controller rate gate.

use adapter_core::{addr, Feedback, Pipeline};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use jocp_proto::{
    parse_datagram, Command, Datagram, Header, MsgType, RateGate, COMMAND_MAX_LEN, HEADER_LEN,
    INPUT_LEN,
};

/// Largest datagram the intake accepts.
pub const DATAGRAM_MAX: usize = HEADER_LEN + INPUT_LEN;

/// Raw received datagrams, produced by the socket task.
pub type DatagramChannel = Channel<CriticalSectionRawMutex, Vec<u8, DATAGRAM_MAX>, 8>;

/// Serialised command messages, consumed by the socket task. The first
/// element is the destination controller id.
pub type CommandChannel = Channel<CriticalSectionRawMutex, (u8, Vec<u8, COMMAND_MAX_LEN>), 4>;

/// Protocol-side state of the wireless intake.
pub struct WirelessPort {
    gate: RateGate,
    /// Last seen header sequence per controller slot, for stale drops.
    last_seq: [Option<u32>; 4],
    seq_out: u16,
    bad_datagrams: u32,
}

impl WirelessPort {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: RateGate::new(),
            last_seq: [None; 4],
            seq_out: 0,
            bad_datagrams: 0,
        }
    }

    /// Feed one received datagram into the pipeline.
    pub fn on_datagram(&mut self, data: &[u8], pipeline: &mut Pipeline<'_>, now_ms: u64) {
        let datagram = match parse_datagram(data) {
            Ok(d) => d,
            Err(_e) => {
                self.bad_datagrams = self.bad_datagrams.wrapping_add(1);
                defmt::debug!("bad wireless datagram: {:?}", _e);
                return;
            }
        };
        match datagram {
            Datagram::Hello { controller_id } => {
                pipeline
                    .players
                    .on_mount(addr::wireless(controller_id), 0, now_ms);
            }
            Datagram::Input {
                event,
                controller_id,
                ..
            } => {
                let slot = usize::from(controller_id);
                if let Some(last) = self.last_seq.get(slot).copied().flatten() {
                    // Drop reordered datagrams; a large gap means the
                    // counter restarted with the controller.
                    if event.seq <= last && last - event.seq < 0x8000 {
                        return;
                    }
                }
                if let Some(entry) = self.last_seq.get_mut(slot) {
                    *entry = Some(event.seq);
                }
                pipeline
                    .players
                    .on_activity(event.dev_addr, 0, !event.buttons.is_empty(), now_ms);
                pipeline.players.on_mount(event.dev_addr, 0, now_ms);
                let players = &pipeline.players;
                pipeline.router.submit(&event, players);
            }
        }
    }

    /// Push pending feedback for one controller as protocol commands.
    pub fn flush_feedback(
        &mut self,
        controller_id: u8,
        feedback: &Feedback,
        commands: &CommandChannel,
        now_ms: u64,
        timestamp_us: u32,
    ) {
        if !self.gate.try_send(controller_id, now_ms) {
            return;
        }
        self.seq_out = self.seq_out.wrapping_add(1);
        let header = Header::new(MsgType::Command, self.seq_out, timestamp_us);
        let command = Command::Rumble {
            left: feedback.rumble_left,
            right: feedback.rumble_right,
            duration_ms: 200,
        };
        let mut buf: Vec<u8, COMMAND_MAX_LEN> = Vec::new();
        buf.resize_default(COMMAND_MAX_LEN).ok();
        let len = command.write(&header, &mut buf);
        buf.truncate(len);
        if commands.try_send((controller_id, buf)).is_err() {
            defmt::debug!("command channel full");
        }
    }

    /// Datagrams dropped as malformed.
    #[must_use]
    pub const fn bad_datagrams(&self) -> u32 {
        self.bad_datagrams
    }
}

impl Default for WirelessPort {
    fn default() -> Self {
        Self::new()
    }
}
