//! Transition-table decoder for the capture stream.
//!
//! The I/O front-end delivers one byte per four bus edges (2-bit line state
//! each, low pair first). Decoding runs on the real-time worker, so the hot
//! loop is a single table lookup per capture byte: a 40-state base machine
//! is composed at init into `M[state][capture_byte]`, each entry carrying
//! the next state plus push/end/error flags and an interned 2-byte patch for
//! the bits sampled inside that capture byte.
//!
//! Base machine layout:
//! - states 0..=10 match the start pattern;
//! - states 11..=34 consume data bits, three states per bit
//!   (wait-clock-rise, setup-0, setup-1), MSB first;
//! - states 35..=39 match the end pattern, End firing on entry to 39.
//!
//! Invalid transitions land in error recovery: the partial packet is
//! dropped, a counter bumps, and matching resumes from state 0.

use crate::packet::{xor_crc, MaplePacket, MAX_FRAME_LEN};

use heapless::Vec;

/// Number of base-machine states.
pub const STATE_COUNT: usize = 40;

/// Capacity of the patch interning table.
const PATCH_MAX: usize = 64;

const START_SYNCED: u8 = 10;
const END_FIRST: u8 = 35;
const END_LAST: u8 = 39;

const fn waitclk(bit: u8) -> u8 {
    11 + 3 * bit
}
const fn setup0(bit: u8) -> u8 {
    12 + 3 * bit
}
const fn setup1(bit: u8) -> u8 {
    13 + 3 * bit
}

#[derive(Clone, Copy, Default)]
struct BaseStep {
    next: u8,
    /// Bit ORed into the accumulating byte by this edge.
    set_mask: u8,
    /// Commit the accumulated byte.
    push: bool,
    end: bool,
    error: bool,
}

fn base_step(state: u8, s: u8) -> BaseStep {
    let a = (s >> 1) & 1;
    let b = s & 1;

    let stay = BaseStep {
        next: state,
        ..Default::default()
    };
    let goto = |next: u8| BaseStep {
        next,
        ..Default::default()
    };
    let error = BaseStep {
        next: 0,
        error: true,
        ..Default::default()
    };

    match state {
        // Idle: anything but the start edge is ignored noise.
        0 => {
            if s == 0b01 {
                goto(1)
            } else {
                stay
            }
        }
        // Start pattern: A low, B pulsing. Odd states rest at (0,1), even
        // at (0,0).
        1..=9 => {
            let resting = if state % 2 == 1 { 0b01 } else { 0b00 };
            let advance = if state % 2 == 1 { 0b00 } else { 0b01 };
            if s == resting {
                stay
            } else if state == 9 && s == 0b11 {
                goto(START_SYNCED)
            } else if state != 9 && s == advance {
                goto(state + 1)
            } else {
                error
            }
        }
        // Synced at a byte boundary, lines high: identical to setup-1 of
        // bit 0.
        START_SYNCED => data_step(0, true, a, b),
        11..=34 => {
            let bit = (state - 11) / 3;
            match (state - 11) % 3 {
                0 => {
                    // wait-clock-rise; data parked low.
                    let (c, d) = clock_data(bit, a, b);
                    match (c, d) {
                        (0, 0) => stay,
                        // A data edge while the clock is low announces the
                        // end pattern; legal only at the byte boundary.
                        (0, 1) => {
                            if bit == 1 {
                                goto(END_FIRST)
                            } else {
                                error
                            }
                        }
                        (1, 0) => goto(setup0(bit)),
                        _ => error,
                    }
                }
                1 => data_step(bit, false, a, b),
                _ => data_step(bit, true, a, b),
            }
        }
        // End pattern: A pulsing with B low, resting states alternate
        // (1,0) and (0,0).
        END_FIRST..=END_LAST => {
            let resting = if (state - END_FIRST) % 2 == 0 { 0b10 } else { 0b00 };
            let advance = if resting == 0b10 { 0b00 } else { 0b10 };
            if s == resting {
                stay
            } else if state == END_LAST && s == 0b11 {
                goto(0)
            } else if state < END_LAST && s == advance {
                BaseStep {
                    next: state + 1,
                    end: state + 1 == END_LAST,
                    ..Default::default()
                }
            } else {
                error
            }
        }
        _ => error,
    }
}

/// Setup states: clock high, data at `high`. A clock fall samples the held
/// data value.
fn data_step(bit: u8, high: bool, a: u8, b: u8) -> BaseStep {
    let (c, d) = clock_data(bit, a, b);
    let held = u8::from(high);
    let error = BaseStep {
        next: 0,
        error: true,
        ..Default::default()
    };

    if c == 1 {
        // Data setup is free while the clock is high.
        return BaseStep {
            next: if d == 1 { setup1(bit) } else { setup0(bit) },
            ..Default::default()
        };
    }
    if d != held {
        // Data moved on the very clock edge.
        return error;
    }
    // Sample. The sampled value decides the entry state of the next bit:
    // its clock line is this bit's data line.
    let last = bit == 7;
    let next_bit = if last { 0 } else { bit + 1 };
    BaseStep {
        next: if d == 1 { setup0(next_bit) } else { waitclk(next_bit) },
        set_mask: if d == 1 { 1 << (7 - bit) } else { 0 },
        push: last,
        end: false,
        error: false,
    }
}

/// Map raw line levels onto (clock, data) for a bit index.
fn clock_data(bit: u8, a: u8, b: u8) -> (u8, u8) {
    if bit % 2 == 0 {
        (a, b)
    } else {
        (b, a)
    }
}

/// One composed table entry.
///
/// Packing: bits 0..=5 next state, 6 push, 7 end, 8 error, 9 reset,
/// 10..=15 patch-table index.
#[derive(Clone, Copy, Default)]
pub struct Entry(u16);

impl Entry {
    fn new(next: u8, push: bool, end: bool, error: bool, reset: bool, patch: usize) -> Self {
        debug_assert!((next as usize) < STATE_COUNT);
        debug_assert!(patch < PATCH_MAX);
        Self(
            u16::from(next)
                | u16::from(push) << 6
                | u16::from(end) << 7
                | u16::from(error) << 8
                | u16::from(reset) << 9
                | (patch as u16) << 10,
        )
    }

    #[inline]
    pub fn next(self) -> u8 {
        (self.0 & 0x3F) as u8
    }
    #[inline]
    pub fn push(self) -> bool {
        self.0 & 1 << 6 != 0
    }
    #[inline]
    pub fn end(self) -> bool {
        self.0 & 1 << 7 != 0
    }
    #[inline]
    pub fn error(self) -> bool {
        self.0 & 1 << 8 != 0
    }
    #[inline]
    pub fn reset(self) -> bool {
        self.0 & 1 << 9 != 0
    }
    #[inline]
    fn patch(self) -> usize {
        (self.0 >> 10) as usize
    }
}

/// The composed `M[state][capture_byte]` table plus the patch interning
/// table. Built once at init; read-only afterwards, so it can be shared
/// with the real-time worker.
pub struct TransitionTable {
    m: [[Entry; 256]; STATE_COUNT],
    patches: Vec<(u8, u8), PATCH_MAX>,
}

impl TransitionTable {
    #[must_use]
    pub fn new() -> Self {
        let mut patches: Vec<(u8, u8), PATCH_MAX> = Vec::new();
        // Index 0 is the empty patch.
        patches.push((0, 0)).ok();

        let mut m = [[Entry::default(); 256]; STATE_COUNT];
        for state in 0..STATE_COUNT {
            for byte in 0..=255u8 {
                m[state][byte as usize] = Self::compose(state as u8, byte, &mut patches);
            }
        }
        Self { m, patches }
    }

    /// Walk the four packed transitions of one capture byte through the
    /// base machine.
    fn compose(state: u8, byte: u8, patches: &mut Vec<(u8, u8), PATCH_MAX>) -> Entry {
        let mut cur = state;
        let mut cur_mask = 0u8;
        let mut next_mask = 0u8;
        let mut pushed = false;
        let mut end = false;
        let mut error = false;

        for t in 0..4 {
            let s = (byte >> (t * 2)) & 0b11;
            let step = base_step(cur, s);
            cur = step.next;
            if step.error {
                // Drop anything accumulated this window; matching resumes
                // from idle on the remaining transitions.
                cur_mask = 0;
                next_mask = 0;
                pushed = false;
                error = true;
                continue;
            }
            if step.push {
                debug_assert!(!pushed, "two byte commits in one capture byte");
                cur_mask |= step.set_mask;
                pushed = true;
            } else if pushed {
                next_mask |= step.set_mask;
            } else {
                cur_mask |= step.set_mask;
            }
            if step.end {
                end = true;
            }
        }

        let patch = Self::intern(patches, (cur_mask, next_mask));
        Entry::new(cur, pushed, end, error, error, patch)
    }

    fn intern(patches: &mut Vec<(u8, u8), PATCH_MAX>, patch: (u8, u8)) -> usize {
        if let Some(i) = patches.iter().position(|&p| p == patch) {
            return i;
        }
        patches.push(patch).expect("patch table exhausted");
        patches.len() - 1
    }

    #[inline]
    fn lookup(&self, state: u8, capture: u8) -> (Entry, (u8, u8)) {
        let entry = self.m[state as usize][capture as usize];
        (entry, self.patches[entry.patch()])
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming decoder state fed by the real-time worker.
pub struct MapleDecoder {
    table: TransitionTable,
    state: u8,
    acc: u8,
    frame: Vec<u8, MAX_FRAME_LEN>,
    errors: u32,
    crc_errors: u32,
    frame_errors: u32,
}

impl MapleDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: TransitionTable::new(),
            state: 0,
            acc: 0,
            frame: Vec::new(),
            errors: 0,
            crc_errors: 0,
            frame_errors: 0,
        }
    }

    /// Consume one capture byte; returns a CRC-valid packet on frame end.
    pub fn feed(&mut self, capture: u8) -> Option<MaplePacket> {
        let (entry, (cur_mask, next_mask)) = self.table.lookup(self.state, capture);
        self.state = entry.next();

        if entry.error() {
            self.errors = self.errors.wrapping_add(1);
            self.frame.clear();
            self.acc = 0;
            return None;
        }

        self.acc |= cur_mask;
        if entry.push() {
            if self.frame.push(self.acc).is_err() {
                // Oversized frame: treat like a line error and resync.
                self.errors = self.errors.wrapping_add(1);
                self.frame.clear();
                self.state = 0;
            }
            self.acc = next_mask;
        }

        if entry.end() {
            let result = if xor_crc(&self.frame) == 0 {
                match MaplePacket::parse(&self.frame) {
                    Ok(pkt) => Some(pkt),
                    Err(_) => {
                        self.frame_errors = self.frame_errors.wrapping_add(1);
                        None
                    }
                }
            } else {
                self.crc_errors = self.crc_errors.wrapping_add(1);
                None
            };
            self.frame.clear();
            self.acc = 0;
            return result;
        }
        None
    }

    /// Line-protocol violations since init.
    #[must_use]
    pub const fn errors(&self) -> u32 {
        self.errors
    }

    /// Frames dropped on checksum.
    #[must_use]
    pub const fn crc_errors(&self) -> u32 {
        self.crc_errors
    }

    /// Frames dropped on header/length validation.
    #[must_use]
    pub const fn frame_errors(&self) -> u32 {
        self.frame_errors
    }
}

impl Default for MapleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{function, Command, MAX_FRAME_LEN};
    use crate::wire::encode_frame;

    fn feed_all(decoder: &mut MapleDecoder, captures: &[u8]) -> Option<MaplePacket> {
        let mut result = None;
        for &c in captures {
            if let Some(pkt) = decoder.feed(c) {
                assert!(result.is_none(), "more than one packet decoded");
                result = Some(pkt);
            }
        }
        result
    }

    fn condition_request_frame() -> ([u8; MAX_FRAME_LEN], usize) {
        let mut pkt = MaplePacket::new(Command::GetCondition, 0x20, 0x00);
        pkt.push_word(function::CONTROLLER).unwrap();
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = pkt.build(&mut buf).unwrap();
        (buf, len)
    }

    #[test]
    fn test_decode_round_trips_encoded_frame() {
        let (frame, len) = condition_request_frame();
        let mut captures = [0u8; 512];
        let clen = encode_frame(&frame[..len], &mut captures).unwrap();

        let mut decoder = MapleDecoder::new();
        let pkt = feed_all(&mut decoder, &captures[..clen]).expect("no packet");
        assert_eq!(pkt.command, Command::GetCondition);
        assert_eq!(pkt.destination, 0x20);
        assert_eq!(pkt.function(), Some(function::CONTROLLER));
        assert_eq!(decoder.errors(), 0);
        assert_eq!(decoder.crc_errors(), 0);
    }

    #[test]
    fn test_decode_all_byte_values() {
        // A payload exercising every bit pattern boundary.
        let mut pkt = MaplePacket::new(Command::BlockWrite, 0x20, 0x00);
        for w in [0x0000_0000u32, 0xFFFF_FFFF, 0xA5C3_0F69, 0x8000_0001] {
            pkt.push_word(w).unwrap();
        }
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = pkt.build(&mut frame).unwrap();

        let mut captures = [0u8; 1024];
        let clen = encode_frame(&frame[..len], &mut captures).unwrap();
        let mut decoder = MapleDecoder::new();
        let back = feed_all(&mut decoder, &captures[..clen]).expect("no packet");
        assert_eq!(back, pkt);
    }

    #[test]
    fn test_back_to_back_frames() {
        let (frame, len) = condition_request_frame();
        let mut captures = [0u8; 512];
        let clen = encode_frame(&frame[..len], &mut captures).unwrap();

        let mut decoder = MapleDecoder::new();
        assert!(feed_all(&mut decoder, &captures[..clen]).is_some());
        assert!(feed_all(&mut decoder, &captures[..clen]).is_some());
        assert_eq!(decoder.errors(), 0);
    }

    #[test]
    fn test_corrupt_crc_dropped_and_counted() {
        let (mut frame, len) = condition_request_frame();
        frame[len - 1] ^= 0xFF;
        let mut captures = [0u8; 512];
        let clen = encode_frame(&frame[..len], &mut captures).unwrap();

        let mut decoder = MapleDecoder::new();
        assert!(feed_all(&mut decoder, &captures[..clen]).is_none());
        assert_eq!(decoder.crc_errors(), 1);
    }

    #[test]
    fn test_garbage_recovers_to_next_frame() {
        let (frame, len) = condition_request_frame();
        let mut captures = [0u8; 512];
        let clen = encode_frame(&frame[..len], &mut captures).unwrap();

        let mut decoder = MapleDecoder::new();
        // Mid-packet line garbage.
        for &junk in &captures[..clen / 2] {
            decoder.feed(junk);
        }
        for junk in [0b11_00_11_00u8, 0b01_10_01_10] {
            decoder.feed(junk);
        }
        let errors = decoder.errors();
        assert!(errors > 0);

        // A clean frame afterwards still decodes.
        let pkt = feed_all(&mut decoder, &captures[..clen]);
        assert!(pkt.is_some());
    }

    #[test]
    fn test_idle_padding_is_ignored() {
        let mut decoder = MapleDecoder::new();
        for _ in 0..32 {
            assert!(decoder.feed(0b11_11_11_11).is_none());
        }
        assert_eq!(decoder.errors(), 0);

        let (frame, len) = condition_request_frame();
        let mut captures = [0u8; 512];
        let clen = encode_frame(&frame[..len], &mut captures).unwrap();
        assert!(feed_all(&mut decoder, &captures[..clen]).is_some());
    }

    #[test]
    fn test_state_count_and_sections() {
        assert_eq!(STATE_COUNT, 40);
        assert_eq!(waitclk(0), 11);
        assert_eq!(setup1(7), 34);
        assert_eq!(END_FIRST, 35);
        assert_eq!(END_LAST, 39);
    }
}
