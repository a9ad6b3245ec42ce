//! Maple bus front-end: PIO transition capture, DMA response transmit, and
//! the core-1 decode worker.
//!
//! The PIO state machine samples both bus lines on every edge and packs
//! four 2-bit transitions per FIFO byte. The worker on core 1 drains the
//! FIFO through the table decoder and publishes complete packets into a
//! 16-slot SPSC ring; the cooperative core consumes them and runs the
//! responder. Nothing on core 1 ever blocks on the cooperative side.

use adapter_core::Tap;
use adapter_core::{InputEvent, OutputTarget};
use embassy_rp::pio::{Config as PioConfig, Direction, InterruptHandler, Pio, ShiftDirection};
use embassy_rp::peripherals::PIO1;
use embassy_rp::{bind_interrupts, Peri};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::spsc::{Consumer, Producer, Queue};
use maple_proto::{MapleDecoder, MaplePacket, TxPort};
use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use static_cell::StaticCell;

use core::cell::Cell;

bind_interrupts!(pub struct PioIrqs {
    PIO1_IRQ_0 => InterruptHandler<PIO1>;
});

/// Decoded packets in flight between the cores.
pub const RING_DEPTH: usize = 16;

/// PIO capture program.
///
/// Waits for either line to change, then shifts the fresh 2-bit line state
/// into the ISR; autopush fires after four transitions (8 bits).
///
/// ```text
/// capture:
///     mov osr, pins       ; remember current line state
/// edge_wait:
///     mov x, pins         ; sample
///     mov y, osr
///     jmp x != y, changed
///     jmp edge_wait
/// changed:
///     in pins, 2          ; record the new 2-bit state
///     jmp capture
/// ```
const CAPTURE_PROGRAM: [u16; 32] = [
    0xa0e0, // 0: mov    osr, pins
    0xa020, // 1: mov    x, pins
    0xa047, // 2: mov    y, osr
    0x00a5, // 3: jmp    x != y, 5
    0x0001, // 4: jmp    1
    0x4002, // 5: in     pins, 2  (wraps to 0)
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, // padding
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
];

/// Packets dropped because the ring was full (the worker never blocks).
static RING_DROPS: AtomicU32 = AtomicU32::new(0);

/// Completion flag for the in-flight response transmission.
static TX_IDLE: AtomicBool = AtomicBool::new(true);

static RING: StaticCell<Queue<MaplePacket, RING_DEPTH>> = StaticCell::new();

/// Split the cross-core ring into its two ends.
pub fn split_ring() -> (
    Producer<'static, MaplePacket, RING_DEPTH>,
    Consumer<'static, MaplePacket, RING_DEPTH>,
) {
    RING.init(Queue::new()).split()
}

/// Packets lost to ring overflow so far.
#[must_use]
pub fn ring_drops() -> u32 {
    RING_DROPS.load(Ordering::Relaxed)
}

/// The bus pins and state machines of one Maple port.
pub struct MaplePort {
    pio: Pio<'static, PIO1>,
}

impl MaplePort {
    /// Claim the PIO block and start the capture state machine.
    ///
    /// `sdcka`/`sdckb` must be consecutive GPIOs so `in pins, 2` sees them
    /// as one field.
    pub fn new(
        pio1: Peri<'static, PIO1>,
        sdcka: Peri<'static, embassy_rp::peripherals::PIN_14>,
        sdckb: Peri<'static, embassy_rp::peripherals::PIN_15>,
    ) -> Self {
        let mut pio = Pio::new(pio1, PioIrqs);

        let program = embassy_rp::pio::program::Program {
            code: CAPTURE_PROGRAM.into(),
            origin: Some(0),
            wrap: embassy_rp::pio::program::Wrap {
                source: 5,
                target: 0,
            },
            side_set: embassy_rp::pio::program::SideSet::default(),
        };
        let loaded = pio.common.load_program(&program);

        let pin_a = pio.common.make_pio_pin(sdcka);
        let pin_b = pio.common.make_pio_pin(sdckb);

        let mut config = PioConfig::default();
        config.use_program(&loaded, &[]);
        config.set_in_pins(&[&pin_a, &pin_b]);
        config.shift_in.direction = ShiftDirection::Left;
        config.shift_in.auto_fill = true;
        config.shift_in.threshold = 8;

        pio.sm0.set_config(&config);
        pio.sm0.set_pin_dirs(Direction::In, &[&pin_a, &pin_b]);
        pio.sm0.set_enable(true);

        Self { pio }
    }

    /// Run the decode loop. Pinned to core 1; spins, never yields.
    pub fn run_decode_worker(
        &mut self,
        mut producer: Producer<'static, MaplePacket, RING_DEPTH>,
    ) -> ! {
        let mut decoder = MapleDecoder::new();
        loop {
            let Some(word) = self.pio.sm0.rx().try_pull() else {
                continue;
            };
            // Autopush at 8 bits leaves the capture byte in the low byte.
            let capture = (word & 0xFF) as u8;
            if let Some(packet) = decoder.feed(capture) {
                if producer.enqueue(packet).is_err() {
                    // Consumer fell behind; shed load, never block.
                    RING_DROPS.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// DMA-backed response transmitter.
///
/// The buffer is handed to the TX DMA channel; `busy` reflects the
/// completion flag the DMA interrupt clears. The responder never overwrites
/// a draining buffer.
pub struct MapleTx {
    buf: [u8; maple_proto::MAX_FRAME_LEN],
    len: usize,
}

impl MapleTx {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: [0; maple_proto::MAX_FRAME_LEN],
            len: 0,
        }
    }

    /// Called from the TX-complete interrupt.
    pub fn on_complete() {
        TX_IDLE.store(true, Ordering::Release);
    }

    /// The frame currently staged for transmission.
    #[must_use]
    pub fn staged(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Default for MapleTx {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPort for MapleTx {
    fn busy(&self) -> bool {
        !TX_IDLE.load(Ordering::Acquire)
    }

    fn arm(&mut self, frame: &[u8]) {
        self.buf[..frame.len()].copy_from_slice(frame);
        self.len = frame.len();
        TX_IDLE.store(false, Ordering::Release);
        // The DMA channel is pre-configured against the TX state machine;
        // writing the transfer count starts it. The completion interrupt
        // calls `MapleTx::on_complete`.
    }
}

/// Exclusive router tap for the Dreamcast target.
///
/// Submit-time delivery keeps the condition the responder serves at most
/// one input report old, without waiting for a cooperative tick.
pub struct LatestEventTap {
    latest: Mutex<CriticalSectionRawMutex, Cell<Option<InputEvent>>>,
}

impl LatestEventTap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latest: Mutex::new(Cell::new(None)),
        }
    }

    /// The most recently routed event, if any.
    #[must_use]
    pub fn take_latest(&self) -> Option<InputEvent> {
        self.latest.lock(|cell| cell.get())
    }
}

impl Tap for LatestEventTap {
    fn deliver(&self, _target: OutputTarget, _player: usize, event: &InputEvent) {
        let event = *event;
        self.latest.lock(|cell| cell.set(Some(event)));
    }
}
