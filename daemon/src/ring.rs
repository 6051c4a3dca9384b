//! Lock-free single-producer / single-consumer frame ring.
//!
//! One ring per worker: the receive thread produces, the worker consumes.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Largest frame a slot can hold (jumbo frames included).
pub const MAX_FRAME: usize = 9216;

/// Number of slots (power of two).
const RING_SIZE: usize = 256;

#[repr(C, align(64))]
struct CacheAligned<T>(T);

struct Slot {
    len: AtomicU32,
    data: UnsafeCell<Box<[u8]>>,
}

pub struct SpscFrameRing {
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    slots: Box<[Slot]>,
}

// Safety: a slot's data is written only by the producer before publishing
// `head`, and read only by the consumer after observing it.
unsafe impl Send for SpscFrameRing {}
unsafe impl Sync for SpscFrameRing {}

impl SpscFrameRing {
    pub fn new() -> Self {
        let slots = (0..RING_SIZE)
            .map(|_| Slot {
                len: AtomicU32::new(0),
                data: UnsafeCell::new(vec![0u8; MAX_FRAME].into_boxed_slice()),
            })
            .collect();
        Self {
            head: CacheAligned(AtomicU64::new(0)),
            tail: CacheAligned(AtomicU64::new(0)),
            slots,
        }
    }

    /// Copies `frame` into the ring. Returns false if the ring is full or the
    /// frame is too large. Producer side only.
    #[inline]
    pub fn push(&self, frame: &[u8]) -> bool {
        if frame.len() > MAX_FRAME {
            return false;
        }

        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= RING_SIZE as u64 {
            return false;
        }

        let slot = &self.slots[(head as usize) & (RING_SIZE - 1)];
        // Safety: the consumer does not touch this slot until `head` moves.
        let data = unsafe { &mut *slot.data.get() };
        data[..frame.len()].copy_from_slice(frame);
        slot.len.store(frame.len() as u32, Ordering::Relaxed);

        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Copies the oldest frame into `out` and returns its length. Consumer
    /// side only.
    #[inline]
    pub fn pop(&self, out: &mut [u8]) -> Option<usize> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let slot = &self.slots[(tail as usize) & (RING_SIZE - 1)];
        let len = slot.len.load(Ordering::Relaxed) as usize;
        if len > out.len() {
            self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
            return None;
        }

        // Safety: the producer does not reuse this slot until `tail` moves.
        let data = unsafe { &*slot.data.get() };
        out[..len].copy_from_slice(&data[..len]);
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(len)
    }
}

impl Default for SpscFrameRing {
    fn default() -> Self {
        Self::new()
    }
}
