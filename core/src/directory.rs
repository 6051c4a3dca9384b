//! Fixed-capacity backend table.
//!
//! Slots are written by the control plane and read by every client frame.
//! Each slot is guarded by its own sequence lock, so a slot replacement is
//! observed either entirely or not at all and lookups never block.

use crate::CoreError;
use crate::identity::BackendConfig;
use crate::seqlock::{AtomicEndpoint, CacheAligned, SeqLock};
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;

/// Table size used when none is configured.
pub const DEFAULT_CAPACITY: usize = 2;

#[derive(Debug)]
struct Slot {
    lock: SeqLock,
    backend: AtomicEndpoint,
}

impl Slot {
    fn empty() -> Self {
        Self {
            lock: SeqLock::new(),
            backend: AtomicEndpoint::new(None),
        }
    }

    #[inline]
    fn load(&self) -> Option<BackendConfig> {
        self.lock.read(|| self.backend.load())
    }

    fn store(&self, value: Option<BackendConfig>) {
        self.lock.write(|| self.backend.store(value));
    }
}

#[derive(Debug)]
pub struct BackendDirectory {
    slots: Box<[CacheAligned<Slot>]>,
    capacity: NonZeroUsize,
}

impl BackendDirectory {
    /// Creates a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CoreError::ZeroCapacity)?;
        let slots = (0..capacity.get())
            .map(|_| CacheAligned(Slot::empty()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self { slots, capacity })
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Backend configured at `slot`. Empty and out-of-range slots are misses.
    #[inline]
    pub fn lookup(&self, slot: usize) -> Option<BackendConfig> {
        self.slots.get(slot)?.0.load()
    }

    pub fn set_backend(&self, slot: usize, backend: BackendConfig) -> Result<(), CoreError> {
        self.slot(slot)?.store(Some(backend));
        tracing::info!(slot, ip = %backend.ip, mac = %backend.mac, "Backend configured");
        Ok(())
    }

    pub fn clear_backend(&self, slot: usize) -> Result<(), CoreError> {
        self.slot(slot)?.store(None);
        tracing::info!(slot, "Backend cleared");
        Ok(())
    }

    /// True if any configured slot has this IP. Scans every slot, so the cost
    /// grows with the capacity.
    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        self.slots
            .iter()
            .any(|s| s.0.load().is_some_and(|b| b.ip == ip))
    }

    /// Configured slots in index order.
    pub fn snapshot(&self) -> Vec<(usize, BackendConfig)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.0.load().map(|b| (i, b)))
            .collect()
    }

    fn slot(&self, slot: usize) -> Result<&Slot, CoreError> {
        self.slots
            .get(slot)
            .map(|s| &s.0)
            .ok_or(CoreError::SlotOutOfRange {
                slot,
                capacity: self.capacity.get(),
            })
    }
}
