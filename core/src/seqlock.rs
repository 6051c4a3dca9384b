//! Sequence-locked cells for state shared with the packet path.
//!
//! Writers (the control plane) are serialized by a mutex and bump a version
//! counter around their stores. Readers never lock: they read the fields and
//! retry if the version was odd or moved underneath them, so a reader always
//! sees a complete write.

use crate::identity::{Endpoint, MacAddr};
use std::hint::spin_loop;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use std::sync::{Mutex, PoisonError};

#[repr(C, align(64))]
#[derive(Debug)]
pub(crate) struct CacheAligned<T>(pub T);

#[derive(Debug, Default)]
pub(crate) struct SeqLock {
    version: AtomicU64,
    writer: Mutex<()>,
}

impl SeqLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `f` as a single write. `f` must only perform relaxed stores on
    /// atomics guarded by this lock and must not panic, or readers spin on
    /// the odd version forever.
    pub(crate) fn write<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        let out = f();
        self.version.store(v.wrapping_add(2), Ordering::Release);
        out
    }

    /// Runs `f` until it observes a consistent snapshot. `f` must only
    /// perform relaxed loads.
    #[inline]
    pub(crate) fn read<R>(&self, f: impl Fn() -> R) -> R {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before & 1 == 0 {
                let out = f();
                fence(Ordering::Acquire);
                if self.version.load(Ordering::Relaxed) == before {
                    return out;
                }
            }
            spin_loop();
        }
    }

    #[cfg(test)]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Bit set in the MAC word when the endpoint holds a value.
const PRESENT: u64 = 1 << 63;

/// An optional [`Endpoint`] stored as two atomic words.
#[derive(Debug, Default)]
pub(crate) struct AtomicEndpoint {
    ip: AtomicU32,
    mac: AtomicU64,
}

impl AtomicEndpoint {
    pub(crate) fn new(value: Option<Endpoint>) -> Self {
        let cell = Self::default();
        cell.store(value);
        cell
    }

    #[inline]
    pub(crate) fn load(&self) -> Option<Endpoint> {
        let mac = self.mac.load(Ordering::Relaxed);
        let ip = self.ip.load(Ordering::Relaxed);
        if mac & PRESENT == 0 {
            return None;
        }
        Some(Endpoint::new(Ipv4Addr::from(ip), MacAddr::from_u64(mac & !PRESENT)))
    }

    pub(crate) fn store(&self, value: Option<Endpoint>) {
        match value {
            Some(ep) => {
                self.ip.store(u32::from(ep.ip), Ordering::Relaxed);
                self.mac.store(ep.mac.to_u64() | PRESENT, Ordering::Relaxed);
            }
            None => {
                self.ip.store(0, Ordering::Relaxed);
                self.mac.store(0, Ordering::Relaxed);
            }
        }
    }
}
