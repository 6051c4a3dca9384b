//! Diagnostic counters for the packet path.
//!
//! Counters are relaxed atomics; they never influence a verdict.

use crate::verdict::PassReason;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct EngineStats {
    frames: AtomicU64,
    passed: [AtomicU64; PassReason::ALL.len()],
    to_client: AtomicU64,
    to_backend: Box<[AtomicU64]>,
}

impl EngineStats {
    pub fn new(backend_slots: usize) -> Self {
        Self {
            frames: AtomicU64::new(0),
            passed: std::array::from_fn(|_| AtomicU64::new(0)),
            to_client: AtomicU64::new(0),
            to_backend: (0..backend_slots).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    pub(crate) fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_pass(&self, reason: PassReason) {
        self.passed[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_to_client(&self) {
        self.to_client.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_to_backend(&self, slot: usize) {
        if let Some(c) = self.to_backend.get(slot) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn passed(&self, reason: PassReason) -> u64 {
        self.passed[reason.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let passed: BTreeMap<&'static str, u64> = PassReason::ALL
            .iter()
            .map(|r| (r.as_str(), self.passed(*r)))
            .collect();
        let malformed = PassReason::ALL
            .iter()
            .filter(|r| r.is_malformed())
            .map(|r| self.passed(*r))
            .sum();
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            malformed,
            backend_misses: self.passed(PassReason::BackendMiss),
            redirected_to_client: self.to_client.load(Ordering::Relaxed),
            redirected_to_backend: self
                .to_backend
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            passed,
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    /// Frames that were too short or carried a broken IPv4/TCP header.
    pub malformed: u64,
    pub backend_misses: u64,
    pub redirected_to_client: u64,
    /// Indexed by backend slot.
    pub redirected_to_backend: Vec<u64>,
    pub passed: BTreeMap<&'static str, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = EngineStats::new(2);
        for _ in 0..5 {
            stats.record_frame();
        }
        stats.record_pass(PassReason::NotIpv4);
        stats.record_pass(PassReason::TruncatedTcp);
        stats.record_pass(PassReason::BackendMiss);
        stats.record_to_backend(1);
        stats.record_to_client();
        stats.record_to_backend(9);

        let snap = stats.snapshot();
        assert_eq!(snap.frames, 5);
        assert_eq!(snap.malformed, 1);
        assert_eq!(snap.backend_misses, 1);
        assert_eq!(snap.redirected_to_client, 1);
        assert_eq!(snap.redirected_to_backend, vec![0, 1]);
        assert_eq!(snap.passed["not_ipv4"], 1);
        assert_eq!(snap.passed["unknown_source"], 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = EngineStats::new(1);
        stats.record_frame();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["frames"], 1);
        assert_eq!(json["redirected_to_backend"], serde_json::json!([0]));
    }
}
