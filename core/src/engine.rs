//! Per-frame verdict dispatch.
//!
//! [`Engine::process`] is synchronous, never allocates and never blocks. The
//! engine is `Sync`; run one call per frame from as many threads as there are
//! receive queues and share the engine through an `Arc`.

use crate::CoreError;
use crate::checksum::refresh_checksums;
use crate::directory::{BackendDirectory, DEFAULT_CAPACITY};
use crate::identity::{BackendConfig, Endpoint, StaticIdentities, UnknownSourcePolicy};
use crate::rewrite::{Target, apply, plan};
use crate::seqlock::{AtomicEndpoint, SeqLock};
use crate::stats::EngineStats;
use crate::verdict::{PassReason, Verdict};
use crate::wire::TcpFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub identities: StaticIdentities,
    pub capacity: usize,
    pub unknown_source: UnknownSourcePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identities: StaticIdentities::default(),
            capacity: DEFAULT_CAPACITY,
            unknown_source: UnknownSourcePolicy::default(),
        }
    }
}

/// Client and balancer identities, replaced as a unit.
#[derive(Debug)]
struct IdentityCell {
    lock: SeqLock,
    client: AtomicEndpoint,
    load_balancer: AtomicEndpoint,
}

impl IdentityCell {
    fn new(ids: StaticIdentities) -> Self {
        Self {
            lock: SeqLock::new(),
            client: AtomicEndpoint::new(Some(ids.client)),
            load_balancer: AtomicEndpoint::new(Some(ids.load_balancer)),
        }
    }

    #[inline]
    fn load(&self) -> StaticIdentities {
        self.lock.read(|| {
            let fallback = StaticIdentities::default();
            StaticIdentities {
                client: self.client.load().unwrap_or(fallback.client),
                load_balancer: self.load_balancer.load().unwrap_or(fallback.load_balancer),
            }
        })
    }

    fn store(&self, ids: StaticIdentities) {
        self.lock.write(|| {
            self.client.store(Some(ids.client));
            self.load_balancer.store(Some(ids.load_balancer));
        });
    }
}

#[derive(Debug)]
pub struct Engine {
    directory: BackendDirectory,
    identities: IdentityCell,
    policy: UnknownSourcePolicy,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let directory = BackendDirectory::new(config.capacity)?;
        let stats = EngineStats::new(directory.capacity().get());
        Ok(Self {
            directory,
            identities: IdentityCell::new(config.identities),
            policy: config.unknown_source,
            stats,
        })
    }

    /// Decides the fate of one Ethernet frame.
    ///
    /// On [`Verdict::Redirect`] the frame has been rewritten and both
    /// checksums recomputed. On [`Verdict::Pass`] not a single byte changed.
    pub fn process(&self, frame: &mut [u8]) -> Verdict {
        self.stats.record_frame();
        match self.redirect(frame) {
            Ok(()) => Verdict::Redirect,
            Err(reason) => {
                self.stats.record_pass(reason);
                tracing::trace!(reason = reason.as_str(), len = frame.len(), "Pass");
                Verdict::Pass
            }
        }
    }

    fn redirect(&self, buf: &mut [u8]) -> Result<(), PassReason> {
        let mut frame = TcpFrame::parse(buf)?;

        tracing::trace!(
            src_ip = %frame.src_ip(),
            dst_ip = %frame.dst_ip(),
            src_mac = %frame.eth_src(),
            dst_mac = %frame.eth_dst(),
            src_port = frame.src_port(),
            dst_port = frame.dst_port(),
            "TCP rx"
        );

        let identities = self.identities.load();
        let target = plan(&frame, &self.directory, &identities, self.policy)?;
        apply(&mut frame, &target, &identities);
        refresh_checksums(&mut frame);

        match target {
            Target::Backend { slot, .. } => self.stats.record_to_backend(slot),
            Target::Client => self.stats.record_to_client(),
        }

        tracing::trace!(
            src_ip = %frame.src_ip(),
            dst_ip = %frame.dst_ip(),
            src_mac = %frame.eth_src(),
            dst_mac = %frame.eth_dst(),
            "Redirect"
        );
        Ok(())
    }

    pub fn set_backend(&self, slot: usize, backend: BackendConfig) -> Result<(), CoreError> {
        self.directory.set_backend(slot, backend)
    }

    pub fn clear_backend(&self, slot: usize) -> Result<(), CoreError> {
        self.directory.clear_backend(slot)
    }

    pub fn set_static_identities(&self, client: Endpoint, load_balancer: Endpoint) {
        self.identities.store(StaticIdentities {
            client,
            load_balancer,
        });
        tracing::info!(
            client_ip = %client.ip,
            client_mac = %client.mac,
            lb_ip = %load_balancer.ip,
            lb_mac = %load_balancer.mac,
            "Identities updated"
        );
    }

    pub fn identities(&self) -> StaticIdentities {
        self.identities.load()
    }

    pub fn directory(&self) -> &BackendDirectory {
        &self.directory
    }

    pub fn unknown_source_policy(&self) -> UnknownSourcePolicy {
        self.policy
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::verify;
    use crate::identity::MacAddr;
    use crate::wire::tests::{build_tcp_frame, sample_frame};
    use crate::wire::{ETHERTYPE_ARP, IP_PROTO_UDP};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn backend(n: u8) -> BackendConfig {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, n), MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0, n]))
    }

    fn engine_with_backends() -> Engine {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.set_backend(0, backend(2)).unwrap();
        engine.set_backend(1, backend(3)).unwrap();
        engine
    }

    fn client_frame(sport: u16) -> Vec<u8> {
        build_tcp_frame(
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01],
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x10],
            [10, 0, 0, 1],
            [10, 0, 0, 10],
            sport,
            80,
            b"hello backend",
        )
    }

    fn frame_from(ip: [u8; 4]) -> Vec<u8> {
        build_tcp_frame(
            [0x02, 0, 0, 0, 0, ip[3]],
            [0xde, 0xad, 0xbe, 0xef, 0x00, 0x10],
            ip,
            [10, 0, 0, 10],
            80,
            51000,
            b"HTTP/1.1 200 OK\r\n\r\n",
        )
    }

    fn assert_untouched(engine: &Engine, mut frame: Vec<u8>) {
        let original = frame.clone();
        assert_eq!(engine.process(&mut frame), Verdict::Pass);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_client_frame_redirected_to_backend() {
        let engine = engine_with_backends();
        let ids = engine.identities();
        for sport in 50000..50064 {
            let mut frame = client_frame(sport);
            let tuple = TcpFrame::parse(&mut frame).unwrap().four_tuple();
            let slot = crate::flow::classify(&tuple, engine.directory().capacity());
            let expected = backend(slot as u8 + 2);

            assert_eq!(engine.process(&mut frame), Verdict::Redirect);
            let view = TcpFrame::parse(&mut frame).unwrap();
            assert_eq!(view.dst_ip(), expected.ip);
            assert_eq!(view.eth_dst(), expected.mac);
            assert_eq!(view.src_ip(), ids.load_balancer.ip);
            assert_eq!(view.eth_src(), ids.load_balancer.mac);
            assert!(verify(&view));
        }
    }

    #[test]
    fn test_backend_frame_redirected_to_client() {
        let engine = engine_with_backends();
        let ids = engine.identities();
        let mut frame = frame_from([10, 0, 0, 3]);
        assert_eq!(engine.process(&mut frame), Verdict::Redirect);

        let view = TcpFrame::parse(&mut frame).unwrap();
        assert_eq!(view.dst_ip(), ids.client.ip);
        assert_eq!(view.eth_dst(), ids.client.mac);
        assert_eq!(view.src_ip(), ids.load_balancer.ip);
        assert_eq!(view.eth_src(), ids.load_balancer.mac);
        assert!(verify(&view));
        assert_eq!(engine.stats().snapshot().redirected_to_client, 1);
    }

    #[test]
    fn test_payload_preserved() {
        let engine = engine_with_backends();
        let mut frame = client_frame(51000);
        let payload = frame[54..].to_vec();
        engine.process(&mut frame);
        assert_eq!(&frame[54..], &payload[..]);
    }

    #[test]
    fn test_walker_rejections_leave_frame_untouched() {
        let engine = engine_with_backends();

        let mut arp = vec![0u8; 60];
        arp[12..14].copy_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        assert_untouched(&engine, arp);

        assert_untouched(&engine, vec![0xaa; 10]);
        assert_untouched(&engine, client_frame(51000)[..14 + 19].to_vec());
        assert_untouched(&engine, client_frame(51000)[..14 + 20 + 10].to_vec());

        let mut udp = client_frame(51000);
        udp[14 + 9] = IP_PROTO_UDP;
        assert_untouched(&engine, udp);

        let snap = engine.stats().snapshot();
        assert_eq!(snap.frames, 5);
        assert_eq!(snap.malformed, 3);
        assert_eq!(snap.passed["not_ipv4"], 1);
        assert_eq!(snap.passed["too_short"], 1);
        assert_eq!(snap.passed["bad_ipv4_header"], 1);
        assert_eq!(snap.passed["truncated_tcp"], 1);
        assert_eq!(snap.passed["not_tcp"], 1);
    }

    #[test]
    fn test_unconfigured_slot_passes() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.set_backend(0, backend(2)).unwrap();
        // sport 51000 hashes to slot 1
        assert_untouched(&engine, sample_frame());
        assert_eq!(engine.stats().snapshot().backend_misses, 1);

        engine.set_backend(1, backend(3)).unwrap();
        let mut frame = sample_frame();
        assert_eq!(engine.process(&mut frame), Verdict::Redirect);
        assert_eq!(engine.stats().snapshot().redirected_to_backend, vec![0, 1]);
    }

    #[test]
    fn test_flow_stickiness() {
        let engine = engine_with_backends();
        let mut first = client_frame(42424);
        engine.process(&mut first);
        for _ in 0..50 {
            let mut again = client_frame(42424);
            engine.process(&mut again);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_third_party_source_under_each_policy() {
        let permissive = engine_with_backends();
        let mut frame = frame_from([192, 168, 1, 50]);
        assert_eq!(permissive.process(&mut frame), Verdict::Redirect);
        let view = TcpFrame::parse(&mut frame).unwrap();
        assert_eq!(view.dst_ip(), permissive.identities().client.ip);

        let strict = Engine::new(EngineConfig {
            unknown_source: UnknownSourcePolicy::Pass,
            ..EngineConfig::default()
        })
        .unwrap();
        strict.set_backend(0, backend(2)).unwrap();
        assert_untouched(&strict, frame_from([192, 168, 1, 50]));
        assert_eq!(strict.stats().passed(PassReason::UnknownSource), 1);

        let mut known = frame_from([10, 0, 0, 2]);
        assert_eq!(strict.process(&mut known), Verdict::Redirect);
    }

    #[test]
    fn test_identity_update() {
        let engine = engine_with_backends();
        let client = Endpoint::new(Ipv4Addr::new(192, 168, 0, 1), MacAddr::new([2, 0, 0, 0, 0, 1]));
        let lb = Endpoint::new(Ipv4Addr::new(192, 168, 0, 254), MacAddr::new([2, 0, 0, 0, 0, 0xfe]));
        engine.set_static_identities(client, lb);
        assert_eq!(engine.identities(), StaticIdentities { client, load_balancer: lb });

        // The old client address is now just another source.
        let mut frame = client_frame(51000);
        assert_eq!(engine.process(&mut frame), Verdict::Redirect);
        let view = TcpFrame::parse(&mut frame).unwrap();
        assert_eq!(view.dst_ip(), client.ip);
        assert_eq!(view.src_ip(), lb.ip);
        assert!(verify(&view));
    }

    #[test]
    fn test_zero_capacity_engine() {
        let err = Engine::new(EngineConfig {
            capacity: 0,
            ..EngineConfig::default()
        })
        .unwrap_err();
        assert_eq!(err, CoreError::ZeroCapacity);
    }

    #[test]
    fn test_concurrent_processing_during_updates() {
        let engine = Arc::new(engine_with_backends());
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..4u16)
            .map(|w| {
                let engine = engine.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    let mut sport = 1024 + w * 10_000;
                    while !stop.load(Ordering::Relaxed) {
                        let mut frame = client_frame(sport);
                        assert_eq!(engine.process(&mut frame), Verdict::Redirect);
                        let view = TcpFrame::parse(&mut frame).unwrap();
                        let dst = view.dst_ip().octets()[3];
                        assert_eq!(dst, view.eth_dst().octets()[5], "torn backend");
                        assert!(verify(&view));
                        sport = sport.wrapping_add(1);
                    }
                })
            })
            .collect();

        for i in 0..2_000u32 {
            let slot = (i % 2) as usize;
            engine.set_backend(slot, backend((i % 200) as u8 + 2)).unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for w in workers {
            w.join().unwrap();
        }
    }
}
