//! Direction detection and in-place address rewriting.

use crate::directory::BackendDirectory;
use crate::flow::classify;
use crate::identity::{BackendConfig, StaticIdentities, UnknownSourcePolicy};
use crate::verdict::PassReason;
use crate::wire::TcpFrame;

/// Where a frame is headed after rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Client traffic, sent to the backend at `slot`.
    Backend { slot: usize, backend: BackendConfig },
    /// Backend (or, under the permissive policy, any non-client) traffic
    /// returned to the client.
    Client,
}

/// Decides where `frame` goes without touching it.
pub fn plan(
    frame: &TcpFrame<'_>,
    directory: &BackendDirectory,
    identities: &StaticIdentities,
    policy: UnknownSourcePolicy,
) -> Result<Target, PassReason> {
    let src_ip = frame.src_ip();

    if src_ip == identities.client.ip {
        let slot = classify(&frame.four_tuple(), directory.capacity());
        return match directory.lookup(slot) {
            Some(backend) => Ok(Target::Backend { slot, backend }),
            None => {
                tracing::debug!(slot, "No backend configured for slot");
                Err(PassReason::BackendMiss)
            }
        };
    }

    match policy {
        UnknownSourcePolicy::ReturnToClient => Ok(Target::Client),
        UnknownSourcePolicy::Pass if directory.contains_ip(src_ip) => Ok(Target::Client),
        UnknownSourcePolicy::Pass => {
            tracing::debug!(src = %src_ip, "Source is neither client nor backend");
            Err(PassReason::UnknownSource)
        }
    }
}

/// Rewrites destination and source addresses for `target`. Checksums are
/// left stale.
pub fn apply(frame: &mut TcpFrame<'_>, target: &Target, identities: &StaticIdentities) {
    let dst = match target {
        Target::Backend { backend, .. } => *backend,
        Target::Client => identities.client,
    };
    frame.set_dst_ip(dst.ip);
    frame.set_eth_dst(dst.mac);

    frame.set_src_ip(identities.load_balancer.ip);
    frame.set_eth_src(identities.load_balancer.mac);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Endpoint, MacAddr};
    use crate::wire::tests::{build_tcp_frame, sample_frame};
    use std::net::Ipv4Addr;

    fn backend(n: u8) -> BackendConfig {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, n), MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0, n]))
    }

    fn full_directory() -> BackendDirectory {
        let dir = BackendDirectory::new(2).unwrap();
        dir.set_backend(0, backend(2)).unwrap();
        dir.set_backend(1, backend(3)).unwrap();
        dir
    }

    fn from_host(ip: [u8; 4]) -> Vec<u8> {
        build_tcp_frame([0x02, 0, 0, 0, 0, 9], [0xde, 0xad, 0xbe, 0xef, 0, 0x10], ip, [10, 0, 0, 10], 80, 51000, b"ok")
    }

    #[test]
    fn test_client_goes_to_hashed_backend() {
        let mut frame = sample_frame(); // sport 51000 hashes to slot 1
        let view = TcpFrame::parse(&mut frame).unwrap();
        let target = plan(&view, &full_directory(), &StaticIdentities::default(), UnknownSourcePolicy::default()).unwrap();
        assert_eq!(target, Target::Backend { slot: 1, backend: backend(3) });
    }

    #[test]
    fn test_client_miss() {
        let dir = BackendDirectory::new(2).unwrap();
        dir.set_backend(0, backend(2)).unwrap();
        let mut frame = sample_frame();
        let view = TcpFrame::parse(&mut frame).unwrap();
        assert_eq!(
            plan(&view, &dir, &StaticIdentities::default(), UnknownSourcePolicy::default()),
            Err(PassReason::BackendMiss)
        );
    }

    #[test]
    fn test_backend_returns_to_client() {
        let mut frame = from_host([10, 0, 0, 2]);
        let view = TcpFrame::parse(&mut frame).unwrap();
        for policy in [UnknownSourcePolicy::ReturnToClient, UnknownSourcePolicy::Pass] {
            assert_eq!(
                plan(&view, &full_directory(), &StaticIdentities::default(), policy),
                Ok(Target::Client)
            );
        }
    }

    #[test]
    fn test_third_party_source() {
        let mut frame = from_host([172, 16, 5, 5]);
        let view = TcpFrame::parse(&mut frame).unwrap();
        let ids = StaticIdentities::default();
        assert_eq!(
            plan(&view, &full_directory(), &ids, UnknownSourcePolicy::ReturnToClient),
            Ok(Target::Client)
        );
        assert_eq!(
            plan(&view, &full_directory(), &ids, UnknownSourcePolicy::Pass),
            Err(PassReason::UnknownSource)
        );
    }

    #[test]
    fn test_apply_to_client() {
        let ids = StaticIdentities::default();
        let mut frame = from_host([10, 0, 0, 2]);
        let mut view = TcpFrame::parse(&mut frame).unwrap();
        apply(&mut view, &Target::Client, &ids);
        assert_eq!(view.dst_ip(), ids.client.ip);
        assert_eq!(view.eth_dst(), ids.client.mac);
        assert_eq!(view.src_ip(), ids.load_balancer.ip);
        assert_eq!(view.eth_src(), ids.load_balancer.mac);
        assert_eq!(view.src_port(), 80);
        assert_eq!(view.dst_port(), 51000);
    }
}
