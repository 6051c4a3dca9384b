//! Verdicts returned by the packet path.

use serde::Serialize;

/// Final decision for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the frame exactly as received. The buffer was not touched.
    Pass,
    /// The buffer was rewritten in place and must go back out the receiving
    /// interface.
    Redirect,
}

impl Verdict {
    pub fn is_redirect(self) -> bool {
        matches!(self, Verdict::Redirect)
    }
}

/// Why a frame was passed through unmodified.
///
/// None of these are faults; they are the normal outcome for traffic the
/// balancer does not handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReason {
    /// Shorter than an Ethernet header.
    TooShort,
    /// EtherType is not IPv4.
    NotIpv4,
    /// IPv4 header is truncated, has a bad IHL, or a version other than 4.
    BadIpv4Header,
    /// IPv4 payload is not TCP.
    NotTcp,
    /// TCP header does not fit after the IPv4 header.
    TruncatedTcp,
    /// Client frame hashed to a slot with no backend configured.
    BackendMiss,
    /// Non-client source rejected by [`UnknownSourcePolicy::Pass`](crate::UnknownSourcePolicy::Pass).
    UnknownSource,
}

impl PassReason {
    pub const ALL: [PassReason; 7] = [
        PassReason::TooShort,
        PassReason::NotIpv4,
        PassReason::BadIpv4Header,
        PassReason::NotTcp,
        PassReason::TruncatedTcp,
        PassReason::BackendMiss,
        PassReason::UnknownSource,
    ];

    /// Dense index used by the stats counters.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            PassReason::TooShort => 0,
            PassReason::NotIpv4 => 1,
            PassReason::BadIpv4Header => 2,
            PassReason::NotTcp => 3,
            PassReason::TruncatedTcp => 4,
            PassReason::BackendMiss => 5,
            PassReason::UnknownSource => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PassReason::TooShort => "too_short",
            PassReason::NotIpv4 => "not_ipv4",
            PassReason::BadIpv4Header => "bad_ipv4_header",
            PassReason::NotTcp => "not_tcp",
            PassReason::TruncatedTcp => "truncated_tcp",
            PassReason::BackendMiss => "backend_miss",
            PassReason::UnknownSource => "unknown_source",
        }
    }

    /// Frames cut short or carrying a broken header. ARP, UDP and other
    /// well-formed traffic the balancer does not handle are not malformed.
    pub fn is_malformed(self) -> bool {
        matches!(
            self,
            PassReason::TooShort | PassReason::BadIpv4Header | PassReason::TruncatedTcp
        )
    }
}
