//! Addresses the balancer knows about: its own, the client's, and the
//! policy for sources that are neither.

use crate::CoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Client address used when no configuration overrides it.
pub const DEFAULT_CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const DEFAULT_CLIENT_MAC: MacAddr = MacAddr([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
/// Load balancer address used when no configuration overrides it.
pub const DEFAULT_LB_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 10);
pub const DEFAULT_LB_MAC: MacAddr = MacAddr([0xde, 0xad, 0xbe, 0xef, 0x00, 0x10]);

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Packs the address into the low 48 bits of a `u64`.
    #[inline]
    pub(crate) fn to_u64(self) -> u64 {
        let mut raw = [0u8; 8];
        raw[2..8].copy_from_slice(&self.0);
        u64::from_be_bytes(raw)
    }

    #[inline]
    pub(crate) fn from_u64(raw: u64) -> Self {
        let bytes = raw.to_be_bytes();
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[2..8]);
        Self(mac)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = CoreError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mac = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in mac.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| CoreError::InvalidMac(s.to_string()))?;
            if part.len() != 2 {
                return Err(CoreError::InvalidMac(s.to_string()));
            }
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| CoreError::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(CoreError::InvalidMac(s.to_string()));
        }
        Ok(Self(mac))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An L2/L3 address pair. Backends, the client and the balancer are all
/// described by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

impl Endpoint {
    pub const fn new(ip: Ipv4Addr, mac: MacAddr) -> Self {
        Self { ip, mac }
    }
}

/// Backend entry stored in the directory.
pub type BackendConfig = Endpoint;

/// Who the client is and who the balancer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIdentities {
    pub client: Endpoint,
    pub load_balancer: Endpoint,
}

impl Default for StaticIdentities {
    fn default() -> Self {
        Self {
            client: Endpoint::new(DEFAULT_CLIENT_IP, DEFAULT_CLIENT_MAC),
            load_balancer: Endpoint::new(DEFAULT_LB_IP, DEFAULT_LB_MAC),
        }
    }
}

/// What to do with a frame whose source is not the client.
///
/// `ReturnToClient` treats every such frame as backend traffic, including
/// frames from hosts that are not configured backends. `Pass` only accepts
/// sources whose IP matches a configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSourcePolicy {
    #[default]
    ReturnToClient,
    Pass,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "DE:AD:be:ef:00:10".parse().unwrap();
        assert_eq!(mac, DEFAULT_LB_MAC);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:10");

        let dashed: MacAddr = "de-ad-be-ef-00-01".parse().unwrap();
        assert_eq!(dashed, DEFAULT_CLIENT_MAC);
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        for bad in ["", "de:ad:be:ef:00", "de:ad:be:ef:00:01:02", "zz:ad:be:ef:00:01", "d:ad:be:ef:00:01"] {
            assert!(bad.parse::<MacAddr>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_mac_u64_packing() {
        let mac = MacAddr::new([0x02, 0x52, 0x4f, 0x53, 0x53, 0x01]);
        assert_eq!(mac.to_u64(), 0x0252_4f53_5301);
        assert_eq!(MacAddr::from_u64(mac.to_u64()), mac);
    }

    #[test]
    fn test_endpoint_serde() {
        let ep = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0, 2]));
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, r#"{"ip":"10.0.0.2","mac":"de:ad:be:ef:00:02"}"#);
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
    }

    #[test]
    fn test_default_identities() {
        let ids = StaticIdentities::default();
        assert_eq!(ids.client.ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ids.load_balancer.ip, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(UnknownSourcePolicy::default(), UnknownSourcePolicy::ReturnToClient);
    }
}
