//! Ethernet/IPv4/TCP header walker.
//!
//! `TcpFrame::parse` validates a raw frame in a fixed order and, on success,
//! hands back a mutable view whose accessors only touch byte ranges that were
//! proven to be in bounds. Any failure is a [`PassReason`], never a panic.

use crate::flow::FourTuple;
use crate::identity::MacAddr;
use crate::verdict::PassReason;
use std::net::Ipv4Addr;

pub const ETH_HEADER_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

pub const TCP_MIN_HEADER_LEN: usize = 20;

// Ethernet field offsets.
const ETH_DST: usize = 0;
const ETH_SRC: usize = 6;
const ETH_TYPE: usize = 12;

// IPv4 field offsets, relative to the start of the IPv4 header.
const IP_TOTAL_LEN: usize = 2;
const IP_PROTO: usize = 9;
const IP_CHECKSUM: usize = 10;
const IP_SRC: usize = 12;
const IP_DST: usize = 16;

// TCP field offsets, relative to the start of the TCP header.
const TCP_SRC_PORT: usize = 0;
const TCP_DST_PORT: usize = 2;
const TCP_CHECKSUM: usize = 16;

/// Offsets of a validated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    ip_header_len: usize,
    segment_end: usize,
}

impl HeaderLayout {
    pub const fn ip_offset(&self) -> usize {
        ETH_HEADER_LEN
    }

    pub const fn ip_header_len(&self) -> usize {
        self.ip_header_len
    }

    pub const fn tcp_offset(&self) -> usize {
        ETH_HEADER_LEN + self.ip_header_len
    }

    /// End of the TCP segment within the frame (exclusive).
    pub const fn segment_end(&self) -> usize {
        self.segment_end
    }

    pub const fn segment_len(&self) -> usize {
        self.segment_end - self.tcp_offset()
    }
}

/// Validates `frame` and returns its layout.
///
/// Checks run in this order: Ethernet header present, EtherType is IPv4,
/// IPv4 header of the declared IHL present, protocol is TCP, full TCP header
/// present after the IPv4 header.
pub fn walk(frame: &[u8]) -> Result<HeaderLayout, PassReason> {
    if frame.len() < ETH_HEADER_LEN {
        return Err(PassReason::TooShort);
    }

    let ethertype = u16::from_be_bytes([frame[ETH_TYPE], frame[ETH_TYPE + 1]]);
    if ethertype != ETHERTYPE_IPV4 {
        return Err(PassReason::NotIpv4);
    }

    let ip = &frame[ETH_HEADER_LEN..];
    if ip.len() < IPV4_MIN_HEADER_LEN {
        return Err(PassReason::BadIpv4Header);
    }
    let version = ip[0] >> 4;
    let ihl = (ip[0] & 0x0f) as usize * 4;
    if version != 4 || ihl < IPV4_MIN_HEADER_LEN || ip.len() < ihl {
        return Err(PassReason::BadIpv4Header);
    }

    if ip[IP_PROTO] != IP_PROTO_TCP {
        return Err(PassReason::NotTcp);
    }

    if ip.len() < ihl + TCP_MIN_HEADER_LEN {
        return Err(PassReason::TruncatedTcp);
    }

    // Trust the IPv4 total length only when it is self-consistent, so that
    // link-layer padding after a short datagram stays out of the checksum.
    let total_len = u16::from_be_bytes([ip[IP_TOTAL_LEN], ip[IP_TOTAL_LEN + 1]]) as usize;
    let segment_end = if total_len >= ihl + TCP_MIN_HEADER_LEN && total_len <= ip.len() {
        ETH_HEADER_LEN + total_len
    } else {
        frame.len()
    };

    Ok(HeaderLayout {
        ip_header_len: ihl,
        segment_end,
    })
}

/// Reads the 4-tuple of a frame without requiring mutable access.
pub fn peek_four_tuple(frame: &[u8]) -> Result<FourTuple, PassReason> {
    let layout = walk(frame)?;
    let ip = layout.ip_offset();
    let tcp = layout.tcp_offset();
    let addr = |off: usize| Ipv4Addr::new(frame[off], frame[off + 1], frame[off + 2], frame[off + 3]);
    let port = |off: usize| u16::from_be_bytes([frame[off], frame[off + 1]]);
    Ok(FourTuple {
        src_ip: addr(ip + IP_SRC),
        dst_ip: addr(ip + IP_DST),
        src_port: port(tcp + TCP_SRC_PORT),
        dst_port: port(tcp + TCP_DST_PORT),
    })
}

/// Mutable view over a frame that passed [`walk`].
#[derive(Debug)]
pub struct TcpFrame<'a> {
    buf: &'a mut [u8],
    layout: HeaderLayout,
}

impl<'a> TcpFrame<'a> {
    pub fn parse(buf: &'a mut [u8]) -> Result<Self, PassReason> {
        let layout = walk(buf)?;
        Ok(Self { buf, layout })
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf
    }

    pub fn eth_dst(&self) -> MacAddr {
        self.mac_at(ETH_DST)
    }

    pub fn eth_src(&self) -> MacAddr {
        self.mac_at(ETH_SRC)
    }

    pub fn set_eth_dst(&mut self, mac: MacAddr) {
        self.buf[ETH_DST..ETH_DST + 6].copy_from_slice(&mac.0);
    }

    pub fn set_eth_src(&mut self, mac: MacAddr) {
        self.buf[ETH_SRC..ETH_SRC + 6].copy_from_slice(&mac.0);
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        self.ipv4_at(self.layout.ip_offset() + IP_SRC)
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        self.ipv4_at(self.layout.ip_offset() + IP_DST)
    }

    pub fn set_src_ip(&mut self, ip: Ipv4Addr) {
        let off = self.layout.ip_offset() + IP_SRC;
        self.buf[off..off + 4].copy_from_slice(&ip.octets());
    }

    pub fn set_dst_ip(&mut self, ip: Ipv4Addr) {
        let off = self.layout.ip_offset() + IP_DST;
        self.buf[off..off + 4].copy_from_slice(&ip.octets());
    }

    pub fn ip_checksum(&self) -> u16 {
        self.u16_at(self.layout.ip_offset() + IP_CHECKSUM)
    }

    pub fn src_port(&self) -> u16 {
        self.u16_at(self.layout.tcp_offset() + TCP_SRC_PORT)
    }

    pub fn dst_port(&self) -> u16 {
        self.u16_at(self.layout.tcp_offset() + TCP_DST_PORT)
    }

    pub fn tcp_checksum(&self) -> u16 {
        self.u16_at(self.layout.tcp_offset() + TCP_CHECKSUM)
    }

    pub fn four_tuple(&self) -> FourTuple {
        FourTuple {
            src_ip: self.src_ip(),
            dst_ip: self.dst_ip(),
            src_port: self.src_port(),
            dst_port: self.dst_port(),
        }
    }

    /// The whole IPv4 header, options included.
    pub fn ip_header(&self) -> &[u8] {
        let start = self.layout.ip_offset();
        &self.buf[start..start + self.layout.ip_header_len()]
    }

    /// TCP header plus payload.
    pub fn tcp_segment(&self) -> &[u8] {
        &self.buf[self.layout.tcp_offset()..self.layout.segment_end()]
    }

    pub(crate) fn set_ip_checksum(&mut self, value: u16) {
        let off = self.layout.ip_offset() + IP_CHECKSUM;
        self.buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn set_tcp_checksum(&mut self, value: u16) {
        let off = self.layout.tcp_offset() + TCP_CHECKSUM;
        self.buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
    }

    #[inline]
    fn mac_at(&self, off: usize) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf[off..off + 6]);
        MacAddr(mac)
    }

    #[inline]
    fn ipv4_at(&self, off: usize) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buf[off],
            self.buf[off + 1],
            self.buf[off + 2],
            self.buf[off + 3],
        )
    }

    #[inline]
    fn u16_at(&self, off: usize) -> u16 {
        u16::from_be_bytes([self.buf[off], self.buf[off + 1]])
    }
}
