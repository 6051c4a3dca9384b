//! Internet checksum (RFC 1071) over IPv4 headers and TCP segments.
//!
//! Both checksums are recomputed from scratch after a rewrite.

use crate::wire::{IP_PROTO_TCP, TcpFrame};
use std::net::Ipv4Addr;

/// One's-complement checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    finalize_checksum(sum_be_words(data))
}

/// TCP checksum of `segment` including the IPv4 pseudo-header.
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> u16 {
    finalize_checksum(pseudo_header_sum(src_ip, dst_ip, segment.len()) + sum_be_words(segment))
}

/// Recomputes the IPv4 header checksum and the TCP checksum of `frame`.
pub fn refresh_checksums(frame: &mut TcpFrame<'_>) {
    frame.set_ip_checksum(0);
    let ip = checksum(frame.ip_header());
    frame.set_ip_checksum(ip);

    frame.set_tcp_checksum(0);
    let tcp = tcp_checksum(frame.src_ip(), frame.dst_ip(), frame.tcp_segment());
    frame.set_tcp_checksum(tcp);
}

/// True when both checksums of `frame` verify.
pub fn verify(frame: &TcpFrame<'_>) -> bool {
    let ip_ok = finalize_checksum(sum_be_words(frame.ip_header())) == 0;
    let segment = frame.tcp_segment();
    let tcp_sum = pseudo_header_sum(frame.src_ip(), frame.dst_ip(), segment.len())
        + sum_be_words(segment);
    ip_ok && finalize_checksum(tcp_sum) == 0
}

#[inline]
fn pseudo_header_sum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment_len: usize) -> u64 {
    let s = src_ip.octets();
    let d = dst_ip.octets();
    let mut sum = 0u64;
    sum += u16::from_be_bytes([s[0], s[1]]) as u64;
    sum += u16::from_be_bytes([s[2], s[3]]) as u64;
    sum += u16::from_be_bytes([d[0], d[1]]) as u64;
    sum += u16::from_be_bytes([d[2], d[3]]) as u64;
    sum += IP_PROTO_TCP as u64;
    sum += segment_len as u64;
    sum
}

#[inline]
fn finalize_checksum(mut sum: u64) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Sums 16-bit big-endian words of `data`; an odd trailing byte is padded
/// with zero.
///
/// Reads 8 bytes per step on little-endian hosts.
#[inline]
fn sum_be_words(data: &[u8]) -> u64 {
    let mut sum = 0u64;
    let mut chunks = data.chunks_exact(8);

    #[cfg(target_endian = "little")]
    for chunk in &mut chunks {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let x = u64::from_le_bytes(raw);

        // Swap bytes within each 16-bit lane to get big-endian words.
        let words = ((x & 0x00ff_00ff_00ff_00ff) << 8) | ((x & 0xff00_ff00_ff00_ff00) >> 8);
        sum += words & 0xffff;
        sum += (words >> 16) & 0xffff;
        sum += (words >> 32) & 0xffff;
        sum += (words >> 48) & 0xffff;
    }

    #[cfg(not(target_endian = "little"))]
    for chunk in &mut chunks {
        for pair in chunk.chunks_exact(2) {
            sum += u16::from_be_bytes([pair[0], pair[1]]) as u64;
        }
    }

    let rest = chunks.remainder();
    let mut pairs = rest.chunks_exact(2);
    for pair in &mut pairs {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u64;
    }
    if let [last] = pairs.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u64;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::tests::sample_frame;

    fn naive_sum(data: &[u8]) -> u64 {
        let mut sum = 0u64;
        let mut i = 0;
        while i + 1 < data.len() {
            sum += u16::from_be_bytes([data[i], data[i + 1]]) as u64;
            i += 2;
        }
        if i < data.len() {
            sum += (data[i] as u64) << 8;
        }
        sum
    }

    #[test]
    fn test_known_ipv4_header() {
        // Classic example header; checksum field is 0xb861.
        let mut hdr = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(checksum(&hdr), 0xb861);
        hdr[10..12].copy_from_slice(&0xb861u16.to_be_bytes());
        assert_eq!(checksum(&hdr), 0);
    }

    #[test]
    fn test_fast_sum_matches_naive() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1503).collect();
        for len in [0, 1, 2, 7, 8, 9, 15, 16, 17, 64, 1500, 1503] {
            assert_eq!(sum_be_words(&data[..len]), naive_sum(&data[..len]), "len {len}");
        }
    }

    #[test]
    fn test_odd_length_padding() {
        assert_eq!(checksum(&[0x01]), !0x0100);
        assert_eq!(checksum(&[0x01, 0x00]), checksum(&[0x01]));
    }

    #[test]
    fn test_refresh_then_verify() {
        let mut frame = sample_frame();
        let mut view = TcpFrame::parse(&mut frame).unwrap();
        assert!(!verify(&view));
        refresh_checksums(&mut view);
        assert!(verify(&view));
        assert_ne!(view.ip_checksum(), 0);
        assert_ne!(view.tcp_checksum(), 0);
    }

    #[test]
    fn test_payload_participates() {
        let mut frame = sample_frame();
        let mut view = TcpFrame::parse(&mut frame).unwrap();
        refresh_checksums(&mut view);
        let before = view.tcp_checksum();
        drop(view);

        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let view = TcpFrame::parse(&mut frame).unwrap();
        assert!(!verify(&view));
        assert_eq!(view.tcp_checksum(), before);
    }

    #[test]
    fn test_odd_segment_verifies() {
        let mut frame = crate::wire::tests::build_tcp_frame(
            [0; 6],
            [0; 6],
            [192, 168, 1, 7],
            [10, 0, 0, 10],
            443,
            60000,
            b"abc",
        );
        let mut view = TcpFrame::parse(&mut frame).unwrap();
        refresh_checksums(&mut view);
        assert!(verify(&view));
    }
}
