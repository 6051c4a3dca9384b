//! Flow hashing and backend slot selection.
//!
//! A flow is hashed with XXH32 (seed 0) over its 12-byte network-order
//! encoding and reduced modulo the directory capacity. The mapping is stable
//! across runs and processes for a fixed capacity; changing the capacity
//! remaps existing flows.

use std::net::Ipv4Addr;
use std::num::NonZeroUsize;

pub const FLOW_HASH_SEED: u32 = 0;

const PRIME32_1: u32 = 0x9e37_79b1;
const PRIME32_2: u32 = 0x85eb_ca77;
const PRIME32_3: u32 = 0xc2b2_ae3d;
const PRIME32_4: u32 = 0x27d4_eb2f;
const PRIME32_5: u32 = 0x1656_67b1;

/// Source/destination address and port of a TCP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FourTuple {
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }

    /// Hash input layout: source IP, destination IP, source port,
    /// destination port, all big-endian.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.src_ip.octets());
        out[4..8].copy_from_slice(&self.dst_ip.octets());
        out[8..10].copy_from_slice(&self.src_port.to_be_bytes());
        out[10..12].copy_from_slice(&self.dst_port.to_be_bytes());
        out
    }

    pub fn hash(&self) -> u32 {
        xxh32(&self.to_bytes(), FLOW_HASH_SEED)
    }
}

/// Maps a flow to a slot in `[0, slots)`.
#[inline]
pub fn classify(tuple: &FourTuple, slots: NonZeroUsize) -> usize {
    tuple.hash() as usize % slots.get()
}

/// XXH32 of `input`.
pub fn xxh32(input: &[u8], seed: u32) -> u32 {
    let len = input.len();
    let mut rest = input;

    let mut h = if len >= 16 {
        let mut v1 = seed.wrapping_add(PRIME32_1).wrapping_add(PRIME32_2);
        let mut v2 = seed.wrapping_add(PRIME32_2);
        let mut v3 = seed;
        let mut v4 = seed.wrapping_sub(PRIME32_1);

        let mut stripes = input.chunks_exact(16);
        for stripe in &mut stripes {
            v1 = round(v1, read_u32_le(&stripe[0..4]));
            v2 = round(v2, read_u32_le(&stripe[4..8]));
            v3 = round(v3, read_u32_le(&stripe[8..12]));
            v4 = round(v4, read_u32_le(&stripe[12..16]));
        }
        rest = stripes.remainder();

        v1.rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18))
    } else {
        seed.wrapping_add(PRIME32_5)
    };

    h = h.wrapping_add(len as u32);

    let mut words = rest.chunks_exact(4);
    for word in &mut words {
        h = h.wrapping_add(read_u32_le(word).wrapping_mul(PRIME32_3));
        h = h.rotate_left(17).wrapping_mul(PRIME32_4);
    }
    for &byte in words.remainder() {
        h = h.wrapping_add((byte as u32).wrapping_mul(PRIME32_5));
        h = h.rotate_left(11).wrapping_mul(PRIME32_1);
    }

    h ^= h >> 15;
    h = h.wrapping_mul(PRIME32_2);
    h ^= h >> 13;
    h = h.wrapping_mul(PRIME32_3);
    h ^= h >> 16;
    h
}

#[inline]
fn round(acc: u32, input: u32) -> u32 {
    acc.wrapping_add(input.wrapping_mul(PRIME32_2))
        .rotate_left(13)
        .wrapping_mul(PRIME32_1)
}

#[inline]
fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
