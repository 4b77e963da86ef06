//! Internet checksum over scattered data.
//!
//! # Reference
//! RFC 1071, RFC 8200 §8.1 (upper-layer pseudo-header)

use core::net::{Ipv4Addr, Ipv6Addr};

use crate::buffer::ChunkedBuffer;

/// Running one's-complement sum.
///
/// Bytes may be fed in pieces of any length; a piece ending on an odd
/// byte carries it into the next one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u64,
    pending: Option<u8>,
}

impl Checksum {
    pub const fn new() -> Self {
        Self {
            sum: 0,
            pending: None,
        }
    }

    pub fn add(&mut self, mut data: &[u8]) {
        if let Some(hi) = self.pending.take() {
            match data.split_first() {
                Some((&lo, rest)) => {
                    self.sum += u16::from_be_bytes([hi, lo]) as u64;
                    data = rest;
                }
                None => {
                    self.pending = Some(hi);
                    return;
                }
            }
        }

        let mut words = data.chunks_exact(2);
        for w in &mut words {
            self.sum += u16::from_be_bytes([w[0], w[1]]) as u64;
        }
        if let [last] = words.remainder() {
            self.pending = Some(*last);
        }
    }

    pub fn add_u16(&mut self, value: u16) {
        self.add(&value.to_be_bytes());
    }

    pub fn add_u32(&mut self, value: u32) {
        self.add(&value.to_be_bytes());
    }

    /// Feed `len` bytes of `buffer` starting at `offset`.
    ///
    /// Returns the number of bytes actually summed.
    pub fn add_buffer(&mut self, buffer: &ChunkedBuffer<'_>, offset: usize, len: usize) -> usize {
        let mut skip = offset;
        let mut remaining = len;
        for data in buffer.chunks() {
            if remaining == 0 {
                break;
            }
            if skip >= data.len() {
                skip -= data.len();
                continue;
            }
            let n = core::cmp::min(data.len() - skip, remaining);
            self.add(&data[skip..skip + n]);
            remaining -= n;
            skip = 0;
        }
        len - remaining
    }

    /// Fold and complement.
    pub fn finish(self) -> u16 {
        let mut sum = self.sum;
        if let Some(hi) = self.pending {
            sum += (hi as u64) << 8;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// Sum of the IPv6 upper-layer pseudo-header.
pub fn ipv6_pseudo_header(src: &Ipv6Addr, dst: &Ipv6Addr, length: u32, next_header: u8) -> Checksum {
    let mut c = Checksum::new();
    c.add(&src.octets());
    c.add(&dst.octets());
    c.add_u32(length);
    c.add(&[0, 0, 0, next_header]);
    c
}

/// Sum of the IPv4 upper-layer pseudo-header.
pub fn ipv4_pseudo_header(src: &Ipv4Addr, dst: &Ipv4Addr, protocol: u8, length: u16) -> Checksum {
    let mut c = Checksum::new();
    c.add(&src.octets());
    c.add(&dst.octets());
    c.add(&[0, protocol]);
    c.add_u16(length);
    c
}

/// Checksum of an upper-layer message held in `buffer`.
///
/// A message whose checksum field is already filled in yields zero when
/// intact.
pub fn upper_layer_checksum(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    next_header: u8,
    buffer: &ChunkedBuffer<'_>,
    offset: usize,
    len: usize,
) -> u16 {
    let mut c = ipv6_pseudo_header(src, dst, len as u32, next_header);
    c.add_buffer(buffer, offset, len);
    c.finish()
}
