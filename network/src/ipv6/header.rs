//! IPv6 fixed header and extension headers.
//!
//! # Reference
//! RFC 8200 §3, §4

use core::net::Ipv6Addr;

use crate::error::{NetError, Result};

pub const IPV6_HEADER_LEN: usize = 40;
pub const IPV6_FRAG_HEADER_LEN: usize = 8;
pub const IPV6_DEFAULT_HOP_LIMIT: u8 = 64;
/// Minimum link MTU every IPv6 link must support.
pub const IPV6_DEFAULT_MTU: usize = 1280;

/// Fragment offset field: offset bits.
pub const IPV6_OFFSET_MASK: u16 = 0xFFF8;
/// Fragment offset field: more-fragments flag.
pub const IPV6_FLAG_M: u16 = 0x0001;

/// Next Header values understood by the header walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHeader {
    HopByHop,
    Tcp,
    Udp,
    Routing,
    Fragment,
    Esp,
    Ah,
    Icmpv6,
    NoNext,
    DestOpts,
    Other(u8),
}

impl From<u8> for NextHeader {
    fn from(v: u8) -> Self {
        match v {
            0 => NextHeader::HopByHop,
            6 => NextHeader::Tcp,
            17 => NextHeader::Udp,
            43 => NextHeader::Routing,
            44 => NextHeader::Fragment,
            50 => NextHeader::Esp,
            51 => NextHeader::Ah,
            58 => NextHeader::Icmpv6,
            59 => NextHeader::NoNext,
            60 => NextHeader::DestOpts,
            other => NextHeader::Other(other),
        }
    }
}

impl From<NextHeader> for u8 {
    fn from(v: NextHeader) -> u8 {
        match v {
            NextHeader::HopByHop => 0,
            NextHeader::Tcp => 6,
            NextHeader::Udp => 17,
            NextHeader::Routing => 43,
            NextHeader::Fragment => 44,
            NextHeader::Esp => 50,
            NextHeader::Ah => 51,
            NextHeader::Icmpv6 => 58,
            NextHeader::NoNext => 59,
            NextHeader::DestOpts => 60,
            NextHeader::Other(other) => other,
        }
    }
}

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, hop_limit: u8, payload_len: u16) -> Self {
        Self {
            traffic_class: 0,
            flow_label: 0,
            payload_len,
            next_header,
            hop_limit,
            src,
            dst,
        }
    }

    pub fn parse(bytes: &[u8; IPV6_HEADER_LEN]) -> Result<Self> {
        if bytes[0] >> 4 != 6 {
            return Err(NetError::InvalidHeader);
        }
        let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut src = [0u8; 16];
        let mut dst = [0u8; 16];
        src.copy_from_slice(&bytes[8..24]);
        dst.copy_from_slice(&bytes[24..40]);
        Ok(Self {
            traffic_class: ((word >> 20) & 0xff) as u8,
            flow_label: word & 0x000f_ffff,
            payload_len: u16::from_be_bytes([bytes[4], bytes[5]]),
            next_header: bytes[6],
            hop_limit: bytes[7],
            src: Ipv6Addr::from(src),
            dst: Ipv6Addr::from(dst),
        })
    }

    pub fn emit(&self) -> [u8; IPV6_HEADER_LEN] {
        let mut bytes = [0u8; IPV6_HEADER_LEN];
        let word = (6u32 << 28) | ((self.traffic_class as u32) << 20) | (self.flow_label & 0x000f_ffff);
        bytes[0..4].copy_from_slice(&word.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.payload_len.to_be_bytes());
        bytes[6] = self.next_header;
        bytes[7] = self.hop_limit;
        bytes[8..24].copy_from_slice(&self.src.octets());
        bytes[24..40].copy_from_slice(&self.dst.octets());
        bytes
    }
}

/// Fragment extension header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub next_header: u8,
    /// Payload offset in bytes (multiple of 8).
    pub offset: u16,
    pub more: bool,
    pub identification: u32,
}

impl FragmentHeader {
    pub fn parse(bytes: &[u8; IPV6_FRAG_HEADER_LEN]) -> Self {
        let field = u16::from_be_bytes([bytes[2], bytes[3]]);
        Self {
            next_header: bytes[0],
            offset: field & IPV6_OFFSET_MASK,
            more: field & IPV6_FLAG_M != 0,
            identification: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn emit(&self) -> [u8; IPV6_FRAG_HEADER_LEN] {
        let mut bytes = [0u8; IPV6_FRAG_HEADER_LEN];
        let field = (self.offset & IPV6_OFFSET_MASK) | if self.more { IPV6_FLAG_M } else { 0 };
        bytes[0] = self.next_header;
        bytes[2..4].copy_from_slice(&field.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.identification.to_be_bytes());
        bytes
    }
}

/// Total length of a Hop-by-Hop, Destination Options or Routing header
/// from its Hdr Ext Len byte.
pub fn ext_header_len(hdr_ext_len: u8) -> usize {
    (hdr_ext_len as usize + 1) * 8
}

/// Total length of an Authentication Header from its Payload Len byte.
pub fn ah_header_len(payload_len: u8) -> usize {
    (payload_len as usize + 2) * 4
}

// ═══════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════

pub const OPTION_PAD1: u8 = 0;
pub const OPTION_PADN: u8 = 1;
pub const OPTION_ROUTER_ALERT: u8 = 5;

/// Walk the TLV options of a Hop-by-Hop or Destination Options header.
///
/// `options` is the header body after its first two bytes. Unknown options
/// whose action bits request skipping are skipped; any other unknown option
/// rejects the datagram.
pub fn check_options(options: &[u8]) -> Result<()> {
    let mut i = 0;
    while i < options.len() {
        let kind = options[i];
        if kind == OPTION_PAD1 {
            i += 1;
            continue;
        }
        if i + 1 >= options.len() {
            return Err(NetError::InvalidHeader);
        }
        let len = options[i + 1] as usize;
        if i + 2 + len > options.len() {
            return Err(NetError::InvalidHeader);
        }
        match kind {
            OPTION_PADN | OPTION_ROUTER_ALERT => {}
            _ if kind >> 6 == 0 => {}
            _ => return Err(NetError::InvalidHeader),
        }
        i += 2 + len;
    }
    Ok(())
}

/// Hop-by-Hop header carrying a Router Alert option for MLD (RFC 2711).
pub fn router_alert_header(next_header: u8) -> [u8; 8] {
    [next_header, 0, OPTION_ROUTER_ALERT, 2, 0, 0, OPTION_PADN, 0]
}
