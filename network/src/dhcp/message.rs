//! DHCP message codec.
//!
//! Fixed BOOTP header followed by the magic cookie and the options area.
//!
//! ```text
//!  0      1      2      3
//! ┌──────┬──────┬──────┬──────┐
//! │  op  │ htype│ hlen │ hops │
//! ├──────┴──────┴──────┴──────┤
//! │            xid            │
//! ├─────────────┬─────────────┤
//! │    secs     │    flags    │
//! ├─────────────┴─────────────┤
//! │ ciaddr / yiaddr / siaddr / giaddr
//! ├───────────────────────────┤
//! │ chaddr (16) sname (64) file (128)
//! ├───────────────────────────┤
//! │ magic cookie, options ... │
//! └───────────────────────────┘
//! ```
//!
//! # Reference
//! RFC 2131 §2, RFC 2132, RFC 4039 (rapid commit)

use core::net::Ipv4Addr;

use heapless::Vec;

use crate::error::{NetError, Result};
use crate::types::MacAddress;
use smoltcp::wire::EthernetAddress;

/// Fixed header length, up to and excluding the magic cookie.
pub const DHCP_HEADER_LEN: usize = 236;
pub const DHCP_MAGIC_COOKIE: u32 = 0x6382_5363;
/// Offset of the options area.
pub const DHCP_OPTIONS_OFFSET: usize = DHCP_HEADER_LEN + 4;
/// Messages are padded to the BOOTP minimum.
pub const DHCP_MIN_MSG_SIZE: usize = 300;
/// Largest message built or accepted (576-byte IP datagram).
pub const DHCP_MAX_MSG_SIZE: usize = 548;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const FLAG_BROADCAST: u16 = 0x8000;

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_HOST_NAME: u8 = 12;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_REQUEST_LIST: u8 = 55;
pub const OPT_MAX_MESSAGE_SIZE: u8 = 57;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_RAPID_COMMIT: u8 = 80;
pub const OPT_END: u8 = 255;

/// Options asked from the server.
pub const PARAM_REQUEST_LIST: [u8; 6] = [
    OPT_SUBNET_MASK,
    OPT_ROUTER,
    OPT_DNS_SERVER,
    OPT_LEASE_TIME,
    OPT_RENEWAL_TIME,
    OPT_REBINDING_TIME,
];

/// DHCP Message Type option values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => MessageType::Discover,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            4 => MessageType::Decline,
            5 => MessageType::Ack,
            6 => MessageType::Nak,
            7 => MessageType::Release,
            8 => MessageType::Inform,
            _ => return None,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Client message under construction.
pub struct MessageBuilder {
    buf: Vec<u8, DHCP_MAX_MSG_SIZE>,
}

impl MessageBuilder {
    /// Start a BOOTREQUEST carrying `msg_type`.
    pub fn new(
        msg_type: MessageType,
        xid: u32,
        secs: u16,
        chaddr: MacAddress,
        ciaddr: Ipv4Addr,
        broadcast: bool,
    ) -> Self {
        let mut buf = Vec::new();
        // capacity exceeds the fixed part
        let _ = buf.resize(DHCP_OPTIONS_OFFSET, 0);

        buf[0] = BOOTREQUEST;
        buf[1] = HTYPE_ETHERNET;
        buf[2] = chaddr.0.len() as u8;
        buf[4..8].copy_from_slice(&xid.to_be_bytes());
        buf[8..10].copy_from_slice(&secs.to_be_bytes());
        let flags = if broadcast { FLAG_BROADCAST } else { 0 };
        buf[10..12].copy_from_slice(&flags.to_be_bytes());
        buf[12..16].copy_from_slice(&ciaddr.octets());
        buf[28..34].copy_from_slice(&chaddr.0);
        buf[DHCP_HEADER_LEN..DHCP_OPTIONS_OFFSET].copy_from_slice(&DHCP_MAGIC_COOKIE.to_be_bytes());

        let mut builder = Self { buf };
        let _ = builder.option(OPT_MESSAGE_TYPE, &[msg_type as u8]);
        builder
    }

    /// Append one option.
    pub fn option(&mut self, code: u8, data: &[u8]) -> Result<()> {
        if data.len() > u8::MAX as usize {
            return Err(NetError::InvalidLength);
        }
        // keep room for the end option
        if self.buf.len() + 2 + data.len() + 1 > DHCP_MAX_MSG_SIZE {
            return Err(NetError::OutOfResources);
        }
        let _ = self.buf.push(code);
        let _ = self.buf.push(data.len() as u8);
        let _ = self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn option_addr(&mut self, code: u8, addr: Ipv4Addr) -> Result<()> {
        self.option(code, &addr.octets())
    }

    /// Terminate the options and pad to the minimum size.
    pub fn finish(mut self) -> Vec<u8, DHCP_MAX_MSG_SIZE> {
        let _ = self.buf.push(OPT_END);
        if self.buf.len() < DHCP_MIN_MSG_SIZE {
            let _ = self.buf.resize(DHCP_MIN_MSG_SIZE, OPT_PAD);
        }
        self.buf
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════

/// View of a received message.
#[derive(Debug, Clone, Copy)]
pub struct DhcpMessage<'m> {
    pub op: u8,
    pub xid: u32,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub chaddr: MacAddress,
    options: &'m [u8],
}

impl<'m> DhcpMessage<'m> {
    pub fn parse(data: &'m [u8]) -> Result<Self> {
        if data.len() < DHCP_OPTIONS_OFFSET {
            return Err(NetError::InvalidLength);
        }
        let cookie = u32::from_be_bytes([data[236], data[237], data[238], data[239]]);
        if cookie != DHCP_MAGIC_COOKIE {
            return Err(NetError::InvalidHeader);
        }
        if data[1] != HTYPE_ETHERNET || data[2] != 6 {
            return Err(NetError::InvalidHeader);
        }
        let addr = |o: usize| Ipv4Addr::new(data[o], data[o + 1], data[o + 2], data[o + 3]);
        let mut chaddr = [0u8; 6];
        chaddr.copy_from_slice(&data[28..34]);
        Ok(Self {
            op: data[0],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ciaddr: addr(12),
            yiaddr: addr(16),
            siaddr: addr(20),
            chaddr: EthernetAddress(chaddr),
            options: &data[DHCP_OPTIONS_OFFSET..],
        })
    }

    /// Value of the first occurrence of option `code`.
    ///
    /// A truncated options area ends the search.
    pub fn option(&self, code: u8) -> Option<&'m [u8]> {
        let opts = self.options;
        let mut i = 0;
        while i < opts.len() {
            match opts[i] {
                OPT_PAD => i += 1,
                OPT_END => return None,
                c => {
                    let len = *opts.get(i + 1)? as usize;
                    let value = opts.get(i + 2..i + 2 + len)?;
                    if c == code {
                        return Some(value);
                    }
                    i += 2 + len;
                }
            }
        }
        None
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self.option(OPT_MESSAGE_TYPE)? {
            [t] => MessageType::from_u8(*t),
            _ => None,
        }
    }

    pub fn option_u32(&self, code: u8) -> Option<u32> {
        let v: [u8; 4] = self.option(code)?.try_into().ok()?;
        Some(u32::from_be_bytes(v))
    }

    /// First address of an address-list option.
    pub fn option_addr(&self, code: u8) -> Option<Ipv4Addr> {
        self.option_addrs(code).next()
    }

    /// Every address of an address-list option.
    pub fn option_addrs(&self, code: u8) -> impl Iterator<Item = Ipv4Addr> + 'm {
        self.option(code)
            .unwrap_or(&[])
            .chunks_exact(4)
            .map(|a| Ipv4Addr::new(a[0], a[1], a[2], a[3]))
    }
}
