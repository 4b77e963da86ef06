//! Ethernet frame types and helpers.
//!
//! # Reference
//! IEEE 802.3

use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

use crate::error::{NetError, Result};

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
pub const ETH_MTU: usize = 1500;
/// Largest frame handled, without FCS.
pub const ETH_FRAME_MAX: usize = ETH_HLEN + ETH_MTU;

/// MAC address type.
pub type MacAddress = EthernetAddress;

pub const BROADCAST_MAC: MacAddress = EthernetAddress([0xff; 6]);

/// Decoded Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dest: MacAddress,
    pub src: MacAddress,
    pub ethertype: EthernetProtocol,
}

impl EthernetHeader {
    /// Parse the header of a received frame.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let frame = EthernetFrame::new_checked(frame).map_err(|_| NetError::InvalidLength)?;
        Ok(Self {
            dest: frame.dst_addr(),
            src: frame.src_addr(),
            ethertype: frame.ethertype(),
        })
    }

    /// Serialize into a 14-byte header.
    pub fn emit(&self) -> [u8; ETH_HLEN] {
        let mut bytes = [0u8; ETH_HLEN];
        let mut frame = EthernetFrame::new_unchecked(&mut bytes[..]);
        frame.set_dst_addr(self.dest);
        frame.set_src_addr(self.src);
        frame.set_ethertype(self.ethertype);
        bytes
    }
}

/// Group bit set (multicast or broadcast destination).
pub fn is_multicast_mac(mac: &MacAddress) -> bool {
    mac.0[0] & 0x01 != 0
}
