//! IPv6 address classification and source address selection.
//!
//! # Reference
//! RFC 4291 (addressing architecture), RFC 6724 (default address selection)

use core::net::Ipv6Addr;

use super::config::{AddrState, Ipv6Config};
use crate::error::{NetError, Result};
use crate::types::MacAddress;
use smoltcp::wire::EthernetAddress;

pub const UNSPECIFIED: Ipv6Addr = Ipv6Addr::UNSPECIFIED;
/// ff02::1
pub const LINK_LOCAL_ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
/// ff02::2
pub const LINK_LOCAL_ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// Address scope, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Reserved = 0x0,
    InterfaceLocal = 0x1,
    LinkLocal = 0x2,
    AdminLocal = 0x4,
    SiteLocal = 0x5,
    OrganizationLocal = 0x8,
    Global = 0xE,
}

impl Scope {
    fn from_nibble(n: u8) -> Scope {
        match n {
            0x0 => Scope::Reserved,
            0x1 => Scope::InterfaceLocal,
            0x2 => Scope::LinkLocal,
            0x4 => Scope::AdminLocal,
            0x5 => Scope::SiteLocal,
            0x8 => Scope::OrganizationLocal,
            // unassigned values are treated as global
            _ => Scope::Global,
        }
    }
}

pub fn is_multicast(addr: &Ipv6Addr) -> bool {
    addr.octets()[0] == 0xff
}

/// fe80::/10
pub fn is_link_local_unicast(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[0] == 0xfe && (o[1] & 0xc0) == 0x80
}

/// fec0::/10 (deprecated, still classified for scope purposes)
pub fn is_site_local_unicast(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[0] == 0xfe && (o[1] & 0xc0) == 0xc0
}

/// Scope field of a multicast address.
pub fn multicast_scope(addr: &Ipv6Addr) -> Scope {
    Scope::from_nibble(addr.octets()[1] & 0x0f)
}

/// Scope of any address.
pub fn scope(addr: &Ipv6Addr) -> Scope {
    if is_multicast(addr) {
        multicast_scope(addr)
    } else if is_link_local_unicast(addr) || addr.is_loopback() {
        Scope::LinkLocal
    } else if is_site_local_unicast(addr) {
        Scope::SiteLocal
    } else {
        Scope::Global
    }
}

/// Compare the first `prefix_len` bits of two addresses.
pub fn comp_prefix(a: &Ipv6Addr, b: &Ipv6Addr, prefix_len: u8) -> bool {
    if prefix_len > 128 {
        return false;
    }
    common_prefix_len(a, b) >= prefix_len
}

/// Number of leading bits shared by two addresses.
pub fn common_prefix_len(a: &Ipv6Addr, b: &Ipv6Addr) -> u8 {
    let x = u128::from_be_bytes(a.octets()) ^ u128::from_be_bytes(b.octets());
    x.leading_zeros() as u8
}

/// Solicited-node multicast address (ff02::1:ffXX:XXXX).
pub fn solicited_node(addr: &Ipv6Addr) -> Ipv6Addr {
    let o = addr.octets();
    Ipv6Addr::from([
        0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff, o[13], o[14], o[15],
    ])
}

pub fn is_solicited_node(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[..13] == [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0xff]
}

/// Ethernet group address for an IPv6 multicast address (33:33:xx:xx:xx:xx).
pub fn multicast_to_mac(addr: &Ipv6Addr) -> Result<MacAddress> {
    if !is_multicast(addr) {
        return Err(NetError::InvalidAddress);
    }
    let o = addr.octets();
    Ok(EthernetAddress([0x33, 0x33, o[12], o[13], o[14], o[15]]))
}

/// Link-local address derived from a MAC through modified EUI-64.
pub fn link_local_from_mac(mac: &MacAddress) -> Ipv6Addr {
    let m = mac.0;
    Ipv6Addr::from([
        0xfe, 0x80, 0, 0, 0, 0, 0, 0,
        m[0] ^ 0x02, m[1], m[2], 0xff, 0xfe, m[3], m[4], m[5],
    ])
}

// ═══════════════════════════════════════════════════════════════════════════
// SOURCE ADDRESS SELECTION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    addr: Ipv6Addr,
    scope: Scope,
    deprecated: bool,
    prefix: u8,
}

/// `true` when `a` is preferred over `b` as a source for `dest`.
fn prefer(a: &Candidate, b: &Candidate, dest: &Ipv6Addr) -> bool {
    // same address as the destination
    if a.addr == *dest {
        return true;
    }
    if b.addr == *dest {
        return false;
    }
    // smallest sufficient scope
    if a.scope != b.scope {
        return a.scope < b.scope;
    }
    // avoid deprecated addresses
    if a.deprecated != b.deprecated {
        return !a.deprecated;
    }
    // longest matching prefix, then configuration order
    a.prefix > b.prefix
}

/// Pick the source address for `dest` among the valid addresses of
/// `configs` (one per candidate interface).
///
/// Returns the index of the chosen configuration and the address. When no
/// address qualifies, link-scope multicast destinations fall back to the
/// unspecified address on the first interface; anything else fails with
/// `NoRoute`.
pub fn select_source_addr(configs: &[Ipv6Config], dest: &Ipv6Addr) -> Result<(usize, Ipv6Addr)> {
    let dest_scope = scope(dest);
    let mut best: Option<Candidate> = None;

    for (index, config) in configs.iter().enumerate() {
        for (addr, state) in config.addresses() {
            if !state.is_valid() {
                continue;
            }
            let cand = Candidate {
                index,
                addr,
                scope: scope(&addr),
                deprecated: state == AddrState::Deprecated,
                prefix: common_prefix_len(&addr, dest),
            };
            if cand.scope < dest_scope {
                continue;
            }
            best = match best {
                Some(cur) if !prefer(&cand, &cur, dest) => Some(cur),
                _ => Some(cand),
            };
        }
    }

    match best {
        Some(c) => Ok((c.index, c.addr)),
        None if !configs.is_empty() && is_multicast(dest) && dest_scope <= Scope::LinkLocal => {
            Ok((0, UNSPECIFIED))
        }
        None => Err(NetError::NoRoute),
    }
}

/// Reject addresses that may never appear as a source.
pub fn check_source_addr(addr: &Ipv6Addr) -> Result<()> {
    if addr.is_unspecified() || is_multicast(addr) {
        return Err(NetError::InvalidAddress);
    }
    Ok(())
}
