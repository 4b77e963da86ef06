//! Per-interface IPv6 configuration.

use core::net::Ipv6Addr;

use heapless::Vec;

use super::addr::{self, UNSPECIFIED};

/// DNS servers kept per interface.
pub const IPV6_MAX_DNS_SERVERS: usize = 2;

/// Lifecycle of an assigned address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrState {
    /// Not assigned.
    #[default]
    Invalid,
    /// Uniqueness on the link is being verified.
    Tentative,
    /// Assigned, unrestricted use.
    Preferred,
    /// Assigned, use discouraged for new communication.
    Deprecated,
}

impl AddrState {
    /// Usable as a source or as a local destination.
    pub fn is_valid(self) -> bool {
        matches!(self, AddrState::Preferred | AddrState::Deprecated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Config {
    pub link_local: Ipv6Addr,
    pub link_local_state: AddrState,
    pub global: Ipv6Addr,
    pub global_state: AddrState,
    /// On-link prefix of the global address.
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    /// Default router, if any.
    pub router: Option<Ipv6Addr>,
    pub dns_servers: Vec<Ipv6Addr, IPV6_MAX_DNS_SERVERS>,
}

impl Default for Ipv6Config {
    fn default() -> Self {
        Self {
            link_local: UNSPECIFIED,
            link_local_state: AddrState::Invalid,
            global: UNSPECIFIED,
            global_state: AddrState::Invalid,
            prefix: UNSPECIFIED,
            prefix_len: 0,
            router: None,
            dns_servers: Vec::new(),
        }
    }
}

impl Ipv6Config {
    pub fn set_link_local(&mut self, addr: Ipv6Addr, state: AddrState) {
        self.link_local = addr;
        self.link_local_state = state;
    }

    /// Assign the global address; its first `prefix_len` bits form the
    /// on-link prefix.
    pub fn set_global(&mut self, addr: Ipv6Addr, prefix_len: u8, state: AddrState) {
        let prefix_len = prefix_len.min(128);
        let mask = if prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - prefix_len as u32)
        };
        self.global = addr;
        self.global_state = state;
        self.prefix = Ipv6Addr::from(u128::from_be_bytes(addr.octets()) & mask);
        self.prefix_len = prefix_len;
    }

    /// Configured addresses with their state, link-local first.
    pub fn addresses(&self) -> impl Iterator<Item = (Ipv6Addr, AddrState)> {
        [
            (self.link_local, self.link_local_state),
            (self.global, self.global_state),
        ]
        .into_iter()
        .filter(|(_, state)| *state != AddrState::Invalid)
    }

    /// `addr` is one of our valid unicast addresses.
    pub fn is_local_addr(&self, addr: &Ipv6Addr) -> bool {
        self.addresses().any(|(a, s)| s.is_valid() && a == *addr)
    }

    /// `addr` is reachable without a router.
    pub fn is_on_link(&self, addr: &Ipv6Addr) -> bool {
        addr::is_link_local_unicast(addr)
            || (self.global_state.is_valid() && addr::comp_prefix(addr, &self.prefix, self.prefix_len))
    }
}
