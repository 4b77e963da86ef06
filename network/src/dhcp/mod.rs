//! DHCP client.
//!
//! Non-blocking state machine: [`DhcpClient::step`] returns immediately
//! and is called from the main loop.
//!
//! # States
//! Init → Selecting → Requesting → Bound → Renewing → Rebinding,
//! or InitReboot → Rebooting → Bound when an address is cached.
//!
//! # Reference
//! RFC 2131, RFC 2132, RFC 4039

pub mod client;
pub mod message;

use core::net::Ipv4Addr;

use rand_core::RngCore;

use crate::driver::NicDriver;
use crate::error::Result;
use crate::ipv4::{Ipv4Config, UdpDatagram, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, IPV4_MAX_DNS_SERVERS};
use crate::stack::NetInterface;
use crate::types::MacAddress;

pub use client::{DhcpClient, DhcpState};

/// Random startup delay ceiling.
pub const DHCP_INIT_DELAY_MS: u32 = 2_000;
pub const DHCP_DISCOVER_INIT_TIMEOUT_MS: u32 = 4_000;
pub const DHCP_DISCOVER_MAX_TIMEOUT_MS: u32 = 16_000;
pub const DHCP_REQUEST_MAX_RETRIES: u32 = 4;
pub const DHCP_REQUEST_INIT_TIMEOUT_MS: u32 = 4_000;
pub const DHCP_REQUEST_MAX_TIMEOUT_MS: u32 = 64_000;
/// Smallest spacing of Request retransmissions while renewing/rebinding.
pub const DHCP_REQUEST_MIN_INTERVAL_MS: u32 = 60_000;
/// Retransmission timeouts are randomized by ± this many ms.
pub const DHCP_RAND_FACTOR_MS: u32 = 1_000;
/// Shortest lease whose T1 < T2 < lease ordering holds in whole seconds.
pub const DHCP_MIN_LEASE_TIME: u32 = 3;
/// Lease time meaning "never expires".
pub const DHCP_INFINITE_TIME: u32 = 0xFFFF_FFFF;

/// Client options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpClientSettings {
    /// Ask for the two-message exchange (option 80).
    pub rapid_commit: bool,
    /// Previously leased address; starts in INIT-REBOOT when set.
    pub requested_addr: Option<Ipv4Addr>,
    /// Client identifier. Defaults to hardware type 1 and the MAC address.
    pub client_id: Option<&'static [u8]>,
    /// Host name sent to the server.
    pub hostname: Option<&'static str>,
}

/// Parameters of an acquired lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpLease {
    pub addr: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: [Ipv4Addr; IPV4_MAX_DNS_SERVERS],
    pub server: Ipv4Addr,
    /// Lease time in seconds.
    pub lease_time: u32,
    /// Renewal time in seconds.
    pub t1: u32,
    /// Rebinding time in seconds.
    pub t2: u32,
}

impl DhcpLease {
    pub fn is_infinite(&self) -> bool {
        self.lease_time == DHCP_INFINITE_TIME
    }

    pub fn ipv4_config(&self) -> Ipv4Config {
        Ipv4Config {
            addr: self.addr,
            subnet_mask: self.subnet_mask,
            gateway: self.router,
            dns_servers: self.dns_servers,
        }
    }
}

/// Outcome of a [`DhcpClient::step`] reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpEvent {
    /// A lease was obtained or renewed and applied to the interface.
    Configured(DhcpLease),
    /// The lease was lost and the address removed from the interface.
    Deconfigured,
}

/// What the client needs from the interface it configures.
pub trait DhcpTransport {
    fn mac_address(&self) -> MacAddress;

    fn is_link_up(&self) -> bool;

    fn random_u32(&mut self) -> u32;

    /// Send `payload` from the client port to the server port.
    fn send(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Result<()>;

    /// Next datagram received on the client port.
    fn receive(&mut self) -> Option<UdpDatagram>;

    /// Apply a lease, or remove the address when `None`.
    fn configure(&mut self, lease: Option<&DhcpLease>);
}

impl<'a, D: NicDriver, R: RngCore> DhcpTransport for &NetInterface<'a, D, R> {
    fn mac_address(&self) -> MacAddress {
        NetInterface::mac_address(self)
    }

    fn is_link_up(&self) -> bool {
        NetInterface::is_link_up(self)
    }

    fn random_u32(&mut self) -> u32 {
        NetInterface::random_u32(self)
    }

    fn send(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Result<()> {
        self.send_udp(src, dst, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, payload)
    }

    fn receive(&mut self) -> Option<UdpDatagram> {
        self.udp_receive()
    }

    fn configure(&mut self, lease: Option<&DhcpLease>) {
        let config = lease.map(DhcpLease::ipv4_config).unwrap_or_default();
        self.set_ipv4_config(config);
    }
}
