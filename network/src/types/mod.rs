//! Shared data types module.
//!
//! Link-layer framing and the address types used across the stack.

pub mod ethernet;

// Re-exports
pub use core::net::{Ipv4Addr, Ipv6Addr};
pub use ethernet::{
    is_multicast_mac, EthernetHeader, MacAddress, BROADCAST_MAC, ETH_ALEN, ETH_FRAME_MAX, ETH_HLEN,
    ETH_MTU,
};
pub use smoltcp::wire::EthernetProtocol;
