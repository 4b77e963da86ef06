//! Embernet network stack
//!
//! Embedded IPv6 protocol core for bare-metal Ethernet devices: chunked
//! packet buffers over a fixed block pool, serialized NIC access, IPv6
//! with fragmentation and reassembly, ICMPv6 echo, MLDv1 and an IPv4 DHCP
//! client.
//!
//! # Layers
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ stack::Runner   (poll loop, DHCP)             │
//! ├──────────────┬──────────────┬─────────────────┤
//! │ ipv6 + frag  │ icmpv6, mld  │ ipv4/udp, dhcp  │
//! ├──────────────┴──────────────┴─────────────────┤
//! │ stack::NetInterface  (tables, link, TX lock)  │
//! ├───────────────────────────────────────────────┤
//! │ driver::NicDriver    buffer::ChunkedBuffer    │
//! └───────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod dhcp;
pub mod driver;
pub mod error;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod mld;
pub mod stack;
pub mod time;
pub mod types;

#[cfg(feature = "global_allocator")]
pub mod alloc_heap;

pub use buffer::{ChunkedBuffer, MemPool};
pub use dhcp::{DhcpClient, DhcpClientSettings, DhcpEvent, DhcpLease, DhcpState};
pub use driver::{LinkState, NicDriver};
pub use error::{DriverError, NetError, Result};
pub use stack::{InterfaceConfig, NetInterface, Runner};
pub use time::Tick;
