//! Network interface layer.
//!
//! This module owns the per-adapter state shared by every protocol layer
//! and the glue that drives it.
//!
//! # Components
//!
//! - [`NetInterface`] - Link state, address configuration, per-table locks,
//!   and serialized driver access
//! - [`Runner`] - Poll-driven main loop step (RX, tick, DHCP)
//! - [`LinkListener`] / [`UpperLayer`] - Hooks for transport endpoints
//!
//! # Usage
//!
//! ```ignore
//! use embernet::stack::{InterfaceConfig, NetInterface, Runner};
//! use embernet::driver::LoopbackDriver;
//! use embernet::buffer::MemPool;
//!
//! let pool = MemPool::new(64);
//! let iface = NetInterface::new(InterfaceConfig::default(), &pool, driver, rng);
//! iface.init()?;
//!
//! let mut runner = Runner::new(&iface);
//! loop {
//!     runner.poll(Tick(get_time_ms()));
//! }
//! ```

mod event;
mod interface;
mod runner;
mod tables;

use core::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::ChunkedBuffer;
use crate::driver::LinkState;
use crate::ipv6::Ipv6PseudoHeader;
use crate::types::ETH_MTU;

pub use event::Event;
pub use interface::{NetInterface, MAX_LINK_LISTENERS, RX_BUDGET};
pub use runner::Runner;
pub use tables::{
    AddrCache, ArpCache, MacFilter, NeighborCache, ADDR_CACHE_ENTRY_TTL_MS, ADDR_CACHE_SIZE,
    MAC_FILTER_SIZE,
};

/// Static interface parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Name used in log messages.
    pub name: &'static str,
    /// Link MTU in bytes (Ethernet payload).
    pub mtu: usize,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: "eth0",
            mtu: ETH_MTU,
        }
    }
}

/// Notified after the interface link state changed.
///
/// Transport endpoints bound to the interface register one so that pending
/// operations can fail fast when the link drops.
pub trait LinkListener {
    fn link_changed(&self, link: LinkState);
}

/// Receiver for upper-layer (TCP, UDP, other) payloads of IPv6 datagrams.
///
/// The checksum has been verified when it is mandatory for the protocol.
pub trait UpperLayer {
    fn process(&self, header: &Ipv6PseudoHeader, buffer: &ChunkedBuffer<'_>, offset: usize);
}

/// Interface counters.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    rx_frames: AtomicU32,
    rx_dropped: AtomicU32,
    rx_errors: AtomicU32,
    tx_frames: AtomicU32,
    tx_errors: AtomicU32,
}

/// Point-in-time copy of [`InterfaceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_frames: u32,
    pub rx_dropped: u32,
    pub rx_errors: u32,
    pub tx_frames: u32,
    pub tx_errors: u32,
}

impl InterfaceStats {
    pub const fn new() -> Self {
        Self {
            rx_frames: AtomicU32::new(0),
            rx_dropped: AtomicU32::new(0),
            rx_errors: AtomicU32::new(0),
            tx_frames: AtomicU32::new(0),
            tx_errors: AtomicU32::new(0),
        }
    }

    pub(crate) fn rx_frame(&self) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rx_drop(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rx_error(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tx_frame(&self) {
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }
}
