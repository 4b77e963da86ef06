//! Driver abstraction module.
//!
//! Provides the NIC and PHY capabilities the stack drives, plus an in-memory
//! loopback NIC.
//!
//! # Reference
//! IEEE 802.3 clause 22 (MDIO management registers)

pub mod loopback;
pub mod phy;
pub mod traits;

// Re-exports
pub use loopback::LoopbackDriver;
pub use phy::{Dp83848, Ksz8051, PhyDriver};
pub use traits::{Duplex, LinkSpeed, LinkState, Mdio, NicDriver};
