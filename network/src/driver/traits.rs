//! Driver trait definitions.

use crate::buffer::ChunkedBuffer;
use crate::error::DriverError;
use crate::types::MacAddress;

/// Negotiated link speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Mbps10,
    Mbps100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Physical link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub up: bool,
    pub speed: LinkSpeed,
    pub duplex: Duplex,
}

impl LinkState {
    pub const DOWN: LinkState = LinkState {
        up: false,
        speed: LinkSpeed::Mbps10,
        duplex: Duplex::Half,
    };

    pub const fn up(speed: LinkSpeed, duplex: Duplex) -> Self {
        Self {
            up: true,
            speed,
            duplex,
        }
    }
}

/// PHY management (MDIO) register access.
pub trait Mdio {
    /// Read a 16-bit PHY register.
    fn read_phy_reg(&mut self, phy_addr: u8, reg: u8) -> u16;

    /// Write a 16-bit PHY register.
    fn write_phy_reg(&mut self, phy_addr: u8, reg: u8, data: u16);
}

/// Network controller capability.
///
/// The interface serializes every call: each one runs inside the
/// interface's critical section with the device interrupt masked through
/// [`disable_irq`](Self::disable_irq).
pub trait NicDriver: Mdio {
    /// Get MAC address.
    fn mac_address(&self) -> MacAddress;

    /// Bring the controller up.
    fn init(&mut self) -> Result<(), DriverError>;

    /// Periodic housekeeping, called every tick interval.
    fn tick(&mut self) {}

    /// Unmask the device interrupt.
    fn enable_irq(&mut self);

    /// Mask the device interrupt.
    fn disable_irq(&mut self);

    /// Service pending device events.
    ///
    /// Returns `true` when the link state changed.
    fn event_handler(&mut self) -> bool;

    /// Current link status.
    fn link_state(&self) -> LinkState;

    /// Check if device can accept a TX frame.
    fn can_transmit(&self) -> bool;

    /// Transmit the frame held in `buffer` starting at `offset`.
    ///
    /// # Contract
    /// - MUST return immediately (no completion wait)
    fn send_packet(&mut self, buffer: &ChunkedBuffer<'_>, offset: usize) -> Result<(), DriverError>;

    /// Receive an Ethernet frame.
    ///
    /// # Returns
    /// - `Ok(Some(len))`: Frame received, `len` bytes copied
    /// - `Ok(None)`: No frame available (normal)
    /// - `Err(DriverError)`: Receive error
    fn receive(&mut self, frame: &mut [u8]) -> Result<Option<usize>, DriverError>;

    /// Program the multicast address filter.
    fn set_mac_filter(&mut self, filter: &[MacAddress]) -> Result<(), DriverError>;
}
