//! In-memory NIC.
//!
//! Transmitted frames are queued for inspection and received frames are
//! injected by the owner. Used by host simulations and the test suite.

use heapless::{Deque, Vec};

use super::traits::{Duplex, LinkSpeed, LinkState, Mdio, NicDriver};
use crate::buffer::ChunkedBuffer;
use crate::error::DriverError;
use crate::types::{MacAddress, ETH_FRAME_MAX};

/// Frames held per direction.
pub const LOOPBACK_QUEUE_LEN: usize = 32;

/// Multicast filter slots supported by the simulated hardware.
pub const LOOPBACK_FILTER_LEN: usize = 16;

/// One Ethernet frame.
pub type Frame = Vec<u8, ETH_FRAME_MAX>;

pub struct LoopbackDriver {
    mac: MacAddress,
    link: LinkState,
    link_event: bool,
    irq_enabled: bool,
    initialized: bool,
    tx: Deque<Frame, LOOPBACK_QUEUE_LEN>,
    rx: Deque<Frame, LOOPBACK_QUEUE_LEN>,
    filter: Vec<MacAddress, LOOPBACK_FILTER_LEN>,
    ticks: u32,
    phy_regs: [u16; 32],
}

impl LoopbackDriver {
    /// New driver with the link up at 100 Mbit/s full duplex.
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            link: LinkState::up(LinkSpeed::Mbps100, Duplex::Full),
            link_event: false,
            irq_enabled: false,
            initialized: false,
            tx: Deque::new(),
            rx: Deque::new(),
            filter: Vec::new(),
            ticks: 0,
            phy_regs: [0; 32],
        }
    }

    /// Queue a frame for reception.
    pub fn inject(&mut self, frame: &[u8]) -> Result<(), DriverError> {
        let frame = Frame::from_slice(frame).map_err(|_| DriverError::FrameTooLarge)?;
        self.rx.push_back(frame).map_err(|_| DriverError::QueueFull)
    }

    /// Oldest transmitted frame.
    pub fn take_sent(&mut self) -> Option<Frame> {
        self.tx.pop_front()
    }

    pub fn sent_count(&self) -> usize {
        self.tx.len()
    }

    /// Change the simulated link; reported by the next `event_handler` call.
    pub fn set_link(&mut self, link: LinkState) {
        if link != self.link {
            self.link = link;
            self.link_event = true;
        }
    }

    /// Addresses last programmed through `set_mac_filter`.
    pub fn mac_filter(&self) -> &[MacAddress] {
        &self.filter
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}

impl Mdio for LoopbackDriver {
    fn read_phy_reg(&mut self, _phy_addr: u8, reg: u8) -> u16 {
        self.phy_regs[(reg & 0x1f) as usize]
    }

    fn write_phy_reg(&mut self, _phy_addr: u8, reg: u8, data: u16) {
        self.phy_regs[(reg & 0x1f) as usize] = data;
    }
}

impl NicDriver for LoopbackDriver {
    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn init(&mut self) -> Result<(), DriverError> {
        self.initialized = true;
        Ok(())
    }

    fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    fn enable_irq(&mut self) {
        self.irq_enabled = true;
    }

    fn disable_irq(&mut self) {
        self.irq_enabled = false;
    }

    fn event_handler(&mut self) -> bool {
        core::mem::take(&mut self.link_event)
    }

    fn link_state(&self) -> LinkState {
        self.link
    }

    fn can_transmit(&self) -> bool {
        true
    }

    fn send_packet(&mut self, buffer: &ChunkedBuffer<'_>, offset: usize) -> Result<(), DriverError> {
        if !self.link.up {
            return Err(DriverError::DeviceNotReady);
        }
        let len = buffer.len().saturating_sub(offset);
        if len > ETH_FRAME_MAX {
            return Err(DriverError::FrameTooLarge);
        }
        let mut frame = Frame::new();
        frame.resize(len, 0).map_err(|_| DriverError::FrameTooLarge)?;
        if buffer.read(offset, &mut frame) != len {
            return Err(DriverError::DeviceError);
        }
        self.tx.push_back(frame).map_err(|_| DriverError::QueueFull)
    }

    fn receive(&mut self, frame: &mut [u8]) -> Result<Option<usize>, DriverError> {
        let next = match self.rx.front() {
            Some(f) => f,
            None => return Ok(None),
        };
        if next.len() > frame.len() {
            return Err(DriverError::BufferTooSmall);
        }
        let len = next.len();
        frame[..len].copy_from_slice(next);
        self.rx.pop_front();
        Ok(Some(len))
    }

    fn set_mac_filter(&mut self, filter: &[MacAddress]) -> Result<(), DriverError> {
        self.filter = Vec::from_slice(filter).map_err(|_| DriverError::DeviceError)?;
        Ok(())
    }
}
