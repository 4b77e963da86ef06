//! Ethernet PHY transceivers.
//!
//! A PHY is reached through the MAC's management interface ([`Mdio`]).
//! The NIC driver owning the PHY forwards its interrupt and tick to the
//! [`PhyDriver`] and reports the decoded [`LinkState`] upward.

use super::traits::{Duplex, LinkSpeed, LinkState, Mdio};
use crate::error::DriverError;

/// Transceiver capability.
pub trait PhyDriver {
    /// Reset the transceiver and enable link-change interrupts.
    fn init(&mut self, mdio: &mut dyn Mdio) -> Result<(), DriverError>;

    /// Periodic poll for transceivers without an interrupt line.
    ///
    /// Returns `true` when the link state changed.
    fn tick(&mut self, _mdio: &mut dyn Mdio) -> bool {
        false
    }

    fn enable_irq(&mut self) {}

    fn disable_irq(&mut self) {}

    /// Acknowledge a PHY interrupt.
    ///
    /// Returns `true` when the link state changed.
    fn event_handler(&mut self, mdio: &mut dyn Mdio) -> bool;

    /// Last decoded link status.
    fn link_state(&self) -> LinkState;
}

// ═══════════════════════════════════════════════════════════════════════════
// KSZ8051 REGISTERS
// ═══════════════════════════════════════════════════════════════════════════

pub const KSZ8051_PHY_ADDR: u8 = 0;

pub const REG_BMCR: u8 = 0x00;
pub const REG_BMSR: u8 = 0x01;
pub const REG_ICSR: u8 = 0x1B;
pub const REG_PHYCON1: u8 = 0x1E;

pub const BMCR_RESET: u16 = 0x8000;
pub const BMSR_LINK_STATUS: u16 = 0x0004;

pub const ICSR_LINK_DOWN_IE: u16 = 0x0400;
pub const ICSR_LINK_UP_IE: u16 = 0x0100;
pub const ICSR_LINK_DOWN_IF: u16 = 0x0004;
pub const ICSR_LINK_UP_IF: u16 = 0x0001;

pub const PHYCON1_OP_MODE_MASK: u16 = 0x0007;
pub const PHYCON1_OP_MODE_10BT: u16 = 0x0001;
pub const PHYCON1_OP_MODE_100BTX: u16 = 0x0002;
pub const PHYCON1_OP_MODE_10BT_FD: u16 = 0x0005;
pub const PHYCON1_OP_MODE_100BTX_FD: u16 = 0x0006;

/// Reads of BMCR before giving up on a soft reset.
const RESET_POLL_LIMIT: usize = 1000;

/// Issue a BMCR soft reset and wait for the self-clearing bit.
fn soft_reset(mdio: &mut dyn Mdio, addr: u8) -> Result<(), DriverError> {
    mdio.write_phy_reg(addr, REG_BMCR, BMCR_RESET);
    let mut polls = 0;
    while mdio.read_phy_reg(addr, REG_BMCR) & BMCR_RESET != 0 {
        polls += 1;
        if polls >= RESET_POLL_LIMIT {
            log::warn!("[PHY] reset did not complete");
            return Err(DriverError::DeviceNotReady);
        }
    }
    Ok(())
}

/// Micrel KSZ8051 10/100 transceiver.
#[derive(Debug)]
pub struct Ksz8051 {
    addr: u8,
    link: LinkState,
}

impl Ksz8051 {
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            link: LinkState::DOWN,
        }
    }

    fn decode_op_mode(value: u16) -> Option<(LinkSpeed, Duplex)> {
        match value & PHYCON1_OP_MODE_MASK {
            PHYCON1_OP_MODE_10BT => Some((LinkSpeed::Mbps10, Duplex::Half)),
            PHYCON1_OP_MODE_10BT_FD => Some((LinkSpeed::Mbps10, Duplex::Full)),
            PHYCON1_OP_MODE_100BTX => Some((LinkSpeed::Mbps100, Duplex::Half)),
            PHYCON1_OP_MODE_100BTX_FD => Some((LinkSpeed::Mbps100, Duplex::Full)),
            _ => None,
        }
    }
}

impl Default for Ksz8051 {
    fn default() -> Self {
        Self::new(KSZ8051_PHY_ADDR)
    }
}

impl PhyDriver for Ksz8051 {
    fn init(&mut self, mdio: &mut dyn Mdio) -> Result<(), DriverError> {
        log::info!("[PHY] Initializing KSZ8051 at {}", self.addr);

        soft_reset(mdio, self.addr)?;
        mdio.write_phy_reg(self.addr, REG_ICSR, ICSR_LINK_DOWN_IE | ICSR_LINK_UP_IE);
        self.link = LinkState::DOWN;
        Ok(())
    }

    fn event_handler(&mut self, mdio: &mut dyn Mdio) -> bool {
        // Reading ICSR acknowledges the interrupt
        let status = mdio.read_phy_reg(self.addr, REG_ICSR);
        if status & (ICSR_LINK_DOWN_IF | ICSR_LINK_UP_IF) == 0 {
            return false;
        }

        let bmsr = mdio.read_phy_reg(self.addr, REG_BMSR);
        let new_state = if bmsr & BMSR_LINK_STATUS != 0 {
            let phycon1 = mdio.read_phy_reg(self.addr, REG_PHYCON1);
            match Self::decode_op_mode(phycon1) {
                Some((speed, duplex)) => LinkState::up(speed, duplex),
                None => {
                    log::warn!("[PHY] invalid operation mode {:#06x}", phycon1);
                    LinkState::up(self.link.speed, self.link.duplex)
                }
            }
        } else {
            LinkState::DOWN
        };

        let changed = new_state != self.link;
        self.link = new_state;
        if changed {
            log::info!(
                "[PHY] link {} {:?} {:?}",
                if new_state.up { "up" } else { "down" },
                new_state.speed,
                new_state.duplex
            );
        }
        changed
    }

    fn link_state(&self) -> LinkState {
        self.link
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DP83848
// ═══════════════════════════════════════════════════════════════════════════

pub const DP83848_PHY_ADDR: u8 = 1;

pub const REG_PHYSTS: u8 = 0x10;
pub const REG_MICR: u8 = 0x11;
pub const REG_MISR: u8 = 0x12;

pub const PHYSTS_LINK_STATUS: u16 = 0x0001;
/// Set when running at 10 Mbit/s.
pub const PHYSTS_SPEED_STATUS: u16 = 0x0002;
pub const PHYSTS_DUPLEX_STATUS: u16 = 0x0004;

pub const MICR_INT_OE: u16 = 0x0001;
pub const MICR_INTEN: u16 = 0x0002;
pub const MISR_LINK_INT_EN: u16 = 0x0020;
pub const MISR_LINK_INT: u16 = 0x2000;

/// TI DP83848 10/100 transceiver.
///
/// Boards often leave its interrupt pin unconnected, so [`tick`](PhyDriver::tick)
/// also polls BMSR for link transitions.
#[derive(Debug)]
pub struct Dp83848 {
    addr: u8,
    link: LinkState,
}

impl Dp83848 {
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            link: LinkState::DOWN,
        }
    }
}

impl Default for Dp83848 {
    fn default() -> Self {
        Self::new(DP83848_PHY_ADDR)
    }
}

impl PhyDriver for Dp83848 {
    fn init(&mut self, mdio: &mut dyn Mdio) -> Result<(), DriverError> {
        log::info!("[PHY] Initializing DP83848 at {}", self.addr);

        soft_reset(mdio, self.addr)?;
        mdio.write_phy_reg(self.addr, REG_MICR, MICR_INTEN | MICR_INT_OE);
        mdio.write_phy_reg(self.addr, REG_MISR, MISR_LINK_INT_EN);
        self.link = LinkState::DOWN;
        Ok(())
    }

    fn tick(&mut self, mdio: &mut dyn Mdio) -> bool {
        let up = mdio.read_phy_reg(self.addr, REG_BMSR) & BMSR_LINK_STATUS != 0;
        up != self.link.up
    }

    fn event_handler(&mut self, mdio: &mut dyn Mdio) -> bool {
        let status = mdio.read_phy_reg(self.addr, REG_MISR);
        if status & MISR_LINK_INT == 0 {
            // polled transition without a latched interrupt
            let up = mdio.read_phy_reg(self.addr, REG_BMSR) & BMSR_LINK_STATUS != 0;
            if up == self.link.up {
                return false;
            }
        }

        let physts = mdio.read_phy_reg(self.addr, REG_PHYSTS);
        self.link = if physts & PHYSTS_LINK_STATUS != 0 {
            let speed = if physts & PHYSTS_SPEED_STATUS != 0 {
                LinkSpeed::Mbps10
            } else {
                LinkSpeed::Mbps100
            };
            let duplex = if physts & PHYSTS_DUPLEX_STATUS != 0 {
                Duplex::Full
            } else {
                Duplex::Half
            };
            LinkState::up(speed, duplex)
        } else {
            LinkState::DOWN
        };
        log::info!("[PHY] link {}", if self.link.up { "up" } else { "down" });
        true
    }

    fn link_state(&self) -> LinkState {
        self.link
    }
}
