//! Main loop runner.
//!
//! One [`Runner::poll`] call is a full iteration:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ events + RX  │ → │ periodic tick│ → │  DHCP step   │
//! │ (RX_BUDGET)  │   │ (100 ms)     │   │              │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Nothing in the iteration blocks except a transmit waiting for the
//! driver to accept a frame.

use log::{debug, info};
use rand_core::RngCore;

use super::NetInterface;
use crate::dhcp::{DhcpClient, DhcpClientSettings, DhcpEvent};
use crate::driver::NicDriver;
use crate::time::{Tick, Timer, TICK_INTERVAL_MS};

/// Drives one interface and its DHCP client.
pub struct Runner<'r, 'a, D: NicDriver, R: RngCore> {
    iface: &'r NetInterface<'a, D, R>,
    dhcp: Option<DhcpClient<&'r NetInterface<'a, D, R>>>,
    tick_timer: Timer,
    link_up: bool,
}

impl<'r, 'a, D: NicDriver, R: RngCore> Runner<'r, 'a, D, R> {
    pub fn new(iface: &'r NetInterface<'a, D, R>) -> Self {
        Self {
            iface,
            dhcp: None,
            tick_timer: Timer::stopped(),
            link_up: iface.is_link_up(),
        }
    }

    pub fn interface(&self) -> &'r NetInterface<'a, D, R> {
        self.iface
    }

    /// Start IPv4 configuration through DHCP.
    pub fn enable_dhcp(&mut self, settings: DhcpClientSettings, now: Tick) {
        let mut client = DhcpClient::new(self.iface, settings);
        client.start(now);
        self.dhcp = Some(client);
    }

    /// Stop the DHCP client and remove its address.
    pub fn disable_dhcp(&mut self) -> Option<DhcpEvent> {
        self.dhcp.take().and_then(|mut client| client.stop())
    }

    pub fn dhcp(&self) -> Option<&DhcpClient<&'r NetInterface<'a, D, R>>> {
        self.dhcp.as_ref()
    }

    pub fn dhcp_mut(&mut self) -> Option<&mut DhcpClient<&'r NetInterface<'a, D, R>>> {
        self.dhcp.as_mut()
    }

    /// Run one main loop iteration at time `now`.
    pub fn poll(&mut self, now: Tick) -> Option<DhcpEvent> {
        self.iface.poll(now);

        if !self.tick_timer.is_running() || self.tick_timer.is_expired(now) {
            self.iface.tick(now);
            self.tick_timer.start(now, TICK_INTERVAL_MS);
        }

        let up = self.iface.is_link_up();
        if up != self.link_up {
            self.link_up = up;
            debug!("[RUNNER] {}: link {}", self.iface.name(), if up { "up" } else { "down" });
            if let Some(client) = self.dhcp.as_mut() {
                client.link_changed(up, now);
            }
        }

        let event = self.dhcp.as_mut().and_then(|client| client.step(now));
        match event {
            Some(DhcpEvent::Configured(lease)) => {
                info!("[RUNNER] {}: IPv4 address {}", self.iface.name(), lease.addr)
            }
            Some(DhcpEvent::Deconfigured) => {
                info!("[RUNNER] {}: IPv4 address removed", self.iface.name())
            }
            None => {}
        }
        event
    }
}
