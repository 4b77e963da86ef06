//! Per-adapter network interface.
//!
//! One `NetInterface` exists per network adapter. It is created at stack
//! initialization and lives for the rest of the program.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ICMPv6 / MLD / UpperLayer / DHCP (IPv4 UDP)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     IPv6 engine                             │
//! │  (header walk, fragmentation, reassembly, source selection) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NetInterface                            │
//! │  (link state, tables, critical section, TX-ready event)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              NicDriver implementations                      │
//! │  Loopback | chip drivers behind Mdio + PhyDriver             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! Every table has its own mutex, held only for the walk or mutation. No
//! lock is held across a driver call or a frame transmission. The driver
//! mutex doubles as the critical section: it is taken with the device
//! interrupt masked and released as soon as the driver call returns.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::Vec;
use log::{debug, info, trace, warn};
use rand_core::RngCore;
use spin::Mutex;

use super::event::Event;
use super::tables::{ArpCache, MacFilter, NeighborCache};
use super::{InterfaceConfig, InterfaceStats, LinkListener, StatsSnapshot, UpperLayer};
use crate::buffer::{ChunkedBuffer, MemPool};
use crate::driver::{LinkState, NicDriver};
use crate::error::{NetError, Result};
use crate::ipv4::{Ipv4Config, UdpInbox};
use crate::ipv6::addr::{self, LINK_LOCAL_ALL_NODES};
use crate::ipv6::config::Ipv6Config;
use crate::ipv6::frag::FragQueue;
use crate::mld::Ipv6Filter;
use crate::time::Tick;
use crate::types::{
    EthernetHeader, EthernetProtocol, Ipv6Addr, MacAddress, BROADCAST_MAC, ETH_FRAME_MAX, ETH_HLEN,
};

/// Link listeners per interface.
pub const MAX_LINK_LISTENERS: usize = 4;

/// Frames drained from the driver per [`NetInterface::poll`] call.
pub const RX_BUDGET: usize = 16;

/// Network interface bound to one driver.
pub struct NetInterface<'a, D: NicDriver, R: RngCore> {
    /// Interface name, used in log messages.
    name: &'static str,
    /// Pool every buffer of this interface draws from.
    pub(crate) pool: &'a MemPool,
    /// Link-layer address.
    mac: MacAddress,
    /// Link MTU.
    mtu: usize,
    /// Last time seen by `tick`/`poll`, in ms.
    clock: AtomicU32,

    /// Driver; locking it is the critical section.
    device: Mutex<D>,
    /// Set when the driver can accept another frame.
    tx_ready: Event,
    /// Link state as last reported by the driver.
    link: Mutex<LinkState>,
    pub(crate) rng: Mutex<R>,

    pub(crate) ipv4_config: Mutex<Ipv4Config>,
    pub(crate) ipv6_config: Mutex<Ipv6Config>,

    pub(crate) mac_filter: Mutex<MacFilter>,
    pub(crate) arp_cache: Mutex<ArpCache>,
    pub(crate) neighbor_cache: Mutex<NeighborCache>,
    pub(crate) ipv6_filter: Mutex<Ipv6Filter>,
    pub(crate) frag_queue: Mutex<FragQueue<'a>>,
    /// Identification of the next outgoing fragmented datagram.
    pub(crate) frag_id: AtomicU32,
    /// Datagrams received on the DHCP client port.
    pub(crate) udp_inbox: Mutex<UdpInbox>,

    /// Receive buffer sized to one maximum frame.
    rx_frame: Mutex<[u8; ETH_FRAME_MAX]>,

    listeners: Mutex<Vec<&'a (dyn LinkListener + Sync), MAX_LINK_LISTENERS>>,
    pub(crate) upper_layer: Mutex<Option<&'a (dyn UpperLayer + Sync)>>,

    pub(crate) stats: InterfaceStats,
}

impl<'a, D: NicDriver, R: RngCore> NetInterface<'a, D, R> {
    /// Create an interface. The driver is not touched until [`init`](Self::init).
    pub fn new(config: InterfaceConfig, pool: &'a MemPool, driver: D, rng: R) -> Self {
        let mac = driver.mac_address();
        Self {
            name: config.name,
            pool,
            mac,
            mtu: config.mtu,
            clock: AtomicU32::new(0),
            device: Mutex::new(driver),
            tx_ready: Event::new(),
            link: Mutex::new(LinkState::DOWN),
            rng: Mutex::new(rng),
            ipv4_config: Mutex::new(Ipv4Config::default()),
            ipv6_config: Mutex::new(Ipv6Config::default()),
            mac_filter: Mutex::new(MacFilter::new()),
            arp_cache: Mutex::new(ArpCache::new()),
            neighbor_cache: Mutex::new(NeighborCache::new()),
            ipv6_filter: Mutex::new(Ipv6Filter::new()),
            frag_queue: Mutex::new(FragQueue::new()),
            frag_id: AtomicU32::new(0),
            udp_inbox: Mutex::new(UdpInbox::new()),
            rx_frame: Mutex::new([0; ETH_FRAME_MAX]),
            listeners: Mutex::new(Vec::new()),
            upper_layer: Mutex::new(None),
            stats: InterfaceStats::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn pool(&self) -> &'a MemPool {
        self.pool
    }

    /// Time of the last `tick`/`poll`.
    pub fn now(&self) -> Tick {
        Tick(self.clock.load(Ordering::Relaxed))
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.lock()
    }

    pub fn is_link_up(&self) -> bool {
        self.link.lock().up
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ipv6_config(&self) -> Ipv6Config {
        self.ipv6_config.lock().clone()
    }

    pub fn ipv4_config(&self) -> Ipv4Config {
        *self.ipv4_config.lock()
    }

    pub(crate) fn random_u32(&self) -> u32 {
        self.rng.lock().next_u32()
    }

    /// Run `f` on the driver inside the critical section.
    ///
    /// The driver lock is held and the device interrupt masked for the
    /// duration of `f` only.
    pub fn with_driver<T>(&self, f: impl FnOnce(&mut D) -> T) -> T {
        let mut dev = self.device.lock();
        dev.disable_irq();
        let result = f(&mut dev);
        dev.enable_irq();
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Initialize the driver and join the link-scope all-nodes group.
    pub fn init(&self) -> Result<()> {
        let (link, ready) = self.with_driver(|d| -> core::result::Result<_, crate::error::DriverError> {
            d.init()?;
            Ok((d.link_state(), d.can_transmit()))
        })?;

        *self.link.lock() = link;
        if ready {
            self.tx_ready.signal();
        }
        info!(
            "[NIC] {}: MAC {}, MTU {}, link {}",
            self.name,
            self.mac,
            self.mtu,
            if link.up { "up" } else { "down" }
        );

        self.join_multicast_group(&LINK_LOCAL_ALL_NODES)?;
        self.set_mac_filter()
    }

    /// Periodic housekeeping, called every [`TICK_INTERVAL_MS`](crate::time::TICK_INTERVAL_MS).
    ///
    /// Fans out to the driver, MLD timers, reassembly expiry and cache aging.
    pub fn tick(&self, now: Tick) {
        self.clock.store(now.0, Ordering::Relaxed);
        self.with_driver(|d| d.tick());

        self.mld_tick(now);
        self.frag_tick(now);
        self.arp_cache.lock().expire(now);
        self.neighbor_cache.lock().expire(now);
    }

    /// Service driver events. Link changes are propagated to the protocol
    /// layers and listeners.
    pub fn handle_events(&self) {
        let (changed, ready) = self.with_driver(|d| (d.event_handler(), d.can_transmit()));
        if ready {
            self.tx_ready.signal();
        }
        if changed {
            self.notify_link_change();
        }
    }

    /// Drain received frames and dispatch them.
    ///
    /// Each frame is fetched inside the critical section and dispatched
    /// outside it.
    pub fn poll(&self, now: Tick) {
        self.clock.store(now.0, Ordering::Relaxed);
        self.handle_events();

        let mut frame = self.rx_frame.lock();
        for _ in 0..RX_BUDGET {
            match self.with_driver(|d| d.receive(&mut frame[..])) {
                Ok(Some(len)) => self.process_received_packet(&frame[..len]),
                Ok(None) => break,
                Err(e) => {
                    self.stats.rx_error();
                    warn!("[NIC] {}: receive failed: {}", self.name, e);
                    break;
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DRIVER ACCESS
    // ═══════════════════════════════════════════════════════════════════════

    /// Called from the driver's interrupt glue when the controller can
    /// accept another frame.
    pub fn signal_tx_ready(&self) {
        self.tx_ready.signal();
    }

    /// Transmit the frame held in `buffer` from `offset`.
    ///
    /// Waits for the TX-ready event without a timeout, then hands the frame
    /// to the driver inside the critical section. Driver errors are
    /// returned as is; there is no retry at this layer.
    pub fn send_packet(&self, buffer: &ChunkedBuffer<'_>, offset: usize) -> Result<()> {
        self.tx_ready.wait();

        let (result, ready) = self.with_driver(|d| (d.send_packet(buffer, offset), d.can_transmit()));
        if ready {
            self.tx_ready.signal();
        }

        match result {
            Ok(()) => {
                self.stats.tx_frame();
                Ok(())
            }
            Err(e) => {
                self.stats.tx_error();
                debug!("[NIC] {}: send failed: {}", self.name, e);
                Err(e.into())
            }
        }
    }

    /// Push the multicast MAC filter table to the driver.
    pub fn set_mac_filter(&self) -> Result<()> {
        let addresses = self.mac_filter.lock().addresses();
        self.with_driver(|d| d.set_mac_filter(&addresses))?;
        Ok(())
    }

    /// Take a reference on a multicast MAC address and reprogram the
    /// driver when the table changed.
    pub(crate) fn accept_multicast_mac(&self, mac: MacAddress) -> Result<()> {
        let changed = self.mac_filter.lock().add(mac)?;
        if changed {
            if let Err(e) = self.set_mac_filter() {
                self.mac_filter.lock().remove(mac);
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn drop_multicast_mac(&self, mac: MacAddress) -> Result<()> {
        let changed = self.mac_filter.lock().remove(mac);
        if changed {
            self.set_mac_filter()?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECEIVE PATH
    // ═══════════════════════════════════════════════════════════════════════

    /// Parse a received Ethernet frame and dispatch its payload.
    ///
    /// Runs outside the critical section. Malformed frames are dropped.
    pub fn process_received_packet(&self, frame: &[u8]) {
        self.stats.rx_frame();

        let eth = match EthernetHeader::parse(frame) {
            Ok(h) => h,
            Err(_) => {
                trace!("[NIC] {}: runt frame ({} bytes)", self.name, frame.len());
                self.stats.rx_drop();
                return;
            }
        };

        if !self.accepts_mac(&eth.dest) {
            trace!("[NIC] {}: frame for {} filtered", self.name, eth.dest);
            self.stats.rx_drop();
            return;
        }

        let payload = &frame[ETH_HLEN..];
        match eth.ethertype {
            EthernetProtocol::Ipv6 => {
                self.learn_neighbor(&eth.src, payload);
                let mut buffer = ChunkedBuffer::new(self.pool);
                if buffer.append(payload).is_err() {
                    self.stats.rx_drop();
                    return;
                }
                self.ipv6_process_packet(&buffer, 0);
            }
            EthernetProtocol::Ipv4 => self.ipv4_process_packet(&eth, payload),
            other => {
                trace!("[NIC] {}: ethertype {} ignored", self.name, other);
                self.stats.rx_drop();
            }
        }
    }

    fn accepts_mac(&self, dest: &MacAddress) -> bool {
        *dest == self.mac || *dest == BROADCAST_MAC || self.mac_filter.lock().contains(dest)
    }

    /// Record the sender of an on-link IPv6 datagram in the neighbor cache.
    fn learn_neighbor(&self, mac: &MacAddress, packet: &[u8]) {
        if packet.len() < 24 || !mac.is_unicast() {
            return;
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&packet[8..24]);
        let src = Ipv6Addr::from(octets);
        if src.is_unspecified() || addr::is_multicast(&src) {
            return;
        }
        if !self.ipv6_config.lock().is_on_link(&src) {
            return;
        }
        if self.neighbor_cache.lock().learn(src, *mac, self.now()).is_err() {
            trace!("[NIC] {}: neighbor cache full", self.name);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LINK STATE
    // ═══════════════════════════════════════════════════════════════════════

    /// Propagate a link state change reported by the driver.
    ///
    /// Cached resolution and reassembly state is flushed, MLD reacts to the
    /// new state and registered listeners are notified. No lock is held
    /// while listeners run.
    pub fn notify_link_change(&self) {
        let link = self.with_driver(|d| d.link_state());
        *self.link.lock() = link;

        if link.up {
            info!(
                "[NIC] {}: link up, {:?} {:?} duplex",
                self.name, link.speed, link.duplex
            );
        } else {
            info!("[NIC] {}: link down", self.name);
        }

        self.arp_cache.lock().flush();
        self.neighbor_cache.lock().flush();
        self.frag_queue.lock().flush();
        self.udp_inbox.lock().clear();

        self.mld_link_change(link.up);

        let listeners = self.listeners.lock().clone();
        for listener in listeners.iter() {
            listener.link_changed(link);
        }
    }

    pub fn add_link_listener(&self, listener: &'a (dyn LinkListener + Sync)) -> Result<()> {
        self.listeners
            .lock()
            .push(listener)
            .map_err(|_| NetError::OutOfResources)
    }

    /// Register the handler for TCP, UDP and unknown upper-layer protocols.
    pub fn set_upper_layer(&self, handler: &'a (dyn UpperLayer + Sync)) {
        *self.upper_layer.lock() = Some(handler);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ADDRESS CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Assign the link-local address and join its solicited-node group.
    pub fn set_link_local_addr(&self, addr: Ipv6Addr) -> Result<()> {
        if !addr::is_link_local_unicast(&addr) {
            return Err(NetError::InvalidAddress);
        }
        let previous = {
            let mut config = self.ipv6_config.lock();
            let previous = config.link_local_state.is_valid().then_some(config.link_local);
            config.set_link_local(addr, crate::ipv6::config::AddrState::Preferred);
            previous
        };
        if let Some(old) = previous {
            if old == addr {
                return Ok(());
            }
            self.leave_multicast_group(&addr::solicited_node(&old))?;
        }
        info!("[IPv6] {}: link-local address {}", self.name, addr);
        self.join_multicast_group(&addr::solicited_node(&addr))
    }

    /// Assign the global address and on-link prefix.
    pub fn set_global_addr(&self, addr: Ipv6Addr, prefix_len: u8) -> Result<()> {
        if addr.is_unspecified() || addr::is_multicast(&addr) || addr::is_link_local_unicast(&addr) {
            return Err(NetError::InvalidAddress);
        }
        self.ipv6_config
            .lock()
            .set_global(addr, prefix_len, crate::ipv6::config::AddrState::Preferred);
        info!("[IPv6] {}: global address {}/{}", self.name, addr, prefix_len);
        Ok(())
    }

    pub fn set_default_router(&self, router: Option<Ipv6Addr>) {
        self.ipv6_config.lock().router = router;
    }

    /// Insert a static neighbor cache entry.
    pub fn add_neighbor(&self, addr: Ipv6Addr, mac: MacAddress) -> Result<()> {
        if addr.is_unspecified() || addr::is_multicast(&addr) {
            return Err(NetError::InvalidAddress);
        }
        self.neighbor_cache.lock().insert_static(addr, mac)
    }

    pub fn lookup_neighbor(&self, addr: &Ipv6Addr) -> Option<MacAddress> {
        self.neighbor_cache.lock().lookup(addr)
    }
}
