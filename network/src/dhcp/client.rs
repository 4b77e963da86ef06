//! DHCP client state machine.
//!
//! All timing runs on a 64-bit millisecond clock widened from the
//! wrapping interface tick, so lease arithmetic never wraps.

use core::cmp::{max, min};
use core::net::Ipv4Addr;

use log::{debug, info, trace, warn};

use super::message::{
    DhcpMessage, MessageBuilder, MessageType, BOOTREPLY, OPT_CLIENT_ID, OPT_DNS_SERVER,
    OPT_HOST_NAME, OPT_LEASE_TIME, OPT_PARAM_REQUEST_LIST, OPT_RAPID_COMMIT, OPT_REBINDING_TIME,
    OPT_RENEWAL_TIME, OPT_REQUESTED_IP, OPT_ROUTER, OPT_SERVER_ID, OPT_SUBNET_MASK,
    PARAM_REQUEST_LIST,
};
use super::{
    DhcpClientSettings, DhcpEvent, DhcpLease, DhcpTransport, DHCP_DISCOVER_INIT_TIMEOUT_MS,
    DHCP_DISCOVER_MAX_TIMEOUT_MS, DHCP_INFINITE_TIME, DHCP_INIT_DELAY_MS, DHCP_MIN_LEASE_TIME,
    DHCP_RAND_FACTOR_MS, DHCP_REQUEST_INIT_TIMEOUT_MS, DHCP_REQUEST_MAX_RETRIES,
    DHCP_REQUEST_MAX_TIMEOUT_MS, DHCP_REQUEST_MIN_INTERVAL_MS,
};
use crate::error::{NetError, Result};
use crate::ipv4::{UdpDatagram, DHCP_SERVER_PORT, IPV4_MAX_DNS_SERVERS};
use crate::time::{ExtendedClock, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    /// Client stopped.
    Idle,
    Init,
    Selecting,
    Requesting,
    InitReboot,
    Rebooting,
    Bound,
    Renewing,
    Rebinding,
}

/// DHCP client bound to one interface.
pub struct DhcpClient<T: DhcpTransport> {
    transport: T,
    settings: DhcpClientSettings,
    state: DhcpState,
    clock: ExtendedClock,

    /// Transaction id of the current exchange.
    xid: u32,
    server: Ipv4Addr,
    requested: Ipv4Addr,
    lease: Option<DhcpLease>,

    /// Start of the current acquisition or renewal (for `secs`).
    config_start: u64,
    /// When the Request that produced the lease was sent.
    request_sent: u64,
    lease_start: u64,

    /// Next retransmission or state deadline.
    deadline: u64,
    /// Current retransmission timeout.
    timeout: u32,
    retries: u32,
}

impl<T: DhcpTransport> DhcpClient<T> {
    pub fn new(transport: T, settings: DhcpClientSettings) -> Self {
        Self {
            transport,
            settings,
            state: DhcpState::Idle,
            clock: ExtendedClock::new(),
            xid: 0,
            server: Ipv4Addr::UNSPECIFIED,
            requested: Ipv4Addr::UNSPECIFIED,
            lease: None,
            config_start: 0,
            request_sent: 0,
            lease_start: 0,
            deadline: 0,
            timeout: 0,
            retries: 0,
        }
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    pub fn lease(&self) -> Option<&DhcpLease> {
        self.lease.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Start address acquisition after a random delay.
    pub fn start(&mut self, now: Tick) {
        let t = self.clock.update(now);
        match self.settings.requested_addr {
            Some(addr) => {
                self.requested = addr;
                self.enter(DhcpState::InitReboot, t);
            }
            None => self.enter(DhcpState::Init, t),
        }
        info!("[DHCP] client started");
    }

    /// Stop the client. The current lease is removed from the interface.
    pub fn stop(&mut self) -> Option<DhcpEvent> {
        self.state = DhcpState::Idle;
        self.deconfigure()
    }

    /// Report an address conflict on the leased address.
    ///
    /// The server is told with a Decline and acquisition restarts.
    pub fn decline(&mut self, now: Tick) -> Option<DhcpEvent> {
        let t = self.clock.update(now);
        let lease = self.lease?;
        warn!("[DHCP] declining {}", lease.addr);

        if let Err(e) = self.send_decline(t, &lease) {
            debug!("[DHCP] Decline not sent: {}", e);
        }

        let event = self.deconfigure();
        self.enter(DhcpState::Init, t);
        event
    }

    /// Interface link state changed.
    ///
    /// After a reconnect an existing lease is verified through INIT-REBOOT.
    pub fn link_changed(&mut self, up: bool, now: Tick) {
        let t = self.clock.update(now);
        if !up || self.state == DhcpState::Idle {
            return;
        }
        match self.lease {
            Some(lease) => {
                self.requested = lease.addr;
                self.enter(DhcpState::InitReboot, t);
            }
            None => self.enter(DhcpState::Init, t),
        }
    }

    /// Run the state machine once: handle received messages, then timers.
    pub fn step(&mut self, now: Tick) -> Option<DhcpEvent> {
        let t = self.clock.update(now);
        if self.state == DhcpState::Idle {
            while self.transport.receive().is_some() {}
            return None;
        }

        let mut event = None;
        while let Some(datagram) = self.transport.receive() {
            if let Some(e) = self.process_datagram(&datagram, t) {
                event = Some(e);
            }
        }
        if event.is_some() {
            return event;
        }
        self.process_timers(t)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATE TRANSITIONS
    // ═══════════════════════════════════════════════════════════════════════

    fn enter(&mut self, state: DhcpState, t: u64) {
        debug!("[DHCP] {:?} -> {:?}", self.state, state);
        self.state = state;
        match state {
            DhcpState::Init | DhcpState::InitReboot => {
                let delay = self.transport.random_u32() % (DHCP_INIT_DELAY_MS + 1);
                self.deadline = t + delay as u64;
            }
            DhcpState::Selecting => {
                self.timeout = DHCP_DISCOVER_INIT_TIMEOUT_MS;
                self.retries = 0;
                self.deadline = t + self.randomize(self.timeout);
            }
            DhcpState::Requesting | DhcpState::Rebooting => {
                self.timeout = DHCP_REQUEST_INIT_TIMEOUT_MS;
                self.retries = 0;
                self.deadline = t + self.randomize(self.timeout);
            }
            DhcpState::Renewing => {
                let boundary = self.lease_deadline(|l| l.t2);
                self.deadline = renew_deadline(t, boundary);
            }
            DhcpState::Rebinding => {
                let boundary = self.lease_deadline(|l| l.lease_time);
                self.deadline = renew_deadline(t, boundary);
            }
            DhcpState::Bound => {
                self.deadline = self.lease_deadline(|l| l.t1);
            }
            DhcpState::Idle => {}
        }
    }

    /// Retransmission timeout with ± [`DHCP_RAND_FACTOR_MS`] jitter.
    fn randomize(&mut self, timeout: u32) -> u64 {
        let r = self.transport.random_u32() % (2 * DHCP_RAND_FACTOR_MS + 1);
        (timeout as i64 + r as i64 - DHCP_RAND_FACTOR_MS as i64).max(0) as u64
    }

    /// Absolute time of a lease milestone given in seconds.
    fn lease_deadline(&self, field: impl Fn(&DhcpLease) -> u32) -> u64 {
        match self.lease {
            Some(ref l) if !l.is_infinite() => self.lease_start + field(l) as u64 * 1000,
            _ => u64::MAX,
        }
    }

    fn new_transaction(&mut self, t: u64) {
        self.xid = self.transport.random_u32();
        self.config_start = t;
    }

    fn process_timers(&mut self, t: u64) -> Option<DhcpEvent> {
        if self.lease.is_some() && t >= self.lease_deadline(|l| l.lease_time) {
            info!("[DHCP] lease expired in {:?}", self.state);
            let event = self.deconfigure();
            self.enter(DhcpState::Init, t);
            return event;
        }

        match self.state {
            DhcpState::Idle => None,
            DhcpState::Init => {
                if t >= self.deadline && self.transport.is_link_up() {
                    self.new_transaction(t);
                    self.send_discover(t);
                    self.enter(DhcpState::Selecting, t);
                }
                None
            }
            DhcpState::InitReboot => {
                if t >= self.deadline && self.transport.is_link_up() {
                    self.new_transaction(t);
                    self.send_request(t, DhcpState::Rebooting);
                    self.enter(DhcpState::Rebooting, t);
                }
                None
            }
            DhcpState::Selecting => {
                if t >= self.deadline {
                    self.send_discover(t);
                    self.timeout = min(self.timeout * 2, DHCP_DISCOVER_MAX_TIMEOUT_MS);
                    self.deadline = t + self.randomize(self.timeout);
                }
                None
            }
            DhcpState::Requesting | DhcpState::Rebooting => {
                if t < self.deadline {
                    return None;
                }
                if self.retries < DHCP_REQUEST_MAX_RETRIES {
                    self.retries += 1;
                    self.send_request(t, self.state);
                    self.timeout = min(self.timeout * 2, DHCP_REQUEST_MAX_TIMEOUT_MS);
                    self.deadline = t + self.randomize(self.timeout);
                    None
                } else {
                    // an unconfirmed cached lease is dropped with the attempt
                    info!("[DHCP] no answer to Request, restarting");
                    let event = self.deconfigure();
                    self.enter(DhcpState::Init, t);
                    event
                }
            }
            DhcpState::Bound => {
                if t >= self.deadline {
                    self.new_transaction(t);
                    self.send_request(t, DhcpState::Renewing);
                    self.enter(DhcpState::Renewing, t);
                }
                None
            }
            DhcpState::Renewing => {
                if t >= self.lease_deadline(|l| l.t2) {
                    self.send_request(t, DhcpState::Rebinding);
                    self.enter(DhcpState::Rebinding, t);
                } else if t >= self.deadline {
                    self.send_request(t, DhcpState::Renewing);
                    self.deadline = renew_deadline(t, self.lease_deadline(|l| l.t2));
                }
                None
            }
            DhcpState::Rebinding => {
                if t >= self.deadline {
                    self.send_request(t, DhcpState::Rebinding);
                    self.deadline = renew_deadline(t, self.lease_deadline(|l| l.lease_time));
                }
                None
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECEIVE
    // ═══════════════════════════════════════════════════════════════════════

    fn process_datagram(&mut self, datagram: &UdpDatagram, t: u64) -> Option<DhcpEvent> {
        if datagram.src_port != DHCP_SERVER_PORT {
            return None;
        }
        let msg = match DhcpMessage::parse(&datagram.data) {
            Ok(m) => m,
            Err(e) => {
                trace!("[DHCP] malformed message: {}", e);
                return None;
            }
        };
        if msg.op != BOOTREPLY || msg.xid != self.xid || msg.chaddr != self.transport.mac_address() {
            trace!("[DHCP] message for another transaction ignored");
            return None;
        }
        let msg_type = msg.message_type()?;

        match (self.state, msg_type) {
            (DhcpState::Selecting, MessageType::Offer) => {
                self.accept_offer(&msg, t);
                None
            }
            (DhcpState::Selecting, MessageType::Ack)
                if self.settings.rapid_commit && msg.option(OPT_RAPID_COMMIT).is_some() =>
            {
                self.request_sent = self.config_start;
                self.bind(&msg, t)
            }
            (
                DhcpState::Requesting
                | DhcpState::Rebooting
                | DhcpState::Renewing
                | DhcpState::Rebinding,
                MessageType::Ack,
            ) => self.bind(&msg, t),
            (
                DhcpState::Requesting
                | DhcpState::Rebooting
                | DhcpState::Renewing
                | DhcpState::Rebinding,
                MessageType::Nak,
            ) => {
                info!("[DHCP] server refused the address");
                let event = self.deconfigure();
                self.enter(DhcpState::Init, t);
                event
            }
            _ => None,
        }
    }

    fn accept_offer(&mut self, msg: &DhcpMessage<'_>, t: u64) {
        let server = match msg.option_addr(OPT_SERVER_ID) {
            Some(s) => s,
            None => {
                trace!("[DHCP] offer without server identifier ignored");
                return;
            }
        };
        if msg.yiaddr.is_unspecified() || msg.yiaddr.is_broadcast() {
            return;
        }
        debug!("[DHCP] offer of {} from {}", msg.yiaddr, server);
        self.server = server;
        self.requested = msg.yiaddr;
        self.send_request(t, DhcpState::Requesting);
        self.enter(DhcpState::Requesting, t);
    }

    fn bind(&mut self, msg: &DhcpMessage<'_>, t: u64) -> Option<DhcpEvent> {
        let lease = match lease_from_ack(msg, self.server) {
            Ok(l) => l,
            Err(e) => {
                debug!("[DHCP] unusable Ack: {}", e);
                return None;
            }
        };

        let renewed = self.lease.map(|l| l.addr) == Some(lease.addr);
        self.lease = Some(lease);
        self.server = lease.server;
        self.requested = lease.addr;
        self.lease_start = self.request_sent;
        self.enter(DhcpState::Bound, t);

        self.transport.configure(Some(&lease));
        if renewed {
            debug!("[DHCP] lease of {} renewed", lease.addr);
        } else {
            info!(
                "[DHCP] bound to {} (mask {}, lease {} s)",
                lease.addr, lease.subnet_mask, lease.lease_time
            );
        }
        Some(DhcpEvent::Configured(lease))
    }

    fn deconfigure(&mut self) -> Option<DhcpEvent> {
        self.lease.take()?;
        self.transport.configure(None);
        Some(DhcpEvent::Deconfigured)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSMIT
    // ═══════════════════════════════════════════════════════════════════════

    fn builder(&self, msg_type: MessageType, t: u64, ciaddr: Ipv4Addr, broadcast: bool) -> Result<MessageBuilder> {
        let secs = min(t.saturating_sub(self.config_start) / 1000, u16::MAX as u64) as u16;
        let mac = self.transport.mac_address();
        let mut msg = MessageBuilder::new(msg_type, self.xid, secs, mac, ciaddr, broadcast);

        match self.settings.client_id {
            Some(id) => msg.option(OPT_CLIENT_ID, id)?,
            None => {
                let mut id = [0u8; 7];
                id[0] = 1;
                id[1..].copy_from_slice(&mac.0);
                msg.option(OPT_CLIENT_ID, &id)?;
            }
        }
        if let Some(name) = self.settings.hostname {
            msg.option(OPT_HOST_NAME, name.as_bytes())?;
        }
        Ok(msg)
    }

    fn send(&mut self, msg: MessageBuilder, src: Ipv4Addr, dst: Ipv4Addr) -> Result<()> {
        let payload = msg.finish();
        self.transport.send(src, dst, &payload)
    }

    fn send_discover(&mut self, t: u64) {
        let result = self
            .builder(MessageType::Discover, t, Ipv4Addr::UNSPECIFIED, true)
            .and_then(|mut msg| {
                msg.option(OPT_PARAM_REQUEST_LIST, &PARAM_REQUEST_LIST)?;
                if self.settings.rapid_commit {
                    msg.option(OPT_RAPID_COMMIT, &[])?;
                }
                self.send(msg, Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST)
            });
        match result {
            Ok(()) => debug!("[DHCP] Discover sent (xid {:#010x})", self.xid),
            Err(e) => debug!("[DHCP] Discover not sent: {}", e),
        }
    }

    /// Send a Request shaped for `state`.
    ///
    /// Selecting and INIT-REBOOT broadcast from 0.0.0.0 with option 50.
    /// Renewing unicasts to the server and rebinding broadcasts, both with
    /// `ciaddr` set.
    fn send_request(&mut self, t: u64, state: DhcpState) {
        self.request_sent = t;
        let (ciaddr, src, dst) = match (state, self.lease) {
            (DhcpState::Renewing, Some(l)) => (l.addr, l.addr, l.server),
            (DhcpState::Rebinding, Some(l)) => (l.addr, l.addr, Ipv4Addr::BROADCAST),
            _ => (Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST),
        };
        match self.try_send_request(t, state, ciaddr, src, dst) {
            Ok(()) => debug!("[DHCP] Request sent to {} ({:?})", dst, state),
            Err(e) => debug!("[DHCP] Request not sent: {}", e),
        }
    }

    fn try_send_request(
        &mut self,
        t: u64,
        state: DhcpState,
        ciaddr: Ipv4Addr,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<()> {
        let mut msg = self.builder(MessageType::Request, t, ciaddr, ciaddr.is_unspecified())?;
        match state {
            DhcpState::Requesting => {
                msg.option_addr(OPT_REQUESTED_IP, self.requested)?;
                msg.option_addr(OPT_SERVER_ID, self.server)?;
            }
            DhcpState::Rebooting => msg.option_addr(OPT_REQUESTED_IP, self.requested)?,
            _ => {}
        }
        msg.option(OPT_PARAM_REQUEST_LIST, &PARAM_REQUEST_LIST)?;
        self.send(msg, src, dst)
    }

    fn send_decline(&mut self, t: u64, lease: &DhcpLease) -> Result<()> {
        let mut msg = self.builder(MessageType::Decline, t, Ipv4Addr::UNSPECIFIED, true)?;
        msg.option_addr(OPT_REQUESTED_IP, lease.addr)?;
        msg.option_addr(OPT_SERVER_ID, lease.server)?;
        self.send(msg, Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST)
    }
}

/// Next retransmission while renewing or rebinding: half the time left to
/// `boundary`, at least [`DHCP_REQUEST_MIN_INTERVAL_MS`], never past it.
fn renew_deadline(t: u64, boundary: u64) -> u64 {
    if boundary == u64::MAX {
        return u64::MAX;
    }
    let half = boundary.saturating_sub(t) / 2;
    min(t + max(half, DHCP_REQUEST_MIN_INTERVAL_MS as u64), boundary)
}

/// Extract the lease from an Ack.
///
/// Missing T1/T2 default to 0.5 and 0.875 of the lease time. Values from
/// the wire are clamped so that T1 < T2 < lease time.
fn lease_from_ack(msg: &DhcpMessage<'_>, current_server: Ipv4Addr) -> Result<DhcpLease> {
    if msg.yiaddr.is_unspecified() || msg.yiaddr.is_broadcast() {
        return Err(NetError::InvalidAddress);
    }
    let lease_time = msg.option_u32(OPT_LEASE_TIME).ok_or(NetError::InvalidHeader)?;
    let server = msg.option_addr(OPT_SERVER_ID).unwrap_or(current_server);

    if lease_time < DHCP_MIN_LEASE_TIME {
        return Err(NetError::InvalidParameter);
    }

    let (t1, t2) = if lease_time == DHCP_INFINITE_TIME {
        (DHCP_INFINITE_TIME, DHCP_INFINITE_TIME)
    } else {
        let default_t1 = lease_time / 2;
        let default_t2 = (lease_time as u64 * 7 / 8) as u32;
        let t2 = match msg.option_u32(OPT_REBINDING_TIME) {
            Some(t2) if t2 > 1 && t2 < lease_time => t2,
            _ => default_t2,
        };
        let t1 = match msg.option_u32(OPT_RENEWAL_TIME) {
            Some(t1) if t1 > 0 && t1 < t2 => t1,
            _ if default_t1 < t2 => default_t1,
            _ => t2 / 2,
        };
        (t1, t2)
    };

    let mut dns_servers = [Ipv4Addr::UNSPECIFIED; IPV4_MAX_DNS_SERVERS];
    for (slot, addr) in dns_servers.iter_mut().zip(msg.option_addrs(OPT_DNS_SERVER)) {
        *slot = addr;
    }

    Ok(DhcpLease {
        addr: msg.yiaddr,
        subnet_mask: msg.option_addr(OPT_SUBNET_MASK).unwrap_or(Ipv4Addr::UNSPECIFIED),
        router: msg.option_addr(OPT_ROUTER),
        dns_servers,
        server,
        lease_time,
        t1,
        t2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MacAddress;
    use smoltcp::wire::EthernetAddress;
    use std::collections::VecDeque;
    use std::vec::Vec as StdVec;

    const MAC: MacAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x10]);
    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const OFFERED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    #[derive(Default)]
    struct MockTransport {
        sent: StdVec<(Ipv4Addr, Ipv4Addr, StdVec<u8>)>,
        inbox: VecDeque<UdpDatagram>,
        configured: Option<DhcpLease>,
        link_down: bool,
    }

    impl DhcpTransport for MockTransport {
        fn mac_address(&self) -> MacAddress {
            MAC
        }
        fn is_link_up(&self) -> bool {
            !self.link_down
        }
        fn random_u32(&mut self) -> u32 {
            // zero jitter, half the init delay
            DHCP_RAND_FACTOR_MS
        }
        fn send(&mut self, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Result<()> {
            self.sent.push((src, dst, payload.to_vec()));
            Ok(())
        }
        fn receive(&mut self) -> Option<UdpDatagram> {
            self.inbox.pop_front()
        }
        fn configure(&mut self, lease: Option<&DhcpLease>) {
            self.configured = lease.copied();
        }
    }

    fn sent_type(payload: &[u8]) -> MessageType {
        DhcpMessage::parse(payload).unwrap().message_type().unwrap()
    }

    fn reply(client: &mut DhcpClient<MockTransport>, msg_type: MessageType, options: &[(u8, &[u8])]) {
        let mut b = MessageBuilder::new(msg_type, client.xid, 0, MAC, Ipv4Addr::UNSPECIFIED, false);
        for (code, data) in options {
            b.option(*code, data).unwrap();
        }
        let mut data = b.finish();
        data[0] = BOOTREPLY;
        data[16..20].copy_from_slice(&OFFERED.octets());
        client
            .transport_mut()
            .inbox
            .push_back(UdpDatagram {
                src: SERVER,
                src_port: DHCP_SERVER_PORT,
                dst: Ipv4Addr::BROADCAST,
                data: heapless::Vec::from_slice(&data).unwrap(),
            });
    }

    const SERVER_ID: (u8, &[u8]) = (OPT_SERVER_ID, &[192, 168, 1, 1]);
    const LEASE_1H: (u8, &[u8]) = (OPT_LEASE_TIME, &[0, 0, 0x0e, 0x10]);
    const LEASE_INFINITE: (u8, &[u8]) = (OPT_LEASE_TIME, &[0xff; 4]);
    const RAPID_COMMIT: (u8, &[u8]) = (OPT_RAPID_COMMIT, &[]);

    #[test]
    fn test_offer_ack_binds() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        assert_eq!(c.step(Tick(999)), None);
        assert_eq!(c.state(), DhcpState::Init);
        c.step(Tick(1000));
        assert_eq!(c.state(), DhcpState::Selecting);
        assert_eq!(sent_type(&c.transport().sent[0].2), MessageType::Discover);

        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1500));
        assert_eq!(c.state(), DhcpState::Requesting);
        let (_, dst, req) = &c.transport().sent[1];
        assert_eq!(*dst, Ipv4Addr::BROADCAST);
        let req = DhcpMessage::parse(req).unwrap();
        assert_eq!(req.message_type(), Some(MessageType::Request));
        assert_eq!(req.option_addr(OPT_REQUESTED_IP), Some(OFFERED));
        assert_eq!(req.option_addr(OPT_SERVER_ID), Some(SERVER));

        reply(&mut c, MessageType::Ack, &[SERVER_ID, LEASE_1H]);
        let lease = match c.step(Tick(1600)) {
            Some(DhcpEvent::Configured(l)) => l,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(c.state(), DhcpState::Bound);
        assert_eq!(lease.addr, OFFERED);
        assert_eq!((lease.t1, lease.t2, lease.lease_time), (1800, 3150, 3600));
        assert!(lease.t1 < lease.t2 && lease.t2 < lease.lease_time);
        assert_eq!(c.transport().configured, Some(lease));
    }

    #[test]
    fn test_wrong_xid_ignored() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        c.xid ^= 1;
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.xid ^= 1;
        c.step(Tick(1100));
        assert_eq!(c.state(), DhcpState::Selecting);
    }

    #[test]
    fn test_t1_t2_clamped() {
        let mut b = MessageBuilder::new(MessageType::Ack, 1, 0, MAC, Ipv4Addr::UNSPECIFIED, false);
        b.option(OPT_LEASE_TIME, &1000u32.to_be_bytes()).unwrap();
        b.option(OPT_RENEWAL_TIME, &900u32.to_be_bytes()).unwrap();
        b.option(OPT_REBINDING_TIME, &5000u32.to_be_bytes()).unwrap();
        let mut data = b.finish();
        data[16..20].copy_from_slice(&OFFERED.octets());
        let lease = lease_from_ack(&DhcpMessage::parse(&data).unwrap(), SERVER).unwrap();
        assert_eq!(lease.t2, 875);
        assert_eq!(lease.t1, 500);

        // lease time is mandatory
        let mut data = MessageBuilder::new(MessageType::Ack, 1, 0, MAC, Ipv4Addr::UNSPECIFIED, false).finish();
        data[16..20].copy_from_slice(&OFFERED.octets());
        assert!(lease_from_ack(&DhcpMessage::parse(&data).unwrap(), SERVER).is_err());
    }

    fn ack_with_lease(lease_time: u32, t2: Option<u32>) -> Result<DhcpLease> {
        let mut b = MessageBuilder::new(MessageType::Ack, 1, 0, MAC, Ipv4Addr::UNSPECIFIED, false);
        b.option(OPT_LEASE_TIME, &lease_time.to_be_bytes()).unwrap();
        if let Some(t2) = t2 {
            b.option(OPT_REBINDING_TIME, &t2.to_be_bytes()).unwrap();
        }
        let mut data = b.finish();
        data[16..20].copy_from_slice(&OFFERED.octets());
        lease_from_ack(&DhcpMessage::parse(&data).unwrap(), SERVER)
    }

    #[test]
    fn test_short_lease_rejected() {
        for secs in 0..DHCP_MIN_LEASE_TIME {
            assert_eq!(ack_with_lease(secs, None), Err(NetError::InvalidParameter));
        }
        for secs in DHCP_MIN_LEASE_TIME..20 {
            let l = ack_with_lease(secs, None).unwrap();
            assert!(0 < l.t1 && l.t1 < l.t2 && l.t2 < l.lease_time, "{:?}", l);
        }
        // a one second T2 cannot leave room for T1
        let l = ack_with_lease(8, Some(1)).unwrap();
        assert_eq!((l.t1, l.t2), (4, 7));
    }

    #[test]
    fn test_short_lease_ack_ignored() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));
        reply(&mut c, MessageType::Ack, &[SERVER_ID, (OPT_LEASE_TIME, &[0, 0, 0, 1])]);
        assert_eq!(c.step(Tick(1100)), None);
        assert_eq!(c.state(), DhcpState::Requesting);
        assert!(c.transport().configured.is_none());
    }

    #[test]
    fn test_renew_rebind_expire() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));
        reply(&mut c, MessageType::Ack, &[SERVER_ID, LEASE_1H]);
        c.step(Tick(1000));
        let sent = c.transport().sent.len();

        // T1 = 1800 s after the Request
        c.step(Tick(1000 + 1_800_000 - 1));
        assert_eq!(c.state(), DhcpState::Bound);
        c.step(Tick(1000 + 1_800_000));
        assert_eq!(c.state(), DhcpState::Renewing);
        let (src, dst, _) = &c.transport().sent[sent];
        assert_eq!((*src, *dst), (OFFERED, SERVER));

        c.step(Tick(1000 + 3_150_000));
        assert_eq!(c.state(), DhcpState::Rebinding);
        assert_eq!(c.transport().sent.last().unwrap().1, Ipv4Addr::BROADCAST);

        assert_eq!(c.step(Tick(1000 + 3_600_000)), Some(DhcpEvent::Deconfigured));
        assert_eq!(c.state(), DhcpState::Init);
        assert_eq!(c.transport().configured, None);
    }

    #[test]
    fn test_nak_returns_to_init() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));
        reply(&mut c, MessageType::Nak, &[SERVER_ID]);
        assert_eq!(c.step(Tick(1100)), None);
        assert_eq!(c.state(), DhcpState::Init);
    }

    #[test]
    fn test_request_retry_ceiling() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));

        let mut t = 1000u32;
        let mut timeout = DHCP_REQUEST_INIT_TIMEOUT_MS;
        for _ in 0..DHCP_REQUEST_MAX_RETRIES {
            t += timeout;
            c.step(Tick(t));
            assert_eq!(c.state(), DhcpState::Requesting);
            timeout = min(timeout * 2, DHCP_REQUEST_MAX_TIMEOUT_MS);
        }
        c.step(Tick(t + timeout));
        assert_eq!(c.state(), DhcpState::Init);
        // 1 Discover + 1 Request + retries
        assert_eq!(c.transport().sent.len(), 2 + DHCP_REQUEST_MAX_RETRIES as usize);
    }

    #[test]
    fn test_init_reboot() {
        let settings = DhcpClientSettings {
            requested_addr: Some(OFFERED),
            ..Default::default()
        };
        let mut c = DhcpClient::new(MockTransport::default(), settings);
        c.start(Tick(0));
        assert_eq!(c.state(), DhcpState::InitReboot);
        c.step(Tick(1000));
        assert_eq!(c.state(), DhcpState::Rebooting);
        let req = DhcpMessage::parse(&c.transport().sent[0].2).unwrap();
        assert_eq!(req.message_type(), Some(MessageType::Request));
        assert_eq!(req.option_addr(OPT_REQUESTED_IP), Some(OFFERED));
        assert_eq!(req.option(OPT_SERVER_ID), None);

        reply(&mut c, MessageType::Ack, &[SERVER_ID, LEASE_INFINITE]);
        match c.step(Tick(1100)) {
            Some(DhcpEvent::Configured(l)) => assert!(l.is_infinite()),
            other => panic!("unexpected {:?}", other),
        }
        // infinite lease never renews
        c.step(Tick(u32::MAX / 2));
        assert_eq!(c.state(), DhcpState::Bound);
    }

    #[test]
    fn test_failed_reboot_releases_address() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));
        reply(&mut c, MessageType::Ack, &[SERVER_ID, LEASE_1H]);
        assert!(matches!(c.step(Tick(1000)), Some(DhcpEvent::Configured(_))));

        // reconnect, but the server never answers
        c.link_changed(true, Tick(2000));
        assert_eq!(c.state(), DhcpState::InitReboot);

        let mut events = StdVec::new();
        let mut t = 2000u32;
        while t <= 1000 + 3_600_000 + 600_000 {
            t += 1000;
            if let Some(event) = c.step(Tick(t)) {
                events.push((t, event));
            }
        }
        assert_eq!(events.len(), 1);
        let (when, event) = events[0];
        assert_eq!(event, DhcpEvent::Deconfigured);
        // dropped when REBOOTING gives up, well before the lease ends
        assert!(when < 1000 + 3_600_000);
        assert!(c.lease().is_none());
        assert!(c.transport().configured.is_none());
        assert_ne!(c.state(), DhcpState::Bound);
    }

    #[test]
    fn test_lease_expires_outside_renewal() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));
        reply(&mut c, MessageType::Ack, &[SERVER_ID, LEASE_1H]);
        c.step(Tick(1000));

        // bounce just before expiry; REBOOTING is still retrying at lease end
        c.link_changed(true, Tick(1000 + 3_590_000));
        c.step(Tick(1000 + 3_595_000));
        assert_eq!(c.state(), DhcpState::Rebooting);
        assert!(c.transport().configured.is_some());

        assert_eq!(c.step(Tick(1000 + 3_600_000)), Some(DhcpEvent::Deconfigured));
        assert_eq!(c.state(), DhcpState::Init);
        assert!(c.transport().configured.is_none());
    }

    #[test]
    fn test_rapid_commit() {
        let settings = DhcpClientSettings {
            rapid_commit: true,
            hostname: Some("node"),
            ..Default::default()
        };
        let mut c = DhcpClient::new(MockTransport::default(), settings);
        c.start(Tick(0));
        c.step(Tick(1000));
        let discover = DhcpMessage::parse(&c.transport().sent[0].2).unwrap();
        assert_eq!(discover.option(OPT_RAPID_COMMIT), Some(&[][..]));
        assert_eq!(discover.option(OPT_HOST_NAME), Some(&b"node"[..]));
        assert_eq!(discover.option(OPT_CLIENT_ID), Some(&[1, 2, 0, 0, 0, 0, 0x10][..]));

        reply(
            &mut c,
            MessageType::Ack,
            &[SERVER_ID, LEASE_1H, RAPID_COMMIT],
        );
        assert!(matches!(c.step(Tick(1200)), Some(DhcpEvent::Configured(_))));
        assert_eq!(c.state(), DhcpState::Bound);
    }

    #[test]
    fn test_decline_restarts() {
        let mut c = DhcpClient::new(MockTransport::default(), DhcpClientSettings::default());
        c.start(Tick(0));
        c.step(Tick(1000));
        reply(&mut c, MessageType::Offer, &[SERVER_ID]);
        c.step(Tick(1000));
        reply(&mut c, MessageType::Ack, &[SERVER_ID, LEASE_1H]);
        c.step(Tick(1000));

        assert_eq!(c.decline(Tick(2000)), Some(DhcpEvent::Deconfigured));
        assert_eq!(c.state(), DhcpState::Init);
        let decline = c.transport().sent.last().unwrap().2.clone();
        let decline = DhcpMessage::parse(&decline).unwrap();
        assert_eq!(decline.message_type(), Some(MessageType::Decline));
        assert_eq!(decline.option_addr(OPT_REQUESTED_IP), Some(OFFERED));
        assert_eq!(c.lease(), None);
    }
}
