//! Multicast Listener Discovery (MLDv1), host side.
//!
//! One [`Ipv6FilterEntry`] exists per joined group and interface. The
//! state machine runs under the interface's multicast filter lock;
//! messages it decides to send are transmitted after the lock is released.
//!
//! ```text
//!   NonListener ──join──▶ DelayingListener ──timer──▶ IdleListener
//!                               ▲    │ report heard         │
//!                               │    └──────────────────────▶│
//!                               └───────────query────────────┘
//! ```
//!
//! The link-scope all-nodes group is joined at startup, stays in
//! `IdleListener` and never sends Report or Done.
//!
//! # Reference
//! RFC 2710, RFC 3590 (source address)

use core::net::Ipv6Addr;

use heapless::Vec;
use log::{debug, trace, warn};
use rand_core::RngCore;

use crate::buffer::ChunkedBuffer;
use crate::driver::NicDriver;
use crate::error::{NetError, Result};
use crate::icmpv6::{icmpv6_finalize, ICMPV6_TYPE_MLD_DONE, ICMPV6_TYPE_MLD_REPORT};
use crate::ipv6::addr::{self, LINK_LOCAL_ALL_NODES, LINK_LOCAL_ALL_ROUTERS, UNSPECIFIED};
use crate::ipv6::header::{router_alert_header, NextHeader};
use crate::ipv6::Ipv6PseudoHeader;
use crate::stack::NetInterface;
use crate::time::Tick;

/// MLD messages are sent and accepted with this hop limit only.
pub const MLD_HOP_LIMIT: u8 = 1;

/// Delay before the unsolicited Report is repeated.
pub const MLD_UNSOLICITED_REPORT_INTERVAL_MS: u32 = 10_000;

pub const MLD_MESSAGE_LEN: usize = 24;

/// Multicast groups per interface.
pub const IPV6_MULTICAST_FILTER_SIZE: usize = 8;

/// Joined multicast groups of one interface.
pub type Ipv6Filter = Vec<Ipv6FilterEntry, IPV6_MULTICAST_FILTER_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MldState {
    NonListener,
    DelayingListener,
    IdleListener,
}

/// Listener state for one joined group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6FilterEntry {
    pub addr: Ipv6Addr,
    pub ref_count: u32,
    pub state: MldState,
    /// We were the last host to report for this group.
    pub flag: bool,
    pub timer: Tick,
}

impl Ipv6FilterEntry {
    pub fn new(addr: Ipv6Addr) -> Self {
        Self {
            addr,
            ref_count: 1,
            state: MldState::NonListener,
            flag: false,
            timer: Tick::ZERO,
        }
    }

    fn is_all_nodes(&self) -> bool {
        self.addr == LINK_LOCAL_ALL_NODES
    }

    /// Group joined. Returns `true` when a Report must be sent.
    pub fn start_listening(&mut self, link_up: bool, now: Tick) -> bool {
        if self.is_all_nodes() || !link_up {
            self.flag = false;
            self.state = MldState::IdleListener;
            return false;
        }
        self.flag = true;
        self.timer = now.add_ms(MLD_UNSOLICITED_REPORT_INTERVAL_MS);
        self.state = MldState::DelayingListener;
        true
    }

    /// Group left. Returns `true` when a Done must be sent.
    pub fn stop_listening(&mut self, link_up: bool) -> bool {
        let done = link_up && self.flag && !self.is_all_nodes();
        self.flag = false;
        self.state = MldState::NonListener;
        done
    }

    /// Query for this group (or a general query) received.
    ///
    /// A pending response is only ever brought forward.
    pub fn on_query(&mut self, max_resp_delay: u32, now: Tick, random: u32) {
        if self.is_all_nodes() {
            return;
        }
        let delay = random % (max_resp_delay + 1);
        match self.state {
            MldState::DelayingListener => {
                if now.is_before(self.timer) && max_resp_delay < self.timer.elapsed_since(now) {
                    self.timer = now.add_ms(delay);
                }
            }
            MldState::IdleListener => {
                self.timer = now.add_ms(delay);
                self.state = MldState::DelayingListener;
            }
            MldState::NonListener => {}
        }
    }

    /// Another host reported this group; our pending Report is suppressed.
    pub fn on_report(&mut self) {
        if self.state == MldState::DelayingListener {
            self.flag = false;
            self.state = MldState::IdleListener;
        }
    }

    /// Returns `true` when the delay timer fired and a Report is due.
    pub fn on_timer(&mut self, now: Tick) -> bool {
        if self.state == MldState::DelayingListener && now.has_reached(self.timer) {
            self.flag = true;
            self.state = MldState::IdleListener;
            return true;
        }
        false
    }

    /// Link state changed. Returns `true` when a Report must be sent.
    pub fn on_link_change(&mut self, link_up: bool, now: Tick) -> bool {
        if !link_up {
            self.flag = false;
            self.state = MldState::IdleListener;
            return false;
        }
        if self.is_all_nodes() {
            return false;
        }
        self.start_listening(true, now)
    }
}

type Pending = Vec<Ipv6Addr, IPV6_MULTICAST_FILTER_SIZE>;

impl<'a, D: NicDriver, R: RngCore> NetInterface<'a, D, R> {
    // ═══════════════════════════════════════════════════════════════════════
    // GROUP MEMBERSHIP
    // ═══════════════════════════════════════════════════════════════════════

    /// Join a multicast group, or take another reference on it.
    pub fn join_multicast_group(&self, group: &Ipv6Addr) -> Result<()> {
        let mac = addr::multicast_to_mac(group)?;
        let link_up = self.is_link_up();
        let now = self.now();

        let report = {
            let mut filter = self.ipv6_filter.lock();
            if let Some(entry) = filter.iter_mut().find(|e| e.addr == *group) {
                entry.ref_count += 1;
                return Ok(());
            }
            let mut entry = Ipv6FilterEntry::new(*group);
            let report = entry.start_listening(link_up, now);
            filter.push(entry).map_err(|_| {
                warn!("[MLD] {}: multicast filter full, cannot join {}", self.name(), group);
                NetError::OutOfResources
            })?;
            report
        };

        if let Err(e) = self.accept_multicast_mac(mac) {
            self.ipv6_filter.lock().retain(|e| e.addr != *group);
            return Err(e);
        }

        debug!("[MLD] {}: joined {}", self.name(), group);
        if report {
            self.mld_send(ICMPV6_TYPE_MLD_REPORT, group, group);
        }
        Ok(())
    }

    /// Drop a reference on a multicast group; the last one leaves it.
    pub fn leave_multicast_group(&self, group: &Ipv6Addr) -> Result<()> {
        let mac = addr::multicast_to_mac(group)?;
        let link_up = self.is_link_up();

        let done = {
            let mut filter = self.ipv6_filter.lock();
            let pos = filter
                .iter()
                .position(|e| e.addr == *group)
                .ok_or(NetError::InvalidAddress)?;
            filter[pos].ref_count -= 1;
            if filter[pos].ref_count > 0 {
                return Ok(());
            }
            let mut entry = filter.swap_remove(pos);
            entry.stop_listening(link_up)
        };

        self.drop_multicast_mac(mac)?;

        debug!("[MLD] {}: left {}", self.name(), group);
        if done {
            self.mld_send(ICMPV6_TYPE_MLD_DONE, &LINK_LOCAL_ALL_ROUTERS, group);
        }
        Ok(())
    }

    /// State of a joined group.
    pub fn mld_group_state(&self, group: &Ipv6Addr) -> Option<Ipv6FilterEntry> {
        self.ipv6_filter.lock().iter().find(|e| e.addr == *group).copied()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TIMERS AND EVENTS
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn mld_tick(&self, now: Tick) {
        let due: Pending = self
            .ipv6_filter
            .lock()
            .iter_mut()
            .filter_map(|e| e.on_timer(now).then_some(e.addr))
            .collect();

        for group in due.iter() {
            self.mld_send(ICMPV6_TYPE_MLD_REPORT, group, group);
        }
    }

    pub(crate) fn mld_link_change(&self, link_up: bool) {
        let now = self.now();
        let due: Pending = self
            .ipv6_filter
            .lock()
            .iter_mut()
            .filter_map(|e| e.on_link_change(link_up, now).then_some(e.addr))
            .collect();

        for group in due.iter() {
            self.mld_send(ICMPV6_TYPE_MLD_REPORT, group, group);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECEIVE
    // ═══════════════════════════════════════════════════════════════════════

    /// Read and validate an MLD message. Returns the Max Response Delay
    /// (ms) and the multicast address field.
    fn mld_read_message(
        &self,
        pseudo: &Ipv6PseudoHeader,
        hop_limit: u8,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<(u32, Ipv6Addr)> {
        if (pseudo.length as usize) < MLD_MESSAGE_LEN {
            return Err(NetError::InvalidLength);
        }
        if !addr::is_link_local_unicast(&pseudo.src) {
            return Err(NetError::InvalidAddress);
        }
        if hop_limit != MLD_HOP_LIMIT {
            return Err(NetError::InvalidHeader);
        }

        let mut msg = [0u8; MLD_MESSAGE_LEN];
        buffer.read_exact(offset, &mut msg)?;
        let max_resp_delay = u16::from_be_bytes([msg[4], msg[5]]) as u32;
        let mut group = [0u8; 16];
        group.copy_from_slice(&msg[8..24]);
        Ok((max_resp_delay, Ipv6Addr::from(group)))
    }

    pub(crate) fn mld_process_listener_query(
        &self,
        pseudo: &Ipv6PseudoHeader,
        hop_limit: u8,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        let (max_resp_delay, group) = self.mld_read_message(pseudo, hop_limit, buffer, offset)?;
        let now = self.now();
        trace!(
            "[MLD] {}: query for {} from {}, max delay {} ms",
            self.name(),
            group,
            pseudo.src,
            max_resp_delay
        );

        // draw the delays before taking the filter lock
        let mut random = [0u32; IPV6_MULTICAST_FILTER_SIZE];
        {
            let mut rng = self.rng.lock();
            for r in random.iter_mut() {
                *r = rng.next_u32();
            }
        }

        let mut filter = self.ipv6_filter.lock();
        for (entry, r) in filter.iter_mut().zip(random) {
            if group == UNSPECIFIED || group == entry.addr {
                entry.on_query(max_resp_delay, now, r);
            }
        }
        Ok(())
    }

    pub(crate) fn mld_process_listener_report(
        &self,
        pseudo: &Ipv6PseudoHeader,
        hop_limit: u8,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        let (_, group) = self.mld_read_message(pseudo, hop_limit, buffer, offset)?;

        let mut filter = self.ipv6_filter.lock();
        if let Some(entry) = filter.iter_mut().find(|e| e.addr == group) {
            if entry.state == MldState::DelayingListener {
                debug!("[MLD] {}: report for {} heard, suppressing ours", self.name(), group);
            }
            entry.on_report();
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSMIT
    // ═══════════════════════════════════════════════════════════════════════

    /// Send a Report or Done. Failures are logged; MLD repeats Reports on
    /// the next query or link event.
    fn mld_send(&self, msg_type: u8, dst: &Ipv6Addr, group: &Ipv6Addr) {
        if let Err(e) = self.mld_send_message(msg_type, dst, group) {
            debug!("[MLD] {}: cannot send type {} for {}: {}", self.name(), msg_type, group, e);
        }
    }

    fn mld_send_message(&self, msg_type: u8, dst: &Ipv6Addr, group: &Ipv6Addr) -> Result<()> {
        // link-local source, or unspecified while none is assigned
        let src = self.select_source_addr(dst).unwrap_or(UNSPECIFIED);

        let hbh = router_alert_header(NextHeader::Icmpv6.into());
        let (mut buffer, offset) = self.ipv6_alloc_buffer(hbh.len() + MLD_MESSAGE_LEN)?;
        buffer.write_all(offset, &hbh)?;

        let msg_offset = offset + hbh.len();
        let mut msg = [0u8; MLD_MESSAGE_LEN];
        msg[0] = msg_type;
        msg[8..24].copy_from_slice(&group.octets());
        buffer.write_all(msg_offset, &msg)?;
        icmpv6_finalize(&src, dst, &mut buffer, msg_offset, MLD_MESSAGE_LEN)?;

        trace!("[MLD] {}: type {} for {} to {}", self.name(), msg_type, group, dst);
        self.ipv6_send_datagram(
            &src,
            dst,
            NextHeader::HopByHop.into(),
            MLD_HOP_LIMIT,
            &mut buffer,
            offset,
        )
    }
}
