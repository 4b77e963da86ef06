//! IPv6 engine.
//!
//! Receive side walks the extension header chain of every datagram and
//! dispatches the final header to ICMPv6 or the registered upper layer.
//! Transmit side builds the IPv6 and Ethernet headers in front of the
//! payload and fragments datagrams that exceed the link MTU.
//!
//! Outgoing buffers reserve [`IPV6_TX_OFFSET`] bytes in front of the
//! payload for the Ethernet and IPv6 headers; see [`NetInterface::ipv6_alloc_buffer`].
//!
//! # Reference
//! RFC 8200 (IPv6), RFC 4291 (addressing)

pub mod addr;
pub mod checksum;
pub mod config;
pub mod frag;
pub mod header;

use core::cmp::min;
use core::net::Ipv6Addr;
use core::sync::atomic::Ordering;

use log::trace;
use rand_core::RngCore;

use crate::buffer::ChunkedBuffer;
use crate::driver::NicDriver;
use crate::error::{NetError, Result};
use crate::stack::NetInterface;
use crate::types::{EthernetHeader, EthernetProtocol, MacAddress, ETH_HLEN};

use addr::Scope;
use checksum::upper_layer_checksum;
use header::{
    ah_header_len, check_options, ext_header_len, FragmentHeader, Ipv6Header, NextHeader,
    IPV6_DEFAULT_MTU, IPV6_FRAG_HEADER_LEN, IPV6_HEADER_LEN,
};

pub use addr::{LINK_LOCAL_ALL_NODES, LINK_LOCAL_ALL_ROUTERS, UNSPECIFIED};
pub use config::{AddrState, Ipv6Config};
pub use frag::{FragQueue, MAX_FRAG_DATAGRAM_SIZE};
pub use header::IPV6_DEFAULT_HOP_LIMIT;

/// Header room in front of an outgoing IPv6 payload.
pub const IPV6_TX_OFFSET: usize = ETH_HLEN + IPV6_HEADER_LEN;

/// Longest Hop-by-Hop or Destination Options header accepted.
pub const IPV6_MAX_OPTIONS_LEN: usize = 256;

/// Fields covered by the upper-layer checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6PseudoHeader {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    /// Upper-layer message length.
    pub length: u32,
    pub next_header: u8,
}

impl<'a, D: NicDriver, R: RngCore> NetInterface<'a, D, R> {
    /// IPv6 link MTU; never below the IPv6 minimum.
    pub fn ipv6_mtu(&self) -> usize {
        self.mtu().max(IPV6_DEFAULT_MTU)
    }

    /// Allocate a buffer for a `len`-byte IPv6 payload.
    ///
    /// Returns the buffer and the offset of the payload.
    pub fn ipv6_alloc_buffer(&self, len: usize) -> Result<(ChunkedBuffer<'a>, usize)> {
        let buffer = ChunkedBuffer::alloc(self.pool, IPV6_TX_OFFSET + len)?;
        Ok((buffer, IPV6_TX_OFFSET))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ADDRESSES
    // ═══════════════════════════════════════════════════════════════════════

    /// Source address to use towards `dest`.
    pub fn select_source_addr(&self, dest: &Ipv6Addr) -> Result<Ipv6Addr> {
        let config = self.ipv6_config.lock();
        addr::select_source_addr(core::slice::from_ref(&*config), dest).map(|(_, a)| a)
    }

    /// Accept only datagrams addressed to us: a valid local unicast
    /// address or a joined multicast group of link scope or wider.
    pub fn check_dest_addr(&self, dest: &Ipv6Addr) -> Result<()> {
        if addr::is_multicast(dest) {
            if addr::multicast_scope(dest) < Scope::LinkLocal {
                return Err(NetError::InvalidAddress);
            }
            if self.ipv6_filter.lock().iter().any(|e| e.addr == *dest) {
                return Ok(());
            }
            return Err(NetError::InvalidAddress);
        }
        if self.ipv6_config.lock().is_local_addr(dest) {
            Ok(())
        } else {
            Err(NetError::InvalidAddress)
        }
    }

    /// Link-layer destination for `dst`.
    ///
    /// Multicast maps to 33:33:xx:xx:xx:xx. Unicast goes to the neighbor
    /// itself when on-link, otherwise to the default router.
    pub fn ipv6_resolve(&self, dst: &Ipv6Addr) -> Result<MacAddress> {
        if addr::is_multicast(dst) {
            return addr::multicast_to_mac(dst);
        }
        let next_hop = {
            let config = self.ipv6_config.lock();
            if config.is_on_link(dst) {
                *dst
            } else {
                config.router.ok_or(NetError::NoRoute)?
            }
        };
        self.neighbor_cache
            .lock()
            .lookup(&next_hop)
            .ok_or(NetError::Unresolved)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECEIVE
    // ═══════════════════════════════════════════════════════════════════════

    /// Process an incoming IPv6 datagram starting at `offset`.
    ///
    /// Malformed or unwanted datagrams are dropped silently.
    pub fn ipv6_process_packet(&self, buffer: &ChunkedBuffer<'_>, offset: usize) {
        if let Err(e) = self.ipv6_process(buffer, offset, false) {
            trace!("[IPv6] {}: datagram dropped: {}", self.name(), e);
            self.stats.rx_drop();
        }
    }

    /// Header chain walk. `reassembled` is set for datagrams coming out of
    /// the reassembly queue, which may not contain another Fragment header.
    pub(crate) fn ipv6_process(
        &self,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
        reassembled: bool,
    ) -> Result<()> {
        let mut raw = [0u8; IPV6_HEADER_LEN];
        buffer
            .read_exact(offset, &mut raw)
            .map_err(|_| NetError::InvalidLength)?;
        let header = Ipv6Header::parse(&raw)?;

        let available = buffer.len() - offset - IPV6_HEADER_LEN;
        let payload_len = header.payload_len as usize;
        if payload_len > available {
            return Err(NetError::InvalidLength);
        }
        if addr::is_multicast(&header.src) {
            return Err(NetError::InvalidAddress);
        }
        if !reassembled {
            self.check_dest_addr(&header.dst)?;
        }

        // trailing link-layer padding is ignored
        let end = offset + IPV6_HEADER_LEN + payload_len;
        let mut pos = offset + IPV6_HEADER_LEN;
        let mut next = header.next_header;
        let mut first = true;
        let mut in_fragment = reassembled;

        loop {
            match NextHeader::from(next) {
                kind @ (NextHeader::HopByHop | NextHeader::DestOpts) => {
                    // Hop-by-Hop may only follow the fixed header
                    if kind == NextHeader::HopByHop && !first {
                        return Err(NetError::InvalidHeader);
                    }
                    let (nh, len) = read_ext_header(buffer, pos, end)?;
                    if len > IPV6_MAX_OPTIONS_LEN {
                        return Err(NetError::InvalidLength);
                    }
                    let mut options = [0u8; IPV6_MAX_OPTIONS_LEN];
                    buffer.read_exact(pos, &mut options[..len])?;
                    check_options(&options[2..len])?;
                    next = nh;
                    pos += len;
                }
                NextHeader::Routing => {
                    let (nh, len) = read_ext_header(buffer, pos, end)?;
                    let mut fixed = [0u8; 4];
                    buffer.read_exact(pos, &mut fixed)?;
                    // no routing header processing; only exhausted ones pass
                    if fixed[3] != 0 {
                        return Err(NetError::InvalidHeader);
                    }
                    next = nh;
                    pos += len;
                }
                NextHeader::Fragment => {
                    if in_fragment {
                        return Err(NetError::InvalidHeader);
                    }
                    if pos + IPV6_FRAG_HEADER_LEN > end {
                        return Err(NetError::InvalidLength);
                    }
                    let mut raw = [0u8; IPV6_FRAG_HEADER_LEN];
                    buffer.read_exact(pos, &mut raw)?;
                    let frag = FragmentHeader::parse(&raw);
                    pos += IPV6_FRAG_HEADER_LEN;

                    if frag.offset != 0 || frag.more {
                        return self.ipv6_parse_fragment(&header, &frag, buffer, pos, end - pos);
                    }
                    // atomic fragment
                    in_fragment = true;
                    next = frag.next_header;
                }
                NextHeader::Ah => {
                    let mut fixed = [0u8; 2];
                    if pos + 2 > end {
                        return Err(NetError::InvalidLength);
                    }
                    buffer.read_exact(pos, &mut fixed)?;
                    let len = ah_header_len(fixed[1]);
                    if pos + len > end {
                        return Err(NetError::InvalidLength);
                    }
                    next = fixed[0];
                    pos += len;
                }
                NextHeader::Esp => {
                    trace!("[IPv6] {}: ESP datagram without security association", self.name());
                    return Ok(());
                }
                NextHeader::NoNext => return Ok(()),
                NextHeader::Icmpv6 => {
                    let pseudo = Ipv6PseudoHeader {
                        src: header.src,
                        dst: header.dst,
                        length: (end - pos) as u32,
                        next_header: next,
                    };
                    return self.icmpv6_process_message(&pseudo, header.hop_limit, buffer, pos);
                }
                NextHeader::Tcp | NextHeader::Udp | NextHeader::Other(_) => {
                    let pseudo = Ipv6PseudoHeader {
                        src: header.src,
                        dst: header.dst,
                        length: (end - pos) as u32,
                        next_header: next,
                    };
                    return self.deliver_upper_layer(&pseudo, buffer, pos);
                }
            }
            first = false;
        }
    }

    fn deliver_upper_layer(
        &self,
        pseudo: &Ipv6PseudoHeader,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        let kind = NextHeader::from(pseudo.next_header);
        if matches!(kind, NextHeader::Tcp | NextHeader::Udp) {
            let sum = upper_layer_checksum(
                &pseudo.src,
                &pseudo.dst,
                pseudo.next_header,
                buffer,
                offset,
                pseudo.length as usize,
            );
            if sum != 0 {
                return Err(NetError::InvalidHeader);
            }
        }

        let handler = *self.upper_layer.lock();
        match handler {
            Some(h) => h.process(pseudo, buffer, offset),
            None => trace!(
                "[IPv6] {}: no handler for protocol {}",
                self.name(),
                pseudo.next_header
            ),
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSMIT
    // ═══════════════════════════════════════════════════════════════════════

    /// Send the payload held in `buffer` from `offset`.
    ///
    /// `offset` must leave [`IPV6_TX_OFFSET`] bytes of header room.
    /// Datagrams larger than the link MTU are fragmented; each fragment
    /// borrows its data from `buffer`.
    pub fn ipv6_send_datagram(
        &self,
        src: &Ipv6Addr,
        dst: &Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
        buffer: &mut ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        if offset < IPV6_TX_OFFSET || offset > buffer.len() {
            return Err(NetError::InvalidParameter);
        }
        let payload_len = buffer.len() - offset;
        if payload_len > u16::MAX as usize {
            return Err(NetError::InvalidLength);
        }

        if payload_len + IPV6_HEADER_LEN <= self.ipv6_mtu() {
            let header = Ipv6Header::new(*src, *dst, next_header, hop_limit, payload_len as u16);
            return self.ipv6_send_packet(&header, buffer, offset);
        }
        self.ipv6_fragment_datagram(src, dst, next_header, hop_limit, buffer, offset)
    }

    fn ipv6_fragment_datagram(
        &self,
        src: &Ipv6Addr,
        dst: &Ipv6Addr,
        next_header: u8,
        hop_limit: u8,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        let payload_len = buffer.len() - offset;
        let max_frag = (self.ipv6_mtu() - IPV6_HEADER_LEN - IPV6_FRAG_HEADER_LEN) & !7;
        let identification = self.frag_id.fetch_add(1, Ordering::Relaxed);

        trace!(
            "[IPv6] {}: fragmenting {} bytes, id {:#x}",
            self.name(),
            payload_len,
            identification
        );

        let mut sent = 0;
        while sent < payload_len {
            let n = min(max_frag, payload_len - sent);
            let frag = FragmentHeader {
                next_header,
                offset: sent as u16,
                more: sent + n < payload_len,
                identification,
            };

            let mut fragment =
                ChunkedBuffer::alloc(self.pool, IPV6_TX_OFFSET + IPV6_FRAG_HEADER_LEN)?;
            fragment.write_all(IPV6_TX_OFFSET, &frag.emit())?;
            fragment.concat(buffer, offset + sent, n)?;

            let header = Ipv6Header::new(
                *src,
                *dst,
                NextHeader::Fragment.into(),
                hop_limit,
                (IPV6_FRAG_HEADER_LEN + n) as u16,
            );
            self.ipv6_send_packet(&header, &mut fragment, IPV6_TX_OFFSET)?;
            sent += n;
        }
        Ok(())
    }

    /// Prepend the IPv6 and Ethernet headers and hand the frame to the
    /// interface.
    pub fn ipv6_send_packet(
        &self,
        header: &Ipv6Header,
        buffer: &mut ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        if offset < IPV6_TX_OFFSET {
            return Err(NetError::InvalidParameter);
        }
        let dest = self.ipv6_resolve(&header.dst)?;

        buffer.write_all(offset - IPV6_HEADER_LEN, &header.emit())?;
        let eth = EthernetHeader {
            dest,
            src: self.mac_address(),
            ethertype: EthernetProtocol::Ipv6,
        };
        buffer.write_all(offset - IPV6_TX_OFFSET, &eth.emit())?;

        self.send_packet(buffer, offset - IPV6_TX_OFFSET)
    }
}

/// Next Header and total length of a generic extension header at `pos`.
fn read_ext_header(buffer: &ChunkedBuffer<'_>, pos: usize, end: usize) -> Result<(u8, usize)> {
    if pos + 2 > end {
        return Err(NetError::InvalidLength);
    }
    let mut fixed = [0u8; 2];
    buffer.read_exact(pos, &mut fixed)?;
    let len = ext_header_len(fixed[1]);
    if pos + len > end {
        return Err(NetError::InvalidLength);
    }
    Ok((fixed[0], len))
}
