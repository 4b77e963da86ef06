//! ICMPv6 message processing.
//!
//! Handles Echo Request/Reply and hands Multicast Listener Discovery
//! messages to the MLD state machine. Error messages are never generated
//! in response to malformed traffic.
//!
//! # Reference
//! RFC 4443

use core::net::Ipv6Addr;

use log::{debug, trace};
use rand_core::RngCore;

use crate::buffer::ChunkedBuffer;
use crate::driver::NicDriver;
use crate::error::{NetError, Result};
use crate::ipv6::addr;
use crate::ipv6::checksum::upper_layer_checksum;
use crate::ipv6::header::{NextHeader, IPV6_DEFAULT_HOP_LIMIT};
use crate::ipv6::Ipv6PseudoHeader;
use crate::stack::NetInterface;

pub const ICMPV6_HEADER_LEN: usize = 4;
pub const ICMPV6_ECHO_HEADER_LEN: usize = 8;

pub const ICMPV6_TYPE_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_TYPE_ECHO_REPLY: u8 = 129;
pub const ICMPV6_TYPE_MLD_QUERY: u8 = 130;
pub const ICMPV6_TYPE_MLD_REPORT: u8 = 131;
pub const ICMPV6_TYPE_MLD_DONE: u8 = 132;

const ICMPV6: u8 = 58;

/// Fill in the checksum of the ICMPv6 message at `offset`.
///
/// The checksum field must be zero on entry.
pub(crate) fn icmpv6_finalize(
    src: &Ipv6Addr,
    dst: &Ipv6Addr,
    buffer: &mut ChunkedBuffer<'_>,
    offset: usize,
    len: usize,
) -> Result<()> {
    let sum = upper_layer_checksum(src, dst, ICMPV6, buffer, offset, len);
    buffer.write_all(offset + 2, &sum.to_be_bytes())
}

impl<'a, D: NicDriver, R: RngCore> NetInterface<'a, D, R> {
    /// Process an ICMPv6 message of `pseudo.length` bytes at `offset`.
    pub(crate) fn icmpv6_process_message(
        &self,
        pseudo: &Ipv6PseudoHeader,
        hop_limit: u8,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        let len = pseudo.length as usize;
        if len < ICMPV6_HEADER_LEN {
            return Err(NetError::InvalidLength);
        }
        if upper_layer_checksum(&pseudo.src, &pseudo.dst, ICMPV6, buffer, offset, len) != 0 {
            debug!("[IPv6] {}: bad ICMPv6 checksum from {}", self.name(), pseudo.src);
            return Err(NetError::InvalidHeader);
        }

        let mut hdr = [0u8; ICMPV6_HEADER_LEN];
        buffer.read_exact(offset, &mut hdr)?;

        match hdr[0] {
            ICMPV6_TYPE_ECHO_REQUEST => self.icmpv6_process_echo_request(pseudo, buffer, offset),
            ICMPV6_TYPE_MLD_QUERY => {
                self.mld_process_listener_query(pseudo, hop_limit, buffer, offset)
            }
            ICMPV6_TYPE_MLD_REPORT => {
                self.mld_process_listener_report(pseudo, hop_limit, buffer, offset)
            }
            // Done messages are for routers
            ICMPV6_TYPE_MLD_DONE => Ok(()),
            ICMPV6_TYPE_ECHO_REPLY => {
                trace!("[IPv6] {}: echo reply from {}", self.name(), pseudo.src);
                Ok(())
            }
            other => {
                trace!("[IPv6] {}: ICMPv6 type {} ignored", self.name(), other);
                Ok(())
            }
        }
    }

    /// Answer an Echo Request with an Echo Reply carrying the same data.
    fn icmpv6_process_echo_request(
        &self,
        pseudo: &Ipv6PseudoHeader,
        request: &ChunkedBuffer<'_>,
        offset: usize,
    ) -> Result<()> {
        let len = pseudo.length as usize;
        if len < ICMPV6_ECHO_HEADER_LEN {
            return Err(NetError::InvalidLength);
        }
        if pseudo.src.is_unspecified() {
            return Err(NetError::InvalidAddress);
        }

        // replies to a group go out from one of our unicast addresses
        let src = if addr::is_multicast(&pseudo.dst) {
            self.select_source_addr(&pseudo.src)?
        } else {
            pseudo.dst
        };

        let (mut reply, reply_offset) = self.ipv6_alloc_buffer(len)?;
        reply.copy(reply_offset, request, offset, len)?;
        reply.write_all(reply_offset, &[ICMPV6_TYPE_ECHO_REPLY, 0, 0, 0])?;
        icmpv6_finalize(&src, &pseudo.src, &mut reply, reply_offset, len)?;

        debug!("[IPv6] {}: echo reply to {}", self.name(), pseudo.src);
        self.ipv6_send_datagram(
            &src,
            &pseudo.src,
            NextHeader::Icmpv6.into(),
            IPV6_DEFAULT_HOP_LIMIT,
            &mut reply,
            reply_offset,
        )
    }

    /// Send an Echo Request to `dst`.
    pub fn icmpv6_send_echo_request(
        &self,
        dst: &Ipv6Addr,
        identifier: u16,
        sequence: u16,
        data: &[u8],
    ) -> Result<()> {
        let src = self.select_source_addr(dst)?;
        addr::check_source_addr(&src)?;

        let len = ICMPV6_ECHO_HEADER_LEN + data.len();
        let (mut buffer, offset) = self.ipv6_alloc_buffer(len)?;

        let mut hdr = [0u8; ICMPV6_ECHO_HEADER_LEN];
        hdr[0] = ICMPV6_TYPE_ECHO_REQUEST;
        hdr[4..6].copy_from_slice(&identifier.to_be_bytes());
        hdr[6..8].copy_from_slice(&sequence.to_be_bytes());
        buffer.write_all(offset, &hdr)?;
        buffer.write_all(offset + ICMPV6_ECHO_HEADER_LEN, data)?;
        icmpv6_finalize(&src, dst, &mut buffer, offset, len)?;

        self.ipv6_send_datagram(
            &src,
            dst,
            NextHeader::Icmpv6.into(),
            IPV6_DEFAULT_HOP_LIMIT,
            &mut buffer,
            offset,
        )
    }
}
