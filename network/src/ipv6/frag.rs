//! IPv6 fragmentation and reassembly.
//!
//! Reassembly keys in-flight datagrams by source, destination and
//! identification. Each descriptor copies fragment data into an owned
//! buffer with room for the IPv6 header in front, so the completed
//! datagram can be fed back through the header walk.
//!
//! # Reference
//! RFC 8200 §4.5, RFC 5722 (overlapping fragments)

use core::net::Ipv6Addr;

use heapless::Vec;
use log::{debug, trace, warn};
use rand_core::RngCore;

use super::header::{FragmentHeader, Ipv6Header, IPV6_HEADER_LEN};
use crate::buffer::{ChunkedBuffer, MemPool};
use crate::driver::NicDriver;
use crate::error::{NetError, Result};
use crate::stack::NetInterface;
use crate::time::Tick;

/// Largest datagram accepted for reassembly.
pub const MAX_FRAG_DATAGRAM_SIZE: usize = 8192;

/// Datagrams reassembled concurrently.
pub const IPV6_MAX_FRAG_DATAGRAMS: usize = 4;

/// Disjoint byte ranges tracked per datagram. Adjacent ranges are merged.
pub const IPV6_MAX_FRAG_RANGES: usize = 16;

/// Time allowed for all fragments of a datagram to arrive.
pub const IPV6_FRAG_TIME_TO_LIVE_MS: u32 = 15_000;

struct FragDesc<'a> {
    src: Ipv6Addr,
    dst: Ipv6Addr,
    identification: u32,
    hop_limit: u8,
    /// Known once the first fragment (offset 0) arrived.
    next_header: Option<u8>,
    /// Known once the last fragment (M clear) arrived.
    total_len: Option<usize>,
    received: usize,
    /// Sorted, non-adjacent `[start, end)` ranges already received.
    ranges: Vec<(usize, usize), IPV6_MAX_FRAG_RANGES>,
    /// Header room followed by the payload.
    buffer: ChunkedBuffer<'a>,
    deadline: Tick,
}

impl<'a> FragDesc<'a> {
    /// Add one fragment. Returns `true` once the datagram is complete.
    ///
    /// An error means the datagram is inconsistent and must be purged.
    fn insert(
        &mut self,
        header: &Ipv6Header,
        frag: &FragmentHeader,
        data: &ChunkedBuffer<'_>,
        data_offset: usize,
        data_len: usize,
    ) -> Result<bool> {
        let start = frag.offset as usize;
        let end = start + data_len;

        if let Some(total) = self.total_len {
            if end > total || (!frag.more && end != total) {
                return Err(NetError::InvalidHeader);
            }
        }
        if !frag.more {
            let highest = self.ranges.last().map(|r| r.1).unwrap_or(0);
            if end < highest {
                return Err(NetError::InvalidHeader);
            }
        }

        for &(s, e) in self.ranges.iter() {
            if s == start && e == end {
                trace!("[FRAG] duplicate fragment {}..{}", start, end);
                return Ok(false);
            }
            if start < e && s < end {
                return Err(NetError::InvalidHeader);
            }
        }

        if self.buffer.len() < IPV6_HEADER_LEN + end {
            self.buffer.set_length(IPV6_HEADER_LEN + end)?;
        }
        self.buffer.copy(IPV6_HEADER_LEN + start, data, data_offset, data_len)?;

        if data_len > 0 {
            self.add_range(start, end)?;
        }
        self.received += data_len;

        if !frag.more {
            self.total_len = Some(end);
        }
        if start == 0 {
            self.next_header = Some(frag.next_header);
            self.hop_limit = header.hop_limit;
        }

        Ok(self.next_header.is_some() && self.total_len == Some(self.received))
    }

    fn add_range(&mut self, start: usize, end: usize) -> Result<()> {
        let pos = self
            .ranges
            .iter()
            .position(|r| r.0 > start)
            .unwrap_or(self.ranges.len());

        // merge with the neighbours when adjacent
        let joins_prev = pos > 0 && self.ranges[pos - 1].1 == start;
        let joins_next = pos < self.ranges.len() && self.ranges[pos].0 == end;
        match (joins_prev, joins_next) {
            (true, true) => {
                self.ranges[pos - 1].1 = self.ranges[pos].1;
                self.ranges.remove(pos);
            }
            (true, false) => self.ranges[pos - 1].1 = end,
            (false, true) => self.ranges[pos].0 = start,
            (false, false) => self
                .ranges
                .insert(pos, (start, end))
                .map_err(|_| NetError::OutOfResources)?,
        }
        Ok(())
    }

    /// Write the IPv6 header of the reassembled datagram in front of the
    /// payload and hand over the buffer.
    fn finish(mut self) -> Result<ChunkedBuffer<'a>> {
        let total = self.total_len.ok_or(NetError::Failure)?;
        let next_header = self.next_header.ok_or(NetError::Failure)?;
        let header = Ipv6Header::new(self.src, self.dst, next_header, self.hop_limit, total as u16);
        self.buffer.set_length(IPV6_HEADER_LEN + total)?;
        self.buffer.write_all(0, &header.emit())?;
        Ok(self.buffer)
    }
}

/// Fixed-capacity reassembly queue.
pub struct FragQueue<'a> {
    slots: Vec<FragDesc<'a>, IPV6_MAX_FRAG_DATAGRAMS>,
}

impl Default for FragQueue<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FragQueue<'a> {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Datagrams currently being reassembled.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Feed one fragment.
    ///
    /// `data_len` bytes of fragment payload start at `data_offset` in
    /// `data`. Returns the reassembled datagram, IPv6 header included, once
    /// every byte arrived. An error means the fragment was dropped; the
    /// whole datagram is purged when the fragment is inconsistent with it.
    pub fn insert(
        &mut self,
        pool: &'a MemPool,
        header: &Ipv6Header,
        frag: &FragmentHeader,
        data: &ChunkedBuffer<'_>,
        data_offset: usize,
        data_len: usize,
        now: Tick,
    ) -> Result<Option<ChunkedBuffer<'a>>> {
        // non-final fragments carry a multiple of 8 bytes
        if frag.more && (data_len == 0 || data_len % 8 != 0) {
            return Err(NetError::InvalidLength);
        }
        if frag.offset as usize + data_len > MAX_FRAG_DATAGRAM_SIZE {
            return Err(NetError::InvalidLength);
        }

        let index = match self.find(&header.src, &header.dst, frag.identification) {
            Some(i) => i,
            None => self.create(pool, header, frag.identification, now)?,
        };

        match self.slots[index].insert(header, frag, data, data_offset, data_len) {
            Ok(false) => Ok(None),
            Ok(true) => {
                let desc = self.slots.swap_remove(index);
                debug!(
                    "[FRAG] datagram {:#x} from {} reassembled",
                    desc.identification, desc.src
                );
                desc.finish().map(Some)
            }
            Err(e) => {
                let desc = self.slots.swap_remove(index);
                debug!(
                    "[FRAG] datagram {:#x} from {} purged: {}",
                    desc.identification, desc.src, e
                );
                Err(e)
            }
        }
    }

    fn find(&self, src: &Ipv6Addr, dst: &Ipv6Addr, identification: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|d| d.identification == identification && d.src == *src && d.dst == *dst)
    }

    fn create(
        &mut self,
        pool: &'a MemPool,
        header: &Ipv6Header,
        identification: u32,
        now: Tick,
    ) -> Result<usize> {
        if self.slots.is_full() {
            warn!("[FRAG] reassembly queue full, fragment dropped");
            return Err(NetError::OutOfResources);
        }
        let desc = FragDesc {
            src: header.src,
            dst: header.dst,
            identification,
            hop_limit: header.hop_limit,
            next_header: None,
            total_len: None,
            received: 0,
            ranges: Vec::new(),
            buffer: ChunkedBuffer::alloc(pool, IPV6_HEADER_LEN)?,
            deadline: now.add_ms(IPV6_FRAG_TIME_TO_LIVE_MS),
        };
        self.slots
            .push(desc)
            .map_err(|_| NetError::OutOfResources)?;
        Ok(self.slots.len() - 1)
    }

    /// Purge datagrams whose hold time ran out.
    pub fn expire(&mut self, now: Tick) {
        self.slots.retain(|d| {
            let alive = !now.has_reached(d.deadline);
            if !alive {
                debug!(
                    "[FRAG] datagram {:#x} from {} timed out",
                    d.identification, d.src
                );
            }
            alive
        });
    }

    /// Drop every pending datagram.
    pub fn flush(&mut self) {
        self.slots.clear();
    }
}

impl<'a, D: NicDriver, R: RngCore> NetInterface<'a, D, R> {
    /// Feed a received fragment to the reassembly queue and process the
    /// datagram once complete.
    pub(crate) fn ipv6_parse_fragment(
        &self,
        header: &Ipv6Header,
        frag: &FragmentHeader,
        buffer: &ChunkedBuffer<'_>,
        offset: usize,
        len: usize,
    ) -> Result<()> {
        let now = self.now();
        let completed = self
            .frag_queue
            .lock()
            .insert(self.pool, header, frag, buffer, offset, len, now)?;

        if let Some(datagram) = completed {
            self.ipv6_process(&datagram, 0, true)?;
        }
        Ok(())
    }

    pub(crate) fn frag_tick(&self, now: Tick) {
        self.frag_queue.lock().expire(now);
    }
}
