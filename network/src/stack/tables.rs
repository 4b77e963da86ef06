//! Fixed-capacity per-interface tables.
//!
//! Each table lives behind its own mutex inside the interface. Callers hold
//! the lock only for the walk or mutation itself.

use heapless::Vec;

use crate::error::{NetError, Result};
use crate::time::Tick;
use crate::types::MacAddress;

/// Multicast MAC filter slots.
pub const MAC_FILTER_SIZE: usize = 12;

/// Address resolution cache slots (ARP and Neighbor caches each).
pub const ADDR_CACHE_SIZE: usize = 8;

/// Lifetime of a learned (non-static) cache entry.
pub const ADDR_CACHE_ENTRY_TTL_MS: u32 = 10 * 60 * 1000;

// ═══════════════════════════════════════════════════════════════════════════
// MAC FILTER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MacFilterEntry {
    addr: MacAddress,
    ref_count: u32,
}

/// Reference-counted set of accepted multicast MAC addresses.
#[derive(Debug, Default)]
pub struct MacFilter {
    entries: Vec<MacFilterEntry, MAC_FILTER_SIZE>,
}

impl MacFilter {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Take a reference on `addr`.
    ///
    /// Returns `true` when the address is new and the hardware filter must
    /// be reprogrammed.
    pub fn add(&mut self, addr: MacAddress) -> Result<bool> {
        if let Some(e) = self.entries.iter_mut().find(|e| e.addr == addr) {
            e.ref_count += 1;
            return Ok(false);
        }
        self.entries
            .push(MacFilterEntry { addr, ref_count: 1 })
            .map_err(|_| NetError::OutOfResources)?;
        Ok(true)
    }

    /// Drop a reference on `addr`.
    ///
    /// Returns `true` when the last reference went away.
    pub fn remove(&mut self, addr: MacAddress) -> bool {
        let pos = match self.entries.iter().position(|e| e.addr == addr) {
            Some(p) => p,
            None => return false,
        };
        self.entries[pos].ref_count -= 1;
        if self.entries[pos].ref_count == 0 {
            self.entries.swap_remove(pos);
            return true;
        }
        false
    }

    pub fn contains(&self, addr: &MacAddress) -> bool {
        self.entries.iter().any(|e| e.addr == *addr)
    }

    /// Snapshot of the accepted addresses.
    pub fn addresses(&self) -> Vec<MacAddress, MAC_FILTER_SIZE> {
        self.entries.iter().map(|e| e.addr).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ADDRESS RESOLUTION CACHE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct CacheEntry<A> {
    addr: A,
    mac: MacAddress,
    updated: Tick,
    permanent: bool,
}

/// Protocol address to MAC address cache.
///
/// Used as the ARP cache (IPv4) and the Neighbor cache (IPv6).
#[derive(Debug)]
pub struct AddrCache<A, const N: usize> {
    entries: Vec<CacheEntry<A>, N>,
}

impl<A: Copy + PartialEq, const N: usize> Default for AddrCache<A, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Copy + PartialEq, const N: usize> AddrCache<A, N> {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn lookup(&self, addr: &A) -> Option<MacAddress> {
        self.entries.iter().find(|e| e.addr == *addr).map(|e| e.mac)
    }

    /// Insert or refresh a learned mapping.
    ///
    /// Static entries are never overwritten by learning.
    pub fn learn(&mut self, addr: A, mac: MacAddress, now: Tick) -> Result<()> {
        if let Some(e) = self.entries.iter_mut().find(|e| e.addr == addr) {
            if !e.permanent {
                e.mac = mac;
                e.updated = now;
            }
            return Ok(());
        }
        self.push(CacheEntry {
            addr,
            mac,
            updated: now,
            permanent: false,
        })
    }

    /// Insert a static mapping that survives flushes and expiry.
    pub fn insert_static(&mut self, addr: A, mac: MacAddress) -> Result<()> {
        if let Some(e) = self.entries.iter_mut().find(|e| e.addr == addr) {
            e.mac = mac;
            e.permanent = true;
            return Ok(());
        }
        self.push(CacheEntry {
            addr,
            mac,
            updated: Tick::ZERO,
            permanent: true,
        })
    }

    fn push(&mut self, entry: CacheEntry<A>) -> Result<()> {
        self.entries.push(entry).map_err(|_| NetError::OutOfResources)
    }

    pub fn remove(&mut self, addr: &A) {
        self.entries.retain(|e| e.addr != *addr);
    }

    /// Drop learned entries older than the entry lifetime.
    pub fn expire(&mut self, now: Tick) {
        self.entries
            .retain(|e| e.permanent || now.elapsed_since(e.updated) < ADDR_CACHE_ENTRY_TTL_MS);
    }

    /// Drop every learned entry.
    pub fn flush(&mut self) {
        self.entries.retain(|e| e.permanent);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type ArpCache = AddrCache<core::net::Ipv4Addr, ADDR_CACHE_SIZE>;
pub type NeighborCache = AddrCache<core::net::Ipv6Addr, ADDR_CACHE_SIZE>;

#[cfg(test)]
mod tests {
    use super::*;
    use smoltcp::wire::EthernetAddress;

    const MAC_A: MacAddress = EthernetAddress([0x33, 0x33, 0, 0, 0, 1]);
    const MAC_B: MacAddress = EthernetAddress([0x33, 0x33, 0xff, 0, 0, 2]);

    #[test]
    fn test_mac_filter_refcount() {
        let mut f = MacFilter::new();
        assert!(f.add(MAC_A).unwrap());
        assert!(!f.add(MAC_A).unwrap());
        assert!(f.add(MAC_B).unwrap());
        assert_eq!(f.addresses().len(), 2);

        assert!(!f.remove(MAC_A));
        assert!(f.contains(&MAC_A));
        assert!(f.remove(MAC_A));
        assert!(!f.contains(&MAC_A));
        assert!(!f.remove(MAC_A));
    }

    #[test]
    fn test_mac_filter_full() {
        let mut f = MacFilter::new();
        for i in 0..MAC_FILTER_SIZE {
            f.add(EthernetAddress([0x33, 0x33, 0, 0, 0, i as u8])).unwrap();
        }
        assert_eq!(f.add(MAC_B), Err(NetError::OutOfResources));
    }

    #[test]
    fn test_cache_learn_expire_flush() {
        let mut cache: NeighborCache = AddrCache::new();
        let a = "fe80::1".parse().unwrap();
        let b = "fe80::2".parse().unwrap();
        let mac1 = EthernetAddress([2, 0, 0, 0, 0, 1]);
        let mac2 = EthernetAddress([2, 0, 0, 0, 0, 2]);

        cache.learn(a, mac1, Tick(0)).unwrap();
        cache.insert_static(b, mac2).unwrap();
        cache.learn(b, mac1, Tick(5)).unwrap();
        assert_eq!(cache.lookup(&b), Some(mac2));

        cache.learn(a, mac2, Tick(100)).unwrap();
        assert_eq!(cache.lookup(&a), Some(mac2));

        cache.expire(Tick(100 + ADDR_CACHE_ENTRY_TTL_MS));
        assert_eq!(cache.lookup(&a), None);
        assert_eq!(cache.len(), 1);

        cache.learn(a, mac1, Tick(0)).unwrap();
        cache.flush();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&b), Some(mac2));
    }

    #[test]
    fn test_cache_exhaustion_is_an_error() {
        let mut cache: ArpCache = AddrCache::new();
        for i in 0..ADDR_CACHE_SIZE {
            cache
                .learn(core::net::Ipv4Addr::new(10, 0, 0, i as u8), MAC_A, Tick(0))
                .unwrap();
        }
        assert_eq!(
            cache.learn(core::net::Ipv4Addr::new(10, 0, 1, 1), MAC_A, Tick(0)),
            Err(NetError::OutOfResources)
        );
    }
}
