//! Fixed-block packet memory pool.
//!
//! Every packet buffer in the stack is assembled from equally sized blocks
//! handed out by a [`MemPool`]. The pool never grows: its storage is
//! allocated once at construction and an allocation bitmap tracks which
//! blocks are in use.
//!
//! # Design
//!
//! - **Fixed blocks**: `BLOCK_SIZE` bytes each, sized for one Ethernet frame
//! - **Unique handles**: a [`BlockId`] is neither `Clone` nor `Copy`, so the
//!   holder is the only party able to reach the block's memory
//! - **Thread-safe**: the bitmap lives behind a spin lock, block contents are
//!   reached only through their handle
//!
//! # Usage
//!
//! ```ignore
//! use embernet_pool::MemPool;
//!
//! let pool = MemPool::new(32);
//! let mut block = pool.alloc().ok_or(Error::OutOfMemory)?;
//! pool.block_mut(&mut block)[..4].copy_from_slice(&[1, 2, 3, 4]);
//! pool.free(block);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

/// Size of one pool block in bytes.
pub const BLOCK_SIZE: usize = 1536;

/// Default number of blocks.
pub const DEFAULT_BLOCK_COUNT: usize = 64;

/// Bits per bitmap word.
const WORD_BITS: usize = 32;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

// ============================================================================
// Block handle
// ============================================================================

/// Exclusive handle to one allocated block.
///
/// Dropping a handle without giving it back through [`MemPool::free`] leaks
/// the block; owners are expected to return every handle exactly once.
pub struct BlockId {
    pool: u32,
    index: u32,
}

impl BlockId {
    /// Index of the block inside its pool.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}:{})", self.pool, self.index)
    }
}

// ============================================================================
// Pool
// ============================================================================

struct Block(UnsafeCell<[u8; BLOCK_SIZE]>);

struct Bitmap {
    words: Vec<u32>,
    in_use: usize,
    high_water: usize,
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of blocks.
    pub total: usize,
    /// Blocks currently allocated.
    pub in_use: usize,
    /// Largest `in_use` value observed.
    pub high_water: usize,
    /// Failed allocation attempts.
    pub failures: usize,
}

/// Fixed-size block allocator.
pub struct MemPool {
    id: u32,
    blocks: Box<[Block]>,
    bitmap: Mutex<Bitmap>,
    failures: AtomicU32,
}

// SAFETY: block memory is only reachable through a unique `BlockId`, and the
// bitmap guarantees a block index is handed to at most one `BlockId` at a time.
unsafe impl Sync for MemPool {}
unsafe impl Send for MemPool {}

impl MemPool {
    /// Create a pool of `block_count` blocks.
    pub fn new(block_count: usize) -> Self {
        let blocks: Vec<Block> = (0..block_count)
            .map(|_| Block(UnsafeCell::new([0u8; BLOCK_SIZE])))
            .collect();
        let words = (block_count + WORD_BITS - 1) / WORD_BITS;

        log::debug!("[POOL] {} blocks of {} bytes", block_count, BLOCK_SIZE);

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            blocks: blocks.into_boxed_slice(),
            bitmap: Mutex::new(Bitmap {
                words: alloc::vec![0u32; words],
                in_use: 0,
                high_water: 0,
            }),
            failures: AtomicU32::new(0),
        }
    }

    /// Allocate one block.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc(&self) -> Option<BlockId> {
        let total = self.blocks.len();
        let mut map = self.bitmap.lock();

        for (w, word) in map.words.iter_mut().enumerate() {
            if *word == u32::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = w * WORD_BITS + bit;
            if index >= total {
                break;
            }
            *word |= 1 << bit;
            map.in_use += 1;
            if map.in_use > map.high_water {
                map.high_water = map.in_use;
            }
            return Some(BlockId {
                pool: self.id,
                index: index as u32,
            });
        }

        drop(map);
        self.failures.fetch_add(1, Ordering::Relaxed);
        log::warn!("[POOL] exhausted ({} blocks)", total);
        None
    }

    /// Return a block to the pool.
    ///
    /// # Panics
    /// Panics if the handle belongs to another pool.
    pub fn free(&self, block: BlockId) {
        assert_eq!(block.pool, self.id, "block freed into foreign pool");

        let index = block.index();
        let mut map = self.bitmap.lock();
        let word = &mut map.words[index / WORD_BITS];
        let mask = 1u32 << (index % WORD_BITS);
        debug_assert!(*word & mask != 0, "block {} not allocated", index);
        *word &= !mask;
        map.in_use -= 1;
    }

    /// Read access to an allocated block.
    pub fn block<'p>(&'p self, block: &'p BlockId) -> &'p [u8] {
        assert_eq!(block.pool, self.id, "block read from foreign pool");
        // SAFETY: the handle is unique and shared-borrowed for 'p, so no
        // mutable reference to this block can exist for 'p.
        unsafe { &*self.blocks[block.index()].0.get() }
    }

    /// Write access to an allocated block.
    pub fn block_mut<'p>(&'p self, block: &'p mut BlockId) -> &'p mut [u8] {
        assert_eq!(block.pool, self.id, "block written in foreign pool");
        // SAFETY: the handle is unique and mutably borrowed for 'p.
        unsafe { &mut *self.blocks[block.index()].0.get() }
    }

    /// Total number of blocks.
    pub fn total(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks currently allocated.
    pub fn in_use(&self) -> usize {
        self.bitmap.lock().in_use
    }

    /// Blocks available for allocation.
    pub fn available(&self) -> usize {
        self.total() - self.in_use()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let map = self.bitmap.lock();
        PoolStats {
            total: self.blocks.len(),
            in_use: map.in_use,
            high_water: map.high_water,
            failures: self.failures.load(Ordering::Relaxed) as usize,
        }
    }
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_COUNT)
    }
}

impl fmt::Debug for MemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
