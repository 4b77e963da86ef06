//! Scatter-gather packet buffer.

use core::cmp::min;
use core::fmt;

use embernet_pool::{BlockId, MemPool, BLOCK_SIZE};
use heapless::Vec;

use crate::error::{NetError, Result};
use crate::ipv6::frag::MAX_FRAG_DATAGRAM_SIZE;

/// Maximum number of chunks in one buffer.
///
/// Enough blocks for the largest reassembled datagram, plus room for
/// separately allocated headers.
pub const MAX_CHUNK_COUNT: usize = (MAX_FRAG_DATAGRAM_SIZE + BLOCK_SIZE - 1) / BLOCK_SIZE + 3;

/// Storage behind one chunk.
enum ChunkData<'a> {
    /// Pool block owned by the buffer, released on shrink or drop.
    Owned(BlockId),
    /// Memory owned elsewhere; never released by the buffer.
    Borrowed(&'a [u8]),
}

struct Chunk<'a> {
    data: ChunkData<'a>,
    len: usize,
}

/// Ownership of a chunk, as reported by [`ChunkedBuffer::chunk_kinds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Owned,
    Borrowed,
}

/// Logical byte buffer spread over pool blocks and borrowed slices.
///
/// The logical length is always the sum of the chunk lengths. Dropping the
/// buffer shrinks it to zero, which returns every owned block exactly once.
pub struct ChunkedBuffer<'a> {
    pool: &'a MemPool,
    chunks: Vec<Chunk<'a>, MAX_CHUNK_COUNT>,
}

impl<'a> ChunkedBuffer<'a> {
    /// Empty buffer drawing blocks from `pool`.
    pub fn new(pool: &'a MemPool) -> Self {
        Self {
            pool,
            chunks: Vec::new(),
        }
    }

    /// Allocate a buffer of `len` bytes.
    pub fn alloc(pool: &'a MemPool, len: usize) -> Result<Self> {
        let mut buffer = Self::new(pool);
        buffer.set_length(len)?;
        Ok(buffer)
    }

    /// Pool the owned chunks come from.
    pub fn pool(&self) -> &'a MemPool {
        self.pool
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Ownership of each chunk, in order.
    pub fn chunk_kinds(&self) -> impl Iterator<Item = ChunkKind> + '_ {
        self.chunks.iter().map(|c| match c.data {
            ChunkData::Owned(_) => ChunkKind::Owned,
            ChunkData::Borrowed(_) => ChunkKind::Borrowed,
        })
    }

    /// Resize the buffer.
    ///
    /// Shrinking releases owned chunks past the new end and drops borrowed
    /// ones. Growing first extends an owned last chunk up to its block size,
    /// then appends pool blocks until the length is reached. If growth fails
    /// the buffer is restored to its previous length.
    pub fn set_length(&mut self, len: usize) -> Result<()> {
        let old = self.len();
        match self.resize(len) {
            Ok(()) => Ok(()),
            Err(e) => {
                // shrinking cannot fail
                let _ = self.resize(old);
                Err(e)
            }
        }
    }

    fn resize(&mut self, mut remaining: usize) -> Result<()> {
        let count = self.chunks.len();
        let mut i = 0;

        while i < count && remaining > 0 {
            let chunk = &mut self.chunks[i];
            if remaining <= chunk.len {
                chunk.len = remaining;
            } else if i == count - 1 {
                if let ChunkData::Owned(_) = chunk.data {
                    chunk.len = min(remaining, BLOCK_SIZE);
                }
            }
            remaining -= chunk.len;
            i += 1;
        }

        if remaining == 0 {
            self.release_from(i);
            return Ok(());
        }

        while remaining > 0 {
            if self.chunks.is_full() {
                return Err(NetError::OutOfResources);
            }
            let block = self.pool.alloc().ok_or(NetError::OutOfMemory)?;
            let len = min(remaining, BLOCK_SIZE);
            if let Err(chunk) = self.chunks.push(Chunk {
                data: ChunkData::Owned(block),
                len,
            }) {
                self.release(chunk);
                return Err(NetError::OutOfResources);
            }
            remaining -= len;
        }
        Ok(())
    }

    fn release_from(&mut self, index: usize) {
        while self.chunks.len() > index {
            if let Some(chunk) = self.chunks.pop() {
                self.release(chunk);
            }
        }
    }

    fn release(&self, chunk: Chunk<'a>) {
        if let ChunkData::Owned(block) = chunk.data {
            self.pool.free(block);
        }
    }

    /// Contiguous bytes from `offset` to the end of the chunk holding it.
    ///
    /// `None` if `offset` is at or past the end of the buffer.
    pub fn at(&self, offset: usize) -> Option<&[u8]> {
        let mut skip = offset;
        for chunk in self.chunks.iter() {
            if skip < chunk.len {
                return Some(&chunk_slice(self.pool, chunk)[skip..]);
            }
            skip -= chunk.len;
        }
        None
    }

    /// Mutable variant of [`at`](Self::at); `None` inside borrowed chunks.
    pub fn at_mut(&mut self, offset: usize) -> Option<&mut [u8]> {
        let pool = self.pool;
        let mut skip = offset;
        for chunk in self.chunks.iter_mut() {
            if skip < chunk.len {
                return match &mut chunk.data {
                    ChunkData::Owned(block) => Some(&mut pool.block_mut(block)[skip..chunk.len]),
                    ChunkData::Borrowed(_) => None,
                };
            }
            skip -= chunk.len;
        }
        None
    }

    /// Active bytes of every chunk, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let pool = self.pool;
        self.chunks.iter().map(move |c| chunk_slice(pool, c))
    }

    /// Append a borrowed slice as a new chunk.
    pub fn append(&mut self, data: &'a [u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.chunks
            .push(Chunk {
                data: ChunkData::Borrowed(data),
                len: data.len(),
            })
            .map_err(|_| NetError::OutOfResources)
    }

    /// Append `len` bytes of `src`, starting at `src_offset`, without copying.
    ///
    /// The new chunks alias `src`'s memory, so `src` must outlive `self`.
    /// On failure `self` is left unchanged.
    pub fn concat(&mut self, src: &'a ChunkedBuffer<'_>, src_offset: usize, len: usize) -> Result<()> {
        if src_offset >= src.len() {
            return Err(NetError::InvalidParameter);
        }

        let start = self.chunks.len();
        let mut skip = src_offset;
        let mut remaining = len;

        for chunk in src.chunks.iter() {
            if remaining == 0 {
                break;
            }
            if skip >= chunk.len {
                skip -= chunk.len;
                continue;
            }
            let data = &chunk_slice(src.pool, chunk)[skip..];
            let n = min(data.len(), remaining);
            if self
                .chunks
                .push(Chunk {
                    data: ChunkData::Borrowed(&data[..n]),
                    len: n,
                })
                .is_err()
            {
                break;
            }
            remaining -= n;
            skip = 0;
        }

        if remaining > 0 {
            self.chunks.truncate(start);
            return Err(NetError::Failure);
        }
        Ok(())
    }

    /// Copy `len` bytes from `src` at `src_offset` into `self` at `dest_offset`.
    pub fn copy(
        &mut self,
        dest_offset: usize,
        src: &ChunkedBuffer<'_>,
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        if src_offset.saturating_add(len) > src.len() || dest_offset.saturating_add(len) > self.len() {
            return Err(NetError::InvalidParameter);
        }

        let mut skip = src_offset;
        let mut dest = dest_offset;
        let mut remaining = len;

        for data in src.chunks() {
            if remaining == 0 {
                break;
            }
            if skip >= data.len() {
                skip -= data.len();
                continue;
            }
            let n = min(data.len() - skip, remaining);
            if self.write(dest, &data[skip..skip + n]) != n {
                return Err(NetError::Failure);
            }
            dest += n;
            remaining -= n;
            skip = 0;
        }
        Ok(())
    }

    /// Write `data` at `offset`, returning the number of bytes written.
    ///
    /// The count is short when the buffer ends early or a borrowed chunk is
    /// reached; callers check it.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> usize {
        let pool = self.pool;
        let mut skip = offset;
        let mut done = 0;

        for chunk in self.chunks.iter_mut() {
            if done == data.len() {
                break;
            }
            if skip >= chunk.len {
                skip -= chunk.len;
                continue;
            }
            let dst = match &mut chunk.data {
                ChunkData::Owned(block) => &mut pool.block_mut(block)[skip..chunk.len],
                ChunkData::Borrowed(_) => break,
            };
            let n = min(dst.len(), data.len() - done);
            dst[..n].copy_from_slice(&data[done..done + n]);
            done += n;
            skip = 0;
        }
        done
    }

    /// Read into `out` from `offset`, returning the number of bytes read.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> usize {
        let mut skip = offset;
        let mut done = 0;

        for data in self.chunks() {
            if done == out.len() {
                break;
            }
            if skip >= data.len() {
                skip -= data.len();
                continue;
            }
            let n = min(data.len() - skip, out.len() - done);
            out[done..done + n].copy_from_slice(&data[skip..skip + n]);
            done += n;
            skip = 0;
        }
        done
    }

    /// Read exactly `out.len()` bytes or fail with `InvalidLength`.
    pub fn read_exact(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        if self.read(offset, out) == out.len() {
            Ok(())
        } else {
            Err(NetError::InvalidLength)
        }
    }

    /// Write all of `data` or fail with `InvalidLength`.
    pub fn write_all(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if self.write(offset, data) == data.len() {
            Ok(())
        } else {
            Err(NetError::InvalidLength)
        }
    }
}

/// Active bytes of `chunk`.
fn chunk_slice<'s>(pool: &'s MemPool, chunk: &'s Chunk<'_>) -> &'s [u8] {
    match &chunk.data {
        ChunkData::Owned(block) => &pool.block(block)[..chunk.len],
        ChunkData::Borrowed(data) => &data[..chunk.len],
    }
}

impl Drop for ChunkedBuffer<'_> {
    fn drop(&mut self) {
        self.release_from(0);
    }
}

impl fmt::Debug for ChunkedBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedBuffer")
            .field("len", &self.len())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec as StdVec;

    fn contents(buf: &ChunkedBuffer<'_>) -> StdVec<u8> {
        let mut out = vec![0u8; buf.len()];
        assert_eq!(buf.read(0, &mut out), buf.len());
        out
    }

    // ═══════════════════════════════════════════════════════════════════
    // Length management
    // ═══════════════════════════════════════════════════════════════════

    #[test]
    fn test_set_length_grow_and_shrink() {
        let pool = MemPool::new(8);
        let mut buf = ChunkedBuffer::alloc(&pool, 100).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.chunk_count(), 1);

        // last owned chunk grows in place first
        buf.set_length(1000).unwrap();
        assert_eq!(buf.chunk_count(), 1);

        buf.set_length(4000).unwrap();
        assert_eq!(buf.len(), 4000);
        assert_eq!(buf.chunk_count(), 3);
        assert_eq!(pool.in_use(), 3);

        buf.set_length(BLOCK_SIZE).unwrap();
        assert_eq!(buf.chunk_count(), 1);
        assert_eq!(pool.in_use(), 1);

        buf.set_length(0).unwrap();
        assert_eq!(buf.chunk_count(), 0);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_drop_releases_blocks() {
        let pool = MemPool::new(8);
        {
            let _a = ChunkedBuffer::alloc(&pool, 5000).unwrap();
            let _b = ChunkedBuffer::alloc(&pool, 10).unwrap();
            assert_eq!(pool.in_use(), 5);
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_pool_exhaustion_rolls_back() {
        let pool = MemPool::new(2);
        let mut buf = ChunkedBuffer::alloc(&pool, 10).unwrap();
        assert_eq!(buf.set_length(4 * BLOCK_SIZE), Err(NetError::OutOfMemory));
        assert_eq!(buf.len(), 10);
        assert_eq!(pool.in_use(), 1);
        assert!(ChunkedBuffer::alloc(&pool, 5 * BLOCK_SIZE).is_err());
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_chunk_limit() {
        let pool = MemPool::new(32);
        let too_big = (MAX_CHUNK_COUNT + 1) * BLOCK_SIZE;
        assert_eq!(
            ChunkedBuffer::alloc(&pool, too_big).unwrap_err(),
            NetError::OutOfResources
        );
        assert_eq!(pool.in_use(), 0);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Data access
    // ═══════════════════════════════════════════════════════════════════

    #[test]
    fn test_write_read_across_chunks() {
        let pool = MemPool::new(4);
        let mut buf = ChunkedBuffer::alloc(&pool, 3000).unwrap();
        let data: StdVec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(buf.write(0, &data), 3000);
        assert_eq!(contents(&buf), data);

        let mut part = [0u8; 10];
        assert_eq!(buf.read(BLOCK_SIZE - 5, &mut part), 10);
        assert_eq!(&part[..], &data[BLOCK_SIZE - 5..BLOCK_SIZE + 5]);
    }

    #[test]
    fn test_short_transfers() {
        let pool = MemPool::new(2);
        let mut buf = ChunkedBuffer::alloc(&pool, 8).unwrap();
        assert_eq!(buf.write(6, &[1, 2, 3, 4]), 2);
        let mut out = [0u8; 4];
        assert_eq!(buf.read(6, &mut out), 2);
        assert_eq!(buf.read(8, &mut out), 0);
        assert_eq!(buf.read_exact(6, &mut out), Err(NetError::InvalidLength));
    }

    #[test]
    fn test_at() {
        let pool = MemPool::new(2);
        let tail = [1u8, 2, 3];
        let mut buf = ChunkedBuffer::alloc(&pool, 20).unwrap();
        buf.write(0, &[9u8; 20]);
        buf.append(&tail).unwrap();
        assert_eq!(buf.at(21), Some(&[2u8, 3][..]));
        assert_eq!(buf.at(5).map(|s| s.len()), Some(15));
        assert!(buf.at(23).is_none());
        assert!(buf.at_mut(21).is_none());
        assert!(buf.at_mut(0).is_some());
    }

    // ═══════════════════════════════════════════════════════════════════
    // Borrowed chunks
    // ═══════════════════════════════════════════════════════════════════

    #[test]
    fn test_append_is_never_freed() {
        let pool = MemPool::new(2);
        let payload = [7u8; 64];
        let mut buf = ChunkedBuffer::alloc(&pool, 16).unwrap();
        buf.append(&payload).unwrap();
        assert_eq!(buf.len(), 80);
        assert_eq!(pool.in_use(), 1);

        // shrinking into the borrowed chunk keeps the owned one
        buf.set_length(40).unwrap();
        assert_eq!(buf.chunk_count(), 2);
        buf.set_length(10).unwrap();
        assert_eq!(buf.chunk_count(), 1);
        assert_eq!(pool.in_use(), 1);

        // writes stop at borrowed memory
        let mut buf = ChunkedBuffer::new(&pool);
        buf.append(&payload).unwrap();
        assert_eq!(buf.write(0, &[1, 2]), 0);
    }

    #[test]
    fn test_chunks_yield_active_bytes() {
        let pool = MemPool::new(2);
        let tail = [9u8; 5];
        let mut buf = ChunkedBuffer::alloc(&pool, 3).unwrap();
        buf.write_all(0, &[1, 2, 3]).unwrap();
        buf.append(&tail).unwrap();

        let chunks: StdVec<&[u8]> = buf.chunks().collect();
        assert_eq!(chunks, vec![&[1u8, 2, 3][..], &tail[..]]);
        assert_eq!(contents(&buf), [1, 2, 3, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn test_concat_aliases_source() {
        let pool = MemPool::new(4);
        let mut src = ChunkedBuffer::alloc(&pool, 2000).unwrap();
        let data: StdVec<u8> = (0..2000u32).map(|i| i as u8).collect();
        src.write(0, &data);

        let mut dst = ChunkedBuffer::alloc(&pool, 4).unwrap();
        dst.write(0, &[0xEE; 4]);
        dst.concat(&src, 1500, 100).unwrap();
        assert_eq!(dst.len(), 104);
        assert_eq!(dst.chunk_count(), 3);
        assert_eq!(
            dst.chunk_kinds().collect::<StdVec<_>>(),
            vec![ChunkKind::Owned, ChunkKind::Borrowed, ChunkKind::Borrowed]
        );
        let out = contents(&dst);
        assert_eq!(&out[4..], &data[1500..1600]);
        assert_eq!(pool.in_use(), 3);

        assert_eq!(dst.concat(&src, 2000, 1), Err(NetError::InvalidParameter));
        assert_eq!(dst.concat(&src, 1990, 20), Err(NetError::Failure));
        assert_eq!(dst.len(), 104);
    }

    #[test]
    fn test_copy_between_buffers() {
        let pool = MemPool::new(6);
        let mut src = ChunkedBuffer::alloc(&pool, 3000).unwrap();
        let data: StdVec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
        src.write(0, &data);

        let mut dst = ChunkedBuffer::alloc(&pool, 3000).unwrap();
        dst.copy(10, &src, 1000, 2000).unwrap();
        let out = contents(&dst);
        assert_eq!(&out[10..2010], &data[1000..3000]);

        assert_eq!(dst.copy(1500, &src, 0, 2000), Err(NetError::InvalidParameter));
    }
}
