//! Packet buffer storage.
//!
//! Every `Data` packet owns a [`DataBuf`]. Where its bytes come from is a
//! host decision: a [`BufferPool`] is chosen when a node is constructed
//! (plain heap, a recycling pool in fast internal RAM, an external-RAM
//! arena) and each buffer remembers its pool, returning its storage there
//! when dropped. Whoever drops the packet, final consumer or queue teardown,
//! releases the memory exactly once.

use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Source of packet buffer storage.
pub trait BufferPool: Send + Sync {
    /// An empty vector with at least `capacity` bytes of capacity.
    fn acquire(&self, capacity: usize) -> Vec<u8>;

    /// Take back storage of a dropped buffer.
    fn recycle(&self, buf: Vec<u8>);
}

/// Allocate from the global heap and free on drop.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferPool for HeapAllocator {
    fn acquire(&self, capacity: usize) -> Vec<u8> {
        Vec::with_capacity(capacity)
    }

    fn recycle(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

/// The default pool.
pub static HEAP: HeapAllocator = HeapAllocator;

/// Counters kept by a [`RecyclingPool`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Requests served from a recycled buffer
    pub hits: u32,
    /// Requests that had to allocate
    pub misses: u32,
    /// Buffers currently parked in the pool
    pub parked: usize,
}

struct Slots<const SLOTS: usize> {
    free: heapless::Vec<Vec<u8>, SLOTS>,
    stats: PoolStats,
}

/// Keeps up to `SLOTS` freed buffers for reuse.
///
/// Buffers larger than `max_keep` bytes of capacity are shrunk before being
/// parked so one oversized packet cannot pin memory forever. `const fn new`
/// lets the pool live in a `static`.
pub struct RecyclingPool<const SLOTS: usize> {
    slots: Mutex<CriticalSectionRawMutex, RefCell<Slots<SLOTS>>>,
    max_keep: usize,
}

impl<const SLOTS: usize> RecyclingPool<SLOTS> {
    /// Empty pool parking buffers of at most `max_keep` bytes capacity.
    pub const fn new(max_keep: usize) -> Self {
        Self {
            slots: Mutex::new(RefCell::new(Slots {
                free: heapless::Vec::new(),
                stats: PoolStats {
                    hits: 0,
                    misses: 0,
                    parked: 0,
                },
            })),
            max_keep,
        }
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.slots.lock(|s| {
            let s = s.borrow();
            PoolStats {
                parked: s.free.len(),
                ..s.stats
            }
        })
    }
}

impl<const SLOTS: usize> BufferPool for RecyclingPool<SLOTS> {
    fn acquire(&self, capacity: usize) -> Vec<u8> {
        let reused = self.slots.lock(|s| {
            let mut s = s.borrow_mut();
            let found = s.free.iter().position(|b| b.capacity() >= capacity);
            let buf = found.map(|i| s.free.swap_remove(i));
            if buf.is_some() {
                s.stats.hits = s.stats.hits.wrapping_add(1);
            } else {
                s.stats.misses = s.stats.misses.wrapping_add(1);
            }
            buf
        });
        reused.unwrap_or_else(|| Vec::with_capacity(capacity))
    }

    fn recycle(&self, mut buf: Vec<u8>) {
        buf.clear();
        buf.shrink_to(self.max_keep);
        if buf.capacity() == 0 {
            return;
        }
        // a full pool drops the buffer
        let _ = self.slots.lock(|s| s.borrow_mut().free.push(buf));
    }
}

/// Owned packet bytes with O(1) consumption from the front.
pub struct DataBuf {
    bytes: Vec<u8>,
    start: usize,
    pool: &'static dyn BufferPool,
}

impl DataBuf {
    /// Empty buffer from `pool` with room for `capacity` bytes.
    pub fn with_capacity(pool: &'static dyn BufferPool, capacity: usize) -> Self {
        Self {
            bytes: pool.acquire(capacity),
            start: 0,
            pool,
        }
    }

    /// Copy of `data` in storage from `pool`.
    pub fn from_slice(pool: &'static dyn BufferPool, data: &[u8]) -> Self {
        let mut buf = Self::with_capacity(pool, data.len());
        buf.bytes.extend_from_slice(data);
        buf
    }

    /// `len` zero bytes from `pool`, ready to be filled through `DerefMut`.
    pub fn zeroed(pool: &'static dyn BufferPool, len: usize) -> Self {
        let mut buf = Self::with_capacity(pool, len);
        buf.bytes.resize(len, 0);
        buf
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.bytes.len().saturating_sub(self.start)
    }

    /// `true` when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `data`.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Keep only the first `len` unconsumed bytes.
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(self.start.saturating_add(len));
    }

    /// Drop the first `n` bytes (clamped to the length).
    pub fn advance(&mut self, n: usize) {
        self.start = self.start.saturating_add(n.min(self.len()));
    }

    /// Split off the first `n` bytes (clamped) into a new buffer from the
    /// same pool; `self` keeps the rest.
    pub fn split_to(&mut self, n: usize) -> Self {
        let n = n.min(self.len());
        let head = Self::from_slice(self.pool, self.get(..n).unwrap_or(&[]));
        self.advance(n);
        head
    }

    /// The pool this buffer returns to.
    pub fn pool(&self) -> &'static dyn BufferPool {
        self.pool
    }
}

impl Deref for DataBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes.get(self.start..).unwrap_or(&[])
    }
}

impl DerefMut for DataBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes.get_mut(self.start..).unwrap_or(&mut [])
    }
}

impl From<&[u8]> for DataBuf {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(&HEAP, data)
    }
}

impl Drop for DataBuf {
    fn drop(&mut self) {
        self.pool.recycle(core::mem::take(&mut self.bytes));
    }
}

impl fmt::Debug for DataBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuf").field("len", &self.len()).finish()
    }
}

impl PartialEq for DataBuf {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl Eq for DataBuf {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    static POOL: RecyclingPool<4> = RecyclingPool::new(1024);

    #[test]
    fn test_split_to_keeps_remainder() {
        let mut buf = DataBuf::from(&[1u8, 2, 3, 4, 5][..]);
        let head = buf.split_to(2);
        assert_eq!(&*head, &[1, 2]);
        assert_eq!(&*buf, &[3, 4, 5]);
        let all = buf.split_to(10);
        assert_eq!(all.len(), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncate_after_advance_is_relative() {
        let mut buf = DataBuf::from(&[1u8, 2, 3, 4, 5][..]);
        buf.advance(1);
        buf.truncate(2);
        assert_eq!(&*buf, &[2, 3]);
    }

    #[test]
    fn test_recycling_pool_reuses_dropped_storage() {
        let first = DataBuf::zeroed(&POOL, 256);
        assert_eq!(first.len(), 256);
        drop(first);
        assert_eq!(POOL.stats().parked, 1);

        let second = DataBuf::with_capacity(&POOL, 128);
        assert!(second.is_empty());
        assert!(POOL.stats().hits >= 1);
    }

    #[test]
    fn test_oversized_buffers_are_shrunk_before_parking() {
        static SMALL: RecyclingPool<2> = RecyclingPool::new(64);
        drop(DataBuf::zeroed(&SMALL, 4096));
        let buf = SMALL.acquire(32);
        assert!(buf.capacity() <= 4096);
        assert_eq!(SMALL.stats().hits, 1);
    }
}
