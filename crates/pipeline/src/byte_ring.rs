//! Const-generic byte ring buffer with blocking and zero-copy access.
//!
//! `ByteRing<N>` stores up to `N` bytes. It is a single-producer /
//! single-consumer structure: one task (or interrupt callback) writes, one
//! task reads. Every blocking call waits on the ring's [`EventSignal`] and
//! re-checks its condition under the lock after each wake, and every wait
//! returns [`RingError::Stopped`] once [`set_stop_signal`] is raised.
//!
//! # Empty vs. full
//!
//! When the read and write indices coincide the ring is either empty or
//! full. The explicit byte count `len` decides which; the indices alone are
//! never trusted for this.
//!
//! # Zero-copy access
//!
//! [`grant_write`] hands out a contiguous writable window; [`WriteGrant::commit`]
//! publishes the bytes actually written and dropping the grant aborts.
//! [`read_contig`] is the mirror image for the reader. While a grant is
//! outstanding [`clear`] waits for it.
//!
//! [`set_stop_signal`]: ByteRing::set_stop_signal
//! [`grant_write`]: ByteRing::grant_write
//! [`read_contig`]: ByteRing::read_contig
//! [`clear`]: ByteRing::clear

use core::cell::{RefCell, UnsafeCell};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::error::RingError;
use crate::event_signal::{Conditions, EventSignal, Trigger};
use crate::timeout::{Deadline, Timeout};

/// Bytes were committed by the writer.
const WRITTEN: Conditions = Conditions::bit(0);
/// Bytes were consumed by the reader.
const CONSUMED: Conditions = Conditions::bit(1);
/// A grant or copy finished.
const OP_DONE: Conditions = Conditions::bit(2);
/// A grant was released; waited on only by `clear`.
const RELEASED: Conditions = Conditions::bit(3);
/// The ring is stopping; sticky.
const STOP: Conditions = Conditions::bit(31);

struct RingState {
    /// Index of the next byte to read.
    read: usize,
    /// Index of the next byte to write.
    write: usize,
    /// Bytes currently stored.
    len: usize,
    /// A write grant or copy-in is in progress.
    writing: bool,
    /// A read grant or copy-out is in progress.
    reading: bool,
    /// Bytes ever committed by the writer.
    written_total: u64,
    /// Bytes ever consumed by the reader.
    read_total: u64,
}

impl RingState {
    const fn new() -> Self {
        Self {
            read: 0,
            write: 0,
            len: 0,
            writing: false,
            reading: false,
            written_total: 0,
            read_total: 0,
        }
    }

    fn free<const N: usize>(&self) -> usize {
        N.saturating_sub(self.len)
    }

    /// Free bytes from `write` up to the physical end or the read index.
    fn contig_free<const N: usize>(&self) -> usize {
        if self.len >= N {
            0
        } else if self.write >= self.read {
            N.saturating_sub(self.write)
        } else {
            self.read.saturating_sub(self.write)
        }
    }

    /// Stored bytes from `read` up to the physical end or the write index.
    fn contig_data<const N: usize>(&self) -> usize {
        if self.len == 0 {
            0
        } else if self.read < self.write {
            self.write.saturating_sub(self.read)
        } else {
            N.saturating_sub(self.read)
        }
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: n <= free space, indices wrap via % N
    fn commit_write<const N: usize>(&mut self, n: usize) {
        self.write = (self.write + n) % N;
        self.len += n;
        self.written_total = self.written_total.wrapping_add(n as u64);
        self.writing = false;
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: n <= len, indices wrap via % N
    fn commit_read<const N: usize>(&mut self, n: usize) {
        self.read = (self.read + n) % N;
        self.len -= n;
        self.read_total = self.read_total.wrapping_add(n as u64);
        self.reading = false;
        if self.len == 0 && !self.writing {
            // rewind so the next grant gets the whole buffer contiguously
            self.read = 0;
            self.write = 0;
        }
    }
}

/// A fixed-capacity byte ring shared between one writer and one reader.
pub struct ByteRing<const N: usize> {
    storage: UnsafeCell<[u8; N]>,
    state: Mutex<CriticalSectionRawMutex, RefCell<RingState>>,
    signal: EventSignal,
}

// SAFETY: `storage` is only accessed through raw pointers to disjoint
// regions. The writer touches the free region starting at `write` and the
// reader the stored region starting at `read`; the `writing` / `reading`
// flags, updated under `state`'s lock, keep at most one task in each region.
unsafe impl<const N: usize> Sync for ByteRing<N> {}

impl<const N: usize> ByteRing<N> {
    const NON_EMPTY: () = assert!(N > 0, "a ByteRing needs at least one byte of storage");

    /// Create a new, empty ring.
    ///
    /// This function is `const` so that rings may be stored in `static`
    /// variables without a runtime initialiser.
    pub const fn new() -> Self {
        let () = Self::NON_EMPTY;
        Self {
            storage: UnsafeCell::new([0u8; N]),
            state: Mutex::new(RefCell::new(RingState::new())),
            signal: EventSignal::new(STOP),
        }
    }

    /// Maximum number of bytes the ring can hold.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently stored.
    pub fn data_size(&self) -> usize {
        self.with_state(|s| s.len)
    }

    /// Bytes that can be written without blocking.
    pub fn free_space(&self) -> usize {
        self.with_state(|s| s.free::<N>())
    }

    /// `true` when no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.data_size() == 0
    }

    /// `true` when the ring is completely full.
    pub fn is_full(&self) -> bool {
        self.data_size() == N
    }

    /// Total bytes committed by the writer since creation or [`clear`](Self::clear).
    pub fn written_total(&self) -> u64 {
        self.with_state(|s| s.written_total)
    }

    /// Total bytes consumed by the reader since creation or [`clear`](Self::clear).
    pub fn read_total(&self) -> u64 {
        self.with_state(|s| s.read_total)
    }

    /// Raise the stop signal: every blocked and future wait returns
    /// [`RingError::Stopped`] until [`clear_stop_signal`](Self::clear_stop_signal).
    pub fn set_stop_signal(&self) {
        self.signal.set(STOP);
    }

    /// Re-arm the ring after [`set_stop_signal`](Self::set_stop_signal).
    pub fn clear_stop_signal(&self) {
        self.signal.clear(STOP);
    }

    /// `true` while the stop signal is raised.
    pub fn is_stopped(&self) -> bool {
        self.signal.get().intersects(STOP)
    }

    /// Write all of `data`, blocking while free space is insufficient.
    ///
    /// # Errors
    ///
    /// [`RingError::TooLarge`] if `data` exceeds the capacity,
    /// [`RingError::Stopped`] or [`RingError::Timeout`] while waiting.
    pub async fn write(&self, data: &[u8], timeout: Timeout) -> Result<(), RingError> {
        if data.len() > N {
            return Err(RingError::TooLarge);
        }
        let deadline = timeout.deadline();
        loop {
            if let Some(at) = self.reserve_write(data.len())? {
                self.copy_in(at, data);
                self.finish_write(data.len());
                return Ok(());
            }
            self.wait(CONSUMED | OP_DONE, deadline).await?;
        }
    }

    /// Write all of `data` if it fits right now.
    ///
    /// Intended for hardware callbacks that must never block.
    ///
    /// # Errors
    ///
    /// [`RingError::Full`] if there is not enough free space,
    /// [`RingError::TooLarge`] or [`RingError::Stopped`] as for [`write`](Self::write).
    pub fn try_write(&self, data: &[u8]) -> Result<(), RingError> {
        if data.len() > N {
            return Err(RingError::TooLarge);
        }
        let at = self.reserve_write(data.len())?.ok_or(RingError::Full)?;
        self.copy_in(at, data);
        self.finish_write(data.len());
        Ok(())
    }

    /// Fill `out` completely, blocking until that many bytes are stored.
    ///
    /// # Errors
    ///
    /// [`RingError::TooLarge`] if `out` exceeds the capacity,
    /// [`RingError::Stopped`] or [`RingError::Timeout`] while waiting.
    pub async fn read(&self, out: &mut [u8], timeout: Timeout) -> Result<(), RingError> {
        if out.len() > N {
            return Err(RingError::TooLarge);
        }
        let deadline = timeout.deadline();
        loop {
            if let Some(at) = self.reserve_read(out.len())? {
                self.copy_out(at, out);
                self.finish_read(out.len());
                return Ok(());
            }
            self.wait(WRITTEN | OP_DONE, deadline).await?;
        }
    }

    /// Borrow up to `max` contiguous stored bytes without copying.
    ///
    /// Blocks until at least one byte is stored. The window ends at the
    /// write index or the physical end of the buffer, whichever is first.
    ///
    /// # Errors
    ///
    /// [`RingError::Stopped`] or [`RingError::Timeout`] while waiting.
    pub async fn read_contig(&self, max: usize, timeout: Timeout) -> Result<ReadGrant<'_, N>, RingError> {
        let deadline = timeout.deadline();
        loop {
            let grant = self.try_state(|s| {
                let avail = s.contig_data::<N>().min(max);
                if avail == 0 || s.reading {
                    return None;
                }
                s.reading = true;
                Some((s.read, avail))
            })?;
            if let Some((start, len)) = grant {
                return Ok(ReadGrant {
                    ring: self,
                    start,
                    len,
                    consumed: 0,
                });
            }
            self.wait(WRITTEN | OP_DONE, deadline).await?;
        }
    }

    /// Borrow a contiguous writable window of up to `len` bytes.
    ///
    /// The request is capped at the distance from the write index to the
    /// physical end of the buffer; the call blocks until that much
    /// contiguous space is free. [`WriteGrant::len`] reports the size
    /// actually granted.
    ///
    /// # Errors
    ///
    /// [`RingError::Stopped`] or [`RingError::Timeout`] while waiting.
    pub async fn grant_write(&self, len: usize, timeout: Timeout) -> Result<WriteGrant<'_, N>, RingError> {
        let deadline = timeout.deadline();
        loop {
            let grant = self.try_state(|s| {
                if s.writing {
                    return None;
                }
                let need = len.min(N.saturating_sub(s.write)).max(1);
                let contig = s.contig_free::<N>();
                if contig < need {
                    return None;
                }
                s.writing = true;
                Some((s.write, contig.min(len)))
            })?;
            if let Some((start, len)) = grant {
                return Ok(WriteGrant {
                    ring: self,
                    start,
                    len,
                    committed: 0,
                });
            }
            self.wait(CONSUMED | OP_DONE, deadline).await?;
        }
    }

    /// Block until at least one byte is stored.
    ///
    /// # Errors
    ///
    /// [`RingError::Stopped`] or [`RingError::Timeout`].
    pub async fn wait_for_data(&self, timeout: Timeout) -> Result<(), RingError> {
        let deadline = timeout.deadline();
        while self.try_state(|s| s.len == 0)? {
            self.wait(WRITTEN, deadline).await?;
        }
        Ok(())
    }

    /// Block until the reader has drained the ring.
    ///
    /// # Errors
    ///
    /// [`RingError::Stopped`] or [`RingError::Timeout`].
    pub async fn wait_for_empty(&self, timeout: Timeout) -> Result<(), RingError> {
        let deadline = timeout.deadline();
        while self.try_state(|s| s.len > 0)? {
            self.wait(CONSUMED, deadline).await?;
        }
        Ok(())
    }

    /// Discard all stored bytes and reset the counters.
    ///
    /// Waits for outstanding grants first, so it must not be called by a task
    /// that holds one. Works while the stop signal is raised.
    pub async fn clear(&self) {
        loop {
            let done = self.with_state(|s| {
                if s.reading || s.writing {
                    return false;
                }
                *s = RingState::new();
                true
            });
            if done {
                self.signal.set(CONSUMED);
                return;
            }
            self.signal.wait(RELEASED, Trigger::Edge).await;
        }
    }

    // ─── Implementation ──────────────────────────────────────────────────────

    fn with_state<R>(&self, f: impl FnOnce(&mut RingState) -> R) -> R {
        self.state.lock(|c| f(&mut c.borrow_mut()))
    }

    /// Run `f` under the lock unless the ring is stopped.
    fn try_state<R>(&self, f: impl FnOnce(&mut RingState) -> R) -> Result<R, RingError> {
        if self.is_stopped() {
            return Err(RingError::Stopped);
        }
        Ok(self.with_state(f))
    }

    fn reserve_write(&self, len: usize) -> Result<Option<usize>, RingError> {
        self.try_state(|s| {
            if s.writing || s.free::<N>() < len {
                return None;
            }
            s.writing = true;
            Some(s.write)
        })
    }

    fn reserve_read(&self, len: usize) -> Result<Option<usize>, RingError> {
        self.try_state(|s| {
            if s.reading || s.len < len {
                return None;
            }
            s.reading = true;
            Some(s.read)
        })
    }

    fn finish_write(&self, n: usize) {
        self.with_state(|s| s.commit_write::<N>(n));
        self.signal.set(WRITTEN | OP_DONE | RELEASED);
    }

    fn finish_read(&self, n: usize) {
        self.with_state(|s| s.commit_read::<N>(n));
        self.signal.set(CONSUMED | OP_DONE | RELEASED);
    }

    async fn wait(&self, mask: Conditions, deadline: Deadline) -> Result<(), RingError> {
        let hit = self
            .signal
            .wait_until(mask | STOP, Trigger::Edge, deadline)
            .await
            .map_err(|_| RingError::Timeout)?;
        if hit.intersects(STOP) {
            return Err(RingError::Stopped);
        }
        Ok(())
    }

    fn base(&self) -> *mut u8 {
        self.storage.get().cast::<u8>()
    }

    /// Copy `data` into the reserved free region starting at `at`, wrapping.
    #[allow(clippy::arithmetic_side_effects)] // Safety: at < N, data.len() <= free <= N
    fn copy_in(&self, at: usize, data: &[u8]) {
        let first = data.len().min(N - at);
        let (head, tail) = data.split_at(first);
        // SAFETY: the caller reserved `data.len()` free bytes starting at
        // `at` (writing flag set); `head` ends at or before N and `tail`
        // starts at 0 and ends before the read index. No reader touches the
        // free region.
        unsafe {
            core::ptr::copy_nonoverlapping(head.as_ptr(), self.base().add(at), head.len());
            core::ptr::copy_nonoverlapping(tail.as_ptr(), self.base(), tail.len());
        }
    }

    /// Copy the reserved stored region starting at `at` into `out`, wrapping.
    #[allow(clippy::arithmetic_side_effects)] // Safety: at < N, out.len() <= len <= N
    fn copy_out(&self, at: usize, out: &mut [u8]) {
        let first = out.len().min(N - at);
        let (head, tail) = out.split_at_mut(first);
        // SAFETY: the caller reserved `out.len()` stored bytes starting at
        // `at` (reading flag set); the writer never touches stored bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(self.base().add(at), head.as_mut_ptr(), head.len());
            core::ptr::copy_nonoverlapping(self.base(), tail.as_mut_ptr(), tail.len());
        }
    }
}

impl<const N: usize> Default for ByteRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-copy view of stored bytes; see [`ByteRing::read_contig`].
pub struct ReadGrant<'a, const N: usize> {
    ring: &'a ByteRing<N>,
    start: usize,
    len: usize,
    consumed: usize,
}

impl<const N: usize> ReadGrant<'_, N> {
    /// The readable bytes.
    pub fn buf(&self) -> &[u8] {
        // SAFETY: [start, start + len) lies inside the storage and holds
        // stored bytes; the reading flag keeps the writer and other readers
        // out until this grant is dropped.
        unsafe { core::slice::from_raw_parts(self.ring.base().add(self.start), self.len) }
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when the grant is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume the first `n` bytes (clamped to the grant) and release.
    pub fn commit(mut self, n: usize) {
        self.consumed = n.min(self.len);
    }
}

impl<const N: usize> Drop for ReadGrant<'_, N> {
    fn drop(&mut self) {
        self.ring.finish_read(self.consumed);
    }
}

/// Zero-copy writable window; see [`ByteRing::grant_write`].
pub struct WriteGrant<'a, const N: usize> {
    ring: &'a ByteRing<N>,
    start: usize,
    len: usize,
    committed: usize,
}

impl<const N: usize> WriteGrant<'_, N> {
    /// The writable bytes.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        // SAFETY: [start, start + len) lies inside the storage and is free
        // space; the writing flag keeps the reader and other writers out
        // until this grant is dropped, and `&mut self` prevents aliasing.
        unsafe { core::slice::from_raw_parts_mut(self.ring.base().add(self.start), self.len) }
    }

    /// Number of writable bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when the grant is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publish the first `n` bytes (clamped to the grant) and release.
    pub fn commit(mut self, n: usize) {
        self.committed = n.min(self.len);
    }
}

impl<const N: usize> Drop for WriteGrant<'_, N> {
    fn drop(&mut self) {
        self.ring.finish_write(self.committed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let ring = ByteRing::<16>::new();
        ring.write(b"hello", Timeout::NONE).await.unwrap();
        assert_eq!(ring.data_size(), 5);
        let mut out = [0u8; 5];
        ring.read(&mut out, Timeout::NONE).await.unwrap();
        assert_eq!(&out, b"hello");
        assert!(ring.is_empty());
    }

    #[tokio::test]
    async fn test_full_and_empty_distinguishable_at_same_index() {
        let ring = ByteRing::<8>::new();
        ring.write(&[1; 8], Timeout::NONE).await.unwrap();
        assert!(ring.is_full());
        assert!(!ring.is_empty());
        let mut out = [0u8; 8];
        ring.read(&mut out, Timeout::NONE).await.unwrap();
        assert!(ring.is_empty());
        assert!(!ring.is_full());
    }

    #[tokio::test]
    async fn test_free_space_tracks_writes_and_reads() {
        let ring = ByteRing::<8>::new();
        assert_eq!(ring.free_space(), 8);
        ring.write(&[1; 5], Timeout::NONE).await.unwrap();
        assert_eq!(ring.free_space(), 3);
        let mut out = [0u8; 2];
        ring.read(&mut out, Timeout::NONE).await.unwrap();
        assert_eq!(ring.free_space(), 5);
    }

    #[tokio::test]
    async fn test_too_large_and_try_write_full() {
        let ring = ByteRing::<4>::new();
        assert_eq!(ring.write(&[0; 5], Timeout::NONE).await, Err(RingError::TooLarge));
        ring.try_write(&[1, 2, 3]).unwrap();
        assert_eq!(ring.try_write(&[4, 5]), Err(RingError::Full));
        ring.try_write(&[4]).unwrap();
        assert!(ring.is_full());
    }

    #[tokio::test]
    async fn test_read_contig_stops_at_physical_end() {
        let ring = ByteRing::<8>::new();
        ring.write(&[0; 6], Timeout::NONE).await.unwrap();
        let mut skip = [0u8; 6];
        // leave one byte so the indices are not rewound
        ring.write(&[9], Timeout::NONE).await.unwrap();
        ring.read(&mut skip, Timeout::NONE).await.unwrap();
        ring.write(&[1, 2, 3], Timeout::NONE).await.unwrap();
        // stored: [9] at index 6, then 1 at 7, then 2,3 wrapped to 0..2
        let grant = ring.read_contig(16, Timeout::NONE).await.unwrap();
        assert_eq!(grant.buf(), &[9, 1]);
        grant.commit(2);
        let grant = ring.read_contig(16, Timeout::NONE).await.unwrap();
        assert_eq!(grant.buf(), &[2, 3]);
    }

    #[tokio::test]
    async fn test_dropped_read_grant_consumes_nothing() {
        let ring = ByteRing::<8>::new();
        ring.write(&[7, 8], Timeout::NONE).await.unwrap();
        {
            let grant = ring.read_contig(8, Timeout::NONE).await.unwrap();
            assert_eq!(grant.len(), 2);
        }
        assert_eq!(ring.data_size(), 2);
    }

    #[tokio::test]
    async fn test_write_grant_commit_and_abort() {
        let ring = ByteRing::<8>::new();
        let mut grant = ring.grant_write(4, Timeout::NONE).await.unwrap();
        grant.buf_mut().copy_from_slice(&[1, 2, 3, 4]);
        grant.commit(3);
        assert_eq!(ring.data_size(), 3);

        let grant = ring.grant_write(2, Timeout::NONE).await.unwrap();
        drop(grant);
        assert_eq!(ring.data_size(), 3);

        let mut out = [0u8; 3];
        ring.read(&mut out, Timeout::NONE).await.unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stop_signal_unblocks_reader() {
        let ring = Arc::new(ByteRing::<8>::new());
        let reader = {
            let ring = ring.clone();
            tokio::spawn(async move {
                let mut out = [0u8; 4];
                ring.read(&mut out, Timeout::Forever).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ring.set_stop_signal();
        assert_eq!(reader.await.unwrap(), Err(RingError::Stopped));

        ring.clear_stop_signal();
        ring.write(&[1], Timeout::NONE).await.unwrap();
        assert_eq!(ring.data_size(), 1);
    }

    #[tokio::test]
    async fn test_clear_resets_counters() {
        let ring = ByteRing::<8>::new();
        ring.write(&[1, 2, 3], Timeout::NONE).await.unwrap();
        ring.clear().await;
        assert!(ring.is_empty());
        assert_eq!(ring.written_total(), 0);
    }

    #[tokio::test]
    async fn test_clear_waits_out_a_grant_beside_a_blocked_writer() {
        let ring = Arc::new(ByteRing::<4>::new());
        ring.write(&[1, 2, 3, 4], Timeout::NONE).await.unwrap();
        let writer = {
            let ring = ring.clone();
            tokio::spawn(async move { ring.write(&[9], Timeout::Forever).await })
        };
        let grant = ring.read_contig(4, Timeout::NONE).await.unwrap();
        let clearer = {
            let ring = ring.clone();
            tokio::spawn(async move { ring.clear().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!clearer.is_finished());

        // the writer and the clear both wake on this release
        drop(grant);
        tokio::time::timeout(std::time::Duration::from_millis(500), clearer)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(500), writer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(ring.data_size(), 1);
    }
}
