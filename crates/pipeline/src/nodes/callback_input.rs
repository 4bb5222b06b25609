//! Push-style input fed from a hardware or stack callback.
//!
//! A Bluetooth A2DP sink, a USB audio class endpoint or an S/PDIF receiver
//! hands over PCM from a callback that must never block. Such callbacks
//! write through an [`InputFeeder`] into a [`ByteRing`]; format changes and
//! stream ends are recorded at the ring position where they take effect.
//! The [`CallbackInput`] worker drains the ring into `Data` packets and
//! emits `NewStream` before the first byte of each new format.

use alloc::sync::Arc;
use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::buffer::{BufferPool, DataBuf, HEAP};
use crate::byte_ring::ByteRing;
use crate::error::{RingError, StreamError};
use crate::event_ring::EventRing;
use crate::format::StreamFormat;
use crate::node::{NodeBehavior, NodeContext, Step, Transition};
use crate::outbox::Outbox;
use crate::packet::{NewStream, StreamId, StreamPacket};
use crate::timeout::Timeout;

/// Format changes that may be pending at once.
pub const MAX_PENDING_MARKS: usize = 8;

/// A boundary recorded by the feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Format(StreamFormat),
    End,
}

struct Shared<const N: usize> {
    ring: ByteRing<N>,
    /// `(ring byte position, mark)`, in position order.
    marks: Mutex<CriticalSectionRawMutex, RefCell<heapless::Deque<(u64, Mark), MAX_PENDING_MARKS>>>,
    marked: Signal<CriticalSectionRawMutex, ()>,
}

impl<const N: usize> Shared<N> {
    fn mark(&self, mark: Mark) -> Result<(), RingError> {
        let pos = self.ring.written_total();
        self.marks
            .lock(|m| m.borrow_mut().push_back((pos, mark)))
            .map_err(|_| RingError::Full)?;
        self.marked.signal(());
        Ok(())
    }

    /// Mark due at or before `pos`.
    fn take_due(&self, pos: u64) -> Option<Mark> {
        self.marks.lock(|m| {
            let mut m = m.borrow_mut();
            match m.front() {
                Some(&(at, _)) if at <= pos => m.pop_front().map(|(_, mark)| mark),
                _ => None,
            }
        })
    }

    /// Bytes from `pos` to the next recorded mark.
    fn until_next(&self, pos: u64) -> Option<u64> {
        self.marks
            .lock(|m| m.borrow().front().map(|&(at, _)| at.saturating_sub(pos)))
    }
}

/// Callback-side handle of a [`CallbackInput`]. Cheap to clone.
pub struct InputFeeder<const N: usize> {
    shared: Arc<Shared<N>>,
}

impl<const N: usize> Clone for InputFeeder<N> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<const N: usize> InputFeeder<N> {
    /// Bytes written after this call are laid out as `format`.
    ///
    /// # Errors
    ///
    /// [`RingError::Full`] when too many changes are pending.
    pub fn set_format(&self, format: StreamFormat) -> Result<(), RingError> {
        self.shared.mark(Mark::Format(format))
    }

    /// The current stream ends after the bytes written so far.
    ///
    /// # Errors
    ///
    /// [`RingError::Full`] when too many changes are pending.
    pub fn end_stream(&self) -> Result<(), RingError> {
        self.shared.mark(Mark::End)
    }

    /// Append PCM without blocking.
    ///
    /// # Errors
    ///
    /// [`RingError::Full`] when the ring has too little room; the caller
    /// drops the data. [`RingError::Stopped`] while the input is torn down.
    pub fn try_write(&self, data: &[u8]) -> Result<(), RingError> {
        self.shared.ring.try_write(data)
    }

    /// Bytes buffered and not yet taken by the worker.
    pub fn buffered(&self) -> usize {
        self.shared.ring.data_size()
    }

    /// Room left for callbacks.
    pub fn free_space(&self) -> usize {
        self.shared.ring.free_space()
    }
}

/// Pipeline stage draining an [`InputFeeder`]'s ring into packets.
pub struct CallbackInput<const N: usize> {
    shared: Arc<Shared<N>>,
    output: Arc<EventRing>,
    pool: &'static dyn BufferPool,
    stream: Option<StreamId>,
    outbox: Outbox,
}

impl<const N: usize> CallbackInput<N> {
    /// Node pushing into `output`, with its feeder.
    pub fn new(output: Arc<EventRing>) -> (Self, InputFeeder<N>) {
        Self::with_pool(output, &HEAP)
    }

    /// Like [`new`](Self::new), allocating packets from `pool`.
    pub fn with_pool(output: Arc<EventRing>, pool: &'static dyn BufferPool) -> (Self, InputFeeder<N>) {
        let shared = Arc::new(Shared {
            ring: ByteRing::new(),
            marks: Mutex::new(RefCell::new(heapless::Deque::new())),
            marked: Signal::new(),
        });
        let feeder = InputFeeder {
            shared: Arc::clone(&shared),
        };
        let node = Self {
            shared,
            output,
            pool,
            stream: None,
            outbox: Outbox::new(),
        };
        (node, feeder)
    }

    fn apply(&mut self, mark: Mark, ctx: &NodeContext) {
        if let Some(stream_id) = self.stream.take() {
            self.outbox.push(StreamPacket::StreamEnd { stream_id });
        }
        if let Mark::Format(format) = mark {
            let stream_id = ctx.next_stream_id();
            debug!(
                "input: stream {} at {} Hz / {} bit / {} ch",
                stream_id.get(),
                format.sample_rate,
                format.bits_per_sample,
                format.channels
            );
            self.stream = Some(stream_id);
            self.outbox.push(NewStream::new(stream_id, format).into());
        }
    }
}

impl<const N: usize> NodeBehavior for CallbackInput<N> {
    type Command = core::convert::Infallible;

    async fn step(&mut self, ctx: &NodeContext) -> Result<Step, StreamError> {
        self.outbox.flush(&self.output, Timeout::Forever).await?;
        let ring = &self.shared.ring;
        let pos = ring.read_total();
        if let Some(mark) = self.shared.take_due(pos) {
            self.apply(mark, ctx);
            return Ok(Step::Continue);
        }
        match select(ring.wait_for_data(Timeout::Forever), self.shared.marked.wait()).await {
            Either::First(ready) => ready?,
            // a mark may now be due
            Either::Second(()) => return Ok(Step::Continue),
        }

        let grant = ring.read_contig(ctx.config().out_packet_size, Timeout::NONE).await?;
        // marks recorded while waiting end the chunk early
        let limit = self
            .shared
            .until_next(pos)
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        let n = grant.len().min(limit);
        if n == 0 {
            return Ok(Step::Continue);
        }
        let chunk = DataBuf::from_slice(self.pool, grant.buf().get(..n).unwrap_or_default());
        grant.commit(n);
        if self.stream.is_some() {
            self.outbox.push(chunk.into());
        } else {
            trace!("input: dropping {} bytes before the first format", n);
        }
        Ok(Step::Continue)
    }

    async fn on_command(&mut self, cmd: core::convert::Infallible, _ctx: &NodeContext) -> Transition {
        match cmd {}
    }

    fn on_stop(&mut self, flush: bool, _ctx: &NodeContext) {
        if flush {
            self.outbox.clear();
        }
    }
}
