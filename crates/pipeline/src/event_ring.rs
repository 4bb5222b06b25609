//! Bounded queue of stream packets with byte-accurate event positions.
//!
//! An [`EventRing`] is the only link between two nodes. It carries raw bytes
//! (`Data`) and control packets in one FIFO, bounded both by packet count
//! and by queued data bytes, and it owns the bookkeeping that ties an event
//! to the byte position it applies to:
//!
//! * `write_pos` counts every data byte ever pushed, `read_pos` every byte
//!   ever pulled. Both advance only for `Data`.
//! * [`pull`](EventRing::pull) never returns a data chunk that crosses a
//!   control packet; a chunk is shortened to end exactly at the event, and
//!   the event is returned by the next pull.
//! * [`push_event_at`](EventRing::push_event_at) places an event at an
//!   absolute byte position. Queued data is split at that position; a
//!   position the writer has not reached yet is held back and released when
//!   a later write crosses it.
//!
//! A consumer that pulls a [`StreamPacket::Prefill`] gate stops receiving
//! data until the producer calls [`complete_prefill`](EventRing::complete_prefill)
//! with that id or a later one.

use alloc::collections::VecDeque;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::error::StreamError;
use crate::event_signal::{Conditions, EventSignal, Trigger};
use crate::packet::{PacketInfo, PacketKind, PacketKinds, StreamPacket};
use crate::timeout::{Deadline, Timeout};

/// Something was queued.
const PUSHED: Conditions = Conditions::bit(0);
/// Something was dequeued or discarded.
const POPPED: Conditions = Conditions::bit(1);
/// A prefill gate may have opened.
const PREFILL: Conditions = Conditions::bit(2);
/// Stop signal; sticky.
const STOP: Conditions = Conditions::bit(31);

enum Take {
    Packet(StreamPacket),
    Empty,
    Gated,
}

struct QueueState {
    packets: VecDeque<StreamPacket>,
    /// Events positioned beyond `write_pos`, sorted by position.
    deferred: VecDeque<(u64, StreamPacket)>,
    data_size: usize,
    write_pos: u64,
    read_pos: u64,
    /// Prefill id the consumer is currently held at.
    gate: Option<u32>,
    /// Highest prefill id completed so far.
    prefill_done: Option<u32>,
    /// Bumped by `clear`; waits begun under an older generation end as stopped.
    generation: u32,
}

impl QueueState {
    const fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            deferred: VecDeque::new(),
            data_size: 0,
            write_pos: 0,
            read_pos: 0,
            gate: None,
            prefill_done: None,
            generation: 0,
        }
    }

    fn is_full_for(&self, pkt: &StreamPacket, packet_capacity: usize, byte_capacity: usize) -> bool {
        if self.packets.len() >= packet_capacity {
            return true;
        }
        // a single oversized chunk is admitted into an empty queue
        let len = pkt.data_len();
        len > 0 && self.data_size > 0 && self.data_size.saturating_add(len) > byte_capacity
    }

    fn push_data_raw(&mut self, buf: crate::buffer::DataBuf) {
        let len = buf.len();
        self.data_size = self.data_size.saturating_add(len);
        self.write_pos = self.write_pos.wrapping_add(len as u64);
        self.packets.push_back(StreamPacket::Data(buf));
    }

    /// Queue `pkt`, releasing held-back events its bytes cross.
    fn enqueue(&mut self, pkt: StreamPacket) {
        match pkt {
            StreamPacket::Data(mut buf) => {
                while let Some(&(pos, _)) = self.deferred.front() {
                    let until = pos.saturating_sub(self.write_pos);
                    if until == 0 {
                        if let Some((_, event)) = self.deferred.pop_front() {
                            self.packets.push_back(event);
                        }
                    } else if until < buf.len() as u64 {
                        #[allow(clippy::cast_possible_truncation)] // Safety: until < buf.len()
                        let head = buf.split_to(until as usize);
                        self.push_data_raw(head);
                    } else {
                        break;
                    }
                }
                if !buf.is_empty() {
                    self.push_data_raw(buf);
                }
            }
            control => {
                // events past the write position stay held for later data
                while self.deferred.front().is_some_and(|(pos, _)| *pos <= self.write_pos) {
                    if let Some((_, event)) = self.deferred.pop_front() {
                        self.packets.push_back(event);
                    }
                }
                self.packets.push_back(control);
            }
        }
    }

    fn take(&mut self, budget: Option<usize>) -> Take {
        let Some(front) = self.packets.front_mut() else {
            return Take::Empty;
        };
        let pkt = match front {
            StreamPacket::Data(buf) => {
                if self.gate.is_some() {
                    return Take::Gated;
                }
                let len = buf.len();
                match budget {
                    Some(b) if b < len => StreamPacket::Data(buf.split_to(b)),
                    _ => match self.packets.pop_front() {
                        Some(p) => p,
                        None => return Take::Empty,
                    },
                }
            }
            _ => match self.packets.pop_front() {
                Some(p) => p,
                None => return Take::Empty,
            },
        };
        match &pkt {
            StreamPacket::Data(buf) => {
                let n = buf.len();
                self.data_size = self.data_size.saturating_sub(n);
                self.read_pos = self.read_pos.wrapping_add(n as u64);
            }
            StreamPacket::Prefill { id } => {
                if self.prefill_done.map_or(true, |done| *id > done) {
                    self.gate = Some(*id);
                }
            }
            _ => {}
        }
        Take::Packet(pkt)
    }

    /// Insert `event` before the byte at `pos` within the queued data.
    fn insert_at(&mut self, event: StreamPacket, pos: u64) {
        let mut cursor = self.read_pos;
        let mut index = 0;
        while let Some(pkt) = self.packets.get_mut(index) {
            if let StreamPacket::Data(buf) = pkt {
                if pos == cursor {
                    break;
                }
                let len = buf.len() as u64;
                if pos < cursor.saturating_add(len) {
                    #[allow(clippy::cast_possible_truncation)] // Safety: pos - cursor < buf.len()
                    let head = buf.split_to(pos.saturating_sub(cursor) as usize);
                    self.packets.insert(index, StreamPacket::Data(head));
                    index = index.saturating_add(1);
                    break;
                }
                cursor = cursor.saturating_add(len);
            }
            index = index.saturating_add(1);
        }
        self.packets.insert(index, event);
    }
}

/// Bounded packet queue between two nodes.
pub struct EventRing {
    state: Mutex<CriticalSectionRawMutex, RefCell<QueueState>>,
    signal: EventSignal,
    packet_capacity: usize,
    byte_capacity: usize,
}

impl EventRing {
    /// Queue holding at most `packet_capacity` packets and about
    /// `byte_capacity` data bytes.
    pub const fn new(packet_capacity: usize, byte_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RefCell::new(QueueState::new())),
            signal: EventSignal::new(STOP),
            packet_capacity,
            byte_capacity,
        }
    }

    /// Maximum number of queued packets.
    pub fn packet_capacity(&self) -> usize {
        self.packet_capacity
    }

    /// Data byte budget.
    pub fn byte_capacity(&self) -> usize {
        self.byte_capacity
    }

    /// Queued data bytes; control packets never count.
    pub fn data_size(&self) -> usize {
        self.with_state(|s| s.data_size)
    }

    /// Queued packets of any kind.
    pub fn len(&self) -> usize {
        self.with_state(|s| s.packets.len())
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data bytes pushed since creation or [`clear`](Self::clear).
    pub fn write_pos(&self) -> u64 {
        self.with_state(|s| s.write_pos)
    }

    /// Data bytes pulled since creation or [`clear`](Self::clear).
    pub fn read_pos(&self) -> u64 {
        self.with_state(|s| s.read_pos)
    }

    /// Raise the stop signal; all waits return [`StreamError::Stopped`].
    pub fn set_stop_signal(&self) {
        self.signal.set(STOP);
    }

    /// Re-arm after [`set_stop_signal`](Self::set_stop_signal).
    pub fn clear_stop_signal(&self) {
        self.signal.clear(STOP);
    }

    /// `true` while the stop signal is raised.
    pub fn is_stopped(&self) -> bool {
        self.signal.get().intersects(STOP)
    }

    /// Queue `pkt`, blocking while the queue is full.
    ///
    /// On error the packet is dropped, releasing its buffer.
    ///
    /// # Errors
    ///
    /// [`StreamError::Stopped`] or [`StreamError::Timeout`].
    pub async fn push_back(&self, pkt: StreamPacket, timeout: Timeout) -> Result<(), StreamError> {
        let deadline = timeout.deadline();
        let generation = self.generation();
        let mut pkt = pkt;
        loop {
            self.check(generation)?;
            match self.try_push_back(pkt) {
                Ok(()) => return Ok(()),
                Err(back) => pkt = back,
            }
            self.wait(POPPED, deadline).await?;
        }
    }

    /// Queue the packet held in `slot`, blocking while the queue is full.
    ///
    /// The packet stays in `slot` until it is queued, so dropping the
    /// returned future (a cancelled node step) loses nothing. An empty slot
    /// succeeds at once.
    ///
    /// # Errors
    ///
    /// [`StreamError::Stopped`] or [`StreamError::Timeout`]; the packet is
    /// left in `slot`.
    pub async fn push_from(&self, slot: &mut Option<StreamPacket>, timeout: Timeout) -> Result<(), StreamError> {
        let deadline = timeout.deadline();
        let generation = self.generation();
        loop {
            self.check(generation)?;
            let Some(pkt) = slot.take() else {
                return Ok(());
            };
            match self.try_push_back(pkt) {
                Ok(()) => return Ok(()),
                Err(back) => *slot = Some(back),
            }
            self.wait(POPPED, deadline).await?;
        }
    }

    /// `true` if `pkt` could be queued right now.
    pub fn has_room_for(&self, pkt: &StreamPacket) -> bool {
        let (packets, bytes) = (self.packet_capacity, self.byte_capacity);
        self.with_state(|s| !s.is_full_for(pkt, packets, bytes))
    }

    /// Queue `pkt` if there is room right now, otherwise hand it back.
    pub fn try_push_back(&self, pkt: StreamPacket) -> Result<(), StreamPacket> {
        if self.is_stopped() {
            return Err(pkt);
        }
        let (packets, bytes) = (self.packet_capacity, self.byte_capacity);
        self.with_state(|s| {
            if s.is_full_for(&pkt, packets, bytes) {
                return Err(pkt);
            }
            s.enqueue(pkt);
            Ok(())
        })?;
        self.signal.set(PUSHED);
        Ok(())
    }

    /// Place `event` immediately before the data byte at absolute position
    /// `pos` of the write stream.
    ///
    /// Bypasses the capacity limits: the bytes around the event are already
    /// accounted for. A position already consumed is delivered next.
    pub fn push_event_at(&self, event: StreamPacket, pos: u64) {
        self.with_state(|s| {
            if pos < s.read_pos {
                s.packets.push_front(event);
            } else if pos < s.write_pos {
                s.insert_at(event, pos);
            } else if pos == s.write_pos && s.deferred.is_empty() {
                s.packets.push_back(event);
            } else {
                let at = s
                    .deferred
                    .iter()
                    .position(|(p, _)| *p > pos)
                    .unwrap_or(s.deferred.len());
                s.deferred.insert(at, (pos, event));
            }
        });
        self.signal.set(PUSHED);
    }

    /// Dequeue a whole packet, blocking while empty or gated.
    ///
    /// # Errors
    ///
    /// [`StreamError::Stopped`] or [`StreamError::Timeout`].
    pub async fn pop_front(&self, timeout: Timeout) -> Result<StreamPacket, StreamError> {
        self.take(None, timeout).await
    }

    /// Dequeue at most `budget` data bytes or one control packet.
    ///
    /// A control packet at the read position is returned instead of data;
    /// otherwise the returned chunk ends at the next control packet, at
    /// `budget`, or at the end of the front packet, whichever is first.
    /// Short chunks are normal. A budget of 0 is treated as 1.
    ///
    /// # Errors
    ///
    /// [`StreamError::Stopped`] or [`StreamError::Timeout`].
    pub async fn pull(&self, budget: usize, timeout: Timeout) -> Result<StreamPacket, StreamError> {
        self.take(Some(budget.max(1)), timeout).await
    }

    /// Header of the first queued packet of `kind`, without dequeuing.
    ///
    /// Returns `None` if no such packet is queued, or if a packet of a kind
    /// in `cant_be_preceded_by` comes first.
    pub fn peek_first_of_type(&self, kind: PacketKind, cant_be_preceded_by: PacketKinds) -> Option<PacketInfo> {
        self.with_state(|s| {
            for pkt in &s.packets {
                if pkt.kind() == kind {
                    return Some(pkt.info());
                }
                if cant_be_preceded_by.contains(pkt.kind()) {
                    return None;
                }
            }
            None
        })
    }

    /// Open prefill gates with ids up to and including `id`.
    pub fn complete_prefill(&self, id: u32) {
        self.with_state(|s| {
            s.prefill_done = Some(s.prefill_done.map_or(id, |done| done.max(id)));
            if s.gate.is_some_and(|g| g <= id) {
                s.gate = None;
            }
        });
        self.signal.set(PREFILL);
    }

    /// `true` while the consumer is held at a prefill gate.
    pub fn is_gated(&self) -> bool {
        self.with_state(|s| s.gate.is_some())
    }

    /// Block until at least one packet is queued.
    ///
    /// # Errors
    ///
    /// [`StreamError::Stopped`] or [`StreamError::Timeout`].
    pub async fn wait_for_data(&self, timeout: Timeout) -> Result<(), StreamError> {
        let deadline = timeout.deadline();
        let generation = self.generation();
        loop {
            self.check(generation)?;
            if !self.is_empty() {
                return Ok(());
            }
            self.wait(PUSHED, deadline).await?;
        }
    }

    /// Discard everything queued without raising the stop signal.
    ///
    /// Positions stay monotonic: the read position jumps to the write
    /// position. Gates and held-back events are dropped.
    pub fn flush(&self) {
        let (packets, deferred) = self.with_state(|s| {
            s.data_size = 0;
            s.read_pos = s.write_pos;
            s.gate = None;
            (core::mem::take(&mut s.packets), core::mem::take(&mut s.deferred))
        });
        drop(packets);
        drop(deferred);
        self.signal.set(POPPED | PREFILL);
    }

    /// Tear down: every wait in progress ends with [`StreamError::Stopped`],
    /// queued packets are destroyed and all counters reset, leaving the
    /// queue ready for reuse.
    pub fn clear(&self) {
        let old = self.with_state(|s| {
            let generation = s.generation.wrapping_add(1);
            let old = core::mem::replace(s, QueueState::new());
            s.generation = generation;
            old
        });
        drop(old);
        self.signal.set(PUSHED | POPPED | PREFILL);
    }

    // ─── Implementation ──────────────────────────────────────────────────────

    fn with_state<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        self.state.lock(|c| f(&mut c.borrow_mut()))
    }

    fn generation(&self) -> u32 {
        self.with_state(|s| s.generation)
    }

    fn check(&self, generation: u32) -> Result<(), StreamError> {
        if self.is_stopped() || self.generation() != generation {
            return Err(StreamError::Stopped);
        }
        Ok(())
    }

    async fn take(&self, budget: Option<usize>, timeout: Timeout) -> Result<StreamPacket, StreamError> {
        let deadline = timeout.deadline();
        let generation = self.generation();
        loop {
            self.check(generation)?;
            match self.with_state(|s| s.take(budget)) {
                Take::Packet(pkt) => {
                    self.signal.set(POPPED);
                    return Ok(pkt);
                }
                Take::Empty => self.wait(PUSHED, deadline).await?,
                Take::Gated => self.wait(PREFILL, deadline).await?,
            }
        }
    }

    async fn wait(&self, mask: Conditions, deadline: Deadline) -> Result<(), StreamError> {
        let hit = self
            .signal
            .wait_until(mask | STOP, Trigger::Edge, deadline)
            .await?;
        if hit.intersects(STOP) {
            return Err(StreamError::Stopped);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::buffer::DataBuf;
    use crate::format::StreamFormat;
    use crate::packet::{NewStream, StreamId};

    fn data(bytes: &[u8]) -> StreamPacket {
        StreamPacket::Data(DataBuf::from(bytes))
    }

    fn title(text: &str) -> StreamPacket {
        let mut t = crate::packet::Title::new();
        t.push_str(text).unwrap();
        StreamPacket::TitleChanged {
            stream_id: StreamId::FIRST,
            title: t,
        }
    }

    fn expect_data(pkt: StreamPacket) -> DataBuf {
        match pkt {
            StreamPacket::Data(buf) => buf,
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_in_window_shortens_chunk() {
        let ring = EventRing::new(16, 1024);
        ring.push_back(data(&[1; 10]), Timeout::NONE).await.unwrap();
        ring.push_back(StreamPacket::StreamEnd { stream_id: StreamId::FIRST }, Timeout::NONE)
            .await
            .unwrap();
        ring.push_back(data(&[2; 10]), Timeout::NONE).await.unwrap();

        assert_eq!(expect_data(ring.pull(6, Timeout::NONE).await.unwrap()).len(), 6);
        assert_eq!(expect_data(ring.pull(6, Timeout::NONE).await.unwrap()).len(), 4);
        assert_eq!(ring.pull(6, Timeout::NONE).await.unwrap().kind(), PacketKind::StreamEnd);
        assert_eq!(ring.data_size(), 10);
    }

    #[tokio::test]
    async fn test_push_event_at_splits_queued_data() {
        let ring = EventRing::new(16, 1024);
        ring.push_back(data(&[0, 1, 2, 3, 4, 5, 6, 7]), Timeout::NONE).await.unwrap();
        ring.push_event_at(title("mid"), 5);

        let head = expect_data(ring.pull(100, Timeout::NONE).await.unwrap());
        assert_eq!(&*head, &[0, 1, 2, 3, 4]);
        assert_eq!(ring.pull(100, Timeout::NONE).await.unwrap().kind(), PacketKind::TitleChanged);
        assert_eq!(&*expect_data(ring.pull(100, Timeout::NONE).await.unwrap()), &[5, 6, 7]);
    }

    #[tokio::test]
    async fn test_future_event_released_when_write_crosses() {
        let ring = EventRing::new(16, 1024);
        ring.push_event_at(title("later"), 12);
        assert!(ring.is_empty());
        ring.push_back(data(&[0; 8]), Timeout::NONE).await.unwrap();
        assert_eq!(ring.len(), 1);
        ring.push_back(data(&[1; 8]), Timeout::NONE).await.unwrap();
        // 8 + 4 bytes, title, 4 bytes
        assert_eq!(ring.len(), 4);
        assert_eq!(expect_data(ring.pop_front(Timeout::NONE).await.unwrap()).len(), 8);
        assert_eq!(expect_data(ring.pop_front(Timeout::NONE).await.unwrap()).len(), 4);
        assert_eq!(ring.pop_front(Timeout::NONE).await.unwrap().kind(), PacketKind::TitleChanged);
        assert_eq!(ring.data_size(), 4);
    }

    #[tokio::test]
    async fn test_control_packet_does_not_pull_a_future_event_forward() {
        let ring = EventRing::new(16, 1024);
        ring.push_back(data(&[0; 10]), Timeout::NONE).await.unwrap();
        ring.push_event_at(title("later"), 20);
        ring.push_back(title("now"), Timeout::NONE).await.unwrap();
        ring.push_back(data(&[1; 20]), Timeout::NONE).await.unwrap();

        let mut order = Vec::new();
        while !ring.is_empty() {
            match ring.pop_front(Timeout::NONE).await.unwrap() {
                StreamPacket::Data(buf) => order.push(format!("data {}", buf.len())),
                StreamPacket::TitleChanged { title, .. } => order.push(format!("title {title}")),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(order, ["data 10", "title now", "data 10", "title later", "data 10"]);
    }

    #[tokio::test]
    async fn test_room_check_matches_push() {
        let ring = EventRing::new(4, 16);
        ring.push_back(data(&[0; 12]), Timeout::NONE).await.unwrap();
        assert!(!ring.has_room_for(&data(&[0; 8])));
        assert!(ring.has_room_for(&data(&[0; 4])));
        assert!(ring.has_room_for(&StreamPacket::Prefill { id: 1 }));
    }

    #[tokio::test]
    async fn test_consumed_position_is_delivered_next() {
        let ring = EventRing::new(16, 1024);
        ring.push_back(data(&[0; 8]), Timeout::NONE).await.unwrap();
        let _ = ring.pull(8, Timeout::NONE).await.unwrap();
        ring.push_back(data(&[0; 8]), Timeout::NONE).await.unwrap();
        ring.push_event_at(title("late"), 2);
        assert_eq!(ring.pull(8, Timeout::NONE).await.unwrap().kind(), PacketKind::TitleChanged);
    }

    #[tokio::test]
    async fn test_peek_respects_disallowed_predecessors() {
        let ring = EventRing::new(16, 1024);
        let ns = NewStream::new(StreamId::FIRST, StreamFormat::pcm(44_100, 16, 2));
        ring.push_back(data(&[0; 4]), Timeout::NONE).await.unwrap();
        ring.push_back(ns.into(), Timeout::NONE).await.unwrap();

        assert_eq!(
            ring.peek_first_of_type(PacketKind::NewStream, PacketKinds::NONE),
            Some(PacketInfo::NewStream(ns))
        );
        assert_eq!(
            ring.peek_first_of_type(PacketKind::NewStream, PacketKinds::of(PacketKind::Data)),
            None
        );
        assert_eq!(ring.len(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_times_out_and_drops() {
        let ring = EventRing::new(2, 1024);
        ring.push_back(data(&[0; 4]), Timeout::NONE).await.unwrap();
        ring.push_back(data(&[0; 4]), Timeout::NONE).await.unwrap();
        assert_eq!(
            ring.push_back(data(&[0; 4]), Timeout::millis(5)).await,
            Err(StreamError::Timeout)
        );
        assert_eq!(ring.data_size(), 8);
    }

    #[tokio::test]
    async fn test_byte_capacity_admits_oversized_chunk_only_when_empty() {
        let ring = EventRing::new(8, 16);
        ring.push_back(data(&[0; 32]), Timeout::NONE).await.unwrap();
        assert!(ring.try_push_back(data(&[0; 1])).is_err());
        // control packets are not limited by bytes
        assert!(ring.try_push_back(StreamPacket::Prefill { id: 1 }).is_ok());
    }

    #[tokio::test]
    async fn test_flush_keeps_positions_monotonic() {
        let ring = EventRing::new(8, 1024);
        ring.push_back(data(&[0; 10]), Timeout::NONE).await.unwrap();
        ring.flush();
        assert_eq!(ring.data_size(), 0);
        assert_eq!(ring.read_pos(), 10);
        assert_eq!(ring.write_pos(), 10);
    }

    #[tokio::test]
    async fn test_clear_resets_and_stays_usable() {
        let ring = EventRing::new(8, 1024);
        ring.push_back(data(&[0; 10]), Timeout::NONE).await.unwrap();
        ring.clear();
        assert_eq!(ring.write_pos(), 0);
        ring.push_back(data(&[0; 3]), Timeout::NONE).await.unwrap();
        assert_eq!(ring.data_size(), 3);
    }

    #[tokio::test]
    async fn test_stop_signal_fails_push_and_pull() {
        let ring = EventRing::new(8, 1024);
        ring.set_stop_signal();
        assert_eq!(ring.pull(4, Timeout::Forever).await.unwrap_err(), StreamError::Stopped);
        assert!(ring.try_push_back(data(&[1])).is_err());
        ring.clear_stop_signal();
        assert!(ring.try_push_back(data(&[1])).is_ok());
    }
}
