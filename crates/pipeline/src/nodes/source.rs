//! Network / file source node.
//!
//! Drives a [`ByteSource`] and turns what it reads into stream packets:
//!
//! ```text
//!  NewStream ─ Prefill ─ Data ─ Data ─ TitleChanged ─ Data … ─ StreamEnd
//! ```
//!
//! Connection failures are retried with exponential backoff. A read error
//! reconnects at the byte offset already received, so the stream continues
//! under the same id. Seeking converts a time position to a byte offset
//! with the source bitrate and starts a new stream.

use alloc::sync::Arc;

use embassy_time::{Duration, Timer};
use platform::source::{ByteSource, Locator, SourceInfo};

use crate::buffer::{BufferPool, DataBuf, HEAP};
use crate::error::StreamError;
use crate::event_ring::EventRing;
use crate::format::StreamFormat;
use crate::node::{NodeBehavior, NodeContext, Step, Transition};
use crate::outbox::Outbox;
use crate::packet::{NewStream, StreamPacket};
use crate::pipeline::NodeEvent;
use crate::timeout::Timeout;

/// Commands accepted by a [`SourceNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCommand {
    /// Drop whatever is playing and stream `locator` from the start.
    Open(Locator),
    /// Restart the current resource at this playback position.
    Seek {
        /// Position in milliseconds
        position_ms: u32,
    },
    /// End the current stream and disconnect.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Streaming,
}

/// Pipeline stage reading from a [`ByteSource`].
pub struct SourceNode<S: ByteSource> {
    source: S,
    output: Arc<EventRing>,
    pool: &'static dyn BufferPool,
    phase: Phase,
    locator: Option<Locator>,
    connected: bool,
    /// Next connect starts a new logical stream rather than resuming.
    fresh: bool,
    /// Byte offset within the resource of the next byte to read.
    offset: u64,
    seek_ms: Option<u32>,
    stream: Option<NewStream>,
    /// Bitrate of the resource, kept across stops for seeking.
    bitrate: Option<u32>,
    attempt: u8,
    delay_ms: u32,
    prefill_seq: u32,
    /// Outstanding prefill gate.
    prefill: Option<u32>,
    outbox: Outbox,
}

impl<S: ByteSource> SourceNode<S> {
    /// Node pushing into `output` with heap buffers.
    pub fn new(source: S, output: Arc<EventRing>) -> Self {
        Self::with_pool(source, output, &HEAP)
    }

    /// Node allocating its read buffers from `pool`.
    pub fn with_pool(source: S, output: Arc<EventRing>, pool: &'static dyn BufferPool) -> Self {
        Self {
            source,
            output,
            pool,
            phase: Phase::Idle,
            locator: None,
            connected: false,
            fresh: true,
            offset: 0,
            seek_ms: None,
            stream: None,
            bitrate: None,
            attempt: 0,
            delay_ms: 0,
            prefill_seq: 0,
            prefill: None,
            outbox: Outbox::new(),
        }
    }

    /// Header of the stream being produced, if any.
    pub fn current_stream(&self) -> Option<NewStream> {
        self.stream
    }

    /// Byte offset within the resource of the next byte to read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.source.disconnect().await;
            self.connected = false;
        }
    }

    /// Forget the current stream and discard everything queued for it.
    async fn abandon(&mut self) {
        self.disconnect().await;
        self.outbox.clear();
        self.output.flush();
        self.stream = None;
        self.prefill = None;
        self.attempt = 0;
    }

    fn begin_stream(&mut self, info: &SourceInfo, ctx: &NodeContext) {
        let format = StreamFormat::from_mime(&info.content_type).unwrap_or(StreamFormat::UNKNOWN);
        let header = NewStream {
            stream_id: ctx.next_stream_id(),
            format,
            seek_pos_ms: self.seek_ms.take(),
            source_bps: info.bitrate,
        };
        debug!(
            "source: stream {} ({}) at offset {}",
            header.stream_id.get(),
            format.codec.as_str(),
            self.offset
        );
        self.stream = Some(header);
        self.bitrate = info.bitrate;
        self.outbox.push(header.into());

        if ctx.config().prefill_bytes > 0 {
            self.prefill_seq = self.prefill_seq.wrapping_add(1).max(1);
            self.prefill = Some(self.prefill_seq);
            self.outbox.push(StreamPacket::Prefill { id: self.prefill_seq });
            ctx.emit(NodeEvent::Buffering { waiting: true });
        }
    }

    /// Open the outstanding gate once enough data is queued, or `force`.
    fn release_prefill(&mut self, force: bool, ctx: &NodeContext) {
        let Some(id) = self.prefill else {
            return;
        };
        let threshold = ctx.config().prefill_bytes.min(self.output.byte_capacity());
        // a queue full by packet count can never reach the byte threshold
        let crowded = self.output.len().saturating_add(1) >= self.output.packet_capacity();
        // nor can one whose consumer is held while the next packet does not fit
        let blocked = self.outbox.front().is_some_and(|pkt| !self.output.has_room_for(pkt));
        if force || crowded || blocked || self.output.data_size() >= threshold {
            self.output.complete_prefill(id);
            self.prefill = None;
            debug!("source: prefill {} complete at {} bytes", id, self.output.data_size());
            ctx.emit(NodeEvent::Buffering { waiting: false });
        }
    }

    async fn connect(&mut self, ctx: &NodeContext) -> Result<Step, StreamError> {
        let Some(locator) = self.locator.clone() else {
            self.phase = Phase::Idle;
            return Ok(Step::Continue);
        };
        let cfg = *ctx.config();
        if self.attempt == 0 {
            self.delay_ms = cfg.backoff_initial_ms;
            ctx.emit(NodeEvent::Connecting);
        }
        let connected = self.source.connect(&locator, self.offset).await.ok();
        match connected {
            Some(info) => {
                self.connected = true;
                self.attempt = 0;
                ctx.emit(NodeEvent::Connected);
                if self.fresh {
                    self.fresh = false;
                    self.begin_stream(&info, ctx);
                } else {
                    info!("source: resumed at offset {}", self.offset);
                }
                self.phase = Phase::Streaming;
                Ok(Step::Continue)
            }
            None => {
                self.attempt = self.attempt.saturating_add(1);
                if self.attempt >= cfg.connect_attempts {
                    warn!("source: giving up after {} attempts", self.attempt);
                    self.attempt = 0;
                    self.phase = Phase::Idle;
                    return Err(StreamError::Upstream);
                }
                debug!("source: connect attempt {} failed, retry in {} ms", self.attempt, self.delay_ms);
                let delay = self.delay_ms;
                self.delay_ms = delay.saturating_mul(2).min(cfg.backoff_max_ms);
                Timer::after(Duration::from_millis(u64::from(delay))).await;
                Ok(Step::Continue)
            }
        }
    }

    async fn read(&mut self, ctx: &NodeContext) -> Result<Step, StreamError> {
        let mut buf = DataBuf::zeroed(self.pool, ctx.config().out_packet_size);
        let chunk = self.source.read(&mut buf).await.ok();
        match chunk {
            Some(chunk) if chunk.len == 0 => {
                if let Some(stream) = self.stream.take() {
                    debug!("source: stream {} ended at {} bytes", stream.stream_id.get(), self.offset);
                    self.outbox.push(StreamPacket::StreamEnd {
                        stream_id: stream.stream_id,
                    });
                }
                self.release_prefill(true, ctx);
                self.disconnect().await;
                self.phase = Phase::Idle;
                Ok(Step::Continue)
            }
            Some(chunk) => {
                buf.truncate(chunk.len);
                self.offset = self.offset.wrapping_add(chunk.len as u64);
                if let (Some(meta), Some(stream)) = (chunk.metadata, self.stream) {
                    // the outbox is empty here, so the ring's write position
                    // is where this chunk will start
                    let at = self.output.write_pos().wrapping_add(meta.offset as u64);
                    trace!("source: title at byte {}", at);
                    self.output.push_event_at(
                        StreamPacket::TitleChanged {
                            stream_id: stream.stream_id,
                            title: meta.title,
                        },
                        at,
                    );
                }
                self.outbox.push(buf.into());
                Ok(Step::Continue)
            }
            None => {
                warn!("source: read failed at offset {}, reconnecting", self.offset);
                self.source.disconnect().await;
                self.connected = false;
                self.phase = Phase::Connecting;
                Ok(Step::Continue)
            }
        }
    }
}

impl<S: ByteSource + 'static> NodeBehavior for SourceNode<S> {
    type Command = SourceCommand;

    async fn step(&mut self, ctx: &NodeContext) -> Result<Step, StreamError> {
        self.release_prefill(false, ctx);
        self.outbox.flush(&self.output, Timeout::Forever).await?;
        self.release_prefill(false, ctx);
        match self.phase {
            Phase::Idle => {
                self.disconnect().await;
                Ok(Step::Idle)
            }
            Phase::Connecting => self.connect(ctx).await,
            Phase::Streaming => self.read(ctx).await,
        }
    }

    async fn on_command(&mut self, cmd: SourceCommand, ctx: &NodeContext) -> Transition {
        match cmd {
            SourceCommand::Open(locator) => {
                info!("source: open {}", locator.as_str());
                self.abandon().await;
                self.locator = Some(locator);
                self.bitrate = None;
                self.offset = 0;
                self.seek_ms = None;
                self.fresh = true;
                self.phase = Phase::Connecting;
                Transition::Run
            }
            SourceCommand::Seek { position_ms } => {
                let (Some(_), Some(bps)) = (self.locator.as_ref(), self.bitrate) else {
                    warn!("source: cannot seek without a stream bitrate");
                    return Transition::Stay;
                };
                let offset = u64::from(position_ms)
                    .saturating_mul(u64::from(bps))
                    .checked_div(8_000)
                    .unwrap_or(0);
                info!("source: seek to {} ms (byte {})", position_ms, offset);
                self.abandon().await;
                self.offset = offset;
                self.seek_ms = Some(position_ms);
                self.fresh = true;
                self.phase = Phase::Connecting;
                Transition::Run
            }
            SourceCommand::Close => {
                self.disconnect().await;
                if let Some(stream) = self.stream.take() {
                    self.outbox.push(StreamPacket::StreamEnd {
                        stream_id: stream.stream_id,
                    });
                }
                self.release_prefill(true, ctx);
                self.locator = None;
                self.bitrate = None;
                self.phase = Phase::Idle;
                Transition::Run
            }
        }
    }

    fn on_stop(&mut self, flush: bool, _ctx: &NodeContext) {
        if flush {
            self.outbox.clear();
            self.output.flush();
            self.stream = None;
            self.prefill = None;
            self.phase = Phase::Idle;
        }
    }

    fn on_terminate(&mut self, ctx: &NodeContext) {
        self.on_stop(true, ctx);
        self.locator = None;
        self.bitrate = None;
    }
}
