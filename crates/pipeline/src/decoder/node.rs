//! Decoder dispatch node.
//!
//! Pulls compressed packets, resolves a codec per stream and pushes PCM.
//!
//! * Codec resolution happens on the first packet of a stream: the
//!   `NewStream` format when it names a codec, otherwise the first
//!   [`SNIFF_LEN`] data bytes.
//! * A different codec recreates the decoder; the same codec resets it.
//! * Before the first PCM byte of a stream, and again whenever the decoded
//!   layout changes, a `NewStream` carrying the PCM format is pushed.
//! * A stream that fails to decode is skipped until the next `NewStream`.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::convert::Infallible;

use super::{detect_format, Decoded, Decoder, DecoderFactory, DefaultDecoders, SNIFF_LEN};
use crate::buffer::{BufferPool, DataBuf, HEAP};
use crate::error::StreamError;
use crate::event_ring::EventRing;
use crate::format::{CodecType, StreamFormat};
use crate::node::{NodeBehavior, NodeContext, Step, Transition};
use crate::outbox::Outbox;
use crate::packet::{NewStream, StreamPacket};
use crate::pipeline::NodeEvent;
use crate::timeout::Timeout;

/// Pipeline stage turning compressed packets into PCM packets.
pub struct DecoderNode<F: DecoderFactory = DefaultDecoders> {
    input: Arc<EventRing>,
    output: Arc<EventRing>,
    factory: F,
    pool: &'static dyn BufferPool,
    decoder: Option<Box<dyn Decoder>>,
    /// Header of the stream being decoded.
    stream: Option<NewStream>,
    /// Codec for the current stream has been settled.
    resolved: bool,
    /// PCM layout last announced downstream.
    out_format: Option<StreamFormat>,
    /// Input not yet accepted by the decoder.
    staged: Option<DataBuf>,
    sniff: Vec<u8>,
    /// Drop everything until the next `NewStream`.
    skipping: bool,
    resyncs: u8,
    outbox: Outbox,
}

impl DecoderNode<DefaultDecoders> {
    /// Node using the built-in decoders and heap buffers.
    pub fn new(input: Arc<EventRing>, output: Arc<EventRing>) -> Self {
        Self::with_factory(input, output, DefaultDecoders, &HEAP)
    }
}

impl<F: DecoderFactory> DecoderNode<F> {
    /// Node creating decoders with `factory` and output buffers from `pool`.
    pub fn with_factory(input: Arc<EventRing>, output: Arc<EventRing>, factory: F, pool: &'static dyn BufferPool) -> Self {
        Self {
            input,
            output,
            factory,
            pool,
            decoder: None,
            stream: None,
            resolved: false,
            out_format: None,
            staged: None,
            sniff: Vec::new(),
            skipping: false,
            resyncs: 0,
            outbox: Outbox::new(),
        }
    }

    /// Codec of the active decoder, if any.
    pub fn active_codec(&self) -> Option<CodecType> {
        self.decoder.as_ref().map(|d| d.codec())
    }

    fn reset_stream(&mut self) {
        self.stream = None;
        self.resolved = false;
        self.out_format = None;
        self.staged = None;
        self.sniff.clear();
        self.skipping = false;
        self.resyncs = 0;
    }

    /// Give up on the current stream.
    fn fail(&mut self, error: StreamError) -> StreamError {
        self.skipping = true;
        self.staged = None;
        self.sniff.clear();
        if let Some(dec) = self.decoder.as_mut() {
            dec.reset();
        }
        error
    }

    fn open_decoder(&mut self, format: &StreamFormat) -> Result<(), StreamError> {
        // raw PCM decoders are bound to their input layout
        let reusable = format.codec != CodecType::Pcm;
        match self.decoder.as_mut() {
            Some(dec) if reusable && dec.codec() == format.codec => {
                debug!("decoder: reset {}", format.codec.as_str());
                dec.reset();
            }
            _ => {
                self.decoder = self.factory.create(format);
                if self.decoder.is_none() {
                    warn!("decoder: no decoder for {}", format.codec.as_str());
                    return Err(self.fail(StreamError::NoCodec));
                }
                debug!("decoder: created {}", format.codec.as_str());
            }
        }
        self.resolved = true;
        Ok(())
    }

    /// Run the decoder once. `Ok(true)` when it made progress.
    fn decode_some(&mut self, ctx: &NodeContext) -> Result<bool, StreamError> {
        let Some(dec) = self.decoder.as_mut() else {
            return Ok(false);
        };
        if let Some(staged) = self.staged.as_mut() {
            let taken = dec.push_input(staged);
            staged.advance(taken);
            if staged.is_empty() {
                self.staged = None;
            }
        }
        let failure = match dec.decode() {
            Decoded::Frame { pcm, format } => {
                self.resyncs = 0;
                if self.out_format != Some(format) {
                    let header = match self.stream {
                        Some(s) => NewStream { format, ..s },
                        None => NewStream::new(ctx.next_stream_id(), format),
                    };
                    self.stream = Some(header);
                    self.outbox.push(header.into());
                    self.out_format = Some(format);
                    ctx.emit(NodeEvent::NewStream {
                        stream_id: header.stream_id,
                        format,
                    });
                }
                let frame = format.bytes_per_frame().max(1);
                let max = ctx.config().out_packet_size.max(frame);
                let chunk = max.saturating_sub(max.checked_rem(frame).unwrap_or(0));
                for piece in pcm.chunks(chunk) {
                    self.outbox.push(DataBuf::from_slice(self.pool, piece).into());
                }
                return Ok(true);
            }
            // a full input buffer that holds no frame is corrupt
            Decoded::NeedMoreInput if self.staged.is_none() => return Ok(false),
            Decoded::NeedMoreInput => super::DecodeError::InvalidData,
            Decoded::Error(e) => e,
        };
        if self.resyncs < ctx.config().resync_attempts && dec.resync() {
            self.resyncs = self.resyncs.saturating_add(1);
            debug!("decoder: resync {}", self.resyncs);
            return Ok(true);
        }
        warn!("decoder: giving up on stream: {}", failure.as_str());
        Err(self.fail(StreamError::Decode))
    }

    /// Settle the codec from the sniffed bytes and stage them for decoding.
    fn resolve_sniffed(&mut self, ctx: &NodeContext) -> Result<(), StreamError> {
        if self.stream.is_none() {
            self.stream = Some(NewStream::new(ctx.next_stream_id(), StreamFormat::UNKNOWN));
        }
        let Some(format) = detect_format(&self.sniff) else {
            warn!("decoder: unrecognised stream");
            return Err(self.fail(StreamError::NoCodec));
        };
        let head = DataBuf::from_slice(self.pool, &self.sniff);
        self.sniff.clear();
        self.open_decoder(&format)?;
        self.staged = Some(head);
        Ok(())
    }

    /// Decode a stream that ended before filling the sniff window.
    fn drain_short_stream(&mut self, ctx: &NodeContext) -> Result<(), StreamError> {
        self.resolve_sniffed(ctx)?;
        while self.decode_some(ctx)? {}
        Ok(())
    }

    fn accept(&mut self, pkt: StreamPacket, ctx: &NodeContext) -> Result<(), StreamError> {
        match pkt {
            StreamPacket::NewStream(ns) => {
                self.reset_stream();
                self.stream = Some(ns);
                if ns.format.codec != CodecType::Unknown {
                    self.open_decoder(&ns.format)?;
                }
            }
            StreamPacket::Data(_) if self.skipping => {}
            StreamPacket::Data(buf) if self.resolved => self.staged = Some(buf),
            StreamPacket::Data(buf) => {
                self.sniff.extend_from_slice(&buf);
                if self.sniff.len() >= SNIFF_LEN {
                    self.resolve_sniffed(ctx)?;
                }
            }
            StreamPacket::StreamEnd { stream_id } => {
                // the whole stream may have fit in the sniff window
                let drained = if !self.resolved && !self.skipping && !self.sniff.is_empty() {
                    self.drain_short_stream(ctx)
                } else {
                    Ok(())
                };
                self.decoder = None;
                self.reset_stream();
                self.outbox.push(StreamPacket::StreamEnd { stream_id });
                drained?;
            }
            StreamPacket::TitleChanged { .. } if self.skipping => {}
            title @ StreamPacket::TitleChanged { .. } => self.outbox.push(title),
            // gates apply to this node's input only
            StreamPacket::Prefill { .. } => {}
        }
        Ok(())
    }
}

impl<F: DecoderFactory> NodeBehavior for DecoderNode<F> {
    type Command = Infallible;

    async fn step(&mut self, ctx: &NodeContext) -> Result<Step, StreamError> {
        self.outbox.flush(&self.output, Timeout::Forever).await?;
        if self.decode_some(ctx)? {
            return Ok(Step::Continue);
        }
        let pkt = self.input.pop_front(Timeout::Forever).await?;
        self.accept(pkt, ctx)?;
        Ok(Step::Continue)
    }

    async fn on_command(&mut self, cmd: Infallible, _ctx: &NodeContext) -> Transition {
        match cmd {}
    }

    fn on_stop(&mut self, flush: bool, _ctx: &NodeContext) {
        if flush {
            self.decoder = None;
            self.reset_stream();
            self.outbox.clear();
        }
    }

    fn on_terminate(&mut self, ctx: &NodeContext) {
        self.on_stop(true, ctx);
    }
}
