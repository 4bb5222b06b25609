//! PCM output node.
//!
//! The last stage of a chain. It pulls PCM in `sink_chunk` pieces and
//! writes it to a [`PcmOutput`]:
//!
//! * every `NewStream` reconfigures the output when the format differs; a
//!   rejected format fails the stream with [`StreamError::StreamFormat`];
//! * a pull that times out mid-stream writes silence and reports an underrun;
//! * a chunk the device takes in pieces is resumed where it stopped, across
//!   pauses too;
//! * playback fades in after a format change or a buffering wait, and fades
//!   out over the last chunk before an upcoming format change;
//! * software volume follows the DAC attenuation curve;
//! * an optional peak meter reports [`NodeEvent::Levels`] every
//!   `level_interval_ms`, tapped before or after the volume stage.

use alloc::sync::Arc;

use platform::audio::PcmOutput;
use platform::audio_types::VolumePercent;

use crate::buffer::{DataBuf, HEAP};
use crate::error::StreamError;
use crate::event_ring::EventRing;
use crate::format::StreamFormat;
use crate::node::{NodeBehavior, NodeContext, Step, Transition};
use crate::packet::{NewStream, PacketInfo, PacketKind, PacketKinds, StreamId, StreamPacket};
use crate::pipeline::NodeEvent;
use crate::volume::{apply_gain, volume_to_gain, Fade, LevelMeter, MeasurePoint, StereoLevels};

/// Commands accepted by a [`SinkNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCommand {
    /// Set the software volume.
    SetVolume(VolumePercent),
    /// Silence output without losing the volume setting.
    Mute(bool),
    /// Enable the peak meter at a measure point, or disable it with `None`.
    Levels(Option<MeasurePoint>),
}

/// Pipeline stage writing PCM to an output device.
pub struct SinkNode<O: PcmOutput> {
    device: O,
    input: Arc<EventRing>,
    /// Layout of the bytes being pulled.
    format: Option<StreamFormat>,
    /// Format the device is configured for.
    configured: Option<StreamFormat>,
    stream: Option<StreamId>,
    started: bool,
    /// `Playing` was reported for the current stream.
    announced: bool,
    /// Waiting for data: an underrun or a prefill gate.
    starving: bool,
    fading_out: bool,
    volume: VolumePercent,
    muted: bool,
    gain: f32,
    fade: Fade,
    /// Unwritten rest of the last chunk.
    pending: Option<DataBuf>,
    meter: Option<LevelMeter>,
}

impl<O: PcmOutput> SinkNode<O> {
    /// Node writing what it pulls from `input` to `device`.
    pub fn new(device: O, input: Arc<EventRing>) -> Self {
        Self {
            device,
            input,
            format: None,
            configured: None,
            stream: None,
            started: false,
            announced: false,
            starving: false,
            fading_out: false,
            volume: VolumePercent::MAX,
            muted: false,
            gain: 1.0,
            fade: Fade::UNITY,
            pending: None,
            meter: None,
        }
    }

    /// Start at `volume` instead of full scale.
    #[must_use]
    pub fn with_volume(mut self, volume: VolumePercent) -> Self {
        self.volume = volume;
        self.update_gain();
        self
    }

    /// Current volume setting.
    pub fn volume(&self) -> VolumePercent {
        self.volume
    }

    fn update_gain(&mut self) {
        self.gain = if self.muted { 0.0 } else { volume_to_gain(self.volume) };
    }

    fn fade_frames(&self, ctx: &NodeContext) -> u32 {
        let rate = self.format.map_or(0, |f| f.sample_rate);
        let frames = u64::from(ctx.config().fade_ms)
            .saturating_mul(u64::from(rate))
            .checked_div(1_000)
            .unwrap_or(0);
        u32::try_from(frames).unwrap_or(u32::MAX)
    }

    /// Frames per level report at the current rate.
    fn level_window(&self, ctx: &NodeContext) -> u32 {
        let rate = self.format.map_or(0, |f| f.sample_rate);
        let frames = u64::from(ctx.config().level_interval_ms)
            .saturating_mul(u64::from(rate))
            .checked_div(1_000)
            .unwrap_or(0);
        u32::try_from(frames).unwrap_or(u32::MAX)
    }

    fn tap_levels(&mut self, point: MeasurePoint, pcm: &[u8], format: &StreamFormat, ctx: &NodeContext) {
        let window = self.level_window(ctx);
        let Some(meter) = self.meter.as_mut().filter(|m| m.point() == point) else {
            return;
        };
        if let Some(levels) = meter.measure(pcm, format, window) {
            emit_levels(ctx, levels);
        }
    }

    /// Report silence and start a fresh window.
    fn clear_levels(&mut self, ctx: &NodeContext) {
        if let Some(meter) = self.meter.as_mut() {
            meter.clear();
            emit_levels(ctx, StereoLevels::ZERO);
        }
    }

    async fn write_pending(&mut self) -> Result<(), StreamError> {
        while let Some(buf) = self.pending.as_mut() {
            let taken = self.device.write(buf).await.ok().filter(|&n| n > 0);
            let Some(taken) = taken else {
                warn!("sink: output write failed");
                self.pending = None;
                return Err(StreamError::Output);
            };
            buf.advance(taken);
            if buf.is_empty() {
                self.pending = None;
            }
        }
        Ok(())
    }

    async fn open_stream(&mut self, ns: NewStream, ctx: &NodeContext) -> Result<(), StreamError> {
        self.stream = Some(ns.stream_id);
        self.announced = false;
        self.fading_out = false;
        if !ns.format.is_pcm() {
            warn!("sink: compressed stream {} reached the output", ns.format.codec.as_str());
            self.format = None;
            return Err(StreamError::StreamFormat);
        }
        if self.configured != Some(ns.format) {
            let config = ns.format.audio_config();
            if self.device.configure(config).await.is_err() {
                warn!(
                    "sink: output rejected {} Hz / {} bit / {} ch",
                    config.sample_rate,
                    config.bit_depth,
                    config.channels
                );
                self.format = None;
                self.configured = None;
                return Err(StreamError::StreamFormat);
            }
            info!(
                "sink: output configured for {} Hz / {} bit / {} ch",
                config.sample_rate,
                config.bit_depth,
                config.channels
            );
            self.configured = Some(ns.format);
            self.format = Some(ns.format);
            self.fade = Fade::fade_in(self.fade_frames(ctx));
            ctx.emit(NodeEvent::FormatChange {
                stream_id: ns.stream_id,
                format: ns.format,
            });
        } else {
            self.format = Some(ns.format);
            if self.fade.is_silent() {
                self.fade = Fade::fade_in(self.fade_frames(ctx));
            }
        }
        if !self.started {
            if self.device.start().await.is_err() {
                warn!("sink: output failed to start");
                return Err(StreamError::Output);
            }
            self.started = true;
        }
        Ok(())
    }

    async fn play(&mut self, mut buf: DataBuf, ctx: &NodeContext) -> Result<(), StreamError> {
        let Some(format) = self.format else {
            trace!("sink: dropping {} bytes outside a stream", buf.len());
            return Ok(());
        };
        if self.starving {
            self.starving = false;
            self.fade = Fade::fade_in(self.fade_frames(ctx));
            ctx.emit(NodeEvent::Buffering { waiting: false });
        }
        if !self.announced {
            self.announced = true;
            if let Some(stream_id) = self.stream {
                ctx.emit(NodeEvent::Playing { stream_id });
            }
        }
        if !self.fading_out {
            let next = self
                .input
                .peek_first_of_type(PacketKind::NewStream, PacketKinds::of(PacketKind::Data));
            if let Some(PacketInfo::NewStream(next)) = next {
                if next.format != format {
                    let frames = buf.len().checked_div(format.bytes_per_frame()).unwrap_or(0);
                    self.fade = self.fade.fade_out(u32::try_from(frames).unwrap_or(u32::MAX));
                    self.fading_out = true;
                }
            }
        }
        self.tap_levels(MeasurePoint::BeforeVolume, &buf, &format, ctx);
        apply_gain(&mut buf, &format, self.gain, &mut self.fade);
        self.tap_levels(MeasurePoint::AfterVolume, &buf, &format, ctx);
        self.pending = Some(buf);
        self.write_pending().await
    }

    async fn underrun(&mut self, ctx: &NodeContext) -> Result<(), StreamError> {
        let Some(format) = self.format.filter(|_| self.started && self.stream.is_some()) else {
            return Ok(());
        };
        if !self.starving {
            self.starving = true;
            debug!("sink: underrun");
            ctx.emit(NodeEvent::Underrun);
            ctx.emit(NodeEvent::Buffering { waiting: true });
        }
        let frame = format.bytes_per_frame().max(1);
        let chunk = ctx.config().sink_chunk;
        let len = chunk.saturating_sub(chunk.checked_rem(frame).unwrap_or(0)).max(frame);
        self.pending = Some(DataBuf::zeroed(&HEAP, len));
        self.write_pending().await
    }
}

impl<O: PcmOutput + 'static> NodeBehavior for SinkNode<O> {
    type Command = SinkCommand;

    async fn step(&mut self, ctx: &NodeContext) -> Result<Step, StreamError> {
        self.write_pending().await?;
        let cfg = ctx.config();
        let pkt = match self.input.pull(cfg.sink_chunk, cfg.pull_timeout()).await {
            Ok(pkt) => pkt,
            Err(StreamError::Timeout) => {
                self.underrun(ctx).await?;
                return Ok(Step::Continue);
            }
            Err(e) => return Err(e),
        };
        match pkt {
            StreamPacket::Data(buf) => self.play(buf, ctx).await?,
            StreamPacket::NewStream(ns) => self.open_stream(ns, ctx).await?,
            StreamPacket::StreamEnd { stream_id } => {
                debug!("sink: stream {} ended", stream_id.get());
                self.stream = None;
                self.starving = false;
                self.clear_levels(ctx);
                ctx.emit(NodeEvent::StreamEnd { stream_id });
            }
            StreamPacket::TitleChanged { stream_id, title } => {
                ctx.emit(NodeEvent::TitleChanged { stream_id, title });
            }
            StreamPacket::Prefill { id } => {
                trace!("sink: waiting on prefill {}", id);
                if !self.starving {
                    self.starving = true;
                    ctx.emit(NodeEvent::Buffering { waiting: true });
                }
            }
        }
        Ok(Step::Continue)
    }

    async fn on_command(&mut self, cmd: SinkCommand, ctx: &NodeContext) -> Transition {
        match cmd {
            SinkCommand::SetVolume(volume) => {
                debug!("sink: volume {}%", volume.get());
                self.volume = volume;
            }
            SinkCommand::Mute(muted) => self.muted = muted,
            SinkCommand::Levels(Some(point)) => {
                debug!("sink: level meter on");
                self.meter = Some(LevelMeter::new(point));
            }
            SinkCommand::Levels(None) => {
                debug!("sink: level meter off");
                self.clear_levels(ctx);
                self.meter = None;
            }
        }
        self.update_gain();
        Transition::Stay
    }

    fn on_stop(&mut self, flush: bool, _ctx: &NodeContext) {
        if flush {
            self.pending = None;
            self.format = None;
            self.stream = None;
            self.starving = false;
            self.fading_out = false;
            self.fade = Fade::UNITY;
            if let Some(meter) = self.meter.as_mut() {
                meter.clear();
            }
        }
    }
}

fn emit_levels(ctx: &NodeContext, levels: StereoLevels) {
    ctx.emit(NodeEvent::Levels {
        left: levels.left,
        right: levels.right,
    });
}
