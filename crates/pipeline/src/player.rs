//! Playback facade over a four-stage chain.
//!
//! ```text
//!  SourceNode ─► DecoderNode ─► FilterNode<Equalizer> ─► SinkNode
//! ```
//!
//! [`Player`] builds the chain, keeps a playlist and turns application
//! requests into node lifecycle changes and mailbox commands. Starting,
//! seeking and skipping stop every stage, drop what is queued and restart
//! the chain so no audio of the previous position is heard. Pause and
//! resume only touch the sink; upstream stages block on backpressure.
//!
//! [`Player::next_event`] applies the failure policy before handing events
//! to the application:
//!
//! | Event                         | Action                      |
//! |-------------------------------|-----------------------------|
//! | error, `EndSession`           | stop every stage            |
//! | error from source or decoder  | skip to the next entry      |
//! | error from equalizer or sink  | restart the stopped stage   |
//! | sink `StreamEnd`              | open the next entry         |

use alloc::sync::Arc;
use alloc::vec::Vec;

use platform::audio::PcmOutput;
use platform::audio_types::VolumePercent;
use platform::source::{ByteSource, Locator};
use thiserror_no_std::Error;

use crate::config::PipelineConfig;
use crate::decoder::DecoderNode;
use crate::event_ring::EventRing;
use crate::node::Node;
use crate::nodes::{EqCommand, Equalizer, FilterNode, SinkCommand, SinkNode, SourceCommand, SourceNode};
use crate::pipeline::{AudioPipeline, Disposition, NodeEvent, PipelineError, PipelineEvent};
use crate::spawner::{SpawnError, TaskSpawner};
use crate::timeout::Timeout;
use crate::volume::MeasurePoint;

/// How long a lifecycle change may take before the player moves on.
pub const CONTROL_TIMEOUT: Timeout = Timeout::millis(2_000);

/// What the player is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerState {
    /// Nothing is playing.
    Stopped,
    /// Opening an entry or waiting for its first audio.
    Starting,
    /// Audio is reaching the output.
    Playing,
    /// The sink is held; the position is kept.
    Paused,
}

/// Player request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerError {
    /// The playlist has no entry to play.
    #[error("playlist is empty")]
    EmptyPlaylist,
    /// The request needs a current entry.
    #[error("nothing is playing")]
    NotPlaying,
    /// The chain could not be (re)started.
    #[error("pipeline: {0}")]
    Pipeline(PipelineError),
}

impl From<PipelineError> for PlayerError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<SpawnError> for PlayerError {
    fn from(e: SpawnError) -> Self {
        Self::Pipeline(PipelineError::Spawn(e))
    }
}

/// Source → decoder → equalizer → sink, with a playlist.
pub struct Player<S: ByteSource + 'static, O: PcmOutput + 'static> {
    pipeline: AudioPipeline,
    source: Node<SourceNode<S>>,
    decoder: Node<DecoderNode>,
    eq: Node<FilterNode<Equalizer>>,
    sink: Node<SinkNode<O>>,
    rings: [Arc<EventRing>; 3],
    playlist: Vec<Locator>,
    cursor: Option<usize>,
    state: PlayerState,
}

impl<S: ByteSource + 'static, O: PcmOutput + 'static> Player<S, O> {
    /// Build the chain. No worker runs until something is played.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when `config` does not validate.
    pub fn new(config: PipelineConfig, spawner: Arc<dyn TaskSpawner>, source: S, output: O) -> Result<Self, PipelineError> {
        let mut pipeline = AudioPipeline::new(config, spawner)?;
        let ring = || Arc::new(EventRing::new(config.ring_packets, config.ring_bytes));
        let rings = [ring(), ring(), ring()];
        let [fetched, decoded, filtered] = &rings;

        let source = pipeline.add_node("source", SourceNode::new(source, Arc::clone(fetched)))?;
        let decoder = pipeline.add_node("decoder", DecoderNode::new(Arc::clone(fetched), Arc::clone(decoded)))?;
        let eq = pipeline.add_node(
            "eq",
            FilterNode::new(Arc::clone(decoded), Arc::clone(filtered), Equalizer::new()),
        )?;
        let sink = pipeline.add_node("sink", SinkNode::new(output, Arc::clone(filtered)))?;

        Ok(Self {
            pipeline,
            source,
            decoder,
            eq,
            sink,
            rings,
            playlist: Vec::new(),
            cursor: None,
            state: PlayerState::Stopped,
        })
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// The chain behind the player.
    pub fn pipeline(&self) -> &AudioPipeline {
        &self.pipeline
    }

    /// Entries in play order.
    pub fn playlist(&self) -> &[Locator] {
        &self.playlist
    }

    /// Index of the entry playing or last played.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Replace the playlist. Playback is not affected until the next
    /// start or skip.
    pub fn set_playlist(&mut self, entries: Vec<Locator>) {
        self.playlist = entries;
        self.cursor = None;
    }

    /// Append an entry.
    pub fn enqueue(&mut self, locator: Locator) {
        self.playlist.push(locator);
    }

    /// Play `locator` now, making it the only playlist entry.
    ///
    /// # Errors
    ///
    /// [`PlayerError::Pipeline`] when a node worker could not be started.
    pub async fn play(&mut self, locator: Locator) -> Result<(), PlayerError> {
        self.playlist.clear();
        self.playlist.push(locator);
        self.play_index(0).await
    }

    /// Play playlist entry `index`.
    ///
    /// # Errors
    ///
    /// [`PlayerError::EmptyPlaylist`] when there is no such entry;
    /// [`PlayerError::Pipeline`] when a node worker could not be started.
    pub async fn play_index(&mut self, index: usize) -> Result<(), PlayerError> {
        let Some(locator) = self.playlist.get(index).cloned() else {
            return Err(PlayerError::EmptyPlaylist);
        };
        info!("player: playing entry {}", index);
        self.halt().await;
        self.cursor = Some(index);
        self.source.post(SourceCommand::Open(locator)).await;
        self.state = PlayerState::Starting;
        self.pipeline.run_all(CONTROL_TIMEOUT).await?;
        Ok(())
    }

    /// Hold output at the current position.
    pub async fn pause(&mut self) {
        if matches!(self.state, PlayerState::Playing | PlayerState::Starting) {
            self.sink.pause().await;
            self.state = PlayerState::Paused;
            debug!("player: paused");
        }
    }

    /// Continue after [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// [`PlayerError::Pipeline`] when the sink worker could not be started.
    pub async fn resume(&mut self) -> Result<(), PlayerError> {
        if self.state == PlayerState::Paused {
            self.sink.run().await?;
            self.state = PlayerState::Playing;
            debug!("player: resumed");
        }
        Ok(())
    }

    /// Stop playback and drop everything queued. The cursor is kept.
    pub async fn stop(&mut self) {
        self.halt().await;
        self.source.post(SourceCommand::Close).await;
        self.state = PlayerState::Stopped;
        info!("player: stopped");
    }

    /// Restart the current entry at `position_ms`.
    ///
    /// Needs a source that reports its bitrate.
    ///
    /// # Errors
    ///
    /// [`PlayerError::NotPlaying`] without a current entry;
    /// [`PlayerError::Pipeline`] when a node worker could not be started.
    pub async fn seek(&mut self, position_ms: u32) -> Result<(), PlayerError> {
        if self.cursor.is_none() || self.state == PlayerState::Stopped {
            return Err(PlayerError::NotPlaying);
        }
        debug!("player: seek to {} ms", position_ms);
        self.halt().await;
        self.source.post(SourceCommand::Seek { position_ms }).await;
        self.state = PlayerState::Starting;
        self.pipeline.run_all(CONTROL_TIMEOUT).await?;
        Ok(())
    }

    /// Set the output volume.
    pub async fn set_volume(&self, volume: VolumePercent) {
        self.sink.post(SinkCommand::SetVolume(volume)).await;
    }

    /// Mute or unmute without losing the volume.
    pub async fn set_mute(&self, muted: bool) {
        self.sink.post(SinkCommand::Mute(muted)).await;
    }

    /// Enable the output level meter at `point`, or disable it with `None`.
    ///
    /// Levels arrive as [`NodeEvent::Levels`] from the sink.
    pub async fn set_level_meter(&self, point: Option<MeasurePoint>) {
        self.sink.post(SinkCommand::Levels(point)).await;
    }

    /// Set equalizer band `band` to `gain_db`.
    pub async fn set_eq_gain(&self, band: usize, gain_db: f32) {
        self.eq.post(EqCommand::SetGain { band, gain_db }).await;
    }

    /// Send any equalizer command.
    pub async fn eq_command(&self, cmd: EqCommand) {
        self.eq.post(cmd).await;
    }

    /// Skip to the next playlist entry.
    ///
    /// # Errors
    ///
    /// [`PlayerError::EmptyPlaylist`] past the last entry;
    /// [`PlayerError::Pipeline`] when a node worker could not be started.
    pub async fn next(&mut self) -> Result<(), PlayerError> {
        let index = self.cursor.map_or(0, |c| c.saturating_add(1));
        self.play_index(index).await
    }

    /// Go back to the previous playlist entry, or restart the first.
    ///
    /// # Errors
    ///
    /// [`PlayerError::EmptyPlaylist`] when the playlist is empty;
    /// [`PlayerError::Pipeline`] when a node worker could not be started.
    pub async fn prev(&mut self) -> Result<(), PlayerError> {
        let index = self.cursor.map_or(0, |c| c.saturating_sub(1));
        self.play_index(index).await
    }

    /// Next pipeline event, after the player has acted on it.
    pub async fn next_event(&mut self) -> PipelineEvent {
        let event = self.pipeline.next_event().await;
        self.handle(&event).await;
        event
    }

    /// Stop every worker. The player can be started again.
    pub async fn shutdown(&mut self) {
        self.pipeline.terminate_all(CONTROL_TIMEOUT).await;
        self.flush_rings();
        self.state = PlayerState::Stopped;
    }

    async fn handle(&mut self, event: &PipelineEvent) {
        let upstream = event.node == self.source.id() || event.node == self.decoder.id();
        match &event.kind {
            NodeEvent::Playing { .. } if self.state == PlayerState::Starting => {
                self.state = PlayerState::Playing;
            }
            NodeEvent::Error {
                disposition: Disposition::EndSession,
                error,
            } => {
                warn!("player: {} ended the session", error.as_str());
                self.stop().await;
            }
            NodeEvent::Error { .. } if upstream => self.advance(false).await,
            NodeEvent::Error { .. } => {
                // a downstream stage stopped; restart it in place
                if self.state != PlayerState::Stopped && self.pipeline.run_all(CONTROL_TIMEOUT).await.is_err() {
                    self.stop().await;
                }
            }
            NodeEvent::StreamEnd { .. } if event.node == self.sink.id() => self.advance(true).await,
            _ => {}
        }
    }

    /// Move to the next entry, or stop at the end of the playlist.
    async fn advance(&mut self, gapless: bool) {
        if self.state == PlayerState::Stopped {
            return;
        }
        let index = self.cursor.map_or(0, |c| c.saturating_add(1));
        let Some(locator) = self.playlist.get(index).cloned() else {
            debug!("player: end of playlist");
            self.stop().await;
            return;
        };
        if gapless {
            // the previous stream drained; the chain is still running
            self.cursor = Some(index);
            self.source.post(SourceCommand::Open(locator)).await;
            self.state = PlayerState::Starting;
            return;
        }
        if self.play_index(index).await.is_err() {
            self.stop().await;
        }
    }

    /// Stop every stage and drop what is queued between them.
    async fn halt(&mut self) {
        self.pipeline.stop_all(CONTROL_TIMEOUT).await;
        self.flush_rings();
    }

    fn flush_rings(&self) {
        for ring in &self.rings {
            ring.flush();
        }
    }
}
