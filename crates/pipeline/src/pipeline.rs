//! Pipeline control plane.
//!
//! [`AudioPipeline`] owns the node registry of one linear chain, mints
//! [`StreamId`]s, and turns node callbacks into [`PipelineEvent`]s for the
//! application. Nodes never see each other; they reach the control plane
//! through the [`PipelineHandle`] in their [`NodeContext`](crate::node::NodeContext).
//!
//! Failure policy lives here and only here: a node reports the raw
//! [`StreamError`] once, and the control plane stamps it with a
//! [`Disposition`] based on the error kind and how many failures in a row the
//! session has seen.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Channel, TrySendError};
use thiserror_no_std::Error;

use crate::config::{ConfigError, PipelineConfig};
use crate::error::StreamError;
use crate::format::StreamFormat;
use crate::node::{Node, NodeBehavior, NodeControl};
use crate::packet::{StreamId, Title};
use crate::spawner::{SpawnError, TaskSpawner};
use crate::timeout::Timeout;

/// Nodes one pipeline can hold.
pub const MAX_NODES: usize = 8;

/// Events buffered for the application before new ones are dropped.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Position of a node in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    /// Raw index.
    pub const fn index(self) -> u8 {
        self.0
    }
}

/// What the application should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    /// Recoverable: retry, skip the track, keep the session.
    Transient,
    /// Stop every node and end the session.
    EndSession,
}

/// Something a node observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A new logical stream started.
    NewStream {
        /// Stream id
        stream_id: StreamId,
        /// Its format
        format: StreamFormat,
    },
    /// The sink reconfigured the output.
    FormatChange {
        /// Stream id
        stream_id: StreamId,
        /// New output format
        format: StreamFormat,
    },
    /// A stream played out to its end.
    StreamEnd {
        /// Stream id
        stream_id: StreamId,
    },
    /// Stream metadata changed at the current play position.
    TitleChanged {
        /// Stream id
        stream_id: StreamId,
        /// New title
        title: Title,
    },
    /// Waiting for data to accumulate, or done waiting.
    Buffering {
        /// `true` when waiting starts
        waiting: bool,
    },
    /// A source started connecting.
    Connecting,
    /// A source connected.
    Connected,
    /// First audio of a stream reached the output.
    Playing {
        /// Stream id
        stream_id: StreamId,
    },
    /// The sink ran dry and wrote silence.
    Underrun,
    /// Peak levels at the sink's meter; zero once a stream ends.
    Levels {
        /// Left channel peak, `0..=32768`
        left: u16,
        /// Right channel peak, `0..=32768`
        right: u16,
    },
    /// A node gave up on a failure.
    Error {
        /// What failed
        error: StreamError,
        /// Verdict of the control plane
        disposition: Disposition,
    },
}

/// Event delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    /// Reporting node
    pub node: NodeId,
    /// Its name
    pub node_name: &'static str,
    /// What happened
    pub kind: NodeEvent,
}

/// Pipeline construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineError {
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(ConfigError),
    /// Registry full.
    #[error("pipeline already holds the maximum number of nodes")]
    TooManyNodes,
    /// A node worker could not be started.
    #[error("node worker could not be spawned: {0}")]
    Spawn(SpawnError),
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SpawnError> for PipelineError {
    fn from(e: SpawnError) -> Self {
        Self::Spawn(e)
    }
}

// ── Shared state ─────────────────────────────────────────────────────────────

struct Session {
    last_stream: StreamId,
    consecutive_failures: u8,
}

pub(crate) struct PipelineShared {
    config: PipelineConfig,
    session: Mutex<CriticalSectionRawMutex, RefCell<Session>>,
    events: Channel<CriticalSectionRawMutex, PipelineEvent, EVENT_QUEUE_DEPTH>,
    spawner: Arc<dyn TaskSpawner>,
}

/// Cheap handle nodes use to reach their pipeline.
#[derive(Clone)]
pub struct PipelineHandle(Arc<PipelineShared>);

impl PipelineHandle {
    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.0.config
    }

    /// Mint the id of the next logical stream.
    pub fn next_stream_id(&self) -> StreamId {
        self.0.session.lock(|s| {
            let mut s = s.borrow_mut();
            s.last_stream = s.last_stream.next();
            s.last_stream
        })
    }

    pub(crate) fn spawner(&self) -> &dyn TaskSpawner {
        &*self.0.spawner
    }

    /// Publish `kind` on behalf of `node`.
    ///
    /// Errors are classified first. A full event queue drops the event.
    pub(crate) fn emit(&self, node: NodeId, node_name: &'static str, kind: NodeEvent) {
        let kind = match kind {
            NodeEvent::Error { error, .. } => NodeEvent::Error {
                error,
                disposition: self.classify(error),
            },
            NodeEvent::Playing { stream_id } => {
                self.0.session.lock(|s| s.borrow_mut().consecutive_failures = 0);
                NodeEvent::Playing { stream_id }
            }
            other => other,
        };
        let event = PipelineEvent {
            node,
            node_name,
            kind,
        };
        if let Err(TrySendError::Full(dropped)) = self.0.events.try_send(event) {
            warn!("event queue full; dropping event from {}", dropped.node_name);
        }
    }

    fn classify(&self, error: StreamError) -> Disposition {
        let budget = self.0.config.max_consecutive_failures;
        self.0.session.lock(|s| {
            let mut s = s.borrow_mut();
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            match error {
                StreamError::NoCodec | StreamError::StreamFormat => Disposition::EndSession,
                _ if s.consecutive_failures >= budget => Disposition::EndSession,
                _ => Disposition::Transient,
            }
        })
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// One linear chain of nodes and its control plane.
pub struct AudioPipeline {
    handle: PipelineHandle,
    nodes: heapless::Vec<Arc<dyn NodeControl>, MAX_NODES>,
}

impl AudioPipeline {
    /// Empty pipeline whose node workers are started by `spawner`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when `config` does not validate.
    pub fn new(config: PipelineConfig, spawner: Arc<dyn TaskSpawner>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            handle: PipelineHandle(Arc::new(PipelineShared {
                config,
                session: Mutex::new(RefCell::new(Session {
                    // the first minted id is StreamId::FIRST
                    last_stream: StreamId::new(u16::MAX).unwrap_or(StreamId::FIRST),
                    consecutive_failures: 0,
                })),
                events: Channel::new(),
                spawner,
            })),
            nodes: heapless::Vec::new(),
        })
    }

    /// Handle for code that needs the control plane without owning it.
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        self.handle.config()
    }

    /// Register `behavior` as the next node of the chain.
    ///
    /// The node starts `Terminated`; nothing is spawned until it is run.
    ///
    /// # Errors
    ///
    /// [`PipelineError::TooManyNodes`] when the registry is full.
    pub fn add_node<B: NodeBehavior>(&mut self, name: &'static str, behavior: B) -> Result<Node<B>, PipelineError> {
        #[allow(clippy::cast_possible_truncation)] // Safety: len < MAX_NODES <= u8::MAX
        let id = NodeId(self.nodes.len() as u8);
        let node = Node::new(id, name, behavior, self.handle.clone());
        self.nodes
            .push(node.control())
            .map_err(|_| PipelineError::TooManyNodes)?;
        debug!("pipeline: added node {} as #{}", name, id.0);
        Ok(node)
    }

    /// Registered nodes, source first.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<dyn NodeControl>> {
        self.nodes.iter()
    }

    /// Run every node, sink first so consumers are ready before producers.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Spawn`] when a worker could not be started.
    pub async fn run_all(&self, timeout: Timeout) -> Result<(), PipelineError> {
        for node in self.nodes.iter().rev() {
            node.request_run()?;
        }
        self.join_all(timeout).await;
        Ok(())
    }

    /// Two-phase stop: request every node, then wait for each.
    pub async fn stop_all(&self, timeout: Timeout) {
        for node in &self.nodes {
            node.request_stop();
        }
        self.join_all(timeout).await;
    }

    /// Two-phase terminate: request every node, then wait for each worker
    /// to exit.
    pub async fn terminate_all(&self, timeout: Timeout) {
        for node in &self.nodes {
            node.request_terminate();
        }
        self.join_all(timeout).await;
    }

    /// Next application event, waiting for one.
    pub async fn next_event(&self) -> PipelineEvent {
        self.handle.0.events.receive().await
    }

    /// Next application event if one is queued.
    pub fn try_next_event(&self) -> Option<PipelineEvent> {
        self.handle.0.events.try_receive().ok()
    }

    async fn join_all(&self, timeout: Timeout) {
        for node in &self.nodes {
            if node.join(timeout).await.is_err() {
                warn!("pipeline: node {} did not settle in time", node.name());
            }
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        // workers hold their node alive; ask them to exit
        for node in &self.nodes {
            node.request_terminate();
        }
    }
}

/// Box a future for [`NodeControl::join`].
pub(crate) fn boxed<'a, T>(
    fut: impl core::future::Future<Output = T> + Send + 'a,
) -> core::pin::Pin<Box<dyn core::future::Future<Output = T> + Send + 'a>> {
    Box::pin(fut)
}
