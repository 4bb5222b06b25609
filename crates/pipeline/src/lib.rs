//! Streaming audio pipeline core for the `SoulAudio` player
//!
//! A pipeline is a linear chain of nodes, each driven by its own worker
//! task and connected to its neighbours by bounded packet queues:
//!
//! ```text
//!  SourceNode ──► EventRing ──► DecoderNode ──► EventRing ──► FilterNode ──► EventRing ──► SinkNode
//!      │                              │                            │                          │
//!      └──────────────────── NodeEvent ─► AudioPipeline (control plane) ◄──────────────────────┘
//! ```
//!
//! # Building blocks
//!
//! - [`EventSignal`](event_signal::EventSignal) - multi-condition wake primitive
//! - [`ByteRing`](byte_ring::ByteRing) - fixed-capacity byte FIFO for callback producers
//! - [`EventRing`](event_ring::EventRing) - packet queue with byte accounting and prefill gates
//! - [`Node`](node::Node) - lifecycle and mailbox around a [`NodeBehavior`](node::NodeBehavior)
//! - [`AudioPipeline`](pipeline::AudioPipeline) - registry, stream ids and failure policy
//! - [`Player`](player::Player) - playlist facade over the standard chain
//!
//! # Features
//!
//! - `std`: host builds (platform mocks)
//! - `mp3`: MP3 decoding via `nanomp3`
//! - `defmt`: log over defmt on hardware
//! - `tracing`: log over tracing in the desktop emulator
//! - `embassy`: spawn node workers on the embassy executor

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod buffer;
pub mod byte_ring;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event_ring;
pub mod event_signal;
pub mod format;
pub mod node;
pub mod nodes;
pub mod outbox;
pub mod packet;
pub mod pipeline;
pub mod player;
mod sample;
pub mod spawner;
pub mod timeout;
pub mod volume;

pub use config::{ConfigError, PipelineConfig};
pub use error::{RingError, StreamError};
pub use event_ring::EventRing;
pub use format::{CodecType, StreamFormat};
pub use node::{Node, NodeBehavior, NodeContext, NodeState, Step, Transition};
pub use packet::{NewStream, StreamId, StreamPacket};
pub use pipeline::{AudioPipeline, Disposition, NodeEvent, PipelineError, PipelineEvent};
pub use player::{Player, PlayerError, PlayerState};
pub use spawner::{SpawnError, TaskSpawner};
pub use timeout::Timeout;
