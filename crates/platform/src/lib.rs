//! Hardware Abstraction Layer (HAL) for the `SoulAudio` streaming player
//!
//! This crate provides trait-based abstractions for the hardware and
//! transport edges of the audio pipeline, enabling development and testing
//! without physical hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (firmware crate)
//!         ↓
//! Pipeline (source → decoder → equalizer → sink nodes)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (Embassy HAL + PAC, network stack)
//! ```
//!
//! # Abstractions
//!
//! - [`PcmOutput`] - I2S / DAC sample output
//! - [`ByteSource`] - HTTP, file or music-service byte input
//!
//! # Features
//!
//! - `std`: Enable standard library support and the [`mocks`] module
//! - `defmt`: Enable defmt logging derives
//!
//! # Example
//!
//! ```no_run
//! use platform::{AudioConfig, PcmOutput};
//!
//! async fn example<O: PcmOutput>(out: &mut O) {
//!     out.configure(AudioConfig::default()).await.ok();
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide

#[cfg(all(feature = "std", not(test)))]
extern crate std;

pub mod audio;
pub mod audio_types;
pub mod config;
pub mod mocks;
pub mod source;

pub use audio::{AudioConfig, PcmOutput};
pub use audio_types::{Attenuation, OutOfRangeError, SampleRateHz, VolumePercent};
pub use source::{ByteSource, InlineTitle, Locator, ReadChunk, SourceInfo};
