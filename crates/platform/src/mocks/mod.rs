//! Mock implementations for testing
//!
//! This module provides mock implementations of the platform traits
//! for use in unit and integration tests. Each mock records what the
//! pipeline did to it behind a shared log, so a test can move the
//! mock into a node and still inspect it afterwards.

#![cfg(any(test, feature = "std"))]
#![allow(clippy::arithmetic_side_effects, clippy::cast_possible_truncation)]

use std::string::String;
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use embassy_time::{Duration, Timer};

use crate::audio::{AudioConfig, PcmOutput};
use crate::source::{ByteSource, InlineTitle, ReadChunk, SourceInfo};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── MockOutput ───────────────────────────────────────────────────────────────

/// Everything a [`MockOutput`] has been asked to do.
#[derive(Debug, Default, Clone)]
pub struct OutputLog {
    /// Configurations accepted, in order
    pub configs: Vec<AudioConfig>,
    /// Configurations rejected, in order
    pub rejected: Vec<AudioConfig>,
    /// Concatenation of all written PCM bytes
    pub bytes: Vec<u8>,
    /// Number of `write` calls
    pub writes: usize,
    /// Number of `start` calls
    pub starts: usize,
    /// Number of `stop` calls
    pub stops: usize,
    /// Output currently started
    pub running: bool,
}

/// Mock PCM output recording configuration and samples.
#[derive(Clone)]
pub struct MockOutput {
    log: Arc<Mutex<OutputLog>>,
    accepted_bits: &'static [u8],
    write_delay: Option<Duration>,
    max_write: usize,
}

/// Error returned by [`MockOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutputError {
    /// Bit depth not in the accepted set
    UnsupportedFormat,
}

impl MockOutput {
    /// Output accepting 16, 24 and 32 bit samples.
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(OutputLog::default())),
            accepted_bits: &[16, 24, 32],
            write_delay: None,
            max_write: usize::MAX,
        }
    }

    /// Restrict the accepted bit depths, like an I2S peripheral wired for
    /// a single slot width.
    #[must_use]
    pub fn accepting_bits(mut self, bits: &'static [u8]) -> Self {
        self.accepted_bits = bits;
        self
    }

    /// Delay every write, emulating a DMA buffer draining in real time.
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Take at most `bytes` per write, like a DMA ring with that much room.
    #[must_use]
    pub fn with_max_write(mut self, bytes: usize) -> Self {
        self.max_write = bytes.max(1);
        self
    }

    /// Snapshot of the recorded calls.
    pub fn log(&self) -> OutputLog {
        lock(&self.log).clone()
    }

    /// All PCM bytes written so far.
    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.log).bytes.clone()
    }

    /// Number of bytes written so far.
    pub fn byte_count(&self) -> usize {
        lock(&self.log).bytes.len()
    }
}

impl Default for MockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmOutput for MockOutput {
    type Error = MockOutputError;

    async fn configure(&mut self, config: AudioConfig) -> Result<(), Self::Error> {
        let mut log = lock(&self.log);
        if config.validate().is_err() || !self.accepted_bits.contains(&config.bit_depth) {
            log.rejected.push(config);
            return Err(MockOutputError::UnsupportedFormat);
        }
        log.configs.push(config);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), Self::Error> {
        let mut log = lock(&self.log);
        log.starts += 1;
        log.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        let mut log = lock(&self.log);
        log.stops += 1;
        log.running = false;
        Ok(())
    }

    async fn write(&mut self, pcm: &[u8]) -> Result<usize, Self::Error> {
        // a write cancelled during the delay never reached the device
        if let Some(delay) = self.write_delay {
            Timer::after(delay).await;
        }
        let taken = pcm.len().min(self.max_write);
        let mut log = lock(&self.log);
        log.writes += 1;
        log.bytes.extend_from_slice(pcm.get(..taken).unwrap_or_default());
        Ok(taken)
    }
}

// ── MockSource ───────────────────────────────────────────────────────────────

/// One resource served by a [`MockSource`].
#[derive(Debug, Clone)]
pub struct MockTrack {
    /// Locator the track is served under
    pub locator: String,
    /// Reported content type
    pub content_type: &'static str,
    /// Reported bitrate
    pub bitrate: Option<u32>,
    /// Track body
    pub body: Vec<u8>,
    /// In-band titles as (absolute byte offset, title)
    pub titles: Vec<(u64, String)>,
}

impl MockTrack {
    /// Track with no metadata.
    pub fn new(locator: &str, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            locator: locator.into(),
            content_type,
            bitrate: None,
            body,
            titles: Vec::new(),
        }
    }

    /// Set the reported bitrate.
    #[must_use]
    pub fn with_bitrate(mut self, bps: u32) -> Self {
        self.bitrate = Some(bps);
        self
    }

    /// Add an in-band title taking effect at `offset`.
    #[must_use]
    pub fn with_title(mut self, offset: u64, title: &str) -> Self {
        self.titles.push((offset, title.into()));
        self
    }
}

/// Connection attempts seen by a [`MockSource`].
#[derive(Debug, Default, Clone)]
pub struct SourceLog {
    /// `(locator, offset)` per connect call, including failed ones
    pub connects: Vec<(String, u64)>,
    /// Number of disconnect calls
    pub disconnects: usize,
}

/// Error returned by [`MockSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSourceError {
    /// Unknown locator
    NotFound,
    /// Scripted connection failure
    Refused,
    /// Read without a connection
    NotConnected,
    /// Scripted mid-stream connection drop
    Reset,
}

/// In-memory byte source serving a fixed set of tracks.
pub struct MockSource {
    tracks: Vec<MockTrack>,
    current: Option<(usize, u64)>,
    chunk: usize,
    refuse_connects: u32,
    drop_at: Option<u64>,
    read_delay: Option<Duration>,
    log: Arc<Mutex<SourceLog>>,
}

impl MockSource {
    /// Source serving `tracks` in reads of at most `chunk` bytes.
    pub fn new(tracks: Vec<MockTrack>, chunk: usize) -> Self {
        Self {
            tracks,
            current: None,
            chunk: chunk.max(1),
            refuse_connects: 0,
            drop_at: None,
            read_delay: None,
            log: Arc::new(Mutex::new(SourceLog::default())),
        }
    }

    /// Refuse the first `n` connection attempts.
    #[must_use]
    pub fn refusing_first(mut self, n: u32) -> Self {
        self.refuse_connects = n;
        self
    }

    /// Drop the connection once, when the read position reaches `offset`.
    #[must_use]
    pub fn dropping_at(mut self, offset: u64) -> Self {
        self.drop_at = Some(offset);
        self
    }

    /// Delay every read.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Shared handle to the connection log.
    pub fn shared_log(&self) -> Arc<Mutex<SourceLog>> {
        Arc::clone(&self.log)
    }
}

impl ByteSource for MockSource {
    type Error = MockSourceError;

    async fn connect(&mut self, locator: &str, offset: u64) -> Result<SourceInfo, Self::Error> {
        lock(&self.log).connects.push((locator.into(), offset));
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            return Err(MockSourceError::Refused);
        }
        let index = self
            .tracks
            .iter()
            .position(|t| t.locator == locator)
            .ok_or(MockSourceError::NotFound)?;
        let track = self.tracks.get(index).ok_or(MockSourceError::NotFound)?;
        let mut info = SourceInfo {
            bitrate: track.bitrate,
            length: Some(track.body.len() as u64),
            ..SourceInfo::default()
        };
        let _ = info.content_type.push_str(track.content_type);
        self.current = Some((index, offset.min(track.body.len() as u64)));
        Ok(info)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<ReadChunk, Self::Error> {
        if let Some(delay) = self.read_delay {
            Timer::after(delay).await;
        }
        let (index, pos) = self.current.ok_or(MockSourceError::NotConnected)?;
        if let Some(at) = self.drop_at {
            if pos >= at {
                self.drop_at = None;
                self.current = None;
                return Err(MockSourceError::Reset);
            }
        }
        let track = self.tracks.get(index).ok_or(MockSourceError::NotConnected)?;
        let start = usize::try_from(pos).map_err(|_| MockSourceError::NotConnected)?;
        let rest = track.body.get(start..).unwrap_or(&[]);
        let mut n = rest.len().min(buf.len()).min(self.chunk);
        if let Some(at) = self.drop_at {
            // stop short of the drop point so the next read observes it
            let until = usize::try_from(at.saturating_sub(pos)).unwrap_or(usize::MAX);
            if until > 0 {
                n = n.min(until);
            }
        }
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), rest.get(..n)) {
            dst.copy_from_slice(src);
        }
        let end = pos + n as u64;
        let metadata = track
            .titles
            .iter()
            .find(|(off, _)| *off >= pos && *off < end)
            .map(|(off, title)| {
                let mut t = heapless::String::new();
                let _ = t.push_str(title);
                InlineTitle {
                    offset: usize::try_from(off - pos).unwrap_or(0),
                    title: t,
                }
            });
        self.current = Some((index, end));
        Ok(ReadChunk { len: n, metadata })
    }

    async fn disconnect(&mut self) {
        lock(&self.log).disconnects += 1;
        self.current = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_output_records_and_rejects() {
        let mut out = MockOutput::new().accepting_bits(&[16]);
        let view = out.clone();
        assert!(out.configure(AudioConfig::default()).await.is_ok());
        let hi_res = AudioConfig {
            bit_depth: 24,
            ..AudioConfig::default()
        };
        assert_eq!(
            out.configure(hi_res).await,
            Err(MockOutputError::UnsupportedFormat)
        );
        out.start().await.unwrap();
        out.write(&[1, 2, 3, 4]).await.unwrap();
        let log = view.log();
        assert_eq!(log.configs.len(), 1);
        assert_eq!(log.rejected.len(), 1);
        assert_eq!(log.bytes, vec![1, 2, 3, 4]);
        assert!(log.running);
    }

    #[tokio::test]
    async fn test_mock_output_takes_a_prefix_when_short_of_room() {
        let mut out = MockOutput::new().with_max_write(3);
        assert_eq!(out.write(&[1, 2, 3, 4, 5]).await, Ok(3));
        assert_eq!(out.write(&[4, 5]).await, Ok(2));
        assert_eq!(out.bytes(), vec![1, 2, 3, 4, 5]);
        assert_eq!(out.log().writes, 2);
    }

    #[tokio::test]
    async fn test_mock_source_serves_chunks_and_titles() {
        let track = MockTrack::new("http://radio/a", "audio/mpeg", (0u8..20).collect())
            .with_title(7, "Song");
        let mut src = MockSource::new(vec![track], 8);
        let info = src.connect("http://radio/a", 0).await.unwrap();
        assert_eq!(info.content_type.as_str(), "audio/mpeg");

        let mut buf = [0u8; 16];
        let first = src.read(&mut buf).await.unwrap();
        assert_eq!(first.len, 8);
        let title = first.metadata.unwrap();
        assert_eq!(title.offset, 7);
        assert_eq!(title.title.as_str(), "Song");

        let second = src.read(&mut buf).await.unwrap();
        assert_eq!(second.len, 8);
        assert_eq!(buf[0], 8);
        let third = src.read(&mut buf).await.unwrap();
        assert_eq!(third.len, 4);
        let eof = src.read(&mut buf).await.unwrap();
        assert_eq!(eof.len, 0);
    }

    #[tokio::test]
    async fn test_mock_source_scripted_failures() {
        let track = MockTrack::new("a", "audio/wav", vec![0u8; 32]);
        let mut src = MockSource::new(vec![track], 16)
            .refusing_first(1)
            .dropping_at(16);
        assert_eq!(src.connect("a", 0).await, Err(MockSourceError::Refused));
        src.connect("a", 0).await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(src.read(&mut buf).await.unwrap().len, 16);
        assert_eq!(src.read(&mut buf).await, Err(MockSourceError::Reset));
        src.connect("a", 16).await.unwrap();
        assert_eq!(src.read(&mut buf).await.unwrap().len, 16);
        assert_eq!(src.shared_log().lock().unwrap().connects.len(), 3);
        assert_eq!(src.connect("missing", 0).await, Err(MockSourceError::NotFound));
    }
}
