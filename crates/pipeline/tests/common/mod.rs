//! Shared fixtures for pipeline integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pipeline::buffer::DataBuf;
use pipeline::spawner::BoxedTask;
use pipeline::{PipelineConfig, SpawnError, StreamPacket, TaskSpawner};

/// Runs node workers on the test's tokio runtime and counts them.
#[derive(Default)]
pub struct TokioSpawner {
    spawned: AtomicUsize,
}

impl TokioSpawner {
    /// Worker tasks started so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, _name: &'static str, task: BoxedTask) -> Result<(), SpawnError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(task);
        Ok(())
    }
}

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Small, fast settings: no fades, short backoff, generous pull timeout.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        ring_packets: 16,
        ring_bytes: 16 * 1024,
        out_packet_size: 1024,
        sink_chunk: 512,
        pull_timeout_ms: 1_000,
        fade_ms: 0,
        prefill_bytes: 2048,
        backoff_initial_ms: 1,
        backoff_max_ms: 4,
        ..PipelineConfig::DEFAULT
    }
}

pub fn data(bytes: &[u8]) -> StreamPacket {
    StreamPacket::Data(DataBuf::from(bytes))
}

/// 16-bit PCM whose frames are never all-zero, so inserted silence can be
/// told apart from payload.
pub fn pcm16(frames: usize, channels: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * usize::from(channels) * 2);
    for n in 0..frames {
        let s = ((n % 250) as i16 + 1) * 100;
        for _ in 0..channels {
            out.extend_from_slice(&s.to_le_bytes());
        }
    }
    out
}

/// A canonical 44-byte-header WAVE file around `payload`.
pub fn wav(sample_rate: u32, bits: u16, channels: u16, payload: &[u8]) -> Vec<u8> {
    let block_align = channels * bits / 8;
    let mut out = Vec::with_capacity(44 + payload.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + payload.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// `pcm` with every all-zero frame of `frame` bytes removed.
pub fn without_silence(pcm: &[u8], frame: usize) -> Vec<u8> {
    pcm.chunks(frame)
        .filter(|f| f.iter().any(|&b| b != 0))
        .flatten()
        .copied()
        .collect()
}

/// Poll `cond` until it holds or [`PATIENCE`] runs out.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < PATIENCE {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
