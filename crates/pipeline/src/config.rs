//! Pipeline tuning parameters.
//!
//! One [`PipelineConfig`] is handed to the
//! [`AudioPipeline`](crate::pipeline::AudioPipeline) and shared with every
//! node through its context. [`PipelineConfig::DEFAULT`] suits a 44.1 kHz
//! stereo network stream on a part with a few hundred KiB of RAM.

use embassy_time::Duration;
use thiserror_no_std::Error;

use crate::timeout::Timeout;

/// Tuning knobs shared by the nodes of one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipelineConfig {
    /// Packets one inter-node queue may hold.
    pub ring_packets: usize,
    /// Data bytes one inter-node queue may hold.
    pub ring_bytes: usize,
    /// Largest `Data` packet a producer emits.
    pub out_packet_size: usize,
    /// Bytes the sink pulls and writes per step.
    pub sink_chunk: usize,
    /// How long the sink waits for data before writing silence.
    pub pull_timeout_ms: u32,
    /// Fade-in / fade-out length around stream boundaries.
    pub fade_ms: u16,
    /// Bytes a source buffers before downstream may start; 0 disables prefill.
    pub prefill_bytes: usize,
    /// First reconnect delay.
    pub backoff_initial_ms: u32,
    /// Reconnect delay ceiling.
    pub backoff_max_ms: u32,
    /// Connection attempts before a source gives up.
    pub connect_attempts: u8,
    /// Re-synchronisation attempts before a decoder gives up.
    pub resync_attempts: u8,
    /// Failures in a row before a session is ended.
    pub max_consecutive_failures: u8,
    /// Period of level reports while the sink's meter is enabled.
    pub level_interval_ms: u16,
}

impl PipelineConfig {
    /// Defaults for a networked 44.1 kHz player.
    pub const DEFAULT: Self = Self {
        ring_packets: 64,
        ring_bytes: 64 * 1024,
        out_packet_size: 4096,
        sink_chunk: 2048,
        pull_timeout_ms: 200,
        fade_ms: 20,
        prefill_bytes: 16 * 1024,
        backoff_initial_ms: 250,
        backoff_max_ms: 8_000,
        connect_attempts: 6,
        resync_attempts: 8,
        max_consecutive_failures: 3,
        level_interval_ms: 50,
    };

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// The first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("ring_packets", self.ring_packets),
            ("ring_bytes", self.ring_bytes),
            ("out_packet_size", self.out_packet_size),
            ("sink_chunk", self.sink_chunk),
            ("connect_attempts", usize::from(self.connect_attempts)),
            ("max_consecutive_failures", usize::from(self.max_consecutive_failures)),
            ("level_interval_ms", usize::from(self.level_interval_ms)),
        ];
        if let Some((field, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.ring_packets < 4 {
            return Err(ConfigError::QueueTooShallow {
                packets: self.ring_packets,
            });
        }
        // the gate opens at the threshold, so one more packet must still fit
        if self.prefill_bytes > 0 && self.prefill_bytes.saturating_add(self.out_packet_size) > self.ring_bytes {
            return Err(ConfigError::PrefillExceedsRing {
                prefill: self.prefill_bytes,
                ring: self.ring_bytes,
            });
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::BackoffOrder);
        }
        Ok(())
    }

    /// Sink pull timeout.
    pub fn pull_timeout(&self) -> Timeout {
        Timeout::After(Duration::from_millis(u64::from(self.pull_timeout_ms)))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rejected [`PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A size or count that must be positive is 0.
    #[error("{field} must be non-zero")]
    Zero {
        /// Offending field
        field: &'static str,
    },
    /// Queues this shallow cannot hold a stream header, a gate and data.
    #[error("queue depth {packets} is below the minimum of 4")]
    QueueTooShallow {
        /// Configured depth
        packets: usize,
    },
    /// The prefill threshold plus one packet does not fit the ring.
    #[error("prefill of {prefill} bytes leaves no packet of room in ring capacity {ring}")]
    PrefillExceedsRing {
        /// Prefill threshold
        prefill: usize,
        /// Ring byte capacity
        ring: usize,
    },
    /// Initial backoff delay above the ceiling.
    #[error("initial backoff exceeds maximum backoff")]
    BackoffOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(PipelineConfig::DEFAULT.validate(), Ok(()));
    }

    #[test]
    fn test_zero_sizes_are_named() {
        let cfg = PipelineConfig {
            sink_chunk: 0,
            ..PipelineConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { field: "sink_chunk" }));
        let cfg = PipelineConfig {
            level_interval_ms: 0,
            ..PipelineConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Zero { field: "level_interval_ms" }));
    }

    #[test]
    fn test_unreachable_prefill_is_rejected() {
        let cfg = PipelineConfig {
            prefill_bytes: 1 << 20,
            ..PipelineConfig::DEFAULT
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::PrefillExceedsRing { .. })));
    }

    #[test]
    fn test_prefill_must_leave_room_for_one_packet() {
        let full = PipelineConfig {
            ring_bytes: 10_000,
            out_packet_size: 4096,
            prefill_bytes: 10_000,
            ..PipelineConfig::DEFAULT
        };
        assert_eq!(
            full.validate(),
            Err(ConfigError::PrefillExceedsRing {
                prefill: 10_000,
                ring: 10_000,
            })
        );
        let tight = PipelineConfig {
            prefill_bytes: 5_904,
            ..full
        };
        assert_eq!(tight.validate(), Ok(()));
        let disabled = PipelineConfig {
            prefill_bytes: 0,
            out_packet_size: 1 << 20,
            ..full
        };
        assert_eq!(disabled.validate(), Ok(()));
    }

    #[test]
    fn test_backoff_must_be_ordered() {
        let cfg = PipelineConfig {
            backoff_initial_ms: 10_000,
            ..PipelineConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::BackoffOrder));
    }
}
