//! PCM output abstraction (I2S / DAC sinks)
//!
//! The pipeline's sink node is generic over [`PcmOutput`]. Hardware builds
//! implement it on top of the SAI/I2S DMA driver; host tests use
//! [`crate::mocks::MockOutput`].

use crate::audio_types::{OutOfRangeError, SampleRateHz};

/// PCM output device.
///
/// `write` receives interleaved little-endian samples in the format last
/// passed to [`configure`](PcmOutput::configure). Implementations may block
/// (await) until the hardware has room, then take as much of the slice as
/// fits.
pub trait PcmOutput: Send {
    /// Error type
    type Error: core::fmt::Debug;

    /// Reconfigure the output for a new sample format.
    ///
    /// Returning an error means the format is not supported; the caller
    /// treats that as a fatal format error for the current stream.
    fn configure(
        &mut self,
        config: AudioConfig,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Start clocking samples out
    fn start(&mut self) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Stop output and release the bus
    fn stop(&mut self) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Write a prefix of `pcm` and return its length.
    ///
    /// At least one byte is taken from non-empty input. A call dropped
    /// before it completes has taken nothing, so the caller resends the
    /// same bytes.
    fn write(
        &mut self,
        pcm: &[u8],
    ) -> impl core::future::Future<Output = Result<usize, Self::Error>> + Send;
}

/// Audio configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u8,
    /// Bit depth (16, 24 or 32)
    pub bit_depth: u8,
}

impl AudioConfig {
    /// Check the configuration against the ranges an I2S output can clock.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRangeError`] naming the first offending field value.
    pub fn validate(&self) -> Result<(), OutOfRangeError> {
        SampleRateHz::new(self.sample_rate)?;
        if self.channels == 0 || self.channels > 2 {
            return Err(OutOfRangeError {
                value: u32::from(self.channels),
                min: 1,
                max: 2,
            });
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(OutOfRangeError {
                value: u32::from(self.bit_depth),
                min: 16,
                max: 32,
            });
        }
        Ok(())
    }

    /// Bytes per interleaved frame as carried on the bus.
    ///
    /// 24-bit samples travel in 32-bit slots.
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        let slot = if self.bit_depth == 16 { 2 } else { 4 };
        usize::from(self.channels).saturating_mul(slot)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_cd_quality_and_valid() {
        let cfg = AudioConfig::default();
        assert_eq!(cfg.sample_rate, 44100);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bytes_per_frame(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut cfg = AudioConfig::default();
        cfg.sample_rate = 4000;
        assert_eq!(cfg.validate().unwrap_err().value, 4000);

        let mut cfg = AudioConfig::default();
        cfg.channels = 6;
        assert_eq!(cfg.validate().unwrap_err().max, 2);

        let mut cfg = AudioConfig::default();
        cfg.bit_depth = 8;
        assert_eq!(cfg.validate().unwrap_err().value, 8);
    }

    #[test]
    fn test_24_bit_uses_32_bit_slots() {
        let cfg = AudioConfig {
            sample_rate: 96000,
            channels: 2,
            bit_depth: 24,
        };
        assert_eq!(cfg.bytes_per_frame(), 8);
    }
}
