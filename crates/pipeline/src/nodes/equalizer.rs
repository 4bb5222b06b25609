//! Ten-band graphic equalizer.
//!
//! A cascade of peaking biquads per channel, one per band, centred on
//! [`EQ_BAND_FREQS`]. Band gains are clamped to
//! [`EQ_GAIN_MIN_DB`]..=[`EQ_GAIN_MAX_DB`]; the preamp is applied before the
//! cascade so boosts can be offset without clipping.

use alloc::vec::Vec;

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type};
use platform::config::{EQ_BAND_COUNT, EQ_BAND_FREQS, EQ_GAIN_MAX_DB, EQ_GAIN_MIN_DB};

use super::filter::PcmProcessor;
use crate::format::StreamFormat;
use crate::sample::SampleLayout;

/// Identity coefficients.
const PASSTHROUGH: Coefficients<f32> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

/// Bandwidth of every band; roughly one octave.
const BAND_Q: f32 = 1.41;

/// Gains closer to 0 dB than this leave a band out of the cascade.
const FLAT_DB: f32 = 0.01;

/// Commands accepted by an [`Equalizer`] filter node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EqCommand {
    /// Set one band's gain in dB (clamped).
    SetGain {
        /// Band index, 0 = lowest
        band: usize,
        /// Gain in dB
        gain_db: f32,
    },
    /// Set every band at once.
    SetGains([f32; EQ_BAND_COUNT]),
    /// Gain applied ahead of the bands, in dB (clamped).
    SetPreamp(f32),
    /// Pass audio through unmodified while `true`.
    Bypass(bool),
}

/// Peaking-biquad equalizer for 16-, 24- and 32-bit little-endian PCM.
pub struct Equalizer {
    gains: [f32; EQ_BAND_COUNT],
    preamp_db: f32,
    bypass: bool,
    layout: Option<SampleLayout>,
    sample_rate: u32,
    channels: usize,
    /// `channels * EQ_BAND_COUNT` filters, channel-major.
    filters: Vec<DirectForm1<f32>>,
    preamp: f32,
    dirty: bool,
}

impl Equalizer {
    /// Flat equalizer.
    pub fn new() -> Self {
        Self {
            gains: [0.0; EQ_BAND_COUNT],
            preamp_db: 0.0,
            bypass: false,
            layout: None,
            sample_rate: 0,
            channels: 0,
            filters: Vec::new(),
            preamp: 1.0,
            dirty: true,
        }
    }

    /// Set band `band` to `gain_db`, clamped to the supported range.
    ///
    /// Out-of-range band indices are ignored.
    pub fn set_gain(&mut self, band: usize, gain_db: f32) {
        if let Some(g) = self.gains.get_mut(band) {
            *g = gain_db.clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB);
            self.dirty = true;
        }
    }

    /// Set the preamp gain, clamped like a band gain.
    pub fn set_preamp(&mut self, gain_db: f32) {
        self.preamp_db = gain_db.clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB);
        self.dirty = true;
    }

    /// Current band gains in dB.
    pub fn gains(&self) -> &[f32; EQ_BAND_COUNT] {
        &self.gains
    }

    /// Current preamp gain in dB.
    pub fn preamp(&self) -> f32 {
        self.preamp_db
    }

    /// `true` when processing would change the signal.
    pub fn is_active(&self) -> bool {
        !self.bypass
            && self.layout.is_some()
            && (self.preamp_db.abs() >= FLAT_DB || self.gains.iter().any(|g| g.abs() >= FLAT_DB))
    }

    #[allow(clippy::cast_precision_loss)] // Safety: sample rates fit f32 exactly
    fn update_coefficients(&mut self) {
        let fs = self.sample_rate as f32;
        let coeffs: Vec<Coefficients<f32>> = self
            .gains
            .iter()
            .zip(EQ_BAND_FREQS.iter())
            .map(|(&gain, &freq)| {
                if gain.abs() < FLAT_DB {
                    return PASSTHROUGH;
                }
                // bands above Nyquist are rejected by the designer
                Coefficients::<f32>::from_params(Type::PeakingEQ(gain), fs.hz(), freq.hz(), BAND_Q)
                    .unwrap_or(PASSTHROUGH)
            })
            .collect();
        self.filters = (0..self.channels)
            .flat_map(|_| coeffs.iter().map(|c| DirectForm1::<f32>::new(*c)))
            .collect();
        self.preamp = libm::powf(10.0, self.preamp_db / 20.0);
        self.dirty = false;
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmProcessor for Equalizer {
    type Command = EqCommand;

    fn configure(&mut self, format: &StreamFormat) {
        self.layout = SampleLayout::of(format).filter(|_| format.sample_rate > 0);
        self.sample_rate = format.sample_rate;
        self.channels = usize::from(format.channels);
        self.dirty = true;
        if self.layout.is_none() {
            debug!("eq: passthrough for {}", format.codec.as_str());
        }
    }

    fn process(&mut self, pcm: &mut [u8]) {
        if !self.is_active() {
            return;
        }
        let Some(layout) = self.layout else {
            return;
        };
        if self.dirty {
            self.update_coefficients();
        }
        let width = layout.width();
        let frame = width.saturating_mul(self.channels);
        let preamp = self.preamp;
        for frame in pcm.chunks_exact_mut(frame) {
            for (sample, bands) in frame
                .chunks_exact_mut(width)
                .zip(self.filters.chunks_exact_mut(EQ_BAND_COUNT))
            {
                let mut x = layout.read(sample) * preamp;
                for f in bands.iter_mut() {
                    x = f.run(x);
                }
                layout.write(sample, x);
            }
        }
    }

    fn reset(&mut self) {
        self.dirty = true;
    }

    fn apply(&mut self, cmd: EqCommand) {
        match cmd {
            EqCommand::SetGain { band, gain_db } => self.set_gain(band, gain_db),
            EqCommand::SetGains(gains) => {
                for (band, gain_db) in gains.into_iter().enumerate() {
                    self.set_gain(band, gain_db);
                }
            }
            EqCommand::SetPreamp(gain_db) => self.set_preamp(gain_db),
            EqCommand::Bypass(on) => {
                self.bypass = on;
                self.dirty = true;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames * 4);
        for n in 0..frames {
            let t = n as f32 / rate as f32;
            let s = (libm::sinf(2.0 * core::f32::consts::PI * freq * t) * 8_000.0) as i16;
            out.extend_from_slice(&s.to_le_bytes());
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    fn peak(pcm: &[u8]) -> i32 {
        pcm.chunks_exact(2)
            .map(|b| i32::from(i16::from_le_bytes([b[0], b[1]])).abs())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_gain_is_clamped() {
        let mut eq = Equalizer::new();
        eq.set_gain(0, 40.0);
        eq.set_gain(1, -60.0);
        eq.set_gain(99, 3.0);
        assert!((eq.gains()[0] - EQ_GAIN_MAX_DB).abs() < f32::EPSILON);
        assert!((eq.gains()[1] - EQ_GAIN_MIN_DB).abs() < f32::EPSILON);
    }

    #[test]
    fn test_flat_eq_is_bit_exact() {
        let mut eq = Equalizer::new();
        eq.configure(&StreamFormat::pcm(44_100, 16, 2));
        let original = sine(1_000.0, 44_100, 512);
        let mut pcm = original.clone();
        eq.process(&mut pcm);
        assert_eq!(pcm, original);
    }

    #[test]
    fn test_cut_attenuates_band_centre() {
        let mut eq = Equalizer::new();
        eq.configure(&StreamFormat::pcm(44_100, 16, 2));
        eq.apply(EqCommand::SetGain {
            band: 5,
            gain_db: -12.0,
        });
        let original = sine(1_000.0, 44_100, 4_410);
        let mut pcm = original.clone();
        eq.process(&mut pcm);
        // skip the filter's settling time
        let settled = &pcm[pcm.len() / 2..];
        assert!(peak(settled) < peak(&original) / 2);
    }

    #[test]
    fn test_compressed_stream_passes_through() {
        let mut eq = Equalizer::new();
        eq.set_gain(3, 6.0);
        eq.configure(&StreamFormat::codec(crate::format::CodecType::Mp3));
        assert!(!eq.is_active());
        let mut bytes = vec![0xFF, 0xFB, 0x90, 0x00];
        eq.process(&mut bytes);
        assert_eq!(bytes, vec![0xFF, 0xFB, 0x90, 0x00]);
    }

    #[test]
    fn test_bypass_disables_processing() {
        let mut eq = Equalizer::new();
        eq.configure(&StreamFormat::pcm(48_000, 16, 2));
        eq.apply(EqCommand::SetGains([6.0; EQ_BAND_COUNT]));
        assert!(eq.is_active());
        eq.apply(EqCommand::Bypass(true));
        assert!(!eq.is_active());
    }
}
