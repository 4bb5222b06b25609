//! Software volume and fades.
//!
//! Volume uses the same 0.5 dB attenuation scale as the master attenuation
//! register of an I2S DAC, so a hardware-volume build and the software sink
//! agree on loudness for every [`VolumePercent`]:
//!
//! | `volume` | Attenuation | Gain      |
//! |----------|-------------|-----------|
//! | 0%       | 255 (mute)  | 0.0       |
//! | 50%      | 127         | ≈ −63.5 dB |
//! | 100%     | 0           | 1.0       |

use platform::audio_types::{Attenuation, VolumePercent};

use crate::format::StreamFormat;
use crate::sample::SampleLayout;

/// Linear amplitude factor for `att`.
pub fn linear_gain(att: Attenuation) -> f32 {
    if att.is_mute() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)] // Safety: |millibels| <= 12750
    let db = att.millibels() as f32 / 100.0;
    libm::powf(10.0, db / 20.0)
}

/// Linear amplitude factor for a user volume.
pub fn volume_to_gain(volume: VolumePercent) -> f32 {
    linear_gain(Attenuation::from_volume(volume))
}

/// Per-frame linear gain ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    level: f32,
    target: f32,
    step: f32,
}

impl Fade {
    /// Full level, no ramp in progress.
    pub const UNITY: Self = Self {
        level: 1.0,
        target: 1.0,
        step: 0.0,
    };

    /// Ramp from silence to full level over `frames`.
    pub fn fade_in(frames: u32) -> Self {
        Self::ramp(0.0, 1.0, frames)
    }

    /// Ramp from the current level down to silence over `frames`.
    #[must_use]
    pub fn fade_out(self, frames: u32) -> Self {
        Self::ramp(self.level, 0.0, frames)
    }

    fn ramp(from: f32, to: f32, frames: u32) -> Self {
        if frames == 0 {
            return Self {
                level: to,
                target: to,
                step: 0.0,
            };
        }
        #[allow(clippy::cast_precision_loss)] // Safety: fade lengths are far below 2^24 frames
        let step = (to - from) / frames as f32;
        Self {
            level: from,
            target: to,
            step,
        }
    }

    /// Current level.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// `true` while the level is still moving.
    pub fn is_ramping(&self) -> bool {
        self.step != 0.0
    }

    /// `true` once a fade-out has reached silence.
    pub fn is_silent(&self) -> bool {
        !self.is_ramping() && self.level <= 0.0
    }

    /// Level for the next frame.
    fn advance(&mut self) -> f32 {
        let level = self.level;
        if self.is_ramping() {
            self.level += self.step;
            let passed = if self.step > 0.0 {
                self.level >= self.target
            } else {
                self.level <= self.target
            };
            if passed {
                self.level = self.target;
                self.step = 0.0;
            }
        }
        level
    }
}

impl Default for Fade {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Scale the interleaved PCM in `pcm` by `gain` and the fade ramp.
///
/// Formats the software path cannot process are left untouched.
pub fn apply_gain(pcm: &mut [u8], format: &StreamFormat, gain: f32, fade: &mut Fade) {
    if !fade.is_ramping() && (gain * fade.level() - 1.0).abs() < f32::EPSILON {
        return;
    }
    let Some(layout) = SampleLayout::of(format) else {
        return;
    };
    let width = layout.width();
    let frame = width.saturating_mul(usize::from(format.channels));
    for frame in pcm.chunks_exact_mut(frame) {
        let g = gain * fade.advance();
        for sample in frame.chunks_exact_mut(width) {
            layout.write(sample, layout.read(sample) * g);
        }
    }
}

/// Where a [`LevelMeter`] taps the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeasurePoint {
    /// Decoded level, unaffected by volume and mute.
    BeforeVolume,
    /// Level as written to the output.
    AfterVolume,
}

/// Peak sample magnitude per channel, `0..=32768` on the 16-bit scale.
///
/// Mono streams report the same peak on both channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StereoLevels {
    /// Left (first) channel
    pub left: u16,
    /// Right (second) channel
    pub right: u16,
}

impl StereoLevels {
    /// Silence.
    pub const ZERO: Self = Self { left: 0, right: 0 };
}

/// Running peak meter reporting once per window of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelMeter {
    point: MeasurePoint,
    peaks: StereoLevels,
    frames: u32,
}

impl LevelMeter {
    /// Meter tapping the signal at `point`.
    pub fn new(point: MeasurePoint) -> Self {
        Self {
            point,
            peaks: StereoLevels::ZERO,
            frames: 0,
        }
    }

    /// Where this meter taps the signal.
    pub fn point(&self) -> MeasurePoint {
        self.point
    }

    /// Fold the frames of `pcm` into the running peaks.
    ///
    /// Returns the peaks once `window` frames have been seen, and starts a
    /// new window. Formats the software path cannot read are not metered.
    pub fn measure(&mut self, pcm: &[u8], format: &StreamFormat, window: u32) -> Option<StereoLevels> {
        let layout = SampleLayout::of(format)?;
        let width = layout.width();
        let mono = format.channels == 1;
        for frame in pcm.chunks_exact(width.saturating_mul(usize::from(format.channels))) {
            let mut samples = frame.chunks_exact(width).map(|s| to_level(layout.read(s)));
            let left = samples.next().unwrap_or(0);
            let right = if mono { left } else { samples.next().unwrap_or(0) };
            self.peaks.left = self.peaks.left.max(left);
            self.peaks.right = self.peaks.right.max(right);
            self.frames = self.frames.saturating_add(1);
        }
        if self.frames < window.max(1) {
            return None;
        }
        let levels = self.peaks;
        self.clear();
        Some(levels)
    }

    /// Drop the current window.
    pub fn clear(&mut self) {
        self.peaks = StereoLevels::ZERO;
        self.frames = 0;
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Safety: clamped to 0..=32768
fn to_level(v: f32) -> u16 {
    (v.abs() * 32_768.0).min(32_768.0) as u16
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn s16(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
    }

    #[test]
    fn test_full_volume_is_unity_and_zero_is_mute() {
        assert!((volume_to_gain(VolumePercent::MAX) - 1.0).abs() < f32::EPSILON);
        assert!(volume_to_gain(VolumePercent::new(0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_gain_is_monotonic_in_volume() {
        let mut last = 0.0;
        for v in 1..=100u8 {
            let g = volume_to_gain(VolumePercent::new(v));
            assert!(g >= last, "gain fell at {v}%");
            last = g;
        }
    }

    #[test]
    fn test_attenuation_steps_are_half_decibels() {
        // 96% → 10 steps → −5 dB
        let att = Attenuation::from_volume(VolumePercent::new(96));
        assert_eq!(att.get(), 10);
        let expected = libm::powf(10.0, -5.0 / 20.0);
        assert!((linear_gain(att) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_fade_in_ramps_frame_by_frame() {
        let fmt = StreamFormat::pcm(48_000, 16, 2);
        let mut pcm = Vec::new();
        for _ in 0..4 {
            pcm.extend_from_slice(&16_000i16.to_le_bytes());
            pcm.extend_from_slice(&16_000i16.to_le_bytes());
        }
        let mut fade = Fade::fade_in(4);
        apply_gain(&mut pcm, &fmt, 1.0, &mut fade);
        let out = s16(&pcm);
        assert_eq!(out[0], 0);
        assert_eq!(out[0], out[1]);
        assert!(out[2] > out[0] && out[4] > out[2] && out[6] > out[4]);
        assert!(!fade.is_ramping());
        assert!((fade.level() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_fade_out_ends_silent() {
        let fmt = StreamFormat::pcm(48_000, 16, 1);
        let mut pcm = vec![0x10u8; 2 * 8];
        let mut fade = Fade::UNITY.fade_out(4);
        apply_gain(&mut pcm, &fmt, 1.0, &mut fade);
        assert!(fade.is_silent());
        assert!(s16(&pcm)[4..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_unity_leaves_bytes_untouched() {
        let fmt = StreamFormat::pcm(44_100, 16, 2);
        let mut pcm = vec![0x12, 0x34, 0x56, 0x78];
        let mut fade = Fade::UNITY;
        apply_gain(&mut pcm, &fmt, 1.0, &mut fade);
        assert_eq!(pcm, vec![0x12, 0x34, 0x56, 0x78]);
    }

    fn frames(pairs: &[(i16, i16)]) -> Vec<u8> {
        pairs
            .iter()
            .flat_map(|&(l, r)| l.to_le_bytes().into_iter().chain(r.to_le_bytes()))
            .collect()
    }

    #[test]
    fn test_meter_reports_peaks_per_window() {
        let fmt = StreamFormat::pcm(48_000, 16, 2);
        let mut meter = LevelMeter::new(MeasurePoint::BeforeVolume);
        assert_eq!(meter.measure(&frames(&[(100, -3_000), (-200, 50)]), &fmt, 4), None);
        let levels = meter.measure(&frames(&[(i16::MIN, 0), (7, 8)]), &fmt, 4);
        assert_eq!(
            levels,
            Some(StereoLevels {
                left: 32_768,
                right: 3_000
            })
        );
        // the next window starts empty
        let levels = meter.measure(&frames(&[(10, 20)]), &fmt, 1);
        assert_eq!(levels, Some(StereoLevels { left: 10, right: 20 }));
    }

    #[test]
    fn test_mono_meter_reports_both_channels() {
        let fmt = StreamFormat::pcm(22_050, 16, 1);
        let pcm: Vec<u8> = [1_000i16, -4_000].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut meter = LevelMeter::new(MeasurePoint::AfterVolume);
        let levels = meter.measure(&pcm, &fmt, 2);
        assert_eq!(
            levels,
            Some(StereoLevels {
                left: 4_000,
                right: 4_000
            })
        );
    }

    #[test]
    fn test_cleared_meter_forgets_its_window() {
        let fmt = StreamFormat::pcm(44_100, 16, 2);
        let mut meter = LevelMeter::new(MeasurePoint::BeforeVolume);
        assert_eq!(meter.measure(&frames(&[(9_000, 9_000)]), &fmt, 2), None);
        meter.clear();
        let levels = meter.measure(&frames(&[(5, 6), (1, 2)]), &fmt, 2);
        assert_eq!(levels, Some(StereoLevels { left: 5, right: 6 }));
    }
}
