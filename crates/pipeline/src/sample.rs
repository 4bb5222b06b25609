//! Little-endian PCM sample access for in-place processing.

use crate::format::StreamFormat;

/// Sample encodings the software processors handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleLayout {
    S16,
    /// Packed 3-byte samples.
    S24,
    /// 32-bit slots, including left-aligned 24-bit.
    S32,
}

const SCALE_16: f32 = 32_768.0;
const SCALE_24: f32 = 8_388_608.0;
const SCALE_32: f32 = 2_147_483_648.0;

impl SampleLayout {
    /// Layout of `format`, or `None` for anything that is not
    /// little-endian PCM of a supported width.
    pub(crate) fn of(format: &StreamFormat) -> Option<Self> {
        if !format.is_pcm() || format.big_endian || format.channels == 0 {
            return None;
        }
        match format.bytes_per_sample() {
            2 => Some(Self::S16),
            3 => Some(Self::S24),
            4 => Some(Self::S32),
            _ => None,
        }
    }

    pub(crate) fn width(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 => 4,
        }
    }

    /// Sample at the start of `b`, scaled to [-1.0, 1.0).
    #[allow(clippy::cast_precision_loss)] // Safety: audio headroom, not exact integers
    pub(crate) fn read(self, b: &[u8]) -> f32 {
        match (self, b) {
            (Self::S16, [b0, b1, ..]) => f32::from(i16::from_le_bytes([*b0, *b1])) / SCALE_16,
            (Self::S24, [b0, b1, b2, ..]) => {
                // shift up then back down to sign-extend
                let v = i32::from_le_bytes([0, *b0, *b1, *b2]).wrapping_shr(8);
                v as f32 / SCALE_24
            }
            (Self::S32, [b0, b1, b2, b3, ..]) => i32::from_le_bytes([*b0, *b1, *b2, *b3]) as f32 / SCALE_32,
            _ => 0.0,
        }
    }

    /// Store `v` (clamped) at the start of `b`.
    #[allow(clippy::cast_possible_truncation)] // Safety: clamped to the target range first
    pub(crate) fn write(self, b: &mut [u8], v: f32) {
        let v = v.clamp(-1.0, 1.0);
        match self {
            Self::S16 => {
                let s = (v * SCALE_16).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
                if let Some(dst) = b.get_mut(..2) {
                    dst.copy_from_slice(&s.to_le_bytes());
                }
            }
            Self::S24 => {
                let s = (v * SCALE_24).clamp(-SCALE_24, SCALE_24 - 1.0) as i32;
                if let (Some(dst), Some(src)) = (b.get_mut(..3), s.to_le_bytes().get(..3)) {
                    dst.copy_from_slice(src);
                }
            }
            Self::S32 => {
                // f32 cannot represent i32::MAX; the cast saturates
                let s = (v * SCALE_32) as i32;
                if let Some(dst) = b.get_mut(..4) {
                    dst.copy_from_slice(&s.to_le_bytes());
                }
            }
        }
    }
}
