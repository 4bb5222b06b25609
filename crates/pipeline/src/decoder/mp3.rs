//! nanomp3-based MP3 decoder.
//!
//! nanomp3 is a pure-Rust, `no_std` c2rust translation of minimp3 with ARM
//! soundness fixes. `minimp3` / `minimp3-rs` / `minimp3-sys` are banned in
//! `deny.toml`; this is the approved replacement.
//!
//! `nanomp3::Decoder` keeps no input buffer of its own, so this wrapper
//! holds one and feeds it whole; nanomp3 skips leading garbage and reports
//! how much it consumed. Output is 16-bit little-endian PCM.

use alloc::vec;
use alloc::vec::Vec;

use super::{DecodeError, Decoded, Decoder, InputBuffer};
use crate::format::{CodecType, StreamFormat};

/// Largest MPEG-1 layer III frame (320 kbit/s at 32 kHz, padded).
const MAX_FRAME_BYTES: usize = 1441;

/// MP3 decoder backed by nanomp3.
pub struct Mp3Decoder {
    inner: nanomp3::Decoder,
    input: InputBuffer,
    /// Scratch for one frame of f32 samples.
    scratch: Vec<f32>,
    out: Vec<u8>,
}

impl Mp3Decoder {
    /// Decoder with an input buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: nanomp3::Decoder::new(),
            input: InputBuffer::new(capacity.max(MAX_FRAME_BYTES.saturating_mul(2))),
            scratch: vec![0.0; nanomp3::MAX_SAMPLES_PER_FRAME],
            out: Vec::with_capacity(nanomp3::MAX_SAMPLES_PER_FRAME.saturating_mul(2)),
        }
    }
}

impl Default for Mp3Decoder {
    fn default() -> Self {
        Self::new(super::DEFAULT_INPUT_CAPACITY)
    }
}

/// f32 in [-1.0, 1.0] to 16-bit signed.
fn to_i16(s: f32) -> i16 {
    #[allow(clippy::cast_possible_truncation)] // Safety: clamped to i16 range first
    let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
    v
}

impl Decoder for Mp3Decoder {
    fn codec(&self) -> CodecType {
        CodecType::Mp3
    }

    fn push_input(&mut self, data: &[u8]) -> usize {
        self.input.push(data)
    }

    fn decode(&mut self) -> Decoded<'_> {
        loop {
            let input = self.input.as_slice();
            if input.is_empty() {
                return Decoded::NeedMoreInput;
            }
            let (consumed, info) = self.inner.decode(input, &mut self.scratch);
            match info {
                Some(info) => {
                    self.input.consume(consumed);
                    #[allow(clippy::cast_possible_truncation)] // Safety: 1 or 2 channels
                    let channels = info.channels.num() as usize;
                    // bounded by the scratch length whether the count is per channel or total
                    let produced = info.samples_produced.saturating_mul(channels);
                    self.out.clear();
                    for &s in self.scratch.iter().take(produced) {
                        self.out.extend_from_slice(&to_i16(s).to_le_bytes());
                    }
                    #[allow(clippy::cast_possible_truncation)] // Safety: 1 or 2 channels
                    let format = StreamFormat::pcm(info.sample_rate, 16, channels as u8);
                    return Decoded::Frame { pcm: &self.out, format };
                }
                None if consumed > 0 => {
                    // skipped garbage or an ID3 tag
                    self.input.consume(consumed);
                }
                None if input.len() < MAX_FRAME_BYTES.saturating_mul(2) => return Decoded::NeedMoreInput,
                None => return Decoded::Error(DecodeError::InvalidData),
            }
        }
    }

    fn resync(&mut self) -> bool {
        let input = self.input.as_slice();
        let next = input
            .iter()
            .skip(1)
            .position(|&b| b == 0xFF)
            .map(|p| p.saturating_add(1));
        match next {
            Some(at) => {
                self.input.consume(at);
                true
            }
            None => {
                self.input.clear();
                false
            }
        }
    }

    fn reset(&mut self) {
        self.inner = nanomp3::Decoder::new();
        self.input.clear();
        self.out.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_never_yields_a_frame() {
        let mut dec = Mp3Decoder::new(8192);
        dec.push_input(&[0u8; 100]);
        assert!(matches!(dec.decode(), Decoded::NeedMoreInput | Decoded::Error(_)));
    }

    #[test]
    fn test_resync_finds_next_sync_byte() {
        let mut dec = Mp3Decoder::new(8192);
        dec.push_input(&[0xFF, 0x00, 0x01, 0xFF, 0xFB]);
        assert!(dec.resync());
        assert_eq!(dec.input.as_slice(), &[0xFF, 0xFB]);
        assert!(!dec.resync());
        assert_eq!(dec.input.len(), 0);
    }

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(-1.0), -i16::MAX);
    }
}
