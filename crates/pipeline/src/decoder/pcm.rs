//! Raw PCM "decoder": frame alignment and byte-order normalisation.

use alloc::vec::Vec;

use super::{DecodeError, Decoded, Decoder, InputBuffer};
use crate::format::{CodecType, StreamFormat};

const MAX_OUT: usize = 4096;

/// Passes interleaved PCM through, swapping big-endian samples to
/// little-endian and handing out whole frames only.
pub struct PcmDecoder {
    format: StreamFormat,
    input: InputBuffer,
    out: Vec<u8>,
}

impl PcmDecoder {
    /// Decoder for input laid out as `format`.
    pub fn new(format: StreamFormat, capacity: usize) -> Self {
        Self {
            format,
            input: InputBuffer::new(capacity),
            out: Vec::with_capacity(MAX_OUT),
        }
    }
}

impl Decoder for PcmDecoder {
    fn codec(&self) -> CodecType {
        CodecType::Pcm
    }

    fn push_input(&mut self, data: &[u8]) -> usize {
        self.input.push(data)
    }

    fn decode(&mut self) -> Decoded<'_> {
        let frame = self.format.bytes_per_frame();
        if frame == 0 || self.format.sample_rate == 0 {
            return Decoded::Error(DecodeError::Unsupported);
        }
        let limit = MAX_OUT.max(frame);
        let take = self.input.len().min(limit);
        let take = take.checked_div(frame).unwrap_or(0).saturating_mul(frame);
        if take == 0 {
            return Decoded::NeedMoreInput;
        }
        self.out.clear();
        self.out
            .extend_from_slice(self.input.as_slice().get(..take).unwrap_or_default());
        self.input.consume(take);

        let mut format = self.format;
        if format.big_endian {
            let width = format.bytes_per_sample();
            for sample in self.out.chunks_exact_mut(width) {
                sample.reverse();
            }
            format.big_endian = false;
        }
        Decoded::Frame {
            pcm: &self.out,
            format,
        }
    }

    fn resync(&mut self) -> bool {
        false
    }

    fn reset(&mut self) {
        self.input.clear();
        self.out.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_is_swapped() {
        let mut fmt = StreamFormat::pcm(48_000, 16, 2);
        fmt.big_endian = true;
        let mut dec = PcmDecoder::new(fmt, 64);
        // one and a half frames: the half stays buffered
        dec.push_input(&[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        match dec.decode() {
            Decoded::Frame { pcm, format } => {
                assert_eq!(pcm, &[0x34, 0x12, 0x78, 0x56]);
                assert!(!format.big_endian);
            }
            other => unreachable!("unexpected {other:?}"),
        }
        assert_eq!(dec.decode(), Decoded::NeedMoreInput);
    }

    #[test]
    fn test_unknown_layout_is_unsupported() {
        let mut dec = PcmDecoder::new(StreamFormat::codec(CodecType::Pcm), 64);
        dec.push_input(&[0; 8]);
        assert_eq!(dec.decode(), Decoded::Error(DecodeError::Unsupported));
    }
}
