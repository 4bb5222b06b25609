//! RIFF/WAVE decoder.
//!
//! Parses the chunk structure incrementally (chunks may straddle input
//! pushes), then emits whole PCM frames:
//!
//! | input      | output                         |
//! |------------|--------------------------------|
//! | 8-bit      | 16-bit signed                  |
//! | 16-bit     | unchanged                      |
//! | 24-bit     | 32-bit slot, left-aligned      |
//! | 32-bit     | unchanged                      |
//!
//! IEEE-float and compressed WAVE payloads are rejected.

use alloc::vec::Vec;

use super::{DecodeError, Decoded, Decoder, InputBuffer};
use crate::format::{CodecType, StreamFormat};

/// Largest PCM frame handed out per `decode` call, in bytes.
const MAX_OUT: usize = 4096;

const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RiffHeader,
    ChunkHeader,
    Skip(u32),
    Data,
    Trailer,
}

/// WAVE container decoder.
pub struct WavDecoder {
    input: InputBuffer,
    phase: Phase,
    /// Source layout from the `fmt ` chunk.
    source: Option<StreamFormat>,
    /// Payload bytes left in the `data` chunk, `None` when unbounded.
    data_left: Option<u32>,
    out: Vec<u8>,
}

fn le16(b: &[u8], at: usize) -> Option<u16> {
    let s = b.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([*s.first()?, *s.get(1)?]))
}

fn le32(b: &[u8], at: usize) -> Option<u32> {
    let s = b.get(at..at.checked_add(4)?)?;
    let mut w = [0u8; 4];
    w.copy_from_slice(s);
    Some(u32::from_le_bytes(w))
}

impl WavDecoder {
    /// Decoder with an input buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            input: InputBuffer::new(capacity),
            phase: Phase::RiffHeader,
            source: None,
            data_left: None,
            out: Vec::with_capacity(MAX_OUT),
        }
    }

    /// Advance through headers. `Ok(true)` when payload can be decoded.
    fn parse_headers(&mut self) -> Result<bool, DecodeError> {
        loop {
            let buf = self.input.as_slice();
            match self.phase {
                Phase::RiffHeader => {
                    if buf.len() < 12 {
                        return Ok(false);
                    }
                    if buf.get(..4) != Some(&b"RIFF"[..]) || buf.get(8..12) != Some(&b"WAVE"[..]) {
                        return Err(DecodeError::InvalidData);
                    }
                    self.input.consume(12);
                    self.phase = Phase::ChunkHeader;
                }
                Phase::ChunkHeader => {
                    if buf.len() < 8 {
                        return Ok(false);
                    }
                    let id = buf.get(..4).unwrap_or_default();
                    let size = le32(buf, 4).ok_or(DecodeError::InvalidData)?;
                    if id == b"fmt " {
                        let len = usize::try_from(size).map_err(|_| DecodeError::InvalidData)?;
                        let Some(body) = buf.get(8..8usize.saturating_add(len)) else {
                            return Ok(false);
                        };
                        self.source = Some(parse_fmt(body)?);
                        let padded = len.saturating_add(len & 1).saturating_add(8);
                        self.input.consume(padded);
                    } else if id == b"data" {
                        if self.source.is_none() {
                            return Err(DecodeError::InvalidData);
                        }
                        self.data_left = match size {
                            0 | u32::MAX => None,
                            n => Some(n),
                        };
                        self.input.consume(8);
                        self.phase = Phase::Data;
                    } else {
                        self.input.consume(8);
                        self.phase = Phase::Skip(size.saturating_add(size & 1));
                    }
                }
                Phase::Skip(left) => {
                    let n = usize::try_from(left).unwrap_or(usize::MAX).min(buf.len());
                    self.input.consume(n);
                    #[allow(clippy::cast_possible_truncation)] // Safety: n <= left
                    let rest = left.saturating_sub(n as u32);
                    if rest > 0 {
                        self.phase = Phase::Skip(rest);
                        return Ok(false);
                    }
                    self.phase = Phase::ChunkHeader;
                }
                Phase::Data => return Ok(true),
                Phase::Trailer => {
                    let n = buf.len();
                    self.input.consume(n);
                    return Ok(false);
                }
            }
        }
    }
}

fn parse_fmt(body: &[u8]) -> Result<StreamFormat, DecodeError> {
    let tag = le16(body, 0).ok_or(DecodeError::InvalidData)?;
    let channels = le16(body, 2).ok_or(DecodeError::InvalidData)?;
    let rate = le32(body, 4).ok_or(DecodeError::InvalidData)?;
    let bits = le16(body, 14).ok_or(DecodeError::InvalidData)?;
    if tag != FORMAT_PCM && tag != FORMAT_EXTENSIBLE {
        return Err(DecodeError::Unsupported);
    }
    if !matches!(bits, 8 | 16 | 24 | 32) || !(1..=8).contains(&channels) || rate == 0 {
        return Err(DecodeError::Unsupported);
    }
    #[allow(clippy::cast_possible_truncation)] // Safety: bits <= 32, channels <= 8
    Ok(StreamFormat::pcm(rate, bits as u8, channels as u8))
}

/// Output layout for a WAVE source layout.
fn output_format(source: StreamFormat) -> StreamFormat {
    let mut out = source;
    match source.bits_per_sample {
        8 => out.bits_per_sample = 16,
        24 => out.left_aligned = true,
        _ => {}
    }
    out
}

/// Append `frames` of `source` layout to `out` in output layout.
fn convert(source: StreamFormat, frames: &[u8], out: &mut Vec<u8>) {
    match source.bits_per_sample {
        8 => {
            for &b in frames {
                let s = i16::from(b).wrapping_sub(128).wrapping_shl(8);
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        24 => {
            for s in frames.chunks_exact(3) {
                out.push(0);
                out.extend_from_slice(s);
            }
        }
        _ => out.extend_from_slice(frames),
    }
}

impl Decoder for WavDecoder {
    fn codec(&self) -> CodecType {
        CodecType::Wav
    }

    fn push_input(&mut self, data: &[u8]) -> usize {
        self.input.push(data)
    }

    fn decode(&mut self) -> Decoded<'_> {
        match self.parse_headers() {
            Ok(true) => {}
            Ok(false) => return Decoded::NeedMoreInput,
            Err(e) => return Decoded::Error(e),
        }
        let Some(source) = self.source else {
            return Decoded::Error(DecodeError::InvalidData);
        };
        let frame = source.bytes_per_frame().max(1);
        let out_per_in = output_format(source).bytes_per_frame().max(1);
        let frames_out = MAX_OUT.checked_div(out_per_in).unwrap_or(0);
        let mut take = self.input.len().min(frames_out.saturating_mul(frame));
        if let Some(left) = self.data_left {
            take = take.min(usize::try_from(left).unwrap_or(usize::MAX));
        }
        take = take.checked_div(frame).unwrap_or(0).saturating_mul(frame);
        if take == 0 {
            return Decoded::NeedMoreInput;
        }

        self.out.clear();
        convert(source, self.input.as_slice().get(..take).unwrap_or_default(), &mut self.out);
        self.input.consume(take);
        if let Some(left) = self.data_left.as_mut() {
            #[allow(clippy::cast_possible_truncation)] // Safety: take <= left
            let rest = left.saturating_sub(take as u32);
            *left = rest;
            if rest == 0 {
                self.phase = Phase::Trailer;
            }
        }
        Decoded::Frame {
            pcm: &self.out,
            format: output_format(source),
        }
    }

    fn resync(&mut self) -> bool {
        // PCM has no frame sync to search for
        false
    }

    fn reset(&mut self) {
        self.input.clear();
        self.phase = Phase::RiffHeader;
        self.source = None;
        self.data_left = None;
        self.out.clear();
    }
}

/// Build a canonical 44-byte WAVE header for `payload_len` bytes of PCM.
#[cfg(test)]
pub(crate) fn header(rate: u32, bits: u16, channels: u16, payload_len: u32) -> Vec<u8> {
    let block = channels.saturating_mul(bits / 8);
    let mut h = Vec::new();
    h.extend_from_slice(b"RIFF");
    h.extend_from_slice(&payload_len.saturating_add(36).to_le_bytes());
    h.extend_from_slice(b"WAVEfmt ");
    h.extend_from_slice(&16u32.to_le_bytes());
    h.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    h.extend_from_slice(&channels.to_le_bytes());
    h.extend_from_slice(&rate.to_le_bytes());
    h.extend_from_slice(&rate.saturating_mul(u32::from(block)).to_le_bytes());
    h.extend_from_slice(&block.to_le_bytes());
    h.extend_from_slice(&bits.to_le_bytes());
    h.extend_from_slice(b"data");
    h.extend_from_slice(&payload_len.to_le_bytes());
    h
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn decode_all(dec: &mut WavDecoder) -> (Vec<u8>, Option<StreamFormat>) {
        let mut pcm = Vec::new();
        let mut fmt = None;
        loop {
            match dec.decode() {
                Decoded::Frame { pcm: p, format } => {
                    pcm.extend_from_slice(p);
                    fmt = Some(format);
                }
                Decoded::NeedMoreInput => return (pcm, fmt),
                Decoded::Error(e) => panic!("decode error {e:?}"),
            }
        }
    }

    #[test]
    fn test_16bit_passes_through() {
        let mut stream = header(48_000, 16, 2, 8);
        stream.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);
        let mut dec = WavDecoder::new(1024);
        assert_eq!(dec.push_input(&stream), stream.len());
        let (pcm, fmt) = decode_all(&mut dec);
        assert_eq!(pcm, [1, 0, 2, 0, 3, 0, 4, 0]);
        assert_eq!(fmt, Some(StreamFormat::pcm(48_000, 16, 2)));
    }

    #[test]
    fn test_header_split_across_pushes() {
        let mut stream = header(44_100, 16, 1, 4);
        stream.extend_from_slice(&[9, 0, 8, 0]);
        let mut dec = WavDecoder::new(1024);
        for byte in &stream {
            dec.push_input(core::slice::from_ref(byte));
            let _ = dec.decode();
        }
        // the last push completed the final frame; it was handed out already
        assert_eq!(dec.decode(), Decoded::NeedMoreInput);
    }

    #[test]
    fn test_8bit_is_widened() {
        let mut stream = header(8_000, 8, 1, 2);
        stream.extend_from_slice(&[0x80, 0xFF]);
        let mut dec = WavDecoder::new(1024);
        dec.push_input(&stream);
        let (pcm, fmt) = decode_all(&mut dec);
        assert_eq!(pcm, [0x00, 0x00, 0x00, 0x7F]);
        assert_eq!(fmt.map(|f| f.bits_per_sample), Some(16));
    }

    #[test]
    fn test_24bit_is_left_aligned() {
        let mut stream = header(96_000, 24, 1, 3);
        stream.extend_from_slice(&[0x11, 0x22, 0x33]);
        let mut dec = WavDecoder::new(1024);
        dec.push_input(&stream);
        let (pcm, fmt) = decode_all(&mut dec);
        assert_eq!(pcm, [0x00, 0x11, 0x22, 0x33]);
        let fmt = fmt.unwrap();
        assert!(fmt.left_aligned);
        assert_eq!(fmt.bytes_per_frame(), 4);
    }

    #[test]
    fn test_trailing_chunks_are_not_played() {
        let mut stream = header(44_100, 16, 1, 2);
        stream.extend_from_slice(&[5, 0]);
        stream.extend_from_slice(b"LIST\x04\0\0\0abcd");
        let mut dec = WavDecoder::new(1024);
        dec.push_input(&stream);
        let (pcm, _) = decode_all(&mut dec);
        assert_eq!(pcm, [5, 0]);
    }

    #[test]
    fn test_not_riff_is_invalid() {
        let mut dec = WavDecoder::new(64);
        dec.push_input(&[0u8; 16]);
        assert_eq!(dec.decode(), Decoded::Error(DecodeError::InvalidData));
        assert!(!dec.resync());
    }
}
