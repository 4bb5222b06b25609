//! Codec abstraction and decoder dispatch.
//!
//! A [`Decoder`] turns a compressed byte stream into interleaved
//! little-endian PCM. It owns a bounded input buffer: the caller pushes as
//! much as fits, then calls [`Decoder::decode`] until it asks for more.
//! [`DecoderFactory`] maps a stream format to a decoder instance, and
//! [`DecoderNode`] is the pipeline stage that drives it.
//!
//! # Backends
//!
//! * **WAV / raw PCM**: parsed here, no third-party crate needed.
//! * **MP3**: `nanomp3` (pure-Rust, `no_std`, c2rust translation of minimp3
//!   with soundness fixes), behind the `mp3` feature.
//!
//! Other codecs resolve to [`StreamError::NoCodec`](crate::error::StreamError::NoCodec)
//! with the default factory; hosts with more codecs supply their own factory.

use alloc::boxed::Box;
use alloc::vec::Vec;

use thiserror_no_std::Error;

use crate::format::{CodecType, StreamFormat, Transport};

#[cfg(feature = "mp3")]
pub mod mp3;
pub mod node;
pub mod pcm;
pub mod wav;

pub use node::DecoderNode;

/// Bytes a decoder's input buffer holds by default.
pub const DEFAULT_INPUT_CAPACITY: usize = 8 * 1024;

/// Codec-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The bitstream is corrupt.
    #[error("invalid bitstream data")]
    InvalidData,
    /// Valid stream, but parameters this decoder cannot handle.
    #[error("unsupported stream parameters")]
    Unsupported,
}

impl DecodeError {
    /// Short lowercase name for log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidData => "invalid-data",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Result of one [`Decoder::decode`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// One frame of interleaved little-endian PCM.
    Frame {
        /// Samples, valid until the next call on the decoder
        pcm: &'a [u8],
        /// Layout of `pcm`
        format: StreamFormat,
    },
    /// Buffered input holds no complete frame.
    NeedMoreInput,
    /// Decoding failed at the current input position.
    Error(DecodeError),
}

/// Stateful codec instance.
pub trait Decoder: Send {
    /// Codec this instance decodes.
    fn codec(&self) -> CodecType;

    /// Append as much of `data` as fits in the input buffer; returns the
    /// number of bytes taken.
    fn push_input(&mut self, data: &[u8]) -> usize;

    /// Decode the next frame from buffered input.
    fn decode(&mut self) -> Decoded<'_>;

    /// Skip ahead to the next plausible frame start after an error.
    ///
    /// Returns `false` when there is nothing left to try.
    fn resync(&mut self) -> bool;

    /// Drop buffered input and per-stream state; the instance is ready for
    /// a new stream of the same codec.
    fn reset(&mut self);

    /// Push `data` and return the part that did not fit.
    fn feed<'d>(&mut self, data: &'d [u8]) -> &'d [u8] {
        let taken = self.push_input(data);
        data.get(taken..).unwrap_or(&[])
    }
}

/// Creates decoders for stream formats.
pub trait DecoderFactory: Send + 'static {
    /// A decoder for `format`, or `None` when the codec is not supported.
    fn create(&self, format: &StreamFormat) -> Option<Box<dyn Decoder>>;
}

/// WAV and raw PCM always; MP3 with the `mp3` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDecoders;

impl DecoderFactory for DefaultDecoders {
    fn create(&self, format: &StreamFormat) -> Option<Box<dyn Decoder>> {
        match format.codec {
            CodecType::Wav => Some(Box::new(wav::WavDecoder::new(DEFAULT_INPUT_CAPACITY))),
            CodecType::Pcm => Some(Box::new(pcm::PcmDecoder::new(*format, DEFAULT_INPUT_CAPACITY))),
            #[cfg(feature = "mp3")]
            CodecType::Mp3 => Some(Box::new(mp3::Mp3Decoder::new(DEFAULT_INPUT_CAPACITY))),
            _ => None,
        }
    }
}

/// Guess a stream's format from its first bytes.
///
/// Returns `None` when the bytes match no known signature. Needs at least
/// [`SNIFF_LEN`] bytes to recognise container formats.
pub fn detect_format(head: &[u8]) -> Option<StreamFormat> {
    let at = |i: usize| head.get(i).copied();
    let tag = |i: usize, t: &[u8]| head.get(i..i.saturating_add(t.len())) == Some(t);

    if tag(0, b"RIFF") && tag(8, b"WAVE") {
        return Some(StreamFormat::codec(CodecType::Wav));
    }
    if tag(0, b"fLaC") {
        return Some(StreamFormat::codec(CodecType::Flac));
    }
    if tag(0, b"OggS") {
        let opus = head.windows(8).any(|w| w == b"OpusHead");
        let codec = if opus { CodecType::Opus } else { CodecType::Vorbis };
        return Some(StreamFormat::codec(codec).with_transport(Transport::Ogg));
    }
    if tag(4, b"ftyp") {
        return Some(StreamFormat::codec(CodecType::Aac).with_transport(Transport::Mpeg));
    }
    if tag(0, b"ID3") {
        return Some(StreamFormat::codec(CodecType::Mp3));
    }
    match (at(0), at(1)) {
        // ADTS: sync 0xFFF, layer 00
        (Some(0xFF), Some(b1)) if b1 & 0xF6 == 0xF0 => Some(StreamFormat::codec(CodecType::Aac)),
        // MPEG audio: sync 0xFFE, layer III
        (Some(0xFF), Some(b1)) if b1 & 0xE0 == 0xE0 && b1 & 0x06 == 0x02 => {
            Some(StreamFormat::codec(CodecType::Mp3))
        }
        _ => None,
    }
}

/// Bytes [`detect_format`] wants before deciding.
pub const SNIFF_LEN: usize = 36;

/// Bounded FIFO of undecoded bytes shared by the decoder implementations.
#[derive(Debug)]
pub(crate) struct InputBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl InputBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.bytes.len());
        let n = room.min(data.len());
        self.bytes.extend_from_slice(data.get(..n).unwrap_or(&[]));
        n
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn consume(&mut self, n: usize) {
        let n = n.min(self.bytes.len());
        self.bytes.drain(..n);
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }
}
