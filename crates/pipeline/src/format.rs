//! Stream format descriptors.
//!
//! A [`StreamFormat`] is a small `Copy` value describing either a compressed
//! stream (codec and transport known, sample layout possibly not) or a PCM
//! stream (sample rate, width, channel count, byte order). Two formats
//! compare equal exactly when nothing downstream has to be reconfigured.

use platform::AudioConfig;

/// Audio codec carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecType {
    /// Not known yet; the decoder sniffs the first bytes.
    #[default]
    Unknown,
    /// MPEG-1/2 Layer III
    Mp3,
    /// AAC (ADTS or MP4)
    Aac,
    /// Vorbis (always in Ogg)
    Vorbis,
    /// Free Lossless Audio Codec
    Flac,
    /// Opus (always in Ogg)
    Opus,
    /// RIFF/WAVE container with PCM payload
    Wav,
    /// Raw interleaved PCM
    Pcm,
}

impl CodecType {
    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "none",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Vorbis => "vorbis",
            Self::Flac => "flac",
            Self::Opus => "opus",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }

    /// Detect the codec from a lowercase file extension.
    ///
    /// Returns `None` when the extension is not recognised.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "mp3" => Some(Self::Mp3),
            "aac" | "m4a" => Some(Self::Aac),
            "ogg" => Some(Self::Vorbis),
            "opus" => Some(Self::Opus),
            "flac" => Some(Self::Flac),
            "wav" => Some(Self::Wav),
            "pcm" | "raw" => Some(Self::Pcm),
            _ => None,
        }
    }
}

/// Container the codec frames travel in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transport {
    /// The codec's native framing
    #[default]
    Default,
    /// Ogg pages
    Ogg,
    /// MPEG-4 / ISO BMFF
    Mpeg,
}

/// Description of a stream's encoding and sample layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamFormat {
    /// Codec
    pub codec: CodecType,
    /// Container
    pub transport: Transport,
    /// Sample rate in Hz, 0 if unknown
    pub sample_rate: u32,
    /// Significant bits per sample, 0 if unknown
    pub bits_per_sample: u8,
    /// Channel count, 0 if unknown
    pub channels: u8,
    /// Samples are big-endian
    pub big_endian: bool,
    /// Samples narrower than 32 bits sit in the high bits of a 32-bit slot
    pub left_aligned: bool,
}

impl StreamFormat {
    /// Nothing known.
    pub const UNKNOWN: Self = Self::codec(CodecType::Unknown);

    /// Compressed format with unknown sample layout.
    pub const fn codec(codec: CodecType) -> Self {
        Self {
            codec,
            transport: Transport::Default,
            sample_rate: 0,
            bits_per_sample: 0,
            channels: 0,
            big_endian: false,
            left_aligned: false,
        }
    }

    /// Little-endian interleaved PCM.
    pub const fn pcm(sample_rate: u32, bits_per_sample: u8, channels: u8) -> Self {
        Self {
            codec: CodecType::Pcm,
            transport: Transport::Default,
            sample_rate,
            bits_per_sample,
            channels,
            big_endian: false,
            left_aligned: false,
        }
    }

    /// Same format in a different container.
    #[must_use]
    pub const fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// `true` for raw PCM.
    pub fn is_pcm(&self) -> bool {
        self.codec == CodecType::Pcm
    }

    /// Bytes one sample occupies in the byte stream.
    pub fn bytes_per_sample(&self) -> usize {
        match self.bits_per_sample {
            0..=8 => 1,
            9..=16 => 2,
            17..=24 if !self.left_aligned => 3,
            _ => 4,
        }
    }

    /// Bytes per interleaved frame (one sample of every channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample().saturating_mul(usize::from(self.channels))
    }

    /// Byte rate of a PCM stream, 0 when the layout is unknown.
    pub fn bytes_per_second(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)] // Safety: frame size <= 4 * 255 bytes
        let frame = self.bytes_per_frame() as u32;
        frame.saturating_mul(self.sample_rate)
    }

    /// Output configuration for a PCM format.
    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: self.bits_per_sample,
        }
    }

    /// Map an HTTP content type to a format.
    ///
    /// `audio/L16` carries its sample layout in the parameters
    /// (`audio/L16;rate=48000;channels=2`) and is big-endian on the wire.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mut parts = mime.split(';');
        let base = parts.next().unwrap_or("").trim();
        let is = |s: &str| base.eq_ignore_ascii_case(s);
        let fmt = if is("audio/mpeg") || is("audio/mp3") || is("audio/mpeg3") {
            Self::codec(CodecType::Mp3)
        } else if is("audio/aac") || is("audio/aacp") || is("audio/x-aac") {
            Self::codec(CodecType::Aac)
        } else if is("audio/mp4") || is("audio/m4a") || is("audio/x-m4a") {
            Self::codec(CodecType::Aac).with_transport(Transport::Mpeg)
        } else if is("audio/ogg") || is("application/ogg") || is("audio/vorbis") {
            Self::codec(CodecType::Vorbis).with_transport(Transport::Ogg)
        } else if is("audio/opus") {
            Self::codec(CodecType::Opus).with_transport(Transport::Ogg)
        } else if is("audio/flac") || is("audio/x-flac") {
            Self::codec(CodecType::Flac)
        } else if is("audio/wav") || is("audio/x-wav") || is("audio/wave") {
            Self::codec(CodecType::Wav)
        } else if is("audio/l16") {
            let mut fmt = Self::pcm(44_100, 16, 2);
            fmt.big_endian = true;
            for param in parts {
                let Some((key, value)) = param.split_once('=') else {
                    continue;
                };
                let key = key.trim();
                let value = value.trim();
                if key.eq_ignore_ascii_case("rate") {
                    fmt.sample_rate = value.parse().ok()?;
                } else if key.eq_ignore_ascii_case("channels") {
                    fmt.channels = value.parse().ok()?;
                }
            }
            fmt
        } else {
            return None;
        };
        Some(fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_mapping_for_common_streams() {
        assert_eq!(StreamFormat::from_mime("audio/mpeg").map(|f| f.codec), Some(CodecType::Mp3));
        assert_eq!(
            StreamFormat::from_mime("audio/mp4").map(|f| (f.codec, f.transport)),
            Some((CodecType::Aac, Transport::Mpeg))
        );
        assert_eq!(StreamFormat::from_mime("AUDIO/X-WAV").map(|f| f.codec), Some(CodecType::Wav));
        assert_eq!(StreamFormat::from_mime("text/html"), None);
    }

    #[test]
    fn test_l16_parameters_are_parsed() {
        let fmt = StreamFormat::from_mime("audio/L16;rate=48000;channels=1").unwrap_or_default();
        assert!(fmt.is_pcm());
        assert!(fmt.big_endian);
        assert_eq!(fmt.sample_rate, 48_000);
        assert_eq!(fmt.channels, 1);
        assert_eq!(fmt.bytes_per_second(), 96_000);
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(StreamFormat::pcm(44_100, 16, 2).bytes_per_frame(), 4);
        assert_eq!(StreamFormat::pcm(96_000, 24, 2).bytes_per_frame(), 6);
        let mut aligned = StreamFormat::pcm(96_000, 24, 2);
        aligned.left_aligned = true;
        assert_eq!(aligned.bytes_per_frame(), 8);
    }

    #[test]
    fn test_codec_from_extension() {
        assert_eq!(CodecType::from_extension("flac"), Some(CodecType::Flac));
        assert_eq!(CodecType::from_extension("txt"), None);
    }
}
