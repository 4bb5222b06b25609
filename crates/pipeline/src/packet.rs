//! Stream packets: the unit of transfer between nodes.

use core::ops::BitOr;

use platform::source::MAX_TITLE_LEN;

use crate::buffer::DataBuf;
use crate::format::StreamFormat;

/// Identifier of one logical stream (track, radio connection, seek).
///
/// Minted by the control plane, strictly increasing modulo wraparound and
/// never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamId(u16);

impl StreamId {
    /// The first id handed out.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw id; 0 is reserved.
    pub const fn new(raw: u16) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Raw value.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The id minted after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }
}

/// In-band stream title.
pub type Title = heapless::String<MAX_TITLE_LEN>;

/// Header of a new logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NewStream {
    /// Id of the stream that starts here
    pub stream_id: StreamId,
    /// Format of the bytes that follow
    pub format: StreamFormat,
    /// Playback position of the first byte, when the stream starts after a seek
    pub seek_pos_ms: Option<u32>,
    /// Source bitrate in bits per second, for byte ↔ time conversion
    pub source_bps: Option<u32>,
}

impl NewStream {
    /// Header with no seek or bitrate hints.
    pub const fn new(stream_id: StreamId, format: StreamFormat) -> Self {
        Self {
            stream_id,
            format,
            seek_pos_ms: None,
            source_bps: None,
        }
    }
}

/// A packet travelling through an [`EventRing`](crate::event_ring::EventRing).
#[derive(Debug, PartialEq, Eq)]
pub enum StreamPacket {
    /// Audio or compressed bytes
    Data(DataBuf),
    /// First byte of a new logical stream follows
    NewStream(NewStream),
    /// The stream ended gracefully
    StreamEnd {
        /// Stream that ended
        stream_id: StreamId,
    },
    /// Metadata change taking effect at this position
    TitleChanged {
        /// Stream the title belongs to
        stream_id: StreamId,
        /// New title
        title: Title,
    },
    /// Hold back data until the matching prefill completion
    Prefill {
        /// Gate id, increasing per producer
        id: u32,
    },
}

impl StreamPacket {
    /// Discriminant of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Data(_) => PacketKind::Data,
            Self::NewStream(_) => PacketKind::NewStream,
            Self::StreamEnd { .. } => PacketKind::StreamEnd,
            Self::TitleChanged { .. } => PacketKind::TitleChanged,
            Self::Prefill { .. } => PacketKind::Prefill,
        }
    }

    /// Payload length; 0 for control packets.
    pub fn data_len(&self) -> usize {
        match self {
            Self::Data(buf) => buf.len(),
            _ => 0,
        }
    }

    /// Copy of the packet's header information.
    pub fn info(&self) -> PacketInfo {
        match self {
            Self::Data(buf) => PacketInfo::Data { len: buf.len() },
            Self::NewStream(ns) => PacketInfo::NewStream(*ns),
            Self::StreamEnd { stream_id } => PacketInfo::StreamEnd {
                stream_id: *stream_id,
            },
            Self::TitleChanged { stream_id, .. } => PacketInfo::TitleChanged {
                stream_id: *stream_id,
            },
            Self::Prefill { id } => PacketInfo::Prefill { id: *id },
        }
    }
}

impl From<NewStream> for StreamPacket {
    fn from(ns: NewStream) -> Self {
        Self::NewStream(ns)
    }
}

impl From<DataBuf> for StreamPacket {
    fn from(buf: DataBuf) -> Self {
        Self::Data(buf)
    }
}

/// Header of a queued packet, returned by peeks without dequeuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketInfo {
    /// Data of this many bytes
    Data {
        /// Byte count
        len: usize,
    },
    /// New stream header
    NewStream(NewStream),
    /// End of stream
    StreamEnd {
        /// Stream that ends
        stream_id: StreamId,
    },
    /// Title change
    TitleChanged {
        /// Stream the title belongs to
        stream_id: StreamId,
    },
    /// Prefill gate
    Prefill {
        /// Gate id
        id: u32,
    },
}

/// Discriminant of a [`StreamPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketKind {
    /// [`StreamPacket::Data`]
    Data,
    /// [`StreamPacket::NewStream`]
    NewStream,
    /// [`StreamPacket::StreamEnd`]
    StreamEnd,
    /// [`StreamPacket::TitleChanged`]
    TitleChanged,
    /// [`StreamPacket::Prefill`]
    Prefill,
}

impl PacketKind {
    const fn mask(self) -> u8 {
        match self {
            Self::Data => 1 << 0,
            Self::NewStream => 1 << 1,
            Self::StreamEnd => 1 << 2,
            Self::TitleChanged => 1 << 3,
            Self::Prefill => 1 << 4,
        }
    }
}

/// A set of [`PacketKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketKinds(u8);

impl PacketKinds {
    /// No kinds.
    pub const NONE: Self = Self(0);
    /// Every control kind.
    pub const CONTROL: Self = Self(0b1_1110);

    /// Set holding only `kind`.
    pub const fn of(kind: PacketKind) -> Self {
        Self(kind.mask())
    }

    /// `true` when `kind` is in the set.
    pub const fn contains(self, kind: PacketKind) -> bool {
        self.0 & kind.mask() != 0
    }
}

impl From<PacketKind> for PacketKinds {
    fn from(kind: PacketKind) -> Self {
        Self::of(kind)
    }
}

impl BitOr for PacketKinds {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr for PacketKind {
    type Output = PacketKinds;
    fn bitor(self, rhs: Self) -> PacketKinds {
        PacketKinds::of(self) | PacketKinds::of(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_wraps_past_zero() {
        let last = StreamId::new(u16::MAX).unwrap_or(StreamId::FIRST);
        assert_eq!(last.next(), StreamId::FIRST);
        assert_eq!(StreamId::new(0), None);
    }

    #[test]
    fn test_kind_sets() {
        let set = PacketKind::NewStream | PacketKind::StreamEnd;
        assert!(set.contains(PacketKind::StreamEnd));
        assert!(!set.contains(PacketKind::Data));
        assert!(PacketKinds::CONTROL.contains(PacketKind::Prefill));
        assert!(!PacketKinds::CONTROL.contains(PacketKind::Data));
    }

    #[test]
    fn test_data_len_counts_only_data() {
        let data = StreamPacket::Data(DataBuf::from(&[0u8; 12][..]));
        assert_eq!(data.data_len(), 12);
        assert_eq!(StreamPacket::Prefill { id: 1 }.data_len(), 0);
        assert_eq!(data.info(), PacketInfo::Data { len: 12 });
    }
}
