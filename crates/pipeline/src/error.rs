//! Error taxonomy shared by every pipeline stage.
//!
//! `Stopped` is cooperative: it is how a blocked wait learns that its owner
//! is shutting down, and it is never reported to the application. Every
//! other variant is a failure a node gives up on once its local retry
//! budget is spent.

use thiserror_no_std::Error;

/// Failure of a stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError {
    /// The primitive's stop signal was raised while waiting.
    #[error("stopped")]
    Stopped,
    /// The wait's deadline passed.
    #[error("timed out")]
    Timeout,
    /// No decoder is available for the stream's codec.
    #[error("no decoder for stream codec")]
    NoCodec,
    /// Corrupt bitstream that re-synchronisation could not recover.
    #[error("bitstream decode error")]
    Decode,
    /// The sink rejected the stream's sample format.
    #[error("unsupported stream format")]
    StreamFormat,
    /// A failure diagnosed further up the chain (connection, source).
    #[error("upstream failure")]
    Upstream,
    /// The output device failed a write or could not be started.
    #[error("output device failure")]
    Output,
}

impl StreamError {
    /// Short lowercase name for log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
            Self::NoCodec => "no-codec",
            Self::Decode => "decode",
            Self::StreamFormat => "stream-format",
            Self::Upstream => "upstream",
            Self::Output => "output",
        }
    }
}

/// Failure of a [`ByteRing`](crate::byte_ring::ByteRing) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingError {
    /// The ring's stop signal is raised.
    #[error("ring stopped")]
    Stopped,
    /// The wait's deadline passed.
    #[error("ring wait timed out")]
    Timeout,
    /// The request can never be satisfied: it exceeds the ring capacity.
    #[error("request larger than ring capacity")]
    TooLarge,
    /// Non-blocking write found too little free space.
    #[error("ring full")]
    Full,
}

impl From<RingError> for StreamError {
    fn from(e: RingError) -> Self {
        match e {
            RingError::Stopped => Self::Stopped,
            RingError::Timeout | RingError::Full => Self::Timeout,
            RingError::TooLarge => Self::Upstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_errors_map_onto_stream_taxonomy() {
        assert_eq!(StreamError::from(RingError::Stopped), StreamError::Stopped);
        assert_eq!(StreamError::from(RingError::Timeout), StreamError::Timeout);
        assert_eq!(StreamError::from(RingError::TooLarge), StreamError::Upstream);
    }

    #[test]
    fn test_display_is_human_readable() {
        assert_eq!(format!("{}", StreamError::StreamFormat), "unsupported stream format");
        assert_eq!(StreamError::NoCodec.as_str(), "no-codec");
    }
}
