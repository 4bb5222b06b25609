//! Byte source abstraction for network and file inputs
//!
//! A [`ByteSource`] yields the raw (usually compressed) bytes of one stream at
//! a time. Transport details such as HTTP, ICY metadata framing or a
//! music-service session live behind this trait.

use heapless::String;

/// Maximum length of a source locator (URL or path).
pub const MAX_LOCATOR_LEN: usize = 256;
/// Maximum length of a content type string.
pub const MAX_CONTENT_TYPE_LEN: usize = 64;
/// Maximum length of an in-band stream title.
pub const MAX_TITLE_LEN: usize = 128;

/// Source locator (URL or path).
pub type Locator = String<MAX_LOCATOR_LEN>;

/// Byte source trait
pub trait ByteSource: Send {
    /// Error type
    type Error: core::fmt::Debug;

    /// Open `locator`, positioned at byte `offset`.
    ///
    /// A non-zero offset resumes or seeks within the same resource.
    fn connect(
        &mut self,
        locator: &str,
        offset: u64,
    ) -> impl core::future::Future<Output = Result<SourceInfo, Self::Error>> + Send;

    /// Read the next chunk of bytes into `buf`.
    ///
    /// `Ok(ReadChunk { len: 0, .. })` marks the end of the resource.
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<ReadChunk, Self::Error>> + Send;

    /// Close the current connection, if any.
    fn disconnect(&mut self) -> impl core::future::Future<Output = ()> + Send;
}

/// What a source learned while connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// MIME content type reported by the server, empty if unknown
    pub content_type: String<MAX_CONTENT_TYPE_LEN>,
    /// Nominal bitrate in bits per second, if known
    pub bitrate: Option<u32>,
    /// Total length in bytes, if known
    pub length: Option<u64>,
}

/// Result of one [`ByteSource::read`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadChunk {
    /// Bytes written into the caller's buffer
    pub len: usize,
    /// In-band metadata that arrived with this chunk
    pub metadata: Option<InlineTitle>,
}

/// A title change carried in-band with the audio bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineTitle {
    /// Offset into the chunk at which the title takes effect
    pub offset: usize,
    /// Title text
    pub title: String<MAX_TITLE_LEN>,
}
