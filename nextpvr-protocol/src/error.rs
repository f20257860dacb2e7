//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Errors raised while interpreting backend XML replies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The reply was not a `<rsp>` document at all.
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope arrived intact but carried a failure status.
    #[error("backend rejected the request: stat=\"{0}\"")]
    Rejected(String),

    /// The envelope was accepted but the body did not match the
    /// expected shape for the method.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl From<quick_xml::de::DeError> for ProtocolError {
    fn from(err: quick_xml::de::DeError) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}

/// Errors raised by the channel cache file codec.
///
/// A corrupt cache is never fatal to the bridge; callers delete the file
/// and fall back to a live fetch.  The variants exist so the log line can
/// say what was wrong with it.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The gzip stream ended before the expected byte count.
    #[error("cache truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The header carried a zero update time, which the writer never
    /// produces.
    #[error("cache header carries a zero update time")]
    InvalidTimestamp,

    /// The header declared a payload larger than any plausible channel
    /// list.
    #[error("cache payload of {0} bytes exceeds the size limit")]
    Oversized(u64),

    /// The payload was not valid UTF-8.
    #[error("cache payload is not valid UTF-8")]
    NotUtf8,

    /// Reading or writing the underlying file failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
