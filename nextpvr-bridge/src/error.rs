//! Bridge error types.

use nextpvr_protocol::{CacheError, ProtocolError};
use thiserror::Error;

/// Errors raised by the HTTP transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request never produced an HTTP response.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: Box<ureq::Error>,
    },

    /// The backend answered with an unexpected status code.
    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Reading the response body failed mid-stream.
    #[error("failed to read response body: {0}")]
    Body(#[from] std::io::Error),
}

/// Errors surfaced to the host by bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The backend rejected the PIN during login.
    #[error("backend access denied")]
    AccessDenied,

    /// The backend is older than the bridge supports.
    #[error("backend version {found} is below the supported minimum {minimum}")]
    VersionMismatch { found: String, minimum: String },

    /// The operation needs an established session.
    #[error("not connected to the backend")]
    NotConnected,

    /// A live stream cannot start while another stream class is active.
    #[error("another {0} stream is already active")]
    StreamBusy(&'static str),

    /// No stream is open in the state this call expects.
    #[error("no active stream for this request")]
    NoActiveStream,

    /// The stream id does not name an open stream.
    #[error("unknown stream id {0}")]
    UnknownStream(u64),

    /// The operation is not available with the current settings or
    /// backend.
    #[error("operation not supported")]
    NotSupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for failures that will not resolve by retrying: the host
    /// should stop reconnect attempts.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BridgeError::AccessDenied | BridgeError::VersionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failures() {
        assert!(BridgeError::AccessDenied.is_permanent());
        assert!(BridgeError::VersionMismatch {
            found: "4.2.5".to_string(),
            minimum: "5.0.7".to_string()
        }
        .is_permanent());
        assert!(!BridgeError::NotConnected.is_permanent());
        assert!(!BridgeError::NoActiveStream.is_permanent());
    }

    #[test]
    fn test_transport_error_wraps_into_bridge_error() {
        let err: BridgeError = TransportError::Status {
            status: 404,
            url: "http://pvr:8866/service?method=setting.list".to_string(),
        }
        .into();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(!err.is_permanent());
    }
}
