//! Transcoded live playback via the backend's HLS transcoder.
//!
//! The host fetches the playlist and segments itself; this buffer only
//! verifies the playlist at start and keeps the backend transcoder
//! alive through periodic lease renewals.

use std::io::Read;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use nextpvr_protocol::{methods, ProtocolError};

use crate::error::BridgeError;
use crate::streams::buffer::PlaybackBuffer;
use crate::transport::Transport;

/// Seconds after the last good lease before playback counts as stalled.
const LEASE_GRACE_SECS: i64 = 30;

const PLAYLIST_MAGIC: &[u8] = b"#EXTM3U";

pub struct TranscodedStream {
    transport: Arc<Transport>,
    last_lease: AtomicI64,
}

impl std::fmt::Debug for TranscodedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodedStream")
            .field("last_lease", &self.last_lease)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl TranscodedStream {
    /// Starts a transcode by pulling the head of the playlist.  A
    /// response that is not an HLS playlist means the backend refused
    /// or cannot transcode this channel.
    pub fn open(
        transport: Arc<Transport>,
        playlist_url: &str,
    ) -> Result<TranscodedStream, BridgeError> {
        let mut handle = transport.open_stream(playlist_url, None)?;
        let mut head = [0u8; PLAYLIST_MAGIC.len()];
        let mut filled = 0;
        while filled < head.len() {
            let n = handle
                .reader
                .read(&mut head[filled..])
                .map_err(crate::error::TransportError::Body)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if &head[..filled] != PLAYLIST_MAGIC {
            return Err(
                ProtocolError::Decode("transcoder did not return an HLS playlist".into()).into(),
            );
        }
        Ok(TranscodedStream {
            transport,
            last_lease: AtomicI64::new(now_secs()),
        })
    }
}

impl PlaybackBuffer for TranscodedStream {
    /// The host never reads segment data through the bridge.
    fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }

    fn close(&self) {
        log::debug!("transcoded stream closed");
    }

    fn is_realtime(&self) -> bool {
        now_secs() - self.last_lease.load(Ordering::Relaxed) < LEASE_GRACE_SECS
    }

    fn lease(&self) {
        match self.transport.action(methods::TRANSCODE_LEASE) {
            Ok(()) => self.last_lease.store(now_secs(), Ordering::Relaxed),
            Err(err) => log::error!("transcode lease failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{xml, FakeBackend};

    fn playlist_url(transport: &Transport) -> String {
        methods::transcode_playlist_url(transport.base_url(), "cafe01")
    }

    #[test]
    fn test_open_accepts_hls_playlist() {
        let backend = FakeBackend::start();
        backend.on(
            "channel.transcode.m3u8",
            200,
            "#EXTM3U\n#EXT-X-VERSION:3\nsegment0.ts\n",
        );
        let transport = Arc::new(Transport::new(&backend.settings()));
        let url = playlist_url(&transport);

        let stream = TranscodedStream::open(Arc::clone(&transport), &url).unwrap();
        assert!(stream.is_realtime());
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_non_playlist_body() {
        let backend = FakeBackend::start();
        backend.on("channel.transcode.m3u8", 200, "<html>busy</html>");
        let transport = Arc::new(Transport::new(&backend.settings()));
        let url = playlist_url(&transport);

        let err = TranscodedStream::open(transport, &url).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn test_lease_renewal_restores_realtime() {
        let backend = FakeBackend::start();
        backend.on("channel.transcode.m3u8", 200, "#EXTM3U\n");
        backend.on("channel.transcode.lease", 200, xml::OK);
        let transport = Arc::new(Transport::new(&backend.settings()));
        let url = playlist_url(&transport);

        let stream = TranscodedStream::open(Arc::clone(&transport), &url).unwrap();
        stream.last_lease.store(now_secs() - 60, Ordering::Relaxed);
        assert!(!stream.is_realtime());

        stream.lease();
        assert!(stream.is_realtime());
        assert_eq!(backend.requests_matching("channel.transcode.lease"), 1);
    }

    #[test]
    fn test_failed_lease_leaves_timestamp_stale() {
        let backend = FakeBackend::start();
        backend.on("channel.transcode.m3u8", 200, "#EXTM3U\n");
        backend.on("channel.transcode.lease", 500, "gone");
        let transport = Arc::new(Transport::new(&backend.settings()));
        let url = playlist_url(&transport);

        let stream = TranscodedStream::open(Arc::clone(&transport), &url).unwrap();
        stream.last_lease.store(now_secs() - 60, Ordering::Relaxed);
        stream.lease();
        assert!(!stream.is_realtime());
    }
}
