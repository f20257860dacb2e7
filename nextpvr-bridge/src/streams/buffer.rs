//! Common interface for the live stream buffers.

use std::io::{self, Read, SeekFrom};

use parking_lot::Mutex;

use crate::error::BridgeError;
use crate::transport::Transport;

/// Host timestamp scale, in ticks per second.
pub const STREAM_TIME_BASE: i64 = 1_000_000;

/// Playback window reported to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTimes {
    /// Wall-clock start of the stream, unix seconds.
    pub start_time: i64,
    pub pts_start: i64,
    /// Oldest position still reachable, in [`STREAM_TIME_BASE`] ticks.
    pub pts_begin: i64,
    /// Newest position available, in [`STREAM_TIME_BASE`] ticks.
    pub pts_end: i64,
}

/// A live playback source.
///
/// Buffers are shared behind an `Arc` so playback calls run outside the
/// dispatcher lock; implementations guard their own reader state.  The
/// defaults describe a plain forward-only live feed.
pub trait PlaybackBuffer: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not seekable",
        ))
    }

    /// Total bytes known to be available, when the source has an end.
    fn length(&self) -> Option<u64> {
        None
    }

    fn close(&self);

    fn can_pause(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn pause(&self, on: bool) {
        let _ = on;
    }

    fn is_timeshifting(&self) -> bool {
        false
    }

    fn is_realtime(&self) -> bool {
        true
    }

    fn stream_times(&self) -> Option<StreamTimes> {
        None
    }

    /// Preferred read size, when the buffer cares.
    fn chunk_size(&self) -> Option<usize> {
        None
    }

    /// Periodic keep-alive; only the transcoded buffer does anything.
    fn lease(&self) {}
}

/// Forward-only wrapper around the raw HTTP body.
pub struct PassthroughStream {
    reader: Mutex<Option<Box<dyn Read + Send>>>,
}

impl PassthroughStream {
    pub fn open(transport: &Transport, url: &str) -> Result<PassthroughStream, BridgeError> {
        let handle = transport.open_stream(url, None)?;
        Ok(PassthroughStream {
            reader: Mutex::new(Some(handle.reader)),
        })
    }
}

impl PlaybackBuffer for PassthroughStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.lock().as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }

    fn close(&self) {
        self.reader.lock().take();
    }
}
