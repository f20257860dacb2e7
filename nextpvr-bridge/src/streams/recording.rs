//! Byte-range playback of a finished recording.
//!
//! Seeks close the current body and reopen the URL with a `Range`
//! header, so only one connection per stream is alive at a time.

use std::io::{self, Read, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BridgeError;
use crate::streams::buffer::{PlaybackBuffer, StreamTimes, STREAM_TIME_BASE};
use crate::transport::Transport;

struct Cursor {
    reader: Option<Box<dyn Read + Send>>,
    position: u64,
    closed: bool,
}

pub struct RecordingStream {
    transport: Arc<Transport>,
    url: String,
    /// Total size from the Content-Length of the first open, when the
    /// backend sent one.
    length: Option<u64>,
    duration_secs: i64,
    chunk: usize,
    cursor: Mutex<Cursor>,
}

impl RecordingStream {
    pub fn open(
        transport: Arc<Transport>,
        url: String,
        duration_secs: i64,
        chunk: usize,
    ) -> Result<RecordingStream, BridgeError> {
        let handle = transport.open_stream(&url, None)?;
        Ok(RecordingStream {
            transport,
            url,
            length: handle.content_length,
            duration_secs,
            chunk,
            cursor: Mutex::new(Cursor {
                reader: Some(handle.reader),
                position: 0,
                closed: false,
            }),
        })
    }

    fn reopen(&self, cursor: &mut Cursor) -> io::Result<()> {
        let start = if cursor.position > 0 {
            Some(cursor.position)
        } else {
            None
        };
        let handle = self
            .transport
            .open_stream(&self.url, start)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        cursor.reader = Some(handle.reader);
        Ok(())
    }
}

impl PlaybackBuffer for RecordingStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cursor = self.cursor.lock();
        if cursor.closed {
            return Ok(0);
        }
        if cursor.reader.is_none() {
            // A seek to or past the end leaves no body to read from.
            if self.length.is_some_and(|len| cursor.position >= len) {
                return Ok(0);
            }
            self.reopen(&mut cursor)?;
        }
        let n = match cursor.reader.as_mut() {
            Some(reader) => reader.read(buf)?,
            None => 0,
        };
        cursor.position += n as u64;
        Ok(n)
    }

    fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        let mut cursor = self.cursor.lock();
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => cursor.position as i128 + delta as i128,
            SeekFrom::End(delta) => match self.length {
                Some(len) => len as i128 + delta as i128,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "recording size unknown",
                    ))
                }
            },
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of recording",
            ));
        }
        let target = target as u64;
        if target != cursor.position {
            cursor.reader = None;
            cursor.position = target;
            let past_end = self.length.is_some_and(|len| target >= len);
            if !cursor.closed && !past_end {
                self.reopen(&mut cursor)?;
            }
        }
        Ok(target)
    }

    fn length(&self) -> Option<u64> {
        self.length
    }

    fn close(&self) {
        let mut cursor = self.cursor.lock();
        cursor.reader = None;
        cursor.closed = true;
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn stream_times(&self) -> Option<StreamTimes> {
        Some(StreamTimes {
            start_time: 0,
            pts_start: 0,
            pts_begin: 0,
            pts_end: self.duration_secs * STREAM_TIME_BASE,
        })
    }

    fn chunk_size(&self) -> Option<usize> {
        Some(self.chunk)
    }
}
