//! Client-side timeshift window over a live feed.
//!
//! A fill thread drains the HTTP body into a fixed ring indexed by
//! absolute stream offsets.  The newest bytes overwrite the oldest, so
//! the reachable range is a sliding window ending at the live edge.
//! Reads block until data arrives; seeks clamp into the window.

use std::io::{self, Read, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use crate::error::BridgeError;
use crate::streams::buffer::{PlaybackBuffer, StreamTimes};
use crate::transport::Transport;

/// Bytes of live stream kept for seeking back.
pub const TIMESHIFT_WINDOW_SIZE: usize = 32 * 1024 * 1024;

const FILL_CHUNK_SIZE: usize = 32 * 1024;

struct Window {
    ring: Box<[u8]>,
    /// Absolute offset of the oldest byte still in the ring.
    window_start: u64,
    /// Absolute offset one past the newest byte.
    write_pos: u64,
    /// Absolute read cursor.
    read_pos: u64,
    eof: bool,
    closed: bool,
}

impl Window {
    fn new(capacity: usize) -> Window {
        Window {
            ring: vec![0u8; capacity].into_boxed_slice(),
            window_start: 0,
            write_pos: 0,
            read_pos: 0,
            eof: false,
            closed: false,
        }
    }

    fn append(&mut self, data: &[u8]) {
        let cap = self.ring.len();
        // A chunk larger than the ring keeps only its tail.
        let skip = data.len().saturating_sub(cap);
        let keep = &data[skip..];
        let at = ((self.write_pos + skip as u64) % cap as u64) as usize;
        let first = keep.len().min(cap - at);
        self.ring[at..at + first].copy_from_slice(&keep[..first]);
        if first < keep.len() {
            self.ring[..keep.len() - first].copy_from_slice(&keep[first..]);
        }
        self.write_pos += data.len() as u64;
        if self.write_pos - self.window_start > cap as u64 {
            self.window_start = self.write_pos - cap as u64;
        }
    }

    fn copy_out(&self, buf: &mut [u8]) -> usize {
        let avail = (self.write_pos - self.read_pos) as usize;
        let len = buf.len().min(avail);
        let cap = self.ring.len();
        let at = (self.read_pos % cap as u64) as usize;
        let first = len.min(cap - at);
        buf[..first].copy_from_slice(&self.ring[at..at + first]);
        if first < len {
            buf[first..len].copy_from_slice(&self.ring[..len - first]);
        }
        len
    }
}

pub struct TimeshiftStream {
    window: Mutex<Window>,
    data_ready: Condvar,
    paused: AtomicBool,
    start_time: i64,
    opened_at: Instant,
}

impl TimeshiftStream {
    pub fn open(
        transport: &Transport,
        url: &str,
    ) -> Result<std::sync::Arc<TimeshiftStream>, BridgeError> {
        let handle = transport.open_stream(url, None)?;
        Ok(Self::from_reader(handle.reader, TIMESHIFT_WINDOW_SIZE))
    }

    /// Starts the fill thread over any byte source.
    pub fn from_reader(
        reader: Box<dyn Read + Send>,
        capacity: usize,
    ) -> std::sync::Arc<TimeshiftStream> {
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let stream = std::sync::Arc::new(TimeshiftStream {
            window: Mutex::new(Window::new(capacity)),
            data_ready: Condvar::new(),
            paused: AtomicBool::new(false),
            start_time,
            opened_at: Instant::now(),
        });
        let filler = std::sync::Arc::clone(&stream);
        // The thread exits on EOF, a read error, or the first chunk
        // boundary after close; it is not joined.
        thread::spawn(move || filler.fill(reader));
        stream
    }

    fn fill(&self, mut reader: Box<dyn Read + Send>) {
        let mut chunk = vec![0u8; FILL_CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let mut window = self.window.lock();
                    if window.closed {
                        return;
                    }
                    window.append(&chunk[..n]);
                    self.data_ready.notify_all();
                }
                Err(err) => {
                    log::error!("timeshift fill stopped: {}", err);
                    break;
                }
            }
        }
        let mut window = self.window.lock();
        window.eof = true;
        self.data_ready.notify_all();
    }
}

impl PlaybackBuffer for TimeshiftStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut window = self.window.lock();
        loop {
            if window.closed {
                return Ok(0);
            }
            // The writer may have lapped a slow reader.
            if window.read_pos < window.window_start {
                window.read_pos = window.window_start;
            }
            if window.write_pos > window.read_pos {
                let n = window.copy_out(buf);
                window.read_pos += n as u64;
                return Ok(n);
            }
            if window.eof {
                return Ok(0);
            }
            self.data_ready.wait(&mut window);
        }
    }

    fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        let mut window = self.window.lock();
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => window.read_pos as i128 + delta as i128,
            SeekFrom::End(delta) => window.write_pos as i128 + delta as i128,
        };
        let target = target.clamp(window.window_start as i128, window.write_pos as i128) as u64;
        window.read_pos = target;
        Ok(target)
    }

    fn length(&self) -> Option<u64> {
        Some(self.window.lock().write_pos)
    }

    fn close(&self) {
        let mut window = self.window.lock();
        window.closed = true;
        self.data_ready.notify_all();
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn pause(&self, on: bool) {
        log::debug!("timeshift pause {}", on);
        self.paused.store(on, Ordering::Relaxed);
    }

    fn is_timeshifting(&self) -> bool {
        true
    }

    fn is_realtime(&self) -> bool {
        false
    }

    fn stream_times(&self) -> Option<StreamTimes> {
        let window = self.window.lock();
        let elapsed = self.opened_at.elapsed().as_micros() as i64;
        // The feed carries no timestamps, so window positions are
        // scaled from bytes to elapsed playback time.
        let pts_begin = if window.write_pos == 0 {
            0
        } else {
            (window.window_start as i128 * elapsed as i128 / window.write_pos as i128) as i64
        };
        Some(StreamTimes {
            start_time: self.start_time,
            pts_start: 0,
            pts_begin,
            pts_end: elapsed,
        })
    }

    fn chunk_size(&self) -> Option<usize> {
        Some(FILL_CHUNK_SIZE)
    }
}
