//! Playback stream handling.
//!
//! One live player at a time plus any number of concurrent recording
//! streams, tracked by a playback state that the heartbeat also
//! consults.  Recording stream ids are issued once and never reused.

pub mod buffer;
pub mod recording;
pub mod timeshift;
pub mod transcode;

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use nextpvr_protocol::{methods, StreamingMethod};

use crate::error::BridgeError;
use crate::settings::InstanceSettings;
use crate::transport::Transport;

pub use buffer::{PassthroughStream, PlaybackBuffer, StreamTimes, STREAM_TIME_BASE};
pub use recording::RecordingStream;
pub use timeshift::TimeshiftStream;
pub use transcode::TranscodedStream;

/// Fallback read size when a live buffer has no preference.
const DEFAULT_LIVE_CHUNK: usize = 32 * 1024;

const RADIO_CHUNK: usize = 4096;

/// What the host is currently playing through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowPlaying {
    NotPlaying,
    Tv,
    Radio,
    Recording,
    Transcoding,
}

pub struct StreamDispatcher {
    settings: Arc<InstanceSettings>,
    transport: Arc<Transport>,
    now_playing: Mutex<NowPlaying>,
    live_player: Mutex<Option<Arc<dyn PlaybackBuffer>>>,
    recordings: Mutex<BTreeMap<u64, Arc<RecordingStream>>>,
    stream_count: AtomicU64,
}

impl StreamDispatcher {
    pub fn new(settings: Arc<InstanceSettings>, transport: Arc<Transport>) -> StreamDispatcher {
        StreamDispatcher {
            settings,
            transport,
            now_playing: Mutex::new(NowPlaying::NotPlaying),
            live_player: Mutex::new(None),
            recordings: Mutex::new(BTreeMap::new()),
            stream_count: AtomicU64::new(0),
        }
    }

    pub fn now_playing(&self) -> NowPlaying {
        *self.now_playing.lock()
    }

    fn set_now_playing(&self, state: NowPlaying) {
        *self.now_playing.lock() = state;
    }

    /// Starts live playback of a channel.  `override_url` is the
    /// published stream table entry, when the channel has one.
    pub fn open_live(
        &self,
        channel_uid: u32,
        radio: bool,
        override_url: Option<&str>,
    ) -> Result<(), BridgeError> {
        if !self.recordings.lock().is_empty() {
            return Err(BridgeError::StreamBusy("recording"));
        }
        self.set_now_playing(if radio {
            NowPlaying::Radio
        } else {
            NowPlaying::Tv
        });

        let sid = self.transport.sid();
        let base = self.transport.base_url();
        let opened: Result<Arc<dyn PlaybackBuffer>, BridgeError> = if let Some(url) = override_url {
            log::info!("opening published stream {}", url);
            PassthroughStream::open(&self.transport, url)
                .map(|stream| Arc::new(stream) as Arc<dyn PlaybackBuffer>)
        } else if self.settings.live_streaming_method == StreamingMethod::ClientTimeshift {
            let url = methods::live_channel_url(base, channel_uid, &sid, true);
            log::info!("opening timeshift stream {}", url);
            TimeshiftStream::open(&self.transport, &url)
                .map(|stream| stream as Arc<dyn PlaybackBuffer>)
        } else {
            let url = methods::live_channel_url(base, channel_uid, &sid, false);
            log::info!("opening live stream {}", url);
            PassthroughStream::open(&self.transport, url.as_str())
                .map(|stream| Arc::new(stream) as Arc<dyn PlaybackBuffer>)
        };

        match opened {
            Ok(player) => {
                if let Some(old) = self.live_player.lock().replace(player) {
                    old.close();
                }
                Ok(())
            }
            Err(err) => {
                self.set_now_playing(NowPlaying::NotPlaying);
                Err(err)
            }
        }
    }

    pub fn close_live(&self) {
        log::debug!("close live stream");
        if self.is_serving_live(false) {
            if let Some(player) = self.live_player.lock().take() {
                player.close();
            }
        }
        self.set_now_playing(NowPlaying::NotPlaying);
    }

    /// Drops the live player without closing it.  The heartbeat uses
    /// this when a transcode session has gone stale.
    pub fn release_live_player(&self) {
        self.live_player.lock().take();
        self.set_now_playing(NowPlaying::NotPlaying);
    }

    fn live(&self) -> Option<Arc<dyn PlaybackBuffer>> {
        self.live_player.lock().clone()
    }

    pub fn read_live(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        if self.is_serving_live(true) {
            if let Some(player) = self.live() {
                return Ok(player.read(buf)?);
            }
        }
        Err(BridgeError::NoActiveStream)
    }

    pub fn seek_live(&self, pos: SeekFrom) -> Result<u64, BridgeError> {
        if self.is_serving_live(true) {
            if let Some(player) = self.live() {
                return Ok(player.seek(pos)?);
            }
        }
        Err(BridgeError::NoActiveStream)
    }

    pub fn length_live(&self) -> Result<i64, BridgeError> {
        if self.is_serving_live(true) {
            if let Some(player) = self.live() {
                return Ok(player.length().map(|len| len as i64).unwrap_or(-1));
            }
        }
        Err(BridgeError::NoActiveStream)
    }

    pub fn can_pause(&self) -> bool {
        if self.is_serving() {
            if self.now_playing() == NowPlaying::Recording {
                return true;
            }
            if let Some(player) = self.live() {
                return player.can_pause();
            }
        }
        false
    }

    pub fn can_seek(&self) -> bool {
        if self.is_serving_live(true) {
            if let Some(player) = self.live() {
                return player.can_seek();
            }
        }
        false
    }

    /// Pause toggle without a stream id; recordings resolve to the
    /// newest open stream.
    pub fn pause(&self, on: bool) {
        if self.is_serving() {
            if self.now_playing() == NowPlaying::Recording {
                if let Some(stream) = self.newest_recording() {
                    stream.pause(on);
                }
            } else if let Some(player) = self.live() {
                player.pause(on);
            }
        }
    }

    pub fn pause_recorded(&self, stream_id: u64, on: bool) -> Result<(), BridgeError> {
        if self.is_serving() {
            if self.now_playing() == NowPlaying::Recording {
                self.recording(stream_id)?.pause(on);
            } else if let Some(player) = self.live() {
                player.pause(on);
            }
        }
        Ok(())
    }

    pub fn is_timeshifting(&self) -> bool {
        if self.is_serving_live(true) {
            if let Some(player) = self.live() {
                return player.is_timeshifting();
            }
        }
        false
    }

    pub fn is_realtime(&self) -> bool {
        if self.is_serving() {
            if self.now_playing() == NowPlaying::Recording {
                if let Some(stream) = self.newest_recording() {
                    return stream.is_realtime();
                }
            } else if let Some(player) = self.live() {
                return player.is_realtime();
            }
        }
        false
    }

    pub fn stream_times(&self) -> Result<StreamTimes, BridgeError> {
        if self.is_serving() {
            if self.now_playing() == NowPlaying::Recording {
                if let Some(stream) = self.newest_recording() {
                    return stream.stream_times().ok_or(BridgeError::NotSupported);
                }
            } else if let Some(player) = self.live() {
                return player.stream_times().ok_or(BridgeError::NotSupported);
            }
        }
        Err(BridgeError::NoActiveStream)
    }

    /// Signal-status probes double as the transcoder keep-alive.
    pub fn keep_transcode_alive(&self) {
        if self.now_playing() == NowPlaying::Transcoding {
            if let Some(player) = self.live() {
                player.lease();
            }
        }
    }

    /// True while a transcode session is still being consumed.
    pub fn transcode_healthy(&self) -> bool {
        match self.live() {
            Some(player) => player.is_realtime(),
            None => false,
        }
    }

    /// Switches the live player to the backend transcoder and verifies
    /// the playlist.  Any prior live player is closed first.
    pub fn open_transcode(&self, playlist_url: &str) -> Result<(), BridgeError> {
        if let Some(old) = self.live_player.lock().take() {
            old.close();
            self.set_now_playing(NowPlaying::NotPlaying);
        }
        let stream = TranscodedStream::open(Arc::clone(&self.transport), playlist_url)?;
        *self.live_player.lock() = Some(Arc::new(stream));
        self.set_now_playing(NowPlaying::Transcoding);
        Ok(())
    }

    /// Opens a recording for playback and returns its stream id.
    pub fn open_recording(
        &self,
        recording_id: &str,
        duration_secs: i64,
    ) -> Result<u64, BridgeError> {
        if self.is_serving_live(false) {
            return Err(BridgeError::StreamBusy("live"));
        }
        let sid = self.transport.sid();
        let url = methods::recording_url(self.transport.base_url(), recording_id, &sid);
        let mut map = self.recordings.lock();
        self.set_now_playing(NowPlaying::Recording);
        let stream_id = self.stream_count.fetch_add(1, Ordering::SeqCst) + 1;
        match RecordingStream::open(
            Arc::clone(&self.transport),
            url,
            duration_secs,
            self.settings.chunk_recording_kb as usize * 1024,
        ) {
            Ok(stream) => {
                map.insert(stream_id, Arc::new(stream));
                log::debug!("opened recording {} as stream {}", recording_id, stream_id);
                Ok(stream_id)
            }
            Err(err) => {
                // Keep the map bookkeeping consistent, as a close would.
                if map.is_empty() {
                    self.set_now_playing(NowPlaying::NotPlaying);
                }
                Err(err)
            }
        }
    }

    pub fn close_recorded(&self, stream_id: u64) {
        let mut map = self.recordings.lock();
        if self.now_playing() == NowPlaying::Recording {
            if let Some(stream) = map.remove(&stream_id) {
                stream.close();
            }
        }
        if map.is_empty() {
            self.set_now_playing(NowPlaying::NotPlaying);
        }
        log::debug!("closed stream {} remaining {}", stream_id, map.len());
    }

    pub fn read_recorded(&self, stream_id: u64, buf: &mut [u8]) -> Result<usize, BridgeError> {
        Ok(self.recording(stream_id)?.read(buf)?)
    }

    pub fn seek_recorded(&self, stream_id: u64, pos: SeekFrom) -> Result<u64, BridgeError> {
        Ok(self.recording(stream_id)?.seek(pos)?)
    }

    pub fn length_recorded(&self, stream_id: u64) -> Result<i64, BridgeError> {
        let stream = self.recording(stream_id)?;
        Ok(stream.length().map(|len| len as i64).unwrap_or(-1))
    }

    pub fn recorded_stream_times(&self, stream_id: u64) -> Result<StreamTimes, BridgeError> {
        if self.is_serving() {
            if self.now_playing() == NowPlaying::Recording {
                return self
                    .recording(stream_id)?
                    .stream_times()
                    .ok_or(BridgeError::NotSupported);
            }
            if let Some(player) = self.live() {
                return player.stream_times().ok_or(BridgeError::NotSupported);
            }
        }
        Err(BridgeError::NoActiveStream)
    }

    pub fn is_recorded_realtime(&self, stream_id: u64) -> Result<bool, BridgeError> {
        if self.is_serving() {
            if self.now_playing() != NowPlaying::Recording {
                return Err(BridgeError::NoActiveStream);
            }
            return Ok(self.recording(stream_id)?.is_realtime());
        }
        Ok(false)
    }

    /// Preferred read size for whatever is playing.
    pub fn chunk_size(&self) -> Result<usize, BridgeError> {
        if !self.is_serving() {
            return Err(BridgeError::NoActiveStream);
        }
        let size = match self.now_playing() {
            NowPlaying::Tv => self
                .live()
                .and_then(|player| player.chunk_size())
                .unwrap_or(DEFAULT_LIVE_CHUNK),
            NowPlaying::Recording => self.settings.chunk_recording_kb as usize * 1024,
            NowPlaying::Radio => RADIO_CHUNK,
            _ => DEFAULT_LIVE_CHUNK,
        };
        Ok(size)
    }

    /// Closes everything; used at shutdown.
    pub fn close_all(&self) {
        loop {
            let next = self
                .recordings
                .lock()
                .first_key_value()
                .map(|(id, _)| *id);
            match next {
                Some(id) => self.close_recorded(id),
                None => break,
            }
        }
        self.close_live();
    }

    fn recording(&self, stream_id: u64) -> Result<Arc<RecordingStream>, BridgeError> {
        if !self.is_serving_recording(stream_id) {
            return Err(BridgeError::UnknownStream(stream_id));
        }
        self.recordings
            .lock()
            .get(&stream_id)
            .cloned()
            .ok_or(BridgeError::UnknownStream(stream_id))
    }

    fn newest_recording(&self) -> Option<Arc<RecordingStream>> {
        self.recordings
            .lock()
            .last_key_value()
            .map(|(_, stream)| Arc::clone(stream))
    }

    fn is_serving(&self) -> bool {
        if self.is_serving_live(false) || !self.recordings.lock().is_empty() {
            return true;
        }
        log::error!(
            "unknown streaming state {:?} {}",
            self.now_playing(),
            self.recordings.lock().len()
        );
        false
    }

    fn is_serving_live(&self, log: bool) -> bool {
        let playing = self.now_playing();
        if matches!(playing, NowPlaying::Tv | NowPlaying::Radio)
            && self.live_player.lock().is_some()
        {
            return true;
        }
        if log {
            log::error!(
                "unknown live streaming state {:?} {}",
                playing,
                self.recordings.lock().len()
            );
        }
        false
    }

    fn is_serving_recording(&self, stream_id: u64) -> bool {
        let map = self.recordings.lock();
        if self.now_playing() == NowPlaying::Recording && !map.is_empty() {
            return map.contains_key(&stream_id);
        }
        log::error!(
            "unknown recording streaming state {:?} {}",
            self.now_playing(),
            map.len()
        );
        false
    }
}
