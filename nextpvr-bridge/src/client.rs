//! Host-facing facade.
//!
//! One [`PvrClient`] per backend instance.  It owns the session manager,
//! channel catalog and stream dispatcher, starts the heartbeat thread on
//! construction and tears everything down in `Drop`.  Host calls arrive
//! on arbitrary threads; every method here is safe to call concurrently
//! with the heartbeat.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use nextpvr_protocol::genre::{GenreBlock, GenreMapper};
use nextpvr_protocol::{methods, ChannelKind, StreamingMethod};

use crate::channels::{ChannelCatalog, ChannelItem, GroupItem, GroupMemberItem};
use crate::error::BridgeError;
use crate::host::{ConnectionState, HostNotifier, SyncHooks};
use crate::session::SessionManager;
use crate::settings::InstanceSettings;
use crate::streams::{NowPlaying, StreamDispatcher, StreamTimes};
use crate::transport::Transport;

/// Feature switches reported to the host, derived from the instance
/// settings and access level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub epg: bool,
    pub tv: bool,
    pub radio: bool,
    pub channel_groups: bool,
    pub handles_input_stream: bool,
    pub recordings: bool,
    pub recordings_delete: bool,
    pub recording_size: bool,
    pub timers: bool,
    pub last_played_position: bool,
    pub recording_play_count: bool,
    pub recording_edl: bool,
    pub multiple_recorded_streams: bool,
}

pub struct PvrClient {
    settings: Arc<InstanceSettings>,
    transport: Arc<Transport>,
    catalog: Arc<ChannelCatalog>,
    dispatcher: Arc<StreamDispatcher>,
    session: Arc<SessionManager>,
    genres: GenreMapper,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl PvrClient {
    /// Builds the component graph and starts the heartbeat.  The
    /// instance directory is created here; nothing talks to the backend
    /// until [`PvrClient::connect`].
    pub fn new(
        settings: InstanceSettings,
        notifier: Arc<dyn HostNotifier>,
        hooks: Arc<dyn SyncHooks>,
    ) -> Result<PvrClient, BridgeError> {
        std::fs::create_dir_all(&settings.instance_dir)?;
        let genres = load_genre_mapper(&settings);
        let settings = Arc::new(settings);
        let transport = Arc::new(Transport::new(&settings));
        let catalog = Arc::new(ChannelCatalog::new(
            Arc::clone(&settings),
            Arc::clone(&transport),
        ));
        let dispatcher = Arc::new(StreamDispatcher::new(
            Arc::clone(&settings),
            Arc::clone(&transport),
        ));
        let session = Arc::new(SessionManager::new(
            Arc::clone(&settings),
            Arc::clone(&transport),
            Arc::clone(&catalog),
            Arc::clone(&dispatcher),
            notifier,
            hooks,
        ));
        let heartbeat = Mutex::new(Some(session.start()));
        Ok(PvrClient {
            settings,
            transport,
            catalog,
            dispatcher,
            session,
            genres,
            heartbeat,
        })
    }

    pub fn settings(&self) -> &InstanceSettings {
        &self.settings
    }

    pub fn connect(&self, send_wol: bool) -> Result<(), BridgeError> {
        self.session.connect(send_wol)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.live_state()
    }

    pub fn capabilities(&self) -> ClientCapabilities {
        let access = self.settings.access;
        ClientCapabilities {
            epg: true,
            tv: true,
            radio: self.settings.show_radio,
            channel_groups: true,
            handles_input_stream: true,
            recordings: access.allows_recordings(),
            recordings_delete: access.allows_recording_delete(),
            recording_size: self.settings.show_recording_size,
            timers: access.allows_timers(),
            last_played_position: self.settings.backend_resume,
            recording_play_count: self.settings.backend_resume,
            recording_edl: self.settings.comskip,
            multiple_recorded_streams: !self.settings.recording_poster,
        }
    }

    /// Server name shown in the host's recording views.
    pub fn backend_name(&self) -> String {
        format!("NextPVR:{}", self.settings.instance_name)
    }

    pub fn backend_hostname(&self) -> String {
        self.settings.host.clone()
    }

    /// Backend version as a plain number string, or a placeholder before
    /// the first connect.
    pub fn backend_version(&self) -> String {
        if self.session.is_connected() {
            self.session.backend_version().to_string()
        } else {
            "unknown".to_string()
        }
    }

    pub fn connection_string(&self) -> String {
        if self.session.is_connected() {
            self.settings.host.clone()
        } else {
            format!("{}: offline", self.settings.host)
        }
    }

    fn ensure_connected(&self, operation: &str) -> Result<(), BridgeError> {
        if self.session.live_state() != ConnectionState::Connected {
            log::error!("{} called while disconnected", operation);
            return Err(BridgeError::NotConnected);
        }
        Ok(())
    }

    pub fn channel_count(&self) -> Result<usize, BridgeError> {
        self.ensure_connected("channel count")?;
        Ok(self.catalog.num_channels())
    }

    pub fn channels(&self, radio: bool) -> Result<Vec<ChannelItem>, BridgeError> {
        self.catalog.get_channels(radio)
    }

    pub fn group_count(&self) -> Result<usize, BridgeError> {
        self.ensure_connected("group count")?;
        Ok(self.catalog.group_count())
    }

    pub fn channel_groups(&self, radio: bool) -> Result<Vec<GroupItem>, BridgeError> {
        self.catalog.get_channel_groups(radio)
    }

    pub fn group_members(
        &self,
        group_name: &str,
        radio: bool,
    ) -> Result<Vec<GroupMemberItem>, BridgeError> {
        self.catalog.get_group_members(group_name, radio)
    }

    pub fn channel_kind(&self, channel_uid: u32) -> ChannelKind {
        self.catalog.channel_type(channel_uid)
    }

    pub fn channel_icon(&self, channel_uid: u32) -> Option<PathBuf> {
        self.catalog.get_channel_icon(channel_uid)
    }

    /// Stream properties for channels the host plays directly: plugin
    /// overrides and backend-transcoded HLS.  Everything else reports
    /// not-supported and goes through [`PvrClient::open_live_stream`].
    pub fn channel_stream_properties(
        &self,
        channel_uid: u32,
        radio: bool,
    ) -> Result<Vec<(String, String)>, BridgeError> {
        if self.catalog.is_channel_a_plugin(channel_uid) {
            let url = self.catalog.live_stream_url(channel_uid).unwrap_or_default();
            return Ok(vec![
                ("streamurl".to_string(), url),
                ("isrealtimestream".to_string(), "true".to_string()),
            ]);
        }
        if self.settings.live_streaming_method == StreamingMethod::Transcoded && !radio {
            let url = methods::transcode_playlist_url(
                self.transport.base_url(),
                &self.transport.sid(),
            );
            self.dispatcher.open_transcode(&url)?;
            let mut properties = Vec::new();
            if self.settings.transcoded_timeshift {
                properties.push((
                    "inputstream".to_string(),
                    "inputstream.ffmpegdirect".to_string(),
                ));
                properties.push((
                    "inputstream.ffmpegdirect.stream_mode".to_string(),
                    "timeshift".to_string(),
                ));
                properties.push((
                    "inputstream.ffmpegdirect.manifest_type".to_string(),
                    "hls".to_string(),
                ));
            }
            properties.push(("streamurl".to_string(), url));
            properties.push(("isrealtimestream".to_string(), "true".to_string()));
            properties.push(("mimetype".to_string(), "application/x-mpegURL".to_string()));
            return Ok(properties);
        }
        Err(BridgeError::NotSupported)
    }

    /// Opens live playback.  A dead session is reconnected inline first,
    /// unless wake-on-LAN is configured, in which case the connect path
    /// already handled waking.
    pub fn open_live_stream(&self, channel_uid: u32, radio: bool) -> Result<(), BridgeError> {
        if !self.session.is_connected() && !self.settings.enable_wol {
            self.session.reconnect_for_stream();
        }
        let override_url = self.catalog.live_stream_url(channel_uid);
        self.dispatcher
            .open_live(channel_uid, radio, override_url.as_deref())
    }

    pub fn close_live_stream(&self) {
        self.dispatcher.close_live();
    }

    pub fn read_live_stream(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        self.dispatcher.read_live(buf)
    }

    pub fn seek_live_stream(&self, pos: SeekFrom) -> Result<u64, BridgeError> {
        self.dispatcher.seek_live(pos)
    }

    pub fn live_stream_length(&self) -> Result<i64, BridgeError> {
        self.dispatcher.length_live()
    }

    pub fn can_pause_stream(&self) -> bool {
        self.dispatcher.can_pause()
    }

    pub fn can_seek_stream(&self) -> bool {
        self.dispatcher.can_seek()
    }

    pub fn pause_stream(&self, on: bool) {
        self.dispatcher.pause(on)
    }

    pub fn is_timeshifting(&self) -> bool {
        self.dispatcher.is_timeshifting()
    }

    pub fn is_realtime_stream(&self) -> bool {
        self.dispatcher.is_realtime()
    }

    pub fn stream_times(&self) -> Result<StreamTimes, BridgeError> {
        self.dispatcher.stream_times()
    }

    /// Signal-status probes carry no tuner data on this backend, but
    /// they arrive periodically during playback and keep the transcoder
    /// lease alive.
    pub fn signal_status(&self) {
        self.dispatcher.keep_transcode_alive()
    }

    pub fn chunk_size(&self) -> Result<usize, BridgeError> {
        self.dispatcher.chunk_size()
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.dispatcher.now_playing()
    }

    pub fn open_recorded_stream(
        &self,
        recording_id: &str,
        duration_secs: i64,
    ) -> Result<u64, BridgeError> {
        self.dispatcher.open_recording(recording_id, duration_secs)
    }

    pub fn close_recorded_stream(&self, stream_id: u64) {
        self.dispatcher.close_recorded(stream_id)
    }

    pub fn read_recorded_stream(
        &self,
        stream_id: u64,
        buf: &mut [u8],
    ) -> Result<usize, BridgeError> {
        self.dispatcher.read_recorded(stream_id, buf)
    }

    pub fn seek_recorded_stream(
        &self,
        stream_id: u64,
        pos: SeekFrom,
    ) -> Result<u64, BridgeError> {
        self.dispatcher.seek_recorded(stream_id, pos)
    }

    pub fn recorded_stream_length(&self, stream_id: u64) -> Result<i64, BridgeError> {
        self.dispatcher.length_recorded(stream_id)
    }

    pub fn recorded_stream_times(&self, stream_id: u64) -> Result<StreamTimes, BridgeError> {
        self.dispatcher.recorded_stream_times(stream_id)
    }

    pub fn is_recorded_stream_realtime(&self, stream_id: u64) -> Result<bool, BridgeError> {
        self.dispatcher.is_recorded_realtime(stream_id)
    }

    pub fn pause_recorded_stream(&self, stream_id: u64, on: bool) -> Result<(), BridgeError> {
        self.dispatcher.pause_recorded(stream_id, on)
    }

    pub fn on_system_sleep(&self) {
        self.session.on_system_sleep()
    }

    pub fn on_system_wake(&self) -> Result<(), BridgeError> {
        self.session.on_system_wake()
    }

    pub fn genres(&self) -> &GenreMapper {
        &self.genres
    }

    /// Folds programme genre labels into `block` under this instance's
    /// genre policy.
    pub fn resolve_genres(&self, block: &mut GenreBlock, labels: &[&str]) -> bool {
        self.genres
            .apply(block, labels, self.settings.use_dvb_genre())
    }
}

impl Drop for PvrClient {
    fn drop(&mut self) {
        self.dispatcher.close_all();
        self.session.stop();
        if let Some(handle) = self.heartbeat.lock().take() {
            let _ = handle.join();
        }
        if self.session.is_connected() {
            self.session.disconnect();
        }
    }
}

fn load_genre_mapper(settings: &InstanceSettings) -> GenreMapper {
    let Some(path) = settings.genre_mapping_file.as_ref() else {
        return GenreMapper::default();
    };
    match std::fs::read_to_string(path) {
        Ok(xml) => match GenreMapper::from_xml(&xml) {
            Ok(mapper) => {
                log::info!("loaded {} genre translations", mapper.len());
                mapper
            }
            Err(err) => {
                log::error!("genre table {} invalid: {}", path.display(), err);
                GenreMapper::default()
            }
        },
        Err(err) => {
            log::warn!("cannot read genre table {}: {}", path.display(), err);
            GenreMapper::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_dir, xml, CollectingNotifier, FakeBackend, FixedHooks};
    use nextpvr_protocol::AccessLevel;

    fn client_with(settings: InstanceSettings) -> (PvrClient, Arc<CollectingNotifier>) {
        let notifier = CollectingNotifier::new();
        let client =
            PvrClient::new(settings, notifier.clone(), FixedHooks::new(0)).unwrap();
        (client, notifier)
    }

    fn connect_routes(backend: &FakeBackend) {
        backend.on("session.initiate", 200, xml::SESSION_INITIATE);
        backend.on("session.login", 200, xml::OK);
        backend.on("session.logout", 200, xml::OK);
        backend.on("setting.list", 200, xml::SETTINGS);
        backend.on("system.epg.summary", 200, &xml::last_update(9000));
        backend.on("channel.list", 200, xml::CHANNELS_TWO_TV_ONE_RADIO);
    }

    #[test]
    fn test_capabilities_follow_settings() {
        let backend = FakeBackend::start();
        let dir = scratch_dir("client-caps");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            ..backend.settings()
        });
        let caps = client.capabilities();
        assert!(caps.epg && caps.tv && caps.radio && caps.channel_groups);
        assert!(caps.handles_input_stream);
        assert!(caps.recordings && caps.recordings_delete && caps.timers);
        assert!(caps.last_played_position && caps.recording_play_count);
        assert!(caps.recording_edl);
        assert!(!caps.recording_size);
        // Poster fetching forces a single recorded stream.
        assert!(!caps.multiple_recorded_streams);
        drop(client);

        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            access: AccessLevel::NONE,
            show_radio: false,
            backend_resume: false,
            comskip: false,
            recording_poster: false,
            ..backend.settings()
        });
        let caps = client.capabilities();
        assert!(!caps.recordings && !caps.recordings_delete && !caps.timers);
        assert!(!caps.radio && !caps.last_played_position && !caps.recording_edl);
        assert!(caps.multiple_recorded_streams);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_backend_info_reflects_connection() {
        let backend = FakeBackend::start();
        connect_routes(&backend);
        let dir = scratch_dir("client-info");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            instance_name: "Den".to_string(),
            ..backend.settings()
        });

        assert_eq!(client.backend_name(), "NextPVR:Den");
        assert_eq!(client.backend_version(), "unknown");
        assert_eq!(client.connection_string(), "127.0.0.1: offline");

        client.connect(false).unwrap();
        assert_eq!(client.backend_version(), "60205");
        assert_eq!(client.connection_string(), "127.0.0.1");
        assert_eq!(client.backend_hostname(), "127.0.0.1");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_counts_require_connection() {
        let backend = FakeBackend::start();
        connect_routes(&backend);
        backend.on("channel.groups", 200, xml::GROUPS_BACKEND);
        let dir = scratch_dir("client-counts");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            ..backend.settings()
        });

        assert!(matches!(
            client.channel_count(),
            Err(BridgeError::NotConnected)
        ));
        assert!(matches!(client.group_count(), Err(BridgeError::NotConnected)));

        client.connect(false).unwrap();
        assert_eq!(client.channel_count().unwrap(), 3);

        let groups = client.channel_groups(false).unwrap();
        let names: Vec<&str> = groups.iter().map(|group| group.name.as_str()).collect();
        assert_eq!(names, ["All channels", "HD", "News"]);
        assert_eq!(client.group_count().unwrap(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stream_properties_plugin_channel() {
        let backend = FakeBackend::start();
        backend.on(
            "/public/service.xml",
            200,
            r#"<streams><stream id="7">http://cdn.example.com/seven.m3u8</stream></streams>"#,
        );
        let dir = scratch_dir("client-plugin");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            ..backend.settings()
        });
        client.catalog.load_live_streams();

        let properties = client.channel_stream_properties(7, false).unwrap();
        assert_eq!(
            properties,
            vec![
                (
                    "streamurl".to_string(),
                    "http://cdn.example.com/seven.m3u8".to_string()
                ),
                ("isrealtimestream".to_string(), "true".to_string()),
            ]
        );
        // Channels without an override use the open/read path instead.
        assert!(matches!(
            client.channel_stream_properties(8, false),
            Err(BridgeError::NotSupported)
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stream_properties_transcoded() {
        let backend = FakeBackend::start();
        backend.on("channel.transcode.m3u8", 200, "#EXTM3U\n");
        let dir = scratch_dir("client-transcode");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            live_streaming_method: StreamingMethod::Transcoded,
            transcoded_timeshift: true,
            ..backend.settings()
        });

        let properties = client.channel_stream_properties(7, false).unwrap();
        let keys: Vec<&str> = properties.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "inputstream",
                "inputstream.ffmpegdirect.stream_mode",
                "inputstream.ffmpegdirect.manifest_type",
                "streamurl",
                "isrealtimestream",
                "mimetype"
            ]
        );
        assert_eq!(client.now_playing(), NowPlaying::Transcoding);

        // Radio is never transcoded.
        assert!(matches!(
            client.channel_stream_properties(9, true),
            Err(BridgeError::NotSupported)
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_open_live_reconnects_when_offline() {
        let backend = FakeBackend::start();
        connect_routes(&backend);
        backend.on("/live?channeloid=7", 200, "tsdata");
        let dir = scratch_dir("client-reopen");
        let (client, notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            ..backend.settings()
        });

        client.open_live_stream(7, false).unwrap();
        assert!(client.is_connected());
        assert_eq!(client.now_playing(), NowPlaying::Tv);
        // The inline reconnect repeats the connected announcement.
        assert_eq!(notifier.count("state:connected"), 2);
        assert_eq!(notifier.count("groups"), 2);
        client.close_live_stream();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_open_live_skips_reconnect_with_wol_configured() {
        let backend = FakeBackend::start();
        backend.on("/live?channeloid=7", 200, "tsdata");
        let dir = scratch_dir("client-wol");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            enable_wol: true,
            ..backend.settings()
        });

        client.open_live_stream(7, false).unwrap();
        assert_eq!(backend.requests_matching("session.initiate"), 0);
        client.close_live_stream();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_drop_closes_streams_and_logs_out() {
        let backend = FakeBackend::start();
        connect_routes(&backend);
        backend.on("/live?recording=", 200, "recdata");
        let dir = scratch_dir("client-drop");
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            ..backend.settings()
        });

        client.connect(false).unwrap();
        client.open_recorded_stream("12", 1800).unwrap();
        drop(client);

        assert_eq!(backend.requests_matching("session.logout"), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_genre_resolution_uses_instance_policy() {
        let backend = FakeBackend::start();
        let dir = scratch_dir("client-genre");
        let table = dir.join("genres.xml");
        std::fs::write(
            &table,
            r#"<translations>
                <genre name="Movie" type="16" subtype="0"/>
                <genre name="Drama" type="16" subtype="8"/>
              </translations>"#,
        )
        .unwrap();
        let (client, _notifier) = client_with(InstanceSettings {
            instance_dir: dir.clone(),
            genre_mapping_file: Some(table),
            ..backend.settings()
        });

        assert_eq!(client.genres().len(), 2);
        let mut block = GenreBlock::default();
        assert!(client.resolve_genres(&mut block, &["Movie", "Drama"]));
        assert_eq!(block.genre_type, 16);
        assert_eq!(block.genre_subtype, 8);
        assert_eq!(block.description, None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
