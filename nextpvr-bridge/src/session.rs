//! Connection lifecycle and heartbeat.
//!
//! One [`SessionManager`] owns the login handshake, the connection state
//! cells and the background poller that watches backend change timestamps
//! while nothing is playing.  Two cells track state: the live cell moves
//! with every internal observation, the announced cell only moves when
//! the host is told.  Bookkeeping transitions (the one-shot unreachable
//! grace, quiet recovery after it) touch the live cell alone.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use nextpvr_protocol::response::{self, SessionInitiate, SettingList};
use nextpvr_protocol::types::MIN_BACKEND_VERSION;
use nextpvr_protocol::{digest, methods};

use crate::channels::ChannelCatalog;
use crate::error::BridgeError;
use crate::host::{ConnectionState, HostNotifier, SyncHooks};
use crate::settings::InstanceSettings;
use crate::streams::{NowPlaying, StreamDispatcher};
use crate::transport::Transport;

/// Default backend poll interval in seconds.  Any other configured value
/// also switches the loop to the slow tick.
pub const DEFAULT_HEARTBEAT: i64 = 120;

const SLOW_CONNECT_POLL: i64 = 60;
const FAST_CONNECT_POLL: i64 = 5;

// A starting backend can sit in tuner discovery for up to a minute; stay
// on the fast retry a little past that.
const FAST_SLOW_POLL_TRANSITION: i64 = 65;

/// Epoch-seconds sentinel for clocks parked forever.
const NEVER: i64 = i64::MAX;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

struct StateCells {
    /// Where the connection really is.
    live: ConnectionState,
    /// What the host last heard.
    announced: ConnectionState,
}

pub struct SessionManager {
    settings: Arc<InstanceSettings>,
    transport: Arc<Transport>,
    catalog: Arc<ChannelCatalog>,
    dispatcher: Arc<StreamDispatcher>,
    notifier: Arc<dyn HostNotifier>,
    hooks: Arc<dyn SyncHooks>,
    state: Mutex<StateCells>,
    connected: AtomicBool,
    connection_confirmed: AtomicBool,
    backend_version: AtomicU32,
    /// Epoch seconds of the newest recording change already handled.
    last_recording_update: AtomicI64,
    /// Epoch seconds of the newest guide change already handled.
    last_epg_update: AtomicI64,
    /// Earliest time the next reconnect attempt may run.
    next_server_check: AtomicI64,
    first_session_initiate: AtomicI64,
    running: AtomicBool,
    sleeper: Mutex<()>,
    wakeup: Condvar,
}

impl SessionManager {
    pub fn new(
        settings: Arc<InstanceSettings>,
        transport: Arc<Transport>,
        catalog: Arc<ChannelCatalog>,
        dispatcher: Arc<StreamDispatcher>,
        notifier: Arc<dyn HostNotifier>,
        hooks: Arc<dyn SyncHooks>,
    ) -> SessionManager {
        SessionManager {
            connected: AtomicBool::new(false),
            connection_confirmed: AtomicBool::new(settings.connection_confirmed),
            backend_version: AtomicU32::new(0),
            // First poll runs one interval after startup.
            last_recording_update: AtomicI64::new(unix_now()),
            last_epg_update: AtomicI64::new(0),
            next_server_check: AtomicI64::new(0),
            first_session_initiate: AtomicI64::new(0),
            running: AtomicBool::new(false),
            state: Mutex::new(StateCells {
                live: ConnectionState::Unknown,
                announced: ConnectionState::Unknown,
            }),
            sleeper: Mutex::new(()),
            wakeup: Condvar::new(),
            settings,
            transport,
            catalog,
            dispatcher,
            notifier,
            hooks,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn live_state(&self) -> ConnectionState {
        self.state.lock().live
    }

    pub fn announced_state(&self) -> ConnectionState {
        self.state.lock().announced
    }

    /// Packed backend version from the last `setting.list`, zero before
    /// the first successful connect.
    pub fn backend_version(&self) -> u32 {
        self.backend_version.load(Ordering::SeqCst)
    }

    /// Announces `state` to the host and moves both cells.  Entering
    /// `Connected` from any announced state other than `Unknown` also
    /// asks the host to re-pull channel groups.
    fn announce(&self, state: ConnectionState, message: &str) {
        self.notifier
            .connection_state_changed(&self.settings.host, state, message);
        let entering_connected = {
            let mut cells = self.state.lock();
            let was = cells.announced;
            cells.live = state;
            cells.announced = state;
            state == ConnectionState::Connected && was != ConnectionState::Unknown
        };
        if entering_connected {
            self.notifier.trigger_channel_groups_update();
        }
    }

    fn set_live_state(&self, state: ConnectionState) {
        self.state.lock().live = state;
    }

    /// Establishes a session.  Returns `Ok` when the bridge is usable,
    /// which includes the quiet unreachable state for backends that were
    /// reachable before; any `Err` is final and the heartbeat will not
    /// retry on its own.
    pub fn connect(&self, send_wol: bool) -> Result<(), BridgeError> {
        self.connected.store(false, Ordering::SeqCst);
        if send_wol {
            self.send_wake_on_lan();
        }
        if self.live_state() == ConnectionState::Unknown {
            self.announce(ConnectionState::Connecting, "");
        }

        self.transport.clear_sid();
        if self.first_session_initiate.load(Ordering::SeqCst) == 0 {
            self.first_session_initiate.store(unix_now(), Ordering::SeqCst);
        }

        let initiate: SessionInitiate = match self.transport.call(&methods::session_initiate()) {
            Ok(body) => body,
            Err(err) => {
                if self.connection_confirmed.load(Ordering::SeqCst)
                    || !self.settings.instance_priority
                {
                    // Keep retrying quietly until the backend shows up.
                    self.update_server_check();
                    self.set_live_state(ConnectionState::ServerUnreachable);
                    return Ok(());
                }
                return Err(err);
            }
        };
        log::debug!(
            "session.initiate returned sid={} salt={}",
            initiate.sid,
            initiate.salt
        );

        let pin_digest = digest::login_digest(&self.settings.pin, &initiate.salt);
        if let Err(err) = self
            .transport
            .action(&methods::session_login(&initiate.sid, &pin_digest))
        {
            log::debug!("session login rejected: {}", err);
            self.announce(ConnectionState::AccessDenied, "check the configured PIN");
            return Err(BridgeError::AccessDenied);
        }
        self.transport.set_sid(&initiate.sid);

        if let Ok(backend) = self.transport.call::<SettingList>(methods::SETTING_LIST) {
            self.backend_version.store(backend.version, Ordering::SeqCst);
            if backend.version < MIN_BACKEND_VERSION {
                let found = backend.version_string();
                let minimum = response::format_version(MIN_BACKEND_VERSION);
                log::error!("backend version {} below supported minimum {}", found, minimum);
                if let Err(err) = self.transport.action(methods::SESSION_LOGOUT) {
                    log::debug!("session logout failed: {}", err);
                }
                self.announce(ConnectionState::VersionMismatch, &found);
                return Err(BridgeError::VersionMismatch { found, minimum });
            }
        }

        self.configure_post_connect();
        self.connection_confirmed.store(true, Ordering::SeqCst);
        log::debug!("session login successful");
        self.connected.store(true, Ordering::SeqCst);
        self.announce(ConnectionState::Connected, "");
        Ok(())
    }

    /// Schedules the next reconnect attempt: every 5 s within the first
    /// 65 s after the first initiate, every 60 s after that.
    fn update_server_check(&self) {
        let now = unix_now();
        let next = if now > self.first_session_initiate.load(Ordering::SeqCst) + FAST_SLOW_POLL_TRANSITION
        {
            now + SLOW_CONNECT_POLL
        } else {
            now + FAST_CONNECT_POLL
        };
        self.next_server_check.store(next, Ordering::SeqCst);
    }

    /// Forces a retry on the next heartbeat tick.
    pub fn reset_connection(&self) {
        self.next_server_check.store(0, Ordering::SeqCst);
        self.set_live_state(ConnectionState::Disconnected);
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Logs out and tells the host the session ended.
    pub fn disconnect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            if let Err(err) = self.transport.action(methods::SESSION_LOGOUT) {
                log::debug!("session logout failed: {}", err);
            }
        }
        if self.settings.is_instance_valid() {
            self.announce(ConnectionState::Disconnected, "");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Blocking reconnect used when a stream is requested while offline.
    /// Parks the retry clock so the heartbeat stays out of the way.
    pub fn reconnect_for_stream(&self) {
        self.next_server_check.store(NEVER, Ordering::SeqCst);
        if let Err(err) = self.connect(true) {
            log::warn!("reconnect before stream open failed: {}", err);
        }
        if self.connected.load(Ordering::SeqCst) {
            self.announce(ConnectionState::Connected, "");
        }
    }

    fn configure_post_connect(&self) {
        if self.settings.use_live_streams {
            self.catalog.load_live_streams();
        }
        if self.last_epg_update.load(Ordering::SeqCst) == 0 {
            if let Ok(epg_time) = self.transport.last_update(methods::EPG_SUMMARY) {
                self.last_epg_update.store(epg_time, Ordering::SeqCst);
            }
        }
        self.catalog
            .cache_all_channels(self.last_epg_update.load(Ordering::SeqCst) as u64);
    }

    /// One heartbeat step.  Returns whether a session is currently up.
    ///
    /// While idle and due, polls the backend change timestamp and raises
    /// the matching host triggers; while playing, renews the session id
    /// instead.  When the session is down, drives the reconnect backoff.
    pub fn is_up(&self) -> bool {
        let now = unix_now();
        if self.connected.load(Ordering::SeqCst) {
            match self.dispatcher.now_playing() {
                NowPlaying::NotPlaying => {
                    let last = self.last_recording_update.load(Ordering::SeqCst);
                    if last != NEVER && now > last + self.settings.heartbeat_interval_secs {
                        self.poll_backend();
                    }
                }
                playing => {
                    if let Err(err) = self.transport.renew_sid() {
                        log::error!("session renew failed: {}", err);
                    }
                    if playing == NowPlaying::Transcoding && !self.dispatcher.transcode_healthy() {
                        log::info!("transcode lease expired, dropping live player");
                        self.dispatcher.release_live_player();
                    }
                }
            }
        } else if matches!(
            self.live_state(),
            ConnectionState::ServerUnreachable | ConnectionState::Disconnected
        ) && now > self.next_server_check.load(Ordering::SeqCst)
        {
            if let Err(err) = self.connect(false) {
                log::debug!("reconnect attempt failed: {}", err);
            }
            let announced = self.announced_state();
            if announced == ConnectionState::Connecting
                || (announced == ConnectionState::Disconnected
                    && unix_now()
                        > self.first_session_initiate.load(Ordering::SeqCst)
                            + FAST_SLOW_POLL_TRANSITION)
            {
                self.announce(ConnectionState::ServerUnreachable, "");
            }
        }
        self.connected.load(Ordering::SeqCst)
    }

    /// Queries the backend change timestamps and fires host triggers.
    fn poll_backend(&self) {
        match self.transport.last_update(methods::RECORDING_LAST_UPDATED) {
            Ok(update_time) => {
                if self.live_state() == ConnectionState::ServerUnreachable {
                    // One-shot failure resolved.
                    self.set_live_state(ConnectionState::Connected);
                }
                if update_time > self.last_recording_update.load(Ordering::SeqCst) {
                    // Park the clock while deciding which triggers to raise.
                    self.last_recording_update.store(NEVER, Ordering::SeqCst);
                    if let Ok(epg_time) = self.transport.last_update(methods::EPG_SUMMARY) {
                        if epg_time > self.last_epg_update.load(Ordering::SeqCst) {
                            if self.catalog.reset_channel_cache(epg_time as u64) {
                                self.notifier.trigger_channel_groups_update();
                            }
                            let mut triggered = 0;
                            for (uid, detail) in self.catalog.details_snapshot() {
                                if detail.has_epg {
                                    triggered += 1;
                                    self.notifier.trigger_epg_update(uid);
                                }
                            }
                            log::debug!("triggered {} channel guide updates", triggered);
                            self.last_epg_update.store(epg_time, Ordering::SeqCst);
                            self.last_recording_update.store(update_time, Ordering::SeqCst);
                            return;
                        }
                    }
                    if self.settings.access.allows_recordings() {
                        if update_time <= self.hooks.last_timer_update() + 1 {
                            // The host already saw this change through its
                            // own timer write.
                            self.last_recording_update.store(unix_now(), Ordering::SeqCst);
                            return;
                        }
                        if let Ok(without_resume) =
                            self.transport.last_update(methods::RECORDING_LAST_UPDATED_IGNORE_RESUME)
                        {
                            if without_resume <= self.hooks.last_timer_update() {
                                // Only resume positions moved.
                                if self.settings.backend_resume {
                                    self.hooks.refresh_resume_positions();
                                }
                                self.last_recording_update.store(update_time, Ordering::SeqCst);
                                return;
                            }
                        }
                        self.notifier.trigger_recording_update();
                        if self.settings.access.allows_timers() {
                            self.notifier.trigger_timer_update();
                        }
                        self.last_recording_update.store(update_time, Ordering::SeqCst);
                    } else {
                        self.last_recording_update.store(unix_now(), Ordering::SeqCst);
                    }
                } else {
                    self.last_recording_update.store(unix_now(), Ordering::SeqCst);
                }
            }
            Err(err) => {
                log::warn!("backend poll failed: {}", err);
                match self.live_state() {
                    ConnectionState::Connected => {
                        if self.settings.heartbeat_interval_secs == DEFAULT_HEARTBEAT {
                            // Allow one quiet retry before telling the host.
                            self.set_live_state(ConnectionState::ServerUnreachable);
                            self.last_recording_update.store(unix_now(), Ordering::SeqCst);
                        } else {
                            self.announce(ConnectionState::Disconnected, "");
                            self.update_server_check();
                            self.connected.store(false, Ordering::SeqCst);
                        }
                    }
                    ConnectionState::ServerUnreachable => {
                        self.announce(ConnectionState::Disconnected, "");
                        self.update_server_check();
                        self.connected.store(false, Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Spawns the heartbeat thread.  The caller keeps the handle and
    /// joins it after [`SessionManager::stop`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let session = Arc::clone(self);
        std::thread::spawn(move || session.process())
    }

    /// Asks the heartbeat thread to exit.  Returns without waiting; the
    /// thread wakes from its tick sleep immediately.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _guard = self.sleeper.lock();
        self.wakeup.notify_all();
    }

    fn process(&self) {
        log::debug!("heartbeat started");
        while self.running.load(Ordering::SeqCst) {
            self.is_up();
            let tick = if self.settings.heartbeat_interval_secs == DEFAULT_HEARTBEAT {
                Duration::from_millis(2500)
            } else {
                Duration::from_secs(10)
            };
            let mut guard = self.sleeper.lock();
            if self.running.load(Ordering::SeqCst) {
                let _ = self.wakeup.wait_for(&mut guard, tick);
            }
        }
        log::debug!("heartbeat stopped");
    }

    /// Parks every clock and quietly marks the session down.
    pub fn on_system_sleep(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.last_recording_update.store(NEVER, Ordering::SeqCst);
        self.next_server_check.store(NEVER, Ordering::SeqCst);
        self.set_live_state(ConnectionState::Disconnected);
    }

    /// Resumes after a system sleep.  A still-valid session that answers
    /// one ping carries on silently; anything else runs a full connect.
    pub fn on_system_wake(&self) -> Result<(), BridgeError> {
        let now = unix_now();
        self.first_session_initiate.store(now, Ordering::SeqCst);
        self.next_server_check
            .store(now + FAST_SLOW_POLL_TRANSITION, Ordering::SeqCst);
        log::debug!("backend wake");
        // Give the host time to settle before the next poll.
        self.last_recording_update
            .store(now + SLOW_CONNECT_POLL, Ordering::SeqCst);

        if self.transport.is_active_sid() && self.transport.ping() {
            self.set_live_state(ConnectionState::Connected);
            self.connected.store(true, Ordering::SeqCst);
            return Ok(());
        }
        // The host accepts a Connecting announcement only once; step
        // through Disconnected instead.
        self.announce(ConnectionState::Disconnected, "");
        self.set_live_state(ConnectionState::Connecting);

        match self.connect(true) {
            Ok(()) => {
                log::info!(
                    "wake reconnect finished, connected={} state={}",
                    self.connected.load(Ordering::SeqCst),
                    self.live_state()
                );
                Ok(())
            }
            Err(err) => {
                self.announce(ConnectionState::AccessDenied, "");
                Err(err)
            }
        }
    }

    /// Tries to wake the backend host.  Does nothing for local or
    /// off-LAN backends; stops as soon as the backend answers a ping.
    fn send_wake_on_lan(&self) {
        if !self.settings.enable_wol {
            return;
        }
        if self.settings.is_localhost() || !self.settings.is_host_on_lan() {
            return;
        }
        let mac = match parse_mac(&self.settings.wol_mac) {
            Some(mac) => mac,
            None => {
                log::warn!("bad wake-on-lan MAC address {:?}", self.settings.wol_mac);
                return;
            }
        };
        for count in 0..self.settings.wol_timeout_secs {
            if self.transport.ping() {
                return;
            }
            if let Err(err) = send_magic_packet(mac) {
                log::warn!("wake-on-lan send failed: {}", err);
            } else {
                log::debug!("wake-on-lan packet {} sent", count);
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}

/// Parses `aa:bb:cc:dd:ee:ff` (or dash-separated) into raw bytes.
fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut count = 0;
    for part in mac.split(|c| c == ':' || c == '-') {
        if count == 6 {
            return None;
        }
        out[count] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    if count == 6 {
        Some(out)
    } else {
        None
    }
}

/// Standard wake frame: six `0xff` bytes then the MAC sixteen times,
/// sent as a UDP broadcast to the discard port.
fn send_magic_packet(mac: [u8; 6]) -> std::io::Result<()> {
    let mut packet = [0u8; 102];
    packet[..6].fill(0xff);
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    socket.send_to(&packet, ("255.255.255.255", 9))?;
    Ok(())
}
