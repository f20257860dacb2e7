//! Host-facing callbacks.
//!
//! The bridge never pushes data at the host; it raises triggers and lets
//! the host pull through the regular operations.  [`HostNotifier`] is the
//! trigger surface, [`SyncHooks`] is the small amount of state the
//! heartbeat needs back from the host's recording and timer mirrors.

use std::fmt;

/// Connection state as reported to the host.
///
/// The bridge keeps two copies: a live cell that heartbeat bookkeeping
/// may move quietly, and the last announced value.  Only announcements
/// reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unknown,
    Connecting,
    Connected,
    ServerUnreachable,
    AccessDenied,
    VersionMismatch,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ServerUnreachable => "server unreachable",
            ConnectionState::AccessDenied => "access denied",
            ConnectionState::VersionMismatch => "version mismatch",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Callbacks into the host.  All methods must be cheap and non-blocking;
/// they are invoked from the heartbeat thread.
pub trait HostNotifier: Send + Sync {
    /// The announced connection state changed.
    fn connection_state_changed(&self, connection: &str, state: ConnectionState, message: &str);

    /// Channel metadata changed; the host should re-pull channels.
    fn trigger_channel_update(&self);

    /// Group membership changed; the host should re-pull groups.
    fn trigger_channel_groups_update(&self);

    /// Recordings changed on the backend.
    fn trigger_recording_update(&self);

    /// Timers changed on the backend.
    fn trigger_timer_update(&self);

    /// Guide data changed for one channel.
    fn trigger_epg_update(&self, channel_uid: u32);
}

/// State the heartbeat reads back from the host's mirrors.
pub trait SyncHooks: Send + Sync {
    /// Epoch seconds of the newest timer change the host has applied.
    fn last_timer_update(&self) -> i64;

    /// Re-read watched state when only resume positions changed.
    fn refresh_resume_positions(&self);
}

/// Notifier that writes every callback to the log.  Useful for tools
/// that have no host to forward to.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl HostNotifier for LoggingNotifier {
    fn connection_state_changed(&self, connection: &str, state: ConnectionState, message: &str) {
        if message.is_empty() {
            log::info!("connection {} changed state: {}", connection, state);
        } else {
            log::info!("connection {} changed state: {} ({})", connection, state, message);
        }
    }

    fn trigger_channel_update(&self) {
        log::info!("trigger: channel update");
    }

    fn trigger_channel_groups_update(&self) {
        log::info!("trigger: channel groups update");
    }

    fn trigger_recording_update(&self) {
        log::info!("trigger: recording update");
    }

    fn trigger_timer_update(&self) {
        log::info!("trigger: timer update");
    }

    fn trigger_epg_update(&self, channel_uid: u32) {
        log::debug!("trigger: epg update for channel {}", channel_uid);
    }
}

/// Hooks for hosts that keep no recording or timer mirror.
#[derive(Debug, Default)]
pub struct NullSyncHooks;

impl SyncHooks for NullSyncHooks {
    fn last_timer_update(&self) -> i64 {
        0
    }

    fn refresh_resume_positions(&self) {}
}
