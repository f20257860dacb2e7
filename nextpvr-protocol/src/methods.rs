//! Request strings and stream URL builders.
//!
//! Control requests are expressed as the `method[&param=value...]` tail of
//! `/service?method=`; the transport owns the base URL and appends the
//! session identifier once one exists.  Stream URLs are built whole because
//! they bypass the `/service` endpoint.

use crate::types::{CLIENT_PREFIX, DEVICE_ID, PROTOCOL_VERSION};
use crate::uri;

/// First half of the login handshake; returns the salt and session id.
pub fn session_initiate() -> String {
    format!("session.initiate&ver={PROTOCOL_VERSION}&device={DEVICE_ID}")
}

/// Second half of the login handshake.
///
/// The session id is passed explicitly because the transport only starts
/// appending it after the login succeeds.
pub fn session_login(sid: &str, digest: &str) -> String {
    format!("session.login&sid={sid}&md5={digest}")
}

pub const SESSION_LOGOUT: &str = "session.logout";
pub const SESSION_RENEW: &str = "session.renew";
pub const SETTING_LIST: &str = "setting.list";
pub const CHANNEL_GROUPS: &str = "channel.groups";
pub const CHANNEL_LIST_EXTRAS: &str = "channel.list&extras=true";
pub const RECORDING_LAST_UPDATED: &str = "recording.lastupdated";
pub const RECORDING_LAST_UPDATED_IGNORE_RESUME: &str = "recording.lastupdated&ignore_resume=true";
pub const EPG_SUMMARY: &str = "system.epg.summary";
pub const TRANSCODE_LEASE: &str = "channel.transcode.lease";

/// Channel list restricted to one group, by backend group name.
pub fn channel_list_group(group_name: &str) -> String {
    format!("channel.list&group_id={}", uri::encode(group_name))
}

/// Channel icon fetch for one channel.
pub fn channel_icon(channel_id: u32) -> String {
    format!("channel.icon&channel_id={channel_id}")
}

/// Direct live stream URL for a channel.
///
/// With client timeshift the backend wants the session id twice, once as
/// the client name and once as `sid`; without it the client name carries
/// the conventional prefix instead.
pub fn live_channel_url(base: &str, channel_uid: u32, sid: &str, client_timeshift: bool) -> String {
    if client_timeshift {
        format!("{base}/live?channeloid={channel_uid}&client={sid}&sid={sid}")
    } else {
        format!("{base}/live?channeloid={channel_uid}&client={CLIENT_PREFIX}{sid}")
    }
}

/// Direct stream URL for a finished or in-progress recording.
pub fn recording_url(base: &str, recording_id: &str, sid: &str) -> String {
    format!("{base}/live?recording={recording_id}&client={CLIENT_PREFIX}{sid}")
}

/// Transcoded HLS playlist URL for the session's active transcode.
pub fn transcode_playlist_url(base: &str, sid: &str) -> String {
    format!("{base}/service?method=channel.transcode.m3u8&sid={sid}")
}
