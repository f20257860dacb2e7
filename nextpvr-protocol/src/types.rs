//! Protocol constants and small shared types.

use serde::{Deserialize, Serialize};

/// Protocol version announced during `session.initiate`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Device identifier announced during `session.initiate`.
pub const DEVICE_ID: &str = "xbmc";

/// Client identifier prefix used on direct live and recording stream URLs.
pub const CLIENT_PREFIX: &str = "XBMC-";

/// Default backend control port.
pub const DEFAULT_PORT: u16 = 8866;

/// Oldest backend version the bridge will talk to (5.0.7).
pub const MIN_BACKEND_VERSION: u32 = 50007;

/// File name of the channel cache inside an instance directory.
pub const CACHE_FILE_NAME: &str = "channel.cache";

/// File name prefix for cached channel icons inside an instance directory.
pub const ICON_PREFIX: &str = "nextpvr-ch";

/// Channel `type` field value that marks a radio channel.
pub const RADIO_CHANNEL_TYPE: &str = "0xa";

/// Path of the public stream override table on the backend.
pub const PUBLIC_STREAMS_PATH: &str = "/public/service.xml";

/// Bitmask of the features the backend granted this session.
///
/// The backend reports the mask on login; a bridge never offers an
/// operation whose bit is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessLevel(pub u8);

impl AccessLevel {
    /// No optional features granted.
    pub const NONE: AccessLevel = AccessLevel(0);
    /// Recording listing and playback.
    pub const RECORDINGS: AccessLevel = AccessLevel(0x01);
    /// Recording deletion.
    pub const RECORDINGS_DELETE: AccessLevel = AccessLevel(0x02);
    /// Timer listing and scheduling.
    pub const TIMERS: AccessLevel = AccessLevel(0x04);

    /// Returns true when every bit of `other` is granted.
    pub fn contains(self, other: AccessLevel) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn allows_recordings(self) -> bool {
        self.contains(Self::RECORDINGS)
    }

    pub fn allows_recording_delete(self) -> bool {
        self.contains(Self::RECORDINGS_DELETE)
    }

    pub fn allows_timers(self) -> bool {
        self.contains(Self::TIMERS)
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel(Self::RECORDINGS.0 | Self::RECORDINGS_DELETE.0 | Self::TIMERS.0)
    }
}

impl std::ops::BitOr for AccessLevel {
    type Output = AccessLevel;

    fn bitor(self, rhs: AccessLevel) -> AccessLevel {
        AccessLevel(self.0 | rhs.0)
    }
}

/// How live television is delivered to the host.
///
/// The method is fixed while a session is up; changing it requires a
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMethod {
    /// Direct `/live` stream, seekable only as far as the backend allows.
    #[default]
    RealTime,
    /// Direct `/live` stream with a client-side timeshift window.
    #[serde(rename = "timeshift")]
    ClientTimeshift,
    /// Backend-transcoded HLS playlist.
    Transcoded,
}

/// Broad channel class derived from the backend `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Tv,
    Radio,
}

impl ChannelKind {
    /// Classifies a raw channel `type` field.
    pub fn from_type_field(value: &str) -> ChannelKind {
        if value == RADIO_CHANNEL_TYPE {
            ChannelKind::Radio
        } else {
            ChannelKind::Tv
        }
    }

    pub fn is_radio(self) -> bool {
        matches!(self, ChannelKind::Radio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_contains() {
        let granted = AccessLevel::RECORDINGS | AccessLevel::TIMERS;
        assert!(granted.allows_recordings());
        assert!(granted.allows_timers());
        assert!(!granted.allows_recording_delete());
        assert!(AccessLevel::NONE.contains(AccessLevel::NONE));
        assert!(!AccessLevel::NONE.allows_recordings());
    }

    #[test]
    fn test_access_level_default_grants_everything() {
        let all = AccessLevel::default();
        assert!(all.allows_recordings());
        assert!(all.allows_recording_delete());
        assert!(all.allows_timers());
    }

    #[test]
    fn test_channel_kind_from_type_field() {
        assert_eq!(ChannelKind::from_type_field("0xa"), ChannelKind::Radio);
        assert_eq!(ChannelKind::from_type_field("0x1"), ChannelKind::Tv);
        assert_eq!(ChannelKind::from_type_field(""), ChannelKind::Tv);
        assert!(ChannelKind::Radio.is_radio());
    }

    #[test]
    fn test_streaming_method_default_is_realtime() {
        assert_eq!(StreamingMethod::default(), StreamingMethod::RealTime);
    }
}
