//! Per-instance configuration.
//!
//! One `InstanceSettings` describes one backend.  Values deserialize from
//! the host's configuration with every field optional; the defaults match
//! a stock backend install on the local machine.

use std::net::IpAddr;
use std::path::PathBuf;

use nextpvr_protocol::types::DEFAULT_PORT;
use nextpvr_protocol::{AccessLevel, StreamingMethod};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    /// Backend host name or address.
    pub host: String,
    /// Backend control port.
    pub port: u16,
    /// Login PIN.
    pub pin: String,
    /// Display name of this backend instance.
    pub instance_name: String,
    /// Ordinal of this instance, used to disambiguate channel names.
    pub instance_number: u32,
    /// When true, startup fails hard if the backend is unreachable and
    /// has never been reached before.
    pub instance_priority: bool,
    /// Set once a session has ever succeeded against this backend.
    pub connection_confirmed: bool,
    /// Expose radio channels.
    pub show_radio: bool,
    /// Fetch the public stream override table after connecting.
    pub use_live_streams: bool,
    /// Append " (instance_number)" to channel names.
    pub add_channel_instance: bool,
    /// Emit a synthetic group holding every channel.
    pub all_channels_group: bool,
    /// Attempt wake-on-LAN before connecting.
    pub enable_wol: bool,
    /// MAC address for wake-on-LAN packets.
    pub wol_mac: String,
    /// Seconds to keep waking before giving up.
    pub wol_timeout_secs: u32,
    /// Seconds between backend change polls.
    pub heartbeat_interval_secs: i64,
    /// How live television is delivered.
    pub live_streaming_method: StreamingMethod,
    /// Present transcoded streams through a timeshift-capable input
    /// stream.
    pub transcoded_timeshift: bool,
    /// Read chunk size for recording playback, in KiB.
    pub chunk_recording_kb: usize,
    /// Backend tracks resume positions and play counts.
    pub backend_resume: bool,
    /// Ask the backend for recording file sizes.
    pub show_recording_size: bool,
    /// Fetch recording artwork; disables concurrent recorded streams.
    pub recording_poster: bool,
    /// Backend runs comskip; edit lists are available.
    pub comskip: bool,
    /// Pass genre text through instead of mapping to DVB codes.
    pub genre_string: bool,
    /// Genre translation table, if one is installed.
    pub genre_mapping_file: Option<PathBuf>,
    /// Directory for the channel cache and icon files.
    pub instance_dir: PathBuf,
    /// Feature mask granted to this client.
    pub access: AccessLevel,
    /// Timeout for control requests, in seconds.
    pub rpc_timeout_secs: u64,
    /// Connect timeout for stream requests, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        InstanceSettings {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            pin: "0000".to_string(),
            instance_name: String::new(),
            instance_number: 1,
            instance_priority: true,
            connection_confirmed: false,
            show_radio: true,
            use_live_streams: false,
            add_channel_instance: false,
            all_channels_group: true,
            enable_wol: false,
            wol_mac: String::new(),
            wol_timeout_secs: 20,
            heartbeat_interval_secs: crate::session::DEFAULT_HEARTBEAT,
            live_streaming_method: StreamingMethod::RealTime,
            transcoded_timeshift: false,
            chunk_recording_kb: 32,
            backend_resume: true,
            show_recording_size: false,
            recording_poster: true,
            comskip: true,
            genre_string: false,
            genre_mapping_file: None,
            instance_dir: PathBuf::from("."),
            access: AccessLevel::default(),
            rpc_timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl InstanceSettings {
    /// Base URL of the backend, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// True when the backend runs on this machine.
    pub fn is_localhost(&self) -> bool {
        match self.host.parse::<IpAddr>() {
            Ok(addr) => addr.is_loopback(),
            Err(_) => self.host.eq_ignore_ascii_case("localhost"),
        }
    }

    /// Best-effort guess whether the backend sits on the local network.
    /// Wake-on-LAN packets are pointless anywhere else.
    pub fn is_host_on_lan(&self) -> bool {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => {
                let octets = addr.octets();
                octets[0] == 10
                    || (octets[0] == 172 && (16..32).contains(&octets[1]))
                    || (octets[0] == 192 && octets[1] == 168)
            }
            Ok(IpAddr::V6(addr)) => addr.is_loopback(),
            // A bare name resolves through local DNS; assume LAN.
            Err(_) => true,
        }
    }

    /// True when the instance is usable at all: without a host there is
    /// nothing to announce state changes for.
    pub fn is_instance_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    pub fn use_dvb_genre(&self) -> bool {
        !self.genre_string
    }

    pub fn cache_path(&self) -> PathBuf {
        self.instance_dir
            .join(nextpvr_protocol::types::CACHE_FILE_NAME)
    }

    pub fn icon_path(&self, channel_uid: u32) -> PathBuf {
        self.instance_dir.join(format!(
            "{}{}.png",
            nextpvr_protocol::types::ICON_PREFIX,
            channel_uid
        ))
    }

}
