//! Channel catalog: the cached lineup, groups, icons and stream
//! overrides.
//!
//! The full `channel.list&extras=true` reply is cached on disk and
//! refreshed only when the backend's guide timestamp moves, so lineups
//! survive restarts without hitting the backend.  Everything the host
//! asks for is derived from that one document.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use nextpvr_protocol::response::{ChannelList, GroupList};
use nextpvr_protocol::{cache, methods, response, ChannelKind};

use crate::error::BridgeError;
use crate::settings::InstanceSettings;
use crate::transport::Transport;

/// Facts about one channel kept between full lineup pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDetail {
    pub has_epg: bool,
    pub radio: bool,
}

/// One channel as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelItem {
    pub uid: u32,
    pub radio: bool,
    pub name: String,
    pub number: u32,
    pub minor: u32,
    pub mime_type: &'static str,
    pub icon_path: Option<PathBuf>,
}

/// One channel group as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupItem {
    pub name: String,
    pub radio: bool,
    pub position: u32,
}

/// One group membership row as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMemberItem {
    pub group_name: String,
    pub channel_uid: u32,
    pub number: u32,
    pub minor: u32,
}

#[derive(Default)]
struct CatalogState {
    details: HashMap<u32, ChannelDetail>,
    live_streams: HashMap<u32, String>,
    tv_groups: HashSet<String>,
    radio_groups: HashSet<String>,
    checksum: String,
}

pub struct ChannelCatalog {
    settings: Arc<InstanceSettings>,
    transport: Arc<Transport>,
    cache_file: PathBuf,
    state: Mutex<CatalogState>,
}

impl ChannelCatalog {
    pub fn new(settings: Arc<InstanceSettings>, transport: Arc<Transport>) -> ChannelCatalog {
        let cache_file = settings.cache_path();
        ChannelCatalog {
            settings,
            transport,
            cache_file,
            state: Mutex::new(CatalogState::default()),
        }
    }

    /// Number of known channels.  Falls back to counting the cached
    /// document so the host gets an answer even before details load.
    pub fn num_channels(&self) -> usize {
        let mut state = self.state.lock();
        if !state.details.is_empty() {
            return state.details.len();
        }
        match self.channel_list(&mut state) {
            Ok(list) => list.channels.channels.len(),
            Err(_) => 0,
        }
    }

    /// Broad class of a channel; unknown ids count as television.
    pub fn channel_type(&self, uid: u32) -> ChannelKind {
        let state = self.state.lock();
        match state.details.get(&uid) {
            Some(detail) if detail.radio => ChannelKind::Radio,
            _ => ChannelKind::Tv,
        }
    }

    /// Snapshot of the per-channel details map.
    pub fn details_snapshot(&self) -> Vec<(u32, ChannelDetail)> {
        let state = self.state.lock();
        state.details.iter().map(|(id, det)| (*id, *det)).collect()
    }

    /// Warms the cache after a connect and makes sure channel details
    /// are loaded, even when the cache file had to be created first.
    pub fn cache_all_channels(&self, update_time: u64) {
        let mut state = self.state.lock();
        let _ = self.channels_changed_locked(&mut state, update_time);
        if state.details.is_empty() {
            if let Err(err) = self.load_channel_details_locked(&mut state) {
                log::error!("channel detail load failed: {}", err);
            }
        }
    }

    /// True when the cached lineup no longer matches the backend.
    /// Refreshes the cache file as a side effect.
    pub fn channels_changed(&self, update_time: u64) -> bool {
        let mut state = self.state.lock();
        self.channels_changed_locked(&mut state, update_time)
    }

    /// Rebuilds channel details after a lineup change and deletes icons
    /// of channels that disappeared.  Returns true when anything
    /// actually changed.
    pub fn reset_channel_cache(&self, update_time: u64) -> bool {
        let mut state = self.state.lock();
        if self.channels_changed_locked(&mut state, update_time) && !state.checksum.is_empty() {
            let old_uids: Vec<u32> = state.details.keys().copied().collect();
            state.details.clear();
            if let Err(err) = self.load_channel_details_locked(&mut state) {
                log::error!("channel detail reload failed: {}", err);
            }
            for uid in old_uids {
                if !state.details.contains_key(&uid) {
                    self.delete_channel_icon(uid);
                }
            }
            true
        } else {
            false
        }
    }

    /// The host's channel listing for one class.
    pub fn get_channels(&self, radio: bool) -> Result<Vec<ChannelItem>, BridgeError> {
        if radio && !self.settings.show_radio {
            return Ok(Vec::new());
        }
        let (list, overrides) = {
            let mut state = self.state.lock();
            let list = self.channel_list(&mut state)?;
            (list, state.live_streams.clone())
        };

        let mut items = Vec::new();
        for channel in &list.channels.channels {
            let is_radio = channel.is_radio();
            let mut mime_type = "application/octet-stream";
            if !is_radio {
                if let Some(url) = overrides.get(&channel.id) {
                    if Self::is_plugin_url(url) {
                        mime_type = if url.to_ascii_lowercase().ends_with(".m3u8") {
                            "application/x-mpegURL"
                        } else {
                            "video/MP2T"
                        };
                    }
                }
            }
            if radio != is_radio {
                continue;
            }

            let mut name = channel.name.clone();
            if self.settings.add_channel_instance {
                name.push_str(&format!(" ({})", self.settings.instance_number));
            }
            let icon_path = if channel.has_icon() {
                self.get_channel_icon(channel.id)
            } else {
                None
            };
            items.push(ChannelItem {
                uid: channel.id,
                radio: is_radio,
                name,
                number: channel.number,
                minor: channel.minor,
                mime_type,
                icon_path,
            });
        }
        Ok(items)
    }

    /// Name of the synthetic group holding every channel of a class.
    pub fn all_channels_group_name(&self, radio: bool) -> String {
        let label = if radio {
            "All radio channels"
        } else {
            "All channels"
        };
        format!("{} {}", label, self.settings.instance_name)
            .trim_end()
            .to_string()
    }

    /// Groups for one class: the synthetic all-channels group first,
    /// then every backend group that at least one channel references,
    /// in backend order.
    pub fn get_channel_groups(&self, radio: bool) -> Result<Vec<GroupItem>, BridgeError> {
        if radio && !self.settings.show_radio {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock();
        let mut position = 1u32;
        let mut items = Vec::new();
        let mut selected: HashSet<String> = HashSet::new();
        let mut has_all_channels = false;

        let list = self.channel_list(&mut state)?;
        for channel in &list.channels.channels {
            if radio == channel.is_radio() {
                if self.settings.all_channels_group && !has_all_channels {
                    has_all_channels = true;
                    items.push(GroupItem {
                        name: self.all_channels_group_name(radio),
                        radio,
                        position,
                    });
                    position += 1;
                }
                for name in channel.group_names() {
                    selected.insert(name.clone());
                }
            }
        }
        if radio {
            state.radio_groups = selected.clone();
        } else {
            state.tv_groups = selected.clone();
        }

        // Many users have no radio groups at all.
        if selected.is_empty() {
            return Ok(items);
        }

        let backend: GroupList = self.transport.call(methods::CHANNEL_GROUPS).map_err(|err| {
            log::debug!("no channel groups: {}", err);
            err
        })?;
        for group in &backend.groups.groups {
            // The synthetic group never matches; empty backend groups are
            // skipped along with it.
            if selected.contains(&group.name) {
                items.push(GroupItem {
                    name: group.name.clone(),
                    radio,
                    position,
                });
                position += 1;
            }
        }
        Ok(items)
    }

    /// Count of groups across both classes, as last reported.
    pub fn group_count(&self) -> usize {
        let state = self.state.lock();
        state.tv_groups.len() + state.radio_groups.len()
    }

    /// Membership rows for one group.  Channels the catalog does not
    /// know, and channels of the wrong class, are dropped.
    pub fn get_group_members(
        &self,
        group_name: &str,
        radio: bool,
    ) -> Result<Vec<GroupMemberItem>, BridgeError> {
        let mut state = self.state.lock();
        let list = if group_name == self.all_channels_group_name(radio) {
            self.channel_list(&mut state)?
        } else {
            self.transport
                .call(&methods::channel_list_group(group_name))?
        };

        let mut members = Vec::new();
        for channel in &list.channels.channels {
            match state.details.get(&channel.id) {
                Some(detail) if detail.radio == radio => members.push(GroupMemberItem {
                    group_name: group_name.to_string(),
                    channel_uid: channel.id,
                    number: channel.number,
                    minor: channel.minor,
                }),
                _ => {}
            }
        }
        Ok(members)
    }

    /// Pulls the public stream override table.  Any failure leaves the
    /// table empty; overrides are an opt-in nicety.
    pub fn load_live_streams(&self) {
        let mut state = self.state.lock();
        state.live_streams.clear();
        let body = match self.transport.public_streams() {
            Ok(body) => body,
            Err(err) => {
                log::debug!("no live stream overrides: {}", err);
                return;
            }
        };
        match response::parse_streams_table(&body) {
            Ok(table) => {
                for row in table.streams {
                    log::debug!("live stream override {} {}", row.id, row.url);
                    state.live_streams.insert(row.id, row.url);
                }
            }
            Err(err) => log::error!("live stream table invalid: {}", err),
        }
    }

    pub fn live_stream_url(&self, uid: u32) -> Option<String> {
        let state = self.state.lock();
        state.live_streams.get(&uid).cloned()
    }

    /// True when the override URL is played by the host directly rather
    /// than proxied by the bridge.
    pub fn is_channel_a_plugin(&self, uid: u32) -> bool {
        let state = self.state.lock();
        state
            .live_streams
            .get(&uid)
            .map(|url| Self::is_plugin_url(url))
            .unwrap_or(false)
    }

    fn is_plugin_url(url: &str) -> bool {
        url.starts_with("plugin:") || url.to_ascii_lowercase().ends_with(".m3u8")
    }

    /// Local icon path for a channel, downloading it on first use.
    pub fn get_channel_icon(&self, uid: u32) -> Option<PathBuf> {
        let path = self.settings.icon_path(uid);
        if path.exists() {
            return Some(path);
        }
        match self
            .transport
            .file_copy(&methods::channel_icon(uid), &path)
        {
            Ok(_) => Some(path),
            Err(err) => {
                log::debug!("no icon for channel {}: {}", uid, err);
                None
            }
        }
    }

    pub fn delete_channel_icon(&self, uid: u32) {
        let path = self.settings.icon_path(uid);
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::debug!("could not delete {}: {}", path.display(), err);
            }
        }
    }

    /// Deletes every cached channel icon for this instance.
    pub fn delete_channel_icons(&self) {
        let Ok(entries) = std::fs::read_dir(&self.settings.instance_dir) else {
            return;
        };
        let mut deleted = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(nextpvr_protocol::types::ICON_PREFIX) && name.ends_with(".png") {
                if std::fs::remove_file(entry.path()).is_ok() {
                    deleted += 1;
                }
            }
        }
        log::info!("deleted {} channel icons", deleted);
    }

    /// The full lineup document, from the cache file when possible and
    /// straight from the backend when not.
    fn channel_list(&self, state: &mut CatalogState) -> Result<ChannelList, BridgeError> {
        let (cache_time, payload) = self.read_cache(state);
        if cache_time != 0 {
            if let Some(payload) = payload {
                match response::decode::<ChannelList>(&payload) {
                    Ok(list) => return Ok(list),
                    Err(err) => log::error!("cannot parse channel cache: {}", err),
                }
            }
        } else {
            log::error!("cannot read channel cache");
        }
        self.transport.call(methods::CHANNEL_LIST_EXTRAS)
    }

    fn channels_changed_locked(&self, state: &mut CatalogState, update_time: u64) -> bool {
        let old_checksum = state.checksum.clone();
        let (cache_time, _) = self.read_cache(state);
        // First load after a restart still needs the details map.
        if cache_time != 0 && state.details.is_empty() {
            if let Err(err) = self.load_channel_details_locked(state) {
                log::error!("channel detail load failed: {}", err);
            }
        }
        if update_time == cache_time {
            return false;
        }
        if !self.reload_cache(state, update_time) {
            return false;
        }
        old_checksum != state.checksum
    }

    /// Reads the cache file, recording its checksum.  Returns the
    /// update time and payload; an unreadable file is removed and
    /// reported as time zero.
    fn read_cache(&self, state: &mut CatalogState) -> (u64, Option<String>) {
        if !self.cache_file.exists() {
            return (0, None);
        }
        let decoded = File::open(&self.cache_file)
            .map_err(BridgeError::from)
            .and_then(|file| Ok(cache::decode(file)?));
        match decoded {
            Ok(snapshot) => {
                state.checksum = snapshot.checksum;
                (snapshot.update_time, Some(snapshot.payload))
            }
            Err(err) => {
                log::warn!("removing invalid channel cache: {}", err);
                let _ = std::fs::remove_file(&self.cache_file);
                (0, None)
            }
        }
    }

    /// Fetches a fresh lineup and rewrites the cache file under the
    /// given update time.  On failure the recorded checksum stays
    /// cleared.
    fn reload_cache(&self, state: &mut CatalogState, update_time: u64) -> bool {
        state.checksum.clear();
        let payload = match self.transport.raw_service(methods::CHANNEL_LIST_EXTRAS) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("channel list fetch failed: {}", err);
                return false;
            }
        };
        let written = File::create(&self.cache_file)
            .map_err(BridgeError::from)
            .and_then(|file| Ok(cache::encode(file, update_time, &payload)?));
        match written {
            Ok(checksum) => {
                state.checksum = checksum;
                true
            }
            Err(err) => {
                log::error!("could not write channel cache: {}", err);
                false
            }
        }
    }

    fn load_channel_details_locked(&self, state: &mut CatalogState) -> Result<(), BridgeError> {
        let list = self.channel_list(state)?;
        for channel in &list.channels.channels {
            let radio = channel.is_radio();
            if radio && !self.settings.show_radio {
                continue;
            }
            state.details.insert(
                channel.id,
                ChannelDetail {
                    has_epg: channel.has_epg(),
                    radio,
                },
            );
        }
        Ok(())
    }
}
