//! Typed views of backend XML replies.
//!
//! Every `/service` reply is wrapped in `<rsp stat="...">`; [`decode`]
//! checks the envelope before handing the body to serde, so callers only
//! see well-formed, accepted documents.  Unknown elements are ignored on
//! purpose: backends add fields between releases.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ProtocolError;
use crate::types::RADIO_CHANNEL_TYPE;

/// The `<rsp stat="...">` wrapper common to all `/service` replies.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "@stat")]
    pub stat: String,
}

/// Checks that `xml` is an accepted `<rsp>` envelope.
pub fn envelope_ok(xml: &str) -> Result<(), ProtocolError> {
    let envelope: Envelope = quick_xml::de::from_str(xml)
        .map_err(|err| ProtocolError::MalformedEnvelope(err.to_string()))?;
    if envelope.stat == "ok" {
        Ok(())
    } else {
        Err(ProtocolError::Rejected(envelope.stat))
    }
}

/// Validates the envelope and decodes the body into `T`.
pub fn decode<T: DeserializeOwned>(xml: &str) -> Result<T, ProtocolError> {
    envelope_ok(xml)?;
    Ok(quick_xml::de::from_str(xml)?)
}

/// Body of `session.initiate`.
#[derive(Debug, Deserialize)]
pub struct SessionInitiate {
    pub salt: String,
    pub sid: String,
}

/// Body of `recording.lastupdated` and `system.epg.summary`.
///
/// Both methods return a single epoch timestamp naming the most recent
/// change on the backend side.
#[derive(Debug, Deserialize)]
pub struct LastUpdate {
    pub last_update: i64,
}

/// Body of `setting.list`.
///
/// The backend reports far more than this; the bridge only needs the
/// version for gating, encoded as `major * 10000 + minor * 100 + patch`.
#[derive(Debug, Default, Deserialize)]
pub struct SettingList {
    #[serde(rename = "NextPVRVersion", default)]
    pub version: u32,
}

impl SettingList {
    /// Renders the packed version integer as `major.minor.patch`.
    pub fn version_string(&self) -> String {
        format_version(self.version)
    }
}

/// Renders a packed backend version as `major.minor.patch`.
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version / 10000,
        version / 100 % 100,
        version % 100
    )
}

/// Body of `channel.list`, with or without `&extras=true`.
#[derive(Debug, Default, Deserialize)]
pub struct ChannelList {
    #[serde(default)]
    pub channels: ChannelsNode,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelsNode {
    #[serde(rename = "channel", default)]
    pub channels: Vec<Channel>,
}

/// One `<channel>` entry.
#[derive(Debug, Default, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub id: u32,
    #[serde(rename = "type", default)]
    pub channel_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub minor: u32,
    /// Present and true when the backend holds an icon for this channel.
    #[serde(default)]
    pub icon: Option<bool>,
    /// EPG source name; `"None"` means no guide data, absent means guide
    /// data is available.
    #[serde(default)]
    pub epg: Option<String>,
    #[serde(default)]
    pub groups: Option<GroupsNode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupsNode {
    #[serde(rename = "group", default)]
    pub groups: Vec<String>,
}

impl Channel {
    pub fn is_radio(&self) -> bool {
        self.channel_type == RADIO_CHANNEL_TYPE
    }

    pub fn has_epg(&self) -> bool {
        self.epg.as_deref() != Some("None")
    }

    pub fn has_icon(&self) -> bool {
        self.icon == Some(true)
    }

    /// Group names this channel belongs to.
    pub fn group_names(&self) -> &[String] {
        self.groups
            .as_ref()
            .map(|node| node.groups.as_slice())
            .unwrap_or(&[])
    }
}

/// Body of `channel.groups`.
#[derive(Debug, Default, Deserialize)]
pub struct GroupList {
    #[serde(default)]
    pub groups: GroupListNode,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupListNode {
    #[serde(rename = "group", default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub name: String,
}

/// The public stream override table served at `/public/service.xml`.
///
/// This document is not wrapped in an `<rsp>` envelope.
#[derive(Debug, Default, Deserialize)]
pub struct StreamsTable {
    #[serde(rename = "stream", default)]
    pub streams: Vec<StreamOverride>,
}

/// One `<stream id="N">URL</stream>` row.
#[derive(Debug, Deserialize)]
pub struct StreamOverride {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "$text", default)]
    pub url: String,
}

/// Parses the stream override table, which has no envelope.
pub fn parse_streams_table(xml: &str) -> Result<StreamsTable, ProtocolError> {
    Ok(quick_xml::de::from_str(xml)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rejected() {
        let err = envelope_ok(r#"<rsp stat="fail"><err code="8"/></rsp>"#).unwrap_err();
        assert_eq!(err, ProtocolError::Rejected("fail".to_string()));
    }

    #[test]
    fn test_envelope_malformed() {
        let err = envelope_ok("<html>not a backend</html>").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_session_initiate() {
        let xml = r#"<rsp stat="ok"><salt>1457eb!</salt><sid>cafe01</sid></rsp>"#;
        let body: SessionInitiate = decode(xml).unwrap();
        assert_eq!(body.salt, "1457eb!");
        assert_eq!(body.sid, "cafe01");
    }

    #[test]
    fn test_decode_last_update() {
        let xml = r#"<rsp stat="ok"><last_update>1700000123</last_update></rsp>"#;
        let body: LastUpdate = decode(xml).unwrap();
        assert_eq!(body.last_update, 1700000123);
    }

    #[test]
    fn test_decode_setting_list_version() {
        let xml = r#"<rsp stat="ok"><NextPVRVersion>60205</NextPVRVersion><Other>x</Other></rsp>"#;
        let body: SettingList = decode(xml).unwrap();
        assert_eq!(body.version, 60205);
        assert_eq!(body.version_string(), "6.2.5");
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(50007), "5.0.7");
        assert_eq!(format_version(0), "0.0.0");
    }

    #[test]
    fn test_decode_channel_list() {
        let xml = r#"<rsp stat="ok"><channels>
            <channel><id>7</id><type>0x1</type><name>Seven</name>
              <number>7</number><minor>1</minor><icon>true</icon>
              <groups><group>HD</group><group>News</group></groups></channel>
            <channel><id>9</id><type>0xa</type><name>Jazz</name>
              <number>901</number><minor>0</minor><epg>None</epg></channel>
          </channels></rsp>"#;
        let body: ChannelList = decode(xml).unwrap();
        let channels = &body.channels.channels;
        assert_eq!(channels.len(), 2);
        assert!(!channels[0].is_radio());
        assert!(channels[0].has_epg());
        assert!(channels[0].has_icon());
        assert_eq!(channels[0].group_names(), ["HD", "News"]);
        assert!(channels[1].is_radio());
        assert!(!channels[1].has_epg());
        assert!(!channels[1].has_icon());
        assert!(channels[1].group_names().is_empty());
    }

    #[test]
    fn test_decode_empty_channel_list() {
        let body: ChannelList = decode(r#"<rsp stat="ok"/>"#).unwrap();
        assert!(body.channels.channels.is_empty());
    }

    #[test]
    fn test_decode_group_list() {
        let xml = r#"<rsp stat="ok"><groups>
            <group><name>HD</name></group>
            <group><name>Kids</name></group>
          </groups></rsp>"#;
        let body: GroupList = decode(xml).unwrap();
        let names: Vec<&str> = body
            .groups
            .groups
            .iter()
            .map(|group| group.name.as_str())
            .collect();
        assert_eq!(names, ["HD", "Kids"]);
    }

    #[test]
    fn test_decode_streams_table() {
        let xml = r#"<streams>
            <stream id="17">plugin://plugin.video.example/play/17</stream>
            <stream id="23">http://cdn.example.com/radio.m3u8</stream>
          </streams>"#;
        let table: StreamsTable = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(table.streams.len(), 2);
        assert_eq!(table.streams[0].id, 17);
        assert!(table.streams[0].url.starts_with("plugin:"));
        assert!(table.streams[1].url.ends_with(".m3u8"));
    }
}
