//! # pavanedidl - DIDL-Lite Codec
//!
//! Parser, builder and utilities for the DIDL-Lite format used by
//! UPnP/DLNA ContentDirectory and AVTransport services.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod time;

pub use time::{format_upnp_time, parse_upnp_time};

/// Namespace URIs declared on every generated DIDL-Lite document.
pub const DIDL_NS: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
pub const UPNP_NS: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";
pub const DLNA_NS: &str = "urn:schemas-dlna-org:metadata-1-0/";

const DEFAULT_PROTOCOL_INFO: &str = "http-get:*:*:*";
const AUDIO_ITEM_CLASS: &str = "object.item.audioItem.musicTrack";

#[derive(Debug, Error)]
pub enum DidlError {
    #[error("DIDL-Lite parse error: {0}")]
    Parse(#[from] quick_xml::DeError),
    #[error("DIDL-Lite serialize error: {0}")]
    Serialize(#[from] quick_xml::SeError),
    #[error("DIDL-Lite document contains no item")]
    NoItem,
}

// ============= DIDL-Lite document model =============

/// Root of a DIDL-Lite document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "DIDL-Lite")]
pub struct DidlLite {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,

    #[serde(rename = "@xmlns:dc", skip_serializing_if = "Option::is_none")]
    pub xmlns_dc: Option<String>,

    #[serde(rename = "@xmlns:upnp", skip_serializing_if = "Option::is_none")]
    pub xmlns_upnp: Option<String>,

    #[serde(rename = "@xmlns:dlna", skip_serializing_if = "Option::is_none")]
    pub xmlns_dlna: Option<String>,

    #[serde(rename = "container", default)]
    pub containers: Vec<Container>,

    #[serde(rename = "item", default)]
    pub items: Vec<Item>,
}

/// A browsable container (folder, album, playlist, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(rename = "@childCount", skip_serializing_if = "Option::is_none")]
    pub child_count: Option<String>,

    #[serde(rename = "dc:title", alias = "title")]
    pub title: String,

    #[serde(
        rename = "upnp:class",
        alias = "class",
        skip_serializing_if = "Option::is_none"
    )]
    pub class: Option<String>,
}

/// A playable media object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(rename = "@restricted", skip_serializing_if = "Option::is_none")]
    pub restricted: Option<String>,

    #[serde(rename = "dc:title", alias = "title")]
    pub title: String,

    #[serde(
        rename = "upnp:class",
        alias = "class",
        skip_serializing_if = "Option::is_none"
    )]
    pub class: Option<String>,

    #[serde(
        rename = "dc:creator",
        alias = "creator",
        skip_serializing_if = "Option::is_none"
    )]
    pub creator: Option<String>,

    #[serde(
        rename = "upnp:artist",
        alias = "artist",
        skip_serializing_if = "Option::is_none"
    )]
    pub artist: Option<String>,

    #[serde(
        rename = "dc:date",
        alias = "date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<String>,

    #[serde(
        rename = "upnp:album",
        alias = "album",
        skip_serializing_if = "Option::is_none"
    )]
    pub album: Option<String>,

    #[serde(
        rename = "upnp:genre",
        alias = "genre",
        skip_serializing_if = "Option::is_none"
    )]
    pub genre: Option<String>,

    #[serde(
        rename = "upnp:originalTrackNumber",
        alias = "originalTrackNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub original_track_number: Option<String>,

    #[serde(
        rename = "upnp:albumArtURI",
        alias = "albumArtURI",
        skip_serializing_if = "Option::is_none"
    )]
    pub album_art: Option<String>,

    #[serde(rename = "res", default)]
    pub resources: Vec<Resource>,
}

/// A media resource (`<res>` element).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "@protocolInfo", skip_serializing_if = "Option::is_none")]
    pub protocol_info: Option<String>,

    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(rename = "$text", default)]
    pub url: String,
}

// ============= Structured media record =============

/// Flattened view of a single DIDL-Lite item, the shape the rest of the
/// control point works with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaObjectRecord {
    pub id: String,
    pub name: String,
    pub creator: Option<String>,
    pub artist: Option<String>,
    pub date: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<String>,
    pub album_art_uri: Option<String>,
    pub file_uri: Option<String>,
    /// Duration in whole seconds. Absent when the device reports none or
    /// reports zero.
    pub duration: Option<u64>,
}

impl From<&Item> for MediaObjectRecord {
    fn from(item: &Item) -> Self {
        let mut record = MediaObjectRecord {
            id: item.id.clone(),
            name: item.title.clone(),
            creator: item.creator.clone(),
            artist: item.artist.clone(),
            date: item.date.clone(),
            album: item.album.clone(),
            genre: item.genre.clone(),
            track_number: item.original_track_number.clone(),
            album_art_uri: item.album_art.clone(),
            file_uri: None,
            duration: None,
        };

        if let Some(res) = item.resources.first() {
            if !res.url.trim().is_empty() {
                record.file_uri = Some(res.url.clone());
            }
            if let Some(raw) = &res.duration {
                let seconds = parse_upnp_time(raw);
                if seconds > 0 {
                    record.duration = Some(seconds);
                }
            }
        }

        record
    }
}

/// Parses a DIDL-Lite fragment into its document model.
pub fn decode_fragment(xml: &str) -> Result<DidlLite, DidlError> {
    Ok(quick_xml::de::from_str(xml)?)
}

/// Parses a DIDL-Lite fragment expected to carry exactly one item, as found
/// in `CurrentTrackMetaData` / `TrackMetaData` values.
pub fn decode_item(xml: &str) -> Result<MediaObjectRecord, DidlError> {
    let didl = decode_fragment(xml)?;
    let item = didl.items.first().ok_or(DidlError::NoItem)?;
    Ok(MediaObjectRecord::from(item))
}

/// Builds a minimal single-item DIDL-Lite document for a record, suitable
/// as `CurrentURIMetaData` for SetAVTransportURI.
pub fn encode_item(record: &MediaObjectRecord) -> Result<String, DidlError> {
    let resources = match &record.file_uri {
        Some(uri) => vec![Resource {
            protocol_info: Some(DEFAULT_PROTOCOL_INFO.to_string()),
            duration: record
                .duration
                .filter(|&d| d > 0)
                .map(format_upnp_time),
            url: uri.clone(),
        }],
        None => Vec::new(),
    };

    let didl = DidlLite {
        xmlns: DIDL_NS.to_string(),
        xmlns_dc: Some(DC_NS.to_string()),
        xmlns_upnp: Some(UPNP_NS.to_string()),
        xmlns_dlna: Some(DLNA_NS.to_string()),
        containers: Vec::new(),
        items: vec![Item {
            id: record.id.clone(),
            parent_id: Some("-1".to_string()),
            restricted: Some("1".to_string()),
            title: record.name.clone(),
            class: Some(AUDIO_ITEM_CLASS.to_string()),
            creator: record.creator.clone(),
            artist: record.artist.clone(),
            date: record.date.clone(),
            album: record.album.clone(),
            genre: record.genre.clone(),
            original_track_number: record.track_number.clone(),
            album_art: record.album_art_uri.clone(),
            resources,
        }],
    };

    Ok(quick_xml::se::to_string(&didl)?)
}
