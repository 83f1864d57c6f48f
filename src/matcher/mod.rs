//! Metadata-source boundary.
//!
//! The actual matching heuristics live outside this crate. The core only
//! depends on the `MetadataSource` capability: given the on-disk metadata of
//! a task it returns scored match candidates, and it supports targeted
//! searches by release id / artist / album for the add-candidates flow.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::importer::error::ImportError;
use crate::state::{ItemInfo, Metadata};

/// A single track of an online match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_secs: Option<f64>,
}

/// Album-level metadata of an online match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
}

/// Opaque match payload, either album- or track-level.
///
/// The `mapping` of an album payload is a partial function from local item
/// index to match track index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchPayload {
    Album {
        info: AlbumInfo,
        tracks: Vec<TrackInfo>,
        mapping: BTreeMap<usize, usize>,
    },
    Track {
        info: TrackInfo,
    },
}

impl MatchPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            MatchPayload::Album { .. } => "album",
            MatchPayload::Track { .. } => "track",
        }
    }

    pub fn album_info(&self) -> Option<&AlbumInfo> {
        match self {
            MatchPayload::Album { info, .. } => Some(info),
            MatchPayload::Track { .. } => None,
        }
    }

    pub fn tracks(&self) -> Vec<TrackInfo> {
        match self {
            MatchPayload::Album { tracks, .. } => tracks.clone(),
            MatchPayload::Track { info } => vec![info.clone()],
        }
    }

    pub fn mapping(&self) -> BTreeMap<usize, usize> {
        match self {
            MatchPayload::Album { mapping, .. } => mapping.clone(),
            MatchPayload::Track { .. } => BTreeMap::new(),
        }
    }

    /// Stable identity of the matched release, used to deduplicate candidates
    /// merged in by targeted searches.
    pub fn match_id(&self) -> Option<&str> {
        match self {
            MatchPayload::Album { info, .. } => info.album_id.as_deref(),
            MatchPayload::Track { info } => info.track_id.as_deref(),
        }
    }
}

/// A scored candidate returned by a metadata source.
///
/// `distance` is in [0, 1] with 0 being an exact match; `penalties` name the
/// reasons for deductions (e.g. "year", "tracks").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub payload: MatchPayload,
    pub distance: f64,
    pub penalties: Vec<String>,
}

/// Targeted search parameters for the add-candidates flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

impl SearchQuery {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.artist.is_none() && self.album.is_none()
    }
}

/// Capability interface to the online matching service.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Look up album candidates for a task's on-disk metadata.
    async fn lookup_album(
        &self,
        metadata: &Metadata,
        items: &[ItemInfo],
    ) -> Result<Vec<MatchCandidate>, ImportError>;

    /// Run a targeted search (by release ids and/or artist/album strings).
    async fn search_candidates(
        &self,
        metadata: &Metadata,
        items: &[ItemInfo],
        query: &SearchQuery,
    ) -> Result<Vec<MatchCandidate>, ImportError>;
}

/// Source that never finds anything. Stands in when no matching backend is
/// wired up; previews then fail with a recoverable no-candidates error.
pub struct NoOpMetadataSource;

#[async_trait]
impl MetadataSource for NoOpMetadataSource {
    async fn lookup_album(
        &self,
        _metadata: &Metadata,
        _items: &[ItemInfo],
    ) -> Result<Vec<MatchCandidate>, ImportError> {
        Ok(Vec::new())
    }

    async fn search_candidates(
        &self,
        _metadata: &Metadata,
        _items: &[ItemInfo],
        _query: &SearchQuery,
    ) -> Result<Vec<MatchCandidate>, ImportError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album_candidate(id: &str, distance: f64) -> MatchCandidate {
        MatchCandidate {
            payload: MatchPayload::Album {
                info: AlbumInfo {
                    album_id: Some(id.to_string()),
                    album: Some("99 Luftballons".to_string()),
                    artist: Some("Nena".to_string()),
                    ..Default::default()
                },
                tracks: vec![TrackInfo {
                    track_id: Some(format!("{id}-t1")),
                    title: "99 Luftballons".to_string(),
                    index: Some(1),
                    ..Default::default()
                }],
                mapping: BTreeMap::from([(0, 0)]),
            },
            distance,
            penalties: vec![],
        }
    }

    #[test]
    fn test_payload_kind_and_match_id() {
        let candidate = album_candidate("mb-1", 0.1);
        assert_eq!(candidate.payload.kind(), "album");
        assert_eq!(candidate.payload.match_id(), Some("mb-1"));
        assert_eq!(candidate.payload.tracks().len(), 1);
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let candidate = album_candidate("mb-1", 0.0);
        let json = serde_json::to_string(&candidate.payload).unwrap();
        assert!(json.contains("\"type\":\"album\""));
        let back: MatchPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, candidate.payload);
    }

    #[test]
    fn test_search_query_is_empty() {
        assert!(SearchQuery::default().is_empty());
        assert!(!SearchQuery {
            ids: vec!["x".into()],
            ..Default::default()
        }
        .is_empty());
    }
}
