//! Test fixtures: a scripted metadata source and album-folder builders.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use tarantella_import_server::importer::ImportError;
use tarantella_import_server::matcher::{
    AlbumInfo, MatchCandidate, MatchPayload, MetadataSource, SearchQuery, TrackInfo,
};
use tarantella_import_server::state::{ItemInfo, Metadata};

/// Build an album-level match candidate with one mapped track per item slot.
pub fn album_candidate(id: &str, artist: &str, album: &str, distance: f64) -> MatchCandidate {
    let tracks = vec![TrackInfo {
        track_id: Some(format!("{id}-t1")),
        title: album.to_string(),
        artist: Some(artist.to_string()),
        index: Some(1),
        length_secs: Some(232.0),
    }];
    MatchCandidate {
        payload: MatchPayload::Album {
            info: AlbumInfo {
                album_id: Some(id.to_string()),
                album: Some(album.to_string()),
                artist: Some(artist.to_string()),
                year: Some(1983),
                data_source: Some("fixture".to_string()),
                ..Default::default()
            },
            tracks,
            mapping: BTreeMap::from([(0, 0)]),
        },
        distance,
        penalties: vec![],
    }
}

/// Metadata source with scripted results.
///
/// `lookup_album` returns the configured candidate list for every task;
/// `search_candidates` resolves ids against the searchable set.
#[derive(Default)]
pub struct FixtureMatcher {
    lookup_results: Mutex<Vec<MatchCandidate>>,
    searchable: Mutex<HashMap<String, MatchCandidate>>,
}

impl FixtureMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_searchable(&self, candidate: MatchCandidate) {
        if let Some(id) = candidate.payload.match_id() {
            self.searchable
                .lock()
                .unwrap()
                .insert(id.to_string(), candidate.clone());
        }
    }

    pub fn set_lookup(&self, candidates: Vec<MatchCandidate>) {
        *self.lookup_results.lock().unwrap() = candidates;
    }
}

#[async_trait]
impl MetadataSource for FixtureMatcher {
    async fn lookup_album(
        &self,
        _metadata: &Metadata,
        _items: &[ItemInfo],
    ) -> Result<Vec<MatchCandidate>, ImportError> {
        Ok(self.lookup_results.lock().unwrap().clone())
    }

    async fn search_candidates(
        &self,
        _metadata: &Metadata,
        _items: &[ItemInfo],
        query: &SearchQuery,
    ) -> Result<Vec<MatchCandidate>, ImportError> {
        let searchable = self.searchable.lock().unwrap();
        Ok(query
            .ids
            .iter()
            .filter_map(|id| searchable.get(id).cloned())
            .collect())
    }
}

/// Create an album folder with the given audio file names (fake content).
pub fn create_album_folder(root: &Path, name: &str, files: &[&str]) -> PathBuf {
    let folder = root.join(name);
    std::fs::create_dir_all(&folder).unwrap();
    for (index, file) in files.iter().enumerate() {
        // Distinct sizes keep per-file identities stable in the hash.
        let content = vec![b'x'; 1000 + index * 10];
        std::fs::write(folder.join(file), content).unwrap();
    }
    folder
}
