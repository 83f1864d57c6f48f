//! In-memory state of an import session.
//!
//! `SessionState` is one execution of the import pipeline over one folder.
//! It owns an ordered list of `TaskState`s (one per album-candidate group),
//! each of which owns its `CandidateState`s, always including one synthetic
//! "asis" candidate built from on-disk metadata. The graph is a tree; only
//! the worker owning a session mutates it.

pub mod progress;
pub mod serialize;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::fingerprint::Folder;
use crate::importer::error::{ImportError, SerializedException};
use crate::library::{LibraryAlbum, MusicLibrary};
use crate::matcher::{AlbumInfo, MatchCandidate, MatchPayload, SearchQuery, TrackInfo};

pub use progress::{FolderStatus, Progress, ProgressState};

/// Prefix marking the synthetic on-disk candidate.
pub const ASIS_ID_PREFIX: &str = "asis-";

/// One music file on disk, with whatever tags could be read from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub path: PathBuf,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albumartist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_secs: Option<f64>,
}

impl ItemInfo {
    /// Read tags from an audio file. Unreadable tags degrade to a title
    /// derived from the file name, never to an error: untagged bootlegs must
    /// still produce usable items.
    pub fn from_file(path: &Path) -> Self {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let tagged = Probe::open(path).ok().and_then(|p| p.read().ok());

        let mut info = ItemInfo {
            path: path.to_path_buf(),
            size,
            ..Default::default()
        };

        if let Some(tagged_file) = tagged {
            let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
            if let Some(tag) = tag {
                info.title = tag.title().map(|s| s.to_string());
                info.artist = tag.artist().map(|s| s.to_string());
                info.album = tag.album().map(|s| s.to_string());
                info.albumartist = tag
                    .get_string(&ItemKey::AlbumArtist)
                    .map(|s| s.to_string());
                info.track = tag.track().map(|t| t as i32);
                info.year = tag.year().map(|y| y as i32);
            }
            info.length_secs = Some(tagged_file.properties().duration().as_secs_f64());
        }

        if info.title.is_none() {
            info.title = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string());
        }

        info
    }
}

/// Consensus metadata over a task's items, the "current" on-disk metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albumartist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl Metadata {
    /// Most-common-value consensus across items. When no artist value wins
    /// outright, joint-artist strings are split on the configured separators
    /// and the most common first segment is used.
    pub fn consensus(items: &[ItemInfo], artist_separators: &[String]) -> Self {
        fn most_common<'a>(values: impl Iterator<Item = &'a String>) -> Option<String> {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for value in values {
                *counts.entry(value.as_str()).or_insert(0) += 1;
            }
            counts
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .map(|(value, _)| value.to_string())
        }

        let artist = most_common(items.iter().filter_map(|i| i.artist.as_ref())).or_else(|| {
            let split: Vec<String> = items
                .iter()
                .filter_map(|i| i.artist.as_ref())
                .map(|a| {
                    let mut head = a.clone();
                    for sep in artist_separators {
                        if let Some(idx) = head.find(sep.as_str()) {
                            head.truncate(idx);
                        }
                    }
                    head.trim().to_string()
                })
                .collect();
            most_common(split.iter())
        });

        Metadata {
            albumartist: most_common(items.iter().filter_map(|i| i.albumartist.as_ref()))
                .or_else(|| artist.clone()),
            artist,
            album: most_common(items.iter().filter_map(|i| i.album.as_ref())),
            year: {
                let years: Vec<String> =
                    items.iter().filter_map(|i| i.year.map(|y| y.to_string())).collect();
                most_common(years.iter())
            },
        }
    }
}

/// Policy for resolving a candidate that duplicates existing library content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    Skip,
    Keep,
    Remove,
    Merge,
    Ask,
}

impl DuplicateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateAction::Skip => "skip",
            DuplicateAction::Keep => "keep",
            DuplicateAction::Remove => "remove",
            DuplicateAction::Merge => "merge",
            DuplicateAction::Ask => "ask",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "skip" => Some(DuplicateAction::Skip),
            "keep" => Some(DuplicateAction::Keep),
            "remove" => Some(DuplicateAction::Remove),
            "merge" => Some(DuplicateAction::Merge),
            "ask" => Some(DuplicateAction::Ask),
            _ => None,
        }
    }
}

/// One potential match for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateState {
    pub id: String,
    pub duplicate_ids: Vec<String>,
    pub payload: MatchPayload,
    pub distance: f64,
    pub penalties: Vec<String>,
}

impl CandidateState {
    pub fn from_match(candidate: MatchCandidate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            duplicate_ids: Vec::new(),
            payload: candidate.payload,
            distance: candidate.distance,
            penalties: candidate.penalties,
        }
    }

    /// Build the synthetic "asis" candidate from on-disk metadata. The
    /// mapping is the identity over the task's items.
    pub fn asis(items: &[ItemInfo], metadata: &Metadata, toppath: Option<&Path>) -> Self {
        let tracks: Vec<TrackInfo> = items
            .iter()
            .enumerate()
            .map(|(index, item)| TrackInfo {
                track_id: None,
                title: item
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Track {}", index + 1)),
                artist: item.artist.clone(),
                index: Some(item.track.unwrap_or(index as i32 + 1)),
                length_secs: item.length_secs,
            })
            .collect();

        let mapping: BTreeMap<usize, usize> = (0..items.len()).map(|i| (i, i)).collect();

        let info = AlbumInfo {
            album_id: None,
            album: metadata.album.clone(),
            artist: metadata.albumartist.clone().or_else(|| metadata.artist.clone()),
            year: metadata.year.as_deref().and_then(|y| y.parse().ok()),
            data_source: Some("asis".to_string()),
            data_url: toppath.map(|p| format!("file://{}", p.display())),
            ..Default::default()
        };

        Self {
            id: format!("{ASIS_ID_PREFIX}{}", Uuid::new_v4()),
            duplicate_ids: Vec::new(),
            payload: MatchPayload::Album {
                info,
                tracks,
                mapping,
            },
            distance: 0.0,
            penalties: Vec::new(),
        }
    }

    pub fn is_asis(&self) -> bool {
        self.id.starts_with(ASIS_ID_PREFIX)
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Run the library's duplicate query for this candidate and store the
    /// matching album ids. Asis candidates bypass detection. Albums whose
    /// files are a subset of this task's items are re-imports, not
    /// duplicates.
    pub fn identify_duplicates(
        &mut self,
        library: &dyn MusicLibrary,
        duplicate_keys: &[String],
        task_items: &[ItemInfo],
    ) -> Result<Vec<LibraryAlbum>, ImportError> {
        if self.is_asis() {
            self.duplicate_ids.clear();
            return Ok(Vec::new());
        }

        let Some(info) = self.payload.album_info() else {
            self.duplicate_ids.clear();
            return Ok(Vec::new());
        };
        if info.artist.is_none() && info.album.is_none() {
            self.duplicate_ids.clear();
            return Ok(Vec::new());
        }

        let task_paths: HashSet<&Path> = task_items.iter().map(|i| i.path.as_path()).collect();

        let mut duplicates = Vec::new();
        for album in library
            .query_duplicates(info, duplicate_keys)
            .map_err(ImportError::Infra)?
        {
            let album_paths: HashSet<PathBuf> = library
                .items_for_album(&album.id)
                .map_err(ImportError::Infra)?
                .into_iter()
                .map(|i| i.path)
                .collect();
            let subset = !album_paths.is_empty()
                && album_paths.iter().all(|p| task_paths.contains(p.as_path()));
            if !subset {
                duplicates.push(album);
            }
        }

        self.duplicate_ids = duplicates.iter().map(|a| a.id.clone()).collect();
        Ok(duplicates)
    }
}

/// One album-scope work item within a session.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub id: String,
    pub toppath: Option<PathBuf>,
    pub paths: Vec<PathBuf>,
    pub items: Vec<ItemInfo>,
    pub candidates: Vec<CandidateState>,
    pub chosen_candidate_id: Option<String>,
    pub duplicate_action: Option<DuplicateAction>,
    pub search: Option<SearchQuery>,
    pub progress: ProgressState,
    pub completed: bool,
    pub old_paths: Option<Vec<PathBuf>>,
    pub library_album_id: Option<String>,
    pub library_item_ids: Vec<String>,
    pub artist_separators: Vec<String>,
}

impl TaskState {
    pub fn new(
        toppath: Option<PathBuf>,
        paths: Vec<PathBuf>,
        items: Vec<ItemInfo>,
        artist_separators: &[String],
    ) -> Self {
        let metadata = Metadata::consensus(&items, artist_separators);
        let asis = CandidateState::asis(&items, &metadata, toppath.as_deref());
        Self {
            id: Uuid::new_v4().to_string(),
            toppath,
            paths,
            items,
            candidates: vec![asis],
            chosen_candidate_id: None,
            duplicate_action: None,
            search: None,
            progress: ProgressState::default(),
            completed: false,
            old_paths: None,
            library_album_id: None,
            library_item_ids: Vec::new(),
            artist_separators: artist_separators.to_vec(),
        }
    }

    pub fn current_metadata(&self) -> Metadata {
        Metadata::consensus(&self.items, &self.artist_separators)
    }

    /// Raise the task's progress. Progress is monotone; a lower value is a
    /// programming error and is ignored with a warning.
    pub fn set_progress(&mut self, progress: impl Into<ProgressState>) {
        let next = progress.into();
        if next.progress < self.progress.progress {
            warn!(
                task = %self.id,
                from = ?self.progress.progress,
                to = ?next.progress,
                "ignoring progress regression"
            );
            return;
        }
        self.progress = next;
    }

    /// Unconditionally set progress. Only terminal markers use this: a
    /// completed deletion resets the task below the import range so a later
    /// re-import can proceed.
    pub fn force_progress(&mut self, progress: impl Into<ProgressState>) {
        self.progress = progress.into();
    }

    pub fn candidate_by_id(&self, id: &str) -> Option<&CandidateState> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn candidate_by_id_mut(&mut self, id: &str) -> Option<&mut CandidateState> {
        self.candidates.iter_mut().find(|c| c.id == id)
    }

    /// The synthetic on-disk candidate; constructed once per task lifetime.
    pub fn asis_candidate(&self) -> &CandidateState {
        self.candidates
            .iter()
            .find(|c| c.is_asis())
            .expect("every task has an asis candidate")
    }

    /// Best real candidate by distance; the asis candidate never wins.
    pub fn best_candidate(&self) -> Option<&CandidateState> {
        self.candidates
            .iter()
            .filter(|c| !c.is_asis())
            .min_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn chosen_candidate(&self) -> Option<&CandidateState> {
        self.chosen_candidate_id
            .as_deref()
            .and_then(|id| self.candidate_by_id(id))
    }

    /// Insert fresh match candidates ahead of existing ones, skipping any
    /// whose match id is already present. Returns how many were added.
    pub fn add_candidates(&mut self, candidates: Vec<MatchCandidate>) -> usize {
        let existing: HashSet<String> = self
            .candidates
            .iter()
            .filter_map(|c| c.payload.match_id().map(|s| s.to_string()))
            .collect();

        let mut added = 0;
        let mut insert_at = 0;
        for candidate in candidates {
            if let Some(match_id) = candidate.payload.match_id() {
                if existing.contains(match_id) {
                    continue;
                }
            }
            self.candidates
                .insert(insert_at, CandidateState::from_match(candidate));
            insert_at += 1;
            added += 1;
        }
        added
    }
}

/// One execution of the import pipeline over one folder.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    pub folder_hash: String,
    pub folder_path: PathBuf,
    pub folder_revision: i64,
    pub tasks: Vec<TaskState>,
    pub exc: Option<SerializedException>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(folder: &Folder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            folder_hash: folder.hash.clone(),
            folder_path: folder.path.clone(),
            folder_revision: 0,
            tasks: Vec::new(),
            exc: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Session progress is the minimum over task progresses; `NotStarted`
    /// with no tasks.
    pub fn progress(&self) -> ProgressState {
        self.tasks
            .iter()
            .map(|t| t.progress.clone())
            .min()
            .unwrap_or_default()
    }

    /// All tasks reached a terminal progress value.
    pub fn completed(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.progress.progress.is_terminal())
    }

    /// Idempotent by task id: returns the existing task or appends the given
    /// one.
    pub fn upsert_task(&mut self, task: TaskState) -> &mut TaskState {
        if let Some(index) = self.tasks.iter().position(|t| t.id == task.id) {
            return &mut self.tasks[index];
        }
        self.tasks.push(task);
        self.tasks.last_mut().unwrap()
    }

    pub fn task_by_id(&self, id: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_by_id_mut(&mut self, id: &str) -> Option<&mut TaskState> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn set_exc(&mut self, exc: SerializedException) {
        self.exc = Some(exc);
        self.touch();
    }

    pub fn clear_exc(&mut self) {
        self.exc = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn folder() -> Folder {
        Folder {
            path: PathBuf::from("/music/in/Nena-99RedBalloons"),
            hash: "abc123".to_string(),
            is_album: true,
        }
    }

    #[test]
    fn test_session_progress_is_min_over_tasks() {
        let mut session = SessionState::new(&folder());
        assert_eq!(session.progress().progress, Progress::NotStarted);

        let mut t1 = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "Luftballons")]);
        t1.set_progress(Progress::PreviewCompleted);
        let mut t2 = task_with_items(vec![item("/a/2.mp3", "Nena", "99", "Balloons")]);
        t2.set_progress(Progress::ReadingFiles);
        session.upsert_task(t1);
        session.upsert_task(t2);

        assert_eq!(session.progress().progress, Progress::ReadingFiles);
    }

    #[test]
    fn test_upsert_task_is_idempotent_by_id() {
        let mut session = SessionState::new(&folder());
        let task = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "Luftballons")]);
        let id = task.id.clone();

        session.upsert_task(task.clone());
        session.upsert_task(task);
        assert_eq!(session.tasks.len(), 1);
        assert_eq!(session.tasks[0].id, id);
    }

    #[test]
    fn test_task_progress_is_monotone() {
        let mut task = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "Luftballons")]);
        task.set_progress(Progress::Importing);
        assert_eq!(task.progress.progress, Progress::Importing);

        // Regression attempts are ignored.
        task.set_progress(Progress::ReadingFiles);
        assert_eq!(task.progress.progress, Progress::Importing);

        // Terminal markers may reset below the import range.
        task.force_progress(Progress::DeletionCompleted);
        assert_eq!(task.progress.progress, Progress::DeletionCompleted);
    }

    #[test]
    fn test_asis_candidate_always_present_with_prefix() {
        let task = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "Luftballons")]);
        assert_eq!(task.candidates.len(), 1);
        let asis = task.asis_candidate();
        assert!(asis.id.starts_with(ASIS_ID_PREFIX));
        assert!(asis.is_asis());
        assert_eq!(asis.payload.mapping(), BTreeMap::from([(0, 0)]));
    }

    #[test]
    fn test_best_candidate_skips_asis() {
        let mut task = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "Luftballons")]);
        assert!(task.best_candidate().is_none());

        task.add_candidates(vec![
            album_match("mb-1", "Nena", "99 Luftballons", 0.2),
            album_match("mb-2", "Nena", "99 Luftballons", 0.05),
        ]);
        let best = task.best_candidate().unwrap();
        assert_eq!(best.payload.match_id(), Some("mb-2"));
    }

    #[test]
    fn test_add_candidates_dedups_by_match_id() {
        let mut task = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "Luftballons")]);
        assert_eq!(
            task.add_candidates(vec![album_match("mb-1", "Nena", "99", 0.2)]),
            1
        );
        assert_eq!(
            task.add_candidates(vec![
                album_match("mb-1", "Nena", "99", 0.2),
                album_match("mb-3", "Nena", "99", 0.4),
            ]),
            1
        );
        assert_eq!(task.candidates.len(), 3); // mb-1, mb-3, asis
    }

    #[test]
    fn test_metadata_consensus_most_common_wins() {
        let items = vec![
            item("/a/1.mp3", "Nena", "99 Luftballons", "a"),
            item("/a/2.mp3", "Nena", "99 Luftballons", "b"),
            item("/a/3.mp3", "Nena feat. X", "99 Luftballons", "c"),
        ];
        let meta = Metadata::consensus(&items, &[]);
        assert_eq!(meta.artist.as_deref(), Some("Nena"));
        assert_eq!(meta.album.as_deref(), Some("99 Luftballons"));
    }

    #[test]
    fn test_metadata_consensus_splits_on_separators() {
        let items = vec![
            item("/a/1.mp3", "Nena feat. Kim", "99", "a"),
            item("/a/2.mp3", "Nena feat. Jim", "99", "b"),
        ];
        let meta = Metadata::consensus(&items, &[" feat. ".to_string()]);
        assert_eq!(meta.artist.as_deref(), Some("Nena"));
    }

    #[test]
    fn test_completed_requires_terminal_tasks() {
        let mut session = SessionState::new(&folder());
        assert!(!session.completed());

        let mut task = task_with_items(vec![item("/a/1.mp3", "Nena", "99", "x")]);
        task.set_progress(Progress::PreviewCompleted);
        session.upsert_task(task);
        assert!(session.completed());

        let mut pending = task_with_items(vec![item("/a/2.mp3", "Nena", "99", "y")]);
        pending.set_progress(Progress::LookingUpCandidates);
        session.upsert_task(pending);
        assert!(!session.completed());
    }
}
