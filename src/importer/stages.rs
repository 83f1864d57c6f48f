//! Pipeline stages of the import session variants.
//!
//! Messages flowing through the pipeline are task ids; the actual task state
//! lives in the shared `SessionContext`. Every stage is wrapped by
//! `with_progress`, which marks the task's progress before delegating, so a
//! crashed or cancelled run leaves the exact high-water mark behind.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::importer::error::ImportError;
use crate::importer::session::SessionContext;
use crate::library::{CommitItem, CommitRequest, PluginEvent};
use crate::pipeline::{Producer, Stage};
use crate::state::{DuplicateAction, ItemInfo, Progress, TaskState};

/// How an import variant picks the candidate for each task.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateChoice {
    /// Lowest distance among real candidates.
    Best,
    /// The synthetic on-disk candidate.
    Asis,
    /// An explicit candidate id from a previous preview.
    Id(String),
}

impl Serialize for CandidateChoice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CandidateChoice::Best => serializer.serialize_str("best"),
            CandidateChoice::Asis => serializer.serialize_str("asis"),
            CandidateChoice::Id(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for CandidateChoice {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "best" => CandidateChoice::Best,
            "asis" => CandidateChoice::Asis,
            _ => CandidateChoice::Id(value),
        })
    }
}

/// Choice policy of the running variant.
#[derive(Debug, Clone)]
pub enum ChoiceMode {
    /// Explicit per-task choices; `"*"` applies to all tasks, explicit
    /// task-id mappings override.
    Explicit(HashMap<String, CandidateChoice>),
    /// Best candidate, gated by the distance threshold.
    Auto { threshold: f64 },
    /// Always the asis candidate (bootleg releases).
    Bootleg,
}

/// Resolve a wildcard-able per-task map.
fn resolve_for_task<'a, V>(map: &'a HashMap<String, V>, task_id: &str) -> Option<&'a V> {
    map.get(task_id).or_else(|| map.get("*"))
}

// ---------------------------------------------------------------------------
// Progress tagging
// ---------------------------------------------------------------------------

struct WithProgress {
    ctx: Arc<SessionContext>,
    progress: Progress,
    inner: Box<dyn Stage<String>>,
}

#[async_trait]
impl Stage<String> for WithProgress {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn prime(&mut self) -> Result<(), ImportError> {
        self.inner.prime().await
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        self.ctx
            .with_task(&task_id, |task| task.set_progress(self.progress))?;
        self.inner.send(task_id).await
    }
}

/// Mark the task's progress before delegating to the wrapped stage.
pub fn with_progress(
    ctx: &Arc<SessionContext>,
    progress: Progress,
    inner: Box<dyn Stage<String>>,
) -> Box<dyn Stage<String>> {
    Box::new(WithProgress {
        ctx: ctx.clone(),
        progress,
        inner,
    })
}

/// Terminal marker stage: raises progress and optionally flags the task
/// completed.
pub struct MarkProgressStage {
    ctx: Arc<SessionContext>,
    name: &'static str,
    progress: Progress,
    mark_completed: bool,
}

impl MarkProgressStage {
    pub fn boxed(
        ctx: &Arc<SessionContext>,
        name: &'static str,
        progress: Progress,
        mark_completed: bool,
    ) -> Box<dyn Stage<String>> {
        Box::new(Self {
            ctx: ctx.clone(),
            name,
            progress,
            mark_completed,
        })
    }
}

#[async_trait]
impl Stage<String> for MarkProgressStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        self.ctx.with_task(&task_id, |task| {
            task.force_progress(self.progress);
            if self.mark_completed {
                task.completed = true;
            }
        })?;
        Ok(vec![task_id])
    }
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// Scan the session's folder and emit one freshly created task.
///
/// Multi-disc folders collapse into a single task whose `paths` are the disc
/// directories; archives contribute items from their central-directory
/// listing.
pub struct ReadTasksProducer {
    ctx: Arc<SessionContext>,
    pending: Option<VecDeque<String>>,
}

impl ReadTasksProducer {
    pub fn new(ctx: &Arc<SessionContext>) -> Self {
        Self {
            ctx: ctx.clone(),
            pending: None,
        }
    }

    fn scan(&self) -> Result<Vec<String>, ImportError> {
        let folder_path = self.ctx.with_state(|state| state.folder_path.clone());
        let classifier = &self.ctx.classifier;

        let items: Vec<ItemInfo> = if folder_path.is_file() {
            archive_items(&folder_path)?
        } else {
            let mut audio_files: Vec<PathBuf> = walkdir::WalkDir::new(&folder_path)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    !e.file_name()
                        .to_str()
                        .map(|n| n.starts_with('.'))
                        .unwrap_or(false)
                })
                .flatten()
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| classifier.is_audio_file(p))
                .collect();
            audio_files.sort();
            audio_files.iter().map(|p| ItemInfo::from_file(p)).collect()
        };

        if items.is_empty() {
            return Err(ImportError::NotFound(format!(
                "no audio files in {}",
                folder_path.display()
            )));
        }

        let paths: BTreeSet<PathBuf> = items
            .iter()
            .filter_map(|i| i.path.parent().map(|p| p.to_path_buf()))
            .collect();

        let mut task = TaskState::new(
            Some(folder_path.clone()),
            paths.into_iter().collect(),
            items,
            &self.ctx.settings.artist_separators,
        );
        task.set_progress(Progress::ReadingFiles);

        info!(
            folder = %folder_path.display(),
            items = task.items.len(),
            "read import task"
        );

        let snapshot = task.clone();
        let task_id = self.ctx.with_state(|state| state.upsert_task(task).id.clone());
        self.ctx
            .plugins
            .send(&PluginEvent::ImportTaskCreated { task: &snapshot });

        Ok(vec![task_id])
    }
}

#[async_trait]
impl Producer<String> for ReadTasksProducer {
    async fn next(&mut self) -> Result<Option<String>, ImportError> {
        if self.pending.is_none() {
            self.pending = Some(self.scan()?.into());
        }
        Ok(self.pending.as_mut().unwrap().pop_front())
    }
}

/// Items for a zip archive, from the central directory (no extraction).
fn archive_items(archive_path: &Path) -> Result<Vec<ItemInfo>, ImportError> {
    if archive_path.extension().and_then(|e| e.to_str()) != Some("zip") {
        return Err(ImportError::InvalidUsage(format!(
            "cannot read items from archive {}: only zip archives are supported",
            archive_path.display()
        )));
    }
    let file = std::fs::File::open(archive_path).map_err(|e| ImportError::Infra(e.into()))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ImportError::Infra(anyhow::Error::from(e)))?;

    let mut items = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| ImportError::Infra(anyhow::Error::from(e)))?;
        if entry.is_dir() {
            continue;
        }
        let entry_path = archive_path.join(entry.name());
        items.push(ItemInfo {
            title: entry_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string()),
            size: entry.size(),
            path: entry_path,
            ..Default::default()
        });
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(items)
}

/// Producer over the tasks already present in the session (import, undo and
/// add-candidates variants).
pub struct ExistingTasksProducer {
    pending: VecDeque<String>,
}

impl ExistingTasksProducer {
    pub fn new(ctx: &Arc<SessionContext>) -> Self {
        Self {
            pending: ctx.with_state(|state| state.task_ids()).into(),
        }
    }
}

#[async_trait]
impl Producer<String> for ExistingTasksProducer {
    async fn next(&mut self) -> Result<Option<String>, ImportError> {
        Ok(self.pending.pop_front())
    }
}

// ---------------------------------------------------------------------------
// Preview stages
// ---------------------------------------------------------------------------

/// Notify plugins that a task enters the transform stages.
pub struct TaskStartStage {
    ctx: Arc<SessionContext>,
}

impl TaskStartStage {
    pub fn boxed(ctx: &Arc<SessionContext>) -> Box<dyn Stage<String>> {
        Box::new(Self { ctx: ctx.clone() })
    }
}

#[async_trait]
impl Stage<String> for TaskStartStage {
    fn name(&self) -> &'static str {
        "task_start"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let snapshot = self.ctx.task_snapshot(&task_id)?;
        self.ctx
            .plugins
            .send(&PluginEvent::ImportTaskStart { task: &snapshot });
        Ok(vec![task_id])
    }
}

/// Split a task into one task per distinct (albumartist, album) tag group.
pub struct GroupAlbumsStage {
    ctx: Arc<SessionContext>,
}

impl GroupAlbumsStage {
    pub fn boxed(ctx: &Arc<SessionContext>) -> Box<dyn Stage<String>> {
        Box::new(Self { ctx: ctx.clone() })
    }
}

#[async_trait]
impl Stage<String> for GroupAlbumsStage {
    fn name(&self) -> &'static str {
        "group_albums"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;

        // Group items by their album tags, keeping first-seen order.
        let mut groups: Vec<((String, String), Vec<ItemInfo>)> = Vec::new();
        for item in &task.items {
            let key = (
                item.albumartist
                    .clone()
                    .or_else(|| item.artist.clone())
                    .unwrap_or_default(),
                item.album.clone().unwrap_or_default(),
            );
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, items)) => items.push(item.clone()),
                None => groups.push((key, vec![item.clone()])),
            }
        }

        if groups.len() <= 1 {
            return Ok(vec![task_id]);
        }

        debug!(task = %task_id, groups = groups.len(), "splitting task by album group");

        self.ctx
            .with_state(|state| state.tasks.retain(|t| t.id != task_id));

        let separators = self.ctx.settings.artist_separators.clone();
        let mut new_ids = Vec::new();
        for ((_, _), items) in groups {
            let paths: BTreeSet<PathBuf> = items
                .iter()
                .filter_map(|i| i.path.parent().map(|p| p.to_path_buf()))
                .collect();
            let mut new_task = TaskState::new(
                task.toppath.clone(),
                paths.into_iter().collect(),
                items,
                &separators,
            );
            new_task.set_progress(Progress::GroupingAlbums);

            let snapshot = new_task.clone();
            let id = new_task.id.clone();
            self.ctx.with_state(|state| {
                state.upsert_task(new_task);
            });
            self.ctx
                .plugins
                .send(&PluginEvent::ImportTaskCreated { task: &snapshot });
            new_ids.push(id);
        }

        Ok(new_ids)
    }
}

/// Fetch match candidates from the metadata source.
pub struct LookupCandidatesStage {
    ctx: Arc<SessionContext>,
}

impl LookupCandidatesStage {
    pub fn boxed(ctx: &Arc<SessionContext>) -> Box<dyn Stage<String>> {
        Box::new(Self { ctx: ctx.clone() })
    }
}

#[async_trait]
impl Stage<String> for LookupCandidatesStage {
    fn name(&self) -> &'static str {
        "lookup_candidates"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;
        let metadata = task.current_metadata();

        let candidates = self.ctx.matcher.lookup_album(&metadata, &task.items).await?;
        if candidates.is_empty() {
            return Err(ImportError::NoCandidatesFound(format!(
                "{} - {}",
                metadata.artist.as_deref().unwrap_or("?"),
                metadata.album.as_deref().unwrap_or("?"),
            )));
        }

        let added = self
            .ctx
            .with_task(&task_id, |task| task.add_candidates(candidates))?;
        debug!(task = %task_id, added, "looked up candidates");
        Ok(vec![task_id])
    }
}

/// Run the library duplicate query for every real candidate.
pub struct IdentifyDuplicatesStage {
    ctx: Arc<SessionContext>,
}

impl IdentifyDuplicatesStage {
    pub fn boxed(ctx: &Arc<SessionContext>) -> Box<dyn Stage<String>> {
        Box::new(Self { ctx: ctx.clone() })
    }
}

#[async_trait]
impl Stage<String> for IdentifyDuplicatesStage {
    fn name(&self) -> &'static str {
        "identify_duplicates"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let library = self.ctx.library.clone();
        let keys = self.ctx.settings.duplicate_keys.clone();
        self.ctx.with_task(&task_id, |task| {
            let items = task.items.clone();
            for candidate in task.candidates.iter_mut() {
                candidate.identify_duplicates(library.as_ref(), &keys, &items)?;
            }
            Ok::<_, ImportError>(())
        })??;
        Ok(vec![task_id])
    }
}

/// Merge targeted-search results into existing tasks (add-candidates flow).
pub struct SearchCandidatesStage {
    ctx: Arc<SessionContext>,
    query: crate::matcher::SearchQuery,
}

impl SearchCandidatesStage {
    pub fn boxed(
        ctx: &Arc<SessionContext>,
        query: crate::matcher::SearchQuery,
    ) -> Box<dyn Stage<String>> {
        Box::new(Self {
            ctx: ctx.clone(),
            query,
        })
    }
}

#[async_trait]
impl Stage<String> for SearchCandidatesStage {
    fn name(&self) -> &'static str {
        "search_candidates"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;
        let metadata = task.current_metadata();

        let results = self
            .ctx
            .matcher
            .search_candidates(&metadata, &task.items, &self.query)
            .await?;

        let query = self.query.clone();
        let added = self.ctx.with_task(&task_id, |task| {
            task.search = Some(query);
            task.add_candidates(results)
        })?;
        info!(task = %task_id, added, "merged search candidates");
        Ok(vec![task_id])
    }
}

// ---------------------------------------------------------------------------
// Import stages
// ---------------------------------------------------------------------------

/// Bind the chosen candidate (and duplicate action) for each task.
pub struct ChooseCandidateStage {
    ctx: Arc<SessionContext>,
    mode: ChoiceMode,
    duplicate_actions: HashMap<String, DuplicateAction>,
}

impl ChooseCandidateStage {
    pub fn boxed(
        ctx: &Arc<SessionContext>,
        mode: ChoiceMode,
        duplicate_actions: HashMap<String, DuplicateAction>,
    ) -> Box<dyn Stage<String>> {
        Box::new(Self {
            ctx: ctx.clone(),
            mode,
            duplicate_actions,
        })
    }
}

#[async_trait]
impl Stage<String> for ChooseCandidateStage {
    fn name(&self) -> &'static str {
        "set_choices"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        // Plugins may offer additional candidates right before the choice.
        let snapshot = self.ctx.task_snapshot(&task_id)?;
        let offers = self.ctx.plugins.offers_before_choice(&snapshot);
        if !offers.is_empty() {
            let added = self
                .ctx
                .with_task(&task_id, |task| task.add_candidates(offers))?;
            debug!(task = %task_id, added, "plugins offered extra candidates");
        }

        if let ChoiceMode::Auto { .. } = self.mode {
            self.ctx
                .with_task(&task_id, |task| task.set_progress(Progress::MatchThreshold))?;
        }

        let mode = self.mode.clone();
        let duplicate_actions = self.duplicate_actions.clone();
        self.ctx.with_task(&task_id, |task| {
            if let Some(action) = resolve_for_task(&duplicate_actions, &task.id) {
                task.duplicate_action = Some(*action);
            }

            let chosen_id = match &mode {
                ChoiceMode::Bootleg => task.asis_candidate().id.clone(),
                ChoiceMode::Auto { threshold } => {
                    let best = task.best_candidate().ok_or_else(|| {
                        ImportError::NoCandidatesFound(format!("task {}", task.id))
                    })?;
                    if best.distance > *threshold {
                        return Err(ImportError::MatchBelowThreshold {
                            distance: best.distance,
                            threshold: *threshold,
                        });
                    }
                    best.id.clone()
                }
                ChoiceMode::Explicit(choices) => {
                    let choice = resolve_for_task(choices, &task.id)
                        .cloned()
                        .unwrap_or(CandidateChoice::Best);
                    match choice {
                        CandidateChoice::Asis => task.asis_candidate().id.clone(),
                        CandidateChoice::Best => task
                            .best_candidate()
                            .ok_or_else(|| {
                                ImportError::NoCandidatesFound(format!("task {}", task.id))
                            })?
                            .id
                            .clone(),
                        CandidateChoice::Id(id) => {
                            if task.candidate_by_id(&id).is_none() {
                                return Err(ImportError::InvalidUsage(format!(
                                    "candidate {id} does not belong to task {}",
                                    task.id
                                )));
                            }
                            id
                        }
                    }
                }
            };

            task.chosen_candidate_id = Some(chosen_id);
            Ok::<_, ImportError>(())
        })??;

        let snapshot = self.ctx.task_snapshot(&task_id)?;
        self.ctx
            .plugins
            .send(&PluginEvent::ImportTaskChoice { task: &snapshot });

        Ok(vec![task_id])
    }
}

/// Commit the chosen candidate to the library, resolving duplicates.
pub struct ApplyStage {
    ctx: Arc<SessionContext>,
}

impl ApplyStage {
    pub fn boxed(ctx: &Arc<SessionContext>) -> Box<dyn Stage<String>> {
        Box::new(Self { ctx: ctx.clone() })
    }
}

#[async_trait]
impl Stage<String> for ApplyStage {
    fn name(&self) -> &'static str {
        "apply"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;
        let chosen = task.chosen_candidate().ok_or_else(|| {
            ImportError::InvalidUsage(format!("task {} has no chosen candidate", task.id))
        })?;

        let action = task
            .duplicate_action
            .unwrap_or(self.ctx.settings.duplicate_action);

        if !chosen.duplicate_ids.is_empty() {
            match action {
                DuplicateAction::Skip => {
                    info!(task = %task_id, "duplicate found, skipping task");
                    self.ctx.with_task(&task_id, |task| {
                        task.completed = true;
                        task.set_progress(Progress::ImportCompleted);
                    })?;
                    return Ok(vec![]);
                }
                DuplicateAction::Ask => {
                    return Err(ImportError::Duplicate(format!(
                        "task {} duplicates {} library album(s) and duplicate_action is 'ask'; \
                         resolve with skip, keep, remove or merge",
                        task.id,
                        chosen.duplicate_ids.len()
                    )));
                }
                DuplicateAction::Keep | DuplicateAction::Remove | DuplicateAction::Merge => {}
            }
        }

        let metadata = task.current_metadata();
        let info = chosen.payload.album_info().cloned().unwrap_or_default();
        let tracks = chosen.payload.tracks();
        let mapping = chosen.payload.mapping();

        let commit_items: Vec<CommitItem> = task
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let matched_track = mapping.get(&index).and_then(|tdx| tracks.get(*tdx));
                CommitItem {
                    source_path: item.path.clone(),
                    title: matched_track
                        .map(|t| t.title.clone())
                        .or_else(|| item.title.clone())
                        .unwrap_or_else(|| format!("Track {}", index + 1)),
                    track: matched_track
                        .and_then(|t| t.index)
                        .or(item.track)
                        .or(Some(index as i32 + 1)),
                }
            })
            .collect();

        let request = CommitRequest {
            albumartist: info
                .artist
                .clone()
                .or_else(|| metadata.albumartist.clone())
                .or_else(|| metadata.artist.clone())
                .unwrap_or_else(|| "Unknown Artist".to_string()),
            album: info
                .album
                .clone()
                .or_else(|| metadata.album.clone())
                .unwrap_or_else(|| "Unknown Album".to_string()),
            items: commit_items,
            duplicate_action: if chosen.duplicate_ids.is_empty() {
                DuplicateAction::Keep
            } else {
                action
            },
            duplicate_ids: chosen.duplicate_ids.clone(),
        };

        let (album, items) = self
            .ctx
            .library
            .commit_import(&request)
            .map_err(ImportError::Infra)?;

        self.ctx.with_task(&task_id, |task| {
            task.library_album_id = Some(album.id.clone());
            task.library_item_ids = items.iter().map(|i| i.id.clone()).collect();
        })?;

        let snapshot = self.ctx.task_snapshot(&task_id)?;
        self.ctx
            .plugins
            .send(&PluginEvent::ImportTaskApply { task: &snapshot });

        Ok(vec![task_id])
    }
}

/// Move committed files into the library tree, remembering their original
/// paths for undo.
pub struct ManipulateFilesStage {
    ctx: Arc<SessionContext>,
}

impl ManipulateFilesStage {
    pub fn boxed(ctx: &Arc<SessionContext>) -> Box<dyn Stage<String>> {
        Box::new(Self { ctx: ctx.clone() })
    }
}

#[async_trait]
impl Stage<String> for ManipulateFilesStage {
    fn name(&self) -> &'static str {
        "manipulate_files"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;

        let mut moves: Vec<(PathBuf, PathBuf)> = Vec::new();
        for item_id in &task.library_item_ids {
            let (old, new) = self
                .ctx
                .library
                .move_item_into_library(item_id)
                .map_err(ImportError::Infra)?;
            moves.push((old, new));
        }

        self.ctx.with_task(&task_id, |task| {
            let previous: Vec<PathBuf> = task.items.iter().map(|i| i.path.clone()).collect();
            for item in task.items.iter_mut() {
                if let Some((_, new)) = moves.iter().find(|(old, _)| *old == item.path) {
                    item.path = new.clone();
                }
            }
            task.old_paths = Some(previous);
            task.completed = true;
        })?;

        info!(task = %task_id, moved = moves.len(), "manipulated files");
        Ok(vec![task_id])
    }
}

// ---------------------------------------------------------------------------
// Undo stages
// ---------------------------------------------------------------------------

/// Remove the imported album's rows from the library, capturing its items
/// for the file-restoration stage.
pub struct RemoveLibraryEntriesStage {
    ctx: Arc<SessionContext>,
    delete_files: bool,
}

impl RemoveLibraryEntriesStage {
    pub fn boxed(ctx: &Arc<SessionContext>, delete_files: bool) -> Box<dyn Stage<String>> {
        Box::new(Self {
            ctx: ctx.clone(),
            delete_files,
        })
    }
}

#[async_trait]
impl Stage<String> for RemoveLibraryEntriesStage {
    fn name(&self) -> &'static str {
        "remove_library_entries"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;
        let album_id = task.library_album_id.clone().ok_or_else(|| {
            ImportError::Integrity(format!(
                "task {} claims an import but records no library album",
                task.id
            ))
        })?;

        let album = self
            .ctx
            .library
            .get_album(&album_id)
            .map_err(ImportError::Infra)?
            .ok_or_else(|| {
                ImportError::Integrity(format!(
                    "library album {album_id} is missing but the session says it was imported"
                ))
            })?;

        let items = self
            .ctx
            .library
            .items_for_album(&album_id)
            .map_err(ImportError::Infra)?;

        for item in &items {
            self.ctx.plugins.send(&PluginEvent::ItemRemoved { item });
        }
        self.ctx.plugins.send(&PluginEvent::AlbumRemoved { album: &album });

        // With delete_files the rows and the audio files go together; the
        // restore stage then has nothing to move.
        self.ctx
            .library
            .remove_album(&album_id, self.delete_files)
            .map_err(ImportError::Infra)?;

        self.ctx
            .removed_items
            .lock()
            .unwrap()
            .insert(task_id.clone(), items);

        Ok(vec![task_id])
    }
}

/// Restore the removed items' files to their pre-import locations, or
/// confirm their deletion.
pub struct MoveFilesBackStage {
    ctx: Arc<SessionContext>,
    delete_files: bool,
}

impl MoveFilesBackStage {
    pub fn boxed(ctx: &Arc<SessionContext>, delete_files: bool) -> Box<dyn Stage<String>> {
        Box::new(Self {
            ctx: ctx.clone(),
            delete_files,
        })
    }
}

#[async_trait]
impl Stage<String> for MoveFilesBackStage {
    fn name(&self) -> &'static str {
        "move_files_back"
    }

    async fn send(&mut self, task_id: String) -> Result<Vec<String>, ImportError> {
        let task = self.ctx.task_snapshot(&task_id)?;
        let old_paths = task.old_paths.clone().ok_or_else(|| {
            ImportError::Integrity(format!("task {} has no recorded original paths", task.id))
        })?;

        let removed = self
            .ctx
            .removed_items
            .lock()
            .unwrap()
            .remove(&task_id)
            .unwrap_or_default();

        if !self.delete_files {
            for removed_item in &removed {
                let index = task
                    .items
                    .iter()
                    .position(|item| item.path == removed_item.path);
                let Some(index) = index else {
                    warn!(
                        path = %removed_item.path.display(),
                        "removed library item not tracked by task, leaving file in place"
                    );
                    continue;
                };
                let dest = &old_paths[index];
                self.ctx
                    .library
                    .move_back(&removed_item.path, dest)
                    .map_err(ImportError::Infra)?;
            }
        }

        self.ctx.with_task(&task_id, |task| {
            for (index, item) in task.items.iter_mut().enumerate() {
                if let Some(old) = old_paths.get(index) {
                    item.path = old.clone();
                }
            }
            task.library_album_id = None;
            task.library_item_ids.clear();
        })?;

        info!(task = %task_id, delete_files = self.delete_files, "restored folder state");
        Ok(vec![task_id])
    }
}
