//! Progress and folder-status enums.
//!
//! `Progress` tracks how far a task has come through the import pipeline and
//! is totally ordered, so a session's progress is simply the minimum over its
//! tasks. `FolderStatus` is the coarse, unordered status broadcast to clients.

use serde::{Deserialize, Serialize};

/// Task progress through the import pipeline, in chronological order.
///
/// The numeric values leave gaps between the variant groups so that stored
/// ordinals stay stable when stages are added within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    NotStarted = 0,

    // Preview
    ReadingFiles = 10,
    GroupingAlbums = 11,
    LookingUpCandidates = 12,
    IdentifyingDuplicates = 13,

    // Markers, no stage of their own
    PreviewCompleted = 20,
    DeletionCompleted = 21,

    // Import
    OfferingMatches = 30,
    MatchThreshold = 31,
    WaitingForUserSelection = 32,
    EarlyImporting = 33,
    Importing = 34,
    ManipulatingFiles = 35,

    ImportCompleted = 40,

    // Undo
    Deleting = 50,
}

/// All variants in ascending order. Offset arithmetic walks this list.
const ORDERED: [Progress; 15] = [
    Progress::NotStarted,
    Progress::ReadingFiles,
    Progress::GroupingAlbums,
    Progress::LookingUpCandidates,
    Progress::IdentifyingDuplicates,
    Progress::PreviewCompleted,
    Progress::DeletionCompleted,
    Progress::OfferingMatches,
    Progress::MatchThreshold,
    Progress::WaitingForUserSelection,
    Progress::EarlyImporting,
    Progress::Importing,
    Progress::ManipulatingFiles,
    Progress::ImportCompleted,
    Progress::Deleting,
];

impl Progress {
    /// Stable ordinal value, used for persistence.
    pub fn ordinal(self) -> i64 {
        self as i64
    }

    /// Reconstruct from a stored ordinal.
    pub fn from_ordinal(value: i64) -> Option<Self> {
        ORDERED.iter().copied().find(|p| p.ordinal() == value)
    }

    /// Move `delta` steps along the ordered variant list, clamping at both
    /// ends.
    pub fn offset(self, delta: i64) -> Self {
        let index = ORDERED
            .iter()
            .position(|p| *p == self)
            .unwrap_or(0) as i64;
        let target = (index + delta).clamp(0, ORDERED.len() as i64 - 1);
        ORDERED[target as usize]
    }

    pub fn next(self) -> Self {
        self.offset(1)
    }

    pub fn prev(self) -> Self {
        self.offset(-1)
    }

    /// Terminal progress values: sessions at these values are done (one way
    /// or another) and need no further stage work.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Progress::PreviewCompleted | Progress::DeletionCompleted | Progress::ImportCompleted
        )
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::NotStarted
    }
}

/// Progress plus an optional human-readable message and the plugin that
/// produced it. Ordered by progress alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressState {
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
}

impl ProgressState {
    pub fn new(progress: Progress) -> Self {
        Self {
            progress,
            message: None,
            plugin_name: None,
        }
    }

    pub fn with_message(progress: Progress, message: impl Into<String>) -> Self {
        Self {
            progress,
            message: Some(message.into()),
            plugin_name: None,
        }
    }
}

impl PartialEq for ProgressState {
    fn eq(&self, other: &Self) -> bool {
        self.progress == other.progress
    }
}

impl Eq for ProgressState {}

impl PartialOrd for ProgressState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProgressState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.progress.cmp(&other.progress)
    }
}

impl From<Progress> for ProgressState {
    fn from(progress: Progress) -> Self {
        ProgressState::new(progress)
    }
}

/// Coarse folder status broadcast to connected clients. Unordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    Unknown,
    Failed,
    NotStarted,
    Pending,
    Previewing,
    Previewed,
    Importing,
    Imported,
    Deleting,
    Deleted,
}

impl FolderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderStatus::Unknown => "unknown",
            FolderStatus::Failed => "failed",
            FolderStatus::NotStarted => "not_started",
            FolderStatus::Pending => "pending",
            FolderStatus::Previewing => "previewing",
            FolderStatus::Previewed => "previewed",
            FolderStatus::Importing => "importing",
            FolderStatus::Imported => "imported",
            FolderStatus::Deleting => "deleting",
            FolderStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
