//! Job queue data model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::importer::error::SerializedException;
use crate::importer::CandidateChoice;
use crate::matcher::SearchQuery;
use crate::state::DuplicateAction;

/// The closed set of enqueue entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueKind {
    Preview,
    PreviewAddCandidates,
    ImportCandidate,
    ImportAuto,
    ImportBootleg,
    ImportUndo,
}

impl EnqueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueKind::Preview => "preview",
            EnqueueKind::PreviewAddCandidates => "preview_add_candidates",
            EnqueueKind::ImportCandidate => "import_candidate",
            EnqueueKind::ImportAuto => "import_auto",
            EnqueueKind::ImportBootleg => "import_bootleg",
            EnqueueKind::ImportUndo => "import_undo",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "preview" => Some(EnqueueKind::Preview),
            "preview_add_candidates" => Some(EnqueueKind::PreviewAddCandidates),
            "import_candidate" => Some(EnqueueKind::ImportCandidate),
            "import_auto" => Some(EnqueueKind::ImportAuto),
            "import_bootleg" => Some(EnqueueKind::ImportBootleg),
            "import_undo" => Some(EnqueueKind::ImportUndo),
            _ => None,
        }
    }
}

/// Metadata stored on every enqueued job and read back by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMeta {
    pub folder_hash: String,
    pub folder_path: String,
    pub job_id: String,
    pub job_kind: EnqueueKind,
    /// Opaque client reference so frontends can correlate websocket updates
    /// with their own requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_ref: Option<String>,
}

/// Kind-specific job parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Preview,
    PreviewAddCandidates {
        #[serde(default)]
        search_ids: Vec<String>,
        #[serde(default)]
        search_artist: Option<String>,
        #[serde(default)]
        search_album: Option<String>,
    },
    ImportCandidate {
        /// Task id (or `"*"`) to candidate choice. Empty means best for all.
        #[serde(default)]
        candidate_ids: HashMap<String, CandidateChoice>,
        #[serde(default)]
        duplicate_actions: HashMap<String, DuplicateAction>,
    },
    ImportAuto {
        #[serde(default)]
        import_threshold: Option<f64>,
        #[serde(default)]
        duplicate_actions: HashMap<String, DuplicateAction>,
    },
    ImportBootleg,
    ImportUndo {
        #[serde(default = "default_delete_files")]
        delete_files: bool,
    },
}

fn default_delete_files() -> bool {
    true
}

impl JobPayload {
    pub fn kind(&self) -> EnqueueKind {
        match self {
            JobPayload::Preview => EnqueueKind::Preview,
            JobPayload::PreviewAddCandidates { .. } => EnqueueKind::PreviewAddCandidates,
            JobPayload::ImportCandidate { .. } => EnqueueKind::ImportCandidate,
            JobPayload::ImportAuto { .. } => EnqueueKind::ImportAuto,
            JobPayload::ImportBootleg => EnqueueKind::ImportBootleg,
            JobPayload::ImportUndo { .. } => EnqueueKind::ImportUndo,
        }
    }

    pub fn search_query(&self) -> Option<SearchQuery> {
        match self {
            JobPayload::PreviewAddCandidates {
                search_ids,
                search_artist,
                search_album,
            } => Some(SearchQuery {
                ids: search_ids.clone(),
                artist: search_artist.clone(),
                album: search_album.clone(),
            }),
            _ => None,
        }
    }
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    /// The worker returned a user-facing error (carried as a value in
    /// `result`).
    Failed,
    /// Revoked before it started.
    Revoked,
    /// Skipped because a dependency failed.
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Registry entry for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub meta: JobMeta,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SerializedException>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_kind_round_trip() {
        for kind in [
            EnqueueKind::Preview,
            EnqueueKind::PreviewAddCandidates,
            EnqueueKind::ImportCandidate,
            EnqueueKind::ImportAuto,
            EnqueueKind::ImportBootleg,
            EnqueueKind::ImportUndo,
        ] {
            assert_eq!(EnqueueKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EnqueueKind::from_str("retag"), None);
    }

    #[test]
    fn test_payload_wire_format() {
        let json = r#"{
            "kind": "import_candidate",
            "candidate_ids": {"*": "best", "task-1": "asis"},
            "duplicate_actions": {"*": "remove"}
        }"#;
        let payload: JobPayload = serde_json::from_str(json).unwrap();
        match &payload {
            JobPayload::ImportCandidate {
                candidate_ids,
                duplicate_actions,
            } => {
                assert_eq!(candidate_ids.get("*"), Some(&CandidateChoice::Best));
                assert_eq!(
                    candidate_ids.get("task-1"),
                    Some(&CandidateChoice::Asis)
                );
                assert_eq!(
                    duplicate_actions.get("*"),
                    Some(&DuplicateAction::Remove)
                );
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(payload.kind(), EnqueueKind::ImportCandidate);
    }

    #[test]
    fn test_undo_defaults_to_deleting_files() {
        let payload: JobPayload = serde_json::from_str(r#"{"kind": "import_undo"}"#).unwrap();
        assert_eq!(payload, JobPayload::ImportUndo { delete_files: true });
    }

    #[test]
    fn test_search_query_extraction() {
        let payload = JobPayload::PreviewAddCandidates {
            search_ids: vec!["30fd0c55-a75d-4881-ade9-ae5a51f1ba86".into()],
            search_artist: None,
            search_album: None,
        };
        let query = payload.search_query().unwrap();
        assert_eq!(query.ids.len(), 1);
        assert!(JobPayload::Preview.search_query().is_none());
    }
}
