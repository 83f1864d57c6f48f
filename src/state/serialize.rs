//! Wire serialization of session state (schema-stable, self-describing).
//!
//! The serialized forms mirror what connected clients consume. Keys are
//! stable across schema versions; timestamps are RFC3339 UTC; item-to-track
//! mappings are flattened to integer-index maps.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{
    CandidateState, DuplicateAction, ItemInfo, Metadata, ProgressState, SessionState, TaskState,
};
use crate::importer::error::{ImportError, SerializedException};
use crate::matcher::{MatchPayload, SearchQuery, TrackInfo};

pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedSessionState {
    pub schema_version: u32,
    pub id: String,
    pub folder_hash: String,
    pub folder_path: String,
    pub folder_revision: i64,
    pub status: ProgressState,
    pub tasks: Vec<SerializedTaskState>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exc: Option<SerializedException>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedTaskState {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toppath: Option<String>,
    pub paths: Vec<String>,
    pub items: Vec<ItemInfo>,
    pub current_metadata: Metadata,
    pub candidates: Vec<SerializedCandidateState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_action: Option<DuplicateAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_candidate_id: Option<String>,
    pub completed: bool,
    pub asis_candidate: String,
    pub progress: ProgressState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_album_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchQuery>,
    #[serde(default)]
    pub artist_separators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedCandidateState {
    pub id: String,
    pub duplicate_ids: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub penalties: Vec<String>,
    pub distance: f64,
    pub info: serde_json::Value,
    pub tracks: Vec<TrackInfo>,
    pub mapping: BTreeMap<usize, usize>,
}

impl SerializedCandidateState {
    pub fn from_live(candidate: &CandidateState) -> Self {
        let info = match &candidate.payload {
            MatchPayload::Album { info, .. } => serde_json::to_value(info).unwrap_or_default(),
            MatchPayload::Track { info } => serde_json::to_value(info).unwrap_or_default(),
        };
        Self {
            id: candidate.id.clone(),
            duplicate_ids: candidate.duplicate_ids.clone(),
            kind: candidate.kind().to_string(),
            penalties: candidate.penalties.clone(),
            distance: candidate.distance,
            info,
            tracks: candidate.payload.tracks(),
            mapping: candidate.payload.mapping(),
        }
    }

    pub fn to_live(&self) -> Result<CandidateState, ImportError> {
        let payload = match self.kind.as_str() {
            "album" => MatchPayload::Album {
                info: serde_json::from_value(self.info.clone())
                    .map_err(|e| ImportError::Integrity(format!("bad album info blob: {e}")))?,
                tracks: self.tracks.clone(),
                mapping: self.mapping.clone(),
            },
            "track" => MatchPayload::Track {
                info: serde_json::from_value(self.info.clone())
                    .map_err(|e| ImportError::Integrity(format!("bad track info blob: {e}")))?,
            },
            other => {
                return Err(ImportError::Integrity(format!(
                    "unknown candidate type {other:?}"
                )))
            }
        };
        Ok(CandidateState {
            id: self.id.clone(),
            duplicate_ids: self.duplicate_ids.clone(),
            payload,
            distance: self.distance,
            penalties: self.penalties.clone(),
        })
    }
}

impl SerializedTaskState {
    pub fn from_live(task: &TaskState) -> Self {
        // Clients expect an initial selection: fall back to the first
        // candidate when none has been chosen yet.
        let current_candidate_id = task
            .chosen_candidate_id
            .clone()
            .or_else(|| task.candidates.first().map(|c| c.id.clone()));

        Self {
            id: task.id.clone(),
            toppath: task.toppath.as_ref().map(|p| p.display().to_string()),
            paths: task.paths.iter().map(|p| p.display().to_string()).collect(),
            items: task.items.clone(),
            current_metadata: task.current_metadata(),
            candidates: task
                .candidates
                .iter()
                .map(SerializedCandidateState::from_live)
                .collect(),
            duplicate_action: task.duplicate_action,
            current_candidate_id,
            completed: task.completed,
            asis_candidate: task.asis_candidate().id.clone(),
            progress: task.progress.clone(),
            old_paths: task
                .old_paths
                .as_ref()
                .map(|paths| paths.iter().map(|p| p.display().to_string()).collect()),
            library_album_id: task.library_album_id.clone(),
            search: task.search.clone(),
            artist_separators: task.artist_separators.clone(),
        }
    }

    pub fn to_live(&self) -> Result<TaskState, ImportError> {
        let candidates = self
            .candidates
            .iter()
            .map(|c| c.to_live())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskState {
            id: self.id.clone(),
            toppath: self.toppath.as_ref().map(PathBuf::from),
            paths: self.paths.iter().map(PathBuf::from).collect(),
            items: self.items.clone(),
            candidates,
            chosen_candidate_id: self
                .current_candidate_id
                .clone()
                .filter(|id| *id != self.fallback_candidate_id()),
            duplicate_action: self.duplicate_action,
            search: self.search.clone(),
            progress: self.progress.clone(),
            completed: self.completed,
            old_paths: self
                .old_paths
                .as_ref()
                .map(|paths| paths.iter().map(PathBuf::from).collect()),
            library_album_id: self.library_album_id.clone(),
            library_item_ids: Vec::new(),
            artist_separators: self.artist_separators.clone(),
        })
    }

    /// The id reported when no explicit choice exists (first candidate).
    fn fallback_candidate_id(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.id.clone())
            .unwrap_or_default()
    }
}

impl SerializedSessionState {
    pub fn from_live(session: &SessionState) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            id: session.id.clone(),
            folder_hash: session.folder_hash.clone(),
            folder_path: session.folder_path.display().to_string(),
            folder_revision: session.folder_revision,
            status: session.progress(),
            tasks: session.tasks.iter().map(SerializedTaskState::from_live).collect(),
            completed: session.completed(),
            exc: session.exc.clone(),
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
        }
    }

    pub fn to_live(&self) -> Result<SessionState, ImportError> {
        let tasks = self
            .tasks
            .iter()
            .map(|t| t.to_live())
            .collect::<Result<Vec<_>, _>>()?;

        let parse_ts = |value: &str| {
            chrono::DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| ImportError::Integrity(format!("bad timestamp {value:?}: {e}")))
        };

        Ok(SessionState {
            id: self.id.clone(),
            folder_hash: self.folder_hash.clone(),
            folder_path: PathBuf::from(&self.folder_path),
            folder_revision: self.folder_revision,
            tasks,
            exc: self.exc.clone(),
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Folder;
    use crate::state::test_support::{album_match, item, task_with_items};
    use crate::state::Progress;

    fn session_with_task() -> SessionState {
        let folder = Folder {
            path: PathBuf::from("/music/in/Nena-99RedBalloons"),
            hash: "abc".into(),
            is_album: true,
        };
        let mut session = SessionState::new(&folder);
        let mut task = task_with_items(vec![item(
            "/music/in/Nena-99RedBalloons/01.mp3",
            "Nena",
            "99 Luftballons",
            "99 Luftballons",
        )]);
        task.add_candidates(vec![album_match("mb-1", "Nena", "99 Luftballons", 0.1)]);
        task.set_progress(Progress::PreviewCompleted);
        session.upsert_task(task);
        session
    }

    #[test]
    fn test_round_trip_is_structurally_equal() {
        let session = session_with_task();
        let serialized = SerializedSessionState::from_live(&session);

        let json = serde_json::to_string(&serialized).unwrap();
        let parsed: SerializedSessionState = serde_json::from_str(&json).unwrap();
        let live = parsed.to_live().unwrap();

        assert_eq!(live.id, session.id);
        assert_eq!(live.folder_hash, session.folder_hash);
        assert_eq!(live.tasks.len(), 1);
        assert_eq!(live.tasks[0].id, session.tasks[0].id);
        assert_eq!(live.tasks[0].candidates.len(), 2);
        assert_eq!(
            live.tasks[0].candidates[0].payload,
            session.tasks[0].candidates[0].payload
        );
        assert_eq!(live.progress(), session.progress());

        // from_live ∘ to_live is the identity on the serialized form.
        let again = SerializedSessionState::from_live(&live);
        assert_eq!(again, parsed);
    }

    #[test]
    fn test_unchosen_task_reports_first_candidate() {
        let session = session_with_task();
        let serialized = SerializedSessionState::from_live(&session);
        let task = &serialized.tasks[0];
        assert_eq!(
            task.current_candidate_id.as_deref(),
            Some(task.candidates[0].id.as_str())
        );
        // ...but the live state keeps no choice bound.
        let live = serialized.to_live().unwrap();
        assert!(live.tasks[0].chosen_candidate_id.is_none());
    }

    #[test]
    fn test_explicit_choice_survives_round_trip() {
        let mut session = session_with_task();
        let chosen = session.tasks[0].candidates[1].id.clone();
        session.tasks[0].chosen_candidate_id = Some(chosen.clone());

        let live = SerializedSessionState::from_live(&session).to_live().unwrap();
        assert_eq!(live.tasks[0].chosen_candidate_id, Some(chosen));
    }

    #[test]
    fn test_serialized_session_shape() {
        let session = session_with_task();
        let value = serde_json::to_value(SerializedSessionState::from_live(&session)).unwrap();

        assert_eq!(value["folder_hash"], "abc");
        assert_eq!(value["status"]["progress"], "preview_completed");
        assert!(value["tasks"][0]["asis_candidate"]
            .as_str()
            .unwrap()
            .starts_with("asis-"));
        let mapping = &value["tasks"][0]["candidates"][0]["mapping"];
        assert_eq!(mapping["0"], 0);
        assert!(value["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_unknown_candidate_type_is_integrity_error() {
        let session = session_with_task();
        let mut serialized = SerializedSessionState::from_live(&session);
        serialized.tasks[0].candidates[0].kind = "playlist".to_string();
        assert!(serialized.to_live().is_err());
    }
}
