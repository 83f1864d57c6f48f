//! SQLite-backed session store.
//!
//! Persists `SessionState` graphs and reconstructs them on reload. Each
//! worker writes only its own session row inside a transaction; the
//! revisioning rule (`max + 1` per folder hash) makes the highest revision
//! the current session for a hash.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::schema::{SESSION_SCHEMA_SQL, SESSION_SCHEMA_VERSION};
use crate::importer::error::SerializedException;
use crate::matcher::SearchQuery;
use crate::state::{
    CandidateState, DuplicateAction, ItemInfo, Progress, ProgressState, SessionState, TaskState,
};

/// Persisted folder record: `(hash → path, is_album)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub hash: String,
    pub full_path: PathBuf,
    pub is_album: bool,
}

/// Storage operations the rest of the core depends on.
pub trait SessionStore: Send + Sync {
    /// Upsert the folder record and write the full session graph. Replaces
    /// an existing row with the same id.
    fn save_session(&self, session: &SessionState) -> Result<()>;

    /// Next free revision for a folder hash (`max + 1`, starting at 0).
    fn next_revision(&self, folder_hash: &str) -> Result<i64>;

    /// The session with the highest revision for a hash.
    fn latest_by_hash(&self, folder_hash: &str) -> Result<Option<SessionState>>;

    /// The most recently updated session for a path, ordered by
    /// `(updated_at DESC, folder_revision DESC)`.
    fn latest_by_path(&self, path: &Path) -> Result<Option<SessionState>>;

    fn get_by_id(&self, session_id: &str) -> Result<Option<SessionState>>;

    fn revisions_for_hash(&self, folder_hash: &str) -> Result<Vec<i64>>;

    fn folder_record(&self, folder_hash: &str) -> Result<Option<FolderRecord>>;

    /// Does any stored task contain this candidate id? Used by enqueue
    /// validation.
    fn candidate_exists(&self, candidate_id: &str) -> Result<bool>;

    fn session_count(&self) -> Result<usize>;
}

/// Blob stored per candidate row.
#[derive(Serialize, Deserialize)]
struct MatchBlob {
    payload: crate::matcher::MatchPayload,
    distance: f64,
    penalties: Vec<String>,
}

pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(&db_path)?;
        let created = Self::init(&conn)?;
        if created {
            info!("created session database at {:?}", db_path.as_ref());
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and test servers.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<bool> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .context("failed to read session db version")?;

        if version == 0 {
            conn.execute_batch(SESSION_SCHEMA_SQL)?;
            conn.execute(&format!("PRAGMA user_version = {SESSION_SCHEMA_VERSION}"), [])?;
            return Ok(true);
        }
        if version > SESSION_SCHEMA_VERSION {
            bail!(
                "session database version {} is too new (max supported: {})",
                version,
                SESSION_SCHEMA_VERSION
            );
        }
        Ok(false)
    }

    fn load_session_row(conn: &Connection, session_id: &str) -> Result<Option<SessionState>> {
        struct SessionRow {
            id: String,
            folder_hash: String,
            folder_revision: i64,
            exc_blob: Option<String>,
            created_at: String,
            updated_at: String,
        }

        let Some(row) = conn
            .query_row(
                "SELECT id, folder_hash, folder_revision, exc_blob, created_at, updated_at
                 FROM session WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        folder_hash: row.get(1)?,
                        folder_revision: row.get(2)?,
                        exc_blob: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?
        else {
            return Ok(None);
        };

        let folder_path: String = conn
            .query_row(
                "SELECT full_path FROM folder WHERE hash = ?1",
                params![row.folder_hash],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or_default();

        let tasks = Self::load_tasks(conn, &row.id)?;

        let parse_ts = |value: &str| -> Result<DateTime<Utc>> {
            Ok(DateTime::parse_from_rfc3339(value)
                .with_context(|| format!("bad timestamp {value:?}"))?
                .with_timezone(&Utc))
        };

        let exc: Option<SerializedException> = row
            .exc_blob
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("bad exc blob")?;

        Ok(Some(SessionState {
            id: row.id,
            folder_hash: row.folder_hash,
            folder_path: PathBuf::from(folder_path),
            folder_revision: row.folder_revision,
            tasks,
            exc,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        }))
    }

    fn load_tasks(conn: &Connection, session_id: &str) -> Result<Vec<TaskState>> {
        struct TaskRow {
            id: String,
            progress: i64,
            toppath: Option<String>,
            items_blob: String,
            paths_blob: String,
            old_paths_blob: Option<String>,
            choice_flag: Option<String>,
            duplicate_action: Option<String>,
            search_blob: Option<String>,
            separators_blob: Option<String>,
            completed: bool,
            library_album_id: Option<String>,
            library_items_blob: Option<String>,
        }

        let mut stmt = conn.prepare(
            "SELECT id, progress, toppath, items_blob, paths_blob, old_paths_blob,
                    choice_flag, duplicate_action, search_blob, separators_blob,
                    completed, library_album_id, library_items_blob
             FROM task WHERE session_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(TaskRow {
                    id: row.get(0)?,
                    progress: row.get(1)?,
                    toppath: row.get(2)?,
                    items_blob: row.get(3)?,
                    paths_blob: row.get(4)?,
                    old_paths_blob: row.get(5)?,
                    choice_flag: row.get(6)?,
                    duplicate_action: row.get(7)?,
                    search_blob: row.get(8)?,
                    separators_blob: row.get(9)?,
                    completed: row.get(10)?,
                    library_album_id: row.get(11)?,
                    library_items_blob: row.get(12)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let items: Vec<ItemInfo> =
                serde_json::from_str(&row.items_blob).context("bad items blob")?;
            let paths: Vec<PathBuf> =
                serde_json::from_str(&row.paths_blob).context("bad paths blob")?;
            let old_paths: Option<Vec<PathBuf>> = row
                .old_paths_blob
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("bad old paths blob")?;
            let search: Option<SearchQuery> = row
                .search_blob
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("bad search blob")?;
            let artist_separators: Vec<String> = row
                .separators_blob
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("bad separators blob")?
                .unwrap_or_default();

            let library_item_ids: Vec<String> = row
                .library_items_blob
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("bad library items blob")?
                .unwrap_or_default();

            let progress = Progress::from_ordinal(row.progress)
                .with_context(|| format!("unknown progress ordinal {}", row.progress))?;

            let candidates = Self::load_candidates(conn, &row.id)?;

            tasks.push(TaskState {
                id: row.id,
                toppath: row.toppath.map(PathBuf::from),
                paths,
                items,
                candidates,
                chosen_candidate_id: row.choice_flag,
                duplicate_action: row
                    .duplicate_action
                    .as_deref()
                    .and_then(DuplicateAction::from_str),
                search,
                progress: ProgressState::new(progress),
                completed: row.completed,
                old_paths,
                library_album_id: row.library_album_id,
                library_item_ids,
                artist_separators,
            });
        }
        Ok(tasks)
    }

    fn load_candidates(conn: &Connection, task_id: &str) -> Result<Vec<CandidateState>> {
        let mut stmt = conn.prepare(
            "SELECT id, match_blob, duplicate_ids FROM candidate
             WHERE task_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut candidates = Vec::with_capacity(rows.len());
        for (id, match_blob, duplicate_ids) in rows {
            let blob: MatchBlob = serde_json::from_str(&match_blob).context("bad match blob")?;
            let duplicate_ids: Vec<String> =
                serde_json::from_str(&duplicate_ids).context("bad duplicate ids blob")?;
            candidates.push(CandidateState {
                id,
                duplicate_ids,
                payload: blob.payload,
                distance: blob.distance,
                penalties: blob.penalties,
            });
        }
        Ok(candidates)
    }
}

impl SessionStore for SqliteSessionStore {
    fn save_session(&self, session: &SessionState) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Newest path wins for a hash seen under a different location.
        tx.execute(
            "INSERT INTO folder (hash, full_path, is_album) VALUES (?1, ?2, 1)
             ON CONFLICT(hash) DO UPDATE SET full_path = excluded.full_path",
            params![session.folder_hash, session.folder_path.to_string_lossy()],
        )?;

        // Replace the whole graph; children cascade.
        tx.execute("DELETE FROM session WHERE id = ?1", params![session.id])?;
        tx.execute(
            "INSERT INTO session (id, folder_hash, folder_revision, progress, exc_blob, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.folder_hash,
                session.folder_revision,
                session.progress().progress.ordinal(),
                session
                    .exc
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;

        for (position, task) in session.tasks.iter().enumerate() {
            let metadata = task.current_metadata();
            tx.execute(
                "INSERT INTO task (id, session_id, position, progress, toppath, items_blob,
                                   paths_blob, old_paths_blob, choice_flag, duplicate_action,
                                   search_blob, separators_blob, cur_artist, cur_album,
                                   completed, library_album_id, library_items_blob)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    task.id,
                    session.id,
                    position as i64,
                    task.progress.progress.ordinal(),
                    task.toppath.as_ref().map(|p| p.to_string_lossy().to_string()),
                    serde_json::to_string(&task.items)?,
                    serde_json::to_string(&task.paths)?,
                    task.old_paths.as_ref().map(serde_json::to_string).transpose()?,
                    task.chosen_candidate_id,
                    task.duplicate_action.map(|a| a.as_str()),
                    task.search.as_ref().map(serde_json::to_string).transpose()?,
                    serde_json::to_string(&task.artist_separators)?,
                    metadata.artist,
                    metadata.album,
                    task.completed,
                    task.library_album_id,
                    serde_json::to_string(&task.library_item_ids)?,
                ],
            )?;

            for (candidate_position, candidate) in task.candidates.iter().enumerate() {
                let blob = MatchBlob {
                    payload: candidate.payload.clone(),
                    distance: candidate.distance,
                    penalties: candidate.penalties.clone(),
                };
                tx.execute(
                    "INSERT INTO candidate (id, task_id, position, match_blob, duplicate_ids)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        candidate.id,
                        task.id,
                        candidate_position as i64,
                        serde_json::to_string(&blob)?,
                        serde_json::to_string(&candidate.duplicate_ids)?,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn next_revision(&self, folder_hash: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(folder_revision) FROM session WHERE folder_hash = ?1",
            params![folder_hash],
            |row| row.get(0),
        )?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }

    fn latest_by_hash(&self, folder_hash: &str) -> Result<Option<SessionState>> {
        let id: Option<String> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT id FROM session WHERE folder_hash = ?1
                 ORDER BY folder_revision DESC LIMIT 1",
                params![folder_hash],
                |row| row.get(0),
            )
            .optional()?
        };
        match id {
            Some(id) => self.get_by_id(&id),
            None => Ok(None),
        }
    }

    fn latest_by_path(&self, path: &Path) -> Result<Option<SessionState>> {
        let id: Option<String> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT s.id FROM session s JOIN folder f ON s.folder_hash = f.hash
                 WHERE f.full_path = ?1
                 ORDER BY s.updated_at DESC, s.folder_revision DESC LIMIT 1",
                params![path.to_string_lossy()],
                |row| row.get(0),
            )
            .optional()?
        };
        match id {
            Some(id) => self.get_by_id(&id),
            None => Ok(None),
        }
    }

    fn get_by_id(&self, session_id: &str) -> Result<Option<SessionState>> {
        let conn = self.conn.lock().unwrap();
        Self::load_session_row(&conn, session_id)
    }

    fn revisions_for_hash(&self, folder_hash: &str) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT folder_revision FROM session WHERE folder_hash = ?1 ORDER BY folder_revision",
        )?;
        let revisions = stmt
            .query_map(params![folder_hash], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(revisions)
    }

    fn folder_record(&self, folder_hash: &str) -> Result<Option<FolderRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT hash, full_path, is_album FROM folder WHERE hash = ?1",
                params![folder_hash],
                |row| {
                    Ok(FolderRecord {
                        hash: row.get(0)?,
                        full_path: PathBuf::from(row.get::<_, String>(1)?),
                        is_album: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn candidate_exists(&self, candidate_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM candidate WHERE id = ?1",
                params![candidate_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn session_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM session", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Folder;
    use crate::state::test_support::{album_match, item, task_with_items};

    fn folder(hash: &str, path: &str) -> Folder {
        Folder {
            path: PathBuf::from(path),
            hash: hash.to_string(),
            is_album: true,
        }
    }

    fn session(hash: &str, path: &str) -> SessionState {
        let mut session = SessionState::new(&folder(hash, path));
        let mut task = task_with_items(vec![item(
            "/music/in/a/01.mp3",
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
    fn test_save_and_reload_round_trip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut original = session("h1", "/music/in/a");
        original.folder_revision = store.next_revision("h1").unwrap();
        store.save_session(&original).unwrap();

        let loaded = store.latest_by_hash("h1").unwrap().unwrap();
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.folder_path, PathBuf::from("/music/in/a"));
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].candidates.len(), 2);
        assert_eq!(
            loaded.tasks[0].candidates[0].payload,
            original.tasks[0].candidates[0].payload
        );
        assert_eq!(loaded.progress().progress, Progress::PreviewCompleted);
        assert!(loaded.tasks[0].asis_candidate().is_asis());
    }

    #[test]
    fn test_revisioning_max_plus_one() {
        let store = SqliteSessionStore::in_memory().unwrap();
        assert_eq!(store.next_revision("h1").unwrap(), 0);

        let mut first = session("h1", "/music/in/a");
        first.folder_revision = 0;
        store.save_session(&first).unwrap();
        assert_eq!(store.next_revision("h1").unwrap(), 1);

        let mut second = session("h1", "/music/in/a");
        second.folder_revision = 1;
        store.save_session(&second).unwrap();

        // Both revisions intact, highest one is current.
        assert_eq!(store.revisions_for_hash("h1").unwrap(), vec![0, 1]);
        let latest = store.latest_by_hash("h1").unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.folder_revision, 1);
    }

    #[test]
    fn test_newest_path_wins_on_folder_conflict() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut first = session("h1", "/music/in/a");
        first.folder_revision = 0;
        store.save_session(&first).unwrap();

        let mut moved = session("h1", "/music/in/renamed");
        moved.folder_revision = 1;
        store.save_session(&moved).unwrap();

        let record = store.folder_record("h1").unwrap().unwrap();
        assert_eq!(record.full_path, PathBuf::from("/music/in/renamed"));
    }

    #[test]
    fn test_latest_by_path_orders_by_updated_at() {
        let store = SqliteSessionStore::in_memory().unwrap();

        let mut older = session("h1", "/music/in/a");
        older.folder_revision = 0;
        older.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.save_session(&older).unwrap();

        let mut newer = session("h1", "/music/in/a");
        newer.folder_revision = 1;
        store.save_session(&newer).unwrap();

        let found = store.latest_by_path(Path::new("/music/in/a")).unwrap().unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[test]
    fn test_candidate_exists() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut state = session("h1", "/music/in/a");
        state.folder_revision = 0;
        let candidate_id = state.tasks[0].candidates[0].id.clone();
        store.save_session(&state).unwrap();

        assert!(store.candidate_exists(&candidate_id).unwrap());
        assert!(!store.candidate_exists("nope").unwrap());
    }

    #[test]
    fn test_exc_round_trip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut state = session("h1", "/music/in/a");
        state.folder_revision = 0;
        state.set_exc(SerializedException::new(
            "DuplicateException",
            "unresolved duplicate",
        ));
        store.save_session(&state).unwrap();

        let loaded = store.latest_by_hash("h1").unwrap().unwrap();
        let exc = loaded.exc.unwrap();
        assert_eq!(exc.kind, "DuplicateException");
    }

    #[test]
    fn test_resave_replaces_graph() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut state = session("h1", "/music/in/a");
        state.folder_revision = 0;
        store.save_session(&state).unwrap();

        state.tasks[0].chosen_candidate_id = Some(state.tasks[0].candidates[0].id.clone());
        store.save_session(&state).unwrap();

        assert_eq!(store.session_count().unwrap(), 1);
        let loaded = store.get_by_id(&state.id).unwrap().unwrap();
        assert_eq!(
            loaded.tasks[0].chosen_candidate_id,
            state.tasks[0].chosen_candidate_id
        );
    }
}
