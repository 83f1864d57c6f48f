//! Database schema for the session store.
//!
//! One row per folder (hash is the primary key, so identical content under
//! different paths resolves to one record), one session row per
//! `(folder_hash, folder_revision)`, with task and candidate child tables.

/// SQL schema for the session database (version 1).
pub const SESSION_SCHEMA_SQL: &str = r#"
-- Folder records, keyed by content hash. Newest path wins on conflict.
CREATE TABLE IF NOT EXISTS folder (
    hash TEXT PRIMARY KEY,
    full_path TEXT NOT NULL,
    is_album INTEGER NOT NULL DEFAULT 0
);

-- One import session per (folder_hash, folder_revision).
CREATE TABLE IF NOT EXISTS session (
    id TEXT PRIMARY KEY,
    folder_hash TEXT NOT NULL,
    folder_revision INTEGER NOT NULL,
    progress INTEGER NOT NULL,
    exc_blob TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (folder_hash, folder_revision),
    FOREIGN KEY (folder_hash) REFERENCES folder(hash)
);

CREATE TABLE IF NOT EXISTS task (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    progress INTEGER NOT NULL,
    toppath TEXT,
    items_blob TEXT NOT NULL,
    paths_blob TEXT NOT NULL,
    old_paths_blob TEXT,
    choice_flag TEXT,
    duplicate_action TEXT,
    search_blob TEXT,
    separators_blob TEXT,
    cur_artist TEXT,
    cur_album TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    library_album_id TEXT,
    library_items_blob TEXT,
    FOREIGN KEY (session_id) REFERENCES session(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS candidate (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    match_blob TEXT NOT NULL,
    duplicate_ids TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES task(id) ON DELETE CASCADE
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_session_folder_hash ON session(folder_hash);
CREATE INDEX IF NOT EXISTS idx_session_updated ON session(updated_at);
CREATE INDEX IF NOT EXISTS idx_task_session ON task(session_id);
CREATE INDEX IF NOT EXISTS idx_candidate_task ON candidate(task_id);
"#;

/// Current schema version.
pub const SESSION_SCHEMA_VERSION: i64 = 1;
