//! SQLite-backed implementation of the library facade.
//!
//! Owns a `library.db` plus a directory tree for imported audio files.
//! The schema is created on first open and checked against
//! `PRAGMA user_version` afterwards.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::{CommitRequest, LibraryAlbum, LibraryItem, MusicLibrary};
use crate::matcher::AlbumInfo;
use crate::state::DuplicateAction;

const LIBRARY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY,
    albumartist TEXT NOT NULL,
    album TEXT NOT NULL,
    added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    album_id TEXT NOT NULL,
    path TEXT NOT NULL,
    title TEXT NOT NULL,
    track INTEGER,
    FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_items_album ON items(album_id);
CREATE INDEX IF NOT EXISTS idx_albums_artist_album ON albums(albumartist, album);
"#;

const LIBRARY_SCHEMA_VERSION: i64 = 1;

pub struct SqliteMusicLibrary {
    conn: Arc<Mutex<Connection>>,
    directory: PathBuf,
}

impl SqliteMusicLibrary {
    /// Open (or create) the library database next to its media directory.
    pub fn new<P: AsRef<Path>>(db_path: P, directory: P) -> Result<Self> {
        let conn = Connection::open(&db_path)?;
        Self::init(conn, directory.as_ref().to_path_buf())
    }

    /// In-memory library for tests; files still live under `directory`.
    pub fn in_memory(directory: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, directory.into())
    }

    fn init(conn: Connection, directory: PathBuf) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .context("failed to read library db version")?;

        if version == 0 {
            conn.execute_batch(LIBRARY_SCHEMA_SQL)?;
            conn.execute(&format!("PRAGMA user_version = {LIBRARY_SCHEMA_VERSION}"), [])?;
            info!("created library schema (version {})", LIBRARY_SCHEMA_VERSION);
        } else if version > LIBRARY_SCHEMA_VERSION {
            bail!(
                "library database version {} is too new (max supported: {})",
                version,
                LIBRARY_SCHEMA_VERSION
            );
        }

        std::fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create library directory {directory:?}"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            directory,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn row_to_album(row: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryAlbum> {
        Ok(LibraryAlbum {
            id: row.get(0)?,
            albumartist: row.get(1)?,
            album: row.get(2)?,
            added_at: row.get(3)?,
        })
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryItem> {
        Ok(LibraryItem {
            id: row.get(0)?,
            album_id: row.get(1)?,
            path: PathBuf::from(row.get::<_, String>(2)?),
            title: row.get(3)?,
            track: row.get(4)?,
        })
    }

    fn get_item(&self, item_id: &str) -> Result<Option<LibraryItem>> {
        let conn = self.conn.lock().unwrap();
        let item = conn
            .query_row(
                "SELECT id, album_id, path, title, track FROM items WHERE id = ?1",
                params![item_id],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn insert_items(
        &self,
        conn: &Connection,
        album_id: &str,
        request: &CommitRequest,
    ) -> Result<Vec<LibraryItem>> {
        let mut inserted = Vec::new();
        for commit_item in &request.items {
            let item = LibraryItem {
                id: Uuid::new_v4().to_string(),
                album_id: album_id.to_string(),
                path: commit_item.source_path.clone(),
                title: commit_item.title.clone(),
                track: commit_item.track,
            };
            conn.execute(
                "INSERT INTO items (id, album_id, path, title, track) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.id,
                    item.album_id,
                    item.path.to_string_lossy(),
                    item.title,
                    item.track
                ],
            )?;
            inserted.push(item);
        }
        Ok(inserted)
    }
}

/// Make a tag value safe as a path component.
fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').to_string();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed
    }
}

/// Move a file, falling back to copy+remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)
                .with_context(|| format!("failed to copy {from:?} to {to:?}"))?;
            std::fs::remove_file(from)
                .with_context(|| format!("failed to remove {from:?} after copy"))?;
            Ok(())
        }
    }
}

impl MusicLibrary for SqliteMusicLibrary {
    fn query_duplicates(&self, info: &AlbumInfo, keys: &[String]) -> Result<Vec<LibraryAlbum>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for key in keys {
            match key.as_str() {
                "albumartist" => {
                    let Some(artist) = info.artist.as_ref() else {
                        return Ok(Vec::new());
                    };
                    clauses.push("albumartist = ?");
                    values.push(artist.clone());
                }
                "album" => {
                    let Some(album) = info.album.as_ref() else {
                        return Ok(Vec::new());
                    };
                    clauses.push("album = ?");
                    values.push(album.clone());
                }
                other => {
                    debug!(key = other, "ignoring unsupported duplicate key");
                }
            }
        }

        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, albumartist, album, added_at FROM albums WHERE {}",
            clauses.join(" AND ")
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let albums = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), Self::row_to_album)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    fn albums(&self) -> Result<Vec<LibraryAlbum>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, albumartist, album, added_at FROM albums ORDER BY added_at")?;
        let albums = stmt
            .query_map([], Self::row_to_album)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    fn get_album(&self, album_id: &str) -> Result<Option<LibraryAlbum>> {
        let conn = self.conn.lock().unwrap();
        let album = conn
            .query_row(
                "SELECT id, albumartist, album, added_at FROM albums WHERE id = ?1",
                params![album_id],
                Self::row_to_album,
            )
            .optional()?;
        Ok(album)
    }

    fn items_for_album(&self, album_id: &str) -> Result<Vec<LibraryItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, album_id, path, title, track FROM items WHERE album_id = ?1 ORDER BY track, title",
        )?;
        let items = stmt
            .query_map(params![album_id], Self::row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn album_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM albums", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn commit_import(&self, request: &CommitRequest) -> Result<(LibraryAlbum, Vec<LibraryItem>)> {
        match request.duplicate_action {
            DuplicateAction::Remove => {
                for duplicate_id in &request.duplicate_ids {
                    self.remove_album(duplicate_id, false)?;
                }
            }
            DuplicateAction::Merge => {
                if let Some(target_id) = request.duplicate_ids.first() {
                    let target = self
                        .get_album(target_id)?
                        .with_context(|| format!("merge target {target_id} vanished"))?;
                    let conn = self.conn.lock().unwrap();
                    let items = self.insert_items(&conn, &target.id, request)?;
                    info!(album = %target.album, "merged {} items into existing album", items.len());
                    return Ok((target, items));
                }
            }
            DuplicateAction::Keep => {}
            DuplicateAction::Skip | DuplicateAction::Ask => {
                bail!(
                    "duplicate action {:?} must be resolved before the library commit",
                    request.duplicate_action
                );
            }
        }

        let album = LibraryAlbum {
            id: Uuid::new_v4().to_string(),
            albumartist: request.albumartist.clone(),
            album: request.album.clone(),
            added_at: Utc::now().timestamp(),
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO albums (id, albumartist, album, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![album.id, album.albumartist, album.album, album.added_at],
        )?;
        let items = self.insert_items(&conn, &album.id, request)?;

        info!(
            album = %album.album,
            albumartist = %album.albumartist,
            items = items.len(),
            "committed import"
        );
        Ok((album, items))
    }

    fn move_item_into_library(&self, item_id: &str) -> Result<(PathBuf, PathBuf)> {
        let item = self
            .get_item(item_id)?
            .with_context(|| format!("item {item_id} not in library"))?;
        let album = self
            .get_album(&item.album_id)?
            .with_context(|| format!("album {} not in library", item.album_id))?;

        let file_name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.audio", sanitize_component(&item.title)));
        let dest = self
            .directory
            .join(sanitize_component(&album.albumartist))
            .join(sanitize_component(&album.album))
            .join(file_name);

        move_file(&item.path, &dest)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE items SET path = ?1 WHERE id = ?2",
            params![dest.to_string_lossy(), item.id],
        )?;

        debug!(from = %item.path.display(), to = %dest.display(), "moved item into library");
        Ok((item.path, dest))
    }

    fn remove_album(&self, album_id: &str, delete_files: bool) -> Result<()> {
        let items = self.items_for_album(album_id)?;
        if delete_files {
            for item in &items {
                if item.path.exists() {
                    std::fs::remove_file(&item.path)
                        .with_context(|| format!("failed to delete {:?}", item.path))?;
                }
            }
        }

        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
        if removed > 0 {
            info!(album_id, delete_files, "removed album from library");
        }
        Ok(())
    }

    fn move_back(&self, from: &Path, dest: &Path) -> Result<()> {
        if !from.exists() {
            bail!("cannot move back {from:?}: file does not exist");
        }
        move_file(from, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::CommitItem;
    use tempfile::tempdir;

    fn commit_request(dir: &Path, action: DuplicateAction) -> CommitRequest {
        let source = dir.join("source/99 Luftballons.mp3");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"audio").unwrap();
        CommitRequest {
            albumartist: "Nena".to_string(),
            album: "99 Luftballons".to_string(),
            items: vec![CommitItem {
                source_path: source,
                title: "99 Luftballons".to_string(),
                track: Some(1),
            }],
            duplicate_action: action,
            duplicate_ids: vec![],
        }
    }

    #[test]
    fn test_commit_and_query() {
        let dir = tempdir().unwrap();
        let library = SqliteMusicLibrary::in_memory(dir.path().join("lib")).unwrap();

        let request = commit_request(dir.path(), DuplicateAction::Keep);
        let (album, items) = library.commit_import(&request).unwrap();

        assert_eq!(library.album_count().unwrap(), 1);
        assert_eq!(items.len(), 1);
        assert_eq!(album.albumartist, "Nena");

        let dups = library
            .query_duplicates(
                &AlbumInfo {
                    artist: Some("Nena".into()),
                    album: Some("99 Luftballons".into()),
                    ..Default::default()
                },
                &["albumartist".to_string(), "album".to_string()],
            )
            .unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].id, album.id);
    }

    #[test]
    fn test_commit_with_remove_replaces_duplicates() {
        let dir = tempdir().unwrap();
        let library = SqliteMusicLibrary::in_memory(dir.path().join("lib")).unwrap();

        let first = commit_request(dir.path(), DuplicateAction::Keep);
        let (old_album, _) = library.commit_import(&first).unwrap();

        let mut second = commit_request(dir.path(), DuplicateAction::Remove);
        second.duplicate_ids = vec![old_album.id.clone()];
        let (new_album, _) = library.commit_import(&second).unwrap();

        assert_eq!(library.album_count().unwrap(), 1);
        assert_ne!(new_album.id, old_album.id);
        assert!(library.get_album(&old_album.id).unwrap().is_none());
    }

    #[test]
    fn test_commit_with_merge_attaches_to_existing() {
        let dir = tempdir().unwrap();
        let library = SqliteMusicLibrary::in_memory(dir.path().join("lib")).unwrap();

        let first = commit_request(dir.path(), DuplicateAction::Keep);
        let (album, _) = library.commit_import(&first).unwrap();

        let mut second = commit_request(dir.path(), DuplicateAction::Merge);
        second.duplicate_ids = vec![album.id.clone()];
        let (merged_album, _) = library.commit_import(&second).unwrap();

        assert_eq!(merged_album.id, album.id);
        assert_eq!(library.album_count().unwrap(), 1);
        assert_eq!(library.items_for_album(&album.id).unwrap().len(), 2);
    }

    #[test]
    fn test_skip_never_reaches_commit() {
        let dir = tempdir().unwrap();
        let library = SqliteMusicLibrary::in_memory(dir.path().join("lib")).unwrap();
        let request = commit_request(dir.path(), DuplicateAction::Skip);
        assert!(library.commit_import(&request).is_err());
    }

    #[test]
    fn test_move_into_library_and_back() {
        let dir = tempdir().unwrap();
        let library = SqliteMusicLibrary::in_memory(dir.path().join("lib")).unwrap();

        let request = commit_request(dir.path(), DuplicateAction::Keep);
        let source_path = request.items[0].source_path.clone();
        let (_, items) = library.commit_import(&request).unwrap();

        let (old_path, new_path) = library.move_item_into_library(&items[0].id).unwrap();
        assert_eq!(old_path, source_path);
        assert!(new_path.starts_with(dir.path().join("lib")));
        assert!(new_path.exists());
        assert!(!source_path.exists());

        library.move_back(&new_path, &source_path).unwrap();
        assert!(source_path.exists());
        assert!(!new_path.exists());
    }

    #[test]
    fn test_remove_album_with_files() {
        let dir = tempdir().unwrap();
        let library = SqliteMusicLibrary::in_memory(dir.path().join("lib")).unwrap();

        let request = commit_request(dir.path(), DuplicateAction::Keep);
        let (album, items) = library.commit_import(&request).unwrap();
        let (_, new_path) = library.move_item_into_library(&items[0].id).unwrap();

        library.remove_album(&album.id, true).unwrap();
        assert_eq!(library.album_count().unwrap(), 0);
        assert!(!new_path.exists());
        assert!(library.items_for_album(&album.id).unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("AC/DC"), "AC_DC");
        assert_eq!(sanitize_component("  .hidden.  "), "hidden");
        assert_eq!(sanitize_component(""), "_");
    }
}
