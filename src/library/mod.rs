//! Typed facade over the external music library.
//!
//! The library itself (matching heuristics, tag writing) is opaque to the
//! core; this module exposes exactly the operations the import pipeline
//! needs: duplicate queries, committing a chosen candidate, moving files
//! into (and back out of) the library tree, and removal for undo. Plugin
//! hooks are delivered through the `PluginHub` capability.

mod plugins;
mod sqlite_library;

pub use plugins::{PluginEvent, PluginEventKind, PluginHandler, PluginHub, PluginReply};
pub use sqlite_library::SqliteMusicLibrary;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::matcher::AlbumInfo;
use crate::state::DuplicateAction;

/// An album row in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryAlbum {
    pub id: String,
    pub albumartist: String,
    pub album: String,
    pub added_at: i64,
}

/// An item (one audio file) in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub album_id: String,
    pub path: PathBuf,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<i32>,
}

/// What the import pipeline asks the library to commit: the task's items and
/// the chosen candidate's album metadata.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub albumartist: String,
    pub album: String,
    pub items: Vec<CommitItem>,
    pub duplicate_action: DuplicateAction,
    pub duplicate_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CommitItem {
    pub source_path: PathBuf,
    pub title: String,
    pub track: Option<i32>,
}

/// Capability interface to the music library database and its file tree.
///
/// Single-writer discipline is enforced upstream by running all imports on
/// one serialized queue; reads may come from anywhere.
pub trait MusicLibrary: Send + Sync {
    /// Find albums that duplicate the given candidate metadata, compared on
    /// the configured key list (e.g. `["albumartist", "album"]`).
    fn query_duplicates(&self, info: &AlbumInfo, keys: &[String]) -> Result<Vec<LibraryAlbum>>;

    fn albums(&self) -> Result<Vec<LibraryAlbum>>;

    fn get_album(&self, album_id: &str) -> Result<Option<LibraryAlbum>>;

    fn items_for_album(&self, album_id: &str) -> Result<Vec<LibraryItem>>;

    fn album_count(&self) -> Result<usize>;

    /// Commit an import: resolve the duplicate action, then insert the album
    /// and its items (paths still pointing at the source files).
    ///
    /// `Remove` deletes the conflicting albums' rows first; `Merge` attaches
    /// the new items to the first conflicting album; `Keep` imports in
    /// addition; `Skip` and `Ask` are resolved by the caller and never reach
    /// the library.
    fn commit_import(&self, request: &CommitRequest) -> Result<(LibraryAlbum, Vec<LibraryItem>)>;

    /// Move an item's file into the library tree, updating its row. Returns
    /// `(old_path, new_path)`.
    fn move_item_into_library(&self, item_id: &str) -> Result<(PathBuf, PathBuf)>;

    /// Remove an album and its items. With `delete_files` the audio files
    /// are deleted from disk as well.
    fn remove_album(&self, album_id: &str, delete_files: bool) -> Result<()>;

    /// Move an audio file out of the library tree back to `dest` (undo of
    /// the import move). Pure file operation; rows are handled by
    /// `remove_album`.
    fn move_back(&self, from: &Path, dest: &Path) -> Result<()>;
}
