//! Folder fingerprinting.
//!
//! Produces a content hash for an album folder (or archive) that is stable
//! across scans of unchanged contents and changes whenever a media file is
//! added, removed or renamed. Also classifies folders as album folders,
//! collapsing multi-disc layouts into one album.

mod cache;
mod classify;
mod hasher;

pub use cache::HashCache;
pub use classify::FolderClassifier;
pub use hasher::folder_hash;

use std::path::{Path, PathBuf};

use crate::importer::error::ImportError;

/// A scanned folder: absolute path, content hash and album classification.
///
/// Immutable; a content change on disk produces a new instance with a new
/// hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub path: PathBuf,
    pub hash: String,
    pub is_album: bool,
}

impl Folder {
    /// Scan `path`, computing the hash through the cache.
    pub fn scan(
        path: &Path,
        classifier: &FolderClassifier,
        cache: &HashCache,
    ) -> Result<Self, ImportError> {
        let hash = cache.get_or_compute(path, classifier)?;
        Ok(Self {
            path: path.to_path_buf(),
            hash,
            is_album: classifier.is_album_folder(path),
        })
    }
}
