//! Content hashing for album folders and archives.
//!
//! The hash covers the sorted list of `(relative_path, size)` tuples of all
//! audio files under the root. Non-audio files and dotfiles are excluded, so
//! cover art or playlist edits do not change a folder's identity. Archives
//! are hashed from their central-directory listing without extraction.

use std::path::Path;

use sha2::{Digest, Sha256};

use super::classify::{is_dotfile, FolderClassifier};
use crate::importer::error::ImportError;

/// Compute the content hash of a folder or archive file.
pub fn folder_hash(path: &Path, classifier: &FolderClassifier) -> Result<String, ImportError> {
    if !path.exists() {
        return Err(ImportError::NotFound(format!(
            "folder does not exist: {}",
            path.display()
        )));
    }

    let entries = if path.is_file() {
        if path.extension().and_then(|e| e.to_str()) == Some("zip") {
            zip_entries(path)?
        } else {
            // Other archive formats are fingerprinted by their own
            // name and size; listing them needs extraction support.
            let size = std::fs::metadata(path)
                .map_err(|e| ImportError::Infra(e.into()))?
                .len();
            vec![(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                size,
            )]
        }
    } else {
        directory_entries(path, classifier)?
    };

    Ok(digest_entries(&entries))
}

fn digest_entries(entries: &[(String, u64)]) -> String {
    let mut sorted: Vec<&(String, u64)> = entries.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for (rel_path, size) in sorted {
        hasher.update(rel_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_be_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn directory_entries(
    root: &Path,
    classifier: &FolderClassifier,
) -> Result<Vec<(String, u64)>, ImportError> {
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_dotfile(e.path()))
    {
        let entry = entry.map_err(|e| ImportError::Infra(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !classifier.is_audio_file(path) {
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        let size = entry
            .metadata()
            .map_err(|e| ImportError::Infra(e.into()))?
            .len();
        entries.push((rel, size));
    }
    Ok(entries)
}

fn zip_entries(path: &Path) -> Result<Vec<(String, u64)>, ImportError> {
    let file = std::fs::File::open(path).map_err(|e| ImportError::Infra(e.into()))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ImportError::Infra(anyhow::Error::from(e)))?;

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| ImportError::Infra(anyhow::Error::from(e)))?;
        if entry.is_dir() {
            continue;
        }
        entries.push((entry.name().to_string(), entry.size()));
    }
    Ok(entries)
}
