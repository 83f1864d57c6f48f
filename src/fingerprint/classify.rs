//! Album-folder classification.
//!
//! A folder is an album folder iff it directly contains at least one audio
//! file, or it contains only multi-disc subdirectories ("CD 1", "Disc 2", …)
//! that each contain audio. A multi-disc parent collapses to a single album
//! covering all discs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::importer::error::ImportError;

const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "wav", "m4a", "aac", "wma", "aiff", "ape",
];

const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z"];

const DEFAULT_MULTIDISC_PATTERNS: &[&str] = &[r"(?i)^(cd|disc)[\s\-_#.]*[0-9]+$"];

/// Compiled classification rules. Built once from configuration and shared.
#[derive(Debug, Clone)]
pub struct FolderClassifier {
    audio_extensions: HashSet<String>,
    archive_extensions: HashSet<String>,
    multidisc_patterns: Vec<Regex>,
}

impl Default for FolderClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_AUDIO_EXTENSIONS.iter().map(|s| s.to_string()),
            DEFAULT_MULTIDISC_PATTERNS.iter().map(|s| s.to_string()),
        )
        .expect("default patterns compile")
    }
}

impl FolderClassifier {
    pub fn default_audio_extensions() -> &'static [&'static str] {
        DEFAULT_AUDIO_EXTENSIONS
    }

    pub fn default_multidisc_patterns() -> &'static [&'static str] {
        DEFAULT_MULTIDISC_PATTERNS
    }

    pub fn new(
        audio_extensions: impl IntoIterator<Item = String>,
        multidisc_patterns: impl IntoIterator<Item = String>,
    ) -> Result<Self, ImportError> {
        let multidisc_patterns = multidisc_patterns
            .into_iter()
            .map(|p| {
                Regex::new(&p).map_err(|e| {
                    ImportError::Configuration(format!("invalid multi-disc pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            audio_extensions: audio_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            multidisc_patterns,
        })
    }

    fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    pub fn is_audio_file(&self, path: &Path) -> bool {
        if is_dotfile(path) {
            return false;
        }
        Self::extension_of(path)
            .map(|e| self.audio_extensions.contains(&e))
            .unwrap_or(false)
    }

    /// Single-archive files (zip/rar/7z) are treated as album folders.
    pub fn is_archive_file(&self, path: &Path) -> bool {
        Self::extension_of(path)
            .map(|e| self.archive_extensions.contains(&e))
            .unwrap_or(false)
    }

    /// Does a directory name look like a disc subfolder ("CD1", "Disc 02")?
    pub fn is_multidisc_name(&self, name: &str) -> bool {
        self.multidisc_patterns.iter().any(|p| p.is_match(name))
    }

    fn has_direct_audio(&self, dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|e| e.path().is_file() && self.is_audio_file(&e.path()))
            })
            .unwrap_or(false)
    }

    /// Classify a path as an album folder.
    pub fn is_album_folder(&self, path: &Path) -> bool {
        if path.is_file() {
            return self.is_archive_file(path);
        }
        if !path.is_dir() {
            return false;
        }

        if self.has_direct_audio(path) {
            return true;
        }

        // Multi-disc parent: only disc-named subdirectories, each with audio.
        let mut subdirs = Vec::new();
        let Ok(entries) = std::fs::read_dir(path) else {
            return false;
        };
        for entry in entries.flatten() {
            let child = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if child.is_dir() {
                if !self.is_multidisc_name(&name) {
                    return false;
                }
                subdirs.push(child);
            }
        }
        !subdirs.is_empty() && subdirs.iter().all(|d| self.has_direct_audio(d))
    }

    /// Resolve an event path upward to its containing album folder, staying
    /// within `root`. Disc subfolders resolve to their multi-disc parent.
    pub fn containing_album_folder(&self, path: &Path, root: &Path) -> Option<PathBuf> {
        let mut current = if path.is_dir() {
            Some(path.to_path_buf())
        } else {
            path.parent().map(|p| p.to_path_buf())
        };

        while let Some(dir) = current {
            if !dir.starts_with(root) {
                return None;
            }
            if self.is_album_folder(&dir) {
                // A disc folder collapses to its parent album.
                if let (Some(parent), Some(name)) =
                    (dir.parent(), dir.file_name().and_then(|n| n.to_str()))
                {
                    if self.is_multidisc_name(name)
                        && parent.starts_with(root)
                        && self.is_album_folder(parent)
                    {
                        return Some(parent.to_path_buf());
                    }
                }
                return Some(dir);
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }
        None
    }

    /// All album folders under a root, multi-disc layouts collapsed to their
    /// parent folder.
    pub fn album_folders_under(&self, root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_dotfile(e.path()))
            .flatten()
        {
            let path = entry.path();
            let is_candidate = (entry.file_type().is_dir() && self.is_album_folder(path))
                || (entry.file_type().is_file() && self.is_archive_file(path));
            if !is_candidate {
                continue;
            }
            // Skip disc subfolders, the parent already covers them.
            let within_multidisc = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| self.is_multidisc_name(n))
                .unwrap_or(false);
            if within_multidisc {
                continue;
            }
            found.push(path.to_path_buf());
        }
        // Drop nested album folders that live inside another found album
        // (e.g. stray audio next to disc folders).
        let mut result: Vec<PathBuf> = Vec::new();
        for folder in &found {
            let nested = found
                .iter()
                .any(|other| other != folder && folder.starts_with(other));
            if !nested {
                result.push(folder.clone());
            }
        }
        result.sort();
        result
    }
}

pub(crate) fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_audio_file_detection() {
        let c = FolderClassifier::default();
        assert!(c.is_audio_file(Path::new("/x/track.mp3")));
        assert!(c.is_audio_file(Path::new("/x/track.FLAC")));
        assert!(!c.is_audio_file(Path::new("/x/.hidden.mp3")));
        assert!(!c.is_audio_file(Path::new("/x/cover.jpg")));
    }

    #[test]
    fn test_multidisc_names() {
        let c = FolderClassifier::default();
        assert!(c.is_multidisc_name("CD1"));
        assert!(c.is_multidisc_name("cd 2"));
        assert!(c.is_multidisc_name("Disc 03"));
        assert!(!c.is_multidisc_name("Live at CDG"));
        assert!(!c.is_multidisc_name("Bonus"));
    }

    #[test]
    fn test_flat_album_folder() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Nena-99RedBalloons");
        touch(&album.join("01 - 99 Luftballons.mp3"));

        let c = FolderClassifier::default();
        assert!(c.is_album_folder(&album));
        assert!(!c.is_album_folder(dir.path()));
    }

    #[test]
    fn test_multidisc_album_folder_collapses() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("Big Box");
        touch(&album.join("CD1/track.mp3"));
        touch(&album.join("CD2/track.mp3"));

        let c = FolderClassifier::default();
        assert!(c.is_album_folder(&album));
        assert!(c.is_album_folder(&album.join("CD1")));

        let resolved = c
            .containing_album_folder(&album.join("CD2/track.mp3"), dir.path())
            .unwrap();
        assert_eq!(resolved, album);
    }

    #[test]
    fn test_non_disc_subdir_disqualifies_parent() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("collection");
        touch(&parent.join("Some Album/track.mp3"));

        let c = FolderClassifier::default();
        assert!(!c.is_album_folder(&parent));
        assert!(c.is_album_folder(&parent.join("Some Album")));
    }

    #[test]
    fn test_containing_album_folder_stays_within_root() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("inbox/Album");
        touch(&album.join("a.mp3"));

        let c = FolderClassifier::default();
        let root = dir.path().join("inbox");
        assert_eq!(
            c.containing_album_folder(&album.join("a.mp3"), &root),
            Some(album.clone())
        );
        let outside_root = dir.path().join("elsewhere");
        assert_eq!(c.containing_album_folder(&album.join("a.mp3"), &outside_root), None);
    }

    #[test]
    fn test_album_folders_under() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("A/track.mp3"));
        touch(&dir.path().join("B/CD1/track.mp3"));
        touch(&dir.path().join("B/CD2/track.mp3"));
        touch(&dir.path().join("notes/readme.txt"));

        let c = FolderClassifier::default();
        let folders = c.album_folders_under(dir.path());
        assert_eq!(
            folders,
            vec![dir.path().join("A"), dir.path().join("B")]
        );
    }
}
