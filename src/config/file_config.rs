//! TOML file configuration.
//!
//! All fields are optional; present values override CLI arguments during
//! `AppConfig::resolve`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub db_dir: Option<String>,
    pub library_dir: Option<String>,
    pub port: Option<u16>,

    #[serde(default)]
    pub inbox: InboxFileConfig,
    pub import: Option<ImportFileConfig>,
    #[serde(rename = "match")]
    pub matching: Option<MatchFileConfig>,
    pub jobs: Option<JobsFileConfig>,
    pub watcher: Option<WatcherFileConfig>,
    pub fingerprint: Option<FingerprintFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboxFileConfig {
    #[serde(default)]
    pub folders: Vec<InboxFolderFileConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboxFolderFileConfig {
    pub path: String,
    /// One of "off", "preview", "auto", "bootleg".
    pub autotag: Option<String>,
    pub auto_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportFileConfig {
    /// One of "ask", "skip", "keep", "remove", "merge".
    pub duplicate_action: Option<String>,
    pub duplicate_keys: Option<Vec<String>>,
    pub group_albums: Option<bool>,
    pub artist_separators: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchFileConfig {
    pub strong_rec_thresh: Option<f64>,
    pub medium_rec_thresh: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsFileConfig {
    pub num_preview_workers: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherFileConfig {
    pub debounce_secs: Option<f64>,
    pub worker_ready_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FingerprintFileConfig {
    pub audio_extensions: Option<Vec<String>>,
    pub multidisc_patterns: Option<Vec<String>>,
    pub hash_cache_size: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path:?}"))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file {path:?}"))
    }
}
