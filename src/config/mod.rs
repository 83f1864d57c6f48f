//! Application configuration.
//!
//! CLI arguments plus an optional TOML file; TOML values override CLI where
//! present. The resolved `AppConfig` is a snapshot copied into every worker
//! at start; a config change means restart, not shared mutation.

mod file_config;

pub use file_config::{
    FileConfig, FingerprintFileConfig, ImportFileConfig, InboxFolderFileConfig, JobsFileConfig,
    MatchFileConfig, WatcherFileConfig,
};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::state::DuplicateAction;

/// What an inbox does with newly arrived album folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxKind {
    Off,
    Preview,
    Auto,
    Bootleg,
}

impl InboxKind {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "off" => Some(InboxKind::Off),
            "preview" => Some(InboxKind::Preview),
            "auto" => Some(InboxKind::Auto),
            "bootleg" => Some(InboxKind::Bootleg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InboxKind::Off => "off",
            InboxKind::Preview => "preview",
            InboxKind::Auto => "auto",
            InboxKind::Bootleg => "bootleg",
        }
    }
}

/// One watched inbox folder.
#[derive(Debug, Clone)]
pub struct InboxSettings {
    pub path: PathBuf,
    pub autotag: InboxKind,
    pub auto_threshold: Option<f64>,
}

/// Import behavior shared by all session variants.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub duplicate_action: DuplicateAction,
    pub duplicate_keys: Vec<String>,
    pub group_albums: bool,
    pub artist_separators: Vec<String>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            duplicate_action: DuplicateAction::Ask,
            duplicate_keys: vec!["albumartist".to_string(), "album".to_string()],
            group_albums: true,
            artist_separators: vec![", ".to_string(), " feat. ".to_string(), " & ".to_string()],
        }
    }
}

/// Matching thresholds, mirrored from the underlying tagger's config keys.
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub strong_rec_thresh: f64,
    pub medium_rec_thresh: f64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            strong_rec_thresh: 0.04,
            medium_rec_thresh: 0.25,
        }
    }
}

/// Job queue tuning.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub num_preview_workers: usize,
    pub job_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            num_preview_workers: 4,
            job_timeout: Duration::from_secs(3600),
            max_retries: 2,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Inbox watcher tuning.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub debounce: Duration,
    pub worker_ready_delay: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(30),
            worker_ready_delay: Duration::from_secs(10),
        }
    }
}

/// Fingerprinting rules.
#[derive(Debug, Clone)]
pub struct FingerprintSettings {
    pub audio_extensions: Option<Vec<String>>,
    pub multidisc_patterns: Option<Vec<String>>,
    pub hash_cache_size: usize,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            audio_extensions: None,
            multidisc_patterns: None,
            hash_cache_size: 1024,
        }
    }
}

/// CLI arguments relevant to config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub library_dir: Option<PathBuf>,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub library_dir: PathBuf,
    pub port: u16,
    pub inboxes: Vec<InboxSettings>,
    pub import: ImportSettings,
    pub matching: MatchSettings,
    pub jobs: JobSettings,
    pub watcher: WatcherSettings,
    pub fingerprint: FingerprintSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and an optional TOML file.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {db_dir:?}");
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {db_dir:?}");
        }

        let library_dir = file
            .library_dir
            .map(PathBuf::from)
            .or_else(|| cli.library_dir.clone())
            .unwrap_or_else(|| db_dir.join("library"));

        let port = file.port.unwrap_or(cli.port);

        let mut inboxes = Vec::new();
        for folder in &file.inbox.folders {
            let autotag = match folder.autotag.as_deref() {
                None => InboxKind::Off,
                Some(value) => InboxKind::from_str(value).ok_or_else(|| {
                    anyhow::anyhow!(
                        "unknown autotag kind {:?} for inbox {:?} (expected off/preview/auto/bootleg)",
                        value,
                        folder.path
                    )
                })?,
            };
            inboxes.push(InboxSettings {
                path: PathBuf::from(&folder.path),
                autotag,
                auto_threshold: folder.auto_threshold,
            });
        }

        let import_defaults = ImportSettings::default();
        let import_file = file.import.unwrap_or_default();
        let import = ImportSettings {
            duplicate_action: match import_file.duplicate_action.as_deref() {
                None => import_defaults.duplicate_action,
                Some(value) => DuplicateAction::from_str(value).ok_or_else(|| {
                    anyhow::anyhow!("unknown import.duplicate_action {value:?}")
                })?,
            },
            duplicate_keys: import_file
                .duplicate_keys
                .unwrap_or(import_defaults.duplicate_keys),
            group_albums: import_file
                .group_albums
                .unwrap_or(import_defaults.group_albums),
            artist_separators: import_file
                .artist_separators
                .unwrap_or(import_defaults.artist_separators),
        };

        let match_defaults = MatchSettings::default();
        let match_file = file.matching.unwrap_or_default();
        let matching = MatchSettings {
            strong_rec_thresh: match_file
                .strong_rec_thresh
                .unwrap_or(match_defaults.strong_rec_thresh),
            medium_rec_thresh: match_file
                .medium_rec_thresh
                .unwrap_or(match_defaults.medium_rec_thresh),
        };

        let job_defaults = JobSettings::default();
        let jobs_file = file.jobs.unwrap_or_default();
        let jobs = JobSettings {
            num_preview_workers: jobs_file
                .num_preview_workers
                .unwrap_or(job_defaults.num_preview_workers)
                .max(1),
            job_timeout: jobs_file
                .job_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(job_defaults.job_timeout),
            max_retries: jobs_file.max_retries.unwrap_or(job_defaults.max_retries),
            retry_backoff: jobs_file
                .retry_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(job_defaults.retry_backoff),
        };

        let watcher_defaults = WatcherSettings::default();
        let watcher_file = file.watcher.unwrap_or_default();
        let watcher = WatcherSettings {
            debounce: watcher_file
                .debounce_secs
                .map(Duration::from_secs_f64)
                .unwrap_or(watcher_defaults.debounce),
            worker_ready_delay: watcher_file
                .worker_ready_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(watcher_defaults.worker_ready_delay),
        };

        let fingerprint_defaults = FingerprintSettings::default();
        let fingerprint_file = file.fingerprint.unwrap_or_default();
        let fingerprint = FingerprintSettings {
            audio_extensions: fingerprint_file.audio_extensions,
            multidisc_patterns: fingerprint_file.multidisc_patterns,
            hash_cache_size: fingerprint_file
                .hash_cache_size
                .unwrap_or(fingerprint_defaults.hash_cache_size),
        };

        Ok(Self {
            db_dir,
            library_dir,
            port,
            inboxes,
            import,
            matching,
            jobs,
            watcher,
            fingerprint,
        })
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.db_dir.join("sessions.db")
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }

    /// The inbox an album folder lives in, if any.
    pub fn inbox_for_path(&self, path: &std::path::Path) -> Option<&InboxSettings> {
        self.inboxes
            .iter()
            .find(|inbox| path.starts_with(&inbox.path))
    }
}
