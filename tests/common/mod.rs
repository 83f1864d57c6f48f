//! Common test infrastructure.
//!
//! Each test gets an isolated harness: temp inbox and library directories,
//! in-memory session and library databases, a scripted metadata source, and
//! a running job dispatcher.

// Not every test binary exercises every helper.
#![allow(dead_code)]

mod fixtures;

pub use fixtures::{album_candidate, create_album_folder, FixtureMatcher};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tarantella_import_server::config::{
    AppConfig, FingerprintSettings, ImportSettings, InboxKind, InboxSettings, JobSettings,
    MatchSettings, WatcherSettings,
};
use tarantella_import_server::fingerprint::{Folder, FolderClassifier, HashCache};
use tarantella_import_server::jobs::{JobDispatcher, JobPayload, JobRecord, WorkerEnv};
use tarantella_import_server::library::{MusicLibrary, PluginHub, SqliteMusicLibrary};
use tarantella_import_server::state::DuplicateAction;
use tarantella_import_server::status::StatusBroadcaster;
use tarantella_import_server::store::{SessionStore, SqliteSessionStore};

pub const JOB_WAIT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    pub env: Arc<WorkerEnv>,
    pub dispatcher: Arc<JobDispatcher>,
    pub store: Arc<dyn SessionStore>,
    pub library: Arc<dyn MusicLibrary>,
    pub matcher: Arc<FixtureMatcher>,
    pub broadcaster: StatusBroadcaster,
    pub inbox_dir: PathBuf,
    pub library_dir: PathBuf,
    _temp: TempDir,
}

impl TestHarness {
    /// Harness with default config and an inbox in preview mode.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let temp = TempDir::new().expect("failed to create temp dir");
        let inbox_dir = temp.path().join("inbox");
        let library_dir = temp.path().join("library");
        std::fs::create_dir_all(&inbox_dir).unwrap();
        std::fs::create_dir_all(&library_dir).unwrap();

        let mut config = AppConfig {
            db_dir: temp.path().to_path_buf(),
            library_dir: library_dir.clone(),
            port: 0,
            inboxes: vec![InboxSettings {
                path: inbox_dir.clone(),
                autotag: InboxKind::Preview,
                auto_threshold: None,
            }],
            import: ImportSettings {
                duplicate_action: DuplicateAction::Ask,
                ..ImportSettings::default()
            },
            matching: MatchSettings::default(),
            jobs: JobSettings {
                num_preview_workers: 2,
                job_timeout: Duration::from_secs(30),
                max_retries: 0,
                retry_backoff: Duration::from_millis(10),
            },
            watcher: WatcherSettings {
                debounce: Duration::from_millis(500),
                worker_ready_delay: Duration::from_millis(50),
            },
            fingerprint: FingerprintSettings::default(),
        };
        tweak(&mut config);

        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::in_memory().expect("session store"));
        let library: Arc<dyn MusicLibrary> = Arc::new(
            SqliteMusicLibrary::in_memory(library_dir.clone()).expect("library"),
        );
        let matcher = Arc::new(FixtureMatcher::new());
        let broadcaster = StatusBroadcaster::new();

        let env = Arc::new(WorkerEnv {
            store: store.clone(),
            library: library.clone(),
            matcher: matcher.clone(),
            plugins: Arc::new(PluginHub::new()),
            broadcaster: broadcaster.clone(),
            config,
            classifier: FolderClassifier::default(),
            hash_cache: Arc::new(HashCache::new(64)),
            cancel: CancellationToken::new(),
        });

        let dispatcher = JobDispatcher::start(env.clone());

        Self {
            env,
            dispatcher,
            store,
            library,
            matcher,
            broadcaster,
            inbox_dir,
            library_dir,
            _temp: temp,
        }
    }

    pub fn create_album_folder(&self, name: &str, files: &[&str]) -> PathBuf {
        create_album_folder(&self.inbox_dir, name, files)
    }

    pub fn scan(&self, path: &std::path::Path) -> Folder {
        Folder::scan(path, &self.env.classifier, &self.env.hash_cache).expect("scan folder")
    }

    /// Enqueue a job for a folder and wait for its terminal record.
    pub async fn enqueue_and_wait(&self, folder: &Folder, payload: JobPayload) -> JobRecord {
        let meta = self
            .dispatcher
            .enqueue(
                &folder.hash,
                &folder.path.to_string_lossy(),
                payload,
                None,
            )
            .expect("enqueue failed");
        self.dispatcher
            .wait_for_job(&meta.job_id, JOB_WAIT)
            .await
            .expect("job vanished")
    }
}
