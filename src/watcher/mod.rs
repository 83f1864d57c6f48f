//! Inbox watcher.
//!
//! Watches the configured inbox folders for filesystem activity, debounces
//! events per album folder, and enqueues the inbox's configured job kind
//! once a folder has been quiet for the debounce window. Further activity
//! on the same folder cancels and reschedules the pending trigger.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::InboxKind;
use crate::fingerprint::Folder;
use crate::jobs::{JobDispatcher, JobPayload, WorkerEnv};

/// Environment variable set in worker processes. The watcher must only run
/// under the main server process; one observer per deployment.
pub const WORKER_GUARD_ENV: &str = "IMPORT_WORKER_ID";

type DebounceMap = Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>;

pub struct InboxWatcher {
    _watcher: notify::RecommendedWatcher,
    cancel: CancellationToken,
    debounce: DebounceMap,
}

impl InboxWatcher {
    /// Start watching all configured inboxes. Returns `None` when no inbox
    /// is configured.
    pub fn start(
        env: Arc<WorkerEnv>,
        dispatcher: Arc<JobDispatcher>,
    ) -> Result<Option<Self>> {
        if std::env::var(WORKER_GUARD_ENV).is_ok() {
            bail!("the inbox watcher must run in the main server process, not under a worker");
        }

        if env.config.inboxes.is_empty() {
            info!("no inboxes configured, watcher disabled");
            return Ok(None);
        }

        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for path in event.paths {
                        let _ = event_tx.send(path);
                    }
                }
                Err(error) => {
                    warn!(%error, "filesystem watch error");
                }
            }
        })
        .context("failed to initialize filesystem watcher")?;

        for inbox in &env.config.inboxes {
            match watcher.watch(&inbox.path, RecursiveMode::Recursive) {
                Ok(()) => info!(path = %inbox.path.display(), kind = inbox.autotag.as_str(), "watching inbox"),
                Err(error) => warn!(path = %inbox.path.display(), %error, "cannot watch inbox"),
            }
        }

        let cancel = CancellationToken::new();
        let debounce: DebounceMap = Arc::new(Mutex::new(HashMap::new()));

        // Event loop: debounce per album folder.
        {
            let env = env.clone();
            let dispatcher = dispatcher.clone();
            let debounce = debounce.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let path = tokio::select! {
                        _ = cancel.cancelled() => break,
                        path = event_rx.recv() => path,
                    };
                    let Some(path) = path else { break };
                    handle_event(&env, &dispatcher, &debounce, path);
                }
            });
        }

        // Users expect autotagging inboxes to scan on first launch, once the
        // workers had a moment to come up.
        #[cfg(not(feature = "no_startup_scan"))]
        {
            let delay = env.config.watcher.worker_ready_delay;
            for inbox in env.config.inboxes.iter().filter(|i| i.autotag != InboxKind::Off) {
                for folder in env.classifier.album_folders_under(&inbox.path) {
                    let env = env.clone();
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        auto_tag(&env, &dispatcher, &folder).await;
                    });
                }
            }
        }

        Ok(Some(Self {
            _watcher: watcher,
            cancel,
            debounce,
        }))
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        let mut pending = self.debounce.lock().unwrap();
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

impl Drop for InboxWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_event(
    env: &Arc<WorkerEnv>,
    dispatcher: &Arc<JobDispatcher>,
    debounce: &DebounceMap,
    path: PathBuf,
) {
    debug!(path = %path.display(), "inbox event");

    // Clients refresh their inbox trees on any change.
    env.broadcaster.send_fs_update();

    if path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
    {
        return;
    }

    env.hash_cache.invalidate_under(&path);

    let Some(inbox) = env.config.inbox_for_path(&path) else {
        return;
    };
    let Some(album_folder) = env.classifier.containing_album_folder(&path, &inbox.path) else {
        debug!(path = %path.display(), "event outside any album folder");
        return;
    };

    let delay = env.config.watcher.debounce;
    let task = {
        let env = env.clone();
        let dispatcher = dispatcher.clone();
        let album_folder = album_folder.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            auto_tag(&env, &dispatcher, &album_folder).await;
        })
    };

    let mut pending = debounce.lock().unwrap();
    if let Some(previous) = pending.insert(album_folder.clone(), task) {
        debug!(folder = %album_folder.display(), "rescheduling debounced trigger");
        previous.abort();
    }
}

/// Fire the inbox's configured job kind for an album folder, unless the
/// session store already covers its current content.
pub async fn auto_tag(env: &Arc<WorkerEnv>, dispatcher: &Arc<JobDispatcher>, folder_path: &PathBuf) {
    let Some(inbox) = env.config.inbox_for_path(folder_path) else {
        warn!(path = %folder_path.display(), "not inside any inbox, skipping autotag");
        return;
    };
    if inbox.autotag == InboxKind::Off {
        debug!(path = %folder_path.display(), "autotagging disabled for inbox");
        return;
    }

    let folder = match Folder::scan(folder_path, &env.classifier, &env.hash_cache) {
        Ok(folder) => folder,
        Err(error) => {
            warn!(path = %folder_path.display(), %error, "cannot scan folder, skipping autotag");
            return;
        }
    };
    if !folder.is_album {
        info!(path = %folder_path.display(), "not an album folder, skipping autotag");
        return;
    }

    let existing = env.store.latest_by_path(folder_path).ok().flatten();
    let should_enqueue = match &existing {
        None => true,
        // Keep previews fresh when the content changed under a stored session.
        Some(session) => {
            inbox.autotag == InboxKind::Preview && folder.hash != session.folder_hash
        }
    };
    if !should_enqueue {
        info!(path = %folder_path.display(), "session exists, skipping autotag");
        return;
    }

    let payload = match inbox.autotag {
        InboxKind::Preview => JobPayload::Preview,
        InboxKind::Auto => JobPayload::ImportAuto {
            import_threshold: inbox.auto_threshold,
            duplicate_actions: HashMap::new(),
        },
        InboxKind::Bootleg => JobPayload::ImportBootleg,
        InboxKind::Off => return,
    };

    info!(
        path = %folder_path.display(),
        kind = inbox.autotag.as_str(),
        "watcher enqueueing autotag job"
    );
    if let Err(error) = dispatcher.enqueue(
        &folder.hash,
        &folder_path.to_string_lossy(),
        payload,
        None,
    ) {
        warn!(path = %folder_path.display(), %error, "autotag enqueue failed");
    }
}
