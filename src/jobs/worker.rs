//! Worker functions executed by the job queues.
//!
//! Each enqueue kind maps to one async worker function wrapped with the
//! folder-status emitter. User-facing failures bubble up as `ImportError`
//! and are converted to job results by the dispatcher; only infrastructure
//! errors fail the job at the queue level.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::models::{JobMeta, JobPayload};
use crate::config::AppConfig;
use crate::fingerprint::{Folder, FolderClassifier, HashCache};
use crate::importer::error::ImportError;
use crate::importer::{
    AddCandidatesSession, AutoImportSession, BootlegImportSession, ImportChosenSession,
    PreviewSession, SessionContext, UndoSession,
};
use crate::library::{MusicLibrary, PluginHub};
use crate::matcher::MetadataSource;
use crate::state::{FolderStatus, SessionState};
use crate::status::{with_folder_status, StatusBroadcaster};
use crate::store::SessionStore;

/// Shared environment copied into every worker at start.
pub struct WorkerEnv {
    pub store: Arc<dyn SessionStore>,
    pub library: Arc<dyn MusicLibrary>,
    pub matcher: Arc<dyn MetadataSource>,
    pub plugins: Arc<PluginHub>,
    pub broadcaster: StatusBroadcaster,
    pub config: AppConfig,
    pub classifier: FolderClassifier,
    pub hash_cache: Arc<HashCache>,
    /// Shutdown token. Running stages finish their current send, then the
    /// pipeline unwinds and the reached progress is persisted.
    pub cancel: CancellationToken,
}

impl WorkerEnv {
    fn context_for(&self, state: SessionState) -> Arc<SessionContext> {
        SessionContext::new(
            state,
            self.library.clone(),
            self.matcher.clone(),
            self.plugins.clone(),
            self.config.import.clone(),
            self.config.matching.clone(),
            self.classifier.clone(),
        )
    }

    /// Persist the session graph; store failures are infrastructure errors.
    fn persist(&self, state: &SessionState) -> Result<(), ImportError> {
        self.store.save_session(state).map_err(ImportError::Infra)
    }
}

/// Dispatch one job to its worker function, bracketed by status emission.
pub async fn execute(env: &WorkerEnv, meta: &JobMeta, payload: &JobPayload) -> Result<(), ImportError> {
    let hash = meta.folder_hash.as_str();
    let path = meta.folder_path.as_str();
    let broadcaster = &env.broadcaster;

    match payload {
        JobPayload::Preview => {
            with_folder_status(
                broadcaster,
                hash,
                path,
                FolderStatus::Previewing,
                FolderStatus::Previewed,
                run_preview(env, meta),
            )
            .await
        }
        JobPayload::PreviewAddCandidates { .. } => {
            with_folder_status(
                broadcaster,
                hash,
                path,
                FolderStatus::Previewing,
                FolderStatus::Previewed,
                run_preview_add_candidates(env, meta, payload),
            )
            .await
        }
        JobPayload::ImportCandidate { .. } => {
            with_folder_status(
                broadcaster,
                hash,
                path,
                FolderStatus::Importing,
                FolderStatus::Imported,
                run_import_candidate(env, meta, payload),
            )
            .await
        }
        JobPayload::ImportAuto { .. } => {
            with_folder_status(
                broadcaster,
                hash,
                path,
                FolderStatus::Importing,
                FolderStatus::Imported,
                run_import_auto(env, meta, payload),
            )
            .await
        }
        JobPayload::ImportBootleg => {
            with_folder_status(
                broadcaster,
                hash,
                path,
                FolderStatus::Importing,
                FolderStatus::Imported,
                run_import_bootleg(env, meta),
            )
            .await
        }
        JobPayload::ImportUndo { delete_files } => {
            with_folder_status(
                broadcaster,
                hash,
                path,
                FolderStatus::Deleting,
                FolderStatus::Deleted,
                run_import_undo(env, meta, *delete_files),
            )
            .await
        }
    }
}

/// Fetch candidates for a folder.
///
/// Always starts from a fresh state and persists at a new folder revision;
/// previous revisions stay intact.
async fn run_preview(env: &WorkerEnv, meta: &JobMeta) -> Result<(), ImportError> {
    info!(hash = %meta.folder_hash, path = %meta.folder_path, "preview task");

    let path = PathBuf::from(&meta.folder_path);
    let fresh = Folder::scan(&path, &env.classifier, &env.hash_cache)?;
    if fresh.hash != meta.folder_hash {
        warn!(
            path = %meta.folder_path,
            enqueued = %meta.folder_hash,
            current = %fresh.hash,
            "folder content changed since the job was scheduled, using new content"
        );
    }

    let ctx = env.context_for(SessionState::new(&fresh));
    let session = PreviewSession::new(ctx.clone());
    let result = session.run(&env.cancel).await;
    drop(session);

    let mut state = ctx.into_state();
    state.folder_revision = env
        .store
        .next_revision(&state.folder_hash)
        .map_err(ImportError::Infra)?;
    env.persist(&state)?;

    info!(hash = %meta.folder_hash, revision = state.folder_revision, "preview done");
    result.map(|_| ())
}

async fn run_preview_add_candidates(
    env: &WorkerEnv,
    meta: &JobMeta,
    payload: &JobPayload,
) -> Result<(), ImportError> {
    info!(hash = %meta.folder_hash, "add candidates task");
    let query = payload
        .search_query()
        .ok_or_else(|| ImportError::InvalidUsage("missing search parameters".to_string()))?;

    let (state, _) = load_live_session(env, meta, false)?;
    let ctx = env.context_for(state);
    let session = AddCandidatesSession::new(ctx.clone(), query);
    let result = session.run(&env.cancel).await;
    drop(session);

    // Same session row is updated in place; no new revision.
    env.persist(&ctx.into_state())?;
    result.map(|_| ())
}

async fn run_import_candidate(
    env: &WorkerEnv,
    meta: &JobMeta,
    payload: &JobPayload,
) -> Result<(), ImportError> {
    info!(hash = %meta.folder_hash, path = %meta.folder_path, "import task");
    let JobPayload::ImportCandidate {
        candidate_ids,
        duplicate_actions,
    } = payload
    else {
        return Err(ImportError::InvalidUsage("wrong payload for import".into()));
    };

    let (state, _) = load_live_session(env, meta, false)?;
    let ctx = env.context_for(state);
    let session = ImportChosenSession::new(
        ctx.clone(),
        candidate_ids.clone(),
        duplicate_actions.clone(),
    );
    let result = session.run(&env.cancel).await;
    drop(session);

    env.persist(&ctx.into_state())?;
    result.map(|_| ())
}

async fn run_import_auto(
    env: &WorkerEnv,
    meta: &JobMeta,
    payload: &JobPayload,
) -> Result<(), ImportError> {
    info!(hash = %meta.folder_hash, path = %meta.folder_path, "auto import task");
    let JobPayload::ImportAuto {
        import_threshold,
        duplicate_actions,
    } = payload
    else {
        return Err(ImportError::InvalidUsage("wrong payload for auto import".into()));
    };

    let threshold = import_threshold.unwrap_or(env.config.matching.strong_rec_thresh);

    let (state, _) = load_live_session(env, meta, false)?;
    let ctx = env.context_for(state);
    let session = AutoImportSession::new(ctx.clone(), threshold, duplicate_actions.clone());
    let result = session.run(&env.cancel).await;
    drop(session);

    env.persist(&ctx.into_state())?;
    result.map(|_| ())
}

async fn run_import_bootleg(env: &WorkerEnv, meta: &JobMeta) -> Result<(), ImportError> {
    info!(hash = %meta.folder_hash, path = %meta.folder_path, "bootleg import task");

    let (state, created) = load_live_session(env, meta, true)?;
    let ctx = env.context_for(state);
    let session = BootlegImportSession::new(ctx.clone());
    let result = session.run(&env.cancel).await;
    drop(session);

    let mut state = ctx.into_state();
    if created {
        state.folder_revision = env
            .store
            .next_revision(&state.folder_hash)
            .map_err(ImportError::Infra)?;
    }
    env.persist(&state)?;
    result.map(|_| ())
}

async fn run_import_undo(
    env: &WorkerEnv,
    meta: &JobMeta,
    delete_files: bool,
) -> Result<(), ImportError> {
    info!(hash = %meta.folder_hash, delete_files, "undo task");

    let (state, _) = load_live_session(env, meta, false)?;
    let ctx = env.context_for(state);
    let session = UndoSession::new(ctx.clone(), delete_files);
    let result = session.run(&env.cancel).await;
    drop(session);

    env.persist(&ctx.into_state())?;
    result.map(|_| ())
}

/// Reload the current session for a folder hash.
///
/// A hash drift against the on-disk content is warned about but the job
/// proceeds on the stored state: it runs on the content that existed at
/// enqueue time. Returns whether the session was freshly created.
fn load_live_session(
    env: &WorkerEnv,
    meta: &JobMeta,
    create_if_missing: bool,
) -> Result<(SessionState, bool), ImportError> {
    let path = PathBuf::from(&meta.folder_path);
    match env.hash_cache.get_or_compute(&path, &env.classifier) {
        Ok(fresh_hash) if fresh_hash != meta.folder_hash => {
            warn!(
                path = %meta.folder_path,
                enqueued = %meta.folder_hash,
                current = %fresh_hash,
                "folder content changed since the job was scheduled, proceeding on stored state"
            );
        }
        Ok(_) => {}
        Err(err) => {
            warn!(path = %meta.folder_path, error = %err, "could not rescan folder");
        }
    }

    if let Some(state) = env
        .store
        .latest_by_hash(&meta.folder_hash)
        .map_err(ImportError::Infra)?
    {
        return Ok((state, false));
    }

    if create_if_missing {
        let folder = Folder {
            path,
            hash: meta.folder_hash.clone(),
            is_album: true,
        };
        return Ok((SessionState::new(&folder), true));
    }

    Err(ImportError::NotFound(format!(
        "no session state found for hash {} ({})",
        meta.folder_hash, meta.folder_path
    )))
}
