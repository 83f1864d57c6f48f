//! Job dispatcher: two named queues and the validated enqueue entry points.
//!
//! The `preview` queue runs with configurable concurrency; the `import`
//! queue is serialized on one worker so the music library ever has a single
//! writer. Auto imports chain two jobs: the preview job's success gates the
//! import job. Validation happens at the entry point, never inside workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{EnqueueKind, JobMeta, JobPayload, JobRecord, JobStatus};
use super::worker::{execute, WorkerEnv};
use crate::importer::error::{ImportError, SerializedException};
use crate::importer::CandidateChoice;
use crate::state::FolderStatus;

struct QueuedJob {
    meta: JobMeta,
    payload: JobPayload,
    /// Resolves to the dependency's success once it finishes.
    depends_on: Option<oneshot::Receiver<bool>>,
    /// Signals this job's success to a dependent job.
    done_tx: Option<oneshot::Sender<bool>>,
    revoked: Arc<AtomicBool>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>>;
type Registry = Arc<Mutex<HashMap<String, JobRecord>>>;

pub struct JobDispatcher {
    env: Arc<WorkerEnv>,
    preview_tx: mpsc::UnboundedSender<QueuedJob>,
    import_tx: mpsc::UnboundedSender<QueuedJob>,
    registry: Registry,
    revocations: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl JobDispatcher {
    /// Spawn the queue workers and return the dispatcher handle.
    pub fn start(env: Arc<WorkerEnv>) -> Arc<Self> {
        let (preview_tx, preview_rx) = mpsc::unbounded_channel();
        let (import_tx, import_rx) = mpsc::unbounded_channel();
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));

        let preview_rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(preview_rx));
        for worker_id in 0..env.config.jobs.num_preview_workers {
            tokio::spawn(queue_worker(
                "preview",
                worker_id,
                env.clone(),
                registry.clone(),
                preview_rx.clone(),
            ));
        }

        let import_rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(import_rx));
        tokio::spawn(queue_worker("import", 0, env.clone(), registry.clone(), import_rx));

        info!(
            preview_workers = env.config.jobs.num_preview_workers,
            "job dispatcher started"
        );

        Arc::new(Self {
            env,
            preview_tx,
            import_tx,
            registry,
            revocations: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Enqueue a job for a folder. Validates parameters, emits the `Pending`
    /// folder status, and returns the enqueued job's metadata (for auto
    /// imports: the import job's).
    pub fn enqueue(
        &self,
        folder_hash: &str,
        folder_path: &str,
        payload: JobPayload,
        frontend_ref: Option<String>,
    ) -> Result<JobMeta, ImportError> {
        self.validate(&payload)?;

        self.env
            .broadcaster
            .send_folder_status(folder_hash, folder_path, FolderStatus::Pending, None);

        let meta = match payload.kind() {
            EnqueueKind::ImportAuto => {
                // Chain: preview first, import gated on its success.
                let (done_tx, done_rx) = oneshot::channel();

                let preview_meta =
                    self.make_meta(folder_hash, folder_path, EnqueueKind::Preview, &frontend_ref);
                self.submit(
                    Queue::Preview,
                    preview_meta,
                    JobPayload::Preview,
                    None,
                    Some(done_tx),
                );

                let import_meta =
                    self.make_meta(folder_hash, folder_path, EnqueueKind::ImportAuto, &frontend_ref);
                self.submit(Queue::Import, import_meta.clone(), payload, Some(done_rx), None);
                import_meta
            }
            EnqueueKind::Preview | EnqueueKind::PreviewAddCandidates => {
                let meta =
                    self.make_meta(folder_hash, folder_path, payload.kind(), &frontend_ref);
                self.submit(Queue::Preview, meta.clone(), payload, None, None);
                meta
            }
            EnqueueKind::ImportCandidate | EnqueueKind::ImportBootleg | EnqueueKind::ImportUndo => {
                let meta =
                    self.make_meta(folder_hash, folder_path, payload.kind(), &frontend_ref);
                self.submit(Queue::Import, meta.clone(), payload, None, None);
                meta
            }
        };

        Ok(meta)
    }

    fn validate(&self, payload: &JobPayload) -> Result<(), ImportError> {
        match payload {
            JobPayload::Preview | JobPayload::ImportBootleg | JobPayload::ImportUndo { .. } => {
                Ok(())
            }
            JobPayload::PreviewAddCandidates {
                search_ids,
                search_artist,
                search_album,
            } => {
                if search_ids.is_empty() && search_artist.is_none() && search_album.is_none() {
                    return Err(ImportError::InvalidUsage(
                        "preview_add_candidates requires at least one of: search_ids, \
                         search_artist, search_album"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            JobPayload::ImportCandidate { candidate_ids, .. } => {
                for choice in candidate_ids.values() {
                    if let CandidateChoice::Id(id) = choice {
                        let exists = self
                            .env
                            .store
                            .candidate_exists(id)
                            .map_err(ImportError::Infra)?;
                        if !exists {
                            return Err(ImportError::InvalidUsage(format!(
                                "candidate with id {id} does not exist"
                            )));
                        }
                    }
                }
                Ok(())
            }
            JobPayload::ImportAuto {
                import_threshold, ..
            } => {
                if let Some(threshold) = import_threshold {
                    if !(0.0..=1.0).contains(threshold) {
                        return Err(ImportError::InvalidUsage(format!(
                            "import_threshold must be within [0, 1], got {threshold}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn make_meta(
        &self,
        folder_hash: &str,
        folder_path: &str,
        kind: EnqueueKind,
        frontend_ref: &Option<String>,
    ) -> JobMeta {
        JobMeta {
            folder_hash: folder_hash.to_string(),
            folder_path: folder_path.to_string(),
            job_id: Uuid::new_v4().to_string(),
            job_kind: kind,
            frontend_ref: frontend_ref.clone(),
        }
    }

    fn submit(
        &self,
        queue: Queue,
        meta: JobMeta,
        payload: JobPayload,
        depends_on: Option<oneshot::Receiver<bool>>,
        done_tx: Option<oneshot::Sender<bool>>,
    ) {
        let revoked = Arc::new(AtomicBool::new(false));
        self.revocations
            .lock()
            .unwrap()
            .insert(meta.job_id.clone(), revoked.clone());
        self.registry.lock().unwrap().insert(
            meta.job_id.clone(),
            JobRecord {
                meta: meta.clone(),
                status: JobStatus::Queued,
                result: None,
                enqueued_at: Utc::now(),
                finished_at: None,
            },
        );

        debug!(job = %meta.job_id, kind = meta.job_kind.as_str(), queue = queue.name(), "enqueued job");
        self.env
            .broadcaster
            .send_job_update("Job enqueued", vec![meta.clone()]);

        let job = QueuedJob {
            meta,
            payload,
            depends_on,
            done_tx,
            revoked,
        };
        let tx = match queue {
            Queue::Preview => &self.preview_tx,
            Queue::Import => &self.import_tx,
        };
        if tx.send(job).is_err() {
            error!(queue = queue.name(), "queue closed, dropping job");
        }
    }

    /// Revoke a job that has not started yet. Running jobs are not
    /// preempted; they complete their current stage.
    pub fn revoke(&self, job_id: &str) -> bool {
        let registry = self.registry.lock().unwrap();
        let queued = registry
            .get(job_id)
            .map(|r| r.status == JobStatus::Queued)
            .unwrap_or(false);
        drop(registry);
        if !queued {
            return false;
        }
        if let Some(flag) = self.revocations.lock().unwrap().get(job_id) {
            flag.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn job(&self, job_id: &str) -> Option<JobRecord> {
        self.registry.lock().unwrap().get(job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> =
            self.registry.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.enqueued_at);
        records
    }

    /// Poll until a job reaches a terminal status. Used by tests and status
    /// endpoints that want synchronous behavior.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        timeout: std::time::Duration,
    ) -> Option<JobRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(record) = self.job(job_id) {
                if record.status.is_terminal() {
                    return Some(record);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return self.job(job_id);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

#[derive(Clone, Copy)]
enum Queue {
    Preview,
    Import,
}

impl Queue {
    fn name(&self) -> &'static str {
        match self {
            Queue::Preview => "preview",
            Queue::Import => "import",
        }
    }
}

async fn queue_worker(
    queue_name: &'static str,
    worker_id: usize,
    env: Arc<WorkerEnv>,
    registry: Registry,
    rx: SharedReceiver,
) {
    debug!(queue = queue_name, worker_id, "queue worker started");
    loop {
        let job = tokio::select! {
            _ = env.cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = job else { break };
        run_one(queue_name, &env, &registry, job).await;
    }
    debug!(queue = queue_name, worker_id, "queue worker stopped");
}

fn update_record(
    registry: &Registry,
    job_id: &str,
    status: JobStatus,
    result: Option<SerializedException>,
) -> Option<JobMeta> {
    let mut registry = registry.lock().unwrap();
    let record = registry.get_mut(job_id)?;
    record.status = status;
    record.result = result;
    if status.is_terminal() {
        record.finished_at = Some(Utc::now());
    }
    Some(record.meta.clone())
}

async fn run_one(queue_name: &'static str, env: &Arc<WorkerEnv>, registry: &Registry, job: QueuedJob) {
    let job_id = job.meta.job_id.clone();

    if job.revoked.load(Ordering::SeqCst) {
        info!(job = %job_id, "job revoked before start");
        update_record(registry, &job_id, JobStatus::Revoked, None);
        if let Some(done) = job.done_tx {
            let _ = done.send(false);
        }
        return;
    }

    if let Some(dependency) = job.depends_on {
        let dependency_ok = dependency.await.unwrap_or(false);
        if !dependency_ok {
            info!(job = %job_id, "dependency failed, skipping job");
            let meta = update_record(
                registry,
                &job_id,
                JobStatus::Skipped,
                Some(SerializedException::new(
                    "DependencyFailedException",
                    "the preview this import depends on did not succeed",
                )),
            );
            if let Some(meta) = meta {
                env.broadcaster.send_job_update("Job skipped", vec![meta]);
            }
            if let Some(done) = job.done_tx {
                let _ = done.send(false);
            }
            return;
        }
    }

    update_record(registry, &job_id, JobStatus::Running, None);
    env.broadcaster
        .send_job_update("Job started", vec![job.meta.clone()]);

    let mut attempt: u32 = 0;
    let outcome = loop {
        let run = tokio::time::timeout(
            env.config.jobs.job_timeout,
            execute(env, &job.meta, &job.payload),
        )
        .await;

        match run {
            Ok(Ok(())) => break Ok(()),
            Ok(Err(err)) if err.is_infra() && attempt < env.config.jobs.max_retries => {
                attempt += 1;
                warn!(
                    job = %job_id,
                    attempt,
                    error = %err,
                    "infrastructure error, retrying job"
                );
                tokio::time::sleep(env.config.jobs.retry_backoff).await;
            }
            Ok(Err(err)) => break Err(err),
            Err(_) => {
                break Err(ImportError::Infra(anyhow::anyhow!(
                    "job timed out after {:?}",
                    env.config.jobs.job_timeout
                )))
            }
        }
    };

    let (status, result, success) = match &outcome {
        Ok(()) => (JobStatus::Succeeded, None, true),
        Err(err) => {
            // Exception-as-value: user-facing errors become the job result.
            info!(queue = queue_name, job = %job_id, error = %err, "job finished with error");
            (JobStatus::Failed, Some(SerializedException::from(err)), false)
        }
    };

    let meta = update_record(registry, &job_id, status, result);
    if let Some(meta) = meta {
        env.broadcaster.send_job_update("Job finished", vec![meta]);
    }
    if let Some(done) = job.done_tx {
        let _ = done.send(success);
    }
}
