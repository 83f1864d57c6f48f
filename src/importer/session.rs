//! Shared execution engine for session variants.
//!
//! Variants are sibling constructors of stage lists, not a class hierarchy:
//! each assembles a `StageOrder` over the shared `SessionContext` and hands
//! it to the single pipeline executor here. The runner wraps the run with
//! the `import_begin` / `cli_exit` plugin events and records failures on the
//! session state.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::{ImportSettings, MatchSettings};
use crate::fingerprint::FolderClassifier;
use crate::importer::error::{ImportError, SerializedException};
use crate::library::{LibraryItem, MusicLibrary, PluginEvent, PluginHub};
use crate::matcher::MetadataSource;
use crate::pipeline::{self, PipelineOutcome, Producer, StageOrder};
use crate::state::{SessionState, TaskState};

/// Everything a stage needs: the session state under a lock, the external
/// capabilities, and the import settings snapshot.
pub struct SessionContext {
    state: Mutex<SessionState>,
    pub library: Arc<dyn MusicLibrary>,
    pub matcher: Arc<dyn MetadataSource>,
    pub plugins: Arc<PluginHub>,
    pub settings: ImportSettings,
    pub matching: MatchSettings,
    pub classifier: FolderClassifier,
    /// Library items captured by undo's entry-removal stage, per task.
    pub(crate) removed_items: Mutex<std::collections::HashMap<String, Vec<LibraryItem>>>,
}

impl SessionContext {
    pub fn new(
        state: SessionState,
        library: Arc<dyn MusicLibrary>,
        matcher: Arc<dyn MetadataSource>,
        plugins: Arc<PluginHub>,
        settings: ImportSettings,
        matching: MatchSettings,
        classifier: FolderClassifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            library,
            matcher,
            plugins,
            settings,
            matching,
            classifier,
            removed_items: Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// Run a closure against the locked session state. Never hold the lock
    /// across an await point; stages snapshot what they need instead.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn with_task<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TaskState) -> R,
    ) -> Result<R, ImportError> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .task_by_id_mut(task_id)
            .ok_or_else(|| ImportError::NotFound(format!("no task with id {task_id}")))?;
        Ok(f(task))
    }

    pub fn task_snapshot(&self, task_id: &str) -> Result<TaskState, ImportError> {
        self.with_task(task_id, |task| task.clone())
    }

    pub fn session_snapshot(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    /// Consume the session state after the run.
    pub fn into_state(self: Arc<Self>) -> SessionState {
        match Arc::try_unwrap(self) {
            Ok(ctx) => ctx.state.into_inner().unwrap(),
            Err(shared) => shared.session_snapshot(),
        }
    }
}

/// Drive a stage order over the producer, bracketed by the session-level
/// plugin events. A failure is recorded on the session state; success clears
/// any previous failure.
pub async fn run_session(
    ctx: &Arc<SessionContext>,
    producer: Box<dyn Producer<String>>,
    order: StageOrder<String>,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, ImportError> {
    debug!(stages = ?order.names(), "running session pipeline");

    {
        let snapshot = ctx.session_snapshot();
        ctx.plugins.send(&PluginEvent::ImportBegin { session: &snapshot });
    }

    let result = pipeline::run(producer, order, cancel).await;

    {
        let snapshot = ctx.session_snapshot();
        ctx.plugins.send(&PluginEvent::CliExit { session: &snapshot });
    }

    match &result {
        Ok(PipelineOutcome::Completed) => ctx.with_state(|state| {
            state.clear_exc();
        }),
        Ok(PipelineOutcome::Cancelled) => {
            // Progress stays at the highest reached value; nothing to record.
        }
        Err(err) => {
            error!(session = %ctx.with_state(|s| s.id.clone()), error = %err, "session failed");
            let exc = SerializedException::from(err);
            ctx.with_state(|state| state.set_exc(exc));
        }
    }
    ctx.with_state(|state| state.touch());

    result
}
