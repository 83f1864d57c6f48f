//! Session variants.
//!
//! Each variant assembles a `StageOrder` from the stage primitives plus
//! progress-tagging wrappers, validates its preconditions, and hands off to
//! the shared executor. Persistence is the caller's concern: workers save
//! the session state in their teardown path whatever the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::importer::error::ImportError;
use crate::importer::session::{run_session, SessionContext};
use crate::importer::stages::{
    ApplyStage, CandidateChoice, ChoiceMode, ChooseCandidateStage, ExistingTasksProducer,
    GroupAlbumsStage, IdentifyDuplicatesStage, LookupCandidatesStage, ManipulateFilesStage,
    MarkProgressStage, MoveFilesBackStage, ReadTasksProducer, RemoveLibraryEntriesStage,
    SearchCandidatesStage, TaskStartStage, with_progress,
};
use crate::matcher::SearchQuery;
use crate::pipeline::{PipelineOutcome, Producer, StageOrder};
use crate::state::{DuplicateAction, Progress};

/// Fetch candidates for a folder and persist them for later choice.
///
/// The offering/user-query stages of an interactive import are omitted;
/// terminal progress is `PreviewCompleted`.
pub struct PreviewSession {
    ctx: Arc<SessionContext>,
}

impl PreviewSession {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineOutcome, ImportError> {
        let ctx = &self.ctx;
        let mut order = StageOrder::new();
        order.append(TaskStartStage::boxed(ctx));
        if ctx.settings.group_albums {
            order.append(with_progress(
                ctx,
                Progress::GroupingAlbums,
                GroupAlbumsStage::boxed(ctx),
            ));
        }
        order.append(with_progress(
            ctx,
            Progress::LookingUpCandidates,
            LookupCandidatesStage::boxed(ctx),
        ));
        order.append(with_progress(
            ctx,
            Progress::IdentifyingDuplicates,
            IdentifyDuplicatesStage::boxed(ctx),
        ));
        order.append(MarkProgressStage::boxed(
            ctx,
            "mark_preview_completed",
            Progress::PreviewCompleted,
            true,
        ));

        let producer = Box::new(ReadTasksProducer::new(ctx));
        run_session(ctx, producer, order, cancel).await
    }
}

/// Merge targeted-search candidates into a completed preview.
///
/// Updates the existing session in place; no new revision is written.
pub struct AddCandidatesSession {
    ctx: Arc<SessionContext>,
    query: SearchQuery,
}

impl AddCandidatesSession {
    pub fn new(ctx: Arc<SessionContext>, query: SearchQuery) -> Self {
        Self { ctx, query }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineOutcome, ImportError> {
        let ctx = &self.ctx;

        let progress = ctx.with_state(|state| state.progress());
        if progress.progress < Progress::PreviewCompleted {
            return Err(ImportError::InvalidUsage(format!(
                "session is not in preview completed state (progress {:?})",
                progress.progress
            )));
        }

        let mut order = StageOrder::new();
        order.append(SearchCandidatesStage::boxed(ctx, self.query.clone()));
        // Fresh candidates need their duplicate ids; progress stays as-is.
        order.append(IdentifyDuplicatesStage::boxed(ctx));

        let producer = Box::new(ExistingTasksProducer::new(ctx));
        run_session(ctx, producer, order, cancel).await
    }
}

fn import_preconditions(ctx: &Arc<SessionContext>) -> Result<(), ImportError> {
    let all_previewed = ctx.with_state(|state| {
        !state.tasks.is_empty()
            && state
                .tasks
                .iter()
                .all(|t| t.progress.progress == Progress::PreviewCompleted)
    });
    if !all_previewed {
        return Err(ImportError::InvalidUsage(
            "Cannot redo imports. Try undo and/or retag!".to_string(),
        ));
    }
    Ok(())
}

fn import_stage_order(
    ctx: &Arc<SessionContext>,
    mode: ChoiceMode,
    duplicate_actions: HashMap<String, DuplicateAction>,
) -> StageOrder<String> {
    let mut order = StageOrder::new();
    order.append(TaskStartStage::boxed(ctx));
    order.append(with_progress(
        ctx,
        Progress::OfferingMatches,
        ChooseCandidateStage::boxed(ctx, mode, duplicate_actions),
    ));
    order.append(with_progress(ctx, Progress::Importing, ApplyStage::boxed(ctx)));
    order.append(with_progress(
        ctx,
        Progress::ManipulatingFiles,
        ManipulateFilesStage::boxed(ctx),
    ));
    order.append(MarkProgressStage::boxed(
        ctx,
        "mark_import_completed",
        Progress::ImportCompleted,
        true,
    ));
    order
}

/// Import candidates chosen after a completed preview.
pub struct ImportChosenSession {
    ctx: Arc<SessionContext>,
    choices: HashMap<String, CandidateChoice>,
    duplicate_actions: HashMap<String, DuplicateAction>,
}

impl ImportChosenSession {
    pub fn new(
        ctx: Arc<SessionContext>,
        choices: HashMap<String, CandidateChoice>,
        duplicate_actions: HashMap<String, DuplicateAction>,
    ) -> Self {
        Self {
            ctx,
            choices,
            duplicate_actions,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineOutcome, ImportError> {
        import_preconditions(&self.ctx)?;

        let order = import_stage_order(
            &self.ctx,
            ChoiceMode::Explicit(self.choices.clone()),
            self.duplicate_actions.clone(),
        );
        let producer = Box::new(ExistingTasksProducer::new(&self.ctx));
        run_session(&self.ctx, producer, order, cancel).await
    }
}

/// Import the best candidate of every task, gated by the distance threshold.
///
/// Runs after the dependent preview job; a task whose best candidate sits
/// above the threshold fails the session and nothing is committed for it.
pub struct AutoImportSession {
    ctx: Arc<SessionContext>,
    threshold: f64,
    duplicate_actions: HashMap<String, DuplicateAction>,
}

impl AutoImportSession {
    pub fn new(
        ctx: Arc<SessionContext>,
        threshold: f64,
        duplicate_actions: HashMap<String, DuplicateAction>,
    ) -> Self {
        Self {
            ctx,
            threshold,
            duplicate_actions,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineOutcome, ImportError> {
        import_preconditions(&self.ctx)?;

        let order = import_stage_order(
            &self.ctx,
            ChoiceMode::Auto {
                threshold: self.threshold,
            },
            self.duplicate_actions.clone(),
        );
        let producer = Box::new(ExistingTasksProducer::new(&self.ctx));
        run_session(&self.ctx, producer, order, cancel).await
    }
}

/// Import a release that cannot be matched: no metadata lookup, every task
/// takes its asis candidate.
pub struct BootlegImportSession {
    ctx: Arc<SessionContext>,
}

impl BootlegImportSession {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineOutcome, ImportError> {
        let ctx = &self.ctx;

        let mut order = StageOrder::new();
        order.append(TaskStartStage::boxed(ctx));
        if ctx.settings.group_albums {
            order.append(with_progress(
                ctx,
                Progress::GroupingAlbums,
                GroupAlbumsStage::boxed(ctx),
            ));
        }
        order.append(with_progress(
            ctx,
            Progress::OfferingMatches,
            ChooseCandidateStage::boxed(ctx, ChoiceMode::Bootleg, HashMap::new()),
        ));
        order.append(with_progress(ctx, Progress::Importing, ApplyStage::boxed(ctx)));
        order.append(with_progress(
            ctx,
            Progress::ManipulatingFiles,
            ManipulateFilesStage::boxed(ctx),
        ));
        order.append(MarkProgressStage::boxed(
            ctx,
            "mark_import_completed",
            Progress::ImportCompleted,
            true,
        ));

        // A bootleg import may start from a fresh session (no preview ran)
        // or reuse the tasks of an existing one.
        let has_tasks = ctx.with_state(|state| !state.tasks.is_empty());
        let producer: Box<dyn Producer<String>> = if has_tasks {
            Box::new(ExistingTasksProducer::new(ctx))
        } else {
            Box::new(ReadTasksProducer::new(ctx))
        };

        run_session(ctx, producer, order, cancel).await
    }
}

/// Roll an import back: remove library entries, restore (or delete) files.
pub struct UndoSession {
    ctx: Arc<SessionContext>,
    delete_files: bool,
}

impl UndoSession {
    pub fn new(ctx: Arc<SessionContext>, delete_files: bool) -> Self {
        Self { ctx, delete_files }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineOutcome, ImportError> {
        let ctx = &self.ctx;

        let undoable = ctx.with_state(|state| {
            !state.tasks.is_empty()
                && state.tasks.iter().all(|t| {
                    t.progress.progress == Progress::ImportCompleted && t.old_paths.is_some()
                })
        });
        if !undoable {
            return Err(ImportError::InvalidUsage(
                "Cannot undo if never imported".to_string(),
            ));
        }

        let mut order = StageOrder::new();
        order.append(with_progress(
            ctx,
            Progress::Deleting,
            RemoveLibraryEntriesStage::boxed(ctx, self.delete_files),
        ));
        order.append(MoveFilesBackStage::boxed(ctx, self.delete_files));
        order.append(MarkProgressStage::boxed(
            ctx,
            "mark_deletion_completed",
            Progress::DeletionCompleted,
            true,
        ));

        let producer = Box::new(ExistingTasksProducer::new(ctx));
        run_session(ctx, producer, order, cancel).await
    }
}
