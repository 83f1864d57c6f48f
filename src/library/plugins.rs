//! Plugin event channel.
//!
//! The library notifies registered plugins at fixed points of every pipeline
//! run. Handlers are opaque; the only reply the core interprets is extra
//! candidate offers sent from `import_task_before_choice`.

use std::sync::Arc;

use tracing::debug;

use crate::library::{LibraryAlbum, LibraryItem};
use crate::matcher::MatchCandidate;
use crate::state::{SessionState, TaskState};

/// Events sent over the plugin channel, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginEventKind {
    ImportBegin,
    ImportTaskCreated,
    ImportTaskStart,
    ImportTaskBeforeChoice,
    ImportTaskChoice,
    ImportTaskApply,
    ItemRemoved,
    AlbumRemoved,
    CliExit,
}

impl PluginEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginEventKind::ImportBegin => "import_begin",
            PluginEventKind::ImportTaskCreated => "import_task_created",
            PluginEventKind::ImportTaskStart => "import_task_start",
            PluginEventKind::ImportTaskBeforeChoice => "import_task_before_choice",
            PluginEventKind::ImportTaskChoice => "import_task_choice",
            PluginEventKind::ImportTaskApply => "import_task_apply",
            PluginEventKind::ItemRemoved => "item_removed",
            PluginEventKind::AlbumRemoved => "album_removed",
            PluginEventKind::CliExit => "cli_exit",
        }
    }
}

/// Event payload handed to plugin handlers.
pub enum PluginEvent<'a> {
    ImportBegin { session: &'a SessionState },
    ImportTaskCreated { task: &'a TaskState },
    ImportTaskStart { task: &'a TaskState },
    ImportTaskBeforeChoice { task: &'a TaskState },
    ImportTaskChoice { task: &'a TaskState },
    ImportTaskApply { task: &'a TaskState },
    ItemRemoved { item: &'a LibraryItem },
    AlbumRemoved { album: &'a LibraryAlbum },
    CliExit { session: &'a SessionState },
}

impl PluginEvent<'_> {
    pub fn kind(&self) -> PluginEventKind {
        match self {
            PluginEvent::ImportBegin { .. } => PluginEventKind::ImportBegin,
            PluginEvent::ImportTaskCreated { .. } => PluginEventKind::ImportTaskCreated,
            PluginEvent::ImportTaskStart { .. } => PluginEventKind::ImportTaskStart,
            PluginEvent::ImportTaskBeforeChoice { .. } => PluginEventKind::ImportTaskBeforeChoice,
            PluginEvent::ImportTaskChoice { .. } => PluginEventKind::ImportTaskChoice,
            PluginEvent::ImportTaskApply { .. } => PluginEventKind::ImportTaskApply,
            PluginEvent::ItemRemoved { .. } => PluginEventKind::ItemRemoved,
            PluginEvent::AlbumRemoved { .. } => PluginEventKind::AlbumRemoved,
            PluginEvent::CliExit { .. } => PluginEventKind::CliExit,
        }
    }
}

/// Handler reply. Only `ExtraCandidates` is interpreted, and only when sent
/// from `import_task_before_choice`.
pub enum PluginReply {
    ExtraCandidates(Vec<MatchCandidate>),
}

pub trait PluginHandler: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, event: &PluginEvent<'_>) -> Option<PluginReply>;
}

/// Registry of named plugin handlers.
#[derive(Default, Clone)]
pub struct PluginHub {
    handlers: Vec<Arc<dyn PluginHandler>>,
}

impl PluginHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn PluginHandler>) {
        debug!(plugin = handler.name(), "registered plugin handler");
        self.handlers.push(handler);
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    /// Send an event to every handler, collecting replies in registration
    /// order.
    pub fn send(&self, event: &PluginEvent<'_>) -> Vec<PluginReply> {
        self.handlers
            .iter()
            .filter_map(|h| h.handle(event))
            .collect()
    }

    /// Extra-candidate offers from `import_task_before_choice`.
    pub fn offers_before_choice(&self, task: &TaskState) -> Vec<MatchCandidate> {
        let mut offers = Vec::new();
        for reply in self.send(&PluginEvent::ImportTaskBeforeChoice { task }) {
            let PluginReply::ExtraCandidates(candidates) = reply;
            offers.extend(candidates);
        }
        offers
    }
}
