//! The import-session state machine: stages, variants and the shared
//! execution engine.

pub mod error;
pub mod session;
pub mod stages;
pub mod variants;

pub use error::{ImportError, SerializedException};
pub use session::SessionContext;
pub use stages::CandidateChoice;
pub use variants::{
    AddCandidatesSession, AutoImportSession, BootlegImportSession, ImportChosenSession,
    PreviewSession, UndoSession,
};
