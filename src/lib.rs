//! Tarantella Import Server Library
//!
//! Web-fronted orchestration around a music-library importer: folder
//! fingerprinting, the import-session state machine, job queues, the inbox
//! watcher and the status fan-out. The matching heuristics and the library's
//! tag handling live behind capability traits (`matcher::MetadataSource`,
//! `library::MusicLibrary`).

pub mod config;
pub mod fingerprint;
pub mod importer;
pub mod jobs;
pub mod library;
pub mod matcher;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod status;
pub mod store;
pub mod watcher;

// Re-export commonly used types for convenience
pub use importer::{ImportError, SerializedException};
pub use jobs::{EnqueueKind, JobDispatcher, JobPayload, WorkerEnv};
pub use state::{FolderStatus, Progress, SessionState};
pub use store::{SessionStore, SqliteSessionStore};
