//! Durable session storage.

mod schema;
mod session_store;

pub use schema::{SESSION_SCHEMA_SQL, SESSION_SCHEMA_VERSION};
pub use session_store::{FolderRecord, SessionStore, SqliteSessionStore};
