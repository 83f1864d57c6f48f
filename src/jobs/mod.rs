//! Job orchestration: queues, dispatcher and worker functions.

mod dispatcher;
mod models;
mod worker;

pub use dispatcher::JobDispatcher;
pub use models::{EnqueueKind, JobMeta, JobPayload, JobRecord, JobStatus};
pub use worker::WorkerEnv;
