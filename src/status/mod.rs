//! Folder-status broadcast channel.
//!
//! Workers publish `(hash, path, status)` transitions; the websocket layer
//! subscribes and forwards them to connected clients. Delivery is
//! at-least-once with order preserved per hash (all events for one hash are
//! emitted by the single worker owning the job at that time).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::importer::error::{ImportError, SerializedException};
use crate::jobs::JobMeta;
use crate::state::FolderStatus;

/// One folder-status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderStatusUpdate {
    pub hash: String,
    pub path: String,
    pub status: FolderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<SerializedException>,
}

/// Job lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub message: String,
    pub num_jobs: usize,
    pub job_metas: Vec<JobMeta>,
}

/// Something under an inbox tree changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSystemUpdate {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    FolderStatus(FolderStatusUpdate),
    JobStatus(JobStatusUpdate),
    FileSystem(FileSystemUpdate),
}

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out point for status events. Cloneable handle; subscribers that lag
/// behind lose the oldest events (at-least-once for live listeners).
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: StatusEvent) {
        // No receivers connected is fine; workers never block on listeners.
        let _ = self.tx.send(event);
    }

    pub fn send_folder_status(
        &self,
        hash: &str,
        path: &str,
        status: FolderStatus,
        exception: Option<SerializedException>,
    ) {
        debug!(hash, path, status = %status, "folder status update");
        self.publish(StatusEvent::FolderStatus(FolderStatusUpdate {
            hash: hash.to_string(),
            path: path.to_string(),
            status,
            exception,
        }));
    }

    pub fn send_job_update(&self, message: &str, job_metas: Vec<JobMeta>) {
        self.publish(StatusEvent::JobStatus(JobStatusUpdate {
            message: message.to_string(),
            num_jobs: job_metas.len(),
            job_metas,
        }));
    }

    pub fn send_fs_update(&self) {
        self.publish(StatusEvent::FileSystem(FileSystemUpdate {}));
    }
}

/// Run a worker function bracketed by folder-status emissions: `before` on
/// entry, `after` on success, `Failed` (with the serialized error) on
/// failure. The error is re-raised so the exception-as-value wrapper can
/// convert it.
pub async fn with_folder_status<T, F>(
    broadcaster: &StatusBroadcaster,
    hash: &str,
    path: &str,
    before: FolderStatus,
    after: FolderStatus,
    fut: F,
) -> Result<T, ImportError>
where
    F: std::future::Future<Output = Result<T, ImportError>>,
{
    broadcaster.send_folder_status(hash, path, before, None);
    match fut.await {
        Ok(value) => {
            broadcaster.send_folder_status(hash, path, after, None);
            Ok(value)
        }
        Err(err) => {
            broadcaster.send_folder_status(
                hash,
                path,
                FolderStatus::Failed,
                Some(SerializedException::from(&err)),
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(
        rx: &mut broadcast::Receiver<StatusEvent>,
    ) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_with_folder_status_success_emits_before_and_after() {
        let broadcaster = StatusBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let result = with_folder_status(
            &broadcaster,
            "h1",
            "/music/in/a",
            FolderStatus::Previewing,
            FolderStatus::Previewed,
            async { Ok::<_, ImportError>(42) },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);

        let events = collect(&mut rx);
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (StatusEvent::FolderStatus(first), StatusEvent::FolderStatus(second)) => {
                assert_eq!(first.status, FolderStatus::Previewing);
                assert_eq!(second.status, FolderStatus::Previewed);
                assert!(second.exception.is_none());
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_with_folder_status_failure_emits_failed_and_reraises() {
        let broadcaster = StatusBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let result: Result<(), _> = with_folder_status(
            &broadcaster,
            "h1",
            "/music/in/a",
            FolderStatus::Importing,
            FolderStatus::Imported,
            async { Err(ImportError::Duplicate("unresolved".into())) },
        )
        .await;
        assert!(result.is_err());

        let events = collect(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[1] {
            StatusEvent::FolderStatus(update) => {
                assert_eq!(update.status, FolderStatus::Failed);
                assert_eq!(
                    update.exception.as_ref().unwrap().kind,
                    "DuplicateException"
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_status_event_serialization() {
        let event = StatusEvent::FolderStatus(FolderStatusUpdate {
            hash: "h1".into(),
            path: "/music/in/a".into(),
            status: FolderStatus::Pending,
            exception: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "folder_status");
        assert_eq!(json["status"], "pending");
    }
}
