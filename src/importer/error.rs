//! Error taxonomy of the import core and the exception-as-value wire form.
//!
//! User-facing errors are returned as job results rather than failing the
//! queue; infrastructure errors propagate normally so the queue can retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by sessions, stages and enqueue entry points.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Wrong-state transition or bad parameters. Maps to a 400-class answer.
    #[error("{0}")]
    InvalidUsage(String),

    /// Missing folder, session or id. Maps to a 404-class answer.
    #[error("{0}")]
    NotFound(String),

    /// Database or disk state contradicts what the session recorded.
    #[error("{0}")]
    Integrity(String),

    /// A duplicate could not be resolved with the configured action.
    #[error("{0}")]
    Duplicate(String),

    /// The metadata source returned no candidates. Recoverable by running
    /// an add-candidates job with explicit search parameters.
    #[error("no candidates found for {0}")]
    NoCandidatesFound(String),

    /// The best candidate's distance exceeds the auto-import threshold.
    #[error("best candidate distance {distance:.3} exceeds threshold {threshold:.3}")]
    MatchBelowThreshold { distance: f64, threshold: f64 },

    /// Malformed configuration; aborts startup.
    #[error("{0}")]
    Configuration(String),

    /// The job was cancelled before it finished.
    #[error("aborted")]
    Aborted,

    /// Transport-level failure (store, broker). Propagates so the queue can
    /// retry the job.
    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

impl ImportError {
    /// Infrastructure errors are not converted to job results.
    pub fn is_infra(&self) -> bool {
        matches!(self, ImportError::Infra(_))
    }

    /// Short stable type tag used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::InvalidUsage(_) => "InvalidUsageException",
            ImportError::NotFound(_) => "NotFoundException",
            ImportError::Integrity(_) => "IntegrityException",
            ImportError::Duplicate(_) => "DuplicateException",
            ImportError::NoCandidatesFound(_) => "NoCandidatesFoundException",
            ImportError::MatchBelowThreshold { .. } => "MatchThresholdException",
            ImportError::Configuration(_) => "ConfigurationException",
            ImportError::Aborted => "AbortedException",
            ImportError::Infra(_) => "InfrastructureException",
        }
    }

    /// HTTP status class used by the server boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            ImportError::InvalidUsage(_) | ImportError::Duplicate(_) => 400,
            ImportError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Infra(err.into())
    }
}

/// Wire form of an error, carried in job results, persisted session failures
/// and folder-status broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedException {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl SerializedException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            description: None,
            trace: None,
        }
    }
}

impl From<&ImportError> for SerializedException {
    fn from(err: &ImportError) -> Self {
        let description = match err {
            ImportError::Infra(inner) => Some(format!("{inner:#}")),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            description,
            trace: None,
        }
    }
}
