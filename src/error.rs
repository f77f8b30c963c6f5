//! Error types for vault synchronization
//!
//! Errors are classified by blast radius:
//! - Pass-aborting: transport/auth failures during the remote fetch and
//!   settings store failures; the whole pass stops and the watermark stays put
//! - Per-entity: storage failures while persisting one document, recorded in
//!   the pass report while remaining entities still process
//! - Fail-open: malformed frontmatter or folder config parses to an empty
//!   structure with a logged warning, never an error

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // Transport: pass-aborting during fetch, per-entity during a patch flush
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote API rate limit exceeded")]
    RateLimited,

    #[error("Remote API error: {0}")]
    Api(String),

    // Storage: always per-entity
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Document not found: {0}")]
    NotFound(String),

    // Rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    // Re-entrancy guard: a second trigger while a pass runs is a no-op
    #[error("A sync pass is already in progress")]
    PassInProgress,

    // Manual policy returned an incomplete or invalid winner map
    #[error("Conflict resolution incomplete: {resolved} of {total} conflicts have a winner")]
    UnresolvedConflicts { resolved: usize, total: usize },

    #[error("Settings error: {0}")]
    Settings(String),
}

impl SyncError {
    /// True for transport-class failures (remote unreachable, rate-limited,
    /// malformed response). These abort a pass when hit during fetch and
    /// skip a single item when hit during a batch mutation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::RateLimited | SyncError::Api(_)
        )
    }

    /// True if a caller may reasonably retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::RateLimited | SyncError::PassInProgress
        )
    }

    /// True if this error ends the whole pass rather than one entity.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::RateLimited
                | SyncError::Api(_)
                | SyncError::Settings(_)
                | SyncError::PassInProgress
        )
    }

    /// Storage error helper with the offending vault path attached.
    pub fn storage(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage {
            path: String::new(),
            message: err.to_string(),
        }
    }
}
