//! Error types for the sync layer.

use serversync_archive::ArchiveError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another workflow holds the remote lock.
    #[error("another synchronization is in progress (lock held in container {container})")]
    LockHeld { container: String },

    /// An expected remote object does not exist.
    #[error("remote object not found: {0}")]
    RemoteNotFound(String),

    /// The shared version log could not be parsed.
    #[error("remote version log is corrupt: {0}")]
    RemoteLogCorrupt(String),

    /// A local state file could not be parsed.
    #[error("local state file {path} is corrupt: {reason}")]
    LocalStateCorrupt { path: String, reason: String },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The storage provider lacks the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive packing or extraction error.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl SyncError {
    /// Returns true if this error means the workflow was refused because
    /// another one is running.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, SyncError::LockHeld { .. })
    }
}
