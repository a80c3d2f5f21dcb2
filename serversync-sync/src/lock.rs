//! Advisory lock built from a marker object in the remote container.
//!
//! `UNLOCKED -> LOCKED -> UNLOCKED`. The lock is held while an object named
//! [`LOCK_MARKER_NAME`] exists. Acquisition never waits: a held lock makes
//! the caller abort.
//!
//! On stores with an atomic create-if-absent the marker is created in one
//! step. Elsewhere acquisition is check-then-create, and two clients that
//! both observe "absent" can both believe they hold the lock. There is no
//! expiry either: a process that dies while holding the lock leaves the
//! marker behind until someone runs `unlock`.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cloud::{CloudStorage, MIME_TEXT};
use crate::error::{SyncError, SyncResult};

/// Reserved name of the marker object.
pub const LOCK_MARKER_NAME: &str = "sync.lock";

/// Who created the marker; stored as the marker's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub host: String,
    pub pid: u32,
    pub acquired_at: String,
}

impl LockInfo {
    /// Describes the current process.
    pub fn current() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            host,
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Result of a non-blocking acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    AlreadyLocked,
}

/// Observed lock state of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    /// Locked; holder details are `None` when the marker has no readable
    /// content (e.g. one created by hand).
    Locked(Option<LockInfo>),
}

/// Tries to take the lock once.
pub async fn try_acquire(
    storage: &dyn CloudStorage,
    container_id: &str,
) -> SyncResult<AcquireOutcome> {
    let marker = serde_json::to_vec(&LockInfo::current())?;

    if storage.supports_exclusive_create() {
        let created = storage
            .create_object_exclusive(container_id, LOCK_MARKER_NAME, MIME_TEXT, &marker)
            .await?;
        return Ok(match created {
            Some(_) => AcquireOutcome::Acquired,
            None => AcquireOutcome::AlreadyLocked,
        });
    }

    let existing = storage
        .list_objects(container_id, Some(LOCK_MARKER_NAME))
        .await?;
    if !existing.is_empty() {
        return Ok(AcquireOutcome::AlreadyLocked);
    }

    storage
        .create_object(container_id, LOCK_MARKER_NAME, MIME_TEXT, &marker)
        .await?;
    Ok(AcquireOutcome::Acquired)
}

/// Deletes every marker object in the container. Returns how many were
/// removed; zero is not an error.
pub async fn release(storage: &dyn CloudStorage, container_id: &str) -> SyncResult<usize> {
    let markers = storage
        .list_objects(container_id, Some(LOCK_MARKER_NAME))
        .await?;
    if markers.len() > 1 {
        warn!("Found {} lock markers; removing all of them.", markers.len());
    }
    for marker in &markers {
        storage.delete(&marker.id).await?;
    }
    Ok(markers.len())
}

/// Reports whether the container is locked and by whom.
pub async fn inspect(storage: &dyn CloudStorage, container_id: &str) -> SyncResult<LockState> {
    let Some(marker) = storage.find_object(container_id, LOCK_MARKER_NAME).await? else {
        return Ok(LockState::Unlocked);
    };
    let info = storage
        .download(&marker.id)
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());
    Ok(LockState::Locked(info))
}

/// Runs `body` while holding the lock.
///
/// Returns [`SyncError::LockHeld`] without polling `body` if the lock is
/// taken. Otherwise the lock is released after `body` finishes, whether it
/// succeeded or not. If both `body` and the release fail, the body's error
/// is returned and the release error is logged.
pub async fn with_lock<T, F>(
    storage: &dyn CloudStorage,
    container_id: &str,
    body: F,
) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match try_acquire(storage, container_id).await? {
        AcquireOutcome::Acquired => info!("Lock acquired."),
        AcquireOutcome::AlreadyLocked => {
            warn!("Another synchronization is in progress.");
            return Err(SyncError::LockHeld {
                container: container_id.to_string(),
            });
        }
    }

    let result = body.await;

    match release(storage, container_id).await {
        Ok(_) => info!("Lock released."),
        Err(e) if result.is_err() => error!("Failed to release lock: {e}"),
        Err(e) => return Err(e),
    }

    result
}
