//! Snapshot-based sync of a server directory through a shared blob store.
//!
//! One machine publishes, others apply:
//!
//! 1. **Publish**: fingerprint every file in the watched directory, diff
//!    against the last snapshot, upload the changed files as a
//!    `changes_<timestamp>.zip` archive and append it to the shared
//!    version log.
//! 2. **Apply**: bootstrap an empty directory from `server_files.zip`, then
//!    download and extract, oldest first, every archive in the version log
//!    this machine has not applied yet.
//!
//! Both workflows run under an advisory lock object in the remote
//! container, so only one sync touches the container at a time.
//!
//! ## Components
//!
//! - **Snapshot**: per-file modification times ([`snapshot`])
//! - **Change set**: files that differ between two snapshots ([`changeset`])
//! - **Version log**: ordered record of published change-sets ([`version_log`])
//! - **Lock**: marker object in the remote container ([`lock`])
//! - **Storage**: Google Drive or a local directory ([`cloud`])
//! - **Orchestrator**: the publish and apply workflows ([`SyncOrchestrator`])
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use serversync_sync::{LocalStorage, SyncConfig, SyncOrchestrator};
//!
//! # async fn run() -> serversync_sync::SyncResult<()> {
//! let config = SyncConfig::with_layout("shared", Path::new("/srv/mc"), Path::new("/srv/mc/.sync"));
//! let storage = Arc::new(LocalStorage::new("/mnt/share"));
//! let orchestrator = SyncOrchestrator::new(config, storage);
//! orchestrator.publish().await?;
//! # Ok(())
//! # }
//! ```

pub mod changeset;
pub mod cloud;
pub mod config;
mod error;
pub mod lock;
mod orchestrator;
mod persist;
pub mod snapshot;
pub mod version_log;

pub use changeset::{ChangeSet, diff};
pub use cloud::{CloudFile, CloudStorage, GoogleDriveStorage, LocalStorage, open_storage};
pub use config::{BackendConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use lock::{AcquireOutcome, LockInfo, LockState};
pub use orchestrator::{
    ApplyOutcome, ApplyReport, FULL_ARCHIVE_NAME, PublishOutcome, StatusReport, SyncOrchestrator,
};
pub use persist::{write_atomic, write_json_atomic};
pub use snapshot::{Fingerprint, Snapshot, compute_snapshot, load_snapshot, save_snapshot};
pub use version_log::{VersionLog, VersionLogEntry, missing_entries};
