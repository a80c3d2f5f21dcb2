//! Publish and apply workflows.
//!
//! Every workflow that mutates remote or local state runs under the remote
//! lock (see [`crate::lock::with_lock`]). Steps run strictly one after
//! another; a failed step aborts the workflow and leaves enough state behind
//! for a plain re-run to finish the job.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, TimeDelta};
use serversync_archive::{ChangeArchive, pack_files_to, pack_tree_to};
use tracing::{info, warn};

use crate::changeset::diff;
use crate::cloud::{CloudStorage, MIME_ZIP};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::lock::{self, LockState};
use crate::snapshot::{compute_snapshot, load_snapshot, save_snapshot};
use crate::version_log::{
    self, CHANGES_PREFIX, VersionLog, VersionLogEntry, format_timestamp, missing_entries,
};

/// Full copy of the watched tree used to bootstrap an empty machine.
pub const FULL_ARCHIVE_NAME: &str = "server_files.zip";

/// What a publish did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing changed since the last snapshot.
    NoChanges,
    /// One change-set archive was uploaded and logged.
    Published {
        entry: VersionLogEntry,
        files: Vec<String>,
    },
}

/// What an apply did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The watched directory was empty and no full archive exists remotely.
    NothingToApply,
    Applied(ApplyReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Where the pre-apply backup was written, if one was taken.
    pub backup: Option<PathBuf>,
    /// Whether the full archive was extracted into an empty directory.
    pub bootstrapped: bool,
    /// Entries extracted, in the order they were applied.
    pub applied: Vec<VersionLogEntry>,
    /// Entries listed in the log whose archive could not be found.
    pub skipped: Vec<VersionLogEntry>,
}

impl ApplyReport {
    /// True when there was nothing in the remote log left to apply.
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty() && self.skipped.is_empty()
    }
}

/// Read-only view of where this machine stands.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub lock: LockState,
    /// Files changed since the last snapshot; `None` if the watched
    /// directory does not exist.
    pub pending_changes: Option<Vec<String>>,
    /// Remote entries not yet applied here, oldest first.
    pub missing_entries: Vec<VersionLogEntry>,
}

/// Runs sync workflows for one configured directory against one store.
pub struct SyncOrchestrator {
    config: SyncConfig,
    storage: Arc<dyn CloudStorage>,
}

impl SyncOrchestrator {
    pub fn new(config: SyncConfig, storage: Arc<dyn CloudStorage>) -> Self {
        Self { config, storage }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn storage(&self) -> &dyn CloudStorage {
        self.storage.as_ref()
    }

    fn container(&self) -> &str {
        &self.config.container_id
    }

    fn root(&self) -> &Path {
        &self.config.server_files_dir
    }

    /// Publishes local changes, stamped with the local wall clock.
    pub async fn publish(&self) -> SyncResult<PublishOutcome> {
        self.publish_at(Local::now().naive_local()).await
    }

    /// Publishes local changes as the change-set for `at`.
    pub async fn publish_at(&self, at: NaiveDateTime) -> SyncResult<PublishOutcome> {
        if !self.root().is_dir() {
            return Err(SyncError::Config(format!(
                "server files directory {} does not exist",
                self.root().display()
            )));
        }

        info!("Starting publish of {:?}", self.root());
        lock::with_lock(self.storage(), self.container(), self.publish_locked(at)).await
    }

    async fn publish_locked(&self, at: NaiveDateTime) -> SyncResult<PublishOutcome> {
        self.clear_staged_archives();

        let previous = load_snapshot(&self.config.snapshot_path());
        let current = compute_snapshot(self.root())?;
        let changes = diff(&previous, &current);

        if changes.is_empty() {
            info!("No changes detected.");
            return Ok(PublishOutcome::NoChanges);
        }
        info!("Detected {} changed files.", changes.len());

        let mut log = version_log::fetch_remote(self.storage(), self.container()).await?;
        let entry = self.unused_entry(&log, at).await?;

        // Left in place if the upload fails.
        let staged = self.config.state_dir.join(&entry.filename);
        pack_files_to(self.root(), changes.paths(), &staged)?;
        let archive = fs::read(&staged)?;

        info!("Uploading '{}' ({} bytes)...", entry.filename, archive.len());
        self.storage
            .create_object(self.container(), &entry.filename, MIME_ZIP, &archive)
            .await?;
        if let Err(e) = fs::remove_file(&staged) {
            warn!("Could not remove staged archive {:?}: {e}", staged);
        }

        log.push(entry.clone());
        version_log::publish(
            self.storage(),
            self.container(),
            &self.config.version_log_path(),
            &log,
        )
        .await?;

        save_snapshot(&self.config.snapshot_path(), &current)?;
        info!("Published '{}'.", entry.filename);

        Ok(PublishOutcome::Published {
            entry,
            files: changes.into_paths(),
        })
    }

    /// First entry at or after `at` whose timestamp is not in `log` and
    /// whose archive name is not taken in the container.
    async fn unused_entry(
        &self,
        log: &VersionLog,
        mut at: NaiveDateTime,
    ) -> SyncResult<VersionLogEntry> {
        loop {
            let entry = VersionLogEntry::for_changes(format_timestamp(at));
            let taken = log.contains_timestamp(&entry.timestamp)
                || self
                    .storage
                    .find_object(self.container(), &entry.filename)
                    .await?
                    .is_some();
            if !taken {
                return Ok(entry);
            }
            warn!(
                "Timestamp {} is already published; moving to the next second.",
                entry.timestamp
            );
            at += TimeDelta::seconds(1);
        }
    }

    /// Removes change archives left in the state directory by earlier
    /// failed uploads.
    fn clear_staged_archives(&self) {
        let Ok(entries) = fs::read_dir(&self.config.state_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(CHANGES_PREFIX) && name.ends_with(".zip")) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => info!("Removed stale staged archive '{name}'."),
                Err(e) => warn!("Could not remove stale staged archive '{name}': {e}"),
            }
        }
    }

    /// Brings the watched directory up to date with the remote log.
    ///
    /// With `backup` set, a populated watched directory is zipped to the
    /// backup slot before anything is extracted.
    pub async fn apply(&self, backup: bool) -> SyncResult<ApplyOutcome> {
        info!("Starting apply into {:?}", self.root());
        lock::with_lock(self.storage(), self.container(), self.apply_locked(backup)).await
    }

    async fn apply_locked(&self, backup: bool) -> SyncResult<ApplyOutcome> {
        let root = self.root();
        let populated = has_entries(root)?;
        let mut report = ApplyReport::default();

        if backup && populated {
            report.backup = Some(self.write_backup()?);
        }

        if !populated {
            if !self.bootstrap().await? {
                info!("No '{FULL_ARCHIVE_NAME}' found remotely. Nothing to apply.");
                return Ok(ApplyOutcome::NothingToApply);
            }
            report.bootstrapped = true;
        }

        let version_log_path = self.config.version_log_path();
        let mut local_log = version_log::load_local(&version_log_path);
        let remote_log = version_log::fetch_remote(self.storage(), self.container()).await?;
        let missing = missing_entries(&local_log, &remote_log);

        if missing.is_empty() {
            info!("Already up to date.");
        } else {
            info!("{} change-sets to apply.", missing.len());
        }

        for entry in missing {
            let Some(file) = self
                .storage
                .find_object(self.container(), &entry.filename)
                .await?
            else {
                warn!("Archive '{}' is listed but missing remotely; skipping.", entry.filename);
                report.skipped.push(entry);
                continue;
            };

            info!("Applying '{}'...", entry.filename);
            let bytes = self.storage.download(&file.id).await?;
            fs::create_dir_all(root)?;
            ChangeArchive::from_bytes(&bytes)?.extract_to(root)?;

            local_log.push(entry.clone());
            version_log::save_local(&version_log_path, &local_log)?;
            report.applied.push(entry);
        }

        // Leave the snapshot alone otherwise so unpublished local edits still
        // show up in the next publish.
        if !report.applied.is_empty() {
            save_snapshot(&self.config.snapshot_path(), &compute_snapshot(root)?)?;
        }

        Ok(ApplyOutcome::Applied(report))
    }

    /// Extracts the full archive into the watched directory. Returns false
    /// if there is no full archive.
    async fn bootstrap(&self) -> SyncResult<bool> {
        let Some(file) = self
            .storage
            .find_object(self.container(), FULL_ARCHIVE_NAME)
            .await?
        else {
            return Ok(false);
        };

        info!("Downloading '{FULL_ARCHIVE_NAME}'...");
        let bytes = self.storage.download(&file.id).await?;
        fs::create_dir_all(self.root())?;
        let written = ChangeArchive::from_bytes(&bytes)?.extract_to(self.root())?;
        info!("Extracted {} files from '{FULL_ARCHIVE_NAME}'.", written.len());

        save_snapshot(&self.config.snapshot_path(), &compute_snapshot(self.root())?)?;
        Ok(true)
    }

    fn write_backup(&self) -> SyncResult<PathBuf> {
        let path = self.config.backup_path();
        info!("Backing up {:?} to {:?}...", self.root(), path);
        pack_tree_to(self.root(), &path)?;
        Ok(path)
    }

    /// Reports lock state, pending local changes and unapplied remote
    /// entries. Takes no lock and writes nothing.
    pub async fn status(&self) -> SyncResult<StatusReport> {
        let lock = lock::inspect(self.storage(), self.container()).await?;

        let pending_changes = if self.root().is_dir() {
            let previous = load_snapshot(&self.config.snapshot_path());
            let current = compute_snapshot(self.root())?;
            Some(diff(&previous, &current).into_paths())
        } else {
            None
        };

        let local_log = version_log::load_local(&self.config.version_log_path());
        let remote_log = version_log::fetch_remote(self.storage(), self.container()).await?;

        Ok(StatusReport {
            lock,
            pending_changes,
            missing_entries: missing_entries(&local_log, &remote_log),
        })
    }

    /// Clears the lock regardless of who holds it.
    pub async fn unlock(&self) -> SyncResult<usize> {
        let removed = lock::release(self.storage(), self.container()).await?;
        if removed == 0 {
            info!("Lock was not held.");
        } else {
            info!("Removed {removed} lock marker(s).");
        }
        Ok(removed)
    }
}

/// False if `dir` is missing or has no entries.
fn has_entries(dir: &Path) -> SyncResult<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
