//! The version log: an append-only, timestamp-ordered list of published
//! change-set archives.
//!
//! The remote copy (`version_log.json` in the container) is the source of
//! truth and is rewritten whole on every publish. Each machine keeps a local
//! cache listing the entries it has applied (or published), which is what
//! [`missing_entries`] compares against.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cloud::{CloudStorage, MIME_JSON};
use crate::error::{SyncError, SyncResult};
use crate::persist::write_json_atomic;

/// Name of the shared log object in the remote container.
pub const REMOTE_VERSION_LOG: &str = "version_log.json";

/// `YYYYMMDD_HHMMSS`; sorts lexicographically in time order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Formats a wall-clock time as a version timestamp.
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Prefix shared by every change-set archive name.
pub const CHANGES_PREFIX: &str = "changes_";

/// Archive name for the change-set published at `timestamp`.
pub fn changes_filename(timestamp: &str) -> String {
    format!("{CHANGES_PREFIX}{timestamp}.zip")
}

/// One published change-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionLogEntry {
    pub timestamp: String,
    pub filename: String,
}

impl VersionLogEntry {
    pub fn new(timestamp: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            filename: filename.into(),
        }
    }

    /// Entry for a change archive named after its timestamp.
    pub fn for_changes(timestamp: impl Into<String>) -> Self {
        let timestamp = timestamp.into();
        let filename = changes_filename(&timestamp);
        Self { timestamp, filename }
    }
}

/// Ordered sequence of published entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionLog {
    entries: Vec<VersionLogEntry>,
}

impl VersionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[VersionLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry. Existing entries are never modified.
    pub fn push(&mut self, entry: VersionLogEntry) {
        self.entries.push(entry);
    }

    pub fn contains_timestamp(&self, timestamp: &str) -> bool {
        self.entries.iter().any(|e| e.timestamp == timestamp)
    }

    /// The most recent timestamp in the log, if any.
    pub fn latest_timestamp(&self) -> Option<&str> {
        self.entries.iter().map(|e| e.timestamp.as_str()).max()
    }
}

impl FromIterator<VersionLogEntry> for VersionLog {
    fn from_iter<I: IntoIterator<Item = VersionLogEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Entries of `remote` whose timestamp does not appear in `local`, in
/// ascending timestamp order. Change-sets must be replayed in this order:
/// a later archive may carry newer copies of files from an earlier one.
pub fn missing_entries(local: &VersionLog, remote: &VersionLog) -> Vec<VersionLogEntry> {
    let known: HashSet<&str> = local.entries.iter().map(|e| e.timestamp.as_str()).collect();
    let mut missing: Vec<VersionLogEntry> = remote
        .entries
        .iter()
        .filter(|e| !known.contains(e.timestamp.as_str()))
        .cloned()
        .collect();
    missing.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    missing
}

/// Loads the local cache, treating a missing, blank, or corrupt file as empty.
pub fn load_local(path: &Path) -> VersionLog {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return VersionLog::new(),
        Err(e) => {
            warn!("Could not read {:?}: {e}. Starting with an empty local version log.", path);
            return VersionLog::new();
        }
    };

    match parse_local(path, &raw) {
        Ok(log) => log,
        Err(e) => {
            warn!("{e}. Starting with an empty local version log.");
            VersionLog::new()
        }
    }
}

/// Parses local cache content. Blank content is an empty log.
pub fn parse_local(path: &Path, raw: &str) -> SyncResult<VersionLog> {
    if raw.trim().is_empty() {
        return Ok(VersionLog::new());
    }
    serde_json::from_str(raw).map_err(|e| SyncError::LocalStateCorrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Persists the local cache atomically.
pub fn save_local(path: &Path, log: &VersionLog) -> SyncResult<()> {
    write_json_atomic(path, log)
}

/// Downloads the shared log. No remote object means nobody has published
/// yet and yields an empty log; unparsable content is fatal.
pub async fn fetch_remote(
    storage: &dyn CloudStorage,
    container_id: &str,
) -> SyncResult<VersionLog> {
    let Some(file) = storage.find_object(container_id, REMOTE_VERSION_LOG).await? else {
        info!("'{REMOTE_VERSION_LOG}' not found remotely. Starting with an empty version log.");
        return Ok(VersionLog::new());
    };

    info!("Downloading '{REMOTE_VERSION_LOG}'...");
    let bytes = storage.download(&file.id).await?;
    serde_json::from_slice(&bytes).map_err(|e| SyncError::RemoteLogCorrupt(e.to_string()))
}

/// Writes the full log to the local cache and to the remote object,
/// creating the remote object on first publish and overwriting it after.
pub async fn publish(
    storage: &dyn CloudStorage,
    container_id: &str,
    local_path: &Path,
    log: &VersionLog,
) -> SyncResult<()> {
    save_local(local_path, log)?;

    let content = serde_json::to_vec(log)?;
    match storage.find_object(container_id, REMOTE_VERSION_LOG).await? {
        Some(file) => {
            storage.update_object(&file.id, MIME_JSON, &content).await?;
            info!("'{REMOTE_VERSION_LOG}' updated remotely ({} entries).", log.len());
        }
        None => {
            storage
                .create_object(container_id, REMOTE_VERSION_LOG, MIME_JSON, &content)
                .await?;
            info!("'{REMOTE_VERSION_LOG}' created remotely ({} entries).", log.len());
        }
    }
    Ok(())
}
