//! Snapshot tracking.
//!
//! A [`Snapshot`] maps every regular file below the watched directory,
//! keyed by slash-separated relative path, to its modification time in
//! seconds since the Unix epoch. Two snapshots are comparable only when
//! taken of the same root.
//!
//! Loading is fail-open: a missing, blank, or unparsable snapshot file
//! yields an empty snapshot, which turns the next publish into a full one.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serversync_archive::relative_slash_path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{SyncError, SyncResult};
use crate::persist::write_json_atomic;

/// Change fingerprint of a file: its mtime as fractional epoch seconds.
pub type Fingerprint = f64;

/// Fingerprints of every file in the watched tree at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    files: BTreeMap<String, Fingerprint>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, fingerprint: Fingerprint) {
        self.files.insert(path.into(), fingerprint);
    }

    pub fn get(&self, path: &str) -> Option<Fingerprint> {
        self.files.get(path).copied()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterates entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Fingerprint)> {
        self.files.iter().map(|(p, f)| (p.as_str(), *f))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<(S, Fingerprint)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (S, Fingerprint)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().map(|(p, f)| (p.into(), f)).collect(),
        }
    }
}

/// Walks `root` and fingerprints every regular file.
///
/// Fails with an I/O error if `root` does not exist. Never creates it.
pub fn compute_snapshot(root: &Path) -> SyncResult<Snapshot> {
    let meta = fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(SyncError::Io(std::io::Error::new(
            ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        )));
    }

    let mut snapshot = Snapshot::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| SyncError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_slash_path(root, entry.path()) else {
            continue;
        };
        let modified = entry
            .metadata()
            .map_err(|e| SyncError::Io(e.into()))?
            .modified()?;
        snapshot.insert(relative, fingerprint(modified));
    }

    debug!("Snapshot of {:?}: {} files", root, snapshot.len());
    Ok(snapshot)
}

/// Loads a persisted snapshot, falling back to empty on any problem.
pub fn load_snapshot(path: &Path) -> Snapshot {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Snapshot::new(),
        Err(e) => {
            warn!("Could not read {:?}: {e}. Proceeding with empty previous state.", path);
            return Snapshot::new();
        }
    };

    match parse_snapshot(path, &raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("{e}. Proceeding with empty previous state.");
            Snapshot::new()
        }
    }
}

/// Parses snapshot file content. Blank content is an empty snapshot.
pub fn parse_snapshot(path: &Path, raw: &str) -> SyncResult<Snapshot> {
    if raw.trim().is_empty() {
        return Ok(Snapshot::new());
    }
    serde_json::from_str(raw).map_err(|e| SyncError::LocalStateCorrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Persists a snapshot atomically.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> SyncResult<()> {
    write_json_atomic(path, snapshot)
}

fn fingerprint(modified: SystemTime) -> Fingerprint {
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fingerprint_is_epoch_seconds() {
        let t = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(fingerprint(t), 1.5);
    }

    #[test]
    fn fingerprint_before_epoch_is_negative() {
        let t = UNIX_EPOCH - Duration::from_secs(2);
        assert_eq!(fingerprint(t), -2.0);
    }

    #[test]
    fn parse_blank_is_empty() {
        assert!(parse_snapshot(Path::new("s.json"), "  \n").unwrap().is_empty());
    }

    #[test]
    fn parse_garbage_is_local_state_corrupt() {
        let err = parse_snapshot(Path::new("s.json"), "[1, 2").unwrap_err();
        assert!(matches!(err, SyncError::LocalStateCorrupt { .. }));
    }

    #[test]
    fn serializes_as_plain_object() {
        let snapshot: Snapshot = [("a.txt", 100.0), ("b/c.txt", 200.5)].into_iter().collect();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, serde_json::json!({"a.txt": 100.0, "b/c.txt": 200.5}));
    }
}
