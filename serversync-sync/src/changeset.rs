//! Change-set computation between two snapshots.

use crate::snapshot::Snapshot;

/// Relative paths that are new or modified between two snapshots.
///
/// Deleted files never appear: removals are not propagated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    paths: Vec<String>,
}

impl ChangeSet {
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn into_paths(self) -> Vec<String> {
        self.paths
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Returns every path of `current` that is absent from `previous` or whose
/// fingerprint differs. Paths come out in lexicographic order.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let paths = current
        .iter()
        .filter(|(path, fingerprint)| previous.get(path) != Some(*fingerprint))
        .map(|(path, _)| path.to_string())
        .collect();
    ChangeSet { paths }
}
