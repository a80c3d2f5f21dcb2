//! Sync configuration.
//!
//! One explicit [`SyncConfig`] is loaded per invocation and handed to every
//! workflow; nothing is read from ambient global state.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::persist::write_json_atomic;

/// Local snapshot file name inside the state directory.
pub const SNAPSHOT_FILE: &str = "sync_state.json";
/// Local version log cache file name inside the state directory.
pub const VERSION_LOG_FILE: &str = "version_log.json";
/// Single-slot backup archive name inside the backup directory.
pub const BACKUP_FILE: &str = "backup_latest.zip";

/// Google Drive requires resumable chunks to be multiples of 256 KiB.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;
/// Default transfer chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * CHUNK_ALIGNMENT;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Which blob store backs the remote container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Google Drive; the container id is a Drive folder id.
    GoogleDrive {
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
    /// A directory (e.g. a mounted network share); the container id is a
    /// subdirectory of `root`.
    Local { root: PathBuf },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::GoogleDrive {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Configuration for one synchronized server directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote container (folder) holding archives, the version log and the lock.
    pub container_id: String,
    /// The watched directory.
    pub server_files_dir: PathBuf,
    /// Where `backup_latest.zip` is written before applying changes.
    pub backup_dir: PathBuf,
    /// Where the snapshot and version log cache live.
    pub state_dir: PathBuf,
    /// OAuth client secrets downloaded from the Google Cloud console.
    pub credentials_file: PathBuf,
    /// Persisted OAuth tokens.
    pub token_file: PathBuf,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl SyncConfig {
    /// Builds a config with the conventional layout:
    /// `<base>/server_files`, `<base>/backup`, and credentials, tokens and
    /// state files in `state_dir`.
    pub fn with_layout(
        container_id: impl Into<String>,
        base_dir: &Path,
        state_dir: &Path,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            server_files_dir: base_dir.join("server_files"),
            backup_dir: base_dir.join("backup"),
            state_dir: state_dir.to_path_buf(),
            credentials_file: state_dir.join("credentials.json"),
            token_file: state_dir.join("token.json"),
            backend: BackendConfig::default(),
        }
    }

    /// Loads and validates a config file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::Config(format!(
                "config file not found at {}; run `serversync setup` first",
                path.display()
            )),
            _ => SyncError::Config(format!("failed to read {}: {e}", path.display())),
        })?;

        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        self.validate()?;
        write_json_atomic(path, self)
    }

    /// Rejects configs that cannot drive a workflow.
    pub fn validate(&self) -> SyncResult<()> {
        if self.container_id.trim().is_empty() {
            return Err(SyncError::Config("container_id must not be empty".to_string()));
        }
        if self.server_files_dir.as_os_str().is_empty() {
            return Err(SyncError::Config(
                "server_files_dir must not be empty".to_string(),
            ));
        }
        match &self.backend {
            BackendConfig::GoogleDrive { chunk_size } => {
                if *chunk_size == 0 || chunk_size % CHUNK_ALIGNMENT != 0 {
                    return Err(SyncError::Config(format!(
                        "chunk_size must be a positive multiple of {CHUNK_ALIGNMENT} bytes"
                    )));
                }
            }
            BackendConfig::Local { root } => {
                if root.as_os_str().is_empty() {
                    return Err(SyncError::Config(
                        "local backend root must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(SNAPSHOT_FILE)
    }

    pub fn version_log_path(&self) -> PathBuf {
        self.state_dir.join(VERSION_LOG_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_FILE)
    }
}
