//! Directory-backed storage.
//!
//! Each container is a subdirectory of the configured root and each object
//! a plain file inside it. Useful for a mounted network share and for
//! exercising the sync workflows without a network. Object ids are
//! `<container>/<name>`.

use super::storage::{CloudFile, CloudStorage};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Directory-backed storage implementation.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Creates a storage rooted at `root`. The root must exist before use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container_id: &str) -> SyncResult<PathBuf> {
        validate_segment(container_id)?;
        Ok(self.root.join(container_id))
    }

    fn object_path(&self, container_id: &str, name: &str) -> SyncResult<PathBuf> {
        validate_segment(name)?;
        Ok(self.container_path(container_id)?.join(name))
    }

    fn id_to_path(&self, file_id: &str) -> SyncResult<PathBuf> {
        let (container, name) = file_id
            .split_once('/')
            .ok_or_else(|| SyncError::Storage(format!("malformed object id: {file_id}")))?;
        self.object_path(container, name)
    }

    async fn ensure_container(&self, container_id: &str) -> SyncResult<PathBuf> {
        let path = self.container_path(container_id)?;
        if !fs::try_exists(&path).await? {
            fs::create_dir_all(&path).await.map_err(|e| {
                SyncError::Storage(format!("failed to create container {container_id}: {e}"))
            })?;
            info!("Created container directory: {:?}", path);
        }
        Ok(path)
    }

    async fn to_cloud_file(container_id: &str, path: &Path) -> SyncResult<CloudFile> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to get file metadata: {e}")))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(CloudFile {
            id: format!("{container_id}/{name}"),
            name,
            size: metadata.len(),
            modified_at: metadata.modified().unwrap_or(SystemTime::now()),
            content_hash: None,
        })
    }
}

/// Object and container names must be single path segments. Leading dots
/// are refused because listings skip hidden entries.
fn validate_segment(segment: &str) -> SyncResult<()> {
    let bad = segment.is_empty() || segment.starts_with('.') || segment.contains(['/', '\\']);
    if bad {
        return Err(SyncError::Storage(format!("invalid object name: {segment:?}")));
    }
    Ok(())
}

#[async_trait]
impl CloudStorage for LocalStorage {
    fn provider_name(&self) -> &'static str {
        "Local directory"
    }

    fn is_authenticated(&self) -> bool {
        self.root.is_dir()
    }

    async fn authenticate(&mut self) -> SyncResult<Option<String>> {
        if !self.root.is_dir() {
            return Err(SyncError::Auth(format!(
                "storage root {:?} does not exist or is not mounted",
                self.root
            )));
        }
        Ok(None)
    }

    async fn complete_auth(&mut self, _auth_code: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn list_objects(
        &self,
        container_id: &str,
        name: Option<&str>,
    ) -> SyncResult<Vec<CloudFile>> {
        let container = self.container_path(container_id)?;

        let mut read_dir = match fs::read_dir(&container).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SyncError::Storage(format!("failed to read container: {e}")));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| SyncError::Storage(format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().to_string();

            // Skip directories and hidden files (including in-flight temp files)
            if path.is_dir() || file_name.starts_with('.') {
                continue;
            }
            if name.is_some_and(|wanted| wanted != file_name) {
                continue;
            }

            match Self::to_cloud_file(container_id, &path).await {
                Ok(file) => files.push(file),
                Err(e) => warn!("Skipping object due to error: {e}"),
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Creates a new object. An existing object with the same name is left
    /// untouched and reported as an error.
    async fn create_object(
        &self,
        container_id: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> SyncResult<CloudFile> {
        debug!("Writing object {container_id}/{name} ({} bytes)", content.len());
        self.create_object_exclusive(container_id, name, mime_type, content)
            .await?
            .ok_or_else(|| {
                SyncError::Storage(format!("object {container_id}/{name} already exists"))
            })
    }

    fn supports_exclusive_create(&self) -> bool {
        true
    }

    async fn create_object_exclusive(
        &self,
        container_id: &str,
        name: &str,
        _mime_type: &str,
        content: &[u8],
    ) -> SyncResult<Option<CloudFile>> {
        self.ensure_container(container_id).await?;
        let path = self.object_path(container_id, name)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(SyncError::Storage(format!("failed to create object: {e}")));
            }
        };
        file.write_all(content)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to write object: {e}")))?;
        file.flush().await?;

        Ok(Some(Self::to_cloud_file(container_id, &path).await?))
    }

    async fn download(&self, file_id: &str) -> SyncResult<Vec<u8>> {
        let path = self.id_to_path(file_id)?;
        debug!("Reading object {:?}", path);
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SyncError::RemoteNotFound(file_id.to_string()))
            }
            Err(e) => Err(SyncError::Storage(format!("failed to read object: {e}"))),
        }
    }

    async fn update_object(
        &self,
        file_id: &str,
        _mime_type: &str,
        content: &[u8],
    ) -> SyncResult<()> {
        let path = self.id_to_path(file_id)?;
        if !fs::try_exists(&path).await? {
            return Err(SyncError::RemoteNotFound(file_id.to_string()));
        }
        fs::write(&path, content)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to update object: {e}")))?;
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> SyncResult<()> {
        let path = self.id_to_path(file_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted object {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Storage(format!("failed to delete object: {e}"))),
        }
    }
}
