//! Cloud storage abstraction trait.
//!
//! Models the remote side as a flat directory of named objects inside a
//! container (a Drive folder, a bucket prefix, a shared directory). Names
//! are not guaranteed unique by every provider, so lookups return lists.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const MIME_ZIP: &str = "application/zip";
pub const MIME_JSON: &str = "application/json";
pub const MIME_TEXT: &str = "text/plain";

/// Metadata about an object in cloud storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudFile {
    /// The object's unique identifier in the cloud storage.
    pub id: String,
    /// The object name within its container.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modified time.
    pub modified_at: SystemTime,
    /// Content hash (if available).
    pub content_hash: Option<String>,
}

/// Abstract cloud storage interface.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Returns the name of the cloud storage provider.
    fn provider_name(&self) -> &'static str;

    /// Returns whether the storage is authenticated and ready.
    fn is_authenticated(&self) -> bool;

    /// Authenticates with the cloud storage.
    /// Returns an authentication URL for OAuth flow if user interaction is needed.
    async fn authenticate(&mut self) -> SyncResult<Option<String>>;

    /// Completes OAuth authentication with an authorization code.
    async fn complete_auth(&mut self, auth_code: &str) -> SyncResult<()>;

    /// Lists objects in a container, optionally only those with exactly `name`.
    async fn list_objects(
        &self,
        container_id: &str,
        name: Option<&str>,
    ) -> SyncResult<Vec<CloudFile>>;

    /// Creates a new object. Large content is sent in resumable chunks where
    /// the provider supports it.
    async fn create_object(
        &self,
        container_id: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> SyncResult<CloudFile>;

    /// Whether [`create_object_exclusive`](Self::create_object_exclusive) is
    /// atomic on this provider.
    fn supports_exclusive_create(&self) -> bool {
        false
    }

    /// Creates an object only if no object with that name exists, as one
    /// atomic step. Returns `None` when the name is already taken.
    async fn create_object_exclusive(
        &self,
        _container_id: &str,
        _name: &str,
        _mime_type: &str,
        _content: &[u8],
    ) -> SyncResult<Option<CloudFile>> {
        Err(SyncError::Unsupported(format!(
            "{} has no conditional create",
            self.provider_name()
        )))
    }

    /// Downloads an object's content.
    async fn download(&self, file_id: &str) -> SyncResult<Vec<u8>>;

    /// Replaces an object's content in place.
    async fn update_object(&self, file_id: &str, mime_type: &str, content: &[u8])
    -> SyncResult<()>;

    /// Deletes an object. Deleting a missing object is not an error.
    async fn delete(&self, file_id: &str) -> SyncResult<()>;

    /// Returns the first object named `name`, if any.
    async fn find_object(&self, container_id: &str, name: &str) -> SyncResult<Option<CloudFile>> {
        Ok(self
            .list_objects(container_id, Some(name))
            .await?
            .into_iter()
            .next())
    }
}
