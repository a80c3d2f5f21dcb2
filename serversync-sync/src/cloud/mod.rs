//! Remote blob stores for sync.
//!
//! Provides the object-directory abstraction the sync protocol runs on,
//! backed by Google Drive or by a plain directory.

pub mod google_drive;
pub mod local;
pub mod storage;

pub use google_drive::{GoogleDriveConfig, GoogleDriveStorage, OAuthTokens};
pub use local::LocalStorage;
pub use storage::{CloudFile, CloudStorage, MIME_JSON, MIME_TEXT, MIME_ZIP};

use std::sync::Arc;

use crate::config::{BackendConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};

/// Builds an unauthenticated Drive client from the configured client
/// secrets and chunk size.
pub fn google_drive_from_config(config: &SyncConfig) -> SyncResult<GoogleDriveStorage> {
    let BackendConfig::GoogleDrive { chunk_size } = &config.backend else {
        return Err(SyncError::Config(
            "backend is not google_drive".to_string(),
        ));
    };
    let mut drive = GoogleDriveConfig::from_client_secrets_file(&config.credentials_file)?;
    drive.chunk_size = *chunk_size;
    GoogleDriveStorage::new(drive)
}

/// Opens the configured store, ready for workflows.
///
/// Drive needs tokens saved by a previous `authenticate`; a local store
/// needs its root directory to exist.
pub async fn open_storage(config: &SyncConfig) -> SyncResult<Arc<dyn CloudStorage>> {
    match &config.backend {
        BackendConfig::Local { root } => {
            let mut storage = LocalStorage::new(root);
            storage.authenticate().await?;
            Ok(Arc::new(storage))
        }
        BackendConfig::GoogleDrive { .. } => {
            let storage = google_drive_from_config(config)?;
            if !storage.load_tokens(&config.token_file).await? {
                return Err(SyncError::Auth(format!(
                    "no saved tokens at {}; run `serversync authenticate` first",
                    config.token_file.display()
                )));
            }
            Ok(Arc::new(storage))
        }
    }
}
