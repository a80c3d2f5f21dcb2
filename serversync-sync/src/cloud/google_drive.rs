//! Google Drive storage implementation.
//!
//! Uses Google Drive API v3. A container is a Drive folder id. Content
//! larger than one chunk is uploaded through a resumable session and
//! downloaded with ranged requests.
//!
//! Drive has no conditional create, so lock acquisition on Drive falls
//! back to check-then-create.

use super::storage::{CloudFile, CloudStorage};
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{SyncError, SyncResult};
use crate::persist::write_json_atomic;
use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,size,modifiedTime,md5Checksum,mimeType";
const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Google Drive specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    /// OAuth2 client ID.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Redirect URI for OAuth flow.
    pub redirect_uri: String,
    /// Base URL for Google Drive API (e.g. `https://www.googleapis.com`).
    pub api_base_url: String,
    /// Base URL for Google OAuth2 (e.g. `https://oauth2.googleapis.com`).
    pub oauth_base_url: String,
    /// Base URL for Google Accounts auth page (e.g. `https://accounts.google.com`).
    pub auth_base_url: String,
    /// Transfer chunk size in bytes; a multiple of 256 KiB.
    pub chunk_size: usize,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
            api_base_url: "https://www.googleapis.com".to_string(),
            oauth_base_url: "https://oauth2.googleapis.com".to_string(),
            auth_base_url: "https://accounts.google.com".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Client secrets file as downloaded from the Google Cloud console.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl GoogleDriveConfig {
    /// Reads client id, secret and redirect URI from a client secrets file.
    pub fn from_client_secrets_file(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read credentials {}: {e}", path.display()))
        })?;
        Self::from_client_secrets_json(&raw)
    }

    pub fn from_client_secrets_json(raw: &str) -> SyncResult<Self> {
        let file: ClientSecretsFile = serde_json::from_str(raw)
            .map_err(|e| SyncError::Config(format!("invalid credentials file: {e}")))?;
        let secrets = file.installed.or(file.web).ok_or_else(|| {
            SyncError::Config("credentials file has no `installed` or `web` client".to_string())
        })?;

        let mut config = Self {
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            ..Default::default()
        };
        if let Some(uri) = secrets.redirect_uris.into_iter().next() {
            config.redirect_uri = uri;
        }
        Ok(config)
    }
}

/// OAuth2 tokens, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<SystemTime>,
}

/// Google Drive API response structures.
#[derive(Debug, Deserialize)]
struct DriveFileList {
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
    size: Option<String>,
    #[serde(rename = "modifiedTime")]
    modified_time: Option<String>,
    #[serde(rename = "md5Checksum")]
    md5_checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Google Drive storage implementation.
pub struct GoogleDriveStorage {
    config: GoogleDriveConfig,
    client: Client,
    tokens: Arc<RwLock<Option<OAuthTokens>>>,
}

impl GoogleDriveStorage {
    /// Creates a new Google Drive storage instance.
    pub fn new(config: GoogleDriveConfig) -> SyncResult<Self> {
        if config.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be positive".to_string()));
        }

        // Resumable uploads answer 308 without a Location header; never follow.
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            tokens: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &GoogleDriveConfig {
        &self.config
    }

    /// Sets existing tokens (e.g., loaded from storage).
    pub async fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let tokens = OAuthTokens {
            access_token,
            refresh_token,
            expires_at: None,
        };
        *self.tokens.write().await = Some(tokens);
    }

    /// Returns a copy of the current tokens.
    pub async fn tokens(&self) -> Option<OAuthTokens> {
        self.tokens.read().await.clone()
    }

    /// Loads tokens from a token file. Returns false if the file is absent.
    pub async fn load_tokens(&self, path: &Path) -> SyncResult<bool> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let tokens: OAuthTokens = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Auth(format!("invalid token file {}: {e}", path.display())))?;
        *self.tokens.write().await = Some(tokens);
        Ok(true)
    }

    /// Writes the current tokens to a token file.
    pub async fn save_tokens(&self, path: &Path) -> SyncResult<()> {
        let tokens = self
            .tokens()
            .await
            .ok_or_else(|| SyncError::Auth("not authenticated".to_string()))?;
        write_json_atomic(path, &tokens)
    }

    /// Gets the OAuth2 authorization URL.
    fn get_auth_url(&self) -> String {
        format!(
            "{}/o/oauth2/v2/auth?\
            client_id={}&\
            redirect_uri={}&\
            response_type=code&\
            scope={}&\
            access_type=offline&\
            prompt=consent",
            self.config.auth_base_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(OAUTH_SCOPE)
        )
    }

    /// Gets the current access token, refreshing if needed.
    async fn get_access_token(&self) -> SyncResult<String> {
        let (access_token, expired) = {
            let guard = self.tokens.read().await;
            let tokens = guard
                .as_ref()
                .ok_or_else(|| SyncError::Auth("not authenticated".to_string()))?;

            let expired = tokens
                .expires_at
                .is_some_and(|exp| SystemTime::now() > exp);

            (tokens.access_token.clone(), expired)
        }; // read lock dropped here

        if expired {
            return self.refresh_token().await;
        }

        Ok(access_token)
    }

    /// Refreshes the access token.
    async fn refresh_token(&self) -> SyncResult<String> {
        let refresh_token = self
            .tokens
            .read()
            .await
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or_else(|| SyncError::Auth("no refresh token available".to_string()))?;

        debug!("Refreshing Google Drive access token");

        let response = self
            .client
            .post(format!("{}/token", self.config.oauth_base_url))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("token refresh failed: {e}")))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("token refresh failed: {error}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("failed to parse token response: {e}")))?;

        let new_tokens = OAuthTokens {
            access_token: token_response.access_token.clone(),
            refresh_token: token_response.refresh_token.or(Some(refresh_token)),
            expires_at: expiry(token_response.expires_in),
        };

        *self.tokens.write().await = Some(new_tokens);

        Ok(token_response.access_token)
    }

    fn drive_file_to_cloud_file(file: DriveFile) -> CloudFile {
        let size = file.size.and_then(|s| s.parse().ok()).unwrap_or(0);
        let modified_at = file
            .modified_time
            .and_then(|t| {
                chrono::DateTime::parse_from_rfc3339(&t)
                    .ok()
                    .map(|dt| UNIX_EPOCH + Duration::from_secs(dt.timestamp().max(0) as u64))
            })
            .unwrap_or(SystemTime::now());

        CloudFile {
            id: file.id,
            name: file.name,
            size,
            modified_at,
            content_hash: file.md5_checksum,
        }
    }

    /// Multipart upload for content that fits in one request.
    async fn upload_multipart(
        &self,
        access_token: &str,
        metadata: &serde_json::Value,
        mime_type: &str,
        content: &[u8],
    ) -> SyncResult<DriveFile> {
        // Build the multipart body as raw bytes; binary content must not pass
        // through a UTF-8 conversion.
        let boundary = "serversync_boundary_7f3a";
        let mut body = Vec::with_capacity(content.len() + 512);
        body.extend_from_slice(format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        ).as_bytes());
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());

        let response = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.config.api_base_url))
            .bearer_auth(access_token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("upload failed: {e}")))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("upload failed: {error}")));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("parse upload response failed: {e}")))
    }

    /// Resumable upload: open a session, then PUT chunks until Drive answers
    /// with the created file instead of 308.
    async fn upload_resumable(
        &self,
        access_token: &str,
        metadata: &serde_json::Value,
        mime_type: &str,
        content: &[u8],
    ) -> SyncResult<DriveFile> {
        let total = content.len();

        let response = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.config.api_base_url))
            .bearer_auth(access_token)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", total.to_string())
            .json(metadata)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("upload session failed: {e}")))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("upload session failed: {error}")));
        }

        let session_uri = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SyncError::Network("upload session has no Location".to_string()))?
            .to_string();

        let mut offset = 0usize;
        loop {
            let end = (offset + self.config.chunk_size).min(total);
            let response = self
                .client
                .put(&session_uri)
                .bearer_auth(access_token)
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, end - 1, total))
                .body(content[offset..end].to_vec())
                .send()
                .await
                .map_err(|e| SyncError::Network(format!("chunk upload failed: {e}")))?;

            match response.status().as_u16() {
                200 | 201 => {
                    return response.json().await.map_err(|e| {
                        SyncError::Network(format!("parse upload response failed: {e}"))
                    });
                }
                308 => {
                    // Range: bytes=0-<last byte received>; absent means nothing stored yet.
                    offset = response
                        .headers()
                        .get(RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_received_range)
                        .map_or(0, |last| last + 1);
                    debug!("Uploaded {offset}/{total} bytes");
                    if offset >= total {
                        return Err(SyncError::Network(
                            "upload session reported complete without a file".to_string(),
                        ));
                    }
                }
                _ => {
                    let error = response.text().await.unwrap_or_default();
                    return Err(SyncError::Network(format!("chunk upload failed: {error}")));
                }
            }
        }
    }
}

/// Parses the `Range` header of a 308 response (`bytes=0-524287`) into the
/// index of the last byte Drive has stored.
fn parse_received_range(value: &str) -> Option<usize> {
    value.strip_prefix("bytes=")?.split_once('-')?.1.parse().ok()
}

/// Parses the total length out of `Content-Range: bytes 0-99/1234`.
fn parse_content_range_total(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.parse().ok()
}

fn expiry(expires_in: Option<u64>) -> Option<SystemTime> {
    // 60s buffer
    expires_in.map(|secs| SystemTime::now() + Duration::from_secs(secs.saturating_sub(60)))
}

/// Escapes a value for use inside a single-quoted Drive query string.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl CloudStorage for GoogleDriveStorage {
    fn provider_name(&self) -> &'static str {
        "Google Drive"
    }

    fn is_authenticated(&self) -> bool {
        self.tokens.try_read().is_ok_and(|tokens| tokens.is_some())
    }

    async fn authenticate(&mut self) -> SyncResult<Option<String>> {
        if self.is_authenticated() {
            return Ok(None);
        }

        // Return the OAuth URL for user to authenticate
        Ok(Some(self.get_auth_url()))
    }

    async fn complete_auth(&mut self, auth_code: &str) -> SyncResult<()> {
        debug!("Exchanging auth code for tokens");

        let response = self
            .client
            .post(format!("{}/token", self.config.oauth_base_url))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", auth_code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("token exchange failed: {error}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("failed to parse token response: {e}")))?;

        let tokens = OAuthTokens {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            expires_at: expiry(token_response.expires_in),
        };

        *self.tokens.write().await = Some(tokens);
        info!("Google Drive authentication successful");

        Ok(())
    }

    async fn list_objects(
        &self,
        container_id: &str,
        name: Option<&str>,
    ) -> SyncResult<Vec<CloudFile>> {
        let access_token = self.get_access_token().await?;

        let mut query = format!(
            "'{}' in parents and trashed = false and mimeType != '{FOLDER_MIME}'",
            escape_query_value(container_id)
        );
        if let Some(name) = name {
            query.push_str(&format!(" and name = '{}'", escape_query_value(name)));
        }
        let fields = format!("nextPageToken,files({FILE_FIELDS})");

        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/drive/v3/files", self.config.api_base_url))
                .bearer_auth(&access_token)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", fields.as_str()),
                    ("spaces", "drive"),
                    ("pageSize", "100"),
                ]);

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| SyncError::Network(format!("file list failed: {e}")))?;

            if !response.status().is_success() {
                let error = response.text().await.unwrap_or_default();
                return Err(SyncError::Network(format!("file list failed: {error}")));
            }

            let file_list: DriveFileList = response
                .json()
                .await
                .map_err(|e| SyncError::Network(format!("failed to parse file list: {e}")))?;

            all_files.extend(file_list.files.into_iter().map(Self::drive_file_to_cloud_file));

            page_token = file_list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(all_files)
    }

    async fn create_object(
        &self,
        container_id: &str,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> SyncResult<CloudFile> {
        let access_token = self.get_access_token().await?;

        debug!("Uploading file: {} ({} bytes)", name, content.len());

        let metadata = serde_json::json!({
            "name": name,
            "parents": [container_id],
            "mimeType": mime_type,
        });

        let file = if content.len() <= self.config.chunk_size {
            self.upload_multipart(&access_token, &metadata, mime_type, content)
                .await?
        } else {
            self.upload_resumable(&access_token, &metadata, mime_type, content)
                .await?
        };

        info!("Uploaded file: {} (id: {})", name, file.id);
        Ok(Self::drive_file_to_cloud_file(file))
    }

    async fn download(&self, file_id: &str) -> SyncResult<Vec<u8>> {
        let access_token = self.get_access_token().await?;

        debug!("Downloading file: {}", file_id);

        let url = format!(
            "{}/drive/v3/files/{}",
            self.config.api_base_url,
            urlencoding::encode(file_id)
        );
        let mut content = Vec::new();

        loop {
            let offset = content.len();
            let last = offset + self.config.chunk_size - 1;
            let response = self
                .client
                .get(&url)
                .bearer_auth(&access_token)
                .query(&[("alt", "media")])
                .header(RANGE, format!("bytes={offset}-{last}"))
                .send()
                .await
                .map_err(|e| SyncError::Network(format!("download failed: {e}")))?;

            let status = response.status();
            match status {
                StatusCode::OK => {
                    // Server ignored the range and sent everything.
                    let bytes = response.bytes().await.map_err(|e| {
                        SyncError::Network(format!("read download body failed: {e}"))
                    })?;
                    return Ok(bytes.to_vec());
                }
                StatusCode::PARTIAL_CONTENT => {
                    let total = response
                        .headers()
                        .get(CONTENT_RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_content_range_total);
                    let bytes = response.bytes().await.map_err(|e| {
                        SyncError::Network(format!("read download body failed: {e}"))
                    })?;
                    if bytes.is_empty() {
                        return Ok(content);
                    }
                    content.extend_from_slice(&bytes);
                    debug!("Downloaded {} bytes of {:?}", content.len(), total);

                    match total {
                        Some(total) if content.len() < total => continue,
                        _ => return Ok(content),
                    }
                }
                StatusCode::RANGE_NOT_SATISFIABLE => return Ok(content),
                StatusCode::NOT_FOUND => return Err(SyncError::RemoteNotFound(file_id.to_string())),
                _ => {
                    let error = response.text().await.unwrap_or_default();
                    return Err(SyncError::Network(format!("download failed: {error}")));
                }
            }
        }
    }

    async fn update_object(
        &self,
        file_id: &str,
        mime_type: &str,
        content: &[u8],
    ) -> SyncResult<()> {
        let access_token = self.get_access_token().await?;

        debug!("Updating file: {} ({} bytes)", file_id, content.len());

        let response = self
            .client
            .patch(format!(
                "{}/upload/drive/v3/files/{}",
                self.config.api_base_url,
                urlencoding::encode(file_id)
            ))
            .bearer_auth(&access_token)
            .query(&[("uploadType", "media")])
            .header(CONTENT_TYPE, mime_type)
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("update failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::RemoteNotFound(file_id.to_string()));
        }
        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("update failed: {error}")));
        }

        info!("Updated file: {}", file_id);
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> SyncResult<()> {
        let access_token = self.get_access_token().await?;

        debug!("Deleting file: {}", file_id);

        let response = self
            .client
            .delete(format!(
                "{}/drive/v3/files/{}",
                self.config.api_base_url,
                urlencoding::encode(file_id)
            ))
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("delete failed: {e}")))?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("delete failed: {error}")));
        }

        info!("Deleted file: {}", file_id);
        Ok(())
    }
}
