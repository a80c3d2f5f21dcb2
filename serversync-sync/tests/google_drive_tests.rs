use serversync_sync::cloud::google_drive::{GoogleDriveConfig, GoogleDriveStorage, OAuthTokens};
use serversync_sync::cloud::CloudStorage;
use serversync_sync::lock::{self, AcquireOutcome};
use serversync_sync::SyncError;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHUNK: usize = 256 * 1024;

// ── Config ──────────────────────────────────────────────────────

#[test]
fn google_drive_config_default() {
    let cfg = GoogleDriveConfig::default();
    assert_eq!(cfg.redirect_uri, "urn:ietf:wg:oauth:2.0:oob");
    assert!(cfg.client_id.is_empty());
    assert_eq!(cfg.api_base_url, "https://www.googleapis.com");
    assert_eq!(cfg.oauth_base_url, "https://oauth2.googleapis.com");
    assert_eq!(cfg.auth_base_url, "https://accounts.google.com");
    assert_eq!(cfg.chunk_size, 1024 * 1024);
}

#[test]
fn client_secrets_installed_app() {
    let raw = r#"{"installed": {
        "client_id": "cid.apps.googleusercontent.com",
        "client_secret": "shh",
        "redirect_uris": ["http://localhost"]
    }}"#;
    let cfg = GoogleDriveConfig::from_client_secrets_json(raw).unwrap();
    assert_eq!(cfg.client_id, "cid.apps.googleusercontent.com");
    assert_eq!(cfg.client_secret, "shh");
    assert_eq!(cfg.redirect_uri, "http://localhost");
}

#[test]
fn client_secrets_web_app_keeps_default_redirect() {
    let raw = r#"{"web": {"client_id": "w", "client_secret": "s"}}"#;
    let cfg = GoogleDriveConfig::from_client_secrets_json(raw).unwrap();
    assert_eq!(cfg.client_id, "w");
    assert_eq!(cfg.redirect_uri, "urn:ietf:wg:oauth:2.0:oob");
}

#[test]
fn client_secrets_without_client_is_config_error() {
    let err = GoogleDriveConfig::from_client_secrets_json(r#"{"other": {}}"#).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn client_secrets_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = GoogleDriveConfig::from_client_secrets_file(&dir.path().join("credentials.json"))
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn zero_chunk_size_rejected() {
    let cfg = GoogleDriveConfig {
        chunk_size: 0,
        ..Default::default()
    };
    assert!(matches!(GoogleDriveStorage::new(cfg), Err(SyncError::Config(_))));
}

// ── Authentication ──────────────────────────────────────────────

#[tokio::test]
async fn authenticate_returns_url() {
    let config = GoogleDriveConfig {
        client_id: "test_client_id".to_string(),
        ..Default::default()
    };
    let mut storage = GoogleDriveStorage::new(config).unwrap();
    assert!(!storage.is_authenticated());

    let url = storage.authenticate().await.unwrap().unwrap();
    assert!(url.contains("test_client_id"));
    assert!(url.contains("accounts.google.com"));
    assert!(url.contains("access_type=offline"));
    assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fdrive"));
}

#[tokio::test]
async fn authenticate_when_already_authenticated() {
    let mut storage = GoogleDriveStorage::new(GoogleDriveConfig::default()).unwrap();
    storage.set_tokens("token".to_string(), None).await;
    assert!(storage.is_authenticated());
    assert!(storage.authenticate().await.unwrap().is_none());
}

fn mock_config(server: &MockServer) -> GoogleDriveConfig {
    GoogleDriveConfig {
        client_id: "test_client".to_string(),
        client_secret: "test_secret".to_string(),
        api_base_url: server.uri(),
        oauth_base_url: server.uri(),
        auth_base_url: server.uri(),
        chunk_size: CHUNK,
        ..Default::default()
    }
}

async fn authed_storage(server: &MockServer) -> GoogleDriveStorage {
    let storage = GoogleDriveStorage::new(mock_config(server)).unwrap();
    storage.set_tokens("token".to_string(), None).await;
    storage
}

fn drive_file(id: &str, name: &str, size: usize) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "size": size.to_string(),
        "modifiedTime": "2024-01-01T00:00:00Z",
        "md5Checksum": "abc123"
    })
}

#[tokio::test]
async fn complete_auth_exchanges_code_and_tokens_persist() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new_access_token",
            "refresh_token": "new_refresh_token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut storage = GoogleDriveStorage::new(mock_config(&server)).unwrap();
    storage.complete_auth("auth_code_123").await.unwrap();
    assert!(storage.is_authenticated());

    let dir = TempDir::new().unwrap();
    let token_file = dir.path().join("token.json");
    storage.save_tokens(&token_file).await.unwrap();

    let reloaded = GoogleDriveStorage::new(mock_config(&server)).unwrap();
    assert!(reloaded.load_tokens(&token_file).await.unwrap());
    let tokens = reloaded.tokens().await.unwrap();
    assert_eq!(tokens.access_token, "new_access_token");
    assert_eq!(tokens.refresh_token.as_deref(), Some("new_refresh_token"));
}

#[tokio::test]
async fn complete_auth_failure_returns_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let mut storage = GoogleDriveStorage::new(mock_config(&server)).unwrap();
    let result = storage.complete_auth("bad_code").await;
    assert!(matches!(result, Err(SyncError::Auth(_))));
    assert!(!storage.is_authenticated());
}

#[tokio::test]
async fn load_tokens_missing_file_returns_false() {
    let dir = TempDir::new().unwrap();
    let storage = GoogleDriveStorage::new(GoogleDriveConfig::default()).unwrap();
    assert!(!storage.load_tokens(&dir.path().join("token.json")).await.unwrap());
    assert!(!storage.is_authenticated());
}

#[tokio::test]
async fn save_tokens_without_tokens_is_auth_error() {
    let dir = TempDir::new().unwrap();
    let storage = GoogleDriveStorage::new(GoogleDriveConfig::default()).unwrap();
    let result = storage.save_tokens(&dir.path().join("token.json")).await;
    assert!(matches!(result, Err(SyncError::Auth(_))));
}

#[tokio::test]
async fn expired_token_is_refreshed_before_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh_token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("Authorization", "Bearer fresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let token_file = dir.path().join("token.json");
    let stale = OAuthTokens {
        access_token: "stale_token".to_string(),
        refresh_token: Some("refresh_me".to_string()),
        expires_at: Some(UNIX_EPOCH + Duration::from_secs(1)),
    };
    std::fs::write(&token_file, serde_json::to_vec(&stale).unwrap()).unwrap();

    let storage = GoogleDriveStorage::new(mock_config(&server)).unwrap();
    assert!(storage.load_tokens(&token_file).await.unwrap());

    let files = storage.list_objects("folder", None).await.unwrap();
    assert!(files.is_empty());

    let tokens = storage.tokens().await.unwrap();
    assert_eq!(tokens.access_token, "fresh_token");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh_me"));
}

#[tokio::test]
async fn requests_without_tokens_fail_with_auth_error() {
    let storage = GoogleDriveStorage::new(GoogleDriveConfig::default()).unwrap();
    let result = storage.list_objects("folder", None).await;
    assert!(matches!(result, Err(SyncError::Auth(_))));
}

// ── Listing ─────────────────────────────────────────────────────

#[tokio::test]
async fn list_objects_filters_by_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param(
            "q",
            "'folder_1' in parents and trashed = false \
             and mimeType != 'application/vnd.google-apps.folder' \
             and name = 'version_log.json'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [drive_file("log_1", "version_log.json", 42)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let files = storage
        .list_objects("folder_1", Some("version_log.json"))
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].id, "log_1");
    assert_eq!(files[0].size, 42);
    assert_eq!(files[0].content_hash.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn list_objects_follows_pages() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("pageToken", "page_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [drive_file("b", "b.zip", 1)]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [drive_file("a", "a.zip", 1)],
            "nextPageToken": "page_2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let names: Vec<_> = storage
        .list_objects("folder", None)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["a.zip", "b.zip"]);
}

#[tokio::test]
async fn find_object_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    assert!(storage.find_object("folder", "server_files.zip").await.unwrap().is_none());
}

#[tokio::test]
async fn list_server_error_is_network_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let result = storage.list_objects("folder", None).await;
    assert!(matches!(result, Err(SyncError::Network(_))));
}

// ── Upload ──────────────────────────────────────────────────────

#[tokio::test]
async fn small_content_uses_multipart_upload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "multipart"))
        .and(body_string_contains("\"parents\":[\"folder\"]"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(drive_file("file_1", "changes_t1.zip", 5)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let file = storage
        .create_object("folder", "changes_t1.zip", "application/zip", b"hello")
        .await
        .unwrap();
    assert_eq!(file.id, "file_1");
    assert_eq!(file.name, "changes_t1.zip");
    assert_eq!(file.size, 5);
}

#[tokio::test]
async fn large_content_uses_resumable_upload_in_chunks() {
    let server = MockServer::start().await;
    let total = 2 * CHUNK + 90_112;
    let content: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .and(header("X-Upload-Content-Length", total.to_string().as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/upload/session/abc", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session/abc"))
        .and(header("Content-Range", format!("bytes 0-{}/{total}", CHUNK - 1).as_str()))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK - 1)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session/abc"))
        .and(header(
            "Content-Range",
            format!("bytes {}-{}/{total}", CHUNK, 2 * CHUNK - 1).as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(308)
                .insert_header("Range", format!("bytes=0-{}", 2 * CHUNK - 1)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session/abc"))
        .and(header(
            "Content-Range",
            format!("bytes {}-{}/{total}", 2 * CHUNK, total - 1).as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(drive_file("big_1", "server_files.zip", total)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let file = storage
        .create_object("folder", "server_files.zip", "application/zip", &content)
        .await
        .unwrap();
    assert_eq!(file.id, "big_1");
    assert_eq!(file.size, total as u64);
}

#[tokio::test]
async fn resumable_upload_resends_unacknowledged_bytes() {
    let server = MockServer::start().await;
    let total = CHUNK + 10;
    let content = vec![7u8; total];

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "resumable"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/upload/session/xyz", server.uri())),
        )
        .mount(&server)
        .await;

    // Only half of the first chunk is acknowledged.
    Mock::given(method("PUT"))
        .and(path("/upload/session/xyz"))
        .and(header("Content-Range", format!("bytes 0-{}/{total}", CHUNK - 1).as_str()))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Range", format!("bytes=0-{}", CHUNK / 2 - 1)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/session/xyz"))
        .and(header("Content-Range", format!("bytes {}-{}/{total}", CHUNK / 2, total - 1).as_str()))
        .respond_with(ResponseTemplate::new(201).set_body_json(drive_file("f", "f.zip", total)))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let file = storage
        .create_object("folder", "f.zip", "application/zip", &content)
        .await
        .unwrap();
    assert_eq!(file.id, "f");
}

#[tokio::test]
async fn upload_failure_is_network_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(500).set_body_string("server error"))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let result = storage
        .create_object("folder", "x.zip", "application/zip", b"data")
        .await;
    assert!(matches!(result, Err(SyncError::Network(_))));
}

// ── Download ────────────────────────────────────────────────────

#[tokio::test]
async fn download_in_ranged_chunks() {
    let server = MockServer::start().await;
    let total = CHUNK + 1000;
    let content: Vec<u8> = (0..total).map(|i| (i % 97) as u8).collect();

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file_1"))
        .and(query_param("alt", "media"))
        .and(header("Range", format!("bytes=0-{}", CHUNK - 1).as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes 0-{}/{total}", CHUNK - 1))
                .set_body_bytes(content[..CHUNK].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file_1"))
        .and(header("Range", format!("bytes={}-{}", CHUNK, 2 * CHUNK - 1).as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes {}-{}/{total}", CHUNK, total - 1))
                .set_body_bytes(content[CHUNK..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let downloaded = storage.download("file_1").await.unwrap();
    assert_eq!(downloaded.len(), total);
    assert!(downloaded == content);
}

#[tokio::test]
async fn download_accepts_full_body_when_range_ignored() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file_1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    assert_eq!(storage.download("file_1").await.unwrap(), b"hello");
}

#[tokio::test]
async fn download_missing_is_remote_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/bad_id"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let result = storage.download("bad_id").await;
    assert!(matches!(result, Err(SyncError::RemoteNotFound(id)) if id == "bad_id"));
}

#[tokio::test]
async fn download_empty_object() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/empty"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    assert!(storage.download("empty").await.unwrap().is_empty());
}

// ── Update / delete ─────────────────────────────────────────────

#[tokio::test]
async fn update_object_patches_media() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/upload/drive/v3/files/log_1"))
        .and(query_param("uploadType", "media"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_file("log_1", "version_log.json", 2)))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    storage
        .update_object("log_1", "application/json", b"[]")
        .await
        .unwrap();
}

#[tokio::test]
async fn update_missing_object_is_remote_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/upload/drive/v3/files/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let result = storage.update_object("gone", "application/json", b"[]").await;
    assert!(matches!(result, Err(SyncError::RemoteNotFound(_))));
}

#[tokio::test]
async fn delete_file() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/file_to_delete"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    storage.delete("file_to_delete").await.unwrap();
}

#[tokio::test]
async fn delete_already_gone_is_ok() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/already_gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    storage.delete("already_gone").await.unwrap();
}

#[tokio::test]
async fn delete_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/drive/v3/files/fail"))
        .respond_with(ResponseTemplate::new(500).set_body_string("error"))
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    assert!(storage.delete("fail").await.is_err());
}

// ── Lock on a store without conditional create ──────────────────

#[tokio::test]
async fn exclusive_create_is_unsupported() {
    let server = MockServer::start().await;
    let storage = authed_storage(&server).await;
    assert!(!storage.supports_exclusive_create());
    let result = storage
        .create_object_exclusive("folder", "sync.lock", "text/plain", b"")
        .await;
    assert!(matches!(result, Err(SyncError::Unsupported(_))));
}

#[tokio::test]
async fn lock_checks_then_creates_marker() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(body_string_contains("\"name\":\"sync.lock\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_file("lock_1", "sync.lock", 10)))
        .expect(1)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let outcome = lock::try_acquire(&storage, "folder").await.unwrap();
    assert_eq!(outcome, AcquireOutcome::Acquired);
}

#[tokio::test]
async fn lock_present_marker_means_already_locked() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [drive_file("lock_1", "sync.lock", 10)]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drive_file("x", "sync.lock", 1)))
        .expect(0)
        .mount(&server)
        .await;

    let storage = authed_storage(&server).await;
    let outcome = lock::try_acquire(&storage, "folder").await.unwrap();
    assert_eq!(outcome, AcquireOutcome::AlreadyLocked);
}
