//! Google Drive v3 backend
//!
//! Files are looked up with `q` name/parent filters and listed with
//! `id,name,createdTime,size`; uploads use a multipart/related body so the
//! metadata and content are sent in one request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::AuthSession;
use super::{RemoteBackupHandle, RemoteStore};
use crate::error::RemoteError;

/// MIME type Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const BACKUP_MIME_TYPE: &str = "application/json";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, createdTime, size)";
const PAGE_SIZE: &str = "100";

/// Drive endpoint configuration
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Metadata API base, e.g. `https://www.googleapis.com/drive/v3`
    pub api_base: String,
    /// Upload API base, e.g. `https://www.googleapis.com/upload/drive/v3`
    pub upload_base: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    created_time: Option<DateTime<Utc>>,
    /// Drive reports sizes as decimal strings
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Quote a value for use inside a Drive `q` string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Google Drive client
pub struct DriveClient {
    client: Client,
    config: DriveConfig,
    auth: Arc<AuthSession>,
}

impl DriveClient {
    pub fn new(config: DriveConfig, auth: Arc<AuthSession>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// Map non-success statuses to errors
    async fn check(response: Response, file_id: Option<&str>) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::NotSignedIn);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = file_id {
                return Err(RemoteError::NotFound(id.to_string()));
            }
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Server {
            status: status.as_u16(),
            message,
        })
    }

    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>, RemoteError> {
        let query = format!(
            "name = {} and mimeType = {} and trashed = false",
            quote(name),
            quote(FOLDER_MIME_TYPE)
        );
        let response = self
            .client
            .get(format!("{}/files", self.config.api_base))
            .bearer_auth(token)
            .query(&[("q", query.as_str()), ("fields", "files(id, name)"), ("spaces", "drive")])
            .send()
            .await?;
        let list: FileList = Self::check(response, None).await?.json().await?;

        // The query matches on name, but guard against case-folding backends
        Ok(list
            .files
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.id))
    }

    async fn create_folder(&self, token: &str, name: &str) -> Result<String, RemoteError> {
        let response = self
            .client
            .post(format!("{}/files", self.config.api_base))
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&serde_json::json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await?;
        let folder: DriveFile = Self::check(response, None).await?.json().await?;
        Ok(folder.id)
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn ensure_folder(&self, name: &str) -> Result<String, RemoteError> {
        let token = self.auth.access_token().await?;
        if let Some(id) = self.find_folder(&token, name).await? {
            debug!(folder_id = %id, "Found backup folder");
            return Ok(id);
        }
        let token = self.auth.access_token().await?;
        let id = self.create_folder(&token, name).await?;
        info!(folder_id = %id, folder = name, "Created backup folder");
        Ok(id)
    }

    async fn upload(&self, bytes: Vec<u8>, filename: &str, folder_id: &str) -> Result<String, RemoteError> {
        let token = self.auth.access_token().await?;
        let boundary = format!("bcba-sync-{}", Uuid::new_v4().simple());
        let metadata = serde_json::json!({
            "name": filename,
            "parents": [folder_id],
            "mimeType": BACKUP_MIME_TYPE,
        });

        let mut body = Vec::with_capacity(bytes.len() + 512);
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {BACKUP_MIME_TYPE}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = self
            .client
            .post(format!("{}/files", self.config.upload_base))
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let file: DriveFile = Self::check(response, None).await?.json().await?;

        info!(remote_file_id = %file.id, filename, bytes = bytes.len(), "Uploaded backup");
        Ok(file.id)
    }

    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteBackupHandle>, RemoteError> {
        let query = format!("{} in parents and trashed = false", quote(folder_id));
        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            // Long listings can cross the refresh window between pages
            let token = self.auth.access_token().await?;
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("orderBy", "createdTime desc"),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(ref next) = page_token {
                params.push(("pageToken", next.as_str()));
            }

            let response = self
                .client
                .get(format!("{}/files", self.config.api_base))
                .bearer_auth(&token)
                .query(&params)
                .send()
                .await?;
            let page: FileList = Self::check(response, None).await?.json().await?;

            for file in page.files {
                let Some(created_at) = file.created_time else {
                    warn!(remote_file_id = %file.id, "Listed file has no createdTime, ignoring");
                    continue;
                };
                handles.push(RemoteBackupHandle {
                    size_bytes: file.size.as_deref().and_then(|s| s.parse().ok()),
                    id: file.id,
                    name: file.name,
                    created_at,
                });
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(folder_id, count = handles.len(), "Listed backups");
        Ok(handles)
    }

    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        let token = self.auth.access_token().await?;
        let response = self
            .client
            .get(format!("{}/files/{}", self.config.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let response = Self::check(response, Some(file_id)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError> {
        let token = self.auth.access_token().await?;
        let response = self
            .client
            .delete(format!("{}/files/{}", self.config.api_base, file_id))
            .bearer_auth(&token)
            .send()
            .await?;
        Self::check(response, Some(file_id)).await?;
        info!(remote_file_id = file_id, "Deleted backup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::auth::{Credential, TokenRefresher};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> DriveClient {
        let auth = Arc::new(AuthSession::new(None));
        auth.sign_in(Credential {
            access_token: "token-1".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
        .await;
        let config = DriveConfig {
            api_base: server.uri(),
            upload_base: format!("{}/upload", server.uri()),
            timeout_secs: 5,
        };
        DriveClient::new(config, auth).unwrap()
    }

    /// Hands out `token-1`, `token-2`, ... each expiring inside the refresh window
    struct RotatingRefresher {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for RotatingRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<Credential, RemoteError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential {
                access_token: format!("token-{n}"),
                refresh_token: Some(refresh_token.to_string()),
                expires_at: Utc::now() + ChronoDuration::seconds(60),
            })
        }
    }

    async fn rotating_client(server: &MockServer) -> (DriveClient, Arc<RotatingRefresher>) {
        let refresher = Arc::new(RotatingRefresher {
            issued: AtomicUsize::new(0),
        });
        let auth = Arc::new(AuthSession::new(Some(refresher.clone() as Arc<dyn TokenRefresher>)));
        auth.sign_in(Credential {
            access_token: "stale".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(60),
        })
        .await;
        let config = DriveConfig {
            api_base: server.uri(),
            upload_base: format!("{}/upload", server.uri()),
            timeout_secs: 5,
        };
        (DriveClient::new(config, auth).unwrap(), refresher)
    }

    #[test]
    fn test_quote_escapes_literals() {
        assert_eq!(quote("Ann's Backups"), r"'Ann\'s Backups'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
    }

    #[tokio::test]
    async fn test_ensure_folder_reuses_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header_is("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{ "id": "folder-9", "name": "BCBA Tracker Backups" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let id = client(&server).await.ensure_folder("BCBA Tracker Backups").await.unwrap();
        assert_eq!(id, "folder-9");
    }

    #[tokio::test]
    async fn test_ensure_folder_creates_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_string_contains(FOLDER_MIME_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "new-folder" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server).await.ensure_folder("BCBA Tracker Backups").await.unwrap();
        assert_eq!(id, "new-folder");
    }

    #[tokio::test]
    async fn test_upload_sends_multipart_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .and(query_param("uploadType", "multipart"))
            .and(body_string_contains("\"parents\":[\"folder-9\"]"))
            .and(body_string_contains("{\"metadata\":{}}"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "file-1" })))
            .mount(&server)
            .await;

        let id = client(&server)
            .await
            .upload(b"{\"metadata\":{}}".to_vec(), "bcba_backup_x.json", "folder-9")
            .await
            .unwrap();
        assert_eq!(id, "file-1");
    }

    #[tokio::test]
    async fn test_list_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{ "id": "b", "name": "old.json", "createdTime": "2024-01-01T00:00:00Z" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nextPageToken": "p2",
                "files": [{ "id": "a", "name": "new.json", "createdTime": "2024-02-01T00:00:00Z", "size": "2048" }]
            })))
            .mount(&server)
            .await;

        let handles = client(&server).await.list("folder-9").await.unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].id, "a");
        assert_eq!(handles[0].size_bytes, Some(2048));
        assert_eq!(handles[1].id, "b");
        assert_eq!(handles[1].size_bytes, None);
    }

    #[tokio::test]
    async fn test_list_refreshes_token_between_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("pageToken", "p2"))
            .and(header_is("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{ "id": "b", "name": "old.json", "createdTime": "2024-01-01T00:00:00Z" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header_is("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nextPageToken": "p2",
                "files": [{ "id": "a", "name": "new.json", "createdTime": "2024-02-01T00:00:00Z" }]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let (drive, refresher) = rotating_client(&server).await;
        let handles = drive.list("folder-9").await.unwrap();

        assert_eq!(handles.len(), 2);
        assert_eq!(refresher.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_folder_uses_a_fresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header_is("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(header_is("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "new-folder" })))
            .expect(1)
            .mount(&server)
            .await;

        let (drive, _) = rotating_client(&server).await;
        assert_eq!(drive.ensure_folder("BCBA Tracker Backups").await.unwrap(), "new-folder");
    }

    #[tokio::test]
    async fn test_fetch_and_delete_surface_not_found() {
        let server = MockServer::start().await;
        Mock::given(path("/files/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let drive = client(&server).await;

        assert!(matches!(drive.fetch("missing").await, Err(RemoteError::NotFound(_))));
        assert!(matches!(drive.delete("missing").await, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_downloads_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/file-1"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let bytes = client(&server).await.fetch("file-1").await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn test_signed_out_client_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(path("/files"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let drive = client(&server).await;
        drive.auth().sign_out().await;

        assert!(matches!(
            drive.ensure_folder("BCBA Tracker Backups").await,
            Err(RemoteError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn test_rejected_token_is_not_signed_in() {
        let server = MockServer::start().await;
        Mock::given(path("/files"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).await.list("folder-9").await,
            Err(RemoteError::NotSignedIn)
        ));
    }
}
