//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "HTTP client for the resource server's JSON API layer."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::error::ApiError;
use crate::types::{
    AlertEntry, AuthToken, FileEntry, LockEntry, LogEntry, LoginGrant, OperationReceipt,
    StatusSnapshot,
};
use crate::{ApiOperation, ResourceApi};

/// Common `{success, error?, message?}` wrapper around every JSON body.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    body: T,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    status: StatusSnapshot,
}

#[derive(Debug, Deserialize)]
struct FilesBody {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct LocksBody {
    #[serde(default)]
    locks: Vec<LockEntry>,
}

#[derive(Debug, Deserialize)]
struct LogsBody {
    #[serde(default)]
    logs: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
struct SecurityBody {
    #[serde(default)]
    alerts: Vec<AlertEntry>,
}

/// [`ResourceApi`] over the server's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpResourceApi {
    client: Client,
    base: Url,
}

impl HttpResourceApi {
    /// Build a client rooted at `base_url` (e.g. `http://localhost:5000/api/`).
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fsdash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ApiError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base: base_url,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str, resource: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| ApiError::Transport(format!("invalid endpoint {path}: {err}")))?;
        if let Some(resource) = resource {
            url.path_segments_mut()
                .map_err(|_| ApiError::Transport(format!("base url {} cannot be a base", self.base)))?
                .push(resource);
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        resource: Option<&str>,
        token: Option<&AuthToken>,
    ) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(path, resource)?;
        trace!(%method, %url, "preparing request");
        let builder = self.client.request(method, url);
        Ok(match token {
            Some(token) => builder.bearer_auth(token.as_str()),
            None => builder,
        })
    }

    async fn send(op: ApiOperation, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(|err| {
            debug!(operation = %op, error = %err, "request did not complete");
            ApiError::from(err)
        })?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(operation = %op, "server rejected credentials");
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        op: ApiOperation,
        response: Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.bytes().await?;
        let envelope: Envelope<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(err) if status.is_success() => return Err(ApiError::from(err)),
            Err(_) => {
                return Err(ApiError::rejected(
                    status.as_u16(),
                    String::from_utf8_lossy(&body).trim().to_owned(),
                ))
            }
        };
        if !status.is_success() || !envelope.success {
            let message = envelope
                .error
                .or(envelope.message)
                .unwrap_or_else(|| format!("{op} failed"));
            return Err(ApiError::rejected(status.as_u16(), message));
        }
        Ok(envelope.body)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: ApiOperation,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = Self::send(op, builder).await?;
        Self::decode(op, response).await
    }
}

#[async_trait]
impl ResourceApi for HttpResourceApi {
    async fn authenticate(&self, username: &str, password: &str) -> Result<LoginGrant, ApiError> {
        let op = ApiOperation::Authenticate;
        let builder = self
            .request(Method::POST, "login", None, None)?
            .json(&json!({ "username": username, "password": password }));
        // `/login` answers 401 for bad credentials: decode it as a rejection, not an expired session.
        let response = builder.send().await?;
        let body: LoginBody = Self::decode(op, response).await?;
        let token = body
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Decode("login response carried no token".to_owned()))?;
        Ok(LoginGrant {
            token: AuthToken::new(token),
            username: body.username.unwrap_or_else(|| username.to_owned()),
        })
    }

    async fn logout(&self, token: Option<&AuthToken>) -> Result<(), ApiError> {
        let builder = self.request(Method::POST, "logout", None, token)?;
        let _: Empty = self.call(ApiOperation::Logout, builder).await?;
        Ok(())
    }

    async fn fetch_status(&self, token: Option<&AuthToken>) -> Result<StatusSnapshot, ApiError> {
        let builder = self.request(Method::GET, "status", None, token)?;
        let body: StatusBody = self.call(ApiOperation::FetchStatus, builder).await?;
        Ok(body.status)
    }

    async fn list_files(&self, token: Option<&AuthToken>) -> Result<Vec<FileEntry>, ApiError> {
        let builder = self.request(Method::GET, "list", None, token)?;
        let body: FilesBody = self.call(ApiOperation::ListFiles, builder).await?;
        Ok(body.files)
    }

    async fn upload_file(
        &self,
        token: Option<&AuthToken>,
        name: &str,
        content: Bytes,
    ) -> Result<OperationReceipt, ApiError> {
        let part = Part::bytes(content.to_vec())
            .file_name(name.to_owned())
            .mime_str("application/octet-stream")?;
        let builder = self
            .request(Method::POST, "upload", None, token)?
            .multipart(Form::new().part("file", part));
        self.call(ApiOperation::UploadFile, builder).await
    }

    async fn download_file(&self, token: Option<&AuthToken>, name: &str) -> Result<Bytes, ApiError> {
        let op = ApiOperation::DownloadFile;
        let builder = self.request(Method::GET, "download", Some(name), token)?;
        let response = Self::send(op, builder).await?;
        if !response.status().is_success() {
            return Err(Self::decode::<Empty>(op, response)
                .await
                .err()
                .unwrap_or_else(|| ApiError::rejected(500, "download failed")));
        }
        Ok(response.bytes().await?)
    }

    async fn delete_file(
        &self,
        token: Option<&AuthToken>,
        name: &str,
    ) -> Result<OperationReceipt, ApiError> {
        let builder = self.request(Method::DELETE, "delete", Some(name), token)?;
        self.call(ApiOperation::DeleteFile, builder).await
    }

    async fn fetch_locks(&self, token: Option<&AuthToken>) -> Result<Vec<LockEntry>, ApiError> {
        let builder = self.request(Method::GET, "locks", None, token)?;
        let body: LocksBody = self.call(ApiOperation::FetchLocks, builder).await?;
        Ok(body.locks)
    }

    async fn fetch_audit_log(&self, token: Option<&AuthToken>) -> Result<Vec<LogEntry>, ApiError> {
        let builder = self.request(Method::GET, "logs", None, token)?;
        let body: LogsBody = self.call(ApiOperation::FetchAuditLog, builder).await?;
        Ok(body.logs)
    }

    async fn clear_audit_log(&self, token: Option<&AuthToken>) -> Result<(), ApiError> {
        let builder = self.request(Method::DELETE, "logs/clear", None, token)?;
        let _: Empty = self.call(ApiOperation::ClearAuditLog, builder).await?;
        Ok(())
    }

    async fn fetch_security_events(
        &self,
        token: Option<&AuthToken>,
    ) -> Result<Vec<AlertEntry>, ApiError> {
        let builder = self.request(Method::GET, "security", None, token)?;
        let body: SecurityBody = self.call(ApiOperation::FetchSecurityEvents, builder).await?;
        Ok(body.alerts)
    }
}
