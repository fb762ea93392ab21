//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Remote resource API boundary."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
//! Boundary between the dashboard engine and the remote resource server.
//!
//! [`ResourceApi`] is the only way the engine reaches the server.
//! [`HttpResourceApi`] speaks the JSON wire format of the server's API layer;
//! [`StubResourceApi`] keeps everything in memory for tests and offline use.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

pub mod error;
pub mod http;
pub mod stub;
pub mod types;

pub use error::ApiError;
pub use http::HttpResourceApi;
pub use stub::{StubFaults, StubResourceApi};
pub use types::{
    AlertEntry, AuthToken, FileEntry, LockEntry, LogEntry, LoginGrant, OperationReceipt,
    Severity, StatusSnapshot,
};

/// Operations exposed by the remote boundary, used for logging and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiOperation {
    Authenticate,
    Logout,
    FetchStatus,
    ListFiles,
    UploadFile,
    DownloadFile,
    DeleteFile,
    FetchLocks,
    FetchAuditLog,
    ClearAuditLog,
    FetchSecurityEvents,
}

impl ApiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiOperation::Authenticate => "authenticate",
            ApiOperation::Logout => "logout",
            ApiOperation::FetchStatus => "fetch_status",
            ApiOperation::ListFiles => "list_files",
            ApiOperation::UploadFile => "upload_file",
            ApiOperation::DownloadFile => "download_file",
            ApiOperation::DeleteFile => "delete_file",
            ApiOperation::FetchLocks => "fetch_locks",
            ApiOperation::FetchAuditLog => "fetch_audit_log",
            ApiOperation::ClearAuditLog => "clear_audit_log",
            ApiOperation::FetchSecurityEvents => "fetch_security_events",
        }
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote resource server as seen by the engine.
///
/// `token` is `None` only when authentication is disabled; implementations
/// answer [`ApiError::Unauthorized`] whenever the server refuses the credential.
#[async_trait]
pub trait ResourceApi: Send + Sync + 'static {
    /// Exchange credentials for a bearer token.
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<LoginGrant, ApiError>;

    /// Invalidate the token server-side.
    async fn logout(&self, token: Option<&AuthToken>) -> Result<(), ApiError>;

    async fn fetch_status(&self, token: Option<&AuthToken>) -> Result<StatusSnapshot, ApiError>;

    async fn list_files(&self, token: Option<&AuthToken>) -> Result<Vec<FileEntry>, ApiError>;

    async fn upload_file(
        &self,
        token: Option<&AuthToken>,
        name: &str,
        content: Bytes,
    ) -> Result<OperationReceipt, ApiError>;

    async fn download_file(&self, token: Option<&AuthToken>, name: &str)
        -> Result<Bytes, ApiError>;

    async fn delete_file(
        &self,
        token: Option<&AuthToken>,
        name: &str,
    ) -> Result<OperationReceipt, ApiError>;

    async fn fetch_locks(&self, token: Option<&AuthToken>) -> Result<Vec<LockEntry>, ApiError>;

    /// Most recent audit records, oldest first as the server stores them.
    async fn fetch_audit_log(&self, token: Option<&AuthToken>) -> Result<Vec<LogEntry>, ApiError>;

    async fn clear_audit_log(&self, token: Option<&AuthToken>) -> Result<(), ApiError>;

    /// Most recent security events, oldest first.
    async fn fetch_security_events(
        &self,
        token: Option<&AuthToken>,
    ) -> Result<Vec<AlertEntry>, ApiError>;
}
