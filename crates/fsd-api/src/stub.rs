//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "In-memory resource server used for tests and offline runs."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::ApiError;
use crate::types::{
    AlertEntry, AuthToken, FileEntry, LockEntry, LogEntry, LoginGrant, OperationReceipt,
    StatusSnapshot,
};
use crate::{ApiOperation, ResourceApi};

const HISTORY_LIMIT: usize = 50;

/// Failure injection knobs for [`StubResourceApi`].
#[derive(Debug, Clone, Default)]
pub struct StubFaults {
    /// Every call fails with a transport error.
    pub unavailable: bool,
    /// Every authenticated call is refused as unauthorized.
    pub reject_tokens: bool,
    /// 1-based delete attempt numbers that fail server-side.
    pub fail_delete_attempts: Vec<usize>,
    /// File names whose uploads fail server-side.
    pub fail_upload_names: Vec<String>,
}

#[derive(Debug, Default)]
struct Accounting {
    calls: BTreeMap<ApiOperation, usize>,
    in_flight: BTreeMap<ApiOperation, usize>,
    peak: BTreeMap<ApiOperation, usize>,
}

#[derive(Debug)]
struct ServerState {
    require_auth: bool,
    users: HashMap<String, String>,
    sessions: HashMap<String, String>,
    issued: u64,
    files: BTreeMap<String, Bytes>,
    locks: Vec<LockEntry>,
    audit: Vec<LogEntry>,
    security: Vec<AlertEntry>,
    delete_attempts: usize,
    faults: StubFaults,
    latency: Duration,
}

impl ServerState {
    fn now() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn audit(&mut self, operation: &str, file: &str, status: &str, details: impl Into<String>) {
        self.audit
            .push(LogEntry::new(Self::now(), operation, file, status, details));
    }

    fn security_event(&mut self, event: &str, file: Option<&str>, details: impl Into<String>) {
        self.security.push(AlertEntry {
            timestamp: Self::now(),
            event: event.to_owned(),
            ip: Some("127.0.0.1".to_owned()),
            file: file.map(str::to_owned),
            details: details.into(),
            severity: None,
        });
    }

    fn authorize(&mut self, token: Option<&AuthToken>) -> Result<String, ApiError> {
        if !self.require_auth {
            return Ok("anonymous".to_owned());
        }
        let Some(token) = token else {
            self.security_event("AUTH_FAILURE", None, "missing authorization token");
            return Err(ApiError::Unauthorized);
        };
        if self.faults.reject_tokens {
            self.security_event("AUTH_FAILURE", None, "token rejected");
            return Err(ApiError::Unauthorized);
        }
        match self.sessions.get(token.as_str()) {
            Some(user) => Ok(user.clone()),
            None => {
                self.security_event("AUTH_FAILURE", None, "invalid or expired token");
                Err(ApiError::Unauthorized)
            }
        }
    }

    fn check_name(&mut self, operation: &str, name: &str) -> Result<(), ApiError> {
        if name.contains("..") || name.contains('/') || name.contains('\\') {
            self.security_event("PATH_TRAVERSAL_BLOCKED", Some(name), "path traversal detected");
            self.audit(operation, name, "BLOCKED", "path traversal rejected");
            return Err(ApiError::rejected(400, "Invalid filename"));
        }
        if name.trim().is_empty() {
            return Err(ApiError::rejected(400, "Empty filename"));
        }
        Ok(())
    }
}

/// In-memory [`ResourceApi`] with call accounting and failure injection.
///
/// Authenticated endpoints mirror the real server: status, listing, file
/// operations, log clearing and logout need a token while locks, audit log
/// and security events are public.
#[derive(Debug)]
pub struct StubResourceApi {
    state: Mutex<ServerState>,
    accounting: Mutex<Accounting>,
}

/// Decrements the in-flight gauge when the call finishes or is dropped.
struct InFlight<'a> {
    api: &'a StubResourceApi,
    op: ApiOperation,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut accounting = self.api.accounting.lock();
        if let Some(count) = accounting.in_flight.get_mut(&self.op) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Visible lock entry for the duration of a file operation.
struct LockHold<'a> {
    api: &'a StubResourceApi,
    file: String,
}

impl Drop for LockHold<'_> {
    fn drop(&mut self) {
        let mut state = self.api.state.lock();
        if let Some(pos) = state.locks.iter().position(|lock| lock.file == self.file) {
            state.locks.remove(pos);
        }
    }
}

impl Default for StubResourceApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StubResourceApi {
    /// Server with a single `admin` / `admin123` account and authentication enforced.
    pub fn new() -> Self {
        let mut users = HashMap::new();
        users.insert("admin".to_owned(), "admin123".to_owned());
        Self {
            state: Mutex::new(ServerState {
                require_auth: true,
                users,
                sessions: HashMap::new(),
                issued: 0,
                files: BTreeMap::new(),
                locks: Vec::new(),
                audit: Vec::new(),
                security: Vec::new(),
                delete_attempts: 0,
                faults: StubFaults::default(),
                latency: Duration::ZERO,
            }),
            accounting: Mutex::new(Accounting::default()),
        }
    }

    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(username.to_owned(), password.to_owned());
        self
    }

    /// Accept anonymous calls everywhere.
    pub fn without_auth(self) -> Self {
        self.state.lock().require_auth = false;
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn set_faults(&self, faults: StubFaults) {
        self.state.lock().faults = faults;
    }

    pub fn update_faults(&self, update: impl FnOnce(&mut StubFaults)) {
        update(&mut self.state.lock().faults);
    }

    /// Invalidate every issued token, as a server restart would.
    pub fn revoke_all_tokens(&self) {
        self.state.lock().sessions.clear();
    }

    pub fn insert_file(&self, name: &str, content: impl Into<Bytes>) {
        self.state
            .lock()
            .files
            .insert(name.to_owned(), content.into());
    }

    pub fn file(&self, name: &str) -> Option<Bytes> {
        self.state.lock().files.get(name).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    pub fn push_audit(&self, entry: LogEntry) {
        self.state.lock().audit.push(entry);
    }

    pub fn push_security_event(&self, event: &str, details: &str) {
        self.state.lock().security_event(event, None, details);
    }

    pub fn calls(&self, op: ApiOperation) -> usize {
        self.accounting
            .lock()
            .calls
            .get(&op)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.accounting.lock().calls.values().sum()
    }

    /// Highest number of simultaneously outstanding calls seen for `op`.
    pub fn peak_in_flight(&self, op: ApiOperation) -> usize {
        self.accounting
            .lock()
            .peak
            .get(&op)
            .copied()
            .unwrap_or_default()
    }

    pub fn reset_accounting(&self) {
        *self.accounting.lock() = Accounting::default();
    }

    async fn enter(&self, op: ApiOperation) -> Result<InFlight<'_>, ApiError> {
        {
            let mut accounting = self.accounting.lock();
            *accounting.calls.entry(op).or_default() += 1;
            let current = {
                let count = accounting.in_flight.entry(op).or_default();
                *count += 1;
                *count
            };
            let peak = accounting.peak.entry(op).or_default();
            *peak = (*peak).max(current);
        }
        let guard = InFlight { api: self, op };
        trace!(operation = %op, "stub call");
        let (latency, unavailable) = {
            let state = self.state.lock();
            (state.latency, state.faults.unavailable)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(ApiError::Transport("connection refused".to_owned()));
        }
        Ok(guard)
    }

    fn hold_lock(&self, file: &str, lock_type: &str, owner: &str) -> LockHold<'_> {
        self.state.lock().locks.push(LockEntry {
            file: file.to_owned(),
            lock_type: lock_type.to_owned(),
            owner: Some(owner.to_owned()),
            os_concept: None,
        });
        LockHold {
            api: self,
            file: file.to_owned(),
        }
    }
}

fn tail<T: Clone>(items: &[T]) -> Vec<T> {
    items[items.len().saturating_sub(HISTORY_LIMIT)..].to_vec()
}

#[async_trait]
impl ResourceApi for StubResourceApi {
    async fn authenticate(&self, username: &str, password: &str) -> Result<LoginGrant, ApiError> {
        let _call = self.enter(ApiOperation::Authenticate).await?;
        let mut state = self.state.lock();
        if state.users.get(username).map(String::as_str) != Some(password) {
            state.audit("LOGIN", "N/A", "FAILED", format!("User={username}"));
            state.security_event("AUTH_FAILURE", None, format!("bad credentials for {username}"));
            return Err(ApiError::rejected(401, "Invalid username or password"));
        }
        state.issued += 1;
        let token = format!("stub-{:016x}", state.issued.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        state.sessions.insert(token.clone(), username.to_owned());
        state.audit("LOGIN", "N/A", "SUCCESS", format!("User={username}"));
        Ok(LoginGrant {
            token: AuthToken::new(token),
            username: username.to_owned(),
        })
    }

    async fn logout(&self, token: Option<&AuthToken>) -> Result<(), ApiError> {
        let _call = self.enter(ApiOperation::Logout).await?;
        let mut state = self.state.lock();
        let user = state.authorize(token)?;
        if let Some(token) = token {
            state.sessions.remove(token.as_str());
        }
        state.audit("LOGOUT", "N/A", "SUCCESS", format!("User={user}"));
        Ok(())
    }

    async fn fetch_status(&self, token: Option<&AuthToken>) -> Result<StatusSnapshot, ApiError> {
        let _call = self.enter(ApiOperation::FetchStatus).await?;
        let mut state = self.state.lock();
        state.authorize(token)?;
        let total: u64 = state.files.values().map(|content| content.len() as u64).sum();
        Ok(StatusSnapshot {
            c_server_running: true,
            file_count: state.files.len() as u64,
            total_storage_bytes: total,
            total_storage_human: format_size(total),
            audit_log_entries: state.audit.len() as u64,
            security_events: state.security.len() as u64,
        })
    }

    async fn list_files(&self, token: Option<&AuthToken>) -> Result<Vec<FileEntry>, ApiError> {
        let _call = self.enter(ApiOperation::ListFiles).await?;
        let mut state = self.state.lock();
        let user = state.authorize(token)?;
        let files: Vec<FileEntry> = state
            .files
            .iter()
            .map(|(name, content)| FileEntry {
                name: name.clone(),
                size: content.len() as u64,
                size_human: format_size(content.len() as u64),
            })
            .collect();
        let details = format!("ok - {user} has {} files", files.len());
        state.audit("LIST", "N/A", "SUCCESS", details);
        Ok(files)
    }

    async fn upload_file(
        &self,
        token: Option<&AuthToken>,
        name: &str,
        content: Bytes,
    ) -> Result<OperationReceipt, ApiError> {
        let _call = self.enter(ApiOperation::UploadFile).await?;
        let user = {
            let mut state = self.state.lock();
            let user = state.authorize(token)?;
            state.check_name("UPLOAD", name)?;
            if state.faults.fail_upload_names.iter().any(|n| n == name) {
                state.audit("UPLOAD", name, "FAILED", "write error");
                return Err(ApiError::rejected(500, "ERROR: write failed"));
            }
            user
        };
        let _lock = self.hold_lock(name, "WRITE", &user);
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let size = content.len();
        state.files.insert(name.to_owned(), content);
        state.audit("UPLOAD", name, "SUCCESS", format!("{size} bytes"));
        Ok(OperationReceipt {
            message: Some(format!("File uploaded via C server: {name}")),
            os_operations: ["open()", "fcntl(F_WRLCK)", "write()", "close()"]
                .map(str::to_owned)
                .to_vec(),
        })
    }

    async fn download_file(&self, token: Option<&AuthToken>, name: &str) -> Result<Bytes, ApiError> {
        let _call = self.enter(ApiOperation::DownloadFile).await?;
        let user = {
            let mut state = self.state.lock();
            let user = state.authorize(token)?;
            state.check_name("DOWNLOAD", name)?;
            user
        };
        let _lock = self.hold_lock(name, "READ", &user);
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        match state.files.get(name).cloned() {
            Some(content) => {
                state.audit("DOWNLOAD", name, "SUCCESS", format!("{} bytes", content.len()));
                Ok(content)
            }
            None => {
                state.audit("DOWNLOAD", name, "FAILED", "file not found");
                Err(ApiError::rejected(404, "ERROR: File not found"))
            }
        }
    }

    async fn delete_file(
        &self,
        token: Option<&AuthToken>,
        name: &str,
    ) -> Result<OperationReceipt, ApiError> {
        let _call = self.enter(ApiOperation::DeleteFile).await?;
        let mut state = self.state.lock();
        state.authorize(token)?;
        state.check_name("DELETE", name)?;
        state.delete_attempts += 1;
        let attempt = state.delete_attempts;
        if state.faults.fail_delete_attempts.contains(&attempt) {
            state.audit("DELETE", name, "FAILED", "file busy");
            return Err(ApiError::rejected(500, "Delete failed"));
        }
        if state.files.remove(name).is_none() {
            state.audit("DELETE", name, "FAILED", "file not found");
            return Err(ApiError::rejected(500, "Delete failed"));
        }
        state.audit("DELETE", name, "SUCCESS", "unlinked");
        Ok(OperationReceipt {
            message: Some(format!("File deleted via C server: {name}")),
            os_operations: vec!["fcntl(F_WRLCK)".to_owned(), "unlink()".to_owned()],
        })
    }

    async fn fetch_locks(&self, _token: Option<&AuthToken>) -> Result<Vec<LockEntry>, ApiError> {
        let _call = self.enter(ApiOperation::FetchLocks).await?;
        Ok(self.state.lock().locks.clone())
    }

    async fn fetch_audit_log(&self, _token: Option<&AuthToken>) -> Result<Vec<LogEntry>, ApiError> {
        let _call = self.enter(ApiOperation::FetchAuditLog).await?;
        Ok(tail(&self.state.lock().audit))
    }

    async fn clear_audit_log(&self, token: Option<&AuthToken>) -> Result<(), ApiError> {
        let _call = self.enter(ApiOperation::ClearAuditLog).await?;
        let mut state = self.state.lock();
        let user = state.authorize(token)?;
        state.audit.clear();
        state.audit("CLEAR_LOGS", "N/A", "SUCCESS", format!("cleared by {user}"));
        Ok(())
    }

    async fn fetch_security_events(
        &self,
        _token: Option<&AuthToken>,
    ) -> Result<Vec<AlertEntry>, ApiError> {
        let _call = self.enter(ApiOperation::FetchSecurityEvents).await?;
        Ok(tail(&self.state.lock().security))
    }
}

fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn login(api: &StubResourceApi) -> AuthToken {
        api.authenticate("admin", "admin123").await.unwrap().token
    }

    #[tokio::test]
    async fn file_lifecycle_is_audited() {
        let api = StubResourceApi::new();
        let token = login(&api).await;
        api.upload_file(Some(&token), "notes.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let files = api.list_files(Some(&token)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_human, "5.0 B");
        assert_eq!(
            api.download_file(Some(&token), "notes.txt").await.unwrap(),
            Bytes::from_static(b"hello")
        );
        api.delete_file(Some(&token), "notes.txt").await.unwrap();
        assert!(api.file_names().is_empty());
        assert!(api.fetch_locks(None).await.unwrap().is_empty());

        let ops: Vec<String> = api
            .fetch_audit_log(None)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.operation)
            .collect();
        assert_eq!(ops, ["LOGIN", "UPLOAD", "LIST", "DOWNLOAD", "DELETE"]);
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected_not_unauthorized() {
        let api = StubResourceApi::new();
        let err = api.authenticate("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 401, .. }));
        let events = api.fetch_security_events(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "AUTH_FAILURE");
    }

    #[tokio::test]
    async fn revoked_tokens_are_unauthorized() {
        let api = StubResourceApi::new();
        let token = login(&api).await;
        api.revoke_all_tokens();
        assert_eq!(
            api.fetch_status(Some(&token)).await.unwrap_err(),
            ApiError::Unauthorized
        );
        assert_eq!(api.list_files(None).await.unwrap_err(), ApiError::Unauthorized);
        // Public endpoints keep answering.
        assert!(api.fetch_locks(None).await.is_ok());
    }

    #[tokio::test]
    async fn path_traversal_is_blocked_and_reported() {
        let api = StubResourceApi::new();
        let token = login(&api).await;
        let err = api
            .download_file(Some(&token), "../../../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 400, .. }));
        let events = api.fetch_security_events(None).await.unwrap();
        assert_eq!(events.last().unwrap().event, "PATH_TRAVERSAL_BLOCKED");
    }

    #[tokio::test]
    async fn injected_delete_failure_hits_only_that_attempt() {
        let api = StubResourceApi::new().without_auth();
        api.insert_file("a.txt", "a");
        api.insert_file("b.txt", "b");
        api.update_faults(|faults| faults.fail_delete_attempts = vec![1]);
        assert!(api.delete_file(None, "a.txt").await.is_err());
        assert!(api.delete_file(None, "a.txt").await.is_ok());
        assert!(api.delete_file(None, "b.txt").await.is_ok());
        assert_eq!(api.calls(ApiOperation::DeleteFile), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_visible_in_peak_concurrency() {
        let api = std::sync::Arc::new(StubResourceApi::new().without_auth());
        api.set_latency(Duration::from_millis(100));
        let a = tokio::spawn({
            let api = api.clone();
            async move { api.fetch_locks(None).await }
        });
        let b = tokio::spawn({
            let api = api.clone();
            async move { api.fetch_locks(None).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(api.peak_in_flight(ApiOperation::FetchLocks), 2);
        assert_eq!(api.calls(ApiOperation::FetchLocks), 2);
    }

    #[tokio::test]
    async fn unavailable_server_fails_with_transport_error() {
        let api = StubResourceApi::new();
        api.set_faults(StubFaults {
            unavailable: true,
            ..StubFaults::default()
        });
        assert!(matches!(
            api.fetch_audit_log(None).await,
            Err(ApiError::Transport(_))
        ));
    }
}
