//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Session lifecycle, persistence and forced logout."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fsd_api::{ApiError, AuthToken, ResourceApi};
use fsd_common::AuthMode;
use fsd_logging::{fsd_info, log_system_event, LogContext, SystemEventOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AuthError, DashboardError, SessionStoreError, ValidationError};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Authenticated operator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub token: AuthToken,
    pub logged_in_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    /// The server rejected the session token.
    Unauthorized,
    Shutdown,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::UserRequested => "user_requested",
            LogoutReason::Unauthorized => "unauthorized",
            LogoutReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    Restored { username: String },
    LoggedOut { reason: LogoutReason },
}

/// Point-in-time view of the session used by a single call.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub token: Option<AuthToken>,
    pub username: Option<String>,
    pub generation: u64,
    /// Cancelled when this session generation ends.
    pub scope: CancellationToken,
}

impl SessionSnapshot {
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }
}

/// Persistence seam for the session across restarts.
pub trait SessionStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<Session>, SessionStoreError>;
    fn save(&self, session: &Session) -> Result<(), SessionStoreError>;
    fn clear(&self) -> Result<(), SessionStoreError>;
}

/// JSON session file written through a temporary sibling and renamed into place.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Volatile store used when no session path is configured.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        self.slot.lock().take();
        Ok(())
    }
}

#[derive(Debug)]
struct SessionState {
    session: Option<Session>,
    generation: u64,
    scope: CancellationToken,
}

/// Owns the session token and the cancellation scope tied to it.
pub struct SessionManager {
    api: Arc<dyn ResourceApi>,
    mode: AuthMode,
    store: Arc<dyn SessionStore>,
    root: CancellationToken,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionManager")
            .field("mode", &self.mode)
            .field("logged_in", &state.session.is_some())
            .field("generation", &state.generation)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(api: Arc<dyn ResourceApi>, mode: AuthMode, store: Arc<dyn SessionStore>) -> Self {
        let root = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            mode,
            store,
            state: Mutex::new(SessionState {
                session: None,
                generation: 0,
                scope: root.child_token(),
            }),
            root,
            events,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn current(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.lock().session.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            token: state.session.as_ref().map(|s| s.token.clone()),
            username: state.session.as_ref().map(|s| s.username.clone()),
            generation: state.generation,
            scope: state.scope.clone(),
        }
    }

    /// Authenticate against the server and open a new session scope.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, DashboardError> {
        if self.mode == AuthMode::Disabled {
            return Err(AuthError::Disabled.into());
        }
        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::Empty("username").into());
        }
        if password.is_empty() {
            return Err(ValidationError::Empty("password").into());
        }

        let grant = self
            .api
            .authenticate(username, password)
            .await
            .map_err(|err| match err {
                ApiError::Transport(message) => AuthError::Unreachable(message),
                ApiError::Unauthorized => {
                    AuthError::InvalidCredentials("invalid credentials".to_owned())
                }
                ApiError::Rejected { message, .. } => AuthError::InvalidCredentials(message),
                ApiError::Decode(message) => AuthError::Unreachable(message),
            })
            .map_err(|err| {
                log_system_event(
                    Some(&LogContext::new().with_user(username)),
                    "login",
                    &err.to_string(),
                    SystemEventOutcome::Degraded,
                );
                err
            })?;

        let session = Session {
            username: grant.username,
            token: grant.token,
            logged_in_at: Utc::now(),
        };
        self.install(session.clone());
        if let Err(err) = self.store.save(&session) {
            warn!(error = %err, "failed to persist session; it will not survive a restart");
        }
        log_system_event(
            Some(&LogContext::new().with_user(&session.username)),
            "login",
            "session established",
            SystemEventOutcome::Success,
        );
        let _ = self.events.send(SessionEvent::LoggedIn {
            username: session.username.clone(),
        });
        Ok(session)
    }

    /// Reload a persisted session, if any. A corrupt store is discarded.
    pub fn restore(&self) -> Option<Session> {
        if self.mode == AuthMode::Disabled {
            return None;
        }
        let session = match self.store.load() {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "discarding unreadable session store");
                let _ = self.store.clear();
                return None;
            }
        };
        self.install(session.clone());
        fsd_info!(
            context = LogContext::new().with_user(&session.username),
            "restored persisted session"
        );
        let _ = self.events.send(SessionEvent::Restored {
            username: session.username.clone(),
        });
        Some(session)
    }

    /// End the session. Returns `false` when there was nothing to end.
    pub async fn logout(&self) -> bool {
        let Some(session) = self.teardown() else {
            debug!("logout requested without an active session");
            return false;
        };
        log_system_event(
            Some(&LogContext::new().with_user(&session.username)),
            "logout",
            "session ended by operator",
            SystemEventOutcome::Success,
        );
        let _ = self.events.send(SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequested,
        });
        if let Err(err) = self.api.logout(Some(&session.token)).await {
            debug!(error = %err, "remote logout notification failed");
        }
        true
    }

    /// Force a logout for the generation observed in `snapshot`.
    ///
    /// Only the first caller per generation succeeds; later callers racing on the
    /// same rejected token get `false`.
    pub fn invalidate(&self, snapshot: &SessionSnapshot) -> bool {
        let session = {
            let mut state = self.state.lock();
            if state.generation != snapshot.generation || state.session.is_none() {
                return false;
            }
            Self::advance(&mut state, &self.root)
        };
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear persisted session");
        }
        let username = session.map(|s| s.username).unwrap_or_default();
        log_system_event(
            Some(&LogContext::new().with_user(&username)),
            "logout",
            "server rejected the session token",
            SystemEventOutcome::Degraded,
        );
        let _ = self.events.send(SessionEvent::LoggedOut {
            reason: LogoutReason::Unauthorized,
        });
        true
    }

    /// Cancel every scope handed out by this manager.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    fn install(&self, session: Session) {
        let mut state = self.state.lock();
        state.scope.cancel();
        state.generation += 1;
        state.scope = self.root.child_token();
        state.session = Some(session);
    }

    fn teardown(&self) -> Option<Session> {
        let session = {
            let mut state = self.state.lock();
            state.session.as_ref()?;
            Self::advance(&mut state, &self.root)
        };
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear persisted session");
        }
        session
    }

    fn advance(state: &mut SessionState, root: &CancellationToken) -> Option<Session> {
        state.scope.cancel();
        state.generation += 1;
        state.scope = root.child_token();
        state.session.take()
    }
}
