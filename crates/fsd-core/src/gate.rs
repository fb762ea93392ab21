//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Authenticated call path with forced logout on rejection."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;

use fsd_api::{ApiError, ApiOperation, AuthToken, ResourceApi};
use fsd_common::AuthMode;
use fsd_metrics::EngineMetrics;
use tracing::{debug, trace, warn};

use crate::error::{AuthError, DashboardError};
use crate::scheduler::PollScheduler;
use crate::session::{SessionManager, SessionSnapshot};

/// State filled from one session's data and dropped when that session ends.
pub trait SessionBound: Send + Sync + 'static {
    fn end_session(&self);
}

/// Every backend call made by the engine goes through here.
///
/// The token is captured once per call; a rejected token ends that session
/// generation exactly once and halts polling.
pub struct SessionGate {
    api: Arc<dyn ResourceApi>,
    session: Arc<SessionManager>,
    scheduler: Arc<PollScheduler>,
    bound: Vec<Arc<dyn SessionBound>>,
    metrics: Option<EngineMetrics>,
}

impl std::fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionGate {
    pub fn new(
        api: Arc<dyn ResourceApi>,
        session: Arc<SessionManager>,
        scheduler: Arc<PollScheduler>,
        metrics: Option<EngineMetrics>,
    ) -> Self {
        Self {
            api,
            session,
            scheduler,
            bound: Vec::new(),
            metrics,
        }
    }

    /// Register state that is cleared whenever a session ends, by request or
    /// by rejection.
    pub fn bind(mut self, state: Arc<dyn SessionBound>) -> Self {
        self.bound.push(state);
        self
    }

    /// Operator logout. Stops every polling task, ends the session and drops
    /// the session's data.
    pub async fn logout(&self) -> bool {
        let halted = self.scheduler.stop();
        let ended = self.session.logout().await;
        self.end_session_state();
        debug!(halted_tasks = halted, ended, "logout processed");
        ended
    }

    fn end_session_state(&self) {
        for state in &self.bound {
            state.end_session();
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn call<T, F, Fut>(&self, op: ApiOperation, f: F) -> Result<T, DashboardError>
    where
        F: FnOnce(Arc<dyn ResourceApi>, Option<AuthToken>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let snapshot = self.session.snapshot();
        let token = match self.session.mode() {
            AuthMode::Required => match &snapshot.token {
                Some(token) => Some(token.clone()),
                None => return Err(AuthError::NotLoggedIn.into()),
            },
            AuthMode::Disabled => None,
        };
        trace!(operation = %op, generation = snapshot.generation, "calling backend");
        match f(self.api.clone(), token).await {
            Ok(value) => Ok(value),
            Err(ApiError::Unauthorized) => Err(self.on_unauthorized(op, &snapshot)),
            Err(err) => Err(err.into()),
        }
    }

    fn on_unauthorized(&self, op: ApiOperation, snapshot: &SessionSnapshot) -> DashboardError {
        if self.session.mode() == AuthMode::Disabled {
            warn!(operation = %op, "server demanded credentials while auth mode is disabled");
            return AuthError::AuthenticationRequired.into();
        }
        if self.session.invalidate(snapshot) {
            // only the rejected generation's tasks; a login racing in keeps its own
            let halted = self.scheduler.stop_cancelled();
            self.end_session_state();
            if let Some(metrics) = &self.metrics {
                metrics.inc_forced_logout();
            }
            warn!(operation = %op, halted_tasks = halted, "session rejected by server; logged out");
        }
        AuthError::SessionExpired.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LogoutReason, MemorySessionStore, SessionEvent};
    use fsd_api::StubResourceApi;

    fn gate(stub: Arc<StubResourceApi>, mode: AuthMode) -> SessionGate {
        let session = Arc::new(SessionManager::new(
            stub.clone(),
            mode,
            Arc::new(MemorySessionStore::default()),
        ));
        SessionGate::new(stub, session, Arc::new(PollScheduler::new(None)), None)
    }

    #[tokio::test]
    async fn missing_token_fails_locally() {
        let stub = Arc::new(StubResourceApi::new());
        let gate = gate(stub.clone(), AuthMode::Required);
        let err = gate
            .call(ApiOperation::ListFiles, |api, token| async move {
                api.list_files(token.as_ref()).await
            })
            .await
            .unwrap_err();
        assert_eq!(err, DashboardError::Auth(AuthError::NotLoggedIn));
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_token_forces_a_single_logout() {
        let stub = Arc::new(StubResourceApi::new());
        let gate = Arc::new(gate(stub.clone(), AuthMode::Required));
        let mut events = gate.session().subscribe();
        gate.session().login("admin", "admin123").await.unwrap();
        stub.revoke_all_tokens();
        // every call captures the token before the first rejection lands
        stub.set_latency(std::time::Duration::from_millis(50));

        let calls = (0..4).map(|_| {
            let gate = gate.clone();
            async move {
                gate.call(ApiOperation::FetchStatus, |api, token| async move {
                    api.fetch_status(token.as_ref()).await
                })
                .await
            }
        });
        let results = futures::future::join_all(calls).await;
        for result in results {
            assert_eq!(result.unwrap_err(), DashboardError::Auth(AuthError::SessionExpired));
        }
        assert!(!gate.session().is_logged_in());

        let mut logged_out = 0;
        while let Ok(event) = events.try_recv() {
            if event == (SessionEvent::LoggedOut { reason: LogoutReason::Unauthorized }) {
                logged_out += 1;
            }
        }
        assert_eq!(logged_out, 1);
    }

    #[derive(Default)]
    struct EndCount(std::sync::atomic::AtomicUsize);

    impl SessionBound for EndCount {
        fn end_session(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn rejection_and_logout_share_the_teardown() {
        let stub = Arc::new(StubResourceApi::new());
        let ended = Arc::new(EndCount::default());
        let gate = gate(stub.clone(), AuthMode::Required).bind(ended.clone());
        let count = || ended.0.load(std::sync::atomic::Ordering::SeqCst);

        gate.session().login("admin", "admin123").await.unwrap();
        stub.revoke_all_tokens();
        let err = gate
            .call(ApiOperation::ListFiles, |api, token| async move {
                api.list_files(token.as_ref()).await
            })
            .await
            .unwrap_err();
        assert_eq!(err, DashboardError::Auth(AuthError::SessionExpired));
        assert_eq!(count(), 1);

        gate.session().login("admin", "admin123").await.unwrap();
        assert!(gate.logout().await);
        assert_eq!(count(), 2);
    }

    #[tokio::test]
    async fn disabled_mode_sends_anonymous_calls() {
        let stub = Arc::new(StubResourceApi::new().without_auth());
        let gate = gate(stub.clone(), AuthMode::Disabled);
        let files = gate
            .call(ApiOperation::ListFiles, |api, token| async move {
                assert!(token.is_none());
                api.list_files(token.as_ref()).await
            })
            .await
            .unwrap();
        assert!(files.is_empty());
    }
}
