//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Engine facade wiring session, polling, views and scenarios."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use fsd_api::{ApiOperation, FileEntry, LogEntry, OperationReceipt, ResourceApi};
use fsd_common::{AppConfig, AuthMode, PollDomain};
use fsd_logging::{fsd_info, log_system_event, SystemEventOutcome};
use fsd_metrics::{new_registry, render_text, EngineMetrics};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::alerts::{AlertFeed, FeedAlert};
use crate::audit::{AuditCategory, AuditFilterEngine};
use crate::error::{validate_file_name, AuthError, DashboardError};
use crate::gate::SessionGate;
use crate::narrative::NarrativeLog;
use crate::refresh::DashboardRefresher;
use crate::scenario::{
    ResetReport, RunReport, ScenarioFile, ScenarioSequencer, ScenarioState, ScenarioSummary,
};
use crate::scheduler::{PollScheduler, PollTaskSpec, TaskStats};
use crate::session::{
    FileSessionStore, MemorySessionStore, Session, SessionEvent, SessionManager, SessionStore,
};
use crate::view::{DashboardView, ViewSnapshot};

/// Domains refreshed after a user changes files on the server.
const AFTER_FILE_CHANGE: [PollDomain; 4] = [
    PollDomain::Files,
    PollDomain::AuditLog,
    PollDomain::Status,
    PollDomain::Locks,
];

/// The orchestration engine. Built by [`DashboardEngine::init`], torn down by
/// [`DashboardEngine::dispose`]; nothing lives in globals.
pub struct DashboardEngine {
    session: Arc<SessionManager>,
    scheduler: Arc<PollScheduler>,
    gate: Arc<SessionGate>,
    view: Arc<DashboardView>,
    audit: Arc<AuditFilterEngine>,
    alerts: Arc<AlertFeed>,
    narrative: Arc<NarrativeLog>,
    sequencer: ScenarioSequencer,
    refresher: Arc<DashboardRefresher>,
    tasks: Vec<PollTaskSpec>,
    metrics: Option<EngineMetrics>,
}

impl std::fmt::Debug for DashboardEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardEngine")
            .field("session", &self.session)
            .field("scheduler", &self.scheduler)
            .field("sequencer", &self.sequencer)
            .finish_non_exhaustive()
    }
}

impl DashboardEngine {
    /// Build the engine from configuration. Must run inside a tokio runtime:
    /// polling starts right away when a session is restored or auth is disabled.
    pub fn init(config: &AppConfig, api: Arc<dyn ResourceApi>) -> Result<Self> {
        let store: Arc<dyn SessionStore> = match &config.session.store_path {
            Some(path) => Arc::new(FileSessionStore::new(path)),
            None => Arc::new(MemorySessionStore::default()),
        };
        Self::with_store(config, api, store)
    }

    pub fn with_store(
        config: &AppConfig,
        api: Arc<dyn ResourceApi>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = if config.metrics.enabled {
            Some(EngineMetrics::new(new_registry()).context("failed to register engine metrics")?)
        } else {
            None
        };

        let session = Arc::new(SessionManager::new(api.clone(), config.api.auth, store));
        let scheduler = Arc::new(PollScheduler::new(metrics.clone()));
        let view = Arc::new(DashboardView::new(config.audit.window));
        let audit = Arc::new(AuditFilterEngine::new(config.audit.window));
        let gate = Arc::new(
            SessionGate::new(api, session.clone(), scheduler.clone(), metrics.clone())
                .bind(view.clone())
                .bind(audit.clone()),
        );
        let alerts = Arc::new(AlertFeed::new(config.alerts.capacity));
        let narrative = Arc::new(NarrativeLog::new(config.scenario.narrative_capacity));
        let sequencer = ScenarioSequencer::new(
            gate.clone(),
            scheduler.clone(),
            alerts.clone(),
            narrative.clone(),
            config.scenario.fan_out_stagger,
            metrics.clone(),
        );
        for path in &config.scenario.scenario_files {
            let file = ScenarioFile::from_file(path)?;
            debug!(path = %path.display(), scenarios = file.scenarios.len(), "loaded scenario file");
            for scenario in file.scenarios {
                sequencer.register(scenario);
            }
        }
        let refresher = Arc::new(DashboardRefresher::new(
            gate.clone(),
            view.clone(),
            audit.clone(),
            alerts.clone(),
        ));
        let tasks = config
            .polling
            .effective_tasks()
            .into_iter()
            .map(PollTaskSpec::from)
            .collect();

        let engine = Self {
            session,
            scheduler,
            gate,
            view,
            audit,
            alerts,
            narrative,
            sequencer,
            refresher,
            tasks,
            metrics,
        };
        match engine.session.mode() {
            AuthMode::Disabled => {
                engine.start_polling()?;
            }
            AuthMode::Required => {
                if engine.session.restore().is_some() {
                    engine.start_polling()?;
                }
            }
        }
        info!(auth = ?engine.session.mode(), "dashboard engine initialised");
        Ok(engine)
    }

    /// Stop polling, end every session scope and wait for the task loops to exit.
    pub async fn dispose(&self) {
        self.scheduler.shutdown().await;
        self.session.shutdown();
        log_system_event(None, "engine", "disposed", SystemEventOutcome::Success);
    }

    // --- session -------------------------------------------------------

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, DashboardError> {
        let session = self.session.login(username, password).await?;
        self.start_polling()?;
        Ok(session)
    }

    /// Idempotent. Polling always stops; any running scenario is cancelled
    /// through the session scope.
    pub async fn logout(&self) -> bool {
        self.gate.logout().await
    }

    pub fn session(&self) -> Option<Session> {
        self.session.current()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.session.mode()
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    // --- polling -------------------------------------------------------

    /// Arm the configured polling tasks under the current session scope.
    pub fn start_polling(&self) -> Result<usize, DashboardError> {
        let snapshot = self.session.snapshot();
        if self.session.mode() == AuthMode::Required && !snapshot.is_logged_in() {
            return Err(AuthError::NotLoggedIn.into());
        }
        self.scheduler
            .start(&snapshot.scope, self.tasks.iter().copied(), self.refresher.clone());
        Ok(self.tasks.len())
    }

    pub fn stop_polling(&self) -> usize {
        self.scheduler.stop()
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn active_tasks(&self) -> Vec<PollDomain> {
        self.scheduler.active_tasks()
    }

    /// Fetch every domain once, outside the timers.
    pub async fn refresh_now(&self) -> Vec<(PollDomain, Result<(), DashboardError>)> {
        self.refresher.refresh_all().await
    }

    pub fn task_stats(&self) -> BTreeMap<PollDomain, TaskStats> {
        self.scheduler.task_stats()
    }

    pub fn view(&self) -> ViewSnapshot {
        self.view.snapshot()
    }

    // --- files ---------------------------------------------------------

    pub async fn list_files(&self) -> Result<Vec<FileEntry>, DashboardError> {
        let files = self
            .gate
            .call(ApiOperation::ListFiles, |api, token| async move {
                api.list_files(token.as_ref()).await
            })
            .await?;
        self.view.set_files(files.clone());
        Ok(files)
    }

    pub async fn upload_file(
        &self,
        name: &str,
        content: impl Into<Bytes>,
    ) -> Result<OperationReceipt, DashboardError> {
        validate_file_name(name)?;
        let content = content.into();
        let size = content.len();
        let receipt = self
            .gate
            .call(ApiOperation::UploadFile, |api, token| async move {
                api.upload_file(token.as_ref(), name, content).await
            })
            .await?;
        fsd_info!("uploaded {name} ({size} bytes)");
        self.after_file_change();
        Ok(receipt)
    }

    pub async fn download_file(&self, name: &str) -> Result<Bytes, DashboardError> {
        validate_file_name(name)?;
        let content = self
            .gate
            .call(ApiOperation::DownloadFile, |api, token| async move {
                api.download_file(token.as_ref(), name).await
            })
            .await?;
        // downloads take a read lock and leave an audit record
        self.scheduler.trigger(PollDomain::AuditLog);
        Ok(content)
    }

    pub async fn delete_file(&self, name: &str) -> Result<OperationReceipt, DashboardError> {
        validate_file_name(name)?;
        let receipt = self
            .gate
            .call(ApiOperation::DeleteFile, |api, token| async move {
                api.delete_file(token.as_ref(), name).await
            })
            .await?;
        fsd_info!("deleted {name}");
        self.after_file_change();
        Ok(receipt)
    }

    fn after_file_change(&self) {
        for domain in AFTER_FILE_CHANGE {
            self.scheduler.trigger(domain);
        }
    }

    // --- audit & alerts ------------------------------------------------

    /// Change the audit category and return the re-filtered window.
    pub fn filter_audit(&self, category: AuditCategory) -> Vec<LogEntry> {
        self.audit.select(category)
    }

    pub fn audit_category(&self) -> AuditCategory {
        self.audit.category()
    }

    /// Visible audit window, most recent first.
    pub fn audit_entries(&self) -> Vec<LogEntry> {
        self.audit.visible()
    }

    pub async fn clear_audit_log(&self) -> Result<(), DashboardError> {
        self.gate
            .call(ApiOperation::ClearAuditLog, |api, token| async move {
                api.clear_audit_log(token.as_ref()).await
            })
            .await?;
        self.audit.clear();
        self.scheduler.trigger(PollDomain::AuditLog);
        Ok(())
    }

    pub fn alerts(&self) -> Vec<FeedAlert> {
        self.alerts.snapshot()
    }

    pub fn push_alert(&self, alert: FeedAlert) {
        self.alerts.push(alert);
    }

    pub fn clear_alerts(&self) {
        self.alerts.clear();
    }

    // --- scenarios -----------------------------------------------------

    pub async fn run_scenario(&self, id: &str) -> Result<RunReport, DashboardError> {
        self.sequencer.run(id).await
    }

    pub fn explain_scenario(&self, id: &str) -> Result<Vec<String>, DashboardError> {
        self.sequencer.explain(id)
    }

    pub async fn reset_scenarios(&self) -> ResetReport {
        self.sequencer.reset().await
    }

    pub fn set_explain_mode(&self, enabled: bool) -> bool {
        self.sequencer.set_explain_mode(enabled)
    }

    pub fn toggle_explain_mode(&self) -> bool {
        self.sequencer.toggle_explain_mode()
    }

    pub fn explain_mode(&self) -> bool {
        self.sequencer.explain_mode()
    }

    pub fn scenarios(&self) -> Vec<ScenarioSummary> {
        self.sequencer.list()
    }

    pub fn scenario_state(&self) -> ScenarioState {
        self.sequencer.state()
    }

    pub fn narrative(&self) -> &Arc<NarrativeLog> {
        &self.narrative
    }

    // --- metrics -------------------------------------------------------

    /// Prometheus text exposition, `None` when metrics are disabled.
    pub fn metrics_text(&self) -> Result<Option<String>> {
        self.metrics
            .as_ref()
            .map(|metrics| render_text(&metrics.registry()))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsd_api::StubResourceApi;
    use std::time::Duration;

    fn config(auth: AuthMode) -> AppConfig {
        let mut config = AppConfig::default();
        config.api.auth = auth;
        config.session.store_path = None;
        config.metrics.enabled = true;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn login_arms_every_enabled_task() {
        let stub = Arc::new(StubResourceApi::new());
        let engine = DashboardEngine::init(&config(AuthMode::Required), stub).unwrap();
        assert!(!engine.is_polling());
        assert_eq!(
            engine.start_polling().unwrap_err(),
            DashboardError::Auth(AuthError::NotLoggedIn)
        );

        engine.login("admin", "admin123").await.unwrap();
        assert_eq!(engine.active_tasks().len(), PollDomain::ALL.len());
        engine.dispose().await;
        assert!(!engine.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_auth_polls_from_init() {
        let stub = Arc::new(StubResourceApi::new().without_auth());
        stub.insert_file("notes.txt", "hello");
        let engine = DashboardEngine::init(&config(AuthMode::Disabled), stub).unwrap();
        assert!(engine.is_polling());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let files = engine.view().files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "notes.txt");
        engine.dispose().await;
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_server() {
        let stub = Arc::new(StubResourceApi::new());
        let engine = DashboardEngine::init(&config(AuthMode::Required), stub.clone()).unwrap();
        engine.login("admin", "admin123").await.unwrap();
        engine.stop_polling();
        stub.reset_accounting();

        assert!(matches!(
            engine.upload_file("", "x").await,
            Err(DashboardError::Validation(_))
        ));
        assert!(matches!(
            engine.delete_file("../secrets").await,
            Err(DashboardError::Validation(_))
        ));
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn metrics_render_when_enabled() {
        let stub = Arc::new(StubResourceApi::new());
        let engine = DashboardEngine::init(&config(AuthMode::Required), stub.clone()).unwrap();
        assert!(engine.metrics_text().unwrap().is_some());

        let mut quiet = config(AuthMode::Required);
        quiet.metrics.enabled = false;
        let engine = DashboardEngine::init(&quiet, stub).unwrap();
        assert!(engine.metrics_text().unwrap().is_none());
    }
}
