//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Runs scripted scenarios against the live backend."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use fsd_api::{ApiOperation, Severity};
use fsd_common::PollDomain;
use fsd_logging::{fsd_debug, fsd_info, log_system_event, LogContext, SystemEventOutcome};
use fsd_metrics::EngineMetrics;
use fsd_rt::FanOutExecutor;
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::catalog::{self, is_demo_artifact};
use super::model::{render, Line, Scenario, Step, StepAction};
use crate::alerts::{AlertFeed, AlertSource, FeedAlert};
use crate::error::{DashboardError, ScenarioError};
use crate::gate::SessionGate;
use crate::narrative::{NarrativeLevel, NarrativeLog};
use crate::scheduler::PollScheduler;
use crate::session::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScenarioState {
    #[default]
    Idle,
    Running {
        id: String,
    },
    Completed {
        id: String,
    },
    Failed {
        id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    /// The session ended or a reset interrupted the run.
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub scenario: String,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
}

/// Result of a best-effort cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub deleted: Vec<String>,
    /// Files still present after the retry pass, with the last error.
    pub failed: Vec<(String, String)>,
    /// Deletions that needed the retry pass.
    pub retried: usize,
    pub cancelled: Option<String>,
    pub listing_error: Option<String>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.listing_error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub explain_only: bool,
}

#[derive(Debug, Error)]
enum StepFailure {
    #[error("{action} failed: {source}")]
    Action {
        action: &'static str,
        #[source]
        source: DashboardError,
    },
    #[error("{failed} of {total} concurrent operations failed")]
    FanOut { failed: usize, total: usize },
}

struct ActiveRun {
    id: String,
    run_id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SequencerState {
    state: ScenarioState,
    active: Option<ActiveRun>,
    next_run: u64,
}

/// Executes steps; cloned into every fan-out branch.
#[derive(Clone)]
struct StepRunner {
    gate: Arc<SessionGate>,
    scheduler: Arc<PollScheduler>,
    alerts: Arc<AlertFeed>,
    narrative: Arc<NarrativeLog>,
    stagger: Duration,
}

impl StepRunner {
    fn emit(&self, scenario: &str, lines: &[Line], vars: &[(&str, String)]) {
        for line in lines {
            self.narrative
                .emit(line.level(), render(line.text(), vars), Some(scenario));
        }
    }

    fn run_steps(self, scenario: String, steps: Vec<Step>) -> BoxFuture<'static, Result<(), StepFailure>> {
        async move {
            for (index, step) in steps.iter().enumerate() {
                self.run_step(&scenario, index + 1, step).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn run_step(&self, scenario: &str, index: usize, step: &Step) -> Result<(), StepFailure> {
        let ctx = LogContext::new().with_scenario(scenario).with_step(index);
        fsd_debug!(context = ctx, "running {} step", step.action.label());
        let mut vars = vec![("timestamp", timestamp())];
        self.emit(scenario, &step.before, &vars);

        let action = step.action.label();
        let failed = |source: DashboardError| {
            self.narrative.emit(
                NarrativeLevel::Error,
                format!("[ERROR] {action} failed: {source}"),
                Some(scenario),
            );
            StepFailure::Action { action, source }
        };

        match &step.action {
            StepAction::Narrate => {}
            StepAction::Upload { file, content } => {
                let body = Bytes::from(render(content, &vars));
                let name = file.clone();
                self.gate
                    .call(ApiOperation::UploadFile, |api, token| async move {
                        api.upload_file(token.as_ref(), &name, body).await
                    })
                    .await
                    .map_err(failed)?;
                vars.push(("file", file.clone()));
            }
            StepAction::Download { file } => {
                let name = file.clone();
                let content = self
                    .gate
                    .call(ApiOperation::DownloadFile, |api, token| async move {
                        api.download_file(token.as_ref(), &name).await
                    })
                    .await
                    .map_err(failed)?;
                vars.push(("file", file.clone()));
                vars.push(("bytes", content.len().to_string()));
            }
            StepAction::Delete { file } => {
                let name = file.clone();
                self.gate
                    .call(ApiOperation::DeleteFile, |api, token| async move {
                        api.delete_file(token.as_ref(), &name).await
                    })
                    .await
                    .map_err(failed)?;
                vars.push(("file", file.clone()));
            }
            StepAction::FetchSecurityEvents => {
                let events = self
                    .gate
                    .call(ApiOperation::FetchSecurityEvents, |api, token| async move {
                        api.fetch_security_events(token.as_ref()).await
                    })
                    .await
                    .map_err(failed)?;
                vars.push(("count", events.len().to_string()));
            }
            StepAction::Refresh { domains } => {
                let domains: &[PollDomain] = if domains.is_empty() {
                    &PollDomain::ALL
                } else {
                    domains
                };
                for domain in domains {
                    self.scheduler.trigger(*domain);
                }
            }
            StepAction::Delay { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
            StepAction::FanOut {
                branches,
                stagger_ms,
            } => {
                let stagger = stagger_ms.map(Duration::from_millis).unwrap_or(self.stagger);
                let mut fan_out = FanOutExecutor::new(stagger);
                for branch in branches {
                    fan_out.spawn(
                        branch.label.clone(),
                        self.clone().run_steps(scenario.to_owned(), branch.steps.clone()),
                    );
                }
                let total = fan_out.len();
                let mut failed_branches = 0;
                for outcome in fan_out.join_all().await {
                    match outcome.result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            failed_branches += 1;
                            fsd_debug!(context = ctx, "branch {} failed: {err}", outcome.label);
                        }
                        Err(err) => {
                            failed_branches += 1;
                            self.narrative.emit(
                                NarrativeLevel::Error,
                                format!("[ERROR] {err}"),
                                Some(scenario),
                            );
                        }
                    }
                }
                if failed_branches > 0 {
                    let failure = StepFailure::FanOut {
                        failed: failed_branches,
                        total,
                    };
                    self.narrative
                        .emit(NarrativeLevel::Error, format!("[ERROR] {failure}"), Some(scenario));
                    return Err(failure);
                }
            }
            StepAction::RaiseAlert {
                kind,
                message,
                severity,
            } => {
                self.alerts.push(FeedAlert::new(
                    kind.clone(),
                    render(message, &vars),
                    *severity,
                    AlertSource::Scenario,
                ));
            }
        }

        self.emit(scenario, &step.after, &vars);
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Owns the scenario catalog and the single active run.
pub struct ScenarioSequencer {
    catalog: RwLock<IndexMap<String, Arc<Scenario>>>,
    runner: StepRunner,
    session: Arc<SessionManager>,
    explain_mode: AtomicBool,
    state: Mutex<SequencerState>,
    metrics: Option<EngineMetrics>,
}

impl std::fmt::Debug for ScenarioSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioSequencer")
            .field("state", &self.state())
            .field("explain_mode", &self.explain_mode())
            .finish_non_exhaustive()
    }
}

impl ScenarioSequencer {
    pub fn new(
        gate: Arc<SessionGate>,
        scheduler: Arc<PollScheduler>,
        alerts: Arc<AlertFeed>,
        narrative: Arc<NarrativeLog>,
        stagger: Duration,
        metrics: Option<EngineMetrics>,
    ) -> Self {
        let session = gate.session().clone();
        let catalog = catalog::builtin()
            .into_iter()
            .map(|scenario| (scenario.id.clone(), Arc::new(scenario)))
            .collect();
        Self {
            catalog: RwLock::new(catalog),
            runner: StepRunner {
                gate,
                scheduler,
                alerts,
                narrative,
                stagger,
            },
            session,
            explain_mode: AtomicBool::new(false),
            state: Mutex::new(SequencerState::default()),
            metrics,
        }
    }

    /// Add or replace a scenario by id.
    pub fn register(&self, scenario: Scenario) {
        let id = scenario.id.clone();
        if self
            .catalog
            .write()
            .insert(id.clone(), Arc::new(scenario))
            .is_some()
        {
            warn!(scenario = %id, "scenario definition replaced");
        }
    }

    pub fn list(&self) -> Vec<ScenarioSummary> {
        self.catalog
            .read()
            .values()
            .map(|scenario| ScenarioSummary {
                id: scenario.id.clone(),
                title: scenario.title.clone(),
                description: scenario.description.clone(),
                explain_only: scenario.explain_only,
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Scenario>> {
        self.catalog.read().get(id).cloned()
    }

    pub fn state(&self) -> ScenarioState {
        self.state.lock().state.clone()
    }

    pub fn active(&self) -> Option<String> {
        self.state.lock().active.as_ref().map(|run| run.id.clone())
    }

    pub fn explain_mode(&self) -> bool {
        self.explain_mode.load(Ordering::Acquire)
    }

    /// Returns the previous setting.
    pub fn set_explain_mode(&self, enabled: bool) -> bool {
        let previous = self.explain_mode.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            let narrative = &self.runner.narrative;
            if enabled {
                narrative.emit(
                    NarrativeLevel::Warning,
                    "[DEMO] Explain Mode ENABLED - No actions will execute",
                    None,
                );
            } else {
                narrative.emit(
                    NarrativeLevel::Success,
                    "[DEMO] Explain Mode DISABLED - Actions will execute",
                    None,
                );
            }
        }
        previous
    }

    pub fn toggle_explain_mode(&self) -> bool {
        let enabled = !self.explain_mode();
        self.set_explain_mode(enabled);
        enabled
    }

    fn lookup(&self, id: &str) -> Result<Arc<Scenario>, DashboardError> {
        self.get(id)
            .ok_or_else(|| ScenarioError::UnknownScenario(id.to_owned()).into())
    }

    /// Print a scenario's explanation. Never calls the backend.
    pub fn explain(&self, id: &str) -> Result<Vec<String>, DashboardError> {
        let scenario = self.lookup(id)?;
        let narrative = &self.runner.narrative;
        narrative.emit(
            NarrativeLevel::Info,
            format!("[EXPLAIN] Showing explanation for {}", scenario.id),
            Some(&scenario.id),
        );
        for line in &scenario.explanation {
            narrative.emit(NarrativeLevel::Info, line.clone(), Some(&scenario.id));
        }
        Ok(scenario.explanation.clone())
    }

    /// Run a scenario to completion. Only one run may be active.
    pub async fn run(&self, id: &str) -> Result<RunReport, DashboardError> {
        if self.explain_mode() {
            return Err(ScenarioError::ExplainModeActive.into());
        }
        let scenario = self.lookup(id)?;
        if scenario.explain_only {
            return Err(ScenarioError::ExplainOnly(scenario.id.clone()).into());
        }
        let (run_id, cancel) = {
            let mut state = self.state.lock();
            if let Some(active) = &state.active {
                return Err(ScenarioError::AlreadyRunning {
                    active: active.id.clone(),
                }
                .into());
            }
            state.next_run += 1;
            let run_id = state.next_run;
            let cancel = self.session.snapshot().scope.child_token();
            state.active = Some(ActiveRun {
                id: scenario.id.clone(),
                run_id,
                cancel: cancel.clone(),
            });
            state.state = ScenarioState::Running {
                id: scenario.id.clone(),
            };
            (run_id, cancel)
        };

        let started = Instant::now();
        fsd_info!(
            context = LogContext::new().with_scenario(&scenario.id),
            "scenario started"
        );
        let narrative = &self.runner.narrative;
        narrative.emit(
            NarrativeLevel::Info,
            format!("[DEMO] Starting: {}", scenario.id.to_uppercase()),
            Some(&scenario.id),
        );
        narrative.emit(NarrativeLevel::Info, "=".repeat(50), Some(&scenario.id));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.runner.clone().run_steps(scenario.id.clone(), scenario.steps.clone()) => Some(result),
        };
        let outcome = match result {
            None => RunOutcome::Cancelled,
            Some(Ok(())) => RunOutcome::Completed,
            Some(Err(failure)) => RunOutcome::Failed(failure.to_string()),
        };
        self.finish(&scenario, run_id, &outcome);
        Ok(RunReport {
            scenario: scenario.id.clone(),
            outcome,
            elapsed: started.elapsed(),
        })
    }

    fn finish(&self, scenario: &Scenario, run_id: u64, outcome: &RunOutcome) {
        let current = {
            let mut state = self.state.lock();
            match &state.active {
                Some(active) if active.run_id == run_id => {
                    state.active = None;
                    state.state = match outcome {
                        RunOutcome::Completed => ScenarioState::Completed {
                            id: scenario.id.clone(),
                        },
                        RunOutcome::Failed(reason) => ScenarioState::Failed {
                            id: scenario.id.clone(),
                            reason: reason.clone(),
                        },
                        RunOutcome::Cancelled => ScenarioState::Failed {
                            id: scenario.id.clone(),
                            reason: "cancelled".to_owned(),
                        },
                    };
                    true
                }
                _ => false,
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_scenario(&scenario.id, outcome.as_str());
        }
        let ctx = LogContext::new().with_scenario(&scenario.id);
        if !current {
            // reset took over this run; it owns the feed and the narrative now
            log_system_event(Some(&ctx), "scenario", "run superseded by reset", SystemEventOutcome::Degraded);
            return;
        }
        match outcome {
            RunOutcome::Completed => {
                if let Some(alert) = &scenario.completion_alert {
                    self.runner.alerts.push(FeedAlert::new(
                        alert.kind.clone(),
                        alert.message.clone(),
                        alert.severity,
                        AlertSource::Scenario,
                    ));
                }
                log_system_event(Some(&ctx), "scenario", "completed", SystemEventOutcome::Success);
            }
            RunOutcome::Failed(reason) => {
                self.runner.alerts.push(FeedAlert::new(
                    "SCENARIO_FAILED",
                    format!("{} failed: {reason}", scenario.title),
                    Severity::Error,
                    AlertSource::Scenario,
                ));
                log_system_event(Some(&ctx), "scenario", reason, SystemEventOutcome::Fault);
            }
            RunOutcome::Cancelled => {
                self.runner.narrative.emit(
                    NarrativeLevel::Warning,
                    format!("[CANCELLED] {} stopped before completion", scenario.id),
                    Some(&scenario.id),
                );
                log_system_event(Some(&ctx), "scenario", "cancelled", SystemEventOutcome::Degraded);
            }
        }
    }

    /// Cancel any active run and delete every scenario artifact on the server.
    ///
    /// Individual delete failures never stop the sweep; they get one retry pass.
    pub async fn reset(&self) -> ResetReport {
        let mut report = ResetReport::default();
        let cancelled = {
            let mut state = self.state.lock();
            state.state = ScenarioState::Idle;
            state.active.take()
        };
        if let Some(active) = cancelled {
            active.cancel.cancel();
            report.cancelled = Some(active.id);
        }

        let narrative = &self.runner.narrative;
        narrative.emit(NarrativeLevel::Warning, "[RESET] Clearing demo state...", None);

        let gate = &self.runner.gate;
        match gate
            .call(ApiOperation::ListFiles, |api, token| async move {
                api.list_files(token.as_ref()).await
            })
            .await
        {
            Ok(files) => {
                let mut pending: Vec<String> = files
                    .into_iter()
                    .map(|file| file.name)
                    .filter(|name| is_demo_artifact(name))
                    .collect();
                for pass in 0..2 {
                    let mut failures = Vec::new();
                    for name in pending {
                        match self.delete_artifact(&name).await {
                            Ok(()) => {
                                narrative.emit(
                                    NarrativeLevel::Success,
                                    format!("[DELETED] {name}"),
                                    None,
                                );
                                if pass > 0 {
                                    report.retried += 1;
                                }
                                report.deleted.push(name);
                            }
                            Err(err) => failures.push((name, err.to_string())),
                        }
                    }
                    if pass == 0 {
                        pending = failures.into_iter().map(|(name, _)| name).collect();
                    } else {
                        report.failed = failures;
                        break;
                    }
                    if pending.is_empty() {
                        break;
                    }
                }
                narrative.emit(
                    NarrativeLevel::Success,
                    format!("[RESET] Removed {} demo files", report.deleted.len()),
                    None,
                );
            }
            Err(err) => report.listing_error = Some(err.to_string()),
        }

        self.runner.alerts.clear();
        narrative.clear();
        // failures outlive the cleared console
        for (name, err) in &report.failed {
            narrative.emit(
                NarrativeLevel::Error,
                format!("[ERROR] Could not delete {name}: {err}"),
                None,
            );
        }
        if let Some(err) = &report.listing_error {
            narrative.emit(NarrativeLevel::Error, format!("[ERROR] Reset failed: {err}"), None);
        }
        for domain in PollDomain::ALL {
            self.runner.scheduler.trigger(domain);
        }
        log_system_event(
            None,
            "scenario_reset",
            &format!(
                "deleted={} failed={} retried={}",
                report.deleted.len(),
                report.failed.len(),
                report.retried
            ),
            if report.is_clean() {
                SystemEventOutcome::Success
            } else {
                SystemEventOutcome::Degraded
            },
        );
        report
    }

    async fn delete_artifact(&self, name: &str) -> Result<(), DashboardError> {
        let name = name.to_owned();
        self.runner
            .gate
            .call(ApiOperation::DeleteFile, |api, token| async move {
                api.delete_file(token.as_ref(), &name).await
            })
            .await
            .map(|_| ())
    }
}
