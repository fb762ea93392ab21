//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Session persistence, forced logout and cancellation of running scenarios."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use fsd_api::StubResourceApi;
use fsd_common::{AppConfig, AuthMode};
use fsd_core::{
    AuthError, DashboardEngine, DashboardError, LogoutReason, RunOutcome, ScenarioState,
    SessionEvent,
};
use tempfile::tempdir;
use tokio::sync::broadcast::error::TryRecvError;

fn config() -> AppConfig {
    fsd_logging::init();
    let mut config = AppConfig::default();
    config.api.auth = AuthMode::Required;
    config.session.store_path = None;
    config.polling.default_interval = Duration::from_millis(200);
    config
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return seen,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_token_mid_scenario_logs_out_exactly_once() {
    let mut config = config();
    // all three uploads leave together
    config.scenario.fan_out_stagger = Duration::ZERO;
    config.metrics.enabled = true;
    let stub = Arc::new(StubResourceApi::new());
    let engine = DashboardEngine::init(&config, stub.clone()).unwrap();
    engine.login("admin", "admin123").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut events = engine.subscribe_session();

    stub.set_latency(Duration::from_millis(50));
    stub.revoke_all_tokens();
    let report = engine.run_scenario("concurrent-ops").await.unwrap();
    // let the remaining branches and polls hit the rejected token too
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(matches!(
        engine.scenario_state(),
        ScenarioState::Failed { ref reason, .. } if reason == "cancelled"
    ));
    let logouts: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::LoggedOut { .. }))
        .collect();
    assert_eq!(
        logouts,
        [SessionEvent::LoggedOut {
            reason: LogoutReason::Unauthorized
        }]
    );
    assert!(!engine.is_logged_in());
    assert!(!engine.is_polling());
    assert!(stub.file_names().is_empty());

    let err = engine.list_files().await.unwrap_err();
    assert_eq!(err, DashboardError::Auth(AuthError::NotLoggedIn));
    let metrics = engine.metrics_text().unwrap().unwrap();
    assert!(metrics.contains("fsdash_forced_logouts_total 1"));
    assert!(metrics.lines().any(|line| line.starts_with("fsdash_scenario_runs_total{")
        && line.contains(r#"outcome="cancelled""#)
        && line.ends_with(" 1")));
}

#[tokio::test(start_paused = true)]
async fn rejected_token_clears_the_previous_session_view() {
    let stub = Arc::new(StubResourceApi::new());
    stub.insert_file("notes.txt", "meeting notes");
    let engine = DashboardEngine::init(&config(), stub.clone()).unwrap();
    engine.login("admin", "admin123").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.view().files.len(), 1);
    assert!(engine.view().status.is_some());
    assert!(!engine.audit_entries().is_empty());

    stub.revoke_all_tokens();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!engine.is_logged_in());
    assert!(!engine.is_polling());
    let view = engine.view();
    assert!(view.files.is_empty());
    assert!(view.locks.is_empty());
    assert!(view.status.is_none());
    assert!(engine.audit_entries().is_empty());

    // a fresh login starts from an empty dashboard and fills it again
    engine.login("admin", "admin123").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.view().files.len(), 1);
    assert_eq!(engine.active_tasks().len(), 5);
    engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn logout_cancels_the_running_scenario() {
    let stub = Arc::new(StubResourceApi::new());
    let engine = Arc::new(DashboardEngine::init(&config(), stub).unwrap());
    engine.login("admin", "admin123").await.unwrap();

    let running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_scenario("deadlock-recovery").await }
    });
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(engine.logout().await);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.elapsed < Duration::from_millis(6_000));
    assert!(engine
        .narrative()
        .texts()
        .iter()
        .any(|t| t == "[CANCELLED] deadlock-recovery stopped before completion"));
    assert!(engine.alerts().iter().all(|alert| alert.kind != "TIMEOUT"));
    assert!(!engine.is_polling());
}

#[tokio::test(start_paused = true)]
async fn persisted_session_is_restored_on_the_next_start() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("session.json");
    let mut config = config();
    config.session.store_path = Some(path.clone());
    let stub = Arc::new(StubResourceApi::new());

    let first = DashboardEngine::init(&config, stub.clone()).unwrap();
    let session = first.login("admin", "admin123").await.unwrap();
    assert!(path.exists());
    first.dispose().await;

    let second = DashboardEngine::init(&config, stub.clone()).unwrap();
    assert!(second.is_logged_in());
    assert!(second.is_polling());
    assert_eq!(second.session().unwrap().token, session.token);
    second.list_files().await.unwrap();

    assert!(second.logout().await);
    assert!(!path.exists());
    second.dispose().await;

    let third = DashboardEngine::init(&config, stub).unwrap();
    assert!(!third.is_logged_in());
    assert!(!third.is_polling());
}

#[tokio::test]
async fn login_failures_are_classified() {
    let stub = Arc::new(StubResourceApi::new());
    let engine = DashboardEngine::init(&config(), stub.clone()).unwrap();

    let err = engine.login("admin", "wrong").await.unwrap_err();
    assert!(matches!(err, DashboardError::Auth(AuthError::InvalidCredentials(_))));
    assert!(!engine.is_polling());

    stub.update_faults(|faults| faults.unavailable = true);
    let err = engine.login("admin", "admin123").await.unwrap_err();
    assert!(matches!(err, DashboardError::Auth(AuthError::Unreachable(_))));
    assert!(!engine.is_logged_in());
}
