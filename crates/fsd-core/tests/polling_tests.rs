//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Polling, logout and alert feed behaviour against the stub server."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use fsd_api::{ApiOperation, LogEntry, Severity, StubFaults, StubResourceApi};
use fsd_common::{AppConfig, AuthMode, PollDomain};
use fsd_core::{AuditCategory, DashboardEngine, DomainHealth, LogoutReason, SessionEvent};

fn config(auth: AuthMode, interval_ms: u64) -> AppConfig {
    fsd_logging::init();
    let mut config = AppConfig::default();
    config.api.auth = auth;
    config.session.store_path = None;
    config.polling.default_interval = Duration::from_millis(interval_ms);
    config
}

#[tokio::test(start_paused = true)]
async fn slow_fetches_are_skipped_never_overlapped() {
    let stub = Arc::new(StubResourceApi::new());
    let engine = DashboardEngine::init(&config(AuthMode::Required, 100), stub.clone()).unwrap();
    engine.login("admin", "admin123").await.unwrap();
    stub.reset_accounting();
    // every fetch outlives two ticks
    stub.set_latency(Duration::from_millis(250));

    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.stop_polling();

    for op in [
        ApiOperation::FetchStatus,
        ApiOperation::ListFiles,
        ApiOperation::FetchAuditLog,
        ApiOperation::FetchSecurityEvents,
        ApiOperation::FetchLocks,
    ] {
        assert!(stub.calls(op) > 1, "{op} was never polled again");
        assert_eq!(stub.peak_in_flight(op), 1, "{op} overlapped");
    }
    let stats = engine.task_stats();
    let status = &stats[&PollDomain::Status];
    assert!(status.skipped > 0);
    assert!(status.ticks > status.fetches);
    engine.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn logout_in_any_state_leaves_no_tasks() {
    let stub = Arc::new(StubResourceApi::new());
    let engine = DashboardEngine::init(&config(AuthMode::Required, 100), stub).unwrap();
    let mut events = engine.subscribe_session();

    assert!(!engine.logout().await);
    assert!(!engine.is_polling());

    engine.login("admin", "admin123").await.unwrap();
    assert!(engine.is_polling());
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert!(engine.logout().await);
    assert!(!engine.logout().await);
    assert!(!engine.is_logged_in());
    assert!(engine.active_tasks().is_empty());
    assert!(engine.view().files.is_empty());

    assert!(matches!(events.try_recv(), Ok(SessionEvent::LoggedIn { .. })));
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequested
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn outages_mark_domains_failing_until_the_next_good_tick() {
    let stub = Arc::new(StubResourceApi::new().without_auth());
    stub.set_faults(StubFaults {
        unavailable: true,
        ..StubFaults::default()
    });
    let engine = DashboardEngine::init(&config(AuthMode::Disabled, 100), stub.clone()).unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    match engine.view().health.get(&PollDomain::Files).cloned() {
        Some(DomainHealth::Failing { consecutive, .. }) => assert!(consecutive >= 2),
        other => panic!("unexpected health {other:?}"),
    }
    assert!(engine.is_polling());

    stub.set_faults(StubFaults::default());
    stub.insert_file("report.txt", "quarterly");
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(matches!(
        engine.view().health[&PollDomain::Files],
        DomainHealth::Healthy { .. }
    ));
    assert_eq!(engine.view().files.len(), 1);
    engine.dispose().await;
}

#[tokio::test]
async fn security_events_respect_the_feed_cap() {
    let stub = Arc::new(StubResourceApi::new().without_auth());
    for n in 1..=8 {
        stub.push_security_event("INTEGRITY_FAIL", &format!("checksum mismatch {n}"));
    }
    let engine = DashboardEngine::init(&config(AuthMode::Disabled, 60_000), stub.clone()).unwrap();
    engine.stop_polling();

    for (domain, result) in engine.refresh_now().await {
        assert!(result.is_ok(), "{domain} failed");
    }
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 5);
    assert_eq!(alerts[0].message, "checksum mismatch 8");
    assert_eq!(alerts[4].message, "checksum mismatch 4");
    assert!(alerts.iter().all(|alert| alert.severity == Severity::Critical));

    // already-seen events are not pushed twice
    engine.refresh_now().await;
    assert_eq!(engine.alerts()[0].message, "checksum mismatch 8");
    stub.push_security_event("ACCESS_DENIED", "user attempted admin route");
    engine.refresh_now().await;
    let alerts = engine.alerts();
    assert_eq!(alerts.len(), 5);
    assert_eq!(alerts[0].kind, "ACCESS_DENIED");
    assert_eq!(alerts[1].message, "checksum mismatch 8");
}

#[tokio::test]
async fn audit_filter_recomputes_over_the_polled_window() {
    let stub = Arc::new(StubResourceApi::new().without_auth());
    for n in 0..30 {
        let status = if n % 3 == 0 { "FAILED" } else { "SUCCESS" };
        stub.push_audit(LogEntry::new(
            format!("2024-01-01 10:00:{n:02}"),
            if n % 2 == 0 { "UPLOAD" } else { "DOWNLOAD" },
            format!("file-{n}.txt"),
            status,
            "",
        ));
    }
    let engine = DashboardEngine::init(&config(AuthMode::Disabled, 60_000), stub).unwrap();
    engine.stop_polling();
    engine.refresh_now().await;

    let all = engine.audit_entries();
    assert_eq!(all.len(), 20);
    // the listing poll leaves its own LIST record next to ours
    let newest = all.iter().find(|entry| entry.file.starts_with("file-")).unwrap();
    assert_eq!(newest.file, "file-29.txt");

    let failed = engine.filter_audit(AuditCategory::FailedOnly);
    assert!(!failed.is_empty());
    assert!(failed.iter().all(|entry| entry.status == "FAILED"));
    assert_eq!(engine.audit_category(), AuditCategory::FailedOnly);
    assert_eq!(engine.audit_entries(), failed);

    let uploads = engine.filter_audit("upload".parse().unwrap());
    assert!(uploads.iter().all(|entry| entry.operation == "UPLOAD"));
}
