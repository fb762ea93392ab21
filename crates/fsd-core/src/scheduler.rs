//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Per-domain polling tasks with an in-flight guard."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
//! One repeating timer per data domain. A tick that finds the previous fetch
//! of the same domain still outstanding is dropped; ticks never queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fsd_common::PollDomain;
use fsd_logging::{fsd_warn, LogContext};
use fsd_metrics::EngineMetrics;
use fsd_rt::RateLimiter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::DashboardError;

/// Consumer of a domain refresh. Called once per non-skipped tick.
#[async_trait]
pub trait PollHandler: Send + Sync + 'static {
    async fn poll(&self, domain: PollDomain) -> Result<(), DashboardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTaskSpec {
    pub domain: PollDomain,
    pub interval: Duration,
}

impl From<(PollDomain, Duration)> for PollTaskSpec {
    fn from((domain, interval): (PollDomain, Duration)) -> Self {
        Self { domain, interval }
    }
}

/// Counters kept per domain for the lifetime of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub ticks: u64,
    pub fetches: u64,
    pub skipped: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

type StatsTable = Arc<Mutex<BTreeMap<PollDomain, TaskStats>>>;

struct TaskEntry {
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
struct TaskContext {
    domain: PollDomain,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    handler: Arc<dyn PollHandler>,
    stats: StatsTable,
    metrics: Option<EngineMetrics>,
}

pub struct PollScheduler {
    tasks: Mutex<BTreeMap<PollDomain, TaskEntry>>,
    stats: StatsTable,
    metrics: Option<EngineMetrics>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("active", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

impl PollScheduler {
    pub fn new(metrics: Option<EngineMetrics>) -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            stats: Arc::default(),
            metrics,
        }
    }

    /// Arm one task per spec under `scope`. Tasks already running are replaced.
    ///
    /// Each task fetches once immediately, then on every tick.
    pub fn start(
        &self,
        scope: &CancellationToken,
        specs: impl IntoIterator<Item = PollTaskSpec>,
        handler: Arc<dyn PollHandler>,
    ) {
        let mut tasks = self.tasks.lock();
        for spec in specs {
            if let Some(previous) = tasks.remove(&spec.domain) {
                previous.cancel.cancel();
            }
            let in_flight = Arc::new(AtomicBool::new(false));
            let cancel = scope.child_token();
            let trigger = Arc::new(Notify::new());
            let ctx = TaskContext {
                domain: spec.domain,
                in_flight: in_flight.clone(),
                cancel: cancel.clone(),
                handler: handler.clone(),
                stats: self.stats.clone(),
                metrics: self.metrics.clone(),
            };
            let handle = tokio::spawn(run_task(ctx, spec.interval, trigger.clone()));
            debug!(task = %spec.domain, interval_ms = spec.interval.as_millis() as u64, "polling task armed");
            tasks.insert(
                spec.domain,
                TaskEntry {
                    interval: spec.interval,
                    in_flight,
                    cancel,
                    trigger,
                    handle,
                },
            );
        }
        info!(tasks = tasks.len(), "polling started");
    }

    /// Cancel every timer and clear in-flight flags.
    ///
    /// Never waits on a task, so it may be called from inside a fetch.
    pub fn stop(&self) -> usize {
        let drained = std::mem::take(&mut *self.tasks.lock());
        let count = drained.len();
        for (_, entry) in drained {
            entry.cancel.cancel();
            entry.in_flight.store(false, Ordering::Release);
        }
        if count > 0 {
            info!(tasks = count, "polling stopped");
        }
        count
    }

    /// Drop the tasks whose session scope has already ended.
    ///
    /// Tasks armed under a newer scope keep running.
    pub fn stop_cancelled(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, entry| {
            if entry.cancel.is_cancelled() {
                entry.in_flight.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
        let count = before - tasks.len();
        if count > 0 {
            info!(tasks = count, "polling stopped for ended session");
        }
        count
    }

    /// Stop and wait for every task loop to exit.
    pub async fn shutdown(&self) {
        let drained = std::mem::take(&mut *self.tasks.lock());
        for (domain, entry) in drained {
            entry.cancel.cancel();
            entry.in_flight.store(false, Ordering::Release);
            if let Err(err) = entry.handle.await {
                if !err.is_cancelled() {
                    debug!(task = %domain, error = %err, "polling task ended abnormally");
                }
            }
        }
    }

    /// Ask a task for an immediate fetch. Still subject to the in-flight guard.
    pub fn trigger(&self, domain: PollDomain) -> bool {
        match self.tasks.lock().get(&domain) {
            Some(entry) => {
                entry.trigger.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    pub fn active_tasks(&self) -> Vec<PollDomain> {
        self.tasks.lock().keys().copied().collect()
    }

    pub fn interval(&self, domain: PollDomain) -> Option<Duration> {
        self.tasks.lock().get(&domain).map(|entry| entry.interval)
    }

    pub fn in_flight(&self, domain: PollDomain) -> bool {
        self.tasks
            .lock()
            .get(&domain)
            .map(|entry| entry.in_flight.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn task_stats(&self) -> BTreeMap<PollDomain, TaskStats> {
        self.stats.lock().clone()
    }
}

async fn run_task(ctx: TaskContext, interval: Duration, trigger: Arc<Notify>) {
    if ctx.cancel.is_cancelled() {
        return;
    }
    let mut limiter = RateLimiter::new(interval);
    dispatch(&ctx);
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = limiter.tick() => {
                ctx.stats.lock().entry(ctx.domain).or_default().ticks += 1;
                if let Some(metrics) = &ctx.metrics {
                    metrics.inc_tick(ctx.domain.as_str());
                }
            }
            _ = trigger.notified() => {
                trace!(task = %ctx.domain, "immediate refresh requested");
            }
        }
        dispatch(&ctx);
    }
    trace!(task = %ctx.domain, "polling task exited");
}

fn dispatch(ctx: &TaskContext) {
    if ctx.in_flight.swap(true, Ordering::AcqRel) {
        trace!(task = %ctx.domain, "previous fetch still in flight; tick skipped");
        ctx.stats.lock().entry(ctx.domain).or_default().skipped += 1;
        if let Some(metrics) = &ctx.metrics {
            metrics.inc_skipped(ctx.domain.as_str());
        }
        return;
    }
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = ctx.handler.poll(ctx.domain) => Some(result),
        };
        ctx.in_flight.store(false, Ordering::Release);
        let Some(result) = result else {
            trace!(task = %ctx.domain, "fetch abandoned after cancellation");
            return;
        };
        let success = result.is_ok();
        {
            let mut stats = ctx.stats.lock();
            let entry = stats.entry(ctx.domain).or_default();
            match &result {
                Ok(()) => entry.fetches += 1,
                Err(err) => {
                    entry.failures += 1;
                    entry.last_error = Some(err.to_string());
                }
            }
        }
        if let Some(metrics) = &ctx.metrics {
            metrics.record_fetch(ctx.domain.as_str(), started.elapsed(), success);
        }
        if let Err(err) = result {
            fsd_warn!(
                context = LogContext::new().with_task(ctx.domain.as_str()),
                "poll fetch failed: {err}"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct SlowHandler {
        latency: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PollHandler for SlowHandler {
        async fn poll(&self, _domain: PollDomain) -> Result<(), DashboardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(DashboardError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn spec(domain: PollDomain, millis: u64) -> PollTaskSpec {
        PollTaskSpec {
            domain,
            interval: Duration::from_millis(millis),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetches_skip_ticks_instead_of_queueing() {
        let handler = Arc::new(SlowHandler {
            latency: Duration::from_millis(2_500),
            ..Default::default()
        });
        let scheduler = PollScheduler::new(None);
        let scope = CancellationToken::new();
        scheduler.start(&scope, [spec(PollDomain::Status, 1_000)], handler.clone());

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        scheduler.stop();

        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
        let stats = scheduler.task_stats()[&PollDomain::Status].clone();
        assert!(stats.skipped > 0, "expected skipped ticks: {stats:?}");
        assert_eq!(stats.ticks, 10);
        assert!(handler.calls.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_clears_tasks() {
        let handler = Arc::new(SlowHandler::default());
        let scheduler = PollScheduler::new(None);
        let scope = CancellationToken::new();
        scheduler.start(
            &scope,
            [spec(PollDomain::Status, 500), spec(PollDomain::Files, 500)],
            handler.clone(),
        );
        assert_eq!(scheduler.active_tasks().len(), 2);
        assert_eq!(scheduler.stop(), 2);
        assert_eq!(scheduler.stop(), 0);
        assert!(!scheduler.is_running());
        assert!(!scheduler.in_flight(PollDomain::Status));

        let calls = handler.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_cancellation_halts_every_task() {
        let handler = Arc::new(SlowHandler::default());
        let scheduler = PollScheduler::new(None);
        let scope = CancellationToken::new();
        scheduler.start(&scope, [spec(PollDomain::Locks, 200)], handler.clone());
        tokio::time::sleep(Duration::from_millis(450)).await;
        scope.cancel();
        tokio::task::yield_now().await;
        let calls = handler.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_polling_continues() {
        let handler = Arc::new(SlowHandler {
            fail: true,
            ..Default::default()
        });
        let scheduler = PollScheduler::new(None);
        let scope = CancellationToken::new();
        scheduler.start(&scope, [spec(PollDomain::Files, 1_000)], handler.clone());
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        scheduler.shutdown().await;

        let stats = scheduler.task_stats()[&PollDomain::Files].clone();
        assert_eq!(stats.failures, 4);
        assert_eq!(stats.fetches, 0);
        assert!(stats.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_requests_an_immediate_fetch() {
        let handler = Arc::new(SlowHandler::default());
        let scheduler = PollScheduler::new(None);
        let scope = CancellationToken::new();
        scheduler.start(&scope, [spec(PollDomain::AuditLog, 60_000)], handler.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        assert!(scheduler.trigger(PollDomain::AuditLog));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.trigger(PollDomain::Locks));
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancelled_keeps_tasks_of_a_newer_scope() {
        let handler = Arc::new(SlowHandler::default());
        let scheduler = PollScheduler::new(None);
        let old = CancellationToken::new();
        scheduler.start(&old, [spec(PollDomain::Status, 500)], handler.clone());
        old.cancel();
        let fresh = CancellationToken::new();
        scheduler.start(&fresh, [spec(PollDomain::Files, 500)], handler.clone());

        assert_eq!(scheduler.stop_cancelled(), 1);
        assert_eq!(scheduler.active_tasks(), vec![PollDomain::Files]);
        assert_eq!(scheduler.stop_cancelled(), 0);
        scheduler.shutdown().await;
    }
}
