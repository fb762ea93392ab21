//! ---
//! fsd_section: "03-persistence-logging"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Metrics collection and export utilities."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::debug;

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in the registry using the Prometheus text format.
pub fn render_text(registry: &SharedRegistry) -> Result<String> {
    let families = registry.gather();
    debug!(families = families.len(), "encoding metrics");
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Metrics recorded by the orchestration engine.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: SharedRegistry,
    poll_ticks_total: IntCounterVec,
    poll_skipped_total: IntCounterVec,
    poll_failures_total: IntCounterVec,
    poll_fetch_seconds: HistogramVec,
    scenario_runs_total: IntCounterVec,
    forced_logouts_total: IntCounter,
}

impl EngineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let poll_ticks_total = IntCounterVec::new(
            Opts::new(
                "fsdash_poll_ticks_total",
                "Timer ticks observed per polling task",
            ),
            &["task"],
        )?;
        registry.register(Box::new(poll_ticks_total.clone()))?;

        let poll_skipped_total = IntCounterVec::new(
            Opts::new(
                "fsdash_poll_skipped_total",
                "Ticks skipped because the previous fetch was still in flight",
            ),
            &["task"],
        )?;
        registry.register(Box::new(poll_skipped_total.clone()))?;

        let poll_failures_total = IntCounterVec::new(
            Opts::new(
                "fsdash_poll_failures_total",
                "Fetches that returned an error",
            ),
            &["task"],
        )?;
        registry.register(Box::new(poll_failures_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.005, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let poll_fetch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fsdash_poll_fetch_seconds",
                "Latency of completed polling fetches",
            )
            .buckets(buckets),
            &["task"],
        )?;
        registry.register(Box::new(poll_fetch_seconds.clone()))?;

        let scenario_runs_total = IntCounterVec::new(
            Opts::new(
                "fsdash_scenario_runs_total",
                "Scenario runs by identifier and terminal outcome",
            ),
            &["scenario", "outcome"],
        )?;
        registry.register(Box::new(scenario_runs_total.clone()))?;

        let forced_logouts_total = IntCounter::with_opts(Opts::new(
            "fsdash_forced_logouts_total",
            "Sessions terminated by an authorization-rejected response",
        ))?;
        registry.register(Box::new(forced_logouts_total.clone()))?;

        Ok(Self {
            registry,
            poll_ticks_total,
            poll_skipped_total,
            poll_failures_total,
            poll_fetch_seconds,
            scenario_runs_total,
            forced_logouts_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_tick(&self, task: &str) {
        self.poll_ticks_total.with_label_values(&[task]).inc();
    }

    pub fn inc_skipped(&self, task: &str) {
        self.poll_skipped_total.with_label_values(&[task]).inc();
    }

    pub fn record_fetch(&self, task: &str, elapsed: Duration, success: bool) {
        if success {
            self.poll_fetch_seconds
                .with_label_values(&[task])
                .observe(elapsed.as_secs_f64());
        } else {
            self.poll_failures_total.with_label_values(&[task]).inc();
        }
    }

    pub fn record_scenario(&self, scenario: &str, outcome: &str) {
        self.scenario_runs_total
            .with_label_values(&[scenario, outcome])
            .inc();
    }

    pub fn inc_forced_logout(&self) {
        self.forced_logouts_total.inc();
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;
