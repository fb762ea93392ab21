//! ---
//! fsd_section: "03-persistence-logging"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Structured logging adapters and sinks."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-carrying log macros and lifecycle events for the dashboard engine.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber for tests and ad-hoc tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Operator the event belongs to.
    pub user: Option<&'a str>,
    /// Polling task name.
    pub task: Option<&'a str>,
    /// Scenario identifier.
    pub scenario: Option<&'a str>,
    /// 1-based scenario step index.
    pub step: Option<usize>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the operator name.
    pub fn with_user(mut self, user: &'a str) -> Self {
        self.user = Some(user);
        self
    }

    /// Attach a polling task name.
    pub fn with_task(mut self, task: &'a str) -> Self {
        self.task = Some(task);
        self
    }

    /// Attach a scenario identifier.
    pub fn with_scenario(mut self, scenario: &'a str) -> Self {
        self.scenario = Some(scenario);
        self
    }

    /// Attach a step index.
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation was refused or ended early without being a fault.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (login, logout, scenario outcome).
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Success => {
            crate::__fsd_event!(Level::INFO, ctx, "{event} [{}]: {message}", outcome.as_str())
        }
        SystemEventOutcome::Degraded => {
            crate::__fsd_event!(Level::WARN, ctx, "{event} [{}]: {message}", outcome.as_str())
        }
        SystemEventOutcome::Fault => {
            crate::__fsd_event!(Level::ERROR, ctx, "{event} [{}]: {message}", outcome.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_user("admin")
            .with_scenario("write-lock")
            .with_step(2);
        fsd_info!(context = ctx, "scenario step started");
        fsd_debug!("debug message");
        fsd_warn!(context = LogContext::new().with_task("status"), "fetch failed");
        fsd_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_user("admin");
        log_system_event(
            Some(&ctx),
            "session.login",
            "operator logged in",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "session.logout",
            "forced logout",
            SystemEventOutcome::Degraded,
        );
        log_system_event(
            None,
            "scenario.failed",
            "upload rejected",
            SystemEventOutcome::Fault,
        );
    }
}
