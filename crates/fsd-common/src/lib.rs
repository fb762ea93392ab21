//! ---
//! fsd_section: "01-core-functionality"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Shared primitives and utilities for the dashboard engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
//! Core shared primitives for the fsdash workspace.
//! This crate exposes configuration loading, logging bootstrap, and the small
//! formatting helpers consumed across the workspace.

pub mod config;
pub mod format;
pub mod logging;

pub use config::{
    AlertConfig, ApiConfig, AppConfig, AuditConfig, AuthMode, LoadedAppConfig, LoggingConfig,
    MetricsConfig, PollDomain, PollTaskConfig, PollingConfig, ScenarioConfig, SessionConfig,
};
pub use format::format_bytes;
pub use logging::{init_tracing, LogFormat};
