//! ---
//! fsd_section: "01-core-functionality"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Shared primitives and utilities for the dashboard engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_base_url() -> Url {
    Url::parse("http://localhost:5000/api/").expect("valid default api base url")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_store_path() -> Option<PathBuf> {
    Some(PathBuf::from("target/fsdash/session.json"))
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(2000)
}

fn default_poll_tasks() -> IndexMap<String, PollTaskConfig> {
    PollDomain::ALL
        .iter()
        .map(|domain| (domain.to_string(), PollTaskConfig::default()))
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_audit_window() -> usize {
    20
}

fn default_alert_capacity() -> usize {
    5
}

fn default_fan_out_stagger() -> Duration {
    Duration::from_millis(300)
}

fn default_narrative_capacity() -> usize {
    500
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the dashboard engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "FSDASH_CONFIG";

    /// Load configuration from disk, respecting the `FSDASH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let loaded = Self::load_with_source(candidates)?;
        if loaded.source.is_none() {
            return Err(anyhow!(
                "no configuration files found. inspected: {}",
                candidates
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        Ok(loaded.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `FSDASH_CONFIG` path must exist. Without one the first existing
    /// candidate wins, and built-in defaults apply when none exist.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!("no configuration file found; using defaults");
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.polling.validate()?;
        if self.audit.window == 0 {
            return Err(anyhow!("audit.window must be at least 1"));
        }
        if self.alerts.capacity == 0 {
            return Err(anyhow!("alerts.capacity must be at least 1"));
        }
        if self.scenario.narrative_capacity == 0 {
            return Err(anyhow!("scenario.narrative_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// How the remote boundary expects callers to authenticate.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Bearer token is mandatory; polling starts only after login.
    #[default]
    Required,
    /// Anonymous calls; login is refused and polling starts at init.
    Disabled,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    #[serde(default = "default_request_timeout", rename = "request_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub auth: AuthMode,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            auth: AuthMode::default(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "api.base_url must be http or https, got {}",
                self.base_url
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("api.request_timeout_ms must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Where the session survives restarts. `None` keeps it in memory only.
    #[serde(default = "default_store_path")]
    pub store_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

/// Data domains refreshed by the polling scheduler.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum PollDomain {
    Status,
    Files,
    AuditLog,
    SecurityEvents,
    Locks,
}

impl PollDomain {
    pub const ALL: [PollDomain; 5] = [
        PollDomain::Status,
        PollDomain::Files,
        PollDomain::AuditLog,
        PollDomain::SecurityEvents,
        PollDomain::Locks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PollDomain::Status => "status",
            PollDomain::Files => "files",
            PollDomain::AuditLog => "audit-log",
            PollDomain::SecurityEvents => "security-events",
            PollDomain::Locks => "locks",
        }
    }
}

impl fmt::Display for PollDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "status" => Ok(PollDomain::Status),
            "files" => Ok(PollDomain::Files),
            "audit-log" | "audit" | "logs" => Ok(PollDomain::AuditLog),
            "security-events" | "security" => Ok(PollDomain::SecurityEvents),
            "locks" => Ok(PollDomain::Locks),
            other => Err(format!("unknown poll domain: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollTaskConfig {
    #[serde(default, rename = "interval_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub interval: Option<Duration>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PollTaskConfig {
    fn default() -> Self {
        Self {
            interval: None,
            enabled: true,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval", rename = "default_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_interval: Duration,
    #[serde(default = "default_poll_tasks")]
    pub tasks: IndexMap<String, PollTaskConfig>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval: default_poll_interval(),
            tasks: default_poll_tasks(),
        }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_interval.is_zero() {
            return Err(anyhow!("polling.default_interval_ms must be positive"));
        }
        for (name, task) in &self.tasks {
            name.parse::<PollDomain>().map_err(|err| anyhow!(err))?;
            if matches!(task.interval, Some(interval) if interval.is_zero()) {
                return Err(anyhow!("polling task '{}' has a zero interval", name));
            }
        }
        Ok(())
    }

    /// Enabled domains with their effective intervals, in declaration order.
    pub fn effective_tasks(&self) -> Vec<(PollDomain, Duration)> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.enabled)
            .filter_map(|(name, task)| {
                let domain = name.parse::<PollDomain>().ok()?;
                Some((domain, task.interval.unwrap_or(self.default_interval)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_window")]
    pub window: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            window: default_audit_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_alert_capacity")]
    pub capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            capacity: default_alert_capacity(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_fan_out_stagger", rename = "fan_out_stagger_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fan_out_stagger: Duration,
    #[serde(default)]
    pub scenario_files: Vec<PathBuf>,
    #[serde(default = "default_narrative_capacity")]
    pub narrative_capacity: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            fan_out_stagger: default_fan_out_stagger(),
            scenario_files: Vec::new(),
            narrative_capacity: default_narrative_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Mirror events to stdout. CLI commands that print tables turn this off.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            console: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_domain() {
        let config = AppConfig::default();
        config.validate().unwrap();
        let tasks = config.polling.effective_tasks();
        assert_eq!(tasks.len(), PollDomain::ALL.len());
        assert!(tasks
            .iter()
            .all(|(_, interval)| *interval == Duration::from_millis(2000)));
        assert_eq!(config.audit.window, 20);
        assert_eq!(config.alerts.capacity, 5);
        assert_eq!(config.api.base_url.as_str(), "http://localhost:5000/api/");
    }

    #[test]
    fn parses_overrides() {
        let raw = r#"
            [api]
            base_url = "https://files.example.net/api/"
            request_timeout_ms = 2500
            auth = "disabled"

            [polling]
            default_interval_ms = 3000

            [polling.tasks.status]
            interval_ms = 1000

            [polling.tasks.locks]
            enabled = false

            [scenario]
            fan_out_stagger_ms = 100
        "#;
        let config: AppConfig = raw.parse().unwrap();
        assert_eq!(config.api.auth, AuthMode::Disabled);
        assert_eq!(config.api.request_timeout, Duration::from_millis(2500));
        let tasks = config.polling.effective_tasks();
        assert_eq!(
            tasks,
            vec![(PollDomain::Status, Duration::from_millis(1000))]
        );
        assert_eq!(config.scenario.fan_out_stagger, Duration::from_millis(100));
    }

    #[test]
    fn rejects_unknown_domain_and_zero_interval() {
        let unknown = "[polling.tasks.weather]\ninterval_ms = 10\n";
        assert!(unknown.parse::<AppConfig>().is_err());

        let zero = "[polling.tasks.files]\ninterval_ms = 0\n";
        assert!(zero.parse::<AppConfig>().is_err());

        let capacity = "[alerts]\ncapacity = 0\n";
        assert!(capacity.parse::<AppConfig>().is_err());
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fsdash.toml");
        fs::write(&path, "[audit]\nwindow = 7\n").unwrap();
        let missing = dir.path().join("missing.toml");

        let loaded = AppConfig::load_with_source(&[missing.clone(), path.clone()]).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.audit.window, 7);

        let fallback = AppConfig::load_with_source(&[missing.clone()]).unwrap();
        assert!(fallback.source.is_none());
        assert!(AppConfig::load(&[missing]).is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let config: AppConfig = include_str!("../../../configs/fsdash.example.toml")
            .parse()
            .unwrap();
        let tasks = config.polling.effective_tasks();
        assert_eq!(tasks.len(), PollDomain::ALL.len());
        assert_eq!(
            tasks.last(),
            Some(&(PollDomain::Locks, Duration::from_millis(1000)))
        );
        assert!(config.metrics.enabled);
    }

    #[test]
    fn poll_domain_round_trips_names() {
        for domain in PollDomain::ALL {
            assert_eq!(domain.to_string().parse::<PollDomain>().unwrap(), domain);
        }
        assert_eq!("security".parse::<PollDomain>().unwrap(), PollDomain::SecurityEvents);
    }
}
