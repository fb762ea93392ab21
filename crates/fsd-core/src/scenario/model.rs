//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Declarative scenario definitions loadable from TOML."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use fsd_api::Severity;
use fsd_common::PollDomain;
use serde::Deserialize;

use crate::error::validate_file_name;
use crate::narrative::NarrativeLevel;

/// Scripted demonstration run by the sequencer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Narrative shown by `explain`; never touches the backend.
    #[serde(default)]
    pub explanation: Vec<String>,
    /// Scenario can only be explained, not run.
    #[serde(default)]
    pub explain_only: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Alert pushed when every step completed.
    #[serde(default)]
    pub completion_alert: Option<AlertSpec>,
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("scenario id must not be empty");
        }
        if !self.explain_only && self.steps.is_empty() {
            bail!("scenario '{}' has no steps", self.id);
        }
        validate_steps(&self.steps).with_context(|| format!("scenario '{}'", self.id))
    }
}

fn validate_steps(steps: &[Step]) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        match &step.action {
            StepAction::Upload { file, .. }
            | StepAction::Download { file }
            | StepAction::Delete { file } => {
                validate_file_name(file).map_err(|err| anyhow!("step {}: {err}", index + 1))?
            }
            StepAction::FanOut { branches, .. } => {
                if branches.is_empty() {
                    bail!("step {}: fan_out needs at least one branch", index + 1);
                }
                for branch in branches {
                    validate_steps(&branch.steps)
                        .with_context(|| format!("branch '{}'", branch.label))?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertSpec {
    pub kind: String,
    pub message: String,
    #[serde(default = "default_alert_severity")]
    pub severity: Severity,
}

fn default_alert_severity() -> Severity {
    Severity::Warning
}

/// One action plus the narrative printed around it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default)]
    pub before: Vec<Line>,
    /// Printed only when the action succeeds.
    #[serde(default)]
    pub after: Vec<Line>,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn before(mut self, line: Line) -> Self {
        self.before.push(line);
        self
    }

    pub fn after(mut self, line: Line) -> Self {
        self.after.push(line);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Narrative only.
    Narrate,
    Upload {
        file: String,
        #[serde(default)]
        content: String,
    },
    Download {
        file: String,
    },
    Delete {
        file: String,
    },
    FetchSecurityEvents,
    /// Request an immediate poll of the given domains (all when empty).
    Refresh {
        #[serde(default)]
        domains: Vec<PollDomain>,
    },
    /// Advance wall-clock time only.
    Delay {
        delay_ms: u64,
    },
    /// Independent branches started `stagger_ms` apart and joined.
    FanOut {
        branches: Vec<Branch>,
        #[serde(default)]
        stagger_ms: Option<u64>,
    },
    RaiseAlert {
        kind: String,
        message: String,
        #[serde(default = "default_alert_severity")]
        severity: Severity,
    },
}

impl StepAction {
    pub fn label(&self) -> &'static str {
        match self {
            StepAction::Narrate => "Narrate",
            StepAction::Upload { .. } => "Upload",
            StepAction::Download { .. } => "Download",
            StepAction::Delete { .. } => "Delete",
            StepAction::FetchSecurityEvents => "Security fetch",
            StepAction::Refresh { .. } => "Refresh",
            StepAction::Delay { .. } => "Delay",
            StepAction::FanOut { .. } => "Concurrent step",
            StepAction::RaiseAlert { .. } => "Alert",
        }
    }

    /// Whether running this action calls the backend.
    pub fn touches_backend(&self) -> bool {
        match self {
            StepAction::Upload { .. }
            | StepAction::Download { .. }
            | StepAction::Delete { .. }
            | StepAction::FetchSecurityEvents => true,
            StepAction::FanOut { branches, .. } => branches
                .iter()
                .any(|branch| branch.steps.iter().any(|step| step.action.touches_backend())),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Branch {
    pub label: String,
    pub steps: Vec<Step>,
}

/// Narrative line, either a bare string (info) or `{ text, level }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Line {
    Plain(String),
    Styled {
        text: String,
        #[serde(default)]
        level: NarrativeLevel,
    },
}

impl Line {
    fn styled(level: NarrativeLevel, text: impl Into<String>) -> Self {
        Line::Styled {
            text: text.into(),
            level,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::styled(NarrativeLevel::Info, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::styled(NarrativeLevel::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::styled(NarrativeLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::styled(NarrativeLevel::Error, text)
    }

    pub fn text(&self) -> &str {
        match self {
            Line::Plain(text) | Line::Styled { text, .. } => text,
        }
    }

    pub fn level(&self) -> NarrativeLevel {
        match self {
            Line::Plain(_) => NarrativeLevel::Info,
            Line::Styled { level, .. } => *level,
        }
    }
}

/// Substitute `{name}` placeholders; unknown placeholders are left as written.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = template.to_owned();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// `[[scenario]]` tables of a scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioFile {
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioFile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("unable to read scenario file {}", path.as_ref().display())
        })?;
        contents
            .parse::<Self>()
            .with_context(|| format!("invalid scenario file {}", path.as_ref().display()))
    }
}

impl std::str::FromStr for ScenarioFile {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let file = toml::from_str::<Self>(input).map_err(anyhow::Error::new)?;
        for scenario in &file.scenarios {
            scenario.validate()?;
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[scenario]]
id = "lock-contention"
title = "Two writers on one file"
explanation = ["Both clients ask for F_WRLCK on the same file."]

[[scenario.steps]]
type = "upload"
file = "demo-contention.txt"
content = "first writer {timestamp}"
before = ["[STEP 1] Writer A uploading..."]
after = [{ text = "[LOCK] Writer A done", level = "success" }]

[[scenario.steps]]
type = "delay"
delay_ms = 250

[[scenario.steps]]
type = "fan_out"
stagger_ms = 100

[[scenario.steps.branches]]
label = "writer-b"
steps = [{ type = "upload", file = "demo-contention.txt", content = "second" }]

[[scenario.steps.branches]]
label = "reader"
steps = [{ type = "download", file = "demo-contention.txt" }]

[[scenario.steps]]
type = "refresh"
domains = ["locks", "audit-log"]

[scenario.completion_alert]
kind = "CONTENTION"
message = "Writers serialized"
"#;

    #[test]
    fn parses_tagged_steps() {
        let file: ScenarioFile = SAMPLE.parse().unwrap();
        let scenario = &file.scenarios[0];
        assert_eq!(scenario.id, "lock-contention");
        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.steps[0].before[0].level(), NarrativeLevel::Info);
        assert_eq!(scenario.steps[0].after[0].level(), NarrativeLevel::Success);
        assert_eq!(scenario.steps[1].action, StepAction::Delay { delay_ms: 250 });
        match &scenario.steps[2].action {
            StepAction::FanOut {
                branches,
                stagger_ms,
            } => {
                assert_eq!(*stagger_ms, Some(100));
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[1].label, "reader");
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(
            scenario.steps[3].action,
            StepAction::Refresh {
                domains: vec![PollDomain::Locks, PollDomain::AuditLog]
            }
        );
        let alert = scenario.completion_alert.as_ref().unwrap();
        assert_eq!(alert.severity, Severity::Warning);
        assert!(scenario.steps[2].action.touches_backend());
        assert!(!scenario.steps[1].action.touches_backend());
    }

    #[test]
    fn rejects_unsafe_file_names() {
        let input = r#"
[[scenario]]
id = "bad"
title = "bad"
steps = [{ type = "delete", file = "../etc/passwd" }]
"#;
        let err = input.parse::<ScenarioFile>().unwrap_err();
        assert!(format!("{err:#}").contains("invalid file name"));
    }

    #[test]
    fn runnable_scenarios_need_steps() {
        let input = r#"
[[scenario]]
id = "empty"
title = "empty"
"#;
        assert!(input.parse::<ScenarioFile>().is_err());
    }

    #[test]
    fn render_fills_known_placeholders() {
        let out = render(
            "[INFO] Total security events: {count} ({missing})",
            &[("count", "3".to_owned())],
        );
        assert_eq!(out, "[INFO] Total security events: 3 ({missing})");
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.toml");
        fs::write(&path, SAMPLE).unwrap();
        let file = ScenarioFile::from_file(&path).unwrap();
        assert_eq!(file.scenarios.len(), 1);
        assert!(ScenarioFile::from_file(dir.path().join("missing.toml")).is_err());
    }
}
