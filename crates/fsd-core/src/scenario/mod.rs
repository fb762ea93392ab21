//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Scenario catalog, definitions and sequencer."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
pub mod catalog;
pub mod model;
pub mod sequencer;

pub use catalog::{builtin, is_demo_artifact, ARTIFACT_PREFIXES};
pub use model::{AlertSpec, Branch, Line, Scenario, ScenarioFile, Step, StepAction};
pub use sequencer::{
    ResetReport, RunOutcome, RunReport, ScenarioSequencer, ScenarioState, ScenarioSummary,
};
