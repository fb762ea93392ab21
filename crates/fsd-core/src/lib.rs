//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Orchestration engine for the file server dashboard."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
//! Session lifecycle, polling, audit filtering, the alert feed and the
//! scenario sequencer, driven against a [`fsd_api::ResourceApi`] boundary.

pub mod alerts;
pub mod audit;
pub mod engine;
pub mod error;
pub mod gate;
pub mod narrative;
pub mod refresh;
pub mod scenario;
pub mod scheduler;
pub mod session;
pub mod view;

pub use alerts::{AlertFeed, AlertSource, FeedAlert};
pub use audit::{filter, is_failure, AuditCategory, AuditFilterEngine, FAILURE_KEYWORDS};
pub use engine::DashboardEngine;
pub use error::{
    validate_file_name, AuthError, DashboardError, ScenarioError, SessionStoreError,
    ValidationError,
};
pub use gate::{SessionBound, SessionGate};
pub use narrative::{NarrativeLevel, NarrativeLine, NarrativeLog};
pub use refresh::DashboardRefresher;
pub use scenario::{
    ResetReport, RunOutcome, RunReport, Scenario, ScenarioFile, ScenarioSequencer, ScenarioState,
    ScenarioSummary,
};
pub use scheduler::{PollHandler, PollScheduler, PollTaskSpec, TaskStats};
pub use session::{
    FileSessionStore, LogoutReason, MemorySessionStore, Session, SessionEvent, SessionManager,
    SessionSnapshot, SessionStore,
};
pub use view::{DashboardView, DomainHealth, ViewSnapshot};
