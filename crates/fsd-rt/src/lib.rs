//! ---
//! fsd_section: "01-core-functionality"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Runtime helpers supporting the orchestration engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
//! Timer and fan-out helpers for the fsdash runtime.

pub mod scheduling;

pub use scheduling::{BranchOutcome, FanOutError, FanOutExecutor, RateLimiter};
