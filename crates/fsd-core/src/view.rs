//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Latest fetched server state and per-domain health."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fsd_api::{AlertEntry, FileEntry, LockEntry, StatusSnapshot};
use fsd_common::PollDomain;
use parking_lot::RwLock;

use crate::gate::SessionBound;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DomainHealth {
    #[default]
    Unknown,
    Healthy {
        at: DateTime<Utc>,
    },
    Failing {
        since: DateTime<Utc>,
        error: String,
        consecutive: u32,
    },
}

impl DomainHealth {
    pub fn is_failing(&self) -> bool {
        matches!(self, DomainHealth::Failing { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    pub status: Option<StatusSnapshot>,
    pub files: Vec<FileEntry>,
    pub locks: Vec<LockEntry>,
    /// Most recent first.
    pub security: Vec<AlertEntry>,
    pub health: BTreeMap<PollDomain, DomainHealth>,
}

#[derive(Debug, Default)]
struct ViewState {
    status: Option<StatusSnapshot>,
    files: Vec<FileEntry>,
    locks: Vec<LockEntry>,
    security: Vec<AlertEntry>,
    health: BTreeMap<PollDomain, DomainHealth>,
}

/// What the polling tasks last saw. Stale data is kept while a domain is failing.
#[derive(Debug)]
pub struct DashboardView {
    security_window: usize,
    state: RwLock<ViewState>,
}

impl DashboardView {
    pub fn new(security_window: usize) -> Self {
        Self {
            security_window: security_window.max(1),
            state: RwLock::new(ViewState::default()),
        }
    }

    pub fn set_status(&self, status: StatusSnapshot) {
        self.state.write().status = Some(status);
    }

    pub fn set_files(&self, files: Vec<FileEntry>) {
        self.state.write().files = files;
    }

    pub fn set_locks(&self, locks: Vec<LockEntry>) {
        self.state.write().locks = locks;
    }

    /// `events` arrive oldest first.
    pub fn set_security(&self, mut events: Vec<AlertEntry>) {
        events.reverse();
        events.truncate(self.security_window);
        self.state.write().security = events;
    }

    pub fn mark_healthy(&self, domain: PollDomain) {
        self.state
            .write()
            .health
            .insert(domain, DomainHealth::Healthy { at: Utc::now() });
    }

    pub fn mark_failed(&self, domain: PollDomain, error: &str) {
        let mut state = self.state.write();
        let next = match state.health.remove(&domain) {
            Some(DomainHealth::Failing {
                since, consecutive, ..
            }) => DomainHealth::Failing {
                since,
                error: error.to_owned(),
                consecutive: consecutive.saturating_add(1),
            },
            _ => DomainHealth::Failing {
                since: Utc::now(),
                error: error.to_owned(),
                consecutive: 1,
            },
        };
        state.health.insert(domain, next);
    }

    pub fn health(&self, domain: PollDomain) -> DomainHealth {
        self.state
            .read()
            .health
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn files(&self) -> Vec<FileEntry> {
        self.state.read().files.clone()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let state = self.state.read();
        ViewSnapshot {
            status: state.status.clone(),
            files: state.files.clone(),
            locks: state.locks.clone(),
            security: state.security.clone(),
            health: state.health.clone(),
        }
    }

    pub fn clear(&self) {
        *self.state.write() = ViewState::default();
    }
}

impl SessionBound for DashboardView {
    fn end_session(&self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_failures_accumulate_until_recovery() {
        let view = DashboardView::new(20);
        assert_eq!(view.health(PollDomain::Status), DomainHealth::Unknown);
        view.mark_failed(PollDomain::Status, "connection refused");
        view.mark_failed(PollDomain::Status, "timed out");
        match view.health(PollDomain::Status) {
            DomainHealth::Failing {
                consecutive, error, ..
            } => {
                assert_eq!(consecutive, 2);
                assert_eq!(error, "timed out");
            }
            other => panic!("unexpected health {other:?}"),
        }
        view.mark_healthy(PollDomain::Status);
        assert!(!view.health(PollDomain::Status).is_failing());
    }

    #[test]
    fn security_window_is_newest_first() {
        let view = DashboardView::new(2);
        let events = (1..=4)
            .map(|n| AlertEntry {
                timestamp: format!("t{n}"),
                event: "AUTH_FAILURE".into(),
                ip: None,
                file: None,
                details: String::new(),
                severity: None,
            })
            .collect();
        view.set_security(events);
        let shown: Vec<_> = view
            .snapshot()
            .security
            .into_iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(shown, ["t4", "t3"]);
    }
}
