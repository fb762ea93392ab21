//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Bounded, newest-first alert feed."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use fsd_api::{AlertEntry, Severity};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    Security,
    Scenario,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedAlert {
    pub kind: String,
    pub message: String,
    pub severity: Severity,
    pub source: AlertSource,
    pub raised_at: DateTime<Utc>,
}

impl FeedAlert {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        source: AlertSource,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            severity,
            source,
            raised_at: Utc::now(),
        }
    }

    pub fn from_security_event(event: &AlertEntry) -> Self {
        let message = match &event.file {
            Some(file) if !file.is_empty() => format!("{} ({file})", event.details),
            _ => event.details.clone(),
        };
        Self::new(
            event.event.clone(),
            message,
            event.effective_severity(),
            AlertSource::Security,
        )
    }
}

#[derive(Debug, Default)]
struct FeedState {
    alerts: VecDeque<FeedAlert>,
    /// Identity of the newest security event already pushed.
    last_security: Option<(String, String, String)>,
}

/// Newest-first feed with a hard cap; the oldest alert is evicted on overflow.
///
/// Security events and scenario alerts share one buffer.
#[derive(Debug)]
pub struct AlertFeed {
    capacity: usize,
    state: Mutex<FeedState>,
}

impl AlertFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(FeedState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, alert: FeedAlert) {
        let mut state = self.state.lock();
        debug!(kind = %alert.kind, severity = %alert.severity, "alert raised");
        state.alerts.push_front(alert);
        state.alerts.truncate(self.capacity);
    }

    /// Push security events newer than the last one seen. `events` is oldest first.
    pub fn ingest_security(&self, events: &[AlertEntry]) -> usize {
        let Some(newest) = events.last() else {
            return 0;
        };
        let fresh = {
            let state = self.state.lock();
            let start = state
                .last_security
                .as_ref()
                .and_then(|seen| events.iter().rposition(|event| fingerprint(event) == *seen))
                .map(|pos| pos + 1)
                .unwrap_or(0);
            &events[start..]
        };
        for event in fresh {
            self.push(FeedAlert::from_security_event(event));
        }
        self.state.lock().last_security = Some(fingerprint(newest));
        fresh.len()
    }

    /// Drop every alert. Security events already seen stay seen.
    pub fn clear(&self) {
        self.state.lock().alerts.clear();
    }

    pub fn snapshot(&self) -> Vec<FeedAlert> {
        self.state.lock().alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().alerts.is_empty()
    }
}

fn fingerprint(event: &AlertEntry) -> (String, String, String) {
    (
        event.timestamp.clone(),
        event.event.clone(),
        event.details.clone(),
    )
}
