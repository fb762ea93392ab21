//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Operator-facing narrative console fed by scenarios."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl NarrativeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NarrativeLevel::Info => "info",
            NarrativeLevel::Success => "success",
            NarrativeLevel::Warning => "warning",
            NarrativeLevel::Error => "error",
        }
    }
}

impl fmt::Display for NarrativeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeLine {
    pub at: DateTime<Utc>,
    pub level: NarrativeLevel,
    pub text: String,
    pub scenario: Option<String>,
}

/// Bounded console; late subscribers only see new lines.
#[derive(Debug)]
pub struct NarrativeLog {
    capacity: usize,
    lines: Mutex<VecDeque<NarrativeLine>>,
    tx: broadcast::Sender<NarrativeLine>,
}

impl NarrativeLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
            tx,
        }
    }

    pub fn emit(&self, level: NarrativeLevel, text: impl Into<String>, scenario: Option<&str>) {
        let line = NarrativeLine {
            at: Utc::now(),
            level,
            text: text.into(),
            scenario: scenario.map(str::to_owned),
        };
        {
            let mut lines = self.lines.lock();
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        let _ = self.tx.send(line);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(NarrativeLevel::Info, text, None);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NarrativeLine> {
        self.tx.subscribe()
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<NarrativeLine> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines.lock().iter().map(|line| line.text.clone()).collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_lines_fall_off() {
        let log = NarrativeLog::new(2);
        log.info("one");
        log.emit(NarrativeLevel::Success, "two", Some("write-lock"));
        log.emit(NarrativeLevel::Error, "three", None);
        assert_eq!(log.texts(), ["two", "three"]);
        assert_eq!(log.lines()[0].scenario.as_deref(), Some("write-lock"));
        log.clear();
        assert!(log.lines().is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_new_lines() {
        let log = NarrativeLog::new(10);
        let mut rx = log.subscribe();
        log.emit(NarrativeLevel::Warning, "[STALL] lock still held", None);
        let line = rx.recv().await.unwrap();
        assert_eq!(line.level, NarrativeLevel::Warning);
    }
}
