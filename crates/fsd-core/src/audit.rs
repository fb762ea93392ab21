//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Category filter over the fetched audit window."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use fsd_api::LogEntry;
use parking_lot::RwLock;

use crate::gate::SessionBound;

/// Status keywords that mark an audit record as a failure or denial.
pub const FAILURE_KEYWORDS: [&str; 7] = [
    "FAIL",
    "DENIED",
    "BLOCKED",
    "ERROR",
    "REJECT",
    "UNAUTHORIZED",
    "TIMEOUT",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuditCategory {
    #[default]
    All,
    FailedOnly,
    ByOperation(String),
}

impl AuditCategory {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            AuditCategory::All => true,
            AuditCategory::FailedOnly => is_failure(&entry.status),
            AuditCategory::ByOperation(op) => entry.operation.eq_ignore_ascii_case(op),
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::All => f.write_str("all"),
            AuditCategory::FailedOnly => f.write_str("failed"),
            AuditCategory::ByOperation(op) => f.write_str(op),
        }
    }
}

impl FromStr for AuditCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("audit category must not be empty".to_owned());
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "all" => AuditCategory::All,
            "failed" | "failures" => AuditCategory::FailedOnly,
            _ => AuditCategory::ByOperation(trimmed.to_ascii_uppercase()),
        })
    }
}

pub fn is_failure(status: &str) -> bool {
    let upper = status.to_ascii_uppercase();
    FAILURE_KEYWORDS.iter().any(|keyword| upper.contains(keyword))
}

/// Entries matching `category`, in their original order.
pub fn filter(entries: &[LogEntry], category: &AuditCategory) -> Vec<LogEntry> {
    entries
        .iter()
        .filter(|entry| category.matches(entry))
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
struct AuditState {
    /// Latest fetch, oldest first as served.
    entries: Vec<LogEntry>,
    category: AuditCategory,
}

/// Holds the last fetched audit log and the selected category.
#[derive(Debug)]
pub struct AuditFilterEngine {
    window: usize,
    state: RwLock<AuditState>,
}

impl AuditFilterEngine {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            state: RwLock::new(AuditState::default()),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Replace the fetched log with a newer fetch.
    pub fn ingest(&self, entries: Vec<LogEntry>) {
        self.state.write().entries = entries;
    }

    /// Select a category and return the resulting view.
    pub fn select(&self, category: AuditCategory) -> Vec<LogEntry> {
        self.state.write().category = category;
        self.visible()
    }

    pub fn category(&self) -> AuditCategory {
        self.state.read().category.clone()
    }

    /// Filtered entries, most recent first, bounded to the display window.
    pub fn visible(&self) -> Vec<LogEntry> {
        let state = self.state.read();
        let mut view = filter(&state.entries, &state.category);
        view.reverse();
        view.truncate(self.window);
        view
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn clear(&self) {
        self.state.write().entries.clear();
    }
}

impl SessionBound for AuditFilterEngine {
    fn end_session(&self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(operation: &str, status: &str) -> LogEntry {
        LogEntry::new("2024-01-01 10:00:00", operation, "demo.txt", status, "")
    }

    fn sample() -> Vec<LogEntry> {
        vec![
            entry("LOGIN", "SUCCESS"),
            entry("UPLOAD", "SUCCESS"),
            entry("DELETE", "FAILED"),
            entry("DOWNLOAD", "Access denied"),
            entry("UPLOAD", "blocked"),
            entry("LIST", "SUCCESS"),
            entry("LOCKS", "TIMEOUT_RECOVERED"),
        ]
    }

    #[test]
    fn failed_only_is_the_failure_subset_of_all() {
        let entries = sample();
        let all = filter(&entries, &AuditCategory::All);
        let failed = filter(&entries, &AuditCategory::FailedOnly);
        assert_eq!(all, entries);
        assert!(failed.iter().all(|e| all.contains(e)));
        let expected: Vec<_> = entries
            .iter()
            .filter(|e| is_failure(&e.status))
            .cloned()
            .collect();
        assert_eq!(failed, expected);
        assert_eq!(failed.len(), 4);
    }

    #[test]
    fn operation_match_ignores_case() {
        let entries = sample();
        let uploads = filter(&entries, &AuditCategory::ByOperation("upload".into()));
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|e| e.operation == "UPLOAD"));
    }

    #[test]
    fn categories_parse_from_cli_words() {
        assert_eq!("all".parse::<AuditCategory>().unwrap(), AuditCategory::All);
        assert_eq!(
            "FAILED".parse::<AuditCategory>().unwrap(),
            AuditCategory::FailedOnly
        );
        assert_eq!(
            "delete".parse::<AuditCategory>().unwrap(),
            AuditCategory::ByOperation("DELETE".into())
        );
        assert!("  ".parse::<AuditCategory>().is_err());
    }

    #[test]
    fn view_is_newest_first_and_windowed() {
        let engine = AuditFilterEngine::new(3);
        engine.ingest(sample());
        let visible = engine.visible();
        assert_eq!(visible.len(), 3);
        assert_eq!(visible[0].operation, "LOCKS");
        assert_eq!(visible[2].operation, "UPLOAD");

        let failed = engine.select(AuditCategory::FailedOnly);
        assert_eq!(
            failed.iter().map(|e| e.operation.as_str()).collect::<Vec<_>>(),
            ["LOCKS", "UPLOAD", "DOWNLOAD"]
        );
        // selecting a category never mutates the stored log
        assert_eq!(engine.len(), 7);
        assert_eq!(engine.select(AuditCategory::All).len(), 3);
    }
}
