//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Wire records exchanged with the remote resource server."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

const UNKNOWN: &str = "UNKNOWN";
const NOT_APPLICABLE: &str = "N/A";

fn unknown() -> String {
    UNKNOWN.to_owned()
}

fn not_applicable() -> String {
    NOT_APPLICABLE.to_owned()
}

fn null_as_unknown<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(de)?.unwrap_or_else(unknown))
}

fn null_as_not_applicable<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(de)?.unwrap_or_else(not_applicable))
}

fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

fn empty_as_none<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(de)?.filter(|value| !value.trim().is_empty()))
}

/// Lock holders are reported either as a name or as a numeric process id.
fn owner_label<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Owner {
        Name(String),
        Pid(i64),
    }
    Ok(match Option::<Owner>::deserialize(de)? {
        Some(Owner::Name(name)) if !name.is_empty() => Some(name),
        Some(Owner::Pid(pid)) => Some(pid.to_string()),
        _ => None,
    })
}

/// Opaque bearer credential issued by the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "AuthToken({prefix}…)")
    }
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: AuthToken,
    pub username: String,
}

/// Aggregate server health as reported by `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub c_server_running: bool,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub total_storage_bytes: u64,
    #[serde(default)]
    pub total_storage_human: String,
    #[serde(default)]
    pub audit_log_entries: u64,
    #[serde(default)]
    pub security_events: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub size_human: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub file: String,
    #[serde(
        rename = "type",
        alias = "lock_type",
        default = "unknown",
        deserialize_with = "null_as_unknown"
    )]
    pub lock_type: String,
    #[serde(default, alias = "pid", deserialize_with = "owner_label")]
    pub owner: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub os_concept: Option<String>,
}

impl LockEntry {
    pub fn is_shared(&self) -> bool {
        self.lock_type.eq_ignore_ascii_case("READ")
    }
}

/// Single audit trail record. Missing or null fields take their display defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    #[serde(default = "unknown", deserialize_with = "null_as_unknown")]
    pub operation: String,
    #[serde(default = "not_applicable", deserialize_with = "null_as_not_applicable")]
    pub file: String,
    #[serde(default = "unknown", deserialize_with = "null_as_unknown")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub details: String,
}

impl LogEntry {
    pub fn new(
        timestamp: impl Into<String>,
        operation: impl Into<String>,
        file: impl Into<String>,
        status: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            operation: operation.into(),
            file: file.into(),
            status: status.into(),
            details: details.into(),
        }
    }
}

/// Alert severity shared by security events and scenario alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Classify a security event name: integrity and blocked events are critical,
    /// authentication and access events are warnings, everything else is informational.
    pub fn classify(event: &str) -> Severity {
        let event = event.to_ascii_uppercase();
        if event.contains("INTEGRITY") || event.contains("BLOCKED") {
            Severity::Critical
        } else if event.contains("AUTH") || event.contains("ACCESS") {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security event as reported by `/security`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEntry {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    #[serde(default = "unknown", deserialize_with = "null_as_unknown")]
    pub event: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub file: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub details: String,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl AlertEntry {
    /// Severity reported by the server, or derived from the event name.
    pub fn effective_severity(&self) -> Severity {
        self.severity
            .unwrap_or_else(|| Severity::classify(&self.event))
    }
}

/// Receipt for a successful upload or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub os_operations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn log_entry_defaults_missing_and_null_fields() {
        let entry: LogEntry = serde_json::from_value(json!({
            "timestamp": "2024-05-01 10:00:00",
            "file": null,
        }))
        .unwrap();
        assert_eq!(entry.operation, "UNKNOWN");
        assert_eq!(entry.status, "UNKNOWN");
        assert_eq!(entry.file, "N/A");
        assert_eq!(entry.details, "");
    }

    #[test]
    fn alert_entry_blank_fields_become_none() {
        let alert: AlertEntry = serde_json::from_value(json!({
            "timestamp": "2024-05-01 10:00:00",
            "event": "AUTH_FAILURE",
            "ip": "",
            "file": "N/A",
            "details": "bad token",
        }))
        .unwrap();
        assert_eq!(alert.ip, None);
        assert_eq!(alert.file.as_deref(), Some("N/A"));
        assert_eq!(alert.effective_severity(), Severity::Warning);

        let missing: AlertEntry = serde_json::from_value(json!({})).unwrap();
        assert_eq!(missing.event, "UNKNOWN");
        assert_eq!(missing.effective_severity(), Severity::Info);
    }

    #[test]
    fn classify_matches_event_families() {
        assert_eq!(Severity::classify("INTEGRITY_FAIL"), Severity::Critical);
        assert_eq!(Severity::classify("PATH_TRAVERSAL_BLOCKED"), Severity::Critical);
        assert_eq!(Severity::classify("AUTH_FAILURE"), Severity::Warning);
        assert_eq!(Severity::classify("access_denied"), Severity::Warning);
        assert_eq!(Severity::classify("RATE_NOTICE"), Severity::Info);
    }

    #[test]
    fn lock_entry_accepts_both_shapes() {
        let server: LockEntry = serde_json::from_value(json!({
            "file": "alice/report.txt",
            "type": "WRITE",
            "os_concept": "fcntl(F_WRLCK) - Exclusive lock",
        }))
        .unwrap();
        assert_eq!(server.lock_type, "WRITE");
        assert!(!server.is_shared());
        assert_eq!(server.owner, None);

        let alt: LockEntry = serde_json::from_value(json!({
            "file": "notes.txt",
            "lock_type": "READ",
            "pid": 4242,
        }))
        .unwrap();
        assert!(alt.is_shared());
        assert_eq!(alt.owner.as_deref(), Some("4242"));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = AuthToken::new("abcdef0123456789");
        let rendered = format!("{token:?}");
        assert!(rendered.starts_with("AuthToken(abcd"));
        assert!(!rendered.contains("0123456789"));
    }
}
