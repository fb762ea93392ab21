//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "binary"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Plain-text rendering of dashboard state for the control CLI."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use fsd_api::{FileEntry, LogEntry};
use fsd_common::format_bytes;
use fsd_core::{AuditCategory, DomainHealth, FeedAlert, NarrativeLine, ViewSnapshot};

pub fn dashboard(view: &ViewSnapshot, alerts: &[FeedAlert]) {
    match &view.status {
        Some(status) => {
            println!(
                "Server: {}",
                if status.c_server_running { "running" } else { "stopped" }
            );
            println!("Files: {}", status.file_count);
            let storage = if status.total_storage_human.is_empty() {
                format_bytes(status.total_storage_bytes)
            } else {
                status.total_storage_human.clone()
            };
            println!("Storage: {storage}");
            println!("Audit entries: {}", status.audit_log_entries);
            println!("Security events: {}", status.security_events);
        }
        None => println!("Server: unknown"),
    }

    println!();
    files(&view.files);

    println!();
    if view.locks.is_empty() {
        println!("No active locks");
    } else {
        println!("{:<32} {:<6} {:<12} OS", "LOCKED FILE", "TYPE", "OWNER");
        for lock in &view.locks {
            println!(
                "{:<32} {:<6} {:<12} {}",
                lock.file,
                lock.lock_type,
                lock.owner.as_deref().unwrap_or("-"),
                lock.os_concept.as_deref().unwrap_or("")
            );
        }
    }

    println!();
    for (domain, health) in &view.health {
        let state = match health {
            DomainHealth::Unknown => "unknown".to_owned(),
            DomainHealth::Healthy { at } => format!("ok ({})", at.format("%H:%M:%S")),
            DomainHealth::Failing {
                error, consecutive, ..
            } => format!("failing x{consecutive}: {error}"),
        };
        println!("{domain:<16} {state}");
    }

    if !alerts.is_empty() {
        println!();
        for alert in alerts {
            println!("{}", alert_line(alert));
        }
    }
}

pub fn files(files: &[FileEntry]) {
    if files.is_empty() {
        println!("No files on server");
        return;
    }
    println!("{:<40} SIZE", "NAME");
    for file in files {
        let size = if file.size_human.is_empty() {
            format_bytes(file.size)
        } else {
            file.size_human.clone()
        };
        println!("{:<40} {size}", file.name);
    }
}

pub fn audit(category: &AuditCategory, entries: &[LogEntry]) {
    if entries.is_empty() {
        println!("No audit entries match '{category}'");
        return;
    }
    for entry in entries {
        println!(
            "{:<20} {:<10} {:<28} {:<8} {}",
            entry.timestamp, entry.operation, entry.file, entry.status, entry.details
        );
    }
}

pub fn os_operations(operations: &[String]) {
    for op in operations {
        println!("  os: {op}");
    }
}

pub fn alert_line(alert: &FeedAlert) -> String {
    format!(
        "[{}] {} {}: {}",
        alert.raised_at.format("%H:%M:%S"),
        alert.severity.as_str().to_ascii_uppercase(),
        alert.kind,
        alert.message
    )
}

pub fn narrative_line(line: &NarrativeLine) -> String {
    format!("{} {}", line.at.format("%H:%M:%S"), line.text)
}

pub fn summary_line(view: &ViewSnapshot) -> String {
    let failing = view
        .health
        .values()
        .filter(|health| health.is_failing())
        .count();
    format!(
        "files={} locks={} security={} failing_domains={failing}",
        view.files.len(),
        view.locks.len(),
        view.security.len()
    )
}
