//! ---
//! fsd_section: "01-core-functionality"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Shared primitives and utilities for the dashboard engine."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Human-readable byte count matching the server's `size_human` rendering (`1.5 KB`).
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}
