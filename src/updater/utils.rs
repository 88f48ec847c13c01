// src/updater/utils.rs

//! Utility functions for update operations

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Parse a release version, tolerating a leading `v`.
pub fn parse_version(version: &str) -> Result<semver::Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed).with_context(|| format!("Invalid version: {}", version))
}

/// Last path segment of a package URL, used as the cached file name.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| "update.pkg".to_string())
}

/// Function to calculate the SHA-256 hex digest of a package
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

const BYTE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

// Divide by 1024 until the value fits the unit, stopping at `max_unit`.
fn scale_bytes(mut value: f64, max_unit: usize) -> (f64, usize) {
    let mut unit = 0;
    while value >= 1024.0 && unit < max_unit {
        value /= 1024.0;
        unit += 1;
    }
    (value, unit)
}

/// Download rate as `512 B/s`, `1.5 KB/s` or `3.2 MB/s`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    match scale_bytes(bytes_per_sec, 2) {
        (value, 0) => format!("{:.0} B/s", value),
        (value, unit) => format!("{:.1} {}/s", value, BYTE_UNITS[unit]),
    }
}

/// Package size as `512 B`, `1.5 KB`, `3.2 MB` or `1.25 GB`.
pub fn format_size(bytes: u64) -> String {
    match scale_bytes(bytes as f64, 3) {
        (_, 0) => format!("{} B", bytes),
        (value, 3) => format!("{:.2} GB", value),
        (value, unit) => format!("{:.1} {}", value, BYTE_UNITS[unit]),
    }
}

/// Remaining time as `1h 02m`, `3m 05s` or `42s`.
pub fn format_eta(seconds: f64) -> String {
    let total = seconds.max(0.0).ceil() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
