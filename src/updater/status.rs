// src/updater/status.rs

//! Status types shared by the update manager, its backends and observers.

use serde::{Deserialize, Serialize};

/// Version information about an update offered by the release channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    pub current_version: String,
    pub release_date: Option<String>,
    pub release_notes: Option<String>,
}

/// A single progress sample published while a package is downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percent: f64,
}

impl DownloadProgress {
    /// Progress at the very start of a download attempt.
    pub fn zero() -> Self {
        Self {
            downloaded_bytes: 0,
            total_bytes: None,
            percent: 0.0,
        }
    }

    /// Build a sample from byte counters, deriving the percentage when the
    /// total size is known.
    pub fn from_bytes(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        let percent = match total_bytes {
            Some(total) if total > 0 => {
                ((downloaded_bytes as f64 / total as f64) * 100.0).min(100.0)
            }
            _ => 0.0,
        };
        Self {
            downloaded_bytes,
            total_bytes,
            percent,
        }
    }
}

/// Outcome of asking the release channel whether a newer version exists.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    NoUpdate,
    UpdateAvailable(UpdateInfo),
}

/// Lifecycle status of the update manager. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum UpdateStatus {
    Idle,
    Checking,
    Available(UpdateInfo),
    Downloading(DownloadProgress),
    Ready(UpdateInfo),
    Error { message: String },
}

impl Default for UpdateStatus {
    fn default() -> Self {
        UpdateStatus::Idle
    }
}

impl UpdateStatus {
    /// The update a download may start from, if any.
    pub fn downloadable(&self) -> Option<&UpdateInfo> {
        match self {
            UpdateStatus::Available(info) | UpdateStatus::Ready(info) => Some(info),
            _ => None,
        }
    }

    pub fn is_checking(&self) -> bool {
        matches!(self, UpdateStatus::Checking)
    }

    pub fn is_downloading(&self) -> bool {
        matches!(self, UpdateStatus::Downloading(_))
    }

    pub fn display_text(&self) -> String {
        match self {
            UpdateStatus::Idle => "Update: Idle".to_string(),
            UpdateStatus::Checking => "Update: Checking".to_string(),
            UpdateStatus::Available(info) => format!(
                "Update: v{} available (running v{})",
                info.version, info.current_version
            ),
            UpdateStatus::Downloading(progress) => {
                format!("Update: Downloading {:.1}%", progress.percent)
            }
            UpdateStatus::Ready(info) => format!("Update: v{} ready to install", info.version),
            UpdateStatus::Error { message } => format!("Update Error: {}", message),
        }
    }
}
