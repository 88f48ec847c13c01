// src/updater/backend.rs

//! The command surface of the host update service.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::status::{CheckOutcome, DownloadProgress, UpdateInfo};

/// Backend that actually talks to the release channel and swaps binaries.
///
/// The manager only orchestrates: every call here may take a long time and
/// any `Err` is turned into an error status by the caller.
#[async_trait]
pub trait UpdateBackend: Send + Sync {
    /// Ask the release channel whether a newer version exists. An available
    /// update becomes the backend's pending update.
    async fn check(&self) -> Result<CheckOutcome>;

    /// Download the pending update, publishing progress while it runs.
    async fn download(&self) -> Result<UpdateInfo>;

    /// Install a previously downloaded update.
    async fn install(&self) -> Result<()>;

    /// Download and install the pending update in one step.
    async fn download_and_install(&self) -> Result<()>;

    /// Version of the running application.
    async fn current_version(&self) -> String;

    /// Forget the pending update after the user dismissed or skipped it.
    async fn clear_pending_update(&self);

    async fn has_pending_update(&self) -> bool;

    /// Subscribe to progress samples emitted during downloads. Dropping the
    /// receiver unsubscribes.
    fn subscribe_progress(&self) -> broadcast::Receiver<DownloadProgress>;
}
