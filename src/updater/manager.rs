// src/updater/manager.rs

//! The update lifecycle state machine.
//!
//! One manager exists per running application. It owns the current
//! [`UpdateStatus`], guards every backend command against the status it is
//! valid in, filters the skipped version and notifies observers. Backend
//! failures never escape: they become [`UpdateStatus::Error`].

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backend::UpdateBackend;
use super::messages::UpdateObserver;
use super::metrics::{DownloadMetrics, ProgressSample, ProgressTracker};
use super::policy::{PolicyStore, VersionPolicy};
use super::status::{CheckOutcome, DownloadProgress, UpdateStatus};

/// State of the progress subscription.
#[derive(Default)]
struct ProgressPump {
    tracker: ProgressTracker,
    listening: bool,
    // Bumped on every start/shutdown so a task from an older subscription
    // can never apply an event.
    subscription: u64,
    task: Option<JoinHandle<()>>,
}

pub struct UpdateManager {
    backend: Arc<dyn UpdateBackend>,
    policy: Arc<dyn PolicyStore>,
    observers: Vec<Arc<dyn UpdateObserver>>,
    status: watch::Sender<UpdateStatus>,
    metrics: watch::Sender<DownloadMetrics>,
    pump: Mutex<ProgressPump>,
    current_version: tokio::sync::Mutex<Option<String>>,
    // Advanced by dismiss/skip; results started under an older epoch are stale.
    epoch: AtomicU64,
}

impl UpdateManager {
    pub fn new(backend: Arc<dyn UpdateBackend>, policy: Arc<dyn PolicyStore>) -> Self {
        let (status, _) = watch::channel(UpdateStatus::Idle);
        let (metrics, _) = watch::channel(DownloadMetrics::default());
        Self {
            backend,
            policy,
            observers: Vec::new(),
            status,
            metrics,
            pump: Mutex::new(ProgressPump::default()),
            current_version: tokio::sync::Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Register an observer. Observers are fixed once the manager is shared.
    pub fn with_observer(mut self, observer: Arc<dyn UpdateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    // --- Queries ---

    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    pub fn metrics(&self) -> DownloadMetrics {
        *self.metrics.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<DownloadMetrics> {
        self.metrics.subscribe()
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.policy.load().last_checked_at
    }

    pub fn policy(&self) -> VersionPolicy {
        self.policy.load()
    }

    pub async fn has_pending_update(&self) -> bool {
        self.backend.has_pending_update().await
    }

    /// Version of the running application. The backend is asked once; every
    /// later call returns the cached value until [`Self::forget_current_version`].
    pub async fn current_version(&self) -> String {
        let mut cached = self.current_version.lock().await;
        if let Some(version) = cached.as_ref() {
            return version.clone();
        }
        let version = self.backend.current_version().await;
        log::info!("Update: running version {}", version);
        self.write_policy(|policy| policy.current_version = Some(version.clone()));
        *cached = Some(version.clone());
        version
    }

    pub async fn forget_current_version(&self) {
        *self.current_version.lock().await = None;
    }

    // --- Progress subscription ---

    /// Subscribe to the backend's progress stream. Must be called from within
    /// a tokio runtime. Calling it again replaces the previous subscription.
    pub fn start(self: &Arc<Self>) {
        let mut rx = self.backend.subscribe_progress();
        let mut pump = self.pump();
        if let Some(task) = pump.task.take() {
            task.abort();
        }
        pump.subscription += 1;
        pump.listening = true;
        let subscription = pump.subscription;
        let manager: Weak<Self> = Arc::downgrade(self);

        pump.task = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(progress) => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        manager.apply_progress(subscription, progress);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("Update: progress stream lagged, {} samples dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        log::debug!("Update: progress subscription {} started", subscription);
    }

    /// Stop processing progress events. No event is applied once this returns.
    pub fn shutdown(&self) {
        let mut pump = self.pump();
        pump.listening = false;
        pump.subscription += 1;
        if let Some(task) = pump.task.take() {
            task.abort();
            log::debug!("Update: progress subscription stopped");
        }
    }

    fn apply_progress(&self, subscription: u64, progress: DownloadProgress) {
        let mut pump = self.pump();
        if !pump.listening || pump.subscription != subscription {
            return;
        }
        let sample = ProgressSample {
            downloaded_bytes: progress.downloaded_bytes,
            total_bytes: progress.total_bytes,
            at: Instant::now(),
        };
        let applied = self.status.send_if_modified(|status| {
            if status.is_downloading() {
                *status = UpdateStatus::Downloading(progress);
                true
            } else {
                false
            }
        });
        if !applied {
            log::debug!("Update: ignoring progress outside of a download");
            return;
        }
        let metrics = pump.tracker.record(sample);
        self.metrics.send_replace(metrics);
    }

    // --- Operations ---

    /// Ask the release channel for a newer version.
    ///
    /// A no-op while a check is in flight, while downloading, and while a
    /// downloaded update waits to be installed.
    pub async fn check_for_update(&self) {
        if let Some(epoch) = self.begin_check() {
            self.run_check(epoch).await;
        }
    }

    /// Move to `Checking` if the status allows it, returning the epoch the
    /// check belongs to. Never awaits, so callers can start a check while
    /// holding a lock.
    pub(crate) fn begin_check(&self) -> Option<u64> {
        let started = self.status.send_if_modified(|status| match status {
            UpdateStatus::Checking | UpdateStatus::Downloading(_) | UpdateStatus::Ready(_) => false,
            _ => {
                *status = UpdateStatus::Checking;
                true
            }
        });
        if !started {
            log::debug!("Update: check skipped, status is {:?}", *self.status.borrow());
            return None;
        }
        log::info!("Update: checking for updates");
        Some(self.epoch.load(Ordering::SeqCst))
    }

    pub(crate) async fn run_check(&self, epoch: u64) {
        let result = self.backend.check().await;
        self.write_policy(|policy| policy.last_checked_at = Some(Utc::now()));

        if self.is_stale(epoch) {
            log::warn!("Update: discarding check result for a dismissed update");
            if let Ok(CheckOutcome::UpdateAvailable(_)) = &result {
                self.drop_stale_pending().await;
            }
            return;
        }

        let next = match result {
            Ok(CheckOutcome::UpdateAvailable(info)) => {
                if self.policy.load().is_skipped(&info.version) {
                    log::info!("Update: v{} is available but was skipped", info.version);
                    self.backend.clear_pending_update().await;
                    UpdateStatus::Idle
                } else {
                    self.write_policy(|policy| {
                        if policy.skipped_version.is_some() && !policy.is_skipped(&info.version) {
                            policy.skipped_version = None;
                        }
                    });
                    UpdateStatus::Available(info)
                }
            }
            Ok(CheckOutcome::NoUpdate) => {
                log::info!("Update: already up to date");
                UpdateStatus::Idle
            }
            Err(e) => {
                log::error!("Update: check failed: {:#}", e);
                UpdateStatus::Error {
                    message: error_message(&e),
                }
            }
        };
        if !self.is_stale(epoch) {
            self.transition(next);
        }
    }

    /// Download the available update. Only valid while an update is
    /// available or already downloaded.
    pub async fn download_update(&self) {
        let Some(epoch) = self.begin_download() else {
            log::debug!("Update: download ignored, nothing to download");
            return;
        };

        let result = self.backend.download().await;
        if self.is_stale(epoch) {
            log::warn!("Update: discarding download result for a dismissed update");
            return;
        }
        match result {
            Ok(info) => self.transition(UpdateStatus::Ready(info)),
            Err(e) => {
                log::error!("Update: download failed: {:#}", e);
                self.transition(UpdateStatus::Error {
                    message: error_message(&e),
                });
            }
        }
    }

    /// Install the downloaded update. On success the status is left alone,
    /// the host is expected to restart.
    pub async fn install_update(&self) {
        if !matches!(*self.status.borrow(), UpdateStatus::Ready(_)) {
            log::debug!("Update: install ignored, no update is ready");
            return;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        log::info!("Update: installing");

        match self.backend.install().await {
            Ok(()) => log::info!("Update: install completed"),
            Err(e) => {
                log::error!("Update: install failed: {:#}", e);
                if !self.is_stale(epoch) {
                    self.transition(UpdateStatus::Error {
                        message: error_message(&e),
                    });
                }
            }
        }
    }

    /// Download and install in one backend call.
    pub async fn download_and_install(&self) {
        let Some(epoch) = self.begin_download() else {
            log::debug!("Update: download and install ignored, nothing to download");
            return;
        };

        match self.backend.download_and_install().await {
            Ok(()) => log::info!("Update: download and install completed"),
            Err(e) => {
                log::error!("Update: download and install failed: {:#}", e);
                if self.is_stale(epoch) {
                    return;
                }
                self.transition(UpdateStatus::Error {
                    message: error_message(&e),
                });
            }
        }
    }

    /// Drop any pending update and return to idle. Valid from every status.
    pub async fn dismiss_update(&self) {
        log::info!("Update: dismissed");
        self.write_policy(|policy| policy.skipped_version = None);
        self.reset_pending().await;
    }

    /// Remember `version` as skipped and dismiss the pending update. Later
    /// checks treat exactly this version string as no update.
    pub async fn skip_version(&self, version: impl Into<String>) {
        let version = version.into();
        log::info!("Update: skipping v{}", version);
        self.write_policy(|policy| policy.skipped_version = Some(version.clone()));
        self.reset_pending().await;
    }

    // --- Internals ---

    fn transition(&self, next: UpdateStatus) {
        log::info!("{}", next.display_text());
        self.status.send_replace(next.clone());
        match &next {
            UpdateStatus::Available(info) => {
                for observer in &self.observers {
                    observer.on_update_available(info);
                }
            }
            UpdateStatus::Ready(info) => {
                for observer in &self.observers {
                    observer.on_update_ready(info);
                }
            }
            UpdateStatus::Error { message } => {
                for observer in &self.observers {
                    observer.on_error(message);
                }
            }
            _ => {}
        }
    }

    /// Move to `Downloading` if the status allows it, returning the epoch the
    /// download belongs to.
    fn begin_download(&self) -> Option<u64> {
        let started = self.status.send_if_modified(|status| {
            if status.downloadable().is_some() {
                *status = UpdateStatus::Downloading(DownloadProgress::zero());
                true
            } else {
                false
            }
        });
        if !started {
            return None;
        }
        self.reset_metrics();
        log::info!("Update: download started");
        Some(self.epoch.load(Ordering::SeqCst))
    }

    async fn reset_pending(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.transition(UpdateStatus::Idle);
        self.reset_metrics();
        self.backend.clear_pending_update().await;
    }

    fn reset_metrics(&self) {
        let mut pump = self.pump();
        pump.tracker.reset();
        self.metrics.send_replace(DownloadMetrics::default());
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// The backend re-populated its pending update for a check the user has
    /// since dismissed. Clear it unless a newer check or download owns it.
    async fn drop_stale_pending(&self) {
        let owned = matches!(
            *self.status.borrow(),
            UpdateStatus::Checking
                | UpdateStatus::Available(_)
                | UpdateStatus::Downloading(_)
                | UpdateStatus::Ready(_)
        );
        if !owned {
            self.backend.clear_pending_update().await;
        }
    }

    fn write_policy(&self, mut apply: impl FnMut(&mut VersionPolicy)) {
        if let Err(e) = self.policy.update(&mut apply) {
            log::warn!("Update: failed to persist version policy: {:#}", e);
        }
    }

    fn pump(&self) -> MutexGuard<'_, ProgressPump> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UpdateManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render an error for the status. A bare message is kept verbatim, context
/// chains are joined with `: `.
fn error_message(error: &anyhow::Error) -> String {
    format!("{:#}", error)
}
