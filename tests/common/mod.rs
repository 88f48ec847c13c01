// tests/common/mod.rs

//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use skyupdate::updater::{
    CheckOutcome, DownloadProgress, MemoryPolicyStore, UpdateBackend, UpdateInfo, UpdateManager,
    UpdateObserver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Semaphore};

pub fn info(version: &str, current: &str) -> UpdateInfo {
    UpdateInfo {
        version: version.to_string(),
        current_version: current.to_string(),
        release_date: Some("2026-10-01T00:00:00Z".to_string()),
        release_notes: Some(format!("Release notes for {}", version)),
    }
}

/// A gate that lets a test hold a backend call in flight.
pub struct Gate {
    permits: Semaphore,
}

impl Gate {
    fn open() -> Self {
        Self {
            permits: Semaphore::new(Semaphore::MAX_PERMITS / 2),
        }
    }

    fn closed() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Scriptable backend that counts every call.
pub struct MockBackend {
    pub check_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub install_calls: AtomicUsize,
    pub download_and_install_calls: AtomicUsize,
    pub version_calls: AtomicUsize,
    pub clear_calls: AtomicUsize,
    pub check_gate: Gate,
    pub download_gate: Gate,
    check_result: Mutex<Result<CheckOutcome, String>>,
    download_result: Mutex<Result<UpdateInfo, String>>,
    install_result: Mutex<Result<(), String>>,
    download_and_install_result: Mutex<Result<(), String>>,
    pending: Mutex<bool>,
    version: String,
    pub progress_tx: broadcast::Sender<DownloadProgress>,
}

impl MockBackend {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(16);
        Self {
            check_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            install_calls: AtomicUsize::new(0),
            download_and_install_calls: AtomicUsize::new(0),
            version_calls: AtomicUsize::new(0),
            clear_calls: AtomicUsize::new(0),
            check_gate: Gate::open(),
            download_gate: Gate::open(),
            check_result: Mutex::new(Ok(CheckOutcome::NoUpdate)),
            download_result: Mutex::new(Err("nothing to download".to_string())),
            install_result: Mutex::new(Ok(())),
            download_and_install_result: Mutex::new(Ok(())),
            pending: Mutex::new(false),
            version: "1.0.0".to_string(),
            progress_tx,
        }
    }

    pub fn with_gated_check(mut self) -> Self {
        self.check_gate = Gate::closed();
        self
    }

    pub fn with_gated_download(mut self) -> Self {
        self.download_gate = Gate::closed();
        self
    }

    pub fn set_check(&self, result: Result<CheckOutcome, &str>) {
        *self.check_result.lock().unwrap() = result.map_err(str::to_string);
    }

    pub fn set_download(&self, result: Result<UpdateInfo, &str>) {
        *self.download_result.lock().unwrap() = result.map_err(str::to_string);
    }

    pub fn set_install(&self, result: Result<(), &str>) {
        *self.install_result.lock().unwrap() = result.map_err(str::to_string);
    }

    pub fn set_download_and_install(&self, result: Result<(), &str>) {
        *self.download_and_install_result.lock().unwrap() = result.map_err(str::to_string);
    }

    pub fn send_progress(&self, downloaded: u64, total: Option<u64>) {
        let _ = self
            .progress_tx
            .send(DownloadProgress::from_bytes(downloaded, total));
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateBackend for MockBackend {
    async fn check(&self) -> Result<CheckOutcome> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        self.check_gate.pass().await;
        let result = self.check_result.lock().unwrap().clone();
        if let Ok(CheckOutcome::UpdateAvailable(_)) = &result {
            *self.pending.lock().unwrap() = true;
        }
        result.map_err(|e| anyhow!(e))
    }

    async fn download(&self) -> Result<UpdateInfo> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.download_gate.pass().await;
        let result = self.download_result.lock().unwrap().clone();
        result.map_err(|e| anyhow!(e))
    }

    async fn install(&self) -> Result<()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.install_result.lock().unwrap().clone();
        result.map_err(|e| anyhow!(e))
    }

    async fn download_and_install(&self) -> Result<()> {
        self.download_and_install_calls.fetch_add(1, Ordering::SeqCst);
        self.download_gate.pass().await;
        let result = self.download_and_install_result.lock().unwrap().clone();
        result.map_err(|e| anyhow!(e))
    }

    async fn current_version(&self) -> String {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.version.clone()
    }

    async fn clear_pending_update(&self) {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        *self.pending.lock().unwrap() = false;
    }

    async fn has_pending_update(&self) -> bool {
        *self.pending.lock().unwrap()
    }

    fn subscribe_progress(&self) -> broadcast::Receiver<DownloadProgress> {
        self.progress_tx.subscribe()
    }
}

/// Observer that records every hook invocation.
#[derive(Default)]
pub struct RecordingObserver {
    pub available: Mutex<Vec<UpdateInfo>>,
    pub ready: Mutex<Vec<UpdateInfo>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn available(&self) -> Vec<UpdateInfo> {
        self.available.lock().unwrap().clone()
    }

    pub fn ready(&self) -> Vec<UpdateInfo> {
        self.ready.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl UpdateObserver for RecordingObserver {
    fn on_update_available(&self, info: &UpdateInfo) {
        self.available.lock().unwrap().push(info.clone());
    }

    fn on_update_ready(&self, info: &UpdateInfo) {
        self.ready.lock().unwrap().push(info.clone());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub policy: Arc<MemoryPolicyStore>,
    pub observer: Arc<RecordingObserver>,
    pub manager: Arc<UpdateManager>,
}

pub fn harness(backend: MockBackend) -> Harness {
    let backend = Arc::new(backend);
    let policy = Arc::new(MemoryPolicyStore::new());
    let observer = Arc::new(RecordingObserver::default());
    let manager = UpdateManager::new(backend.clone(), policy.clone())
        .with_observer(observer.clone());
    Harness {
        backend,
        policy,
        observer,
        manager: Arc::new(manager),
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
