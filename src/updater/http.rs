// src/updater/http.rs

//! An [`UpdateBackend`] that reads a JSON release manifest over HTTP and
//! stages the downloaded package on disk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use url::Url;

use super::backend::UpdateBackend;
use super::status::{CheckOutcome, DownloadProgress, UpdateInfo};
use super::utils::{file_name_from_url, parse_version};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("No update pending")]
    NoPendingUpdate,
    #[error("Update v{0} has not been downloaded")]
    NotDownloaded(String),
    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode),
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Release manifest published next to the packages.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pub_date: Option<String>,
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Configuration for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub manifest_url: Url,
    pub current_version: String,
    pub cache_dir: PathBuf,
    pub install_path: PathBuf,
}

#[derive(Debug, Clone)]
struct PendingRelease {
    info: UpdateInfo,
    url: Url,
    sha256: Option<String>,
    package_path: Option<PathBuf>,
}

pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
    pending: Mutex<Option<PendingRelease>>,
    progress_tx: broadcast::Sender<DownloadProgress>,
}

// Helper to create a client for the release feed
pub fn create_http_client(current_version: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("skyupdate/{}", current_version))
        .build()
        .context("Failed to build HTTP client")
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = create_http_client(&config.current_version)?;
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            client,
            pending: Mutex::new(None),
            progress_tx,
        })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    async fn fetch_manifest(&self) -> Result<ReleaseManifest> {
        let url = &self.config.manifest_url;
        log::debug!("Update: fetching manifest from {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        if !response.status().is_success() {
            return Err(ReleaseError::Http(response.status()).into());
        }
        response
            .json::<ReleaseManifest>()
            .await
            .with_context(|| format!("Failed to parse release manifest from {}", url))
    }

    /// Stream the package to the cache directory, publishing progress after
    /// every chunk, and verify its digest when the manifest carries one.
    async fn fetch_package(&self, release: &PendingRelease) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create cache directory: {}",
                    self.config.cache_dir.display()
                )
            })?;
        let package_path = self.config.cache_dir.join(file_name_from_url(&release.url));

        let mut response = self
            .client
            .get(release.url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", release.url))?;
        if !response.status().is_success() {
            return Err(ReleaseError::Http(response.status()).into());
        }
        let total = response.content_length();

        let streamed = self
            .stream_to_file(&mut response, &package_path, total)
            .await
            .and_then(|digest| match &release.sha256 {
                Some(expected) if !digest.eq_ignore_ascii_case(expected) => {
                    Err(ReleaseError::ChecksumMismatch {
                        expected: expected.clone(),
                        actual: digest,
                    }
                    .into())
                }
                _ => Ok(()),
            });
        if let Err(e) = streamed {
            // Never leave a partial or corrupt package in the cache.
            remove_file_quietly(&package_path).await;
            return Err(e);
        }
        Ok(package_path)
    }

    /// Write the response body to `path`, returning the hex sha256 of what
    /// was written.
    async fn stream_to_file(
        &self,
        response: &mut reqwest::Response,
        path: &Path,
        total: Option<u64>,
    ) -> Result<String> {
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let url = response.url().clone();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        self.publish(DownloadProgress::from_bytes(0, total));
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            self.publish(DownloadProgress::from_bytes(downloaded, total));
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        log::info!(
            "Update: downloaded {} bytes to {}",
            downloaded,
            path.display()
        );
        Ok(hex::encode(hasher.finalize()))
    }

    fn publish(&self, progress: DownloadProgress) {
        // No receivers simply means nobody is watching.
        let _ = self.progress_tx.send(progress);
    }

    async fn move_into_place(&self, package_path: &Path) -> Result<()> {
        let target = &self.config.install_path;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        if tokio::fs::rename(package_path, target).await.is_err() {
            // rename fails across filesystems
            tokio::fs::copy(package_path, target).await.with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    package_path.display(),
                    target.display()
                )
            })?;
            remove_file_quietly(package_path).await;
        }
        log::info!("Update: package installed to {}", target.display());
        Ok(())
    }
}

#[async_trait]
impl UpdateBackend for HttpBackend {
    async fn check(&self) -> Result<CheckOutcome> {
        let manifest = self.fetch_manifest().await?;
        let remote = parse_version(&manifest.version)?;
        let local = parse_version(&self.config.current_version)?;

        let mut pending = self.pending.lock().await;
        if remote <= local {
            log::debug!(
                "Update: remote v{} is not newer than v{}",
                remote,
                local
            );
            *pending = None;
            return Ok(CheckOutcome::NoUpdate);
        }

        let url = self
            .config
            .manifest_url
            .join(&manifest.url)
            .with_context(|| format!("Invalid package URL: {}", manifest.url))?;
        let info = UpdateInfo {
            version: remote.to_string(),
            current_version: local.to_string(),
            release_date: manifest.pub_date,
            release_notes: manifest.notes,
        };

        // Keep an already downloaded package if the same release is offered again.
        let package_path = pending
            .as_ref()
            .filter(|p| p.info.version == info.version && p.url == url)
            .and_then(|p| p.package_path.clone());
        *pending = Some(PendingRelease {
            info: info.clone(),
            url,
            sha256: manifest.sha256,
            package_path,
        });
        Ok(CheckOutcome::UpdateAvailable(info))
    }

    async fn download(&self) -> Result<UpdateInfo> {
        let release = self
            .pending
            .lock()
            .await
            .clone()
            .ok_or(ReleaseError::NoPendingUpdate)?;

        let package_path = self.fetch_package(&release).await?;

        let mut pending = self.pending.lock().await;
        match pending.as_mut() {
            Some(current) if current.info.version == release.info.version => {
                current.package_path = Some(package_path);
            }
            // Cleared or replaced while downloading.
            _ => {
                remove_file_quietly(&package_path).await;
                return Err(ReleaseError::NoPendingUpdate.into());
            }
        }
        Ok(release.info)
    }

    async fn install(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let release = pending.as_ref().ok_or(ReleaseError::NoPendingUpdate)?;
        let package_path = release
            .package_path
            .clone()
            .ok_or_else(|| ReleaseError::NotDownloaded(release.info.version.clone()))?;

        self.move_into_place(&package_path).await?;
        *pending = None;
        Ok(())
    }

    async fn download_and_install(&self) -> Result<()> {
        self.download().await?;
        self.install().await
    }

    async fn current_version(&self) -> String {
        self.config.current_version.clone()
    }

    async fn clear_pending_update(&self) {
        let cleared = self.pending.lock().await.take();
        if let Some(path) = cleared.and_then(|release| release.package_path) {
            remove_file_quietly(&path).await;
        }
    }

    async fn has_pending_update(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    fn subscribe_progress(&self) -> broadcast::Receiver<DownloadProgress> {
        self.progress_tx.subscribe()
    }
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        log::debug!("Update: could not remove {}: {}", path.display(), e);
    }
}
