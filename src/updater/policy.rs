// src/updater/policy.rs

//! Durable version policy: the last known app version, when the release
//! channel was last checked, and which version the user chose to skip.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct VersionPolicy {
    pub current_version: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub skipped_version: Option<String>,
}

impl VersionPolicy {
    /// Whether `version` is exactly the version the user skipped.
    pub fn is_skipped(&self, version: &str) -> bool {
        self.skipped_version.as_deref() == Some(version)
    }
}

/// Storage for [`VersionPolicy`]. Reads must observe every completed write.
pub trait PolicyStore: Send + Sync {
    fn load(&self) -> VersionPolicy;

    /// Apply `f` to the stored policy. Concurrent updates never overwrite
    /// each other's fields.
    fn update(&self, f: &mut dyn FnMut(&mut VersionPolicy)) -> Result<()>;
}

/// Policy kept only in memory, for tests and embedders with their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policy: Mutex<VersionPolicy>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: VersionPolicy) -> Self {
        Self {
            policy: Mutex::new(policy),
        }
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn load(&self) -> VersionPolicy {
        self.policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut VersionPolicy)) -> Result<()> {
        f(&mut self.policy.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}

/// Policy persisted as TOML. The in-memory copy is updated before the file
/// is written, so a failed write never hides a decision from this process.
#[derive(Debug)]
pub struct FilePolicyStore {
    path: PathBuf,
    policy: Mutex<VersionPolicy>,
}

/// Default location of the policy file in the platform data directory.
pub fn default_policy_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "SkyUpdate", "SkyUpdate")
        .context("Failed to get project directories")?;
    let data_dir = proj_dirs.data_dir();
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    Ok(data_dir.join("policy.toml"))
}

impl FilePolicyStore {
    /// Open the store at `path`, starting from an empty policy if the file
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let policy = read_policy(&path)?;
        Ok(Self {
            path,
            policy: Mutex::new(policy),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_policy_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyStore for FilePolicyStore {
    fn load(&self) -> VersionPolicy {
        self.policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut VersionPolicy)) -> Result<()> {
        // Held across the write so files land in the order updates were applied.
        let mut guard = self.policy.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        write_policy(&self.path, &guard)
    }
}

fn read_policy(path: &Path) -> Result<VersionPolicy> {
    if !path.exists() {
        return Ok(VersionPolicy::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))
}

fn write_policy(path: &Path, policy: &VersionPolicy) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(policy).context("Failed to serialize policy")?;
    fs::write(path, contents)
        .with_context(|| format!("Failed to write policy file: {}", path.display()))
}
