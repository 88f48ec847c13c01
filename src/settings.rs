use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::updater::http::HttpBackendConfig;

const SETTINGS_FILE_NAME: &str = "skyupdate-settings.toml";

/// Updater settings stored as TOML next to the executable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UpdaterSettings {
    pub manifest_url: String,
    pub check_interval_ms: u64,
    pub cache_dir: PathBuf,
    pub install_path: PathBuf,
    /// Overrides the version compiled into the binary.
    pub current_version: Option<String>,
    /// Overrides the platform data directory for the version policy.
    pub policy_path: Option<PathBuf>,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            check_interval_ms: 3_600_000,
            cache_dir: PathBuf::from("updates"),
            install_path: PathBuf::from("staged/update.pkg"),
            current_version: None,
            policy_path: None,
        }
    }
}

impl UpdaterSettings {
    /// `skyupdate-settings.toml` beside the updater binary, so a portable
    /// install carries its release feed with it.
    pub fn settings_file_path() -> Result<PathBuf> {
        let exe = std::env::current_exe().context("Failed to locate the updater executable")?;
        match exe.parent() {
            Some(dir) => Ok(dir.join(SETTINGS_FILE_NAME)),
            None => Ok(std::env::current_dir()
                .context("Failed to read the working directory")?
                .join(SETTINGS_FILE_NAME)),
        }
    }

    /// Load settings if present, otherwise return defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings: Self = toml::from_str(&s).context("Failed to parse settings TOML")?;
        Ok(settings)
    }

    /// Save settings to the file next to the exe.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;
        fs::write(path, toml)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn current_version(&self) -> String {
        self.current_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }

    /// Resolve the configuration for the HTTP release backend.
    pub fn backend_config(&self) -> Result<HttpBackendConfig> {
        if self.manifest_url.trim().is_empty() {
            bail!("Manifest URL is not configured");
        }
        if self.check_interval_ms == 0 {
            bail!("Check interval must be greater than zero");
        }
        let manifest_url = Url::parse(self.manifest_url.trim())
            .with_context(|| format!("Invalid manifest URL: {}", self.manifest_url))?;
        Ok(HttpBackendConfig {
            manifest_url,
            current_version: self.current_version(),
            cache_dir: self.cache_dir.clone(),
            install_path: self.install_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_settings() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("skyupdate-settings.toml");

        let mut s = UpdaterSettings::default();
        s.manifest_url = "https://example.com/latest.json".into();
        s.cache_dir = PathBuf::from("/tmp/updates");
        s.current_version = Some("1.0.0".into());

        s.save_to(&path)?;
        let loaded = UpdaterSettings::load_from(&path)?;
        assert_eq!(s, loaded);
        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("skyupdate-settings.toml");
        fs::write(&path, "manifest_url = \"https://example.com/latest.json\"\n")?;

        let loaded = UpdaterSettings::load_from(&path)?;
        assert_eq!(loaded.manifest_url, "https://example.com/latest.json");
        assert_eq!(loaded.check_interval(), Duration::from_millis(3_600_000));
        assert_eq!(loaded.current_version, None);
        Ok(())
    }

    #[test]
    fn test_backend_config_requires_manifest_url() {
        let settings = UpdaterSettings::default();
        assert!(settings.backend_config().is_err());

        let settings = UpdaterSettings {
            manifest_url: "not a url".into(),
            ..Default::default()
        };
        assert!(settings.backend_config().is_err());

        let settings = UpdaterSettings {
            manifest_url: "https://example.com/latest.json".into(),
            current_version: Some("2.0.0".into()),
            ..Default::default()
        };
        let config = settings.backend_config().unwrap();
        assert_eq!(config.current_version, "2.0.0");
        assert_eq!(config.manifest_url.as_str(), "https://example.com/latest.json");
    }
}
