use crate::global;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable that overrides `auth.api_key`.
pub const API_KEY_ENV: &str = "EXAM_STUDIO_API_KEY";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub devices: DevicesConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL of the document store REST API.
    pub endpoint: String,
    pub project_id: String,
    pub api_key: Option<String>,
    /// Collection holding one document per examinee, keyed by full name.
    pub collection: String,
    pub password_field: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_seconds: u32,
    /// Pause before each session acquires devices, so the previous holder
    /// has released them.
    pub acquire_delay_ms: u64,
    pub timeslice_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// `system` (cpal microphone) or `synthetic`.
    pub backend: String,
    pub health_poll_ms: u64,
    pub video_width: u32,
    pub video_height: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://firestore.googleapis.com/v1".to_string(),
            project_id: "pronunciation-examination".to_string(),
            api_key: None,
            collection: "Cedar".to_string(),
            password_field: "Password".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 60,
            acquire_delay_ms: 500,
            timeslice_ms: 1000,
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            backend: "system".to_string(),
            health_poll_ms: 500,
            video_width: 1280,
            video_height: 720,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

impl AuthConfig {
    /// Config value, unless the environment provides one.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }
}

impl SessionConfig {
    pub fn acquire_delay(&self) -> Duration {
        Duration::from_millis(self.acquire_delay_ms)
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }
}

impl DevicesConfig {
    pub fn health_poll(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {:?}", config_path))?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Reject timing values the session machinery cannot run with.
    pub fn validate(&self) -> Result<()> {
        check_range("session.duration_seconds", self.session.duration_seconds as u64, 1, 3_600)?;
        check_range("session.timeslice_ms", self.session.timeslice_ms, 10, 60_000)?;
        check_range("session.acquire_delay_ms", self.session.acquire_delay_ms, 0, 10_000)?;
        check_range("devices.health_poll_ms", self.devices.health_poll_ms, 10, 60_000)?;
        if self.auth.timeout_seconds == 0 {
            bail!("auth.timeout_seconds must be at least 1");
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        bail!("{} must be between {} and {}, got {}", key, min, max, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.duration_seconds, 60);
        assert_eq!(config.session.acquire_delay(), Duration::from_millis(500));
        assert_eq!(config.devices.health_poll(), Duration::from_millis(500));
        assert_eq!(config.auth.collection, "Cedar");
        assert_eq!(config.auth.password_field, "Password");
        assert_eq!(config.devices.backend, "system");
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.api.port, 3838);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nduration_seconds = 30\n\n[devices]\nbackend = \"synthetic\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.session.duration_seconds, 30);
        assert_eq!(config.session.acquire_delay_ms, 500);
        assert_eq!(config.devices.backend, "synthetic");
        assert_eq!(config.devices.video_width, 1280);
        assert_eq!(config.auth.collection, "Cedar");
    }

    #[test]
    fn test_save_then_load_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.auth.project_id = "exam-project".to_string();
        config.api.port = 4000;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.auth.project_id, "exam-project");
        assert_eq!(loaded.api.port, 4000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session\nduration_seconds = ").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_zero_periods_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        for content in [
            "[devices]\nhealth_poll_ms = 0\n",
            "[session]\ntimeslice_ms = 0\n",
            "[session]\nduration_seconds = 0\n",
            "[session]\nduration_seconds = 100000\n",
            "[auth]\ntimeout_seconds = 0\n",
        ] {
            std::fs::write(&path, content).unwrap();
            let err = Config::load_from(&path).unwrap_err();
            assert!(
                format!("{:#}", err).contains("Invalid config file"),
                "{content}: {err:#}"
            );
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }
}
