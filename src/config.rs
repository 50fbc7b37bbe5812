use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_ENV: &str = "BANGLA_QA_API_URL";

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_startup_script() -> String {
    "start.sh".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Named in the guidance shown when the backend cannot be reached.
    #[serde(default = "default_startup_script")]
    pub startup_script: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 900,
            height: 760,
            min_width: 480,
            min_height: 400,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig {
                url: "http://localhost:8000".to_string(),
                request_timeout_secs: default_request_timeout_secs(),
                probe_timeout_secs: default_probe_timeout_secs(),
                probe_interval_secs: default_probe_interval_secs(),
                startup_script: default_startup_script(),
            },
            window: WindowConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl Config {
    /// Load the config file, falling back to defaults on any problem, then
    /// apply the environment override for the API address.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let mut config = if config_path.exists() {
            match Self::from_path(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("{:#}. Using defaults.", e);
                    Config::default()
                }
            }
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Config::default()
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.apply_url_override(&url);
        }

        config
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Error reading {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Error parsing {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let durations = [
            ("backend.request_timeout_secs", self.backend.request_timeout_secs),
            ("backend.probe_timeout_secs", self.backend.probe_timeout_secs),
            ("backend.probe_interval_secs", self.backend.probe_interval_secs),
        ];
        for (key, secs) in durations {
            if secs == 0 {
                bail!("{} must be at least 1 second", key);
            }
        }
        Ok(())
    }

    fn apply_url_override(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            tracing::info!("Backend URL overridden by {}: {}", API_URL_ENV, url);
            self.backend.url = url.to_string();
        }
    }

    pub fn get_config_path() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/bangla-qa/config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}
