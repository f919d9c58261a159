//! Engine configuration management

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::network::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};

/// What to do with a segment whose decryption fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecryptFailurePolicy {
    /// Keep the raw ciphertext and carry on; output may be corrupt
    FallbackToCiphertext,
    /// Abort the whole job
    FailJob,
}

/// Main engine configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    /// Sent with every request unless the caller overrides the same header
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Pause after this many segments
    pub yield_every_segments: usize,
    pub yield_delay_ms: u64,
    /// Longest master → media chain followed before giving up
    pub max_playlist_depth: usize,
    /// Capture a master playlist as ready and pick the variant at download time
    pub defer_master_resolution: bool,
    pub decrypt_failure_policy: DecryptFailurePolicy,
    /// Abort once more than this many segments failed; `None` keeps every partial result
    pub max_failed_segments: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            max_redirects: 10,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            yield_every_segments: 10,
            yield_delay_ms: 10,
            max_playlist_depth: 5,
            defer_master_resolution: true,
            decrypt_failure_policy: DecryptFailurePolicy::FallbackToCiphertext,
            max_failed_segments: None,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }

    /// Load configuration from the per-user config file, creating a default one if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: EngineConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;

        tracing::info!("Loaded configuration from: {:?}", path);
        Ok(config)
    }

    /// Like [`EngineConfig::load`] but never fails; problems are logged and defaults used
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    "Failed to load configuration: {:#}. Using defaults",
                    err
                );
                Self::default()
            }
        }
    }

    /// Save configuration to the per-user config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::debug!("Saved configuration to: {:?}", path);
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "streamgrab", "streamgrab")
            .context("Failed to resolve a configuration directory")?;
        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            bail!("user_agent must not be empty");
        }
        if self.timeout_seconds == 0 {
            bail!("timeout_seconds must be greater than 0");
        }
        if self.yield_every_segments == 0 {
            bail!("yield_every_segments must be greater than 0");
        }
        if self.max_playlist_depth == 0 {
            bail!("max_playlist_depth must be at least 1");
        }
        if let Some((name, _)) = self
            .headers
            .iter()
            .find(|(name, _)| name.trim().is_empty() || name.contains(':'))
        {
            bail!("invalid header name: {:?}", name);
        }
        Ok(())
    }
}
