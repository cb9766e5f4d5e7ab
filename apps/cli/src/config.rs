//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkferry/config.toml`
//! - Windows: `%APPDATA%/chunkferry/config.toml`
//!
//! Command-line flags override these values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chunkferry_retry::RetryPolicy;
use chunkferry_transfer::DEFAULT_PART_SIZE;
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default endpoint for `send` (`local:`, `host:` or `s3:`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Part size in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Retries after the first attempt of each operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in seconds. Doubles per attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: f64,

    /// Upper bound on a single backoff delay, in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: f64,

    /// Spread backoff delays by ±25%.
    #[serde(default)]
    pub jitter: bool,

    /// Parts uploaded at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Overall time limit per transfer, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<f64>,

    /// Keep a journal beside the source so a rerun resumes.
    #[serde(default = "default_true")]
    pub journal: bool,

    /// Shared token for `host:` endpoints and `receive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// `Authorization` header value for `s3:` endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    /// Address `receive` listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Byte limit for `local:` endpoints and `receive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<u64>,
}

fn default_endpoint() -> String {
    "local:.".into()
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_max_retries() -> u32 {
    4
}

fn default_backoff_base() -> f64 {
    0.25
}

fn default_max_backoff() -> f64 {
    15.0
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0:7070".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            part_size: default_part_size(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
            max_backoff_secs: default_max_backoff(),
            jitter: false,
            concurrency: default_concurrency(),
            deadline_secs: None,
            journal: default_true(),
            token: None,
            authorization: None,
            bind: default_bind(),
            quota_bytes: None,
        }
    }
}

impl Config {
    /// Loads `path` (or the platform default), creating it with defaults
    /// if missing.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            if let Err(e) = config.save_to(path) {
                tracing::warn!(path = %path.display(), error = %e, "could not write default configuration");
            }
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May hold credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Builds the retry policy: `max_retries + 1` attempts per operation.
    pub fn retry_policy(&self) -> anyhow::Result<RetryPolicy> {
        Ok(RetryPolicy::from_max_retries(self.max_retries)
            .with_backoff(
                seconds(self.backoff_base_secs, "backoff base")?,
                seconds(self.max_backoff_secs, "max backoff")?,
            )
            .with_jitter(self.jitter))
    }

    pub fn deadline(&self) -> anyhow::Result<Option<Duration>> {
        self.deadline_secs
            .map(|secs| seconds(secs, "deadline"))
            .transpose()
    }
}

fn seconds(value: f64, what: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{what} must be a non-negative number of seconds, got {value}"))
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkferry")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkferry").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunkferry/config.toml"))
    }
}
