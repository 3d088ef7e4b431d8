//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use healthsync_common::{ApiKey, Error, Result};

/// Default remote API base.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:18081/api";
/// Device description sent with every payload.
pub const DEFAULT_DEVICE_INFO: &str = "Health Sync Agent v1.0";
/// Device description used by the background runner.
pub const BACKGROUND_DEVICE_INFO: &str = "Health Sync Agent Background";
/// Maximum number of retained sync log entries.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Configuration shared by the foreground coordinator and the background
/// runner.
///
/// Every field has a default so a partial JSON file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the remote API, without trailing slash.
    pub api_base: String,
    /// Static credential sent as `x-api-key`.
    pub api_key: ApiKey,
    /// Device description placed in payloads.
    pub device_info: String,
    /// Auto-sync interval.
    pub sync_interval_secs: u64,
    /// Pause after reconnect before retrying.
    pub stabilization_delay_ms: u64,
    /// Timeout for the `/health` probe.
    pub probe_timeout_secs: u64,
    /// Timeout for sync and log requests.
    pub request_timeout_secs: u64,
    /// How often the connectivity probe runs in long-lived mode.
    pub connectivity_poll_secs: u64,
    /// Number of remote log entries fetched for merging.
    pub remote_log_limit: usize,
    /// Maximum number of retained sync log entries.
    pub log_capacity: usize,
    /// Directory holding the persistent store.
    pub data_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: ApiKey::default(),
            device_info: DEFAULT_DEVICE_INFO.to_string(),
            sync_interval_secs: 30 * 60,
            stabilization_delay_ms: 1000,
            probe_timeout_secs: 5,
            request_timeout_secs: 30,
            connectivity_poll_secs: 60,
            remote_log_limit: 10,
            log_capacity: DEFAULT_LOG_CAPACITY,
            data_dir: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Check the configuration for values the agent cannot work with.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.api_base)
            .map_err(|e| Error::Config(format!("Invalid api_base '{}': {}", self.api_base, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "api_base must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::Config("sync_interval_secs must be positive".to_string()));
        }
        if self.probe_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        if self.log_capacity == 0 {
            return Err(Error::Config("log_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// API base with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connectivity_poll(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs.max(1))
    }

    /// Directory for the persistent store, falling back to the platform
    /// data directory.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("health-sync"))
            .ok_or_else(|| Error::Config("No platform data directory; set data_dir".to_string()))
    }
}
