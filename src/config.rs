use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};
use tracing::debug;

use crate::cluster::DEFAULT_REPLICAS;
use crate::error::DispatchError;

/// Longest accepted retention, one hundred years
pub const MAX_RETENTION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_server_id")]
    pub server_id: String,
    /// Servers known at startup, normally including `server_id`
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound of the random delay added to each poll
    #[serde(default = "default_poll_jitter_ms")]
    pub poll_jitter_ms: u64,
    /// Age after which a claimed but unfinished record may be reclaimed
    #[serde(default = "default_reclaim_after_secs")]
    pub reclaim_after_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Finished records older than this are pruned; kept forever when unset
    #[serde(default)]
    pub retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub json_file: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            servers: Vec::new(),
            replicas: default_replicas(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_jitter_ms: default_poll_jitter_ms(),
            reclaim_after_secs: default_reclaim_after_secs(),
            max_concurrency: default_max_concurrency(),
            retention_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            json_file: default_true(),
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    pub fn reclaim_after(&self) -> Duration {
        Duration::from_secs(self.reclaim_after_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}

fn default_server_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_replicas() -> u32 {
    DEFAULT_REPLICAS
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_jitter_ms() -> u64 {
    200
}

fn default_reclaim_after_secs() -> u64 {
    600 // ten minutes, longer than any start/stop round trip
}

fn default_max_concurrency() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Load from the first config file found, falling back to defaults.
    pub fn load() -> Result<Self, DispatchError> {
        let config_paths = [
            PathBuf::from("task-ring.yml"),
            dirs::config_dir()
                .map(|p| p.join("task-ring/config.yml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/task-ring/config.yml"),
        ];

        for path in &config_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                return Self::load_from_file(path);
            }
        }

        debug!("No config file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, DispatchError> {
        let content = fs::read_to_string(path).map_err(|e| {
            DispatchError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            DispatchError::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.cluster.server_id.trim().is_empty() {
            return Err(DispatchError::config("cluster.server_id must not be empty"));
        }
        if self.cluster.replicas == 0 {
            return Err(DispatchError::config("cluster.replicas must be at least 1"));
        }
        if self.dispatcher.poll_interval_ms == 0 {
            return Err(DispatchError::config("dispatcher.poll_interval_ms must be positive"));
        }
        if self.dispatcher.max_concurrency == 0 {
            return Err(DispatchError::config("dispatcher.max_concurrency must be at least 1"));
        }
        if matches!(self.dispatcher.retention_secs, Some(secs) if secs > MAX_RETENTION_SECS) {
            return Err(DispatchError::config(format!(
                "dispatcher.retention_secs must not exceed {}",
                MAX_RETENTION_SECS
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), DispatchError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| DispatchError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, yaml)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
