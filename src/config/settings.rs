use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, TypedError};

/// Top-level configuration for the orchestration core.
///
/// Every section has defaults, so a missing or partial `config.toml` is
/// valid. `validate()` runs after load and before save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub health: HealthConfig,
    pub registry: RegistryConfig,
}

impl StudioConfig {
    pub async fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");
        let config: Self = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| TypedError::validation(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1");
        }
        if self.retry.initial_delay_ms == 0 {
            errors.push("retry.initial_delay_ms must be greater than 0");
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            errors.push("retry.max_delay_ms must be >= retry.initial_delay_ms");
        }
        if self.retry.backoff_multiplier <= 1.0 {
            errors.push("retry.backoff_multiplier must be greater than 1");
        }

        if self.health.probe_timeout_ms == 0 {
            errors.push("health.probe_timeout_ms must be greater than 0");
        }
        if self.health.check_interval_secs == 0 {
            errors.push("health.check_interval_secs must be greater than 0");
        }
        if self.health.max_consecutive_failures == 0 {
            errors.push("health.max_consecutive_failures must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TypedError::validation(format!(
                "Invalid configuration: {}",
                errors.join("; ")
            )))
        }
    }
}

/// Which storage backend to construct at startup. The choice is explicit
/// configuration, never runtime environment probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Root directory for the file backend; ignored by the memory backend.
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            root_dir: PathBuf::from(".studioflow"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hours a saved wizard session stays resumable. Zero expires
    /// immediately, which is useful for tests and kiosk deployments.
    pub expiration_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiration_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_timeout_ms: u64,
    pub check_interval_secs: u64,
    /// Consecutive probe failures before an instance is marked unhealthy
    /// rather than degraded.
    pub max_consecutive_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5000,
            check_interval_secs: 30,
            max_consecutive_failures: 3,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub selection_policy: SelectionPolicy,
}

/// Instance selection policy for load balancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    RoundRobin,
    LeastLoaded,
    Random,
}
