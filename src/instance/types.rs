use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a configured backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl InstanceStatus {
    pub fn allowed_transitions(&self) -> &'static [InstanceStatus] {
        use InstanceStatus::*;
        match self {
            Stopped => &[Starting],
            Starting => &[Running, Error],
            Running => &[Paused, Stopping, Error],
            Paused => &[Running, Stopping],
            Stopping => &[Stopped],
            Error => &[Starting, Stopping],
        }
    }

    pub fn can_transition_to(&self, target: InstanceStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Whether the instance is eligible for routed work.
    pub fn accepts_work(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }

    pub fn is_transitional(&self) -> bool {
        matches!(self, InstanceStatus::Starting | InstanceStatus::Stopping)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Three-level health classification derived from recent probe outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        };
        write!(f, "{}", s)
    }
}

/// Capacity metadata optionally reported by an instance's stats endpoint.
/// Every field is lenient: anything the backend omits stays at its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStats {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub gpu_percent: Option<f64>,
    pub active_workflows: u32,
    pub queue_depth: u32,
}

/// Cached health for one instance, updated by the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub status: HealthState,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub system_stats: Option<SystemStats>,
}

impl Default for InstanceHealth {
    fn default() -> Self {
        // A never-probed instance reports unhealthy until its first
        // successful check; starting an instance is gated on that check.
        Self {
            status: HealthState::Unhealthy,
            last_checked: None,
            response_time_ms: None,
            error_count: 0,
            consecutive_failures: 0,
            last_error: None,
            system_stats: None,
        }
    }
}

/// Cumulative workflow statistics for one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceStats {
    pub total_workflows: u64,
    pub successful_workflows: u64,
    pub failed_workflows: u64,
    pub average_response_time_ms: f64,
    /// Set on entering `Running`; cleared on stop.
    pub started_at: Option<DateTime<Utc>>,
}

impl InstanceStats {
    pub fn record(&mut self, success: bool, duration: Duration) {
        let completed = self.total_workflows as f64;
        let ms = duration.as_millis() as f64;
        self.average_response_time_ms =
            (self.average_response_time_ms * completed + ms) / (completed + 1.0);
        self.total_workflows += 1;
        if success {
            self.successful_workflows += 1;
        } else {
            self.failed_workflows += 1;
        }
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|t| now - t)
    }
}

/// Static configuration of one backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub max_concurrent_workflows: u32,
    pub auto_start: bool,
    pub gpu_device: Option<String>,
    pub env: HashMap<String, String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8188,
            timeout_ms: 120_000,
            max_concurrent_workflows: 1,
            auto_start: false,
            gpu_device: None,
            env: HashMap::new(),
        }
    }
}

impl InstanceConfig {
    /// Fields whose change on a running instance forces a restart.
    pub fn requires_restart_from(&self, other: &InstanceConfig) -> bool {
        self.host != other.host
            || self.port != other.port
            || self.gpu_device != other.gpu_device
            || self.env != other.env
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// One configured, independently addressable backend server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub config: InstanceConfig,
    pub status: InstanceStatus,
    pub health: InstanceHealth,
    pub stats: InstanceStats,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, config: InstanceConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: InstanceStatus::Stopped,
            health: InstanceHealth::default(),
            stats: InstanceStats::default(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// Running and healthy: the only combination the load balancer routes to.
    pub fn is_selectable(&self) -> bool {
        self.status.accepts_work() && self.health.status == HealthState::Healthy
    }

    pub fn active_workflows(&self) -> u32 {
        // Missing stats read as idle, which deliberately favors
        // under-observed instances in least-loaded selection.
        self.health
            .system_stats
            .as_ref()
            .map_or(0, |s| s.active_workflows)
    }
}
