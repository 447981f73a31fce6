//! Backend instance registry, health monitoring, and load balancing.
//!
//! # Purpose
//!
//! Tracks every configured generation server instance, its lifecycle state,
//! cached health, and workflow statistics, and selects a healthy instance
//! for new work via a configurable policy.
//!
//! # Health model
//!
//! - **Healthy**: last probe succeeded
//! - **Degraded**: recent failures below the hysteresis threshold
//! - **Unhealthy**: consecutive failures reached the threshold
//!
//! A single transient blip never disqualifies an instance outright; a
//! sustained outage does so within `max_consecutive_failures` probes.
//! Selection always reads the most recently cached health rather than
//! forcing a fresh probe, so callers observe bounded staleness, never
//! probe latency.

mod health;
mod monitor;
mod registry;
mod types;

pub use crate::config::SelectionPolicy;
pub use health::{HealthCheckResult, HealthChecker, update_health_from_check};
pub use monitor::HealthMonitor;
pub use registry::InstanceRegistry;
pub use types::{
    HealthState, InstanceConfig, InstanceHealth, InstanceStats, InstanceStatus, ServiceInstance,
    SystemStats,
};
