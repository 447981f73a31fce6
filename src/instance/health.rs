use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{HealthState, InstanceHealth, ServiceInstance, SystemStats};
use crate::config::HealthConfig;

/// Outcome of a single liveness probe.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub instance_id: String,
    pub success: bool,
    pub response_time: Duration,
    pub error: Option<String>,
    pub system_stats: Option<SystemStats>,
}

/// Issues bounded-timeout liveness probes against instance stats endpoints.
pub struct HealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(config: &HealthConfig) -> Self {
        let timeout = config.probe_timeout();
        // Building the default client cannot fail with these options; fall
        // back to the global default client configuration if it ever does.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    /// Probe the instance's stats endpoint.
    ///
    /// A 2xx response is success; capacity metadata is parsed from the body
    /// when present, and a malformed body merely omits `system_stats`
    /// rather than failing the check.
    pub async fn check(&self, instance: &ServiceInstance) -> HealthCheckResult {
        let url = format!("{}/system_stats", instance.config.base_url());
        let started = Instant::now();

        let response = self.client.get(&url).send().await;
        let response_time = started.elapsed().min(self.timeout);

        match response {
            Ok(response) if response.status().is_success() => {
                let system_stats = match response.json::<Value>().await {
                    Ok(body) => parse_system_stats(&body),
                    Err(e) => {
                        debug!(
                            instance_id = %instance.id,
                            error = %e,
                            "Stats body unreadable, probe still counts as success"
                        );
                        None
                    }
                };
                HealthCheckResult {
                    instance_id: instance.id.clone(),
                    success: true,
                    response_time,
                    error: None,
                    system_stats,
                }
            }
            Ok(response) => HealthCheckResult {
                instance_id: instance.id.clone(),
                success: false,
                response_time,
                error: Some(format!("unexpected status {}", response.status())),
                system_stats: None,
            },
            Err(e) => {
                warn!(
                    instance_id = %instance.id,
                    url = %url,
                    error = %e,
                    "Health probe failed"
                );
                HealthCheckResult {
                    instance_id: instance.id.clone(),
                    success: false,
                    response_time,
                    error: Some(e.to_string()),
                    system_stats: None,
                }
            }
        }
    }
}

/// Lenient extraction of capacity metadata from a stats response body.
fn parse_system_stats(body: &Value) -> Option<SystemStats> {
    serde_json::from_value(body.clone()).ok()
}

/// Pure reducer folding one probe outcome into the cached health.
///
/// Success resets the failure streak; failures escalate degraded to
/// unhealthy only once `max_consecutive_failures` is reached, so one
/// transient blip never disqualifies an instance outright.
pub fn update_health_from_check(
    previous: &InstanceHealth,
    result: &HealthCheckResult,
    max_consecutive_failures: u32,
) -> InstanceHealth {
    if result.success {
        InstanceHealth {
            status: HealthState::Healthy,
            last_checked: Some(Utc::now()),
            response_time_ms: Some(result.response_time.as_millis() as u64),
            error_count: previous.error_count,
            consecutive_failures: 0,
            last_error: None,
            system_stats: result
                .system_stats
                .clone()
                .or_else(|| previous.system_stats.clone()),
        }
    } else {
        let consecutive_failures = previous.consecutive_failures + 1;
        let status = if consecutive_failures >= max_consecutive_failures {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };
        InstanceHealth {
            status,
            last_checked: Some(Utc::now()),
            response_time_ms: Some(result.response_time.as_millis() as u64),
            error_count: previous.error_count + 1,
            consecutive_failures,
            last_error: result.error.clone(),
            system_stats: previous.system_stats.clone(),
        }
    }
}
