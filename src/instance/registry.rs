use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::health::{HealthChecker, update_health_from_check};
use super::types::{InstanceConfig, InstanceStatus, ServiceInstance};
use crate::config::{HealthConfig, RegistryConfig, SelectionPolicy};
use crate::error::{Result, TypedError};
use crate::storage::StorageBackend;

const CONFIG_KEY_PREFIX: &str = "instance-config";

/// Stride for pseudo-random instance selection. A prime stride is coprime to
/// most pool sizes, so the counter visits every instance before repeating
/// without needing an RNG.
const RANDOM_SELECTION_STRIDE: usize = 7;

/// Owns the set of configured backend instances.
///
/// The instance map is mutated only through this registry's methods;
/// selection reads cached health and never blocks on a probe.
pub struct InstanceRegistry {
    config: RegistryConfig,
    health_config: HealthConfig,
    instances: RwLock<HashMap<String, ServiceInstance>>,
    selection_counter: AtomicUsize,
    checker: HealthChecker,
    backend: Arc<dyn StorageBackend>,
}

impl InstanceRegistry {
    pub fn new(
        config: RegistryConfig,
        health_config: HealthConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        let checker = HealthChecker::new(&health_config);
        Self {
            config,
            health_config,
            instances: RwLock::new(HashMap::new()),
            selection_counter: AtomicUsize::new(0),
            checker,
            backend,
        }
    }

    /// Restore instance configs persisted by previous runs. Every restored
    /// instance begins stopped regardless of its state at shutdown.
    pub async fn load_persisted(&self) -> Result<usize> {
        let prefix = format!("{}:", CONFIG_KEY_PREFIX);
        let keys: Vec<String> = self
            .backend
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();

        let mut restored = 0;
        for key in keys {
            let Some(value) = self.backend.load(&key).await? else {
                continue;
            };
            let config: InstanceConfig = match serde_json::from_value(value) {
                Ok(c) => c,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable instance config");
                    continue;
                }
            };
            let id = key[prefix.len()..].to_string();

            if let Err(e) = self.validate_config(&config, None) {
                warn!(instance_id = %id, error = %e, "Skipping conflicting persisted instance");
                continue;
            }

            self.instances
                .write()
                .insert(id.clone(), ServiceInstance::new(id, config));
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "Restored persisted instances");
        }
        Ok(restored)
    }

    /// Register a new instance in stopped state, optionally auto-starting it.
    pub async fn create_instance(&self, config: InstanceConfig) -> Result<ServiceInstance> {
        self.validate_config(&config, None)?;

        let id = uuid::Uuid::new_v4().to_string();
        let auto_start = config.auto_start;
        let instance = ServiceInstance::new(id.clone(), config.clone());

        self.instances.write().insert(id.clone(), instance.clone());
        self.persist_config(&id, &config).await?;
        info!(instance_id = %id, name = %config.name, port = config.port, "Instance created");

        if auto_start {
            self.start_instance(&id).await?;
        }

        self.get_instance(&id)
            .ok_or_else(|| TypedError::unknown(format!("instance {} vanished after create", id)))
    }

    /// Re-validate and apply a merged config. A running instance is
    /// restarted when a restart-requiring field (host, port, GPU device,
    /// environment) changes; in-flight work on it is abandoned, not drained.
    pub async fn update_instance(
        &self,
        id: &str,
        config: InstanceConfig,
    ) -> Result<ServiceInstance> {
        self.validate_config(&config, Some(id))?;

        let needs_restart = {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| not_found_error(id))?;
            let needs_restart = instance.status == InstanceStatus::Running
                && config.requires_restart_from(&instance.config);
            instance.config = config.clone();
            needs_restart
        };

        self.persist_config(id, &config).await?;

        if needs_restart {
            info!(instance_id = %id, "Config change requires restart, restarting instance");
            self.restart_instance(id).await?;
        }

        self.get_instance(id).ok_or_else(|| not_found_error(id))
    }

    /// Stop (if needed) and deregister an instance, deleting its persisted
    /// config.
    pub async fn remove_instance(&self, id: &str) -> Result<()> {
        if self.get_instance(id).is_none() {
            return Err(not_found_error(id));
        }
        self.stop_instance(id).await?;
        self.instances.write().remove(id);
        self.backend
            .delete(&format!("{}:{}", CONFIG_KEY_PREFIX, id))
            .await?;
        info!(instance_id = %id, "Instance removed");
        Ok(())
    }

    /// Start an instance. The transition to running is gated by a successful
    /// health check; a failed start parks the instance in error state and
    /// the probe failure propagates to the caller.
    pub async fn start_instance(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| not_found_error(id))?;

            match instance.status {
                InstanceStatus::Running => return Ok(()),
                InstanceStatus::Stopped | InstanceStatus::Error => {}
                other => {
                    return Err(TypedError::validation(format!(
                        "cannot start instance {} while {}",
                        id, other
                    )));
                }
            }

            self.transition(instance, InstanceStatus::Starting);
            instance.clone()
        };

        let result = self.checker.check(&snapshot).await;
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| not_found_error(id))?;
        instance.health = update_health_from_check(
            &instance.health,
            &result,
            self.health_config.max_consecutive_failures,
        );

        if result.success {
            self.transition(instance, InstanceStatus::Running);
            instance.stats.started_at = Some(Utc::now());
            Ok(())
        } else {
            self.transition(instance, InstanceStatus::Error);
            let message = result
                .error
                .unwrap_or_else(|| "health check failed".to_string());
            Err(TypedError::connection(format!(
                "instance {} failed to start: {}",
                id, message
            ))
            .with_detail("instance_id", id)
            .with_detail("endpoint", snapshot.config.base_url()))
        }
    }

    /// Stop an instance. Stopping an already-stopped (or already-stopping)
    /// instance is a no-op success.
    pub async fn stop_instance(&self, id: &str) -> Result<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| not_found_error(id))?;

        match instance.status {
            InstanceStatus::Stopped | InstanceStatus::Stopping => Ok(()),
            InstanceStatus::Starting => Err(TypedError::validation(format!(
                "cannot stop instance {} while starting",
                id
            ))),
            InstanceStatus::Running | InstanceStatus::Paused | InstanceStatus::Error => {
                self.transition(instance, InstanceStatus::Stopping);
                self.transition(instance, InstanceStatus::Stopped);
                instance.stats.started_at = None;
                Ok(())
            }
        }
    }

    pub async fn restart_instance(&self, id: &str) -> Result<()> {
        self.stop_instance(id).await?;
        self.start_instance(id).await
    }

    pub fn pause_instance(&self, id: &str) -> Result<()> {
        self.expect_transition(id, InstanceStatus::Running, InstanceStatus::Paused)
    }

    pub fn resume_instance(&self, id: &str) -> Result<()> {
        self.expect_transition(id, InstanceStatus::Paused, InstanceStatus::Running)
    }

    pub fn get_instance(&self, id: &str) -> Option<ServiceInstance> {
        self.instances.read().get(id).cloned()
    }

    pub fn list_instances(&self) -> Vec<ServiceInstance> {
        let mut instances: Vec<_> = self.instances.read().values().cloned().collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        instances
    }

    pub fn running_instances(&self) -> Vec<ServiceInstance> {
        self.instances
            .read()
            .values()
            .filter(|i| i.status == InstanceStatus::Running)
            .cloned()
            .collect()
    }

    /// Select a running, healthy instance per the configured policy.
    ///
    /// Returns `None` when nothing qualifies; callers must treat that as
    /// "no capacity", not as an error. Selection reads cached health only.
    pub fn get_healthy_instance(&self) -> Option<ServiceInstance> {
        let instances = self.instances.read();
        let mut candidates: Vec<&ServiceInstance> =
            instances.values().filter(|i| i.is_selectable()).collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let selected = match self.config.selection_policy {
            SelectionPolicy::RoundRobin => {
                // The counter is never reset on topology changes; rotation
                // stays fair even if a specific pick shifts when the
                // candidate list shrinks or grows.
                let idx = self.selection_counter.fetch_add(1, Ordering::Relaxed);
                candidates[idx % candidates.len()]
            }
            SelectionPolicy::LeastLoaded => candidates
                .iter()
                .min_by_key(|i| i.active_workflows())
                .copied()?,
            SelectionPolicy::Random => {
                let idx = self
                    .selection_counter
                    .fetch_add(RANDOM_SELECTION_STRIDE, Ordering::Relaxed);
                candidates[idx % candidates.len()]
            }
        };

        debug!(
            instance_id = %selected.id,
            policy = ?self.config.selection_policy,
            candidates = candidates.len(),
            "Instance selected"
        );
        Some(selected.clone())
    }

    /// Record a routed workflow's outcome against an instance.
    pub fn record_workflow_result(&self, id: &str, success: bool, duration: Duration) {
        let mut instances = self.instances.write();
        if let Some(instance) = instances.get_mut(id) {
            instance.stats.record(success, duration);
            instance.last_used_at = Some(Utc::now());
        }
    }

    /// Fold a probe outcome into an instance's cached health.
    pub fn apply_health_check(&self, result: &super::health::HealthCheckResult) {
        let mut instances = self.instances.write();
        let Some(instance) = instances.get_mut(&result.instance_id) else {
            return;
        };
        let previous = instance.health.status;
        instance.health = update_health_from_check(
            &instance.health,
            result,
            self.health_config.max_consecutive_failures,
        );
        if instance.health.status != previous {
            info!(
                instance_id = %instance.id,
                from = %previous,
                to = %instance.health.status,
                consecutive_failures = instance.health.consecutive_failures,
                "Instance health changed"
            );
        }
    }

    /// Probe every running instance concurrently and fold the results in.
    /// Called by the background monitor on its interval.
    pub async fn check_running_instances(&self) -> usize {
        let running = self.running_instances();
        if running.is_empty() {
            return 0;
        }

        let checks = running.iter().map(|instance| self.checker.check(instance));
        for result in join_all(checks).await {
            self.apply_health_check(&result);
        }
        running.len()
    }

    fn validate_config(&self, config: &InstanceConfig, exclude_id: Option<&str>) -> Result<()> {
        if config.name.trim().is_empty() {
            return Err(TypedError::validation("instance name must not be empty"));
        }
        if config.port == 0 {
            return Err(TypedError::validation(format!(
                "port {} is out of range (1-65535)",
                config.port
            )));
        }

        let instances = self.instances.read();
        if let Some(conflict) = instances
            .values()
            .find(|i| i.config.port == config.port && Some(i.id.as_str()) != exclude_id)
        {
            return Err(TypedError::validation(format!(
                "port {} is already used by instance '{}'",
                config.port, conflict.config.name
            ))
            .with_detail("conflicting_instance_id", conflict.id.clone())
            .with_detail("port", config.port));
        }
        Ok(())
    }

    async fn persist_config(&self, id: &str, config: &InstanceConfig) -> Result<()> {
        let value = serde_json::to_value(config)?;
        self.backend
            .save(&format!("{}:{}", CONFIG_KEY_PREFIX, id), value)
            .await
    }

    fn expect_transition(
        &self,
        id: &str,
        expected: InstanceStatus,
        target: InstanceStatus,
    ) -> Result<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| not_found_error(id))?;

        if instance.status != expected {
            return Err(TypedError::validation(format!(
                "instance {} is {}, expected {}",
                id, instance.status, expected
            ))
            .with_detail("status", instance.status.to_string()));
        }
        self.transition(instance, target);
        Ok(())
    }

    fn transition(&self, instance: &mut ServiceInstance, target: InstanceStatus) {
        debug_assert!(
            instance.status.can_transition_to(target),
            "illegal transition {} -> {}",
            instance.status,
            target
        );
        debug!(
            instance_id = %instance.id,
            from = %instance.status,
            to = %target,
            "Instance state changed"
        );
        instance.status = target;
    }
}

fn not_found_error(id: &str) -> TypedError {
    TypedError::validation(format!("instance {} not found", id))
        .with_detail("instance_id", id)
}
