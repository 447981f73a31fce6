use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::registry::InstanceRegistry;
use crate::config::HealthConfig;

/// Background health monitoring over the registry's running instances.
///
/// Probes run concurrently on a fixed interval and only refresh cached
/// health; they never block instance selection or each other.
pub struct HealthMonitor {
    registry: Arc<InstanceRegistry>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<InstanceRegistry>, config: &HealthConfig) -> Self {
        Self {
            registry,
            interval: config.check_interval(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the monitoring loop. The loop runs until [`stop`](Self::stop)
    /// is called (or the handle is aborted).
    pub fn spawn(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.interval;

        info!(interval_secs = interval.as_secs(), "Health monitor started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately so a fresh fleet is probed
            // without waiting a full interval.
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    debug!("Health monitor stopping");
                    break;
                }
                let checked = registry.check_running_instances().await;
                if checked > 0 {
                    debug!(checked, "Health sweep complete");
                }
            }
        })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
