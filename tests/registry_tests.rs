use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use studioflow::config::{HealthConfig, RegistryConfig, SelectionPolicy};
use studioflow::error::ErrorCategory;
use studioflow::instance::{
    HealthCheckResult, HealthState, InstanceConfig, InstanceRegistry, InstanceStatus,
};
use studioflow::storage::MemoryBackend;

fn registry(policy: SelectionPolicy) -> InstanceRegistry {
    InstanceRegistry::new(
        RegistryConfig {
            selection_policy: policy,
        },
        HealthConfig::default(),
        Arc::new(MemoryBackend::new()),
    )
}

async fn stats_server(active_workflows: u32) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpu_percent": 20.0,
            "active_workflows": active_workflows,
        })))
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer, name: &str) -> InstanceConfig {
    InstanceConfig {
        name: name.to_string(),
        host: server.address().ip().to_string(),
        port: server.address().port(),
        ..InstanceConfig::default()
    }
}

fn probe_failure(instance_id: &str) -> HealthCheckResult {
    HealthCheckResult {
        instance_id: instance_id.to_string(),
        success: false,
        response_time: Duration::from_millis(30),
        error: Some("connection refused".into()),
        system_stats: None,
    }
}

fn probe_success(instance_id: &str) -> HealthCheckResult {
    HealthCheckResult {
        instance_id: instance_id.to_string(),
        success: true,
        response_time: Duration::from_millis(8),
        error: None,
        system_stats: None,
    }
}

#[tokio::test]
async fn start_is_gated_by_health_check() {
    let server = stats_server(0).await;
    let registry = registry(SelectionPolicy::RoundRobin);

    let instance = registry
        .create_instance(config_for(&server, "gpu-0"))
        .await
        .unwrap();
    registry.start_instance(&instance.id).await.unwrap();

    let started = registry.get_instance(&instance.id).unwrap();
    assert_eq!(started.status, InstanceStatus::Running);
    assert_eq!(started.health.status, HealthState::Healthy);
    assert!(started.stats.started_at.is_some());
}

#[tokio::test]
async fn failed_start_propagates_and_parks_in_error() {
    let mut health = HealthConfig::default();
    health.probe_timeout_ms = 250;
    let registry = InstanceRegistry::new(
        RegistryConfig::default(),
        health,
        Arc::new(MemoryBackend::new()),
    );

    // Nothing listens on this port.
    let instance = registry
        .create_instance(InstanceConfig {
            name: "ghost".into(),
            host: "127.0.0.1".into(),
            port: 1,
            ..InstanceConfig::default()
        })
        .await
        .unwrap();

    let err = registry.start_instance(&instance.id).await.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Connection);
    assert_eq!(
        registry.get_instance(&instance.id).unwrap().status,
        InstanceStatus::Error
    );

    // An errored instance can be started again once the backend is back.
    assert!(registry.start_instance(&instance.id).await.is_err());
}

#[tokio::test]
async fn auto_start_runs_health_gate_on_create() {
    let server = stats_server(0).await;
    let registry = registry(SelectionPolicy::RoundRobin);

    let mut config = config_for(&server, "gpu-0");
    config.auto_start = true;
    let instance = registry.create_instance(config).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Running);
    assert!(registry.get_healthy_instance().is_some());
}

#[tokio::test]
async fn duplicate_port_names_conflicting_instance() {
    let registry = registry(SelectionPolicy::RoundRobin);
    registry
        .create_instance(InstanceConfig {
            name: "first".into(),
            port: 9301,
            ..InstanceConfig::default()
        })
        .await
        .unwrap();

    let err = registry
        .create_instance(InstanceConfig {
            name: "second".into(),
            port: 9301,
            ..InstanceConfig::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Validation);
    assert!(err.message.contains("9301"));
    assert!(err.message.contains("first"));
    assert!(err.detail("conflicting_instance_id").is_some());
    assert_eq!(registry.list_instances().len(), 1);
}

#[tokio::test]
async fn consecutive_failures_degrade_then_unhealthy_then_recover() {
    let server = stats_server(0).await;
    let registry = registry(SelectionPolicy::RoundRobin);
    let instance = registry
        .create_instance(config_for(&server, "gpu-0"))
        .await
        .unwrap();
    registry.start_instance(&instance.id).await.unwrap();

    registry.apply_health_check(&probe_failure(&instance.id));
    assert_eq!(
        registry.get_instance(&instance.id).unwrap().health.status,
        HealthState::Degraded
    );
    // Degraded instances are not routable.
    assert!(registry.get_healthy_instance().is_none());

    registry.apply_health_check(&probe_failure(&instance.id));
    registry.apply_health_check(&probe_failure(&instance.id));
    let health = registry.get_instance(&instance.id).unwrap().health;
    assert_eq!(health.status, HealthState::Unhealthy);
    assert_eq!(health.consecutive_failures, 3);

    // One good probe fully recovers.
    registry.apply_health_check(&probe_success(&instance.id));
    let health = registry.get_instance(&instance.id).unwrap().health;
    assert_eq!(health.status, HealthState::Healthy);
    assert_eq!(health.consecutive_failures, 0);
    assert!(registry.get_healthy_instance().is_some());
}

#[tokio::test]
async fn round_robin_covers_all_instances() {
    let registry = registry(SelectionPolicy::RoundRobin);
    let mut ids = Vec::new();
    for i in 0..3u32 {
        let server = stats_server(0).await;
        let instance = registry
            .create_instance(config_for(&server, &format!("gpu-{}", i)))
            .await
            .unwrap();
        registry.start_instance(&instance.id).await.unwrap();
        ids.push((server, instance.id));
    }

    let mut seen: Vec<String> = Vec::new();
    for _ in 0..3 {
        seen.push(registry.get_healthy_instance().unwrap().id);
    }
    seen.sort();
    let mut expected: Vec<String> = ids.iter().map(|(_, id)| id.clone()).collect();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn least_loaded_picks_lowest_active_workflows() {
    let registry = registry(SelectionPolicy::LeastLoaded);
    let mut handles = Vec::new();
    for (i, load) in [5u32, 0, 3].iter().enumerate() {
        let server = stats_server(*load).await;
        let instance = registry
            .create_instance(config_for(&server, &format!("gpu-{}", i)))
            .await
            .unwrap();
        registry.start_instance(&instance.id).await.unwrap();
        handles.push((server, instance.id, *load));
    }

    let picked = registry.get_healthy_instance().unwrap();
    let expected = &handles.iter().find(|(_, _, load)| *load == 0).unwrap().1;
    assert_eq!(&picked.id, expected);
}

#[tokio::test]
async fn update_restarts_running_instance_on_critical_change() {
    let server = stats_server(0).await;
    let replacement = stats_server(0).await;
    let registry = registry(SelectionPolicy::RoundRobin);

    let instance = registry
        .create_instance(config_for(&server, "gpu-0"))
        .await
        .unwrap();
    registry.start_instance(&instance.id).await.unwrap();
    let started_at = registry
        .get_instance(&instance.id)
        .unwrap()
        .stats
        .started_at;

    // Moving the endpoint restarts the instance against the new address.
    let updated = registry
        .update_instance(&instance.id, config_for(&replacement, "gpu-0"))
        .await
        .unwrap();
    assert_eq!(updated.status, InstanceStatus::Running);
    assert_eq!(updated.config.port, replacement.address().port());
    assert_ne!(updated.stats.started_at, started_at);

    // A cosmetic rename does not interrupt service.
    let renamed = registry
        .update_instance(&instance.id, config_for(&replacement, "gpu-renamed"))
        .await
        .unwrap();
    assert_eq!(renamed.status, InstanceStatus::Running);
    assert_eq!(renamed.config.name, "gpu-renamed");
}

#[tokio::test]
async fn background_sweep_updates_cached_health() {
    let server = stats_server(2).await;
    let registry = registry(SelectionPolicy::RoundRobin);
    let instance = registry
        .create_instance(config_for(&server, "gpu-0"))
        .await
        .unwrap();
    registry.start_instance(&instance.id).await.unwrap();

    assert_eq!(registry.check_running_instances().await, 1);
    let health = registry.get_instance(&instance.id).unwrap().health;
    assert_eq!(health.status, HealthState::Healthy);
    assert_eq!(health.system_stats.unwrap().active_workflows, 2);
}

#[tokio::test]
async fn remove_instance_deletes_persisted_config() {
    let backend = Arc::new(MemoryBackend::new());
    let registry = InstanceRegistry::new(
        RegistryConfig::default(),
        HealthConfig::default(),
        backend.clone(),
    );

    let instance = registry
        .create_instance(InstanceConfig {
            name: "gpu-0".into(),
            ..InstanceConfig::default()
        })
        .await
        .unwrap();
    assert_eq!(backend.len(), 1);

    registry.remove_instance(&instance.id).await.unwrap();
    assert!(registry.get_instance(&instance.id).is_none());
    assert!(backend.is_empty());
}
