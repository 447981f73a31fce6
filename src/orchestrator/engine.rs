use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, TypedError};
use crate::instance::{InstanceRegistry, ServiceInstance};
use crate::retry::RetryExecutor;
use crate::session::{FormData, SessionStore, WizardSession};

/// Backend submission seam. Implementations translate the opaque payload
/// into the remote server's protocol; the orchestrator never looks inside.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn submit(
        &self,
        instance: &ServiceInstance,
        request: GenerationRequest,
    ) -> Result<GenerationResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub wizard_id: String,
    pub step: u32,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub payload: Value,
}

/// One wizard step ready to execute: the form state to snapshot and the
/// request payload to submit.
#[derive(Debug, Clone)]
pub struct WizardStep {
    pub wizard_id: String,
    pub wizard_type: String,
    pub step: u32,
    pub total_steps: u32,
    pub form_data: FormData,
    pub payload: Value,
}

#[derive(Debug)]
pub struct StepOutcome {
    pub response: GenerationResponse,
    pub instance_id: String,
    pub attempt_count: u32,
    /// Session as re-saved after the step advanced.
    pub session: WizardSession,
}

/// Drives multi-step generation wizards.
///
/// Every collaborator is injected explicitly; the application constructs
/// one orchestrator at startup and threads it through.
pub struct WizardOrchestrator {
    registry: Arc<InstanceRegistry>,
    retry: Arc<RetryExecutor>,
    sessions: Arc<SessionStore>,
    client: Arc<dyn GenerationClient>,
}

impl WizardOrchestrator {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        retry: Arc<RetryExecutor>,
        sessions: Arc<SessionStore>,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            registry,
            retry,
            sessions,
            client,
        }
    }

    /// Execute one wizard step.
    ///
    /// The form state is snapshotted before the remote call, so a failure
    /// at any point leaves a resumable session behind. The remote call runs
    /// under the retry executor with an operation id stable per
    /// wizard-and-step, which lets a UI retry correlate with the failed
    /// attempt's parameters.
    pub async fn run_step(&self, step: WizardStep) -> Result<StepOutcome> {
        self.sessions
            .save_session(
                &step.wizard_id,
                &step.wizard_type,
                step.step,
                step.total_steps,
                step.form_data.clone(),
            )
            .await?;

        let operation_id = format!("{}:step-{}", step.wizard_id, step.step);
        let request = GenerationRequest {
            wizard_id: step.wizard_id.clone(),
            step: step.step,
            payload: step.payload.clone(),
        };

        let registry = self.registry.clone();
        let client = self.client.clone();
        let outcome = self
            .retry
            .execute(&operation_id, move |request: GenerationRequest| {
                let registry = registry.clone();
                let client = client.clone();
                async move { dispatch(&registry, client.as_ref(), request).await }
            }, request)
            .await;

        let (response, instance_id) = outcome.result?;

        info!(
            wizard_id = %step.wizard_id,
            step = step.step,
            instance_id = %instance_id,
            attempts = outcome.attempt_count,
            "Wizard step completed"
        );

        // Advance the snapshot so a resume picks up after this step.
        let session = self
            .sessions
            .save_session(
                &step.wizard_id,
                &step.wizard_type,
                step.step + 1,
                step.total_steps,
                step.form_data,
            )
            .await?;

        Ok(StepOutcome {
            response,
            instance_id,
            attempt_count: outcome.attempt_count,
            session,
        })
    }

    /// The saved session for a wizard, if still resumable.
    pub async fn resume(&self, wizard_id: &str) -> Result<Option<WizardSession>> {
        self.sessions.load_session(wizard_id).await
    }

    /// Finish a wizard: its session is no longer needed.
    pub async fn complete(&self, wizard_id: &str) -> Result<()> {
        debug!(wizard_id = %wizard_id, "Wizard completed, deleting session");
        self.sessions.delete_session(wizard_id).await
    }
}

/// One attempt: acquire capacity, submit, record the outcome.
async fn dispatch(
    registry: &InstanceRegistry,
    client: &dyn GenerationClient,
    request: GenerationRequest,
) -> Result<(GenerationResponse, String)> {
    // No healthy instance is "no capacity right now": retryable, so the
    // executor's backoff doubles as a capacity wait.
    let instance = registry.get_healthy_instance().ok_or_else(|| {
        TypedError::connection("no healthy instance available")
            .with_detail("wizard_id", request.wizard_id.clone())
    })?;

    let timeout = Duration::from_millis(instance.config.timeout_ms);
    let started = Instant::now();

    let result = match tokio::time::timeout(timeout, client.submit(&instance, request)).await {
        Ok(result) => result,
        Err(_) => Err(TypedError::timeout(format!(
            "generation call exceeded {}ms",
            timeout.as_millis()
        ))
        .with_detail("instance_id", instance.id.clone())),
    };

    registry.record_workflow_result(&instance.id, result.is_ok(), started.elapsed());

    result.map(|response| (response, instance.id))
}
