pub mod config;
pub mod error;
pub mod instance;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod storage;

pub use config::{
    HealthConfig, RegistryConfig, RetryConfig, SessionConfig, StorageKind, StudioConfig,
};
pub use error::{ErrorCategory, Result, TypedError};
pub use instance::{
    HealthCheckResult, HealthChecker, HealthMonitor, HealthState, InstanceConfig, InstanceHealth,
    InstanceRegistry, InstanceStats, InstanceStatus, SelectionPolicy, ServiceInstance, SystemStats,
    update_health_from_check,
};
pub use orchestrator::{
    GenerationClient, GenerationRequest, GenerationResponse, StepOutcome, WizardOrchestrator,
    WizardStep,
};
pub use retry::{RetryExecutor, RetryOutcome, RetryState};
pub use session::{BinaryBlob, FileDescriptor, FormData, FormValue, SessionStore, WizardSession};
pub use storage::{FileBackend, MemoryBackend, StorageBackend, backend_from_config};
