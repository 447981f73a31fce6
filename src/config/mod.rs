//! Configuration types and loading.

mod settings;

pub use settings::{
    HealthConfig, RegistryConfig, RetryConfig, SelectionPolicy, SessionConfig, StorageConfig,
    StorageKind, StudioConfig,
};
