//! Persistent key-value storage behind an explicit backend trait.
//!
//! The backend is chosen by configuration at startup ([`StorageKind`] in the
//! config module), never by probing the runtime environment. Stores namespace
//! their keys with a fixed `prefix:` segment to avoid collisions on a shared
//! backend.

mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{StorageConfig, StorageKind};
use crate::error::Result;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Construct the configured backend. Called once at application startup;
/// everything downstream receives the `Arc` by injection.
pub fn backend_from_config(config: &StorageConfig) -> Arc<dyn StorageBackend> {
    match config.kind {
        StorageKind::File => Arc::new(FileBackend::new(&config.root_dir)),
        StorageKind::Memory => Arc::new(MemoryBackend::new()),
    }
}

/// Last-write-wins key-value storage.
///
/// Keys are `namespace:id` pairs; segments must be non-empty and must not
/// contain path separators.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save(&self, key: &str, value: Value) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Value>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list_keys(&self) -> Result<Vec<String>>;
}

pub(crate) fn validate_key(key: &str) -> Result<(&str, &str)> {
    let (namespace, id) = key.split_once(':').unwrap_or(("", ""));
    if namespace.is_empty() || id.is_empty() {
        return Err(crate::error::TypedError::validation(format!(
            "Storage key '{}' must be 'namespace:id'",
            key
        )));
    }
    for segment in [namespace, id] {
        if segment.contains(['/', '\\']) || segment == "." || segment == ".." {
            return Err(crate::error::TypedError::validation(format!(
                "Storage key segment '{}' contains path characters",
                segment
            )));
        }
    }
    Ok((namespace, id))
}
