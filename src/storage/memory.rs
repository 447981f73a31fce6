use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{StorageBackend, validate_key};
use crate::error::Result;

/// In-memory storage for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
