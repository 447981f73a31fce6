use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::warn;

use super::{StorageBackend, validate_key};
use crate::error::Result;

/// Filesystem-backed storage: one JSON file per key, grouped by namespace
/// directory (`root/<namespace>/<id>.json`).
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, namespace: &str, id: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{}.json", id))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save(&self, key: &str, value: Value) -> Result<()> {
        let (namespace, id) = validate_key(key)?;
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir).await?;

        let file = self.entry_path(namespace, id);
        let temp = file.with_extension("json.tmp");

        // Write to a temp file, then rename over the target so a crash
        // mid-write never leaves a truncated record.
        let json = serde_json::to_string_pretty(&value)?;
        fs::write(&temp, &json).await?;
        fs::rename(&temp, &file).await.inspect_err(|_| {
            let _ = std::fs::remove_file(&temp);
        })?;

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let (namespace, id) = validate_key(key)?;
        let file = self.entry_path(namespace, id);
        if !file.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&file).await?;
        let value = serde_json::from_str(&content)?;
        Ok(Some(value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (namespace, id) = validate_key(key)?;
        let file = self.entry_path(namespace, id);
        match fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut namespaces = fs::read_dir(&self.root).await?;

        while let Some(ns_entry) = namespaces.next_entry().await? {
            if !ns_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(namespace) = ns_entry.file_name().to_str().map(String::from) else {
                warn!(path = ?ns_entry.path(), "Skipping non-UTF-8 namespace directory");
                continue;
            };

            let mut entries = fs::read_dir(ns_entry.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json")
                    && let Some(id) = path.file_stem().and_then(|s| s.to_str())
                {
                    keys.push(format!("{}:{}", namespace, id));
                }
            }
        }

        Ok(keys)
    }
}
