use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::form::{FormData, sanitize_form_data};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::storage::StorageBackend;

const KEY_PREFIX: &str = "wizard-session";

/// Snapshot of a partially-completed wizard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardSession {
    pub wizard_id: String,
    pub wizard_type: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub form_data: FormData,
    pub saved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WizardSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Keyed, expiring store of wizard sessions over a pluggable backend.
///
/// A save is always a full overwrite; stale partial state never merges into
/// a fresh snapshot.
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    expiration: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &SessionConfig) -> Self {
        Self {
            backend,
            expiration: Duration::hours(config.expiration_hours),
        }
    }

    fn key(wizard_id: &str) -> String {
        format!("{}:{}", KEY_PREFIX, wizard_id)
    }

    pub async fn save_session(
        &self,
        wizard_id: &str,
        wizard_type: &str,
        current_step: u32,
        total_steps: u32,
        form_data: FormData,
    ) -> Result<WizardSession> {
        let now = Utc::now();
        let session = WizardSession {
            wizard_id: wizard_id.to_string(),
            wizard_type: wizard_type.to_string(),
            current_step,
            total_steps,
            form_data: sanitize_form_data(form_data),
            saved_at: now,
            expires_at: now + self.expiration,
        };

        let value = serde_json::to_value(&session)?;
        self.backend.save(&Self::key(wizard_id), value).await?;

        debug!(
            wizard_id = %wizard_id,
            wizard_type = %wizard_type,
            step = current_step,
            "Session saved"
        );
        Ok(session)
    }

    /// Load a session, treating an expired record as absent and evicting it.
    pub async fn load_session(&self, wizard_id: &str) -> Result<Option<WizardSession>> {
        let key = Self::key(wizard_id);
        let Some(value) = self.backend.load(&key).await? else {
            return Ok(None);
        };

        let session: WizardSession = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(wizard_id = %wizard_id, error = %e, "Discarding unreadable session");
                self.backend.delete(&key).await?;
                return Ok(None);
            }
        };

        if session.is_expired_at(Utc::now()) {
            debug!(wizard_id = %wizard_id, "Session expired, evicting");
            self.backend.delete(&key).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub async fn has_valid_session(&self, wizard_id: &str) -> Result<bool> {
        Ok(self.load_session(wizard_id).await?.is_some())
    }

    pub async fn delete_session(&self, wizard_id: &str) -> Result<()> {
        self.backend.delete(&Self::key(wizard_id)).await
    }

    /// Evict every expired or unreadable session; returns how many records
    /// were removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for key in self.session_keys().await? {
            let Some(value) = self.backend.load(&key).await? else {
                continue;
            };
            let expired = match serde_json::from_value::<WizardSession>(value) {
                Ok(session) => session.is_expired_at(now),
                Err(e) => {
                    warn!(key = %key, error = %e, "Removing unreadable session");
                    true
                }
            };
            if expired {
                self.backend.delete(&key).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Expired sessions cleaned up");
        }
        Ok(removed)
    }

    /// All non-expired sessions of a wizard type, for recovery-picker UIs.
    pub async fn sessions_by_type(&self, wizard_type: &str) -> Result<Vec<WizardSession>> {
        let now = Utc::now();
        let mut sessions = Vec::new();

        for key in self.session_keys().await? {
            let Some(value) = self.backend.load(&key).await? else {
                continue;
            };
            if let Ok(session) = serde_json::from_value::<WizardSession>(value)
                && session.wizard_type == wizard_type
                && !session.is_expired_at(now)
            {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(sessions)
    }

    async fn session_keys(&self) -> Result<Vec<String>> {
        let prefix = format!("{}:", KEY_PREFIX);
        Ok(self
            .backend
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect())
    }
}
