use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::Result;
use serde::{Deserialize, Serialize};

/// A session's persisted history as stored for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredHistory {
    pub session_id: String,
    /// JSON list of `{role, content}` turn records.
    pub history: String,
    pub updated_at: DateTime<Utc>,
}

/// External store that mirrors per-session conversation history.
///
/// Histories are keyed by session and by provider, so two providers can keep
/// independent histories for the same session.
#[async_trait]
pub trait HistoryPersistence: Send + Sync {
    /// Overwrite the stored history for `session_id` under `provider_id`.
    async fn update_history(
        &self,
        session_id: &str,
        serialized_turns: &str,
        provider_id: &str,
    ) -> Result<()>;

    /// Every stored session history for `provider_id`.
    async fn load_histories(&self, provider_id: &str) -> Result<Vec<StoredHistory>>;
}
