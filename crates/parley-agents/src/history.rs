use async_trait::async_trait;
use dashmap::DashMap;
use parley_common::{Result, Turn};

/// Session-scoped turn history owned by a provider.
///
/// Implementations do not serialize concurrent turns on the same session;
/// callers that need that must lock per session themselves.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Whether the session has ever been created (an empty history still counts).
    async fn contains(&self, session_id: &str) -> Result<bool>;

    /// Turns of the session in order; empty if the session is unknown.
    async fn get(&self, session_id: &str) -> Result<Vec<Turn>>;

    async fn append_pair(&self, session_id: &str, user: Turn, assistant: Turn) -> Result<()>;

    async fn replace(&self, session_id: &str, turns: Vec<Turn>) -> Result<()>;

    /// Drop the two oldest turns. Returns how many were removed; sessions
    /// with fewer than two turns are left untouched.
    async fn pop_oldest_pair(&self, session_id: &str) -> Result<usize>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// Process-local history keyed by session id.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: DashMap<String, Vec<Turn>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn contains(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.contains_key(session_id))
    }

    async fn get(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|turns| turns.clone())
            .unwrap_or_default())
    }

    async fn append_pair(&self, session_id: &str, user: Turn, assistant: Turn) -> Result<()> {
        let mut turns = self.sessions.entry(session_id.to_string()).or_default();
        turns.push(user);
        turns.push(assistant);
        Ok(())
    }

    async fn replace(&self, session_id: &str, turns: Vec<Turn>) -> Result<()> {
        self.sessions.insert(session_id.to_string(), turns);
        Ok(())
    }

    async fn pop_oldest_pair(&self, session_id: &str) -> Result<usize> {
        let Some(mut turns) = self.sessions.get_mut(session_id) else {
            return Ok(0);
        };
        if turns.len() < 2 {
            return Ok(0);
        }
        turns.drain(..2);
        Ok(2)
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.sessions.insert(session_id.to_string(), Vec::new());
        Ok(())
    }
}
