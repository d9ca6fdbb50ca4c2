use std::path::Path;

use async_trait::async_trait;
use parley_common::{Error, Result};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::persistence::{HistoryPersistence, StoredHistory};

/// SQLite storage for serialized LLM conversation history.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening history store at {}", db_path.display());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS llm_history (
            provider_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            history TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (provider_id, session_id)
        );",
    )
    .map_err(|e| Error::Database(format!("migration failed: {e}")))
}

#[async_trait]
impl HistoryPersistence for SqliteHistoryStore {
    async fn update_history(
        &self,
        session_id: &str,
        serialized_turns: &str,
        provider_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO llm_history (provider_id, session_id, history, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider_id, session_id) DO UPDATE SET
               history = excluded.history,
               updated_at = excluded.updated_at",
            params![
                provider_id,
                session_id,
                serialized_turns,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::Database(format!("failed to update history: {e}")))?;
        debug!(session_id, provider_id, "history persisted");
        Ok(())
    }

    async fn load_histories(&self, provider_id: &str) -> Result<Vec<StoredHistory>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, history, updated_at
                 FROM llm_history
                 WHERE provider_id = ?1
                 ORDER BY updated_at ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map(params![provider_id], |row| {
                let updated_raw: String = row.get(2)?;
                Ok(StoredHistory {
                    session_id: row.get(0)?,
                    history: row.get(1)?,
                    updated_at: parse_timestamp(&updated_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to load histories: {e}")))?;

        let mut histories = Vec::new();
        for row in rows {
            histories.push(
                row.map_err(|e| Error::Database(format!("failed to read history row: {e}")))?,
            );
        }
        Ok(histories)
    }
}

fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            warn!(
                "failed to parse timestamp '{}': {e}, falling back to now",
                value
            );
            chrono::Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::SqliteHistoryStore;
    use crate::persistence::HistoryPersistence;

    #[tokio::test]
    async fn update_then_load_round_trip() {
        let store = SqliteHistoryStore::in_memory().expect("in-memory store should open");
        let history = r#"[{"role":"user","content":"hello"},{"role":"assistant","content":"hi"}]"#;

        store
            .update_history("session-1", history, "openai")
            .await
            .expect("update should succeed");

        let loaded = store
            .load_histories("openai")
            .await
            .expect("load should succeed");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].session_id, "session-1");
        assert_eq!(loaded[0].history, history);
    }

    #[tokio::test]
    async fn update_overwrites_previous_history() {
        let store = SqliteHistoryStore::in_memory().expect("in-memory store should open");
        store.update_history("s", "[1]", "openai").await.unwrap();
        store.update_history("s", "[]", "openai").await.unwrap();

        let all = store.load_histories("openai").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].session_id, "s");
        assert_eq!(all[0].history, "[]");
    }

    #[tokio::test]
    async fn histories_are_scoped_per_provider() {
        let store = SqliteHistoryStore::in_memory().expect("in-memory store should open");
        store.update_history("s", "[\"a\"]", "openai").await.unwrap();
        store.update_history("s", "[\"b\"]", "azure").await.unwrap();

        let openai = store.load_histories("openai").await.unwrap();
        let azure = store.load_histories("azure").await.unwrap();
        assert_eq!(openai[0].history, "[\"a\"]");
        assert_eq!(azure[0].history, "[\"b\"]");
        assert!(store.load_histories("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let store = SqliteHistoryStore::open(&path).expect("file store should open");
        store.update_history("s", "[]", "openai").await.unwrap();
        assert!(path.exists());
    }
}
