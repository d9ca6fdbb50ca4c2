pub mod history_store;
pub mod persistence;

pub use history_store::SqliteHistoryStore;
pub use persistence::{HistoryPersistence, StoredHistory};
