//! Generic key/value state for indexer checkpoints (last indexed block,
//! current state-machine phase, retry counters).

use rusqlite::{params, OptionalExtension};
use trust_core::error::StoreError;

use crate::db::AsyncDb;

impl AsyncDb {
    pub async fn get_indexer_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT value FROM indexer_state WHERE key = ?1", params![key], |row| row.get(0))
                .optional()
        })
        .await
    }

    pub async fn set_indexer_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO indexer_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_key_is_none() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        assert_eq!(db.get_indexer_state("last_block").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        db.set_indexer_state("last_block", "12345").await.unwrap();
        assert_eq!(db.get_indexer_state("last_block").await.unwrap(), Some("12345".to_string()));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let db = AsyncDb::open_in_memory().await.unwrap();
        db.set_indexer_state("phase", "backfill").await.unwrap();
        db.set_indexer_state("phase", "tail").await.unwrap();
        assert_eq!(db.get_indexer_state("phase").await.unwrap(), Some("tail".to_string()));
    }
}
