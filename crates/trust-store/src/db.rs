//! Background-thread SQLite connection wrapper.
//!
//! Mirrors a single-writer embedded store: all operations run on a
//! dedicated thread owned by `tokio_rusqlite::Connection`, keeping the
//! async runtime free of blocking syscalls. Unlike a web-facing store that
//! tolerates WAL's shared-memory index file, this service often runs with
//! its data directory on a network-attached volume, where a `-wal`/`-shm`
//! pair left behind by an unclean shutdown can corrupt the next open. The
//! journal mode is pinned to `DELETE` for that reason; see DESIGN.md.

use std::time::Duration;

use rusqlite::Connection;
use trust_core::error::StoreError;

const SCHEMA: &str = include_str!("schema.sql");

/// Async handle to the single SQLite connection backing the store.
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open (creating if absent) the database at `path`, apply pragmas,
    /// and run the schema. Retries with backoff if another process holds
    /// the write lock during startup migration.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| StoreError::Sqlite(e.to_string()))?;

        let mut backoff = Duration::from_millis(200);
        let max_backoff = Duration::from_secs(5);
        let max_total_wait = Duration::from_secs(60);
        let start = std::time::Instant::now();

        loop {
            let res = conn
                .call(|conn| -> rusqlite::Result<()> {
                    conn.busy_timeout(Duration::from_secs(1))?;
                    conn.execute_batch(
                        "PRAGMA journal_mode=DELETE; PRAGMA foreign_keys=ON; PRAGMA synchronous=FULL;",
                    )?;
                    conn.execute_batch(SCHEMA)?;
                    conn.busy_timeout(Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Rusqlite(err)) if is_locked(&err) => {
                    if start.elapsed() >= max_total_wait {
                        return Err(StoreError::Migration(
                            "database stayed locked past startup deadline".into(),
                        ));
                    }
                    tracing::warn!(wait_ms = backoff.as_millis() as u64, "database locked during migration, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(err) => return Err(StoreError::Migration(err.to_string())),
            }
        }

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    /// Run a closure on the background thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(f).await.map_err(|e| match e {
            tokio_rusqlite::Error::ConnectionClosed => {
                StoreError::Sqlite("connection closed".into())
            }
            other => StoreError::Sqlite(other.to_string()),
        })
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}
