//! The per-session state store.
//!
//! Holds one opaque blob per session: the serialized Session Runtime
//! State. The engine writes exactly one snapshot after every mutating
//! command, and reads it back when a hibernated session wakes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use sqlx::PgPool;
use tugline_protocol::SessionId;

use crate::StoreError;

/// Durable key/value store for session runtime state.
pub trait StateStore: Send + Sync + 'static {
    /// Reads the session's blob, `None` if the session has never run.
    fn get(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Replaces the session's blob.
    fn put(
        &self,
        session_id: SessionId,
        blob: &[u8],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// [`StateStore`] backed by a single Postgres table, colocated with the
/// event log so the blob and the log share fate.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl StateStore for PgStateStore {
    async fn get(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let blob: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT state FROM session_state WHERE session_id = $1")
                .bind(session_id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.map(|(b,)| b))
    }

    async fn put(
        &self,
        session_id: SessionId,
        blob: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO session_state (session_id, state, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (session_id) \
             DO UPDATE SET state = EXCLUDED.state, updated_at = now()",
        )
        .bind(session_id.0)
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// [`StateStore`] kept in process memory, for tests and the dev loop.
#[derive(Default)]
pub struct MemoryStateStore {
    blobs: Mutex<HashMap<SessionId, Vec<u8>>>,
    fail_puts: Mutex<bool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail as unavailable.
    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().expect("state lock") = fail;
    }

    /// Number of sessions with a stored blob.
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("state lock").len()
    }

    /// Whether no session has a stored blob.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for MemoryStateStore {
    async fn get(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().expect("state lock").get(&session_id).cloned())
    }

    async fn put(
        &self,
        session_id: SessionId,
        blob: &[u8],
    ) -> Result<(), StoreError> {
        if *self.fail_puts.lock().expect("state lock") {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.blobs
            .lock()
            .expect("state lock")
            .insert(session_id, blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_state_store_round_trip() {
        let store = MemoryStateStore::new();
        let id = SessionId::new();

        assert_eq!(store.get(id).await.unwrap(), None);
        store.put(id, b"blob-1").await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), Some(b"blob-1".to_vec()));

        store.put(id, b"blob-2").await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), Some(b"blob-2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_state_store_injected_put_failure() {
        let store = MemoryStateStore::new();
        let id = SessionId::new();
        store.fail_puts(true);
        let err = store.put(id, b"blob").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.get(id).await.unwrap(), None);
    }
}
