//! Engine manager: the process-wide registry of session actors.
//!
//! Exactly one live engine exists per session id — the manager's map is
//! the single spawn point, and every caller (connection handlers, the
//! control API) goes through [`EngineManager::wake`]. A hibernated or
//! failed actor leaves a closed handle behind; the next wake call reaps
//! it and rehydrates the session from the state store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tugline_protocol::SessionId;
use tugline_store::{StateStore, Storage};

use crate::actor::{roster_error, spawn_engine, EngineConfig, EngineHandle};
use crate::state::RuntimeState;
use crate::EngineError;

/// Creates, tracks, and rehydrates session engines.
pub struct EngineManager<S: Storage, K: StateStore> {
    storage: Arc<S>,
    states: Arc<K>,
    config: EngineConfig,
    engines: Mutex<HashMap<SessionId, EngineHandle>>,
}

impl<S: Storage, K: StateStore> EngineManager<S, K> {
    pub fn new(storage: Arc<S>, states: Arc<K>, config: EngineConfig) -> Self {
        Self {
            storage,
            states,
            config,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live engine for a session, waking it if necessary.
    ///
    /// Wake order: a still-running actor wins; otherwise the state store
    /// blob is rehydrated; otherwise a lobby-phase state is bootstrapped
    /// from the stored roster. A session with no roster does not exist.
    pub async fn wake(&self, session_id: SessionId) -> Result<EngineHandle, EngineError> {
        let mut engines = self.engines.lock().await;

        if let Some(handle) = engines.get(&session_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            // Hibernated or failed; rebuild below.
            engines.remove(&session_id);
        }

        let state = match self.states.get(session_id).await? {
            Some(blob) => {
                let state = RuntimeState::decode(&blob).map_err(|e| {
                    EngineError::Internal(format!("state blob decode failed: {e}"))
                })?;
                tracing::info!(%session_id, phase = %state.phase, "session rehydrated");
                state
            }
            None => {
                let roster = self
                    .storage
                    .load_roster(session_id)
                    .await
                    .map_err(|e| roster_error(session_id, e))?;
                if roster.teams.is_empty() {
                    return Err(EngineError::SessionNotFound(session_id));
                }
                tracing::info!(%session_id, "session bootstrapped from roster");
                RuntimeState::bootstrap(session_id, roster)
            }
        };

        let handle = spawn_engine(
            state,
            Arc::clone(&self.storage),
            Arc::clone(&self.states),
            self.config.clone(),
        );
        engines.insert(session_id, handle.clone());
        Ok(handle)
    }

    /// The live engine for a session, without waking a hibernated one.
    pub async fn live(&self, session_id: SessionId) -> Option<EngineHandle> {
        let engines = self.engines.lock().await;
        engines
            .get(&session_id)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Number of engines currently resident (live or awaiting reap).
    pub async fn resident_count(&self) -> usize {
        self.engines.lock().await.len()
    }
}
