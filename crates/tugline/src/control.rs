//! Control API: the out-of-band surface the REST layer drives.
//!
//! These are in-process calls (the REST router and the engine host run
//! in the same process); every method wakes the target session's engine
//! and forwards one command, so control traffic is linearized with the
//! WebSocket traffic through the same actor queue.

use std::sync::Arc;

use tugline_engine::{AnswerOutcome, EngineManager};
use tugline_protocol::{
    AnswerId, GameStateView, InstanceId, QuestionId, Role, RulesetId, SessionId,
    StudentId, TeamId, TenantId,
};
use tugline_store::{StateStore, Storage};

use crate::TuglineError;

/// Handle for REST-layer calls into session engines.
pub struct ControlApi<S: Storage, K: StateStore> {
    manager: Arc<EngineManager<S, K>>,
}

impl<S: Storage, K: StateStore> Clone for ControlApi<S, K> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<S: Storage, K: StateStore> ControlApi<S, K> {
    pub(crate) fn new(manager: Arc<EngineManager<S, K>>) -> Self {
        Self { manager }
    }

    /// Start-of-game initialization: hands the engine its tenant, the
    /// chosen question sequence, and an optional ruleset.
    pub async fn init(
        &self,
        session_id: SessionId,
        tenant_id: TenantId,
        question_ids: Vec<QuestionId>,
        ruleset_id: Option<RulesetId>,
    ) -> Result<(), TuglineError> {
        let engine = self.manager.wake(session_id).await?;
        engine.init(tenant_id, question_ids, ruleset_id).await?;
        Ok(())
    }

    /// Forces end-of-game; returns the final rope position.
    pub async fn end(&self, session_id: SessionId) -> Result<f64, TuglineError> {
        let engine = self.manager.wake(session_id).await?;
        Ok(engine.end().await?)
    }

    /// Reads the current game state, projected for the caller's role.
    pub async fn get_state(
        &self,
        session_id: SessionId,
        role: Role,
    ) -> Result<GameStateView, TuglineError> {
        let engine = self.manager.wake(session_id).await?;
        Ok(engine.state(role).await?)
    }

    /// HTTP fallback for answer submission; mirrors the WebSocket path.
    ///
    /// `team_id` is accepted for contract compatibility but the roster
    /// is authoritative — the engine scores against the student's
    /// current membership.
    pub async fn submit_answer(
        &self,
        session_id: SessionId,
        student_id: StudentId,
        _team_id: Option<TeamId>,
        instance_id: InstanceId,
        answer_id: AnswerId,
    ) -> Result<AnswerOutcome, TuglineError> {
        let engine = self.manager.wake(session_id).await?;
        Ok(engine.submit_answer(student_id, instance_id, answer_id).await?)
    }

    /// Removes a student from the session; mirrors the teacher's kick.
    pub async fn kick(
        &self,
        session_id: SessionId,
        student_id: StudentId,
        reason: Option<String>,
    ) -> Result<(), TuglineError> {
        let engine = self.manager.wake(session_id).await?;
        engine.kick(student_id, reason).await?;
        Ok(())
    }
}
