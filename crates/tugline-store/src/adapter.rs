//! The storage adapter: the single choke-point for relational I/O.
//!
//! Every operation is one statement (or a short statement batch) against
//! the shared relational store; the adapter never opens long-held
//! transactions, so a slow session cannot block its neighbors. The engine
//! is generic over [`Storage`], with [`PgStorage`] in production and
//! [`MemoryStorage`] for tests and the dev loop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tugline_protocol::{
    ConnectionStatus, InstanceId, QuestionId, RulesetId, SessionId, StudentId,
    TeamId,
};

use crate::models::{
    connection_status_as_str, strength_reason_as_str, AnswerOptionRow,
    NewAttempt, NewQuestionInstance, NewStrengthEvent, QuestionRecord,
    QuestionRow, Roster, Ruleset, RulesetRow, StudentRow, TeamRow,
};
use crate::StoreError;

/// Relational operations the session engine drives.
///
/// Reads cover question content, rulesets, and the roster; writes append
/// to the session's event log (`question_instances`, `attempts`,
/// `strength_events`) and update the `students` and `sessions` rows the
/// REST layer owns the schema for.
pub trait Storage: Send + Sync + 'static {
    /// Loads a bank question with its answer options.
    fn load_question(
        &self,
        id: QuestionId,
    ) -> impl Future<Output = Result<QuestionRecord, StoreError>> + Send;

    /// Loads a scoring ruleset.
    fn load_ruleset(
        &self,
        id: RulesetId,
    ) -> impl Future<Output = Result<Ruleset, StoreError>> + Send;

    /// Loads the session's teams (creation order) and non-kicked students.
    fn load_roster(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = Result<Roster, StoreError>> + Send;

    /// Persists a freshly asked question instance.
    fn insert_question_instance(
        &self,
        instance: &NewQuestionInstance,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stamps `ended_at` on a question instance.
    fn end_question_instance(
        &self,
        id: InstanceId,
        ended_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Appends one attempt to the event log.
    fn insert_attempt(
        &self,
        attempt: &NewAttempt,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Appends one strength event to the event log.
    fn insert_strength_event(
        &self,
        event: &NewStrengthEvent,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Marks the session completed with its final rope position.
    fn update_session_on_end(
        &self,
        session_id: SessionId,
        final_position: f64,
        ended_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Records a student's connection status change.
    fn update_student_connection(
        &self,
        student_id: StudentId,
        status: ConnectionStatus,
        last_seen_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Records a student's team membership change.
    fn update_student_team(
        &self,
        student_id: StudentId,
        team_id: Option<TeamId>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

/// [`Storage`] backed by a shared Postgres pool.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Wraps an already-connected pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for sharing with a [`crate::PgStateStore`].
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Storage for PgStorage {
    async fn load_question(
        &self,
        id: QuestionId,
    ) -> Result<QuestionRecord, StoreError> {
        let row: QuestionRow = sqlx::query_as(
            "SELECT id, text, question_type, difficulty, time_limit_ms, base_points \
             FROM questions WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("question {id}")))?;

        let options: Vec<AnswerOptionRow> = sqlx::query_as(
            "SELECT id, text, is_correct FROM answer_options \
             WHERE question_id = $1 ORDER BY position",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let record = row.assemble(options);
        if record.correct_answer_id().is_none() {
            return Err(StoreError::Corrupt(format!(
                "question {id} has no correct option"
            )));
        }
        Ok(record)
    }

    async fn load_ruleset(&self, id: RulesetId) -> Result<Ruleset, StoreError> {
        let row: RulesetRow = sqlx::query_as(
            "SELECT points_per_correct, points_for_speed, streak_bonus, \
                    streak_threshold, streak_multiplier, time_limit_ms \
             FROM rulesets WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("ruleset {id}")))?;
        Ok(row.into())
    }

    async fn load_roster(
        &self,
        session_id: SessionId,
    ) -> Result<Roster, StoreError> {
        let teams: Vec<TeamRow> = sqlx::query_as(
            "SELECT id, name, color FROM teams \
             WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        let students: Vec<StudentRow> = sqlx::query_as(
            "SELECT id, nickname, team_id, connection_status FROM students \
             WHERE session_id = $1 AND connection_status <> 'kicked' \
             ORDER BY created_at, id",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(Roster {
            teams: teams.into_iter().map(Into::into).collect(),
            students: students.into_iter().map(Into::into).collect(),
        })
    }

    async fn insert_question_instance(
        &self,
        instance: &NewQuestionInstance,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO question_instances \
             (id, session_id, question_id, question_index, text, options, \
              correct_answer_id, time_limit_ms, base_points, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(instance.id.0)
        .bind(instance.session_id.0)
        .bind(instance.question_id.0)
        .bind(instance.question_index as i32)
        .bind(&instance.text)
        .bind(&instance.options)
        .bind(instance.correct_answer_id.0)
        .bind(instance.time_limit_ms as i64)
        .bind(instance.base_points as i32)
        .bind(instance.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn end_question_instance(
        &self,
        id: InstanceId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE question_instances SET ended_at = $2 \
             WHERE id = $1 AND ended_at IS NULL",
        )
        .bind(id.0)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO attempts \
             (question_instance_id, student_id, answer_id, is_correct, \
              response_time_ms, points_awarded, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(attempt.instance_id.0)
        .bind(attempt.student_id.0)
        .bind(attempt.answer_id.0)
        .bind(attempt.is_correct)
        .bind(attempt.response_time_ms as i64)
        .bind(attempt.points_awarded as i32)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_strength_event(
        &self,
        event: &NewStrengthEvent,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO strength_events \
             (session_id, team_id, delta, reason, new_position, triggered_by, \
              created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.session_id.0)
        .bind(event.team_id.0)
        .bind(event.delta_scaled)
        .bind(strength_reason_as_str(event.reason))
        .bind(event.new_position)
        .bind(event.triggered_by)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_session_on_end(
        &self,
        session_id: SessionId,
        final_position: f64,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sessions SET status = 'completed', final_position = $2, \
             ended_at = $3 WHERE id = $1",
        )
        .bind(session_id.0)
        .bind(final_position)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_student_connection(
        &self,
        student_id: StudentId,
        status: ConnectionStatus,
        last_seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE students SET connection_status = $2, last_seen_at = $3 \
             WHERE id = $1",
        )
        .bind(student_id.0)
        .bind(connection_status_as_str(status))
        .bind(last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_student_team(
        &self,
        student_id: StudentId,
        team_id: Option<TeamId>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE students SET team_id = $2 WHERE id = $1")
            .bind(student_id.0)
            .bind(team_id.map(|t| t.0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, dev loop)
// ---------------------------------------------------------------------------

/// A student connection-status update recorded by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionUpdate {
    pub student_id: StudentId,
    pub status: ConnectionStatus,
}

/// A recorded session-end update.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEndUpdate {
    pub session_id: SessionId,
    pub final_position: f64,
    pub ended_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    questions: HashMap<QuestionId, QuestionRecord>,
    rulesets: HashMap<RulesetId, Ruleset>,
    rosters: HashMap<SessionId, Roster>,
    instances: Vec<NewQuestionInstance>,
    instance_ends: HashMap<InstanceId, DateTime<Utc>>,
    attempts: Vec<NewAttempt>,
    strength_events: Vec<NewStrengthEvent>,
    session_ends: Vec<SessionEndUpdate>,
    connection_updates: Vec<ConnectionUpdate>,
    team_updates: Vec<(StudentId, Option<TeamId>)>,
    fail_question_loads: bool,
    fail_attempt_inserts: bool,
}

/// [`Storage`] that keeps everything in memory and records every write,
/// so tests can assert on the event log the engine produced.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a bank question.
    pub fn add_question(&self, question: QuestionRecord) {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.questions.insert(question.id, question);
    }

    /// Seeds a ruleset.
    pub fn add_ruleset(&self, id: RulesetId, ruleset: Ruleset) {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.rulesets.insert(id, ruleset);
    }

    /// Seeds a session roster.
    pub fn set_roster(&self, session_id: SessionId, roster: Roster) {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.rosters.insert(session_id, roster);
    }

    /// Makes every subsequent `load_question` fail as unavailable.
    pub fn fail_question_loads(&self, fail: bool) {
        self.inner.lock().expect("storage lock").fail_question_loads = fail;
    }

    /// Makes every subsequent `insert_attempt` fail as unavailable.
    pub fn fail_attempt_inserts(&self, fail: bool) {
        self.inner.lock().expect("storage lock").fail_attempt_inserts = fail;
    }

    /// All attempts appended so far.
    pub fn attempts(&self) -> Vec<NewAttempt> {
        self.inner.lock().expect("storage lock").attempts.clone()
    }

    /// All strength events appended so far.
    pub fn strength_events(&self) -> Vec<NewStrengthEvent> {
        self.inner.lock().expect("storage lock").strength_events.clone()
    }

    /// All question instances appended so far.
    pub fn instances(&self) -> Vec<NewQuestionInstance> {
        self.inner.lock().expect("storage lock").instances.clone()
    }

    /// The `ended_at` stamp for an instance, if it was ended.
    pub fn instance_ended_at(&self, id: InstanceId) -> Option<DateTime<Utc>> {
        self.inner.lock().expect("storage lock").instance_ends.get(&id).copied()
    }

    /// All session-end updates recorded so far.
    pub fn session_ends(&self) -> Vec<SessionEndUpdate> {
        self.inner.lock().expect("storage lock").session_ends.clone()
    }

    /// All connection-status updates recorded so far.
    pub fn connection_updates(&self) -> Vec<ConnectionUpdate> {
        self.inner.lock().expect("storage lock").connection_updates.clone()
    }

    /// All team-membership updates recorded so far.
    pub fn team_updates(&self) -> Vec<(StudentId, Option<TeamId>)> {
        self.inner.lock().expect("storage lock").team_updates.clone()
    }
}

impl Storage for MemoryStorage {
    async fn load_question(
        &self,
        id: QuestionId,
    ) -> Result<QuestionRecord, StoreError> {
        let inner = self.inner.lock().expect("storage lock");
        if inner.fail_question_loads {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        inner
            .questions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("question {id}")))
    }

    async fn load_ruleset(&self, id: RulesetId) -> Result<Ruleset, StoreError> {
        self.inner
            .lock()
            .expect("storage lock")
            .rulesets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ruleset {id}")))
    }

    async fn load_roster(
        &self,
        session_id: SessionId,
    ) -> Result<Roster, StoreError> {
        self.inner
            .lock()
            .expect("storage lock")
            .rosters
            .get(&session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }

    async fn insert_question_instance(
        &self,
        instance: &NewQuestionInstance,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.instances.push(instance.clone());
        Ok(())
    }

    async fn end_question_instance(
        &self,
        id: InstanceId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.instance_ends.entry(id).or_insert(ended_at);
        Ok(())
    }

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        if inner.fail_attempt_inserts {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        inner.attempts.push(attempt.clone());
        Ok(())
    }

    async fn insert_strength_event(
        &self,
        event: &NewStrengthEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.strength_events.push(event.clone());
        Ok(())
    }

    async fn update_session_on_end(
        &self,
        session_id: SessionId,
        final_position: f64,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.session_ends.push(SessionEndUpdate {
            session_id,
            final_position,
            ended_at,
        });
        Ok(())
    }

    async fn update_student_connection(
        &self,
        student_id: StudentId,
        status: ConnectionStatus,
        _last_seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.connection_updates.push(ConnectionUpdate { student_id, status });
        Ok(())
    }

    async fn update_student_team(
        &self,
        student_id: StudentId,
        team_id: Option<TeamId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("storage lock");
        inner.team_updates.push((student_id, team_id));
        if let Some(roster) = inner
            .rosters
            .values_mut()
            .find(|r| r.students.iter().any(|s| s.id == student_id))
        {
            if let Some(student) =
                roster.students.iter_mut().find(|s| s.id == student_id)
            {
                student.team_id = team_id;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerOptionRecord;
    use tugline_protocol::AnswerId;

    fn question(id: QuestionId) -> QuestionRecord {
        QuestionRecord {
            id,
            text: "2+2?".into(),
            question_type: "multiple_choice".into(),
            difficulty: None,
            time_limit_ms: 30_000,
            base_points: 10,
            options: vec![AnswerOptionRecord {
                id: AnswerId::new(),
                text: "4".into(),
                is_correct: true,
            }],
        }
    }

    #[tokio::test]
    async fn test_memory_storage_load_question_round_trip() {
        let storage = MemoryStorage::new();
        let id = QuestionId::new();
        storage.add_question(question(id));

        let loaded = storage.load_question(id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.base_points, 10);
    }

    #[tokio::test]
    async fn test_memory_storage_missing_question_is_not_found() {
        let storage = MemoryStorage::new();
        let err = storage.load_question(QuestionId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_memory_storage_records_attempts() {
        let storage = MemoryStorage::new();
        let attempt = NewAttempt {
            instance_id: InstanceId::new(),
            student_id: StudentId::new(),
            answer_id: AnswerId::new(),
            is_correct: true,
            response_time_ms: 1200,
            points_awarded: 14,
            created_at: Utc::now(),
        };
        storage.insert_attempt(&attempt).await.unwrap();
        assert_eq!(storage.attempts(), vec![attempt]);
    }

    #[tokio::test]
    async fn test_memory_storage_injected_attempt_failure_is_retryable() {
        let storage = MemoryStorage::new();
        storage.fail_attempt_inserts(true);
        let attempt = NewAttempt {
            instance_id: InstanceId::new(),
            student_id: StudentId::new(),
            answer_id: AnswerId::new(),
            is_correct: false,
            response_time_ms: 0,
            points_awarded: 0,
            created_at: Utc::now(),
        };
        let err = storage.insert_attempt(&attempt).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(storage.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage_end_instance_is_idempotent() {
        let storage = MemoryStorage::new();
        let id = InstanceId::new();
        let first = Utc::now();
        storage.end_question_instance(id, first).await.unwrap();
        storage
            .end_question_instance(id, first + chrono::Duration::seconds(5))
            .await
            .unwrap();
        // First stamp wins, matching the `ended_at IS NULL` guard in SQL.
        assert_eq!(storage.instance_ended_at(id), Some(first));
    }
}
