//! The session engine actor: an isolated Tokio task that owns one game.
//!
//! Each session runs in its own task, communicating with the outside
//! world through an mpsc channel. All mutation is linearized through the
//! command loop — connection handlers, the control API, the question
//! deadline, and the idle timer all feed the same queue, so no two
//! handlers ever interleave.
//!
//! After every state-mutating command the actor bumps `snapshot_version`
//! and writes the runtime state to the state store before the command's
//! externally observable effect goes out. A state-store write failure is
//! fatal: the actor notifies connected clients, stops, and the manager
//! rehydrates from the last good snapshot on the next contact.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tugline_auth::Identity;
use tugline_clock::DeadlineTimer;
use tugline_protocol::{
    AnswerId, ClientMessage, ConnectionId, ConnectionStatus, GameStateView,
    GameSummary, InstanceId, Phase, QuestionId, QuestionStats, Role, RulesetId,
    ServerMessage, SessionId, StrengthReason, StudentId, TeamId, TeamStatView,
    TenantId, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION,
    STRENGTH_DELTA_SCALE,
};
use tugline_store::{
    NewAttempt, NewQuestionInstance, NewStrengthEvent, StateStore, Storage,
    StoreError,
};
use uuid::Uuid;

use crate::registry::{ClientSender, ConnectionRegistry};
use crate::state::{AnswerOption, Attempt, QuestionInstance, RuntimeState};
use crate::{phase, scoring, EngineError};

/// Tunables for one engine actor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long the actor stays resident with no commands and no live
    /// connections before hibernating.
    pub idle_after: Duration,
    /// Command channel capacity (backpressure bound).
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_after: Duration::from_secs(300),
            command_buffer: 64,
        }
    }
}

/// The result of admitting one answer; becomes `ANSWER_RESULT` on the
/// WebSocket path and the response body on the HTTP fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_answer_id: AnswerId,
    pub delta: f64,
    pub new_position: f64,
    pub points_awarded: u32,
    pub response_time_ms: u64,
}

impl AnswerOutcome {
    /// The targeted event for the submitter.
    pub fn to_event(&self) -> ServerMessage {
        ServerMessage::AnswerResult {
            correct: self.correct,
            correct_answer_id: self.correct_answer_id,
            delta: self.delta,
            new_position: self.new_position,
            points_awarded: self.points_awarded,
            response_time_ms: self.response_time_ms,
        }
    }
}

/// Commands sent to an engine actor through its channel.
pub(crate) enum EngineCommand {
    /// Bind an authenticated connection to the session.
    Attach {
        conn_id: ConnectionId,
        identity: Identity,
        reconnect: bool,
        last_event_id: Option<u64>,
        sender: ClientSender,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },

    /// A connection went away.
    Detach { conn_id: ConnectionId },

    /// A post-HELLO client message.
    Client {
        conn_id: ConnectionId,
        msg: ClientMessage,
    },

    /// Control API: start-of-game initialization.
    Init {
        tenant_id: TenantId,
        question_ids: Vec<QuestionId>,
        ruleset_id: Option<RulesetId>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },

    /// Control API: force end-of-game; replies with the final position.
    End {
        reply: oneshot::Sender<Result<f64, EngineError>>,
    },

    /// Control API: read the role-projected state.
    GetState {
        role: Role,
        reply: oneshot::Sender<GameStateView>,
    },

    /// Control API: HTTP-fallback answer submission.
    SubmitAnswer {
        student_id: StudentId,
        instance_id: InstanceId,
        answer_id: AnswerId,
        reply: oneshot::Sender<Result<AnswerOutcome, EngineError>>,
    },

    /// Control API: kick a student.
    Kick {
        student_id: StudentId,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

/// Handle to a running session engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    session_id: SessionId,
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// The session this handle drives.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Whether the actor has stopped (hibernated or failed).
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Binds an authenticated connection to the session.
    pub async fn attach(
        &self,
        conn_id: ConnectionId,
        identity: Identity,
        reconnect: bool,
        last_event_id: Option<u64>,
        sender: ClientSender,
    ) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Attach {
                conn_id,
                identity,
                reconnect,
                last_event_id,
                sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?
    }

    /// Reports a closed connection (fire-and-forget).
    pub async fn detach(&self, conn_id: ConnectionId) {
        let _ = self.sender.send(EngineCommand::Detach { conn_id }).await;
    }

    /// Forwards a client message (fire-and-forget; errors go back as
    /// `ERROR` events on the originating connection).
    pub async fn client_message(
        &self,
        conn_id: ConnectionId,
        msg: ClientMessage,
    ) -> Result<(), EngineError> {
        self.sender
            .send(EngineCommand::Client { conn_id, msg })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))
    }

    /// Start-of-game initialization with the chosen question sequence.
    pub async fn init(
        &self,
        tenant_id: TenantId,
        question_ids: Vec<QuestionId>,
        ruleset_id: Option<RulesetId>,
    ) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Init {
                tenant_id,
                question_ids,
                ruleset_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?
    }

    /// Forces end-of-game; returns the final rope position.
    pub async fn end(&self) -> Result<f64, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::End { reply: reply_tx })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?
    }

    /// Reads the current role-projected game state.
    pub async fn state(&self, role: Role) -> Result<GameStateView, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::GetState {
                role,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))
    }

    /// HTTP-fallback answer submission; mirrors the WebSocket path.
    pub async fn submit_answer(
        &self,
        student_id: StudentId,
        instance_id: InstanceId,
        answer_id: AnswerId,
    ) -> Result<AnswerOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::SubmitAnswer {
                student_id,
                instance_id,
                answer_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?
    }

    /// Kicks a student; mirrors the teacher's WebSocket kick.
    pub async fn kick(
        &self,
        student_id: StudentId,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Kick {
                student_id,
                reason,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable(self.session_id))?
    }
}

/// Spawns an engine actor for the given runtime state and returns its
/// handle.
pub(crate) fn spawn_engine<S: Storage, K: StateStore>(
    state: RuntimeState,
    storage: Arc<S>,
    states: Arc<K>,
    config: EngineConfig,
) -> EngineHandle {
    let session_id = state.session_id;
    let (tx, rx) = mpsc::channel(config.command_buffer);

    let actor = SessionEngine {
        state,
        registry: ConnectionRegistry::new(),
        storage,
        states,
        deadline: DeadlineTimer::new(),
        receiver: rx,
        config,
        fatal: false,
    };

    tokio::spawn(actor.run());

    EngineHandle {
        session_id,
        sender: tx,
    }
}

/// The actor state. Runs inside a Tokio task; never shared.
struct SessionEngine<S: Storage, K: StateStore> {
    state: RuntimeState,
    registry: ConnectionRegistry,
    storage: Arc<S>,
    states: Arc<K>,
    deadline: DeadlineTimer,
    receiver: mpsc::Receiver<EngineCommand>,
    config: EngineConfig,
    /// Set when a state-store write fails; the loop shuts down after the
    /// in-flight command finishes.
    fatal: bool,
}

enum Wake {
    Cmd(EngineCommand),
    Closed,
    Deadline,
    Idle,
}

impl<S: Storage, K: StateStore> SessionEngine<S, K> {
    async fn run(mut self) {
        tracing::info!(
            session_id = %self.state.session_id,
            phase = %self.state.phase,
            "session engine started"
        );

        self.recover_deadline().await;

        let mut idle_at = Instant::now() + self.config.idle_after;
        loop {
            let wake = tokio::select! {
                cmd = self.receiver.recv() => {
                    cmd.map(Wake::Cmd).unwrap_or(Wake::Closed)
                }
                _ = self.deadline.expired() => Wake::Deadline,
                _ = tokio::time::sleep_until(idle_at) => Wake::Idle,
            };

            match wake {
                Wake::Cmd(cmd) => {
                    idle_at = Instant::now() + self.config.idle_after;
                    self.handle_command(cmd).await;
                }
                Wake::Deadline => {
                    // Disarm before handling so an early return inside
                    // end_question can't spin the loop.
                    self.deadline.cancel();
                    if let Err(e) = self.end_question().await {
                        tracing::error!(
                            session_id = %self.state.session_id,
                            error = %e,
                            "deadline end-question failed"
                        );
                    }
                }
                Wake::Idle => {
                    if self.registry.is_empty() {
                        tracing::info!(
                            session_id = %self.state.session_id,
                            "idle with no connections, hibernating"
                        );
                        break;
                    }
                    idle_at = Instant::now() + self.config.idle_after;
                }
                Wake::Closed => break,
            }

            if self.fatal {
                tracing::error!(
                    session_id = %self.state.session_id,
                    "state store write failed, refusing further mutations"
                );
                self.registry.broadcast(ServerMessage::Error {
                    code: tugline_protocol::ErrorCode::InternalError,
                    message: "session state could not be saved".into(),
                    client_msg_id: None,
                });
                self.registry.close_all(CLOSE_INTERNAL_ERROR);
                break;
            }
        }

        tracing::info!(session_id = %self.state.session_id, "session engine stopped");
    }

    /// Re-arms the question deadline after rehydration.
    ///
    /// Paused sessions stay frozen; an already-passed deadline ends the
    /// question immediately, before the first command is processed.
    async fn recover_deadline(&mut self) {
        if self.state.pause_remaining_ms.is_some() {
            return;
        }
        let Some(deadline_at) = self.state.deadline_at else {
            return;
        };
        let remaining = (deadline_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            tracing::info!(
                session_id = %self.state.session_id,
                "question deadline passed during hibernation"
            );
            if let Err(e) = self.end_question().await {
                tracing::error!(
                    session_id = %self.state.session_id,
                    error = %e,
                    "end-question on rehydrate failed"
                );
            }
        } else {
            self.deadline.arm(remaining);
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Attach {
                conn_id,
                identity,
                reconnect,
                last_event_id,
                sender,
                reply,
            } => {
                let result = self
                    .handle_attach(conn_id, identity, reconnect, last_event_id, sender)
                    .await;
                let _ = reply.send(result);
            }
            EngineCommand::Detach { conn_id } => {
                self.handle_detach(conn_id).await;
            }
            EngineCommand::Client { conn_id, msg } => {
                self.handle_client(conn_id, msg).await;
            }
            EngineCommand::Init {
                tenant_id,
                question_ids,
                ruleset_id,
                reply,
            } => {
                let result = self.init(tenant_id, question_ids, ruleset_id).await;
                let _ = reply.send(result);
            }
            EngineCommand::End { reply } => {
                let result = self.end_game().await;
                let _ = reply.send(result);
            }
            EngineCommand::GetState { role, reply } => {
                let _ = reply.send(self.state.view(role));
            }
            EngineCommand::SubmitAnswer {
                student_id,
                instance_id,
                answer_id,
                reply,
            } => {
                let result = self.admit_answer(student_id, instance_id, answer_id).await;
                let _ = reply.send(result);
            }
            EngineCommand::Kick {
                student_id,
                reason,
                reply,
            } => {
                let result = self.kick(student_id, reason).await;
                let _ = reply.send(result);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    async fn handle_attach(
        &mut self,
        conn_id: ConnectionId,
        identity: Identity,
        reconnect: bool,
        _last_event_id: Option<u64>,
        sender: ClientSender,
    ) -> Result<(), EngineError> {
        if identity.session_id != self.state.session_id {
            return Err(EngineError::NotAuthorized);
        }
        if self.state.phase.is_terminal() {
            return Err(EngineError::SessionEnded);
        }

        let mut joined: Option<(StudentId, String, Option<TeamId>)> = None;
        if identity.role == Role::Student {
            let student_id = identity.student_id.ok_or(EngineError::NotAuthorized)?;
            let student = self
                .state
                .student(student_id)
                .ok_or(EngineError::NotAuthorized)?;
            if student.status == ConnectionStatus::Kicked {
                return Err(EngineError::Kicked);
            }
            if student.status != ConnectionStatus::Connected {
                let student = self
                    .state
                    .student_mut(student_id)
                    .expect("looked up above");
                student.status = ConnectionStatus::Connected;
                joined =
                    Some((student.id, student.nickname.clone(), student.team_id));
            }
            if let Err(e) = self
                .storage
                .update_student_connection(
                    student_id,
                    ConnectionStatus::Connected,
                    Utc::now(),
                )
                .await
            {
                tracing::warn!(
                    session_id = %self.state.session_id,
                    %student_id,
                    error = %e,
                    "connection status update failed"
                );
            }
        }

        self.registry.insert(conn_id, identity.clone(), sender);
        if joined.is_some() {
            self.persist().await?;
        }

        tracing::info!(
            session_id = %self.state.session_id,
            %conn_id,
            role = ?identity.role,
            reconnect,
            "connection attached"
        );

        // Targeted catch-up: welcome, snapshot, and the live question.
        let team_id = identity
            .student_id
            .and_then(|sid| self.state.student(sid))
            .and_then(|s| s.team_id);
        self.registry.send(
            conn_id,
            ServerMessage::Welcome {
                session_id: self.state.session_id,
                phase: self.state.phase,
                position: Some(self.state.position),
                teams: Some(self.state.team_views()),
                students: Some(self.state.student_views()),
                role: identity.role,
                user_id: identity.user_id,
                team_id,
                server_time: Utc::now(),
            },
        );
        self.registry.send(
            conn_id,
            ServerMessage::StateSnapshot {
                state: self.state.view(identity.role),
                snapshot_version: self.state.snapshot_version,
            },
        );
        if matches!(self.state.phase, Phase::ActiveQuestion | Phase::Paused) {
            if let Some(q) = &self.state.current_question {
                let include_correct = identity.role == Role::Teacher;
                self.registry.send(
                    conn_id,
                    ServerMessage::Question {
                        question: q.view(include_correct),
                        question_index: q.index,
                        total_questions: self.state.total_questions(),
                        starts_at: q.started_at,
                        time_limit_ms: q.time_limit_ms,
                    },
                );
            }
        }

        if let Some((id, nickname, team_id)) = joined {
            self.registry.broadcast(ServerMessage::PlayerJoined {
                id,
                nickname,
                team_id,
            });
            self.broadcast_roster();
        }

        Ok(())
    }

    async fn handle_detach(&mut self, conn_id: ConnectionId) {
        let Some(identity) = self.registry.remove(conn_id) else {
            return;
        };
        tracing::debug!(
            session_id = %self.state.session_id,
            %conn_id,
            "connection detached"
        );

        let Some(student_id) = identity.student_id else {
            return;
        };
        // Only mark disconnected once their last device is gone.
        if self.registry.student_connected(student_id) {
            return;
        }
        let changed = match self.state.student_mut(student_id) {
            Some(s) if s.status == ConnectionStatus::Connected => {
                s.status = ConnectionStatus::Disconnected;
                true
            }
            _ => false,
        };
        if !changed {
            return;
        }
        if let Err(e) = self
            .storage
            .update_student_connection(
                student_id,
                ConnectionStatus::Disconnected,
                Utc::now(),
            )
            .await
        {
            tracing::warn!(
                session_id = %self.state.session_id,
                %student_id,
                error = %e,
                "connection status update failed"
            );
        }
        if let Err(e) = self.persist().await {
            tracing::error!(
                session_id = %self.state.session_id,
                error = %e,
                "persist on detach failed"
            );
            return;
        }
        self.broadcast_roster();
    }

    // -----------------------------------------------------------------------
    // Message router
    // -----------------------------------------------------------------------

    async fn handle_client(&mut self, conn_id: ConnectionId, msg: ClientMessage) {
        let Some(identity) = self.registry.identity(conn_id).cloned() else {
            return;
        };
        let client_msg_id = msg.client_msg_id().map(String::from);

        if msg.requires_teacher() && identity.role != Role::Teacher {
            self.send_error(conn_id, &EngineError::NotAuthorized, client_msg_id);
            return;
        }

        let result: Result<(), EngineError> = match msg {
            ClientMessage::Hello { .. } => Err(EngineError::InvalidMessage(
                "connection already authenticated".into(),
            )),

            ClientMessage::Ping { .. } => {
                self.registry.send(conn_id, ServerMessage::Pong);
                Ok(())
            }

            ClientMessage::JoinTeam { team_id, .. } => {
                match identity.student_id.ok_or(EngineError::NotAuthorized) {
                    Ok(student_id) => {
                        match self.join_team(student_id, team_id).await {
                            Ok(()) => {
                                self.registry.send(
                                    conn_id,
                                    ServerMessage::Ack {
                                        client_msg_id: client_msg_id.clone(),
                                    },
                                );
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                }
            }

            ClientMessage::SubmitAnswer {
                instance_id,
                choice_id,
                ..
            } => match identity.student_id.ok_or(EngineError::NotAuthorized) {
                Ok(student_id) => {
                    match self.admit_answer(student_id, instance_id, choice_id).await
                    {
                        Ok(outcome) => {
                            self.registry.send(conn_id, outcome.to_event());
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            },

            ClientMessage::TeacherNextQuestion { question_id, .. } => {
                if let Some(qid) = question_id {
                    tracing::debug!(
                        session_id = %self.state.session_id,
                        question_id = %qid,
                        "next-question override ignored; sequence is authoritative"
                    );
                }
                self.advance().await
            }

            ClientMessage::TeacherPause { .. } => self.pause().await,
            ClientMessage::TeacherResume { .. } => self.resume().await,
            ClientMessage::TeacherEndGame { .. } => {
                self.end_game().await.map(|_| ())
            }
            ClientMessage::TeacherManualAdjust { delta, .. } => {
                self.manual_adjust(delta, identity.user_id).await
            }
            ClientMessage::TeacherKickPlayer { player_id, .. } => {
                self.kick(player_id, None).await
            }
        };

        if let Err(e) = result {
            self.send_error(conn_id, &e, client_msg_id);
        }
    }

    fn send_error(
        &self,
        conn_id: ConnectionId,
        err: &EngineError,
        client_msg_id: Option<String>,
    ) {
        self.registry.send(
            conn_id,
            ServerMessage::Error {
                code: err.code(),
                message: err.to_string(),
                client_msg_id,
            },
        );
    }

    fn broadcast_roster(&self) {
        let students = self.state.student_views();
        self.registry.broadcast(ServerMessage::RosterUpdate {
            teams: self.state.team_views(),
            total_players: students.len() as u32,
            students,
        });
    }

    // -----------------------------------------------------------------------
    // Game commands
    // -----------------------------------------------------------------------

    async fn init(
        &mut self,
        tenant_id: TenantId,
        question_ids: Vec<QuestionId>,
        ruleset_id: Option<RulesetId>,
    ) -> Result<(), EngineError> {
        phase::ensure_transition(self.state.phase, Phase::Ready)?;

        let ruleset = match ruleset_id {
            Some(id) => self.storage.load_ruleset(id).await?,
            None => Default::default(),
        };

        self.state.tenant_id = Some(tenant_id);
        self.state.question_ids = question_ids;
        self.state.current_question_index = -1;
        self.state.ruleset = ruleset;
        self.state.started_at = Some(Utc::now());
        self.state.phase = Phase::Ready;
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            questions = self.state.question_ids.len(),
            "session initialized"
        );
        self.registry.broadcast(ServerMessage::PhaseChange {
            phase: Phase::Ready,
            previous_phase: Phase::Lobby,
        });
        Ok(())
    }

    async fn join_team(
        &mut self,
        student_id: StudentId,
        team_id: TeamId,
    ) -> Result<(), EngineError> {
        if self.state.phase.is_terminal() {
            return Err(EngineError::SessionEnded);
        }
        if self.state.team(team_id).is_none() {
            return Err(EngineError::InvalidMessage(format!(
                "unknown team {team_id}"
            )));
        }
        let student = self
            .state
            .student(student_id)
            .ok_or(EngineError::NotAuthorized)?;
        if student.status == ConnectionStatus::Kicked {
            return Err(EngineError::Kicked);
        }

        // User-visible write: fail before applying the membership change.
        self.storage
            .update_student_team(student_id, Some(team_id))
            .await?;
        self.state
            .student_mut(student_id)
            .expect("looked up above")
            .team_id = Some(team_id);
        self.persist().await?;
        self.broadcast_roster();
        Ok(())
    }

    async fn admit_answer(
        &mut self,
        student_id: StudentId,
        instance_id: InstanceId,
        answer_id: AnswerId,
    ) -> Result<AnswerOutcome, EngineError> {
        let (current_id, correct_answer_id, started_at, time_limit_ms, instance_base) =
            match (&self.state.phase, &self.state.current_question) {
                (Phase::ActiveQuestion, Some(q)) => (
                    q.id,
                    q.correct_answer_id,
                    q.started_at,
                    q.time_limit_ms,
                    q.base_points,
                ),
                _ => return Err(EngineError::QuestionExpired),
            };
        if instance_id != current_id {
            return Err(EngineError::QuestionExpired);
        }
        if self.state.answers.contains_key(&student_id) {
            return Err(EngineError::AlreadyAnswered);
        }
        let valid_option = self
            .state
            .current_question
            .as_ref()
            .is_some_and(|q| q.has_option(answer_id));
        if !valid_option {
            return Err(EngineError::InvalidAnswer);
        }
        let student = self
            .state
            .student(student_id)
            .ok_or(EngineError::NotAuthorized)?;
        if student.status == ConnectionStatus::Kicked {
            return Err(EngineError::Kicked);
        }
        let team_id = student.team_id;

        let now = Utc::now();
        let response_time_ms =
            (now - started_at).num_milliseconds().max(0) as u64;
        // Exactly at the limit is still in; past it is expired.
        if response_time_ms > time_limit_ms {
            return Err(EngineError::QuestionExpired);
        }

        let correct = answer_id == correct_answer_id;
        let base = scoring::base_points(&self.state.ruleset, instance_base);
        let points = if correct {
            scoring::compute_points(
                base,
                response_time_ms,
                time_limit_ms,
                &self.state.ruleset,
            )
        } else {
            0
        };

        // The attempt row goes down before the in-memory admission, so a
        // storage failure leaves the student free to retry.
        self.storage
            .insert_attempt(&NewAttempt {
                instance_id,
                student_id,
                answer_id,
                is_correct: correct,
                response_time_ms,
                points_awarded: points,
                created_at: now,
            })
            .await?;
        self.state.answers.insert(
            student_id,
            Attempt {
                answer_id,
                is_correct: correct,
                response_time_ms,
                points_awarded: points,
                team_id,
                created_at: now,
            },
        );

        let mut delta = 0.0;
        let mut moved: Option<TeamId> = None;
        if correct {
            if let Some(team_id) = team_id {
                if let Some(side) = self.state.team(team_id).map(|t| t.side) {
                    let streak =
                        scoring::bump_streak(&mut self.state.streaks, team_id);
                    let raw = scoring::tug_delta(
                        side,
                        points,
                        streak,
                        &self.state.ruleset,
                    );
                    let old = self.state.position;
                    let new = scoring::clamp_position(old + raw);
                    delta = new - old;
                    self.state.position = new;
                    if let Some(team) = self.state.team_mut(team_id) {
                        team.score += points;
                    }
                    self.state.last_event_id += 1;

                    if let Err(e) = self
                        .storage
                        .insert_strength_event(&NewStrengthEvent {
                            session_id: self.state.session_id,
                            team_id,
                            delta_scaled: (delta * STRENGTH_DELTA_SCALE).round()
                                as i64,
                            reason: StrengthReason::CorrectAnswer,
                            new_position: new,
                            triggered_by: student_id.0,
                            created_at: now,
                        })
                        .await
                    {
                        tracing::error!(
                            session_id = %self.state.session_id,
                            error = %e,
                            "strength event write failed"
                        );
                    }
                    moved = Some(team_id);
                }
            }
        }

        self.persist().await?;

        if let Some(team_id) = moved {
            self.registry.broadcast(ServerMessage::TugUpdate {
                position: self.state.position,
                delta,
                reason: StrengthReason::CorrectAnswer,
                team_id,
                last_event_id: self.state.last_event_id,
            });
        }

        Ok(AnswerOutcome {
            correct,
            correct_answer_id,
            delta,
            new_position: self.state.position,
            points_awarded: points,
            response_time_ms,
        })
    }

    /// Starts the question at `index` in the chosen sequence.
    async fn start_question(&mut self, index: usize) -> Result<(), EngineError> {
        phase::ensure_transition(self.state.phase, Phase::ActiveQuestion)?;
        let question_id = *self
            .state
            .question_ids
            .get(index)
            .ok_or_else(|| EngineError::Internal("question index out of range".into()))?;

        // A read failure here aborts the transition; the phase stays
        // where it was (ready or reveal).
        let record = self.storage.load_question(question_id).await?;
        let correct_answer_id = record.correct_answer_id().ok_or_else(|| {
            EngineError::Internal(format!("question {question_id} has no correct option"))
        })?;

        let time_limit_ms = self
            .state
            .ruleset
            .time_limit_ms
            .unwrap_or(record.time_limit_ms);
        let base_points =
            scoring::base_points(&self.state.ruleset, record.base_points);
        let now = Utc::now();
        let instance = QuestionInstance {
            id: InstanceId::new(),
            question_id,
            index: index as u32,
            text: record.text,
            question_type: record.question_type,
            difficulty: record.difficulty,
            options: record
                .options
                .into_iter()
                .map(|o| AnswerOption {
                    id: o.id,
                    text: o.text,
                    is_correct: o.is_correct,
                })
                .collect(),
            correct_answer_id,
            time_limit_ms,
            base_points,
            started_at: now,
            ended_at: None,
        };

        self.storage
            .insert_question_instance(&NewQuestionInstance {
                id: instance.id,
                session_id: self.state.session_id,
                question_id,
                question_index: instance.index,
                text: instance.text.clone(),
                options: serde_json::to_value(&instance.options)
                    .map_err(|e| EngineError::Internal(e.to_string()))?,
                correct_answer_id,
                time_limit_ms,
                base_points,
                started_at: now,
            })
            .await?;

        self.state.answers.clear();
        self.state.current_question_index = index as i32;
        self.state.current_question = Some(instance.clone());
        self.state.phase = Phase::ActiveQuestion;
        self.state.deadline_at =
            Some(now + chrono::Duration::milliseconds(time_limit_ms as i64));
        self.state.pause_remaining_ms = None;
        self.deadline.arm(Duration::from_millis(time_limit_ms));
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            index,
            instance_id = %instance.id,
            time_limit_ms,
            "question started"
        );

        let total = self.state.total_questions();
        self.registry.broadcast_role(
            ServerMessage::Question {
                question: instance.view(true),
                question_index: instance.index,
                total_questions: total,
                starts_at: now,
                time_limit_ms,
            },
            ServerMessage::Question {
                question: instance.view(false),
                question_index: instance.index,
                total_questions: total,
                starts_at: now,
                time_limit_ms,
            },
        );
        Ok(())
    }

    /// Ends the current question: stamps it, aggregates stats, reveals.
    /// Idempotent — a timer firing after a teacher advance is a no-op.
    async fn end_question(&mut self) -> Result<(), EngineError> {
        if !matches!(self.state.phase, Phase::ActiveQuestion | Phase::Paused) {
            return Ok(());
        }
        let Some(q) = &mut self.state.current_question else {
            return Ok(());
        };
        if q.ended_at.is_some() {
            return Ok(());
        }
        let now = Utc::now();
        q.ended_at = Some(now);
        let instance_id = q.id;
        let correct_answer_id = q.correct_answer_id;

        if let Err(e) = self.storage.end_question_instance(instance_id, now).await {
            tracing::error!(
                session_id = %self.state.session_id,
                %instance_id,
                error = %e,
                "end-instance write failed"
            );
        }

        let stats = self.question_stats();
        if self.state.phase == Phase::ActiveQuestion {
            self.state.phase = Phase::Reveal;
        }
        self.deadline.cancel();
        self.state.deadline_at = None;
        self.state.pause_remaining_ms = None;
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            %instance_id,
            attempts = stats.total_attempts,
            correct = stats.correct_attempts,
            "question ended"
        );
        self.registry.broadcast(ServerMessage::QuestionReveal {
            question_instance_id: instance_id,
            correct_answer_id,
            explanation: None,
            stats,
        });
        Ok(())
    }

    /// Per-question aggregates from the in-memory admissions map.
    fn question_stats(&self) -> QuestionStats {
        let answers = &self.state.answers;
        let team_stats = self
            .state
            .teams
            .iter()
            .map(|team| {
                let of_team: Vec<&Attempt> = answers
                    .values()
                    .filter(|a| a.team_id == Some(team.id))
                    .collect();
                let attempts = of_team.len() as u32;
                let correct =
                    of_team.iter().filter(|a| a.is_correct).count() as u32;
                let avg_response_ms = if of_team.is_empty() {
                    0
                } else {
                    of_team.iter().map(|a| a.response_time_ms).sum::<u64>()
                        / of_team.len() as u64
                };
                TeamStatView {
                    team_id: team.id,
                    attempts,
                    correct,
                    avg_response_ms,
                }
            })
            .collect();
        QuestionStats {
            total_attempts: answers.len() as u32,
            correct_attempts: answers.values().filter(|a| a.is_correct).count()
                as u32,
            team_stats,
        }
    }

    /// `teacher_next_question`: end the current question, then start the
    /// next or end the game.
    async fn advance(&mut self) -> Result<(), EngineError> {
        match self.state.phase {
            Phase::ActiveQuestion => self.end_question().await?,
            Phase::Ready | Phase::Reveal => {}
            Phase::Completed => return Err(EngineError::SessionEnded),
            Phase::Lobby | Phase::Paused => {
                return Err(EngineError::InvalidState(self.state.phase));
            }
        }

        let next = (self.state.current_question_index + 1) as usize;
        if next < self.state.question_ids.len() {
            self.start_question(next).await
        } else {
            self.end_game().await.map(|_| ())
        }
    }

    async fn pause(&mut self) -> Result<(), EngineError> {
        phase::ensure_transition(self.state.phase, Phase::Paused)?;
        let remaining = self.deadline.pause().unwrap_or(Duration::ZERO);
        self.state.pause_remaining_ms = Some(remaining.as_millis() as u64);
        self.state.deadline_at = None;
        self.state.phase = Phase::Paused;
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            remaining_ms = remaining.as_millis() as u64,
            "question paused"
        );
        self.registry.broadcast(ServerMessage::PhaseChange {
            phase: Phase::Paused,
            previous_phase: Phase::ActiveQuestion,
        });
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), EngineError> {
        if self.state.phase != Phase::Paused {
            return Err(EngineError::InvalidState(self.state.phase));
        }
        let remaining_ms = self.state.pause_remaining_ms.take().unwrap_or(0);
        self.deadline.arm(Duration::from_millis(remaining_ms));
        self.state.deadline_at = Some(
            Utc::now() + chrono::Duration::milliseconds(remaining_ms as i64),
        );
        self.state.phase = Phase::ActiveQuestion;
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            remaining_ms,
            "question resumed"
        );
        self.registry.broadcast(ServerMessage::PhaseChange {
            phase: Phase::ActiveQuestion,
            previous_phase: Phase::Paused,
        });
        Ok(())
    }

    async fn manual_adjust(
        &mut self,
        delta: f64,
        triggered_by: Uuid,
    ) -> Result<(), EngineError> {
        if !(-100.0..=100.0).contains(&delta) || !delta.is_finite() {
            return Err(EngineError::InvalidMessage(
                "manual adjust delta must be within [-100, 100]".into(),
            ));
        }
        if self.state.phase.is_terminal() {
            return Err(EngineError::SessionEnded);
        }
        // Attributed to the side the requested delta favors.
        let side = if delta < 0.0 { tugline_protocol::Side::Left } else {
            tugline_protocol::Side::Right
        };
        let team_id = self
            .state
            .team_on_side(side)
            .map(|t| t.id)
            .ok_or_else(|| EngineError::Internal("session has no teams".into()))?;

        let old = self.state.position;
        let new = scoring::clamp_position(old + delta);
        let effective = new - old;
        self.state.position = new;
        self.state.last_event_id += 1;
        let now = Utc::now();

        if let Err(e) = self
            .storage
            .insert_strength_event(&NewStrengthEvent {
                session_id: self.state.session_id,
                team_id,
                delta_scaled: (effective * STRENGTH_DELTA_SCALE).round() as i64,
                reason: StrengthReason::ManualAdjust,
                new_position: new,
                triggered_by,
                created_at: now,
            })
            .await
        {
            tracing::error!(
                session_id = %self.state.session_id,
                error = %e,
                "strength event write failed"
            );
        }
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            requested = delta,
            effective,
            position = new,
            "manual adjustment applied"
        );
        self.registry.broadcast(ServerMessage::TugUpdate {
            position: new,
            delta: effective,
            reason: StrengthReason::ManualAdjust,
            team_id,
            last_event_id: self.state.last_event_id,
        });
        Ok(())
    }

    async fn kick(
        &mut self,
        student_id: StudentId,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let student = self.state.student_mut(student_id).ok_or_else(|| {
            EngineError::InvalidMessage(format!("unknown student {student_id}"))
        })?;
        if student.status == ConnectionStatus::Kicked {
            return Ok(());
        }
        student.status = ConnectionStatus::Kicked;
        student.team_id = None;

        let now = Utc::now();
        if let Err(e) = self
            .storage
            .update_student_connection(student_id, ConnectionStatus::Kicked, now)
            .await
        {
            tracing::warn!(
                session_id = %self.state.session_id,
                %student_id,
                error = %e,
                "kick status update failed"
            );
        }
        if let Err(e) = self.storage.update_student_team(student_id, None).await {
            tracing::warn!(
                session_id = %self.state.session_id,
                %student_id,
                error = %e,
                "kick team clear failed"
            );
        }
        self.persist().await?;

        tracing::info!(
            session_id = %self.state.session_id,
            %student_id,
            "student kicked"
        );
        for conn_id in self.registry.connections_of_student(student_id) {
            self.registry.send(
                conn_id,
                ServerMessage::PlayerKicked {
                    student_id,
                    reason: reason.clone(),
                },
            );
            self.registry.close(conn_id, CLOSE_POLICY_VIOLATION);
        }
        self.broadcast_roster();
        Ok(())
    }

    async fn end_game(&mut self) -> Result<f64, EngineError> {
        match self.state.phase {
            // Repeated end is answered with the final position.
            Phase::Completed => return Ok(self.state.position),
            Phase::Lobby => {
                return Err(EngineError::InvalidState(Phase::Lobby));
            }
            _ => {}
        }
        self.end_question().await?;
        phase::ensure_transition(self.state.phase, Phase::Completed)?;

        let ended_at = Utc::now();
        let final_position = self.state.position;
        self.state.phase = Phase::Completed;
        self.deadline.cancel();
        self.state.deadline_at = None;
        self.state.pause_remaining_ms = None;

        if let Err(e) = self
            .storage
            .update_session_on_end(self.state.session_id, final_position, ended_at)
            .await
        {
            tracing::error!(
                session_id = %self.state.session_id,
                error = %e,
                "session end write failed"
            );
        }
        self.persist().await?;

        let winner = self.state.winner().map(|t| {
            let views = self.state.team_views();
            views
                .into_iter()
                .find(|v| v.id == t.id)
                .expect("winner is one of the teams")
        });
        let duration = self
            .state
            .started_at
            .map(|s| (ended_at - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        tracing::info!(
            session_id = %self.state.session_id,
            final_position,
            winner = winner.as_ref().map(|w| w.name.as_str()).unwrap_or("none"),
            "game ended"
        );
        self.registry.broadcast(ServerMessage::GameEnd {
            winner,
            final_position,
            summary: GameSummary {
                duration,
                total_questions: self.state.total_questions(),
            },
        });
        self.registry.close_all(CLOSE_NORMAL);
        Ok(final_position)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Writes one snapshot to the state store, bumping the version.
    ///
    /// On failure the actor is poisoned: the error propagates to the
    /// in-flight command and the run loop shuts the session down.
    async fn persist(&mut self) -> Result<(), EngineError> {
        self.state.snapshot_version += 1;
        let blob = self
            .state
            .encode()
            .map_err(|e| EngineError::Internal(format!("state encode failed: {e}")))?;
        match self.states.put(self.state.session_id, &blob).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fatal = true;
                Err(EngineError::Internal(format!(
                    "state store write failed: {e}"
                )))
            }
        }
    }
}

/// Maps a roster-load failure onto the wake error the caller reports.
pub(crate) fn roster_error(session_id: SessionId, err: StoreError) -> EngineError {
    match err {
        StoreError::NotFound(_) => EngineError::SessionNotFound(session_id),
        other => EngineError::Storage(other),
    }
}
