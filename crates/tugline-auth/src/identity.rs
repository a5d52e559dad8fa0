//! The authenticated identity bound to a connection.

use serde::{Deserialize, Serialize};
use tugline_protocol::{Role, SessionId, StudentId, TeamId, TenantId};
use uuid::Uuid;

/// Everything a validated token asserts about a connection.
///
/// For students, `student_id` is always present and `team_id` reflects
/// the membership at token-issue time (the roster remains authoritative —
/// students can switch teams after connecting). For teachers both are
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The account id behind the connection (teacher user or student).
    pub user_id: Uuid,
    /// Teacher or student.
    pub role: Role,
    /// The session this token is scoped to. A connection whose upgrade
    /// path names a different session is rejected.
    pub session_id: SessionId,
    /// The owning tenant.
    pub tenant_id: TenantId,
    /// The student this connection plays as, when `role` is student.
    pub student_id: Option<StudentId>,
    /// Team membership claimed by the token, when `role` is student.
    pub team_id: Option<TeamId>,
}

impl Identity {
    /// Builds a teacher identity for the given session.
    pub fn teacher(user_id: Uuid, session_id: SessionId, tenant_id: TenantId) -> Self {
        Self {
            user_id,
            role: Role::Teacher,
            session_id,
            tenant_id,
            student_id: None,
            team_id: None,
        }
    }

    /// Builds a student identity for the given session.
    pub fn student(
        student_id: StudentId,
        session_id: SessionId,
        tenant_id: TenantId,
        team_id: Option<TeamId>,
    ) -> Self {
        Self {
            user_id: student_id.0,
            role: Role::Student,
            session_id,
            tenant_id,
            student_id: Some(student_id),
            team_id,
        }
    }

    /// Returns `true` for teacher connections.
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}
