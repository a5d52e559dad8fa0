//! Connection registry and broadcaster.
//!
//! The actor owns one registry of all live connections bound to its
//! session. Fan-out writes one serialized event per connection through
//! per-connection unbounded channels, so a slow client's socket never
//! blocks the actor; the connection handler drains its channel and does
//! the actual network writes.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tugline_auth::Identity;
use tugline_protocol::{ConnectionId, Role, ServerMessage, StudentId};

/// What the actor pushes to a connection's outbound pump.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and send this event.
    Event(ServerMessage),
    /// Send a close frame with this code and stop the connection.
    Close(u16),
}

/// Sender half of a connection's outbound channel.
pub type ClientSender = mpsc::UnboundedSender<Outbound>;

struct Registered {
    identity: Identity,
    sender: ClientSender,
}

/// All live connections of one session, with their authenticated
/// identity and role.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: HashMap<ConnectionId, Registered>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        conn_id: ConnectionId,
        identity: Identity,
        sender: ClientSender,
    ) {
        self.conns.insert(conn_id, Registered { identity, sender });
    }

    /// Removes a connection, returning its identity if it was known.
    pub fn remove(&mut self, conn_id: ConnectionId) -> Option<Identity> {
        self.conns.remove(&conn_id).map(|r| r.identity)
    }

    pub fn identity(&self, conn_id: ConnectionId) -> Option<&Identity> {
        self.conns.get(&conn_id).map(|r| &r.identity)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Targeted send. Silently drops if the connection is gone.
    pub fn send(&self, conn_id: ConnectionId, msg: ServerMessage) {
        if let Some(r) = self.conns.get(&conn_id) {
            let _ = r.sender.send(Outbound::Event(msg));
        }
    }

    /// Asks one connection's handler to close with the given code.
    pub fn close(&mut self, conn_id: ConnectionId, code: u16) {
        if let Some(r) = self.conns.remove(&conn_id) {
            let _ = r.sender.send(Outbound::Close(code));
        }
    }

    /// Sends the same event to every live connection.
    pub fn broadcast(&self, msg: ServerMessage) {
        for r in self.conns.values() {
            let _ = r.sender.send(Outbound::Event(msg.clone()));
        }
    }

    /// Role-filtered fan-out: teachers get one projection, students the
    /// other. Each connection receives its payload exactly once.
    pub fn broadcast_role(&self, teacher: ServerMessage, student: ServerMessage) {
        for r in self.conns.values() {
            let msg = match r.identity.role {
                Role::Teacher => teacher.clone(),
                Role::Student => student.clone(),
            };
            let _ = r.sender.send(Outbound::Event(msg));
        }
    }

    /// Asks every connection to close, then forgets them all.
    pub fn close_all(&mut self, code: u16) {
        for (_, r) in self.conns.drain() {
            let _ = r.sender.send(Outbound::Close(code));
        }
    }

    /// All connections currently playing as the given student.
    pub fn connections_of_student(&self, student_id: StudentId) -> Vec<ConnectionId> {
        self.conns
            .iter()
            .filter(|(_, r)| r.identity.student_id == Some(student_id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Whether any live connection plays as the given student.
    pub fn student_connected(&self, student_id: StudentId) -> bool {
        self.conns
            .values()
            .any(|r| r.identity.student_id == Some(student_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tugline_protocol::{SessionId, TenantId};
    use uuid::Uuid;

    fn teacher_identity(session: SessionId) -> Identity {
        Identity::teacher(Uuid::new_v4(), session, TenantId::new())
    }

    fn student_identity(session: SessionId) -> (StudentId, Identity) {
        let sid = StudentId::new();
        (sid, Identity::student(sid, session, TenantId::new(), None))
    }

    fn channel() -> (ClientSender, mpsc::UnboundedReceiver<Outbound>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_broadcast_reaches_every_connection_once() {
        let session = SessionId::new();
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.insert(ConnectionId::new(1), teacher_identity(session), tx1);
        let (_, student) = student_identity(session);
        registry.insert(ConnectionId::new(2), student, tx2);

        registry.broadcast(ServerMessage::Pong);

        assert_eq!(rx1.try_recv().unwrap(), Outbound::Event(ServerMessage::Pong));
        assert_eq!(rx2.try_recv().unwrap(), Outbound::Event(ServerMessage::Pong));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_role_splits_by_role() {
        let session = SessionId::new();
        let mut registry = ConnectionRegistry::new();
        let (tx1, mut rx_teacher) = channel();
        let (tx2, mut rx_student) = channel();
        registry.insert(ConnectionId::new(1), teacher_identity(session), tx1);
        let (_, student) = student_identity(session);
        registry.insert(ConnectionId::new(2), student, tx2);

        let teacher_msg = ServerMessage::Ack {
            client_msg_id: Some("teacher".into()),
        };
        let student_msg = ServerMessage::Ack {
            client_msg_id: Some("student".into()),
        };
        registry.broadcast_role(teacher_msg.clone(), student_msg.clone());

        assert_eq!(rx_teacher.try_recv().unwrap(), Outbound::Event(teacher_msg));
        assert_eq!(rx_student.try_recv().unwrap(), Outbound::Event(student_msg));
    }

    #[test]
    fn test_send_to_unknown_connection_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        registry.send(ConnectionId::new(99), ServerMessage::Pong);
    }

    #[test]
    fn test_close_sends_close_and_forgets_the_connection() {
        let session = SessionId::new();
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        let conn = ConnectionId::new(1);
        registry.insert(conn, teacher_identity(session), tx);

        registry.close(conn, 1008);

        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(1008));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_connections_of_student_finds_all_their_devices() {
        let session = SessionId::new();
        let mut registry = ConnectionRegistry::new();
        let (sid, identity) = student_identity(session);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.insert(ConnectionId::new(1), identity.clone(), tx1);
        registry.insert(ConnectionId::new(2), identity, tx2);

        let mut conns = registry.connections_of_student(sid);
        conns.sort_by_key(|c| c.into_inner());
        assert_eq!(conns, vec![ConnectionId::new(1), ConnectionId::new(2)]);
        assert!(registry.student_connected(sid));
        assert!(!registry.student_connected(StudentId::new()));
    }

    #[test]
    fn test_dropped_receiver_does_not_break_broadcast() {
        let session = SessionId::new();
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = channel();
        drop(rx);
        registry.insert(ConnectionId::new(1), teacher_identity(session), tx);

        // Must not panic or error; the handler side is simply gone.
        registry.broadcast(ServerMessage::Pong);
    }
}
