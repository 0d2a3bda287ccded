use crate::chat::model::{Message, UserId};
use crate::ws::connection::ConnectionId;

/// Where a session sits in its lifecycle. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    UnassignedDisconnected,
    UnassignedConnected,
    AssignedConnected,
    AssignedDisconnected,
}

/// One end-user's conversation. Lives for the whole process, across
/// reconnects and agent changes.
///
/// The transcript is a window over the newest `window` messages; older
/// ones stay in the store and are paged with the `history` command.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub user_id: UserId,
    /// Currently registered end-user connection, if any.
    pub user_conn: Option<ConnectionId>,
    /// Assigned agent's user id. Only ever set while that agent is registered.
    pub agent: Option<UserId>,
    transcript: Vec<Message>,
    window: usize,
}

impl Session {
    pub fn new(id: u64, user_id: UserId, transcript: Vec<Message>, window: usize) -> Self {
        let mut session = Self {
            id,
            user_id,
            user_conn: None,
            agent: None,
            transcript,
            window: window.max(1),
        };
        session.trim();
        session
    }

    pub fn state(&self) -> SessionState {
        match (self.agent.is_some(), self.user_conn.is_some()) {
            (false, false) => SessionState::UnassignedDisconnected,
            (false, true) => SessionState::UnassignedConnected,
            (true, true) => SessionState::AssignedConnected,
            (true, false) => SessionState::AssignedDisconnected,
        }
    }

    pub fn is_owned_by(&self, agent_id: UserId) -> bool {
        self.agent == Some(agent_id)
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn append(&mut self, message: Message) {
        self.transcript.push(message);
        self.trim();
    }

    fn trim(&mut self) {
        let excess = self.transcript.len().saturating_sub(self.window);
        if excess > 0 {
            self.transcript.drain(..excess);
        }
    }

    /// Id of the oldest persisted message in the transcript.
    pub fn oldest_id(&self) -> Option<u64> {
        self.transcript.iter().map(|m| m.id).find(|&id| id != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::model::UNASSIGNED;
    use crate::ws::connection::{ConnectionHandle, Role};

    fn message(id: u64, content: &str) -> Message {
        let mut m = Message::text(1, UNASSIGNED, content);
        m.id = id;
        m
    }

    #[test]
    fn test_state_follows_user_and_agent() {
        let (conn, _rx) = ConnectionHandle::new(1, Role::User, 1);
        let mut session = Session::new(1, 1, Vec::new(), 10);
        assert_eq!(session.state(), SessionState::UnassignedDisconnected);

        session.user_conn = Some(conn.id());
        assert_eq!(session.state(), SessionState::UnassignedConnected);

        session.agent = Some(50);
        assert_eq!(session.state(), SessionState::AssignedConnected);
        assert!(session.is_owned_by(50));
        assert!(!session.is_owned_by(51));

        session.user_conn = None;
        assert_eq!(session.state(), SessionState::AssignedDisconnected);
    }

    #[test]
    fn test_window_keeps_newest_messages() {
        let mut session = Session::new(1, 1, vec![message(5, "c"), message(6, "d")], 3);
        session.append(message(7, "e"));
        session.append(message(8, "f"));

        let contents: Vec<&str> = session.transcript().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["d", "e", "f"]);
        assert_eq!(session.oldest_id(), Some(6));
    }

    #[test]
    fn test_oversized_seed_is_trimmed() {
        let seed = (1..=5).map(|id| message(id, "old")).collect();
        let session = Session::new(1, 1, seed, 2);
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.oldest_id(), Some(4));
    }

    #[test]
    fn test_oldest_id_skips_unpersisted() {
        let session = Session::new(1, 1, vec![message(0, "failed write"), message(9, "ok")], 10);
        assert_eq!(session.oldest_id(), Some(9));
        assert_eq!(Session::new(2, 2, Vec::new(), 10).oldest_id(), None);
    }
}
