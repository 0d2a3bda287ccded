//! Session router.
//!
//! `Hub` is the single owner of the connection registry, the per-user
//! sessions, the waiting queue and the agent worklists. It is driven by
//! `HubEvent`s from one ordered queue and runs on its own thread, so every
//! mutation is applied in arrival order and nothing else ever touches the
//! state. Outbound delivery goes through `ConnectionHandle::send`, which never
//! blocks.
//!
//! Replays are cut to what fits in the receiving queue, keeping the newest
//! messages and one slot for the control response that follows.
//!
//! Waiting queue invariant: a user id is waiting iff its session exists and
//! has no agent. The one exception is an explicit `close`, which unassigns
//! without re-queueing; the user re-enters the queue on their next message or
//! reconnect.

use indexmap::IndexSet;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chat::model::{Message, UserId, UNASSIGNED};
use crate::chat::store::MessageStore;
use crate::ws::connection::{ConnectionHandle, ConnectionId, Role};
use crate::ws::protocol::{
    self, AgentCommand, AgentFrame, AgentMessage, ServerFrame, ServerResponse, MAX_HISTORY_PAGE,
};
use crate::ws::session::Session;

const NO_ACTIVE_SESSION: &str = "No active session with this user";

#[derive(Debug)]
pub enum HubEvent {
    Register(ConnectionHandle),
    Unregister {
        conn_id: ConnectionId,
        user_id: UserId,
    },
    Route {
        conn_id: ConnectionId,
        user_id: UserId,
        frame: String,
    },
}

pub struct Hub {
    store: Arc<dyn MessageStore>,
    /// Messages seeded into a new session's transcript, and its window size.
    history_limit: usize,
    /// Live connection per user id (end-users and agents alike).
    connections: HashMap<UserId, ConnectionHandle>,
    /// Keyed by end-user id.
    sessions: HashMap<UserId, Session>,
    waiting: IndexSet<UserId>,
    /// Agent id -> end-user ids whose sessions it owns.
    worklists: HashMap<UserId, Vec<UserId>>,
    next_session_id: u64,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
            connections: HashMap::new(),
            sessions: HashMap::new(),
            waiting: IndexSet::new(),
            worklists: HashMap::new(),
            next_session_id: 0,
        }
    }

    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(conn) => self.register(conn),
            HubEvent::Unregister { conn_id, user_id } => self.unregister(conn_id, user_id),
            HubEvent::Route {
                conn_id,
                user_id,
                frame,
            } => self.route_inbound(conn_id, user_id, &frame),
        }
    }

    /// Attach a freshly established connection.
    ///
    /// A previous connection for the same user id is closed and evicted first.
    /// End-users get their session (created and seeded on first contact) and
    /// a replay of its transcript.
    pub fn register(&mut self, conn: ConnectionHandle) {
        let user_id = conn.user_id();

        if let Some(previous) = self.connections.remove(&user_id) {
            tracing::info!(
                user_id = user_id,
                old_conn = %previous.id(),
                new_conn = %conn.id(),
                "Superseding existing connection"
            );
            self.detach(previous, true);
        }

        self.connections.insert(user_id, conn.clone());
        tracing::info!(
            user_id = user_id,
            conn = %conn.id(),
            role = conn.role().as_str(),
            "Connection registered"
        );

        if conn.role().is_agent() {
            return;
        }

        self.ensure_session(user_id);
        let Some(session) = self.sessions.get_mut(&user_id) else {
            return;
        };
        session.user_conn = Some(conn.id());
        if session.agent.is_none() {
            self.waiting.insert(user_id);
        }

        replay(&conn, session.transcript());

        if let Some(agent) = session.agent.and_then(|id| self.connections.get(&id)) {
            agent.send(ServerResponse::event(
                "User reconnected",
                "user_reconnected",
                user_id,
            ));
        }
    }

    /// Drop a connection. No-op unless `conn_id` is the registered connection
    /// for `user_id`.
    pub fn unregister(&mut self, conn_id: ConnectionId, user_id: UserId) {
        let is_current = self
            .connections
            .get(&user_id)
            .is_some_and(|current| current.id() == conn_id);
        if !is_current {
            tracing::debug!(
                user_id = user_id,
                conn = %conn_id,
                "Ignoring unregister for connection that is not registered"
            );
            return;
        }

        let Some(conn) = self.connections.remove(&user_id) else {
            return;
        };
        tracing::info!(
            user_id = user_id,
            conn = %conn_id,
            role = conn.role().as_str(),
            "Connection unregistered"
        );
        self.detach(conn, false);
    }

    /// Dispatch one inbound text frame by the sender's role.
    pub fn route_inbound(&mut self, conn_id: ConnectionId, user_id: UserId, frame: &str) {
        let conn = match self.connections.get(&user_id) {
            Some(current) if current.id() == conn_id => current.clone(),
            _ => {
                tracing::debug!(
                    user_id = user_id,
                    conn = %conn_id,
                    "Dropping frame from connection that is not registered"
                );
                return;
            }
        };

        match conn.role() {
            Role::User => self.handle_user_frame(&conn, frame),
            Role::Agent => self.handle_agent_frame(&conn, frame),
        }
    }

    /// Waiting end-user ids in arrival order.
    pub fn waiting_users(&self) -> Vec<UserId> {
        self.waiting.iter().copied().collect()
    }

    pub fn is_waiting(&self, user_id: UserId) -> bool {
        self.waiting.contains(&user_id)
    }

    pub fn session(&self, user_id: UserId) -> Option<&Session> {
        self.sessions.get(&user_id)
    }

    pub fn connection(&self, user_id: UserId) -> Option<&ConnectionHandle> {
        self.connections.get(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn worklist(&self, agent_id: UserId) -> &[UserId] {
        self.worklists
            .get(&agent_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Release everything that referenced `conn`, which is already out of the
    /// registry. A superseded end-user connection does not notify the agent:
    /// the user is still online.
    fn detach(&mut self, conn: ConnectionHandle, superseded: bool) {
        conn.close();
        let user_id = conn.user_id();

        match conn.role() {
            Role::Agent => self.release_agent(user_id),
            Role::User => {
                let Some(session) = self.sessions.get_mut(&user_id) else {
                    return;
                };
                if session.user_conn == Some(conn.id()) {
                    session.user_conn = None;
                }
                if superseded {
                    return;
                }
                if let Some(agent) = session.agent.and_then(|id| self.connections.get(&id)) {
                    agent.send(ServerResponse::event(
                        "User disconnected",
                        "user_disconnected",
                        user_id,
                    ));
                }
            }
        }
    }

    /// Return every session owned by `agent_id` to the waiting queue.
    fn release_agent(&mut self, agent_id: UserId) {
        let worklist = self.worklists.remove(&agent_id).unwrap_or_default();
        let mut released = 0usize;

        for user_id in worklist {
            let Some(session) = self.sessions.get_mut(&user_id) else {
                continue;
            };
            if !session.is_owned_by(agent_id) {
                continue;
            }
            session.agent = None;
            self.waiting.insert(user_id);
            released += 1;

            if let Some(user) = self.connections.get(&user_id) {
                user.send(ServerResponse::event(
                    "Manager disconnected",
                    "manager_disconnected",
                    user_id,
                ));
            }
        }

        if released > 0 {
            tracing::info!(
                agent_id = agent_id,
                released = released,
                "Agent sessions returned to waiting queue"
            );
        }
    }

    fn ensure_session(&mut self, user_id: UserId) {
        if self.sessions.contains_key(&user_id) {
            return;
        }

        let transcript = match self.store.last_messages(user_id, self.history_limit) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(
                    user_id = user_id,
                    error = %e,
                    "Failed to load message history, starting with empty transcript"
                );
                Vec::new()
            }
        };

        self.next_session_id += 1;
        let session = Session::new(self.next_session_id, user_id, transcript, self.history_limit);
        tracing::info!(
            user_id = user_id,
            session_id = session.id,
            history = session.transcript().len(),
            "Session created"
        );
        self.sessions.insert(user_id, session);
    }

    fn handle_user_frame(&mut self, conn: &ConnectionHandle, frame: &str) {
        let input = match protocol::parse_user_frame(frame) {
            Ok(input) => input,
            Err(e) => {
                conn.send(ServerResponse::error(e.to_string()));
                return;
            }
        };

        let user_id = conn.user_id();
        self.ensure_session(user_id);

        let to_id = self
            .sessions
            .get(&user_id)
            .and_then(|s| s.agent)
            .unwrap_or(UNASSIGNED);

        let mut message = Message::new(user_id, to_id, input.content, input.kind, input.file_name);
        persist(self.store.as_ref(), &mut message);

        if let Some(session) = self.sessions.get_mut(&user_id) {
            session.append(message.clone());
        }

        if to_id == UNASSIGNED {
            self.waiting.insert(user_id);
        } else {
            self.deliver(to_id, message.clone());
        }

        // Echo back so the sender sees the stored id and timestamp
        conn.send(message);
    }

    fn handle_agent_frame(&mut self, agent: &ConnectionHandle, frame: &str) {
        match protocol::parse_agent_frame(frame) {
            Ok(AgentFrame::Command(command)) => match command {
                AgentCommand::Take { user_id } => self.take(agent, user_id),
                AgentCommand::List => self.list_waiting(agent),
                AgentCommand::Close { user_id } => self.close(agent, user_id),
                AgentCommand::Sessions => self.list_sessions(agent),
                AgentCommand::History {
                    user_id,
                    before_id,
                    limit,
                } => self.history(agent, user_id, before_id, limit),
            },
            Ok(AgentFrame::Message(message)) => self.agent_message(agent, message),
            Err(e) => {
                tracing::debug!(
                    agent_id = agent.user_id(),
                    error = %e,
                    "Rejected agent frame"
                );
                agent.send(ServerResponse::error(e.to_string()));
            }
        }
    }

    fn take(&mut self, agent: &ConnectionHandle, user_id: UserId) {
        let agent_id = agent.user_id();

        if !self.waiting.contains(&user_id) {
            agent.send(ServerResponse::error(format!("User {user_id} is not waiting.")));
            return;
        }
        let Some(session) = self.sessions.get_mut(&user_id) else {
            agent.send(ServerResponse::error(format!(
                "Session for user {user_id} not found."
            )));
            return;
        };

        session.agent = Some(agent_id);
        self.waiting.shift_remove(&user_id);
        self.worklists.entry(agent_id).or_default().push(user_id);

        replay(agent, session.transcript());
        agent.send(ServerResponse::success(
            format!("Session {} started with user {}", session.id, user_id),
            Some(json!({ "session_id": session.id, "user_id": user_id })),
        ));

        if let Some(user) = self.connections.get(&user_id) {
            user.send(ServerResponse::event(
                "A manager has joined your chat.",
                "manager_joined",
                user_id,
            ));
        }

        tracing::info!(
            agent_id = agent_id,
            user_id = user_id,
            session_id = session.id,
            "Agent took session"
        );
    }

    fn list_waiting(&self, agent: &ConnectionHandle) {
        let waiting = self.waiting_users();
        let message = if waiting.is_empty() {
            "No users waiting."
        } else {
            "Waiting users list."
        };
        agent.send(ServerResponse::success(message, Some(json!(waiting))));
    }

    fn close(&mut self, agent: &ConnectionHandle, user_id: UserId) {
        let agent_id = agent.user_id();

        let Some(session) = self
            .sessions
            .get_mut(&user_id)
            .filter(|s| s.is_owned_by(agent_id))
        else {
            agent.send(ServerResponse::error("Cannot close this session."));
            return;
        };

        session.agent = None;
        if let Some(worklist) = self.worklists.get_mut(&agent_id) {
            worklist.retain(|&u| u != user_id);
            if worklist.is_empty() {
                self.worklists.remove(&agent_id);
            }
        }

        agent.send(ServerResponse::success(
            "Session closed.",
            Some(json!({ "user_id": user_id })),
        ));
        if let Some(user) = self.connections.get(&user_id) {
            user.send(ServerResponse::event(
                "The manager has closed this chat.",
                "session_closed",
                user_id,
            ));
        }

        tracing::info!(agent_id = agent_id, user_id = user_id, "Agent closed session");
    }

    fn list_sessions(&self, agent: &ConnectionHandle) {
        let sessions: Vec<Value> = self
            .worklist(agent.user_id())
            .iter()
            .filter_map(|user_id| self.sessions.get(user_id))
            .map(|s| {
                json!({
                    "user_id": s.user_id,
                    "session_id": s.id,
                    "online": s.user_conn.is_some(),
                })
            })
            .collect();
        agent.send(ServerResponse::success(
            "Active sessions",
            Some(Value::Array(sessions)),
        ));
    }

    /// Page older messages of an owned session out of the store. Without a
    /// cursor, paging starts at the oldest message in the transcript.
    fn history(
        &self,
        agent: &ConnectionHandle,
        user_id: UserId,
        before_id: Option<u64>,
        limit: Option<usize>,
    ) {
        let agent_id = agent.user_id();
        let limit = limit
            .unwrap_or(self.history_limit)
            .clamp(1, MAX_HISTORY_PAGE);

        let Some(session) = self
            .sessions
            .get(&user_id)
            .filter(|s| s.is_owned_by(agent_id))
        else {
            agent.send(ServerResponse::error(NO_ACTIVE_SESSION));
            return;
        };

        let Some(before) = before_id.or(session.oldest_id()) else {
            agent.send(ServerResponse::success("History loaded.", Some(json!([]))));
            return;
        };

        match self.store.messages_before(user_id, before, limit) {
            Ok(older) => {
                let payload = serde_json::to_value(&older).ok();
                agent.send(ServerResponse::success("History loaded.", payload));
            }
            Err(e) => {
                tracing::error!(
                    user_id = user_id,
                    error = %e,
                    "Failed to load older messages"
                );
                agent.send(ServerResponse::error("Failed to load history"));
            }
        }
    }

    fn agent_message(&mut self, agent: &ConnectionHandle, input: AgentMessage) {
        let agent_id = agent.user_id();
        let user_id = input.user_id;

        let Some(session) = self
            .sessions
            .get_mut(&user_id)
            .filter(|s| s.is_owned_by(agent_id))
        else {
            agent.send(ServerResponse::error(NO_ACTIVE_SESSION));
            return;
        };

        let mut message = Message::new(agent_id, user_id, input.content, input.kind, input.file_name);
        persist(self.store.as_ref(), &mut message);
        session.append(message.clone());

        if !self.deliver(user_id, message) {
            tracing::debug!(
                agent_id = agent_id,
                user_id = user_id,
                "End-user offline, message stored only"
            );
        }
    }

    /// Enqueue onto the registered connection of `user_id`, if any.
    fn deliver(&self, user_id: UserId, frame: impl Into<ServerFrame>) -> bool {
        self.connections
            .get(&user_id)
            .is_some_and(|conn| conn.send(frame))
    }
}

/// Enqueue the newest messages of `transcript` that fit in `conn`'s queue,
/// in order, leaving one slot free.
fn replay(conn: &ConnectionHandle, transcript: &[Message]) {
    let room = conn.free_slots().saturating_sub(1);
    let skip = transcript.len().saturating_sub(room);
    if skip > 0 {
        tracing::warn!(
            conn = %conn.id(),
            user_id = conn.user_id(),
            skipped = skip,
            "Transcript larger than outbound queue, replaying newest messages only"
        );
    }
    for message in &transcript[skip..] {
        conn.send(message.clone());
    }
}

/// Persistence is best effort: a failed write is logged and routing goes on.
fn persist(store: &dyn MessageStore, message: &mut Message) {
    if let Err(e) = store.save(message) {
        tracing::error!(
            from_id = message.from_id,
            to_id = message.to_id,
            error = %e,
            "Failed to save message"
        );
    }
}

/// Cloneable sending side of the hub's event queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub async fn register(&self, conn: ConnectionHandle) {
        self.dispatch(HubEvent::Register(conn)).await;
    }

    pub async fn unregister(&self, conn_id: ConnectionId, user_id: UserId) {
        self.dispatch(HubEvent::Unregister { conn_id, user_id }).await;
    }

    pub async fn route(&self, conn_id: ConnectionId, user_id: UserId, frame: String) {
        self.dispatch(HubEvent::Route {
            conn_id,
            user_id,
            frame,
        })
        .await;
    }

    async fn dispatch(&self, event: HubEvent) {
        if self.events.send(event).await.is_err() {
            tracing::error!("Chat hub is not running, event dropped");
        }
    }
}

/// Move `hub` onto its own thread and return the handle that feeds it.
///
/// The thread blocks only on the event queue and exits once every
/// `HubHandle` has been dropped.
pub fn spawn(hub: Hub, queue_capacity: usize) -> std::io::Result<HubHandle> {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    std::thread::Builder::new()
        .name("chat-hub".to_string())
        .spawn(move || run(hub, rx))?;
    Ok(HubHandle { events: tx })
}

fn run(mut hub: Hub, mut events: mpsc::Receiver<HubEvent>) {
    tracing::info!("Chat hub started");
    while let Some(event) = events.blocking_recv() {
        hub.handle(event);
    }
    tracing::info!(sessions = hub.sessions.len(), "Chat hub stopped");
}
