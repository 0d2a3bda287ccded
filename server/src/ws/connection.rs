use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::chat::model::UserId;
use crate::ws::protocol::ServerFrame;

/// Process-unique id of one physical connection. A user id can map to many
/// of these over time, but only one is registered at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn from_agent_flag(is_agent: bool) -> Self {
        if is_agent {
            Self::Agent
        } else {
            Self::User
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

/// Hub-side view of a live connection: identity, the sending half of its
/// bounded outbound queue, and its shutdown token.
///
/// Cloning is cheap; every clone refers to the same queue and token.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    role: Role,
    outbound: mpsc::Sender<ServerFrame>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving half drained by the outbound pump.
    pub fn new(
        user_id: UserId,
        role: Role,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            user_id,
            role,
            outbound: tx,
            shutdown: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Frames that can be enqueued right now without dropping.
    pub fn free_slots(&self) -> usize {
        self.outbound.capacity()
    }

    /// Enqueue a frame without blocking. Returns false when the frame was
    /// dropped: the connection is closed or its queue is full.
    pub fn send(&self, frame: impl Into<ServerFrame>) -> bool {
        if self.is_closed() {
            tracing::debug!(
                conn = %self.id,
                user_id = self.user_id,
                "Dropping frame for closed connection"
            );
            return false;
        }

        match self.outbound.try_send(frame.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    conn = %self.id,
                    user_id = self.user_id,
                    "Outbound queue full, dropping frame (slow consumer)"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    conn = %self.id,
                    user_id = self.user_id,
                    "Outbound queue closed, dropping frame"
                );
                false
            }
        }
    }

    /// Ask both pumps to stop. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token the pumps watch; cancelled by `close` or by either pump exiting.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
