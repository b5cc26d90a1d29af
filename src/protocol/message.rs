//! Message types for the poker protocol

use crate::error::PokerError;
use crate::gateway::Mutation;
use crate::model::{Participant, Session, Snapshot};
use crate::notify::ChangeEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake with protocol version
    Hello { protocol_version: u32 },

    /// A request expecting exactly one `Reply` with the same id
    Request { id: u64, request: Request },
}

/// Operations a client can ask the server to perform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Open a new session hosted by `username`
    CreateSession { username: String },

    /// Mint an identity in an existing session
    JoinSession { session_id: String, username: String },

    /// Create the participant's vote row if absent
    EnsureVote {
        session_id: String,
        participant: Participant,
    },

    /// Read the session and all its votes
    Snapshot { session_id: String },

    /// Apply a mutation through the gateway
    Mutate(Mutation),

    /// Start forwarding change events for a topic, tagged with this request's id
    Subscribe { topic: String },

    /// Stop a subscription opened by an earlier `Subscribe` request
    Unsubscribe { subscription: u64 },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateSession { .. } => "CreateSession",
            Request::JoinSession { .. } => "JoinSession",
            Request::EnsureVote { .. } => "EnsureVote",
            Request::Snapshot { .. } => "Snapshot",
            Request::Mutate(_) => "Mutate",
            Request::Subscribe { .. } => "Subscribe",
            Request::Unsubscribe { .. } => "Unsubscribe",
        }
    }
}

/// Successful outcome of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Created {
        session: Session,
        participant: Participant,
    },
    Joined(Participant),
    VoteRow { inserted: bool },
    Snapshot(Snapshot),
    Subscribed,
    Done,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake response
    Welcome {
        server_id: Uuid,
        protocol_version: u32,
        started_at: i64,
    },

    /// Outcome of the request with the same id
    Reply {
        id: u64,
        result: Result<Reply, PokerError>,
    },

    /// Change event for the subscription opened by request `subscription`
    Change {
        subscription: u64,
        event: ChangeEvent,
    },

    /// Error not tied to a request (e.g. an undecodable frame)
    Error { message: String },
}
