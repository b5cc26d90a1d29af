//! Data model - sessions, vote rows and participant identity

mod effort;

pub use effort::Effort;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One planning-poker round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Shareable, human-readable identifier
    pub session_id: String,

    /// User id of the participant who created the session
    pub host_id: Uuid,

    /// Whether efforts are shown to everyone
    pub votes_visible: bool,
}

impl Session {
    pub fn new(session_id: impl Into<String>, host_id: Uuid) -> Self {
        Self {
            session_id: session_id.into(),
            host_id,
            votes_visible: false,
        }
    }

    pub fn is_host(&self, user_id: Uuid) -> bool {
        self.host_id == user_id
    }
}

/// One participant's row within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub session_id: String,
    pub user_id: Uuid,
    pub username: String,

    /// `None` until the participant picks a card
    pub effort: Option<Effort>,
}

impl Vote {
    /// A fresh row for a participant who has not voted yet
    pub fn unvoted(session_id: impl Into<String>, participant: &Participant) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: participant.user_id,
            username: participant.username.clone(),
            effort: None,
        }
    }
}

/// Identity a client holds for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub username: String,
}

impl Participant {
    /// Mint a new identity with a random user id
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            username: username.into(),
        }
    }
}

/// Partial update of a session row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub votes_visible: Option<bool>,
}

impl SessionPatch {
    pub fn votes_visible(visible: bool) -> Self {
        Self {
            votes_visible: Some(visible),
        }
    }

    pub fn apply(&self, session: &mut Session) {
        if let Some(visible) = self.votes_visible {
            session.votes_visible = visible;
        }
    }
}

/// Authoritative read of a session and all of its vote rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session: Session,
    pub votes: Vec<Vote>,
}

impl Snapshot {
    /// The vote row belonging to `user_id`, if present
    pub fn vote_of(&self, user_id: Uuid) -> Option<&Vote> {
        self.votes.iter().find(|v| v.user_id == user_id)
    }

    pub fn vote_of_mut(&mut self, user_id: Uuid) -> Option<&mut Vote> {
        self.votes.iter_mut().find(|v| v.user_id == user_id)
    }

    /// Username of the host, if the host has joined
    pub fn hostname(&self) -> Option<&str> {
        self.vote_of(self.session.host_id)
            .map(|v| v.username.as_str())
    }

    /// True once every effort is null and votes are hidden
    pub fn is_cleared(&self) -> bool {
        !self.session.votes_visible && self.votes.iter().all(|v| v.effort.is_none())
    }
}

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "eager", "fancy", "gentle", "happy", "jolly", "kind", "lucky", "mighty",
    "nice", "proud", "quick", "silly", "swift", "witty",
];

const ANIMALS: &[&str] = &[
    "badger", "cat", "dolphin", "eagle", "ferret", "goose", "heron", "koala", "lemur", "mole",
    "otter", "panda", "quail", "rabbit", "seal", "walrus",
];

/// Generate a shareable session id such as `silly-goose-42`
pub fn generate_session_id() -> String {
    let entropy = Uuid::new_v4();
    let bytes = entropy.as_bytes();
    let adjective = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
    let animal = ANIMALS[bytes[1] as usize % ANIMALS.len()];
    let number = u16::from_be_bytes([bytes[2], bytes[3]]) % 100;
    format!("{}-{}-{}", adjective, animal, number)
}
