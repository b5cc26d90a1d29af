//! Read-only view model handed to presentation layers

use crate::model::Effort;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of one client's reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Waiting for the first snapshot
    Initializing,
    /// View mirrors the last snapshot
    Synced,
    /// A local edit is shown ahead of confirmation
    Optimistic,
    /// Subscriptions released; nothing more is processed
    Closed,
}

/// Everything a client needs to render a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewModel {
    pub session_id: String,
    pub state: SyncState,

    /// Effort per participant, `None` meaning not voted
    pub votes_by_username: BTreeMap<String, Option<Effort>>,
    pub hostname: Option<String>,
    pub local_username: Option<String>,
    pub is_host: bool,
    pub votes_visible: bool,

    /// The local participant's submitted effort awaiting confirmation
    pub optimistic_effort: Option<Effort>,

    /// Bumped whenever the local input must be reset (external clear)
    pub input_epoch: u64,

    /// Last unrecovered error, shown until dismissed
    pub notice: Option<String>,
}

impl ViewModel {
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SyncState::Initializing,
            votes_by_username: BTreeMap::new(),
            hostname: None,
            local_username: None,
            is_host: false,
            votes_visible: false,
            optimistic_effort: None,
            input_epoch: 0,
            notice: None,
        }
    }

    /// The local participant's effort as currently displayed
    pub fn local_effort(&self) -> Option<Effort> {
        self.local_username
            .as_ref()
            .and_then(|name| self.votes_by_username.get(name).copied().flatten())
    }

    pub fn is_optimistic(&self) -> bool {
        self.state == SyncState::Optimistic
    }

    /// How many participants have picked a card
    pub fn voted_count(&self) -> usize {
        self.votes_by_username.values().filter(|e| e.is_some()).count()
    }
}
