//! Mutation gateway - validates, authorizes and applies state changes
//!
//! Authorization is re-checked against a fresh read on every call; nothing
//! is cached between requests and no lock is held across them. Two hosts
//! toggling concurrently resolve last-write-wins.

use crate::error::{PokerError, Result};
use crate::model::{
    generate_session_id, Effort, Participant, Session, SessionPatch, Snapshot, Vote,
};
use crate::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Attempts at finding an unused generated session id
const SESSION_ID_ATTEMPTS: usize = 8;

/// A state-changing operation with its typed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    CastVote { effort: Effort },
    ToggleVisibility,
    ClearVotes,
}

impl Action {
    pub fn requires_host(&self) -> bool {
        matches!(self, Action::ToggleVisibility | Action::ClearVotes)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::CastVote { .. } => "cast_vote",
            Action::ToggleVisibility => "toggle_visibility",
            Action::ClearVotes => "clear_votes",
        }
    }
}

/// An action performed by a participant on a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub session_id: String,
    pub acting_user_id: Uuid,
    pub action: Action,
}

/// Guards every write to the session store
#[derive(Clone)]
pub struct MutationGateway {
    store: Arc<dyn SessionStore>,
}

impl MutationGateway {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Open a new session hosted by a freshly minted participant
    pub async fn create_session(&self, username: &str) -> Result<(Session, Participant)> {
        let username = validate_username(username)?;
        let host = Participant::new(username);

        for _ in 0..SESSION_ID_ATTEMPTS {
            let session_id = generate_session_id();
            match self.store.get_session(&session_id).await {
                Ok(_) => continue,
                Err(e) if e.is_not_found() => {
                    let session = self
                        .store
                        .insert_session(Session::new(session_id, host.user_id))
                        .await?;
                    tracing::info!(
                        "Created session {} hosted by {}",
                        session.session_id,
                        host.username
                    );
                    return Ok((session, host));
                }
                Err(e) => return Err(e),
            }
        }

        Err(PokerError::StoreFailure(
            "could not allocate an unused session id".to_string(),
        ))
    }

    /// Mint an identity for someone joining an existing session
    pub async fn join_session(&self, session_id: &str, username: &str) -> Result<Participant> {
        let username = validate_username(username)?;
        self.store.get_session(session_id).await?;
        let participant = Participant::new(username);
        tracing::info!("{} joined session {}", participant.username, session_id);
        Ok(participant)
    }

    /// Create the participant's vote row unless it already exists
    ///
    /// Returns `true` when a row was inserted.
    pub async fn ensure_vote(&self, session_id: &str, participant: &Participant) -> Result<bool> {
        self.store.get_session(session_id).await?;

        match self.store.get_vote(participant.user_id).await {
            Ok(existing) if existing.session_id == session_id => Ok(false),
            Ok(existing) => Err(PokerError::Invalid(format!(
                "user {} already belongs to session {}",
                participant.user_id, existing.session_id
            ))),
            Err(e) if e.is_not_found() => {
                self.store
                    .insert_vote(Vote::unvoted(session_id, participant))
                    .await?;
                tracing::debug!(
                    "Inserted vote row for {} in {}",
                    participant.username,
                    session_id
                );
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Session row and every vote row of the session
    pub async fn snapshot(&self, session_id: &str) -> Result<Snapshot> {
        let session = self.store.get_session(session_id).await?;
        let votes = self.store.list_votes(session_id).await?;
        Ok(Snapshot { session, votes })
    }

    /// Dispatch a validated mutation
    pub async fn apply(&self, mutation: &Mutation) -> Result<()> {
        let result = match &mutation.action {
            Action::CastVote { effort } => {
                self.cast_vote(&mutation.session_id, mutation.acting_user_id, *effort)
                    .await
            }
            Action::ToggleVisibility => {
                self.reveal_or_hide(&mutation.session_id, mutation.acting_user_id)
                    .await
                    .map(|_| ())
            }
            Action::ClearVotes => {
                self.clear_votes(&mutation.session_id, mutation.acting_user_id)
                    .await
            }
        };

        if let Err(e) = &result {
            tracing::warn!(
                "Rejected {} on {} by {}: {}",
                mutation.action.name(),
                mutation.session_id,
                mutation.acting_user_id,
                e
            );
        }
        result
    }

    /// Overwrite the participant's effort; no host check
    pub async fn cast_vote(&self, session_id: &str, user_id: Uuid, effort: Effort) -> Result<()> {
        let vote = self.store.get_vote(user_id).await?;
        if vote.session_id != session_id {
            return Err(PokerError::not_found("vote", user_id));
        }
        self.store.update_vote(user_id, Some(effort)).await
    }

    /// Flip `votes_visible`; host only. Returns the new value.
    pub async fn reveal_or_hide(&self, session_id: &str, acting_user_id: Uuid) -> Result<bool> {
        let session = self.authorize_host(session_id, acting_user_id).await?;
        let visible = !session.votes_visible;
        self.store
            .update_session(session_id, SessionPatch::votes_visible(visible))
            .await?;
        Ok(visible)
    }

    /// Null every effort and hide votes; host only
    ///
    /// Both writes are issued together. A failure of either is reported
    /// without undoing the other; re-running the clear is idempotent.
    pub async fn clear_votes(&self, session_id: &str, acting_user_id: Uuid) -> Result<()> {
        self.authorize_host(session_id, acting_user_id).await?;

        let (votes, session) = tokio::join!(
            self.store.clear_efforts(session_id),
            self.store
                .update_session(session_id, SessionPatch::votes_visible(false)),
        );

        match (votes, session) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), _) | (_, Err(e)) => Err(PokerError::StoreFailure(format!(
                "clear_votes partially applied, retry: {}",
                e
            ))),
        }
    }

    async fn authorize_host(&self, session_id: &str, acting_user_id: Uuid) -> Result<Session> {
        let session = self.store.get_session(session_id).await?;
        if !session.is_host(acting_user_id) {
            return Err(PokerError::Unauthorized(format!(
                "only the host of {} may do this",
                session_id
            )));
        }
        Ok(session)
    }
}

fn validate_username(username: &str) -> Result<&str> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(PokerError::Invalid("username must not be empty".to_string()));
    }
    Ok(trimmed)
}
