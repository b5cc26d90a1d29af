//! Session store - the single source of truth for sessions and votes

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{Effort, Session, SessionPatch, Vote};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence contract for the two record sets
///
/// Reads are by primary key or by `session_id` equality. There is no
/// uniqueness constraint on vote rows; callers check before inserting.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<Session>;
    async fn get_session(&self, session_id: &str) -> Result<Session>;
    async fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<()>;

    async fn get_vote(&self, user_id: Uuid) -> Result<Vote>;
    async fn list_votes(&self, session_id: &str) -> Result<Vec<Vote>>;
    async fn insert_vote(&self, vote: Vote) -> Result<Vote>;
    async fn update_vote(&self, user_id: Uuid, effort: Option<Effort>) -> Result<()>;

    /// Set every effort of a session back to null
    async fn clear_efforts(&self, session_id: &str) -> Result<()>;
}
