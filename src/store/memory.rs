//! In-memory store with change replication to a notifier

use super::SessionStore;
use crate::error::{PokerError, Result};
use crate::model::{Effort, Session, SessionPatch, Vote};
use crate::notify::{ChangeEvent, MemoryNotifier, Row};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    votes: HashMap<Uuid, Vote>,
}

/// Store backed by two hash maps
///
/// Every committed write is published to the attached notifier after the
/// table lock is released, mirroring a database with realtime replication.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    notifier: Option<Arc<MemoryNotifier>>,
}

impl MemoryStore {
    /// Store without change replication
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            notifier: None,
        }
    }

    /// Store that publishes every write to `notifier`
    pub fn with_notifier(notifier: Arc<MemoryNotifier>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            notifier: Some(notifier),
        }
    }

    async fn publish(&self, events: Vec<ChangeEvent>) {
        if let Some(notifier) = &self.notifier {
            for event in events {
                notifier.publish(event).await;
            }
        }
    }

    /// Number of vote rows across all sessions
    pub async fn vote_count(&self) -> usize {
        self.tables.read().await.votes.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: Session) -> Result<Session> {
        {
            let mut tables = self.tables.write().await;
            if tables.sessions.contains_key(&session.session_id) {
                return Err(PokerError::StoreFailure(format!(
                    "duplicate key: session '{}' already exists",
                    session.session_id
                )));
            }
            tables
                .sessions
                .insert(session.session_id.clone(), session.clone());
        }
        self.publish(vec![ChangeEvent::insert(Row::Session(session.clone()))])
            .await;
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.tables
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| PokerError::not_found("session", session_id))
    }

    async fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        let updated = {
            let mut tables = self.tables.write().await;
            let session = tables
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| PokerError::not_found("session", session_id))?;
            patch.apply(session);
            session.clone()
        };
        self.publish(vec![ChangeEvent::update(Row::Session(updated))])
            .await;
        Ok(())
    }

    async fn get_vote(&self, user_id: Uuid) -> Result<Vote> {
        self.tables
            .read()
            .await
            .votes
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PokerError::not_found("vote", user_id))
    }

    async fn list_votes(&self, session_id: &str) -> Result<Vec<Vote>> {
        let tables = self.tables.read().await;
        let mut votes: Vec<Vote> = tables
            .votes
            .values()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(votes)
    }

    async fn insert_vote(&self, vote: Vote) -> Result<Vote> {
        {
            let mut tables = self.tables.write().await;
            if tables.votes.contains_key(&vote.user_id) {
                return Err(PokerError::StoreFailure(format!(
                    "duplicate key: vote for user {} already exists",
                    vote.user_id
                )));
            }
            tables.votes.insert(vote.user_id, vote.clone());
        }
        self.publish(vec![ChangeEvent::insert(Row::Vote(vote.clone()))])
            .await;
        Ok(vote)
    }

    async fn update_vote(&self, user_id: Uuid, effort: Option<Effort>) -> Result<()> {
        let updated = {
            let mut tables = self.tables.write().await;
            let vote = tables
                .votes
                .get_mut(&user_id)
                .ok_or_else(|| PokerError::not_found("vote", user_id))?;
            vote.effort = effort;
            vote.clone()
        };
        self.publish(vec![ChangeEvent::update(Row::Vote(updated))])
            .await;
        Ok(())
    }

    async fn clear_efforts(&self, session_id: &str) -> Result<()> {
        let updated: Vec<ChangeEvent> = {
            let mut tables = self.tables.write().await;
            tables
                .votes
                .values_mut()
                .filter(|v| v.session_id == session_id)
                .map(|v| {
                    v.effort = None;
                    ChangeEvent::update(Row::Vote(v.clone()))
                })
                .collect()
        };
        self.publish(updated).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;
    use crate::notify::{ChangeNotifier, Operation, Table, Topic};

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_session("nope").await.unwrap_err().is_not_found());
        assert!(store
            .get_vote(Uuid::new_v4())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .update_vote(Uuid::new_v4(), Some(Effort::One))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_clear_efforts_only_touches_one_session() {
        let store = MemoryStore::new();
        let a = Participant::new("ada");
        let b = Participant::new("bob");
        store.insert_vote(Vote::unvoted("s1", &a)).await.unwrap();
        store.insert_vote(Vote::unvoted("s2", &b)).await.unwrap();
        store.update_vote(a.user_id, Some(Effort::Three)).await.unwrap();
        store.update_vote(b.user_id, Some(Effort::Eight)).await.unwrap();

        store.clear_efforts("s1").await.unwrap();

        assert_eq!(store.get_vote(a.user_id).await.unwrap().effort, None);
        assert_eq!(
            store.get_vote(b.user_id).await.unwrap().effort,
            Some(Effort::Eight)
        );
    }

    #[tokio::test]
    async fn test_writes_are_replicated() {
        let notifier = Arc::new(MemoryNotifier::new(8));
        let store = MemoryStore::with_notifier(Arc::clone(&notifier));
        let mut sub = notifier
            .subscribe(&Topic::for_session(Table::Votes, "s1"))
            .await
            .unwrap();

        let p = Participant::new("ada");
        store.insert_vote(Vote::unvoted("s1", &p)).await.unwrap();
        store.update_vote(p.user_id, Some(Effort::Two)).await.unwrap();

        let first = sub.events.recv().await.unwrap();
        let second = sub.events.recv().await.unwrap();
        assert_eq!(first.operation, Operation::Insert);
        assert_eq!(second.operation, Operation::Update);
        match second.row {
            Row::Vote(v) => assert_eq!(v.effort, Some(Effort::Two)),
            other => panic!("expected vote row, got {:?}", other),
        }
    }
}
