//! Backend seam between a connection and wherever the session lives

use crate::error::Result;
use crate::gateway::{Mutation, MutationGateway};
use crate::model::{Participant, Snapshot};
use crate::notify::{ChangeNotifier, MemoryNotifier, Subscription, SubscriptionHandle, Topic};
use crate::store::MemoryStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a connection needs from the shared side
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create the participant's vote row if absent; `true` if inserted
    async fn ensure_vote(&self, session_id: &str, participant: &Participant) -> Result<bool>;
    async fn snapshot(&self, session_id: &str) -> Result<Snapshot>;
    async fn apply(&self, mutation: Mutation) -> Result<()>;
    async fn subscribe(&self, topic: &Topic) -> Result<Subscription>;
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;
}

/// Backend in the same process as the store and notifier
#[derive(Clone)]
pub struct LocalBackend {
    gateway: MutationGateway,
    notifier: Arc<dyn ChangeNotifier>,
}

impl LocalBackend {
    pub fn new(gateway: MutationGateway, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { gateway, notifier }
    }

    /// Memory store replicating into a memory notifier
    pub fn in_memory(notifier: Arc<MemoryNotifier>) -> Self {
        let store = Arc::new(MemoryStore::with_notifier(Arc::clone(&notifier)));
        Self::new(MutationGateway::new(store), notifier)
    }

    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }
}

#[async_trait]
impl SessionBackend for LocalBackend {
    async fn ensure_vote(&self, session_id: &str, participant: &Participant) -> Result<bool> {
        self.gateway.ensure_vote(session_id, participant).await
    }

    async fn snapshot(&self, session_id: &str) -> Result<Snapshot> {
        self.gateway.snapshot(session_id).await
    }

    async fn apply(&self, mutation: Mutation) -> Result<()> {
        self.gateway.apply(&mutation).await
    }

    async fn subscribe(&self, topic: &Topic) -> Result<Subscription> {
        self.notifier.subscribe(topic).await
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.notifier.unsubscribe(handle).await
    }
}
