//! In-process notifier - fans change events out to topic subscribers

use super::{ChangeEvent, ChangeNotifier, Subscription, SubscriptionHandle, Topic};
use crate::error::{PokerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

struct Subscriber {
    topic: Topic,
    sender: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct NotifierState {
    next_handle: u64,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
}

/// Best-effort notifier living in the same process as the store
pub struct MemoryNotifier {
    state: Mutex<NotifierState>,

    /// Per-subscription buffer; events beyond it are dropped
    buffer: usize,
}

impl MemoryNotifier {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: Mutex::new(NotifierState::default()),
            buffer: buffer.max(1),
        }
    }

    /// Deliver an event to every subscriber whose topic matches
    pub async fn publish(&self, event: ChangeEvent) {
        let mut state = self.state.lock().await;
        let mut closed = Vec::new();

        for (handle, subscriber) in state.subscribers.iter() {
            if !subscriber.topic.matches(&event) {
                continue;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Dropping change event for {} (subscription {:?} is full)",
                        subscriber.topic,
                        handle
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*handle),
            }
        }

        for handle in closed {
            tracing::debug!("Pruning closed subscription {:?}", handle);
            state.subscribers.remove(&handle);
        }
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl ChangeNotifier for MemoryNotifier {
    async fn subscribe(&self, topic: &Topic) -> Result<Subscription> {
        let (sender, events) = mpsc::channel(self.buffer);
        let mut state = self.state.lock().await;
        state.next_handle += 1;
        let handle = SubscriptionHandle(state.next_handle);
        state.subscribers.insert(
            handle,
            Subscriber {
                topic: topic.clone(),
                sender,
            },
        );
        tracing::debug!("Subscribed {:?} to {}", handle, topic);

        Ok(Subscription {
            handle,
            topic: topic.clone(),
            events,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .subscribers
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| PokerError::NotifierFailure(format!("unknown subscription {:?}", handle.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Participant, Session, Vote};
    use crate::notify::{Row, Table};

    #[tokio::test]
    async fn test_publish_reaches_matching_topic_only() {
        let notifier = MemoryNotifier::new(8);
        let mut votes = notifier
            .subscribe(&Topic::for_session(Table::Votes, "s1"))
            .await
            .unwrap();
        let mut sessions = notifier
            .subscribe(&Topic::for_session(Table::Sessions, "s1"))
            .await
            .unwrap();

        let p = Participant::new("ada");
        notifier
            .publish(ChangeEvent::insert(Row::Vote(Vote::unvoted("s1", &p))))
            .await;

        assert!(votes.events.try_recv().is_ok());
        assert!(sessions.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let notifier = MemoryNotifier::new(8);
        let sub = notifier
            .subscribe(&Topic::for_session(Table::Sessions, "s1"))
            .await
            .unwrap();
        assert_eq!(notifier.subscriber_count().await, 1);

        drop(sub);
        notifier
            .publish(ChangeEvent::update(Row::Session(Session::new(
                "s1",
                uuid::Uuid::new_v4(),
            ))))
            .await;
        assert_eq!(notifier.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_handle_fails() {
        let notifier = MemoryNotifier::default();
        let err = notifier
            .unsubscribe(SubscriptionHandle(99))
            .await
            .unwrap_err();
        assert!(matches!(err, PokerError::NotifierFailure(_)));
    }
}
