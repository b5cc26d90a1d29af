//! Session connection - one client's cooperative sync loop
//!
//! Owns both change-feed subscriptions for the session. They are acquired in
//! `init` and released in `teardown`; nothing else holds them.

use super::backend::SessionBackend;
use super::reconciler::Reconciler;
use super::view::ViewModel;
use super::SyncSettings;
use crate::error::{PokerError, Result};
use crate::gateway::{Action, Mutation};
use crate::model::{Effort, Participant};
use crate::notify::{ChangeEvent, Subscription, Table, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// What woke the loop, returned by [`SessionConnection::wait`]
#[derive(Debug)]
pub enum Wake {
    /// A change event, or `None` when a feed closed
    Event(Option<ChangeEvent>),
    /// A timer deadline passed
    Timer,
}

/// A client attached to one session
pub struct SessionConnection {
    backend: Arc<dyn SessionBackend>,
    participant: Participant,
    reconciler: Reconciler,

    sessions_sub: Option<Subscription>,
    votes_sub: Option<Subscription>,

    /// Change feed unavailable; snapshots are polled instead
    degraded: bool,
    poll_interval: Duration,
    next_poll: Option<Instant>,

    view_tx: watch::Sender<ViewModel>,
}

impl SessionConnection {
    /// Join the session, subscribe to its change feed and load the first snapshot
    ///
    /// Fails with `NotFound` when the session does not exist. A failing
    /// change feed only degrades the connection to polling.
    pub async fn init(
        backend: Arc<dyn SessionBackend>,
        session_id: &str,
        participant: Participant,
        settings: &SyncSettings,
    ) -> Result<Self> {
        let inserted = backend.ensure_vote(session_id, &participant).await?;
        if inserted {
            tracing::info!("{} joined {}", participant.username, session_id);
        }

        let reconciler = Reconciler::new(session_id, participant.user_id, settings);
        let (view_tx, _) = watch::channel(reconciler.view());
        let mut conn = Self {
            backend,
            participant,
            reconciler,
            sessions_sub: None,
            votes_sub: None,
            degraded: false,
            poll_interval: settings.poll_interval,
            next_poll: None,
            view_tx,
        };

        // Subscribe first so no change between the fetch and the
        // subscription goes unnoticed
        conn.open_subscriptions().await;

        let now = Instant::now();
        match conn.backend.snapshot(session_id).await {
            Ok(snapshot) => {
                conn.reconciler.note_fetched(now);
                conn.reconciler.apply_snapshot(snapshot);
            }
            Err(e) => {
                if let Err(release_err) = conn.release().await {
                    tracing::warn!("Releasing failed connection: {}", release_err);
                }
                return Err(e);
            }
        }

        conn.publish();
        tracing::debug!(
            "Connection for {} in {} ready (degraded: {})",
            conn.participant.username,
            session_id,
            conn.degraded
        );
        Ok(conn)
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn session_id(&self) -> &str {
        self.reconciler.session_id()
    }

    /// Current view model
    pub fn view(&self) -> ViewModel {
        self.reconciler.view()
    }

    /// Stream of view models, updated on every change
    pub fn watch(&self) -> watch::Receiver<ViewModel> {
        self.view_tx.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Cast the local participant's vote
    ///
    /// The optimistic view is published before the store is contacted.
    pub async fn submit_vote(&mut self, effort: Effort) -> Result<ViewModel> {
        self.reconciler.begin_vote(effort, Instant::now())?;
        self.publish();

        let result = self
            .backend
            .apply(self.mutation(Action::CastVote { effort }))
            .await;
        self.finish_mutation(result, true).await
    }

    /// Reveal or hide all votes (host only)
    pub async fn toggle_visibility(&mut self) -> Result<ViewModel> {
        self.ensure_open()?;
        let result = self
            .backend
            .apply(self.mutation(Action::ToggleVisibility))
            .await;
        self.finish_mutation(result, false).await
    }

    /// Clear all votes and hide them (host only)
    pub async fn clear_votes(&mut self) -> Result<ViewModel> {
        self.ensure_open()?;

        // A non-host's request is rejected anyway; patching first would flicker
        let optimistic = self.reconciler.is_local_host();
        if optimistic {
            self.reconciler.begin_clear(Instant::now())?;
            self.publish();
        }

        let result = self.backend.apply(self.mutation(Action::ClearVotes)).await;
        self.finish_mutation(result, optimistic).await
    }

    pub fn dismiss_notice(&mut self) {
        self.reconciler.dismiss_notice();
        self.publish();
    }

    /// Wait for the next change event or timer and process it
    ///
    /// Dropping this future midway loses nothing: an interrupted fetch is
    /// handed out again on the next call. Callers racing the connection
    /// against other input should still `select!` on [`wait`](Self::wait)
    /// and run [`handle`](Self::handle) to completion.
    pub async fn step(&mut self) -> Result<()> {
        let wake = self.wait().await?;
        self.handle(wake).await;
        Ok(())
    }

    /// Wait for the next change event or timer deadline
    ///
    /// Cancel-safe: no event is consumed unless this future completes.
    pub async fn wait(&mut self) -> Result<Wake> {
        self.ensure_open()?;

        let deadline = self.next_deadline();
        Ok(tokio::select! {
            event = next_event(&mut self.sessions_sub) => Wake::Event(event),
            event = next_event(&mut self.votes_sub) => Wake::Event(event),
            _ = sleep_until(deadline) => Wake::Timer,
        })
    }

    /// Process what [`wait`](Self::wait) returned
    pub async fn handle(&mut self, wake: Wake) {
        if self.reconciler.is_closed() {
            return;
        }

        match wake {
            Wake::Event(Some(event)) => {
                let fetch = self.reconciler.on_change(&event, Instant::now());
                self.publish();
                if fetch {
                    self.refresh().await;
                }
            }
            Wake::Event(None) => {
                tracing::warn!(
                    "Change feed for {} closed, falling back to polling",
                    self.session_id()
                );
                self.degrade().await;
            }
            Wake::Timer => self.handle_timers().await,
        }

        self.publish();
    }

    /// Release both subscriptions and close the connection
    pub async fn teardown(mut self) -> Result<()> {
        self.release().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.reconciler.is_closed() {
            Err(PokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn mutation(&self, action: Action) -> Mutation {
        Mutation {
            session_id: self.session_id().to_string(),
            acting_user_id: self.participant.user_id,
            action,
        }
    }

    async fn finish_mutation(&mut self, result: Result<()>, optimistic: bool) -> Result<ViewModel> {
        match result {
            Ok(()) => {
                if self.reconciler.request_refetch(Instant::now()) {
                    self.refresh().await;
                }
                self.publish();
                Ok(self.view())
            }
            Err(e) => {
                if optimistic {
                    self.reconciler.rollback(&e);
                } else {
                    self.reconciler.report(&e);
                }
                self.publish();
                Err(e)
            }
        }
    }

    async fn handle_timers(&mut self) {
        let now = Instant::now();
        let tick = self.reconciler.poll(now);
        let mut fetch = tick.fetch;

        if self.degraded && self.next_poll.map(|at| now >= at).unwrap_or(false) {
            self.next_poll = Some(now + self.poll_interval);
            self.reconciler.note_fetched(now);
            fetch = true;
        }

        if fetch {
            self.refresh().await;
        }
    }

    async fn refresh(&mut self) {
        let session_id = self.session_id().to_string();
        match self.backend.snapshot(&session_id).await {
            Ok(snapshot) => self.reconciler.apply_snapshot(snapshot),
            Err(e) => {
                tracing::warn!("Re-fetch of {} failed: {}", session_id, e);
                self.reconciler.fetch_failed(&e);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let poll = if self.degraded { self.next_poll } else { None };
        match (self.reconciler.next_deadline(), poll) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn open_subscriptions(&mut self) {
        for table in [Table::Sessions, Table::Votes] {
            let topic = Topic::for_session(table, self.session_id());
            match self.backend.subscribe(&topic).await {
                Ok(sub) => match table {
                    Table::Sessions => self.sessions_sub = Some(sub),
                    Table::Votes => self.votes_sub = Some(sub),
                },
                Err(e) => {
                    tracing::warn!(
                        "Subscribing to {} failed, falling back to polling: {}",
                        topic,
                        e
                    );
                    self.degrade().await;
                    return;
                }
            }
        }
    }

    async fn degrade(&mut self) {
        if self.degraded {
            return;
        }
        self.degraded = true;
        self.next_poll = Some(Instant::now() + self.poll_interval);

        for sub in [self.sessions_sub.take(), self.votes_sub.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.backend.unsubscribe(sub.handle).await {
                tracing::debug!("Unsubscribing {} while degrading: {}", sub.topic, e);
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        let mut first_err = None;

        for sub in [self.sessions_sub.take(), self.votes_sub.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.backend.unsubscribe(sub.handle).await {
                tracing::warn!("Unsubscribing {} failed: {}", sub.topic, e);
                first_err.get_or_insert(e);
            }
        }

        self.reconciler.close();
        self.publish();
        tracing::debug!("Connection for {} closed", self.participant.username);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.reconciler.view());
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        if !self.reconciler.is_closed() {
            tracing::warn!(
                "Connection for {} in {} dropped without teardown",
                self.participant.username,
                self.reconciler.session_id()
            );
        }
    }
}

async fn next_event(sub: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match sub {
        Some(sub) => sub.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
