//! Reconciler - merges snapshots, optimistic edits and change events
//!
//! Pure and synchronous; the connection drives it with the current instant.
//! Change payloads are never merged into the view. An event only schedules
//! a full re-fetch, which makes duplicate and reordered deliveries harmless.
//! The one exception is the local participant's own row being reset to null
//! by someone else: that drops a pending vote immediately.
//!
//! A fetch handed to the driver stays outstanding until its snapshot is
//! applied or it fails. If the driver abandons it midway, the next `poll`
//! hands it out again.

use super::shaper::{Debounce, Throttle};
use super::view::{SyncState, ViewModel};
use super::SyncSettings;
use crate::error::{PokerError, Result};
use crate::model::{Effort, Snapshot};
use crate::notify::{ChangeEvent, Operation, Row};
use tokio::time::Instant;
use uuid::Uuid;

/// A local edit shown ahead of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Override {
    Vote(Effort),
    Clear,
}

impl Override {
    fn confirmed_by(&self, snapshot: &Snapshot, local_user_id: Uuid) -> bool {
        match self {
            Override::Vote(effort) => {
                snapshot.vote_of(local_user_id).and_then(|v| v.effort) == Some(*effort)
            }
            Override::Clear => snapshot.is_cleared(),
        }
    }
}

/// Work the driver must do after a timer check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tick {
    /// A coalesced re-fetch is due
    pub fetch: bool,
    /// The optimistic override expired without confirmation
    pub expired: bool,
}

/// Per-connection reconciliation state machine
pub struct Reconciler {
    session_id: String,
    local_user_id: Uuid,
    state: SyncState,

    /// Last authoritative read
    snapshot: Option<Snapshot>,
    pending: Option<Override>,

    refetch: Throttle,
    settle: Debounce,

    /// When the outstanding fetch was handed out
    fetch_started: Option<Instant>,

    input_epoch: u64,
    notice: Option<String>,
}

impl Reconciler {
    pub fn new(session_id: impl Into<String>, local_user_id: Uuid, settings: &SyncSettings) -> Self {
        Self {
            session_id: session_id.into(),
            local_user_id,
            state: SyncState::Initializing,
            snapshot: None,
            pending: None,
            refetch: Throttle::new(settings.refetch_interval),
            settle: Debounce::new(settings.quiescence),
            fetch_started: None,
            input_epoch: 0,
            notice: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.state == SyncState::Closed
    }

    /// Whether the last snapshot names the local participant as host
    pub fn is_local_host(&self) -> bool {
        self.snapshot
            .as_ref()
            .map(|s| s.session.is_host(self.local_user_id))
            .unwrap_or(false)
    }

    /// Merge a freshly fetched snapshot
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if self.is_closed() {
            return;
        }
        self.fetch_started = None;
        if snapshot.session.session_id != self.session_id {
            tracing::warn!(
                "Ignoring snapshot of {} on connection for {}",
                snapshot.session.session_id,
                self.session_id
            );
            return;
        }

        if let Some(pending) = self.pending {
            if pending.confirmed_by(&snapshot, self.local_user_id) {
                tracing::debug!("Optimistic {:?} confirmed for {}", pending, self.session_id);
                self.pending = None;
                self.settle.cancel();
            }
        }

        self.snapshot = Some(snapshot);
        self.state = if self.pending.is_some() {
            SyncState::Optimistic
        } else {
            SyncState::Synced
        };
    }

    /// Show the local vote before the store confirms it
    pub fn begin_vote(&mut self, effort: Effort, now: Instant) -> Result<()> {
        self.begin(Override::Vote(effort), now)
    }

    /// Show a cleared board before the store confirms it
    pub fn begin_clear(&mut self, now: Instant) -> Result<()> {
        self.begin(Override::Clear, now)
    }

    fn begin(&mut self, edit: Override, now: Instant) -> Result<()> {
        if self.is_closed() {
            return Err(PokerError::Closed);
        }
        self.pending = Some(edit);
        self.settle.restart(now);
        self.state = SyncState::Optimistic;
        Ok(())
    }

    /// Drop the optimistic edit after its mutation failed
    pub fn rollback(&mut self, error: &PokerError) {
        self.pending = None;
        self.settle.cancel();
        if !self.is_closed() {
            self.state = self.settled_state();
        }
        self.report(error);
    }

    /// Record an error for display without touching the view
    pub fn report(&mut self, error: &PokerError) {
        self.notice = Some(error.to_string());
    }

    /// The outstanding fetch failed; it is not retried until the next trigger
    pub fn fetch_failed(&mut self, error: &PokerError) {
        self.fetch_started = None;
        self.report(error);
    }

    /// Whether a handed-out fetch has not completed yet
    pub fn is_fetching(&self) -> bool {
        self.fetch_started.is_some()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Handle a change notification; returns `true` to fetch now
    pub fn on_change(&mut self, event: &ChangeEvent, now: Instant) -> bool {
        if self.is_closed() {
            return false;
        }

        if self.is_external_reset(event) {
            self.apply_external_reset();
        }

        self.trigger_fetch(now)
    }

    /// Ask for a re-fetch through the throttle; returns `true` to fetch now
    pub fn request_refetch(&mut self, now: Instant) -> bool {
        !self.is_closed() && self.trigger_fetch(now)
    }

    /// Record a fetch the driver starts outside the throttle
    pub fn note_fetched(&mut self, now: Instant) {
        self.refetch.note_fired(now);
        self.fetch_started = Some(now);
    }

    fn trigger_fetch(&mut self, now: Instant) -> bool {
        let fire = self.refetch.trigger(now);
        if fire {
            self.fetch_started = Some(now);
        }
        fire
    }

    /// Advance timers
    pub fn poll(&mut self, now: Instant) -> Tick {
        if self.is_closed() {
            return Tick::default();
        }

        let mut tick = Tick::default();
        if self.settle.poll(now) && self.pending.take().is_some() {
            tracing::debug!(
                "Optimistic state expired for {}, trusting snapshot",
                self.session_id
            );
            self.state = self.settled_state();
            tick.expired = true;
        }
        if self.refetch.poll(now) {
            tick.fetch = true;
        } else if self.fetch_started.is_some() {
            tracing::debug!("Retrying abandoned fetch for {}", self.session_id);
            self.refetch.note_fired(now);
            tick.fetch = true;
        }
        if tick.fetch {
            self.fetch_started = Some(now);
        }
        tick
    }

    /// Earliest instant a timer needs servicing
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_closed() {
            return None;
        }
        [
            self.fetch_started,
            self.refetch.deadline(),
            self.settle.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn close(&mut self) {
        self.state = SyncState::Closed;
        self.pending = None;
        self.fetch_started = None;
        self.settle.cancel();
    }

    /// Project snapshot and pending edit into a view
    pub fn view(&self) -> ViewModel {
        let mut view = ViewModel::empty(self.session_id.clone());
        view.state = self.state;
        view.input_epoch = self.input_epoch;
        view.notice = self.notice.clone();

        if let Some(snapshot) = &self.snapshot {
            for vote in &snapshot.votes {
                view.votes_by_username
                    .insert(vote.username.clone(), vote.effort);
            }
            view.hostname = snapshot.hostname().map(str::to_string);
            view.local_username = snapshot
                .vote_of(self.local_user_id)
                .map(|v| v.username.clone());
            view.is_host = snapshot.session.is_host(self.local_user_id);
            view.votes_visible = snapshot.session.votes_visible;
        }

        match self.pending {
            Some(Override::Vote(effort)) => {
                view.optimistic_effort = Some(effort);
                if let Some(name) = &view.local_username {
                    view.votes_by_username.insert(name.clone(), Some(effort));
                }
            }
            Some(Override::Clear) => {
                view.votes_by_username.values_mut().for_each(|e| *e = None);
                view.votes_visible = false;
            }
            None => {}
        }

        view
    }

    fn settled_state(&self) -> SyncState {
        if self.snapshot.is_some() {
            SyncState::Synced
        } else {
            SyncState::Initializing
        }
    }

    fn is_external_reset(&self, event: &ChangeEvent) -> bool {
        match (&event.operation, &event.row) {
            (Operation::Update, Row::Vote(vote)) => {
                vote.user_id == self.local_user_id
                    && vote.session_id == self.session_id
                    && vote.effort.is_none()
            }
            _ => false,
        }
    }

    fn apply_external_reset(&mut self) {
        let had_vote = matches!(self.pending, Some(Override::Vote(_)));
        if had_vote {
            self.pending = None;
            self.settle.cancel();
            self.state = self.settled_state();
        }

        let local_user_id = self.local_user_id;
        let mut had_effort = false;
        if let Some(own) = self
            .snapshot
            .as_mut()
            .and_then(|s| s.vote_of_mut(local_user_id))
        {
            had_effort = own.effort.take().is_some();
        }

        if had_vote || had_effort {
            self.input_epoch += 1;
            tracing::debug!("Local vote reset externally in {}", self.session_id);
        }
    }
}
