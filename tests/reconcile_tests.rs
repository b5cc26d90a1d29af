//! Property tests for the reconciliation engine

use planning_poker::model::{Effort, Participant, Session, Snapshot, Vote};
use planning_poker::notify::{ChangeEvent, Row};
use planning_poker::sync::{Reconciler, SyncSettings, SyncState};
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

struct Room {
    host: Participant,
    local: Participant,
    other: Participant,
}

impl Room {
    fn new() -> Self {
        Self {
            host: Participant::new("host"),
            local: Participant::new("local"),
            other: Participant::new("other"),
        }
    }

    fn snapshot(&self, visible: bool, efforts: [Option<Effort>; 3]) -> Snapshot {
        let mut session = Session::new("s1", self.host.user_id);
        session.votes_visible = visible;
        let votes = [&self.host, &self.local, &self.other]
            .into_iter()
            .zip(efforts)
            .map(|(p, effort)| Vote {
                effort,
                ..Vote::unvoted("s1", p)
            })
            .collect();
        Snapshot { session, votes }
    }

    /// Every event shape a `s1` subscriber could see
    fn event(&self, kind: u8, effort: Option<Effort>) -> ChangeEvent {
        let vote = |p: &Participant| Vote {
            effort,
            ..Vote::unvoted("s1", p)
        };
        match kind % 6 {
            0 => ChangeEvent::update(Row::Session(Session::new("s1", self.host.user_id))),
            1 => {
                let mut session = Session::new("s1", self.host.user_id);
                session.votes_visible = true;
                ChangeEvent::update(Row::Session(session))
            }
            2 => ChangeEvent::insert(Row::Vote(vote(&self.other))),
            3 => ChangeEvent::update(Row::Vote(vote(&self.other))),
            4 => ChangeEvent::update(Row::Vote(vote(&self.host))),
            _ => ChangeEvent::update(Row::Vote(vote(&self.local))),
        }
    }
}

fn effort_strategy() -> impl Strategy<Value = Option<Effort>> {
    prop_oneof![
        Just(None),
        proptest::sample::select(Effort::ALL.to_vec()).prop_map(Some),
    ]
}

fn efforts_strategy() -> impl Strategy<Value = [Option<Effort>; 3]> {
    (effort_strategy(), effort_strategy(), effort_strategy()).prop_map(|(a, b, c)| [a, b, c])
}

fn reconciler(room: &Room, initial: Snapshot) -> Reconciler {
    let mut r = Reconciler::new("s1", room.local.user_id, &SyncSettings::default());
    r.apply_snapshot(initial);
    r
}

proptest! {
    /// Duplicated and reordered events settle on the same view once the
    /// authoritative snapshot is fetched
    #[test]
    fn duplicate_and_reordered_events_converge(
        initial in efforts_strategy(),
        latest in efforts_strategy(),
        visible in any::<bool>(),
        events in prop::collection::vec((0u8..6, effort_strategy()), 0..12),
        seed in any::<u64>(),
    ) {
        let room = Room::new();
        let t0 = Instant::now();
        let events: Vec<ChangeEvent> = events
            .into_iter()
            .map(|(kind, effort)| room.event(kind, effort))
            .collect();

        let mut once = reconciler(&room, room.snapshot(false, initial));
        for (i, event) in events.iter().enumerate() {
            once.on_change(event, t0 + Duration::from_millis(i as u64));
        }
        once.apply_snapshot(room.snapshot(visible, latest));

        // Same events, each delivered twice, in a scrambled order
        let mut scrambled: Vec<&ChangeEvent> = events.iter().chain(events.iter()).collect();
        let len = scrambled.len();
        if len > 1 {
            for i in 0..len {
                let j = (seed as usize).wrapping_add(i * 7) % len;
                scrambled.swap(i, j);
            }
        }
        let mut twice = reconciler(&room, room.snapshot(false, initial));
        for (i, event) in scrambled.into_iter().enumerate() {
            twice.on_change(event, t0 + Duration::from_millis(i as u64));
        }
        twice.apply_snapshot(room.snapshot(visible, latest));

        let mut direct = reconciler(&room, room.snapshot(false, initial));
        direct.apply_snapshot(room.snapshot(visible, latest));

        let once = once.view();
        let twice = twice.view();
        let direct = direct.view();
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(&once.votes_by_username, &direct.votes_by_username);
        prop_assert_eq!(once.votes_visible, direct.votes_visible);
        prop_assert_eq!(once.state, SyncState::Synced);
    }

    /// A submitted vote shows at once and confirms on the next snapshot
    #[test]
    fn optimistic_vote_converges(
        effort in proptest::sample::select(Effort::ALL.to_vec()),
        others in efforts_strategy(),
    ) {
        let room = Room::new();
        let t0 = Instant::now();
        let mut r = reconciler(&room, room.snapshot(false, [others[0], None, others[2]]));

        r.begin_vote(effort, t0).unwrap();
        let view = r.view();
        prop_assert_eq!(view.state, SyncState::Optimistic);
        prop_assert_eq!(view.local_effort(), Some(effort));
        prop_assert_eq!(view.optimistic_effort, Some(effort));

        r.apply_snapshot(room.snapshot(false, [others[0], Some(effort), others[2]]));
        let view = r.view();
        prop_assert_eq!(view.state, SyncState::Synced);
        prop_assert_eq!(view.local_effort(), Some(effort));
        prop_assert_eq!(view.optimistic_effort, None);
    }

    /// An external reset of the local row beats a pending vote immediately
    #[test]
    fn external_clear_wins_over_pending_vote(
        effort in proptest::sample::select(Effort::ALL.to_vec()),
        elapsed_ms in 0u64..1000,
    ) {
        let room = Room::new();
        let t0 = Instant::now();
        let mut r = reconciler(&room, room.snapshot(true, [None, Some(Effort::One), None]));
        let epoch = r.view().input_epoch;

        r.begin_vote(effort, t0).unwrap();
        r.on_change(
            &room.event(5, None),
            t0 + Duration::from_millis(elapsed_ms),
        );

        let view = r.view();
        prop_assert_eq!(view.state, SyncState::Synced);
        prop_assert_eq!(view.local_effort(), None);
        prop_assert_eq!(view.optimistic_effort, None);
        prop_assert_eq!(view.input_epoch, epoch + 1);
    }
}

#[test]
fn test_session_walkthrough() {
    let room = Room::new();
    let t0 = Instant::now();
    let host_name = room.host.username.clone();
    let local_name = room.local.username.clone();

    // Only the host and the local participant are seated
    let seated = |visible: bool, host: Option<Effort>, local: Option<Effort>| {
        let mut snapshot = room.snapshot(visible, [host, local, None]);
        snapshot.votes.truncate(2);
        snapshot
    };

    let mut player = reconciler(&room, seated(false, None, None));
    let mut host = Reconciler::new("s1", room.host.user_id, &SyncSettings::default());
    host.apply_snapshot(seated(false, None, None));
    assert!(host.is_local_host());
    assert!(!player.is_local_host());

    player.begin_vote(Effort::Five, t0).unwrap();
    let view = player.view();
    assert_eq!(view.votes_by_username.get(&host_name), Some(&None));
    assert_eq!(
        view.votes_by_username.get(&local_name),
        Some(&Some(Effort::Five))
    );
    assert!(!view.votes_visible);

    // Store confirms the vote, then the host reveals
    let voted = seated(false, None, Some(Effort::Five));
    player.apply_snapshot(voted.clone());
    host.apply_snapshot(voted);
    let revealed = seated(true, None, Some(Effort::Five));
    player.apply_snapshot(revealed.clone());
    host.apply_snapshot(revealed);
    assert!(player.view().votes_visible);
    assert!(host.view().votes_visible);

    // Host clears while the player has a new pick pending
    player
        .begin_vote(Effort::Eight, t0 + Duration::from_secs(2))
        .unwrap();
    host.begin_clear(t0 + Duration::from_secs(2)).unwrap();
    assert!(host.view().votes_by_username.values().all(Option::is_none));
    assert!(!host.view().votes_visible);

    let reset = ChangeEvent::update(Row::Vote(Vote::unvoted("s1", &room.local)));
    player.on_change(&reset, t0 + Duration::from_secs(2));
    assert_eq!(player.view().local_effort(), None);
    assert_eq!(player.state(), SyncState::Synced);

    let cleared = seated(false, None, None);
    player.apply_snapshot(cleared.clone());
    host.apply_snapshot(cleared);
    for view in [player.view(), host.view()] {
        assert_eq!(view.state, SyncState::Synced);
        assert!(!view.votes_visible);
        assert!(view.votes_by_username.values().all(Option::is_none));
    }
}
