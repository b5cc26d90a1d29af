//! Integration tests for the server and the remote backend

use planning_poker::client::RemoteBackend;
use planning_poker::model::Effort;
use planning_poker::notify::{MemoryNotifier, Operation, Row, Table, Topic};
use planning_poker::protocol::{
    deserialize, read_frame, write_frame, ClientMessage, Request, ServerMessage,
    PROTOCOL_VERSION,
};
use planning_poker::server::ServerListener;
use planning_poker::sync::{LocalBackend, SessionBackend, SessionConnection, SyncSettings, SyncState};
use planning_poker::PokerError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use tempfile::{tempdir, TempDir};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct TestServer {
    _dir: TempDir,
    socket_path: PathBuf,
    notifier: Arc<MemoryNotifier>,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("poker.sock");
        let notifier = Arc::new(MemoryNotifier::new(64));
        let server = ServerListener::new(
            "test".to_string(),
            socket_path.clone(),
            LocalBackend::in_memory(Arc::clone(&notifier)),
        );

        let (shutdown, shutdown_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move { server.run(shutdown_rx).await });
        wait_for_socket(&socket_path).await;

        Self {
            _dir: dir,
            socket_path,
            notifier,
            shutdown,
            handle,
        }
    }

    async fn client(&self) -> RemoteBackend {
        RemoteBackend::connect(&self.socket_path).await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.send(()).await.unwrap();
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        assert!(!self.socket_path.exists());
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server socket never appeared at {}", path.display());
}

/// Wait until `check` holds, polling every 20ms for up to 5s
async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_server_welcomes_with_version() {
    let server = TestServer::start().await;

    let stream = UnixStream::connect(&server.socket_path).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();

    let bytes = timeout(Duration::from_secs(2), read_frame(&mut reader))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match deserialize::<ServerMessage>(&bytes).unwrap() {
        ServerMessage::Welcome {
            protocol_version, ..
        } => assert_eq!(protocol_version, PROTOCOL_VERSION),
        other => panic!("expected Welcome, got {:?}", other),
    }

    write_frame(
        &mut writer,
        &ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
        },
    )
    .await
    .unwrap();

    let bytes = timeout(Duration::from_secs(2), read_frame(&mut reader))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match deserialize::<ServerMessage>(&bytes).unwrap() {
        ServerMessage::Error { message } => assert!(message.contains("version")),
        other => panic!("expected Error, got {:?}", other),
    }

    drop((reader, writer));
    server.stop().await;
}

#[tokio::test]
async fn test_create_join_and_errors_cross_the_wire() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let (session, host) = client.create_session("host").await.unwrap();
    assert!(session.is_host(host.user_id));
    assert!(!session.votes_visible);

    let player = client.join_session(&session.session_id, "player").await.unwrap();
    assert_ne!(player.user_id, host.user_id);

    let err = client.join_session("no-such-room-0", "ada").await.unwrap_err();
    assert!(err.is_not_found());

    let err = client.create_session(" ").await.unwrap_err();
    assert!(matches!(err, PokerError::Invalid(_)));

    assert!(client.ensure_vote(&session.session_id, &player).await.unwrap());
    assert!(!client.ensure_vote(&session.session_id, &player).await.unwrap());

    let snapshot = client.snapshot(&session.session_id).await.unwrap();
    assert_eq!(snapshot.votes.len(), 1);
    assert_eq!(snapshot.session, session);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_change_events_are_forwarded() {
    let server = TestServer::start().await;
    let watcher = server.client().await;
    let actor = server.client().await;

    let (session, host) = actor.create_session("host").await.unwrap();
    let mut votes = watcher
        .subscribe(&Topic::for_session(Table::Votes, &session.session_id))
        .await
        .unwrap();
    assert_eq!(server.notifier.subscriber_count().await, 1);

    actor.ensure_vote(&session.session_id, &host).await.unwrap();
    let event = timeout(Duration::from_secs(2), votes.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.operation, Operation::Insert);
    match event.row {
        Row::Vote(vote) => assert_eq!(vote.user_id, host.user_id),
        other => panic!("expected a vote row, got {:?}", other),
    }

    watcher.unsubscribe(votes.handle).await.unwrap();
    assert_eq!(server.notifier.subscriber_count().await, 0);

    let err = watcher.unsubscribe(votes.handle).await.unwrap_err();
    assert!(matches!(err, PokerError::NotifierFailure(_)));

    drop((watcher, actor));
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_releases_subscriptions() {
    let server = TestServer::start().await;
    let client = server.client().await;
    let (session, _) = client.create_session("host").await.unwrap();

    for table in [Table::Sessions, Table::Votes] {
        client
            .subscribe(&Topic::for_session(table, &session.session_id))
            .await
            .unwrap();
    }
    assert_eq!(server.notifier.subscriber_count().await, 2);

    drop(client);
    let notifier = Arc::clone(&server.notifier);
    eventually(|| {
        let notifier = Arc::clone(&notifier);
        async move { notifier.subscriber_count().await == 0 }
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn test_reused_subscribe_id_and_hang_up_leak_nothing() {
    let server = TestServer::start().await;
    let client = server.client().await;
    let (session, _) = client.create_session("host").await.unwrap();
    drop(client);

    let stream = UnixStream::connect(&server.socket_path).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    write_frame(
        &mut writer,
        &ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
        },
    )
    .await
    .unwrap();
    // The second request under id 2 replaces the first
    for (id, table) in [(1, Table::Sessions), (2, Table::Votes), (2, Table::Votes)] {
        write_frame(
            &mut writer,
            &ClientMessage::Request {
                id,
                request: Request::Subscribe {
                    topic: Topic::for_session(table, &session.session_id).to_string(),
                },
            },
        )
        .await
        .unwrap();
    }

    let notifier = Arc::clone(&server.notifier);
    eventually(|| {
        let notifier = Arc::clone(&notifier);
        async move { notifier.subscriber_count().await == 2 }
    })
    .await;

    // Hang up without reading a single reply
    drop((reader, writer));
    eventually(|| {
        let notifier = Arc::clone(&notifier);
        async move { notifier.subscriber_count().await == 0 }
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn test_two_remote_clients_play_a_round() {
    let server = TestServer::start().await;
    let host_link = Arc::new(server.client().await);
    let player_link = Arc::new(server.client().await);

    let (session, host) = host_link.create_session("host").await.unwrap();
    let player = player_link
        .join_session(&session.session_id, "player")
        .await
        .unwrap();

    let settings = SyncSettings {
        refetch_interval: Duration::from_millis(50),
        quiescence: Duration::from_millis(500),
        poll_interval: Duration::from_millis(200),
    };
    let mut host_conn = SessionConnection::init(
        host_link.clone() as Arc<dyn SessionBackend>,
        &session.session_id,
        host,
        &settings,
    )
    .await
    .unwrap();
    let mut player_conn = SessionConnection::init(
        player_link.clone() as Arc<dyn SessionBackend>,
        &session.session_id,
        player,
        &settings,
    )
    .await
    .unwrap();
    assert!(!player_conn.is_degraded());

    player_conn.submit_vote(Effort::Three).await.unwrap();
    host_conn.toggle_visibility().await.unwrap();

    for conn in [&mut host_conn, &mut player_conn] {
        timeout(Duration::from_secs(5), async {
            loop {
                let view = conn.view();
                if view.state == SyncState::Synced
                    && view.votes_visible
                    && view.votes_by_username.get("player") == Some(&Some(Effort::Three))
                {
                    break;
                }
                conn.step().await.unwrap();
            }
        })
        .await
        .expect("clients did not converge");
    }

    host_conn.teardown().await.unwrap();
    player_conn.teardown().await.unwrap();
    eventually(|| {
        let notifier = Arc::clone(&server.notifier);
        async move { notifier.subscriber_count().await == 0 }
    })
    .await;

    drop((host_link, player_link));
    server.stop().await;
}

#[tokio::test]
async fn test_calls_fail_fast_after_server_hangs_up() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("hangup.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    // Complete the handshake, then go away
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        write_frame(
            &mut writer,
            &ServerMessage::Welcome {
                server_id: Uuid::new_v4(),
                protocol_version: PROTOCOL_VERSION,
                started_at: 0,
            },
        )
        .await
        .unwrap();
        let hello = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(
            deserialize::<ClientMessage>(&hello).unwrap(),
            ClientMessage::Hello { .. }
        ));
    });

    let backend = RemoteBackend::connect(&socket_path).await.unwrap();
    server.await.unwrap();

    let err = timeout(Duration::from_secs(3), backend.snapshot("calm-otter-3"))
        .await
        .expect("call hung after hangup")
        .unwrap_err();
    assert!(matches!(err, PokerError::StoreFailure(_)));

    let err = timeout(Duration::from_secs(3), backend.create_session("host"))
        .await
        .expect("second call hung after hangup")
        .unwrap_err();
    assert!(matches!(err, PokerError::StoreFailure(_)));

    let err = timeout(
        Duration::from_secs(3),
        backend.subscribe(&Topic::for_session(Table::Votes, "calm-otter-3")),
    )
    .await
    .expect("subscribe hung after hangup")
    .unwrap_err();
    assert!(matches!(err, PokerError::NotifierFailure(_)));
}
