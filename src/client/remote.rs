//! Remote backend - talks to `poker-server` over its Unix socket
//!
//! Requests carry an id and resolve when the matching reply arrives.
//! Change events are routed to the stream registered under the id of the
//! `Subscribe` request that opened them; the stream is registered before the
//! request is sent so no early event is lost.

use crate::error::{PokerError, Result};
use crate::gateway::Mutation;
use crate::model::{Participant, Session, Snapshot};
use crate::notify::{ChangeEvent, Subscription, SubscriptionHandle, Topic};
use crate::protocol::{
    check_version_compatibility, deserialize, read_frame, write_frame, ClientMessage, Reply,
    Request, ServerMessage, PROTOCOL_VERSION,
};
use crate::sync::SessionBackend;
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Reply>>>>>;
type EventStreams = Arc<Mutex<HashMap<u64, mpsc::Sender<ChangeEvent>>>>;

/// A connection to a running server
pub struct RemoteBackend {
    outbound: mpsc::Sender<ClientMessage>,
    pending: PendingReplies,
    streams: EventStreams,
    /// Set by the reader once the server side is gone
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    stream_buffer: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteBackend {
    /// Connect and complete the version handshake
    pub async fn connect(socket_path: &Path) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let (mut reader, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
            },
        )
        .await?;

        let Some(bytes) = read_frame(&mut reader).await? else {
            bail!("Server closed the connection during handshake");
        };
        match deserialize::<ServerMessage>(&bytes)? {
            ServerMessage::Welcome {
                server_id,
                protocol_version,
                ..
            } => {
                check_version_compatibility(PROTOCOL_VERSION, protocol_version)?;
                tracing::debug!("Connected to server {}", server_id);
            }
            other => bail!("Expected Welcome, got {:?}", other),
        }

        let (outbound, outbound_rx) = mpsc::channel(64);
        let pending = PendingReplies::default();
        let streams = EventStreams::default();
        let closed = Arc::new(AtomicBool::new(false));

        let tasks = vec![
            tokio::spawn(writer_task(writer, outbound_rx)),
            tokio::spawn(reader_task(
                reader,
                Arc::clone(&pending),
                Arc::clone(&streams),
                Arc::clone(&closed),
            )),
        ];

        Ok(Self {
            outbound,
            pending,
            streams,
            closed,
            next_id: AtomicU64::new(1),
            stream_buffer: 64,
            tasks,
        })
    }

    /// Open a new session hosted by `username`
    pub async fn create_session(&self, username: &str) -> Result<(Session, Participant)> {
        match self
            .call(Request::CreateSession {
                username: username.to_string(),
            })
            .await?
        {
            Reply::Created {
                session,
                participant,
            } => Ok((session, participant)),
            other => Err(unexpected(other)),
        }
    }

    /// Mint an identity in an existing session
    pub async fn join_session(&self, session_id: &str, username: &str) -> Result<Participant> {
        match self
            .call(Request::JoinSession {
                session_id: session_id.to_string(),
                username: username.to_string(),
            })
            .await?
        {
            Reply::Joined(participant) => Ok(participant),
            other => Err(unexpected(other)),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, request: Request) -> Result<Reply> {
        let id = self.next_id();
        self.call_with_id(id, request).await
    }

    async fn call_with_id(&self, id: u64, request: Request) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        {
            // The reader clears `pending` under this lock after setting
            // `closed`, so an entry inserted here is either seen or refused
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(connection_lost());
            }
            pending.insert(id, tx);
        }

        if self
            .outbound
            .send(ClientMessage::Request { id, request })
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(connection_lost());
        }

        rx.await.map_err(|_| connection_lost())?
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl SessionBackend for RemoteBackend {
    async fn ensure_vote(&self, session_id: &str, participant: &Participant) -> Result<bool> {
        match self
            .call(Request::EnsureVote {
                session_id: session_id.to_string(),
                participant: participant.clone(),
            })
            .await?
        {
            Reply::VoteRow { inserted } => Ok(inserted),
            other => Err(unexpected(other)),
        }
    }

    async fn snapshot(&self, session_id: &str) -> Result<Snapshot> {
        match self
            .call(Request::Snapshot {
                session_id: session_id.to_string(),
            })
            .await?
        {
            Reply::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    async fn apply(&self, mutation: Mutation) -> Result<()> {
        match self.call(Request::Mutate(mutation)).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, topic: &Topic) -> Result<Subscription> {
        let id = self.next_id();
        let (tx, events) = mpsc::channel(self.stream_buffer);
        self.streams.lock().await.insert(id, tx);

        let result = self
            .call_with_id(
                id,
                Request::Subscribe {
                    topic: topic.to_string(),
                },
            )
            .await;

        match result {
            Ok(Reply::Subscribed) => Ok(Subscription {
                handle: SubscriptionHandle(id),
                topic: topic.clone(),
                events,
            }),
            other => {
                self.streams.lock().await.remove(&id);
                Err(match other {
                    Ok(reply) => unexpected(reply),
                    Err(e @ PokerError::NotifierFailure(_)) => e,
                    Err(e) => PokerError::NotifierFailure(e.to_string()),
                })
            }
        }
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.streams.lock().await.remove(&handle.0);
        match self
            .call(Request::Unsubscribe {
                subscription: handle.0,
            })
            .await
        {
            Ok(Reply::Done) => Ok(()),
            Ok(other) => Err(unexpected(other)),
            Err(e @ PokerError::NotifierFailure(_)) => Err(e),
            Err(e) => Err(PokerError::NotifierFailure(e.to_string())),
        }
    }
}

async fn writer_task(mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<ClientMessage>) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            tracing::error!("Failed to write to server: {}", e);
            break;
        }
    }
    tracing::debug!("Client writer task finished");
}

async fn reader_task(
    mut reader: OwnedReadHalf,
    pending: PendingReplies,
    streams: EventStreams,
    closed: Arc<AtomicBool>,
) {
    loop {
        let bytes = match read_frame(&mut reader).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::info!("Server closed the connection");
                break;
            }
            Err(e) => {
                tracing::error!("Error reading from server: {}", e);
                break;
            }
        };

        match deserialize::<ServerMessage>(&bytes) {
            Ok(ServerMessage::Reply { id, result }) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(result);
                }
            }
            Ok(ServerMessage::Change {
                subscription,
                event,
            }) => {
                let tx = streams.lock().await.get(&subscription).cloned();
                // Never block replies behind a slow event consumer
                if let Some(tx) = tx {
                    if tx.try_send(event).is_err() {
                        tracing::debug!("Dropped change event for subscription {}", subscription);
                    }
                }
            }
            Ok(ServerMessage::Welcome { .. }) => {}
            Ok(ServerMessage::Error { message }) => {
                tracing::warn!("Server error: {}", message);
            }
            Err(e) => tracing::warn!("Failed to parse server message: {}", e),
        }
    }

    // Dropping the senders fails pending calls and ends event streams;
    // later calls see `closed` and fail at once
    closed.store(true, Ordering::SeqCst);
    pending.lock().await.clear();
    streams.lock().await.clear();
}

fn connection_lost() -> PokerError {
    PokerError::StoreFailure("connection to server lost".to_string())
}

fn unexpected(reply: Reply) -> PokerError {
    PokerError::Invalid(format!("unexpected reply from server: {:?}", reply))
}
