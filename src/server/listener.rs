//! Unix socket listener and server main loop

use crate::error::PokerError;
use crate::notify::{SubscriptionHandle, Topic};
use crate::protocol::{
    deserialize, read_frame, write_frame, ClientMessage, Reply, Request, ServerMessage,
    PROTOCOL_VERSION,
};
use crate::sync::{LocalBackend, SessionBackend};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Server state shared across connections
struct ServerState {
    id: Uuid,
    started_at: DateTime<Utc>,
    backend: LocalBackend,
    clients: RwLock<HashMap<Uuid, ClientLink>>,
    client_buffer: usize,
}

/// Outbound queue of one connected client, drained by its writer task
#[derive(Clone)]
struct ClientLink {
    id: Uuid,
    outbox: mpsc::Sender<ServerMessage>,
}

impl ClientLink {
    fn open(mut writer: OwnedWriteHalf, buffer: usize) -> (Self, JoinHandle<()>) {
        let (outbox, mut rx) = mpsc::channel::<ServerMessage>(buffer);
        let id = Uuid::new_v4();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    tracing::error!("Failed to write to client {}: {}", id, e);
                    break;
                }
            }
            tracing::debug!("Writer for client {} finished", id);
        });
        (Self { id, outbox }, writer_task)
    }

    async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.outbox
            .send(msg)
            .await
            .map_err(|_| anyhow!("Client {} is gone", self.id))
    }

    async fn notice(&self, message: String) -> Result<()> {
        self.send(ServerMessage::Error { message }).await
    }
}

/// Subscriptions a client opened, keyed by the id of the `Subscribe` request
type ClientSubscriptions = HashMap<u64, (SubscriptionHandle, JoinHandle<()>)>;

/// Unix socket server listener
pub struct ServerListener {
    socket_path: PathBuf,
    name: String,
    backend: LocalBackend,
    client_buffer: usize,
}

impl ServerListener {
    /// Create a new server listener
    pub fn new(name: String, socket_path: PathBuf, backend: LocalBackend) -> Self {
        Self {
            socket_path,
            name,
            backend,
            client_buffer: 256,
        }
    }

    /// Outbound queue length per client
    pub fn with_client_buffer(mut self, client_buffer: usize) -> Self {
        self.client_buffer = client_buffer.max(1);
        self
    }

    /// Check if socket already exists (another server running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => {
                    return Err(anyhow!("Server '{}' is already running", self.name));
                }
                Err(_) => {
                    tracing::info!("Removing stale socket: {:?}", self.socket_path);
                    std::fs::remove_file(&self.socket_path)?;
                }
            }
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Server '{}' listening on {:?}", self.name, self.socket_path);

        let state = Arc::new(ServerState {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            backend: self.backend.clone(),
            clients: RwLock::new(HashMap::new()),
            client_buffer: self.client_buffer,
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, state).await {
                                    tracing::error!("Client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        broadcast_to_clients(
            ServerMessage::Error {
                message: "server shutting down".to_string(),
            },
            &state,
        )
        .await;
        self.cleanup().await;

        Ok(())
    }

    /// Clean up server resources
    async fn cleanup(&self) {
        tracing::info!("Cleaning up server resources");

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::error!("Failed to remove socket file: {}", e);
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
    let (mut reader, writer) = stream.into_split();

    let (client, writer_handle) = ClientLink::open(writer, state.client_buffer);
    let client_id = client.id;
    tracing::info!("Client connected: {}", client_id);

    state.clients.write().await.insert(client_id, client.clone());

    client
        .send(ServerMessage::Welcome {
            server_id: state.id,
            protocol_version: PROTOCOL_VERSION,
            started_at: state.started_at.timestamp_millis(),
        })
        .await?;

    let mut subscriptions = ClientSubscriptions::new();

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(bytes)) => match deserialize::<ClientMessage>(&bytes) {
                Ok(ClientMessage::Hello { protocol_version }) => {
                    if protocol_version != PROTOCOL_VERSION {
                        client
                            .notice(format!(
                                "Protocol version mismatch: expected {}, got {}",
                                PROTOCOL_VERSION, protocol_version
                            ))
                            .await?;
                    }
                }
                Ok(ClientMessage::Request { id, request }) => {
                    tracing::debug!("Client {} request {} ({})", client_id, id, request.name());
                    if let Err(e) =
                        handle_request(id, request, &state, &client, &mut subscriptions).await
                    {
                        tracing::error!("Failed to answer client {}: {}", client_id, e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to parse message: {}", e);
                    let _ = client.notice(format!("Invalid message: {}", e)).await;
                }
            },
            Ok(None) => {
                tracing::info!("Client disconnected: {}", client_id);
                break;
            }
            Err(e) => {
                tracing::error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    // Release every subscription before forgetting the client
    for (_, (handle, task)) in subscriptions.drain() {
        if let Err(e) = state.backend.unsubscribe(handle).await {
            tracing::debug!("Unsubscribing {:?} for {}: {}", handle, client_id, e);
        }
        task.abort();
    }

    state.clients.write().await.remove(&client_id);
    writer_handle.abort();

    tracing::info!("Client handler finished: {}", client_id);

    Ok(())
}

/// Answer one request; the reply is queued before any change it enables
async fn handle_request(
    id: u64,
    request: Request,
    state: &ServerState,
    client: &ClientLink,
    subscriptions: &mut ClientSubscriptions,
) -> Result<()> {
    let backend = &state.backend;
    let gateway = backend.gateway();

    let result = match request {
        Request::CreateSession { username } => gateway
            .create_session(&username)
            .await
            .map(|(session, participant)| Reply::Created {
                session,
                participant,
            }),
        Request::JoinSession {
            session_id,
            username,
        } => gateway
            .join_session(&session_id, &username)
            .await
            .map(Reply::Joined),
        Request::EnsureVote {
            session_id,
            participant,
        } => backend
            .ensure_vote(&session_id, &participant)
            .await
            .map(|inserted| Reply::VoteRow { inserted }),
        Request::Snapshot { session_id } => backend.snapshot(&session_id).await.map(Reply::Snapshot),
        Request::Mutate(mutation) => backend.apply(mutation).await.map(|_| Reply::Done),
        Request::Subscribe { topic } => {
            return open_forwarder(id, &topic, state, client, subscriptions).await;
        }
        Request::Unsubscribe { subscription } => match subscriptions.remove(&subscription) {
            Some((handle, task)) => {
                task.abort();
                backend.unsubscribe(handle).await.map(|_| Reply::Done)
            }
            None => Err(PokerError::NotifierFailure(format!(
                "no subscription {}",
                subscription
            ))),
        },
    };

    client.send(ServerMessage::Reply { id, result }).await
}

/// Subscribe on behalf of a client and forward matching events to it
async fn open_forwarder(
    id: u64,
    topic: &str,
    state: &ServerState,
    client: &ClientLink,
    subscriptions: &mut ClientSubscriptions,
) -> Result<()> {
    let subscribed = match topic.parse::<Topic>() {
        Ok(topic) => state.backend.subscribe(&topic).await,
        Err(e) => Err(e),
    };

    let mut sub = match subscribed {
        Ok(sub) => sub,
        Err(e) => {
            return client
                .send(ServerMessage::Reply { id, result: Err(e) })
                .await;
        }
    };

    let confirmed = client
        .send(ServerMessage::Reply {
            id,
            result: Ok(Reply::Subscribed),
        })
        .await;
    if let Err(e) = confirmed {
        // Nobody will ever ask to release it
        if let Err(unsub_err) = state.backend.unsubscribe(sub.handle).await {
            tracing::debug!("Unsubscribing {:?} for {}: {}", sub.handle, client.id, unsub_err);
        }
        return Err(e);
    }

    let handle = sub.handle;
    let sender = client.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = sub.events.recv().await {
            let msg = ServerMessage::Change {
                subscription: id,
                event,
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        tracing::debug!("Forwarder for {} finished", sub.topic);
    });

    if let Some((old, old_task)) = subscriptions.insert(id, (handle, task)) {
        old_task.abort();
        if let Err(e) = state.backend.unsubscribe(old).await {
            tracing::debug!("Unsubscribing {:?} for {}: {}", old, client.id, e);
        }
    }
    Ok(())
}

/// Broadcasts a server message to all connected clients
async fn broadcast_to_clients(msg: ServerMessage, state: &ServerState) {
    let clients = state.clients.read().await;
    for client in clients.values() {
        if let Err(e) = client.send(msg.clone()).await {
            tracing::warn!(
                "Failed to broadcast message to client {}: {}",
                client.id,
                e
            );
        }
    }
}
