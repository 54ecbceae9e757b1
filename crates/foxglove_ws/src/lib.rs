//! Foxglove WebSocket server: accepts Studio connections, advertises the
//! registered channels and fans broadcast payloads out to subscribers.
//!
//! The producer side is synchronous and never blocks on a client: each
//! client has a bounded outbound queue and frames are dropped when it is
//! full. Subscriptions live and die with the client connection.

pub mod protocol;
pub mod schemas;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub use crate::protocol::{Channel, ChannelId, ChannelSpec, SUBPROTOCOL};

use crate::protocol::{ClientMessage, ServerMessage, SubscriptionId};

/// Frames queued per client before broadcasts start dropping.
const OUTBOUND_QUEUE: usize = 256;

struct ClientEntry {
    tx: mpsc::Sender<Message>,
    /// channel id -> client-chosen subscription id
    subscriptions: HashMap<ChannelId, SubscriptionId>,
}

struct Inner {
    name: String,
    channels: RwLock<Vec<Channel>>,
    clients: RwLock<HashMap<u64, ClientEntry>>,
    next_client_id: AtomicU64,
}

/// Cloneable handle to the server state; serve the [`FoxgloveServer::router`]
/// with axum and call [`FoxgloveServer::broadcast`] from the producer.
#[derive(Clone)]
pub struct FoxgloveServer {
    inner: Arc<Inner>,
}

impl FoxgloveServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                channels: RwLock::new(Vec::new()),
                clients: RwLock::new(HashMap::new()),
                next_client_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a channel and advertise it to already-connected clients.
    pub fn add_channel(&self, spec: ChannelSpec) -> ChannelId {
        let mut channels = self.inner.channels.write();
        let id = channels.len() as ChannelId + 1;
        let channel = Channel {
            id,
            topic: spec.topic,
            encoding: spec.encoding,
            schema_name: spec.schema_name,
            schema: spec.schema,
            schema_encoding: spec.schema_encoding,
        };
        tracing::debug!(id, topic = %channel.topic, schema = %channel.schema_name, "channel registered");
        let advertise = ServerMessage::Advertise {
            channels: vec![channel.clone()],
        };
        channels.push(channel);
        drop(channels);

        if let Ok(text) = serde_json::to_string(&advertise) {
            for client in self.inner.clients.read().values() {
                let _ = client.tx.try_send(Message::Text(text.clone()));
            }
        }
        id
    }

    /// The WebSocket endpoint, mounted at `/`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_upgrade))
            .with_state(self.clone())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// Send one payload to every subscriber of `channel`; returns how many
    /// clients it was queued for. Clients with a full queue are skipped.
    pub fn broadcast(&self, channel: ChannelId, log_time_ns: u64, payload: &[u8]) -> usize {
        let clients = self.inner.clients.read();
        let mut delivered = 0;
        for (id, client) in clients.iter() {
            let Some(&sub) = client.subscriptions.get(&channel) else {
                continue;
            };
            let frame = protocol::encode_message_data(sub, log_time_ns, payload);
            match client.tx.try_send(Message::Binary(frame)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(client = id, channel, "outbound queue full, dropping frame");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    fn register_client(&self, tx: mpsc::Sender<Message>) -> u64 {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.inner.clients.write().insert(
            id,
            ClientEntry {
                tx,
                subscriptions: HashMap::new(),
            },
        );
        id
    }

    fn remove_client(&self, client_id: u64) {
        self.inner.clients.write().remove(&client_id);
    }

    fn apply_client_message(&self, client_id: u64, msg: ClientMessage) {
        match msg {
            ClientMessage::Subscribe { subscriptions } => {
                let channel_count = self.inner.channels.read().len() as ChannelId;
                let mut clients = self.inner.clients.write();
                let Some(client) = clients.get_mut(&client_id) else {
                    return;
                };
                for sub in subscriptions {
                    if sub.channel_id == 0 || sub.channel_id > channel_count {
                        tracing::warn!(client = client_id, channel = sub.channel_id, "subscribe to unknown channel ignored");
                        continue;
                    }
                    client.subscriptions.insert(sub.channel_id, sub.id);
                }
            }
            ClientMessage::Unsubscribe { subscription_ids } => {
                let mut clients = self.inner.clients.write();
                if let Some(client) = clients.get_mut(&client_id) {
                    client
                        .subscriptions
                        .retain(|_, sub| !subscription_ids.contains(sub));
                }
            }
            ClientMessage::Other => {
                tracing::debug!(client = client_id, "ignoring unsupported client op");
            }
        }
    }

    async fn handle_socket(self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();

        // Greeting: serverInfo then the full channel list.
        let server_info = ServerMessage::ServerInfo {
            name: self.inner.name.clone(),
            capabilities: Vec::new(),
            supported_encodings: vec!["json".into()],
        };
        let advertise = ServerMessage::Advertise {
            channels: self.inner.channels.read().clone(),
        };
        for msg in [&server_info, &advertise] {
            let Ok(text) = serde_json::to_string(msg) else {
                return;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                return;
            }
        }

        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let client_id = self.register_client(tx);
        tracing::info!(client = client_id, clients = self.client_count(), "client connected");

        loop {
            tokio::select! {
                queued = rx.recv() => {
                    // Queue sender lives in the clients map; it outlives this loop.
                    let Some(frame) = queued else { break };
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(msg) => self.apply_client_message(client_id, msg),
                                Err(e) => {
                                    tracing::warn!(client = client_id, error = %e, "bad client message");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(client = client_id, error = %e, "websocket error");
                            break;
                        }
                    }
                }
            }
        }

        self.remove_client(client_id);
        tracing::info!(client = client_id, clients = self.client_count(), "client disconnected");
    }
}

async fn ws_upgrade(
    State(server): State<FoxgloveServer>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| server.handle_socket(socket))
}
