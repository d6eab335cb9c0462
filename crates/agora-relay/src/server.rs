//! The relay server state machine (§4.E): agent registry, routing,
//! presence gossip, store-and-forward, broadcast, and the signed peer
//! directory.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use agora_crypto::Keypair;
use agora_envelope::Envelope;
use agora_observe::{EventBus, EventDomain, EventPayload};
use agora_types::MessageType;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::agent::{now_ms, AgentRecord};
use crate::directory::{self, PeerListRequestPayload};
use crate::error::RelayError;
use crate::protocol::{ClientFrame, PeerInfo, RelayFrame, StoredPeerInfo};
use crate::store::StoredEntry;

/// Static relay configuration, fixed for the server's lifetime.
pub struct RelayConfig {
    /// Public keys the relay persists undelivered envelopes for while
    /// they are offline (§4.F, §4.E.2). Empty disables store-and-forward
    /// entirely.
    pub storage_peers: HashSet<String>,
    /// Root directory for the store-and-forward FIFOs. Required iff
    /// `storage_peers` is non-empty.
    pub store_root: Option<PathBuf>,
    /// The relay's own signing identity, enabling the peer directory
    /// service (§4.E.1). `None` disables it.
    pub identity: Option<Keypair>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            storage_peers: HashSet::new(),
            store_root: None,
            identity: None,
        }
    }
}

struct ConnectionEntry {
    record: AgentRecord,
    session_id: Uuid,
    sender: mpsc::UnboundedSender<RelayFrame>,
    kill: Option<oneshot::Sender<()>>,
}

/// The relay's shared state: the connection registry and configuration.
/// Cloned cheaply (it's an `Arc` wrapper) into every connection task.
pub struct Relay {
    config: RelayConfig,
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    events: EventBus,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            connections: RwLock::new(HashMap::new()),
            events: EventBus::new(EventDomain::Relay),
        })
    }

    pub fn events(&self) -> agora_observe::EventBus {
        self.events.clone()
    }

    fn store(&self) -> Option<crate::store::Store> {
        self.config
            .store_root
            .as_ref()
            .map(crate::store::Store::new)
    }

    fn is_storage_peer(&self, public_key: &str) -> bool {
        self.config.storage_peers.contains(public_key)
    }

    /// Builds an axum `Router` serving the relay protocol at `path`.
    pub fn router(self: &Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(ws_handler))
            .with_state(self.clone())
    }

    async fn snapshot_other_agents(&self, exclude: &str) -> Vec<AgentRecord> {
        self.connections
            .read()
            .await
            .values()
            .map(|c| c.record.clone())
            .filter(|a| a.public_key != exclude)
            .collect()
    }

    async fn all_agents_including(&self, requester: &str) -> Vec<AgentRecord> {
        // Used by the directory service, which excludes the requester
        // itself internally (so it needs the requester present to
        // compute `totalPeers` against the same population).
        let mut agents = self.snapshot_other_agents(requester).await;
        agents.push(AgentRecord::new(requester.to_string(), None));
        agents
    }

    /// Registers a new connection, replacing any prior connection under
    /// the same public key (last-write-wins). Returns the session id
    /// assigned to this connection and the prior connection's kill
    /// switch, if any.
    async fn register(
        &self,
        public_key: String,
        name: Option<String>,
        sender: mpsc::UnboundedSender<RelayFrame>,
        kill: oneshot::Sender<()>,
    ) -> (Uuid, Option<oneshot::Sender<()>>) {
        let session_id = Uuid::new_v4();
        let entry = ConnectionEntry {
            record: AgentRecord::new(public_key.clone(), name),
            session_id,
            sender,
            kill: Some(kill),
        };
        let mut connections = self.connections.write().await;
        let prior = connections.insert(public_key, entry).and_then(|mut old| old.kill.take());
        (session_id, prior)
    }

    /// Removes a connection, but only if `session_id` still matches the
    /// registry's current entry for `public_key` — a stale disconnect
    /// from a connection that was superseded by last-write-wins must be
    /// a no-op. Returns `true` iff the entry was actually removed.
    async fn disconnect(&self, public_key: &str, session_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        if connections
            .get(public_key)
            .is_some_and(|entry| entry.session_id == session_id)
        {
            connections.remove(public_key);
            true
        } else {
            false
        }
    }

    async fn touch(&self, public_key: &str) {
        if let Some(entry) = self.connections.write().await.get_mut(public_key) {
            entry.record.touch();
        }
    }

    /// The display name a connected agent registered with, if any.
    async fn agent_name(&self, public_key: &str) -> Option<String> {
        self.connections
            .read()
            .await
            .get(public_key)
            .and_then(|entry| entry.record.name.clone())
    }

    async fn send_to(&self, public_key: &str, frame: RelayFrame) -> bool {
        let connections = self.connections.read().await;
        match connections.get(public_key) {
            Some(entry) => entry.sender.send(frame).is_ok(),
            None => false,
        }
    }

    async fn broadcast_frame(&self, exclude: &str, frame: RelayFrame) {
        let connections = self.connections.read().await;
        for (key, entry) in connections.iter() {
            if key == exclude {
                continue;
            }
            // A send failure here means that peer's socket is already
            // gone; its own cleanup will run separately. Broadcast never
            // aborts on one recipient's failure.
            let _ = entry.sender.send(frame.clone());
        }
    }
}

async fn ws_handler(State(relay): State<Arc<Relay>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

enum ConnState {
    AwaitingRegister,
    Registered { public_key: String, session_id: Uuid },
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<RelayFrame>();

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    let mut kill_tx = Some(kill_tx);
    let mut state = ConnState::AwaitingRegister;

    loop {
        tokio::select! {
            _ = &mut kill_rx => {
                // Superseded by a newer registration under the same key.
                break;
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let next_kill = kill_tx.take();
                        match handle_frame(&relay, &mut state, &frame_tx, &text, next_kill).await {
                            FrameOutcome::Continue => {}
                            FrameOutcome::KeptKill(returned) => kill_tx = returned,
                            FrameOutcome::Close => break,
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    if let ConnState::Registered { public_key, session_id } = &state {
        let removed = relay.disconnect(public_key, *session_id).await;
        if removed {
            if relay.is_storage_peer(public_key) {
                // Presence remains advertised via `storedFor: true`; no
                // peer_offline for a storage peer going quiet.
            } else {
                relay
                    .broadcast_frame(
                        public_key,
                        RelayFrame::PeerOffline {
                            public_key: public_key.clone(),
                            name: None,
                            stored_for: None,
                        },
                    )
                    .await;
                relay.events().publish(EventPayload::PeerOffline {
                    public_key: public_key.clone(),
                });
            }
        }
    }
    forward_task.abort();
}

enum FrameOutcome {
    Continue,
    /// Returns the connection's kill-switch sender back to the caller
    /// when the frame didn't consume it (i.e. it wasn't a register).
    KeptKill(Option<oneshot::Sender<()>>),
    Close,
}

async fn handle_frame(
    relay: &Arc<Relay>,
    state: &mut ConnState,
    frame_tx: &mpsc::UnboundedSender<RelayFrame>,
    text: &str,
    kill: Option<oneshot::Sender<()>>,
) -> FrameOutcome {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let _ = frame_tx.send(RelayFrame::Error {
                message: RelayError::MalformedFrame(e.to_string()).wire_message(),
            });
            return match state {
                ConnState::AwaitingRegister => FrameOutcome::Close,
                ConnState::Registered { .. } => FrameOutcome::KeptKill(kill),
            };
        }
    };

    match state {
        ConnState::AwaitingRegister => match frame {
            ClientFrame::Register { public_key, name } => {
                handle_register(relay, state, frame_tx, public_key, name, kill.unwrap()).await;
                FrameOutcome::Continue
            }
            _ => {
                let _ = frame_tx.send(RelayFrame::Error {
                    message: RelayError::NotRegistered.wire_message(),
                });
                FrameOutcome::Close
            }
        },
        ConnState::Registered { public_key, .. } => {
            let public_key = public_key.clone();
            match frame {
                ClientFrame::Register { .. } => {
                    // Already registered; a second register on the same
                    // socket is treated as a no-op frame error, not a
                    // fatal close (it isn't the `NotRegistered` case,
                    // which is specifically about non-register frames
                    // before the first registration).
                    let _ = frame_tx.send(RelayFrame::Error {
                        message: "already registered".to_string(),
                    });
                    FrameOutcome::KeptKill(kill)
                }
                ClientFrame::Message { to, envelope } => {
                    handle_message(relay, &public_key, frame_tx, to, envelope).await;
                    FrameOutcome::KeptKill(kill)
                }
                ClientFrame::Broadcast { envelope } => {
                    handle_broadcast(relay, &public_key, frame_tx, envelope).await;
                    FrameOutcome::KeptKill(kill)
                }
                ClientFrame::Ping => {
                    relay.touch(&public_key).await;
                    let _ = frame_tx.send(RelayFrame::Pong);
                    FrameOutcome::KeptKill(kill)
                }
            }
        }
    }
}

async fn handle_register(
    relay: &Arc<Relay>,
    state: &mut ConnState,
    frame_tx: &mpsc::UnboundedSender<RelayFrame>,
    public_key: String,
    name: Option<String>,
    kill: oneshot::Sender<()>,
) {
    let name_for_broadcast = name.clone();
    let (session_id, prior_kill) = relay
        .register(public_key.clone(), name, frame_tx.clone(), kill)
        .await;
    if let Some(prior_kill) = prior_kill {
        let _ = prior_kill.send(());
    }
    *state = ConnState::Registered {
        public_key: public_key.clone(),
        session_id,
    };

    let others = relay.snapshot_other_agents(&public_key).await;
    let connected_keys: HashSet<&str> = others.iter().map(|a| a.public_key.as_str()).collect();
    let mut peers: Vec<PeerInfo> = others
        .iter()
        .map(|a| PeerInfo {
            public_key: a.public_key.clone(),
            name: a.name.clone(),
            stored_for: None,
        })
        .collect();
    for storage_key in &relay.config.storage_peers {
        if storage_key != &public_key && !connected_keys.contains(storage_key.as_str()) {
            peers.push(PeerInfo {
                public_key: storage_key.clone(),
                name: None,
                stored_for: Some(true),
            });
        }
    }
    let stored_peers = if relay.config.storage_peers.is_empty() {
        None
    } else {
        Some(
            relay
                .config
                .storage_peers
                .iter()
                .map(|k| StoredPeerInfo {
                    public_key: k.clone(),
                })
                .collect(),
        )
    };

    let _ = frame_tx.send(RelayFrame::Registered {
        public_key: public_key.clone(),
        peers,
        stored_peers,
    });

    let stored_for = relay.is_storage_peer(&public_key).then_some(true);
    relay
        .broadcast_frame(
            &public_key,
            RelayFrame::PeerOnline {
                public_key: public_key.clone(),
                name: name_for_broadcast.clone(),
                stored_for,
            },
        )
        .await;
    relay.events().publish(EventPayload::PeerConnected {
        public_key: public_key.clone(),
    });

    // Store-and-forward delivery happens strictly before any live
    // message is accepted on this connection: we perform it here, still
    // inside `handle_register`, before `handle_frame` returns control to
    // the socket read loop.
    if relay.is_storage_peer(&public_key) {
        if let Some(store) = relay.store() {
            match store.load(&public_key) {
                Ok(entries) if !entries.is_empty() => {
                    let count = entries.len();
                    for entry in entries {
                        let _ = frame_tx.send(RelayFrame::Message {
                            from: entry.from,
                            name: entry.from_name,
                            envelope: entry.envelope,
                        });
                    }
                    if let Err(e) = store.clear(&public_key) {
                        tracing::error!(error = %e, recipient = %public_key, "failed to clear store-and-forward queue after delivery");
                    }
                    relay.events().publish(EventPayload::StorageDelivered {
                        recipient: public_key,
                        count,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, recipient = %public_key, "failed to load store-and-forward queue");
                }
            }
        }
    }
}

async fn handle_message(
    relay: &Arc<Relay>,
    sender_key: &str,
    frame_tx: &mpsc::UnboundedSender<RelayFrame>,
    to: String,
    envelope: Envelope,
) {
    if let Err(verify_err) = agora_envelope::verify(&envelope) {
        let err = match verify_err {
            agora_envelope::VerifyError::IdMismatch => RelayError::InvalidEnvelopeId,
            agora_envelope::VerifyError::SignatureInvalid => RelayError::InvalidEnvelopeSignature,
        };
        let _ = frame_tx.send(RelayFrame::Error {
            message: err.wire_message(),
        });
        return;
    }
    if envelope.sender != sender_key {
        let _ = frame_tx.send(RelayFrame::Error {
            message: RelayError::SenderMismatch.wire_message(),
        });
        return;
    }
    relay.touch(sender_key).await;

    if matches!(envelope.kind, MessageType::PeerListRequest) {
        if let Some(identity) = &relay.config.identity {
            if to == identity.public_hex() {
                let payload: PeerListRequestPayload =
                    serde_json::from_value(envelope.payload.clone()).unwrap_or_default();
                let agents = relay.all_agents_including(sender_key).await;
                let response = directory::build_response(
                    identity,
                    sender_key,
                    &envelope.id,
                    &agents,
                    payload.filters,
                    now_ms(),
                );
                relay
                    .send_to(
                        sender_key,
                        RelayFrame::Message {
                            from: identity.public_hex(),
                            name: None,
                            envelope: response,
                        },
                    )
                    .await;
                return;
            }
        }
    }

    let sender_name = relay.agent_name(sender_key).await;
    let delivered = relay
        .send_to(
            &to,
            RelayFrame::Message {
                from: sender_key.to_string(),
                name: sender_name.clone(),
                envelope: envelope.clone(),
            },
        )
        .await;
    if delivered {
        relay.events().publish(EventPayload::MessageRelayed {
            from: sender_key.to_string(),
            to,
        });
        return;
    }

    if relay.is_storage_peer(&to) {
        if let Some(store) = relay.store() {
            let entry = StoredEntry {
                from: sender_key.to_string(),
                from_name: sender_name,
                envelope,
            };
            match store.enqueue(&to, &entry) {
                Ok(()) => {
                    relay.events().publish(EventPayload::MessageRelayed {
                        from: sender_key.to_string(),
                        to,
                    });
                }
                Err(e) => {
                    let _ = frame_tx.send(RelayFrame::Error {
                        message: RelayError::StorageFailure(e.to_string()).wire_message(),
                    });
                }
            }
            return;
        }
    }

    let _ = frame_tx.send(RelayFrame::Error {
        message: RelayError::RecipientUnreachable.wire_message(),
    });
}

async fn handle_broadcast(
    relay: &Arc<Relay>,
    sender_key: &str,
    frame_tx: &mpsc::UnboundedSender<RelayFrame>,
    envelope: Envelope,
) {
    if let Err(verify_err) = agora_envelope::verify(&envelope) {
        let err = match verify_err {
            agora_envelope::VerifyError::IdMismatch => RelayError::InvalidEnvelopeId,
            agora_envelope::VerifyError::SignatureInvalid => RelayError::InvalidEnvelopeSignature,
        };
        let _ = frame_tx.send(RelayFrame::Error {
            message: err.wire_message(),
        });
        return;
    }
    if envelope.sender != sender_key {
        let _ = frame_tx.send(RelayFrame::Error {
            message: RelayError::SenderMismatch.wire_message(),
        });
        return;
    }
    relay.touch(sender_key).await;

    let sender_name = relay.agent_name(sender_key).await;
    relay
        .broadcast_frame(
            sender_key,
            RelayFrame::Message {
                from: sender_key.to_string(),
                name: sender_name,
                envelope,
            },
        )
        .await;
}
