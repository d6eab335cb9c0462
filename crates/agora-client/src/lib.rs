//! The persistent relay client (§4.G): a reconnecting WebSocket
//! connection to a single relay, handing verified inbound envelopes to
//! the caller and framing outbound sends.
//!
//! The connection lifecycle runs entirely inside one background task per
//! [`RelayClient::connect`] call, mirroring the handle/background-task
//! split used by the node event loop in the peer-to-peer examples this
//! crate draws on: a cheap-to-clone handle communicates with the task
//! through channels rather than shared locks guarding I/O.

mod error;
mod presence;

pub use error::ClientError;
pub use presence::{Presence, PresenceEntry};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_envelope::Envelope;
use agora_observe::{EventBus, EventDomain, EventPayload};
use agora_relay::{ClientFrame, RelayFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as TsMessage;

const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Connection lifecycle, per §4.G: `Idle -> Connecting -> Open ->
/// Registered -> Open/Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Open,
    Registered,
    Closed,
}

/// Static configuration for one relay client.
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub relay_url: String,
    pub public_key: String,
    pub private_key: String,
    pub name: Option<String>,
    pub keepalive_interval: Duration,
    pub max_reconnect_delay: Duration,
}

impl RelayClientConfig {
    pub fn new(relay_url: impl Into<String>, public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            public_key: public_key.into(),
            private_key: private_key.into(),
            name: None,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
        }
    }
}

struct Inner {
    config: RelayClientConfig,
    state: RwLock<ClientState>,
    presence: RwLock<Presence>,
    outbound: RwLock<Option<mpsc::UnboundedSender<ClientFrame>>>,
    connect_waiter: Mutex<Option<oneshot::Sender<Result<(), ClientError>>>>,
    should_reconnect: AtomicBool,
    reconnect_attempt: AtomicU32,
    events: EventBus,
    inbound: broadcast::Sender<Envelope>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl Inner {
    async fn set_state(&self, state: ClientState) {
        *self.state.write().await = state;
    }
}

/// A cheap-to-clone handle to a persistent relay connection.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    pub fn new(config: RelayClientConfig) -> Self {
        let (inbound, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ClientState::Idle),
                presence: RwLock::new(Presence::default()),
                outbound: RwLock::new(None),
                connect_waiter: Mutex::new(None),
                should_reconnect: AtomicBool::new(false),
                reconnect_attempt: AtomicU32::new(0),
                events: EventBus::new(EventDomain::Client),
                inbound,
                task: RwLock::new(None),
            }),
        }
    }

    /// Opens a connection and registers with the relay. A no-op if a
    /// connection is already open, connecting, or registered (§4.G
    /// invariant: exactly one active connection at a time). Resolves once
    /// `registered` arrives; rejects if the socket closes first.
    pub async fn connect(&self) -> Result<(), ClientError> {
        {
            let state = *self.inner.state.read().await;
            if !matches!(state, ClientState::Idle | ClientState::Closed) {
                return Ok(());
            }
        }
        let (tx, rx) = oneshot::channel();
        *self.inner.connect_waiter.lock().await = Some(tx);
        self.inner.should_reconnect.store(true, Ordering::SeqCst);
        self.inner.reconnect_attempt.store(0, Ordering::SeqCst);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { run(inner).await });
        *self.inner.task.write().await = Some(handle);

        rx.await.unwrap_or(Err(ClientError::ConnectionLost))
    }

    /// The single cancellation point: clears `shouldReconnect`, aborts the
    /// background task (releasing any pending reconnect/keepalive timer),
    /// and closes the socket.
    pub async fn disconnect(&self) {
        self.inner.should_reconnect.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.task.write().await.take() {
            handle.abort();
        }
        *self.inner.outbound.write().await = None;
        self.inner.set_state(ClientState::Closed).await;
        self.inner.events.publish(EventPayload::Disconnected);
    }

    pub async fn state(&self) -> ClientState {
        *self.inner.state.read().await
    }

    pub async fn registered(&self) -> bool {
        *self.inner.state.read().await == ClientState::Registered
    }

    pub async fn is_peer_online(&self, public_key: &str) -> bool {
        self.inner.presence.read().await.is_peer_online(public_key)
    }

    pub async fn presence(&self) -> HashMap<String, PresenceEntry> {
        self.inner.presence.read().await.snapshot()
    }

    pub async fn storage_peers(&self) -> HashSet<String> {
        self.inner.presence.read().await.storage_peers()
    }

    /// Subscribes to verified inbound envelopes. Each subscriber sees
    /// every envelope delivered from this point forward.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Envelope> {
        self.inner.inbound.subscribe()
    }

    pub fn events(&self) -> EventBus {
        self.inner.events.clone()
    }

    /// Sends a direct envelope. Fails fast with [`ClientError::NotRegistered`]
    /// rather than queuing when the client is not currently registered.
    pub async fn send(&self, to: impl Into<String>, envelope: Envelope) -> Result<(), ClientError> {
        self.send_frame(ClientFrame::Message {
            to: to.into(),
            envelope,
        })
        .await
    }

    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), ClientError> {
        self.send_frame(ClientFrame::Broadcast { envelope }).await
    }

    async fn send_frame(&self, frame: ClientFrame) -> Result<(), ClientError> {
        if !self.registered().await {
            return Err(ClientError::NotRegistered);
        }
        let outbound = self.inner.outbound.read().await;
        match outbound.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|e| ClientError::SendFailure(e.to_string())),
            None => Err(ClientError::NotRegistered),
        }
    }
}

async fn run(inner: Arc<Inner>) {
    loop {
        if !inner.should_reconnect.load(Ordering::SeqCst) {
            break;
        }
        inner.set_state(ClientState::Connecting).await;

        match run_one_connection(&inner).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, "relay connection attempt failed");
                let mut waiter = inner.connect_waiter.lock().await;
                if let Some(tx) = waiter.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }

        *inner.outbound.write().await = None;

        if !inner.should_reconnect.load(Ordering::SeqCst) {
            break;
        }
        let attempt = inner.reconnect_attempt.fetch_add(1, Ordering::SeqCst);
        let delay_ms = 1000u64
            .saturating_mul(1u64 << attempt.min(20))
            .min(inner.config.max_reconnect_delay.as_millis() as u64);
        inner.events.publish(EventPayload::Reconnecting { attempt: attempt + 1 });
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    inner.set_state(ClientState::Closed).await;
}

/// Drives a single WebSocket connection attempt from dial through close.
/// Returns `Ok(())` for any close that happened after a successful open
/// (the outer loop decides whether to reconnect); returns `Err` only for
/// a dial failure, so the initial `connect()` can reject promptly.
async fn run_one_connection(inner: &Arc<Inner>) -> Result<(), ClientError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(inner.config.relay_url.clone())
        .await
        .map_err(|e| ClientError::RelayUnavailable(e.to_string()))?;

    inner.reconnect_attempt.store(0, Ordering::SeqCst);
    inner.set_state(ClientState::Open).await;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ClientFrame>();
    *inner.outbound.write().await = Some(frame_tx.clone());

    let register_frame = ClientFrame::Register {
        public_key: inner.config.public_key.clone(),
        name: inner.config.name.clone(),
    };
    let _ = frame_tx.send(register_frame);

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_tx.send(TsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut keepalive = tokio::time::interval(inner.config.keepalive_interval);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // first tick fires immediately; consume it

    let mut ever_registered = false;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                let _ = frame_tx.send(ClientFrame::Ping);
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(TsMessage::Text(text))) => {
                        handle_inbound_text(inner, &text, &mut ever_registered).await;
                    }
                    Some(Ok(TsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    forward_task.abort();

    if !ever_registered {
        let mut waiter = inner.connect_waiter.lock().await;
        if let Some(tx) = waiter.take() {
            let _ = tx.send(Err(ClientError::ConnectionLost));
        }
    }

    Ok(())
}

async fn handle_inbound_text(inner: &Arc<Inner>, text: &str, ever_registered: &mut bool) {
    let frame: RelayFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, "malformed frame from relay");
            return;
        }
    };

    match frame {
        RelayFrame::Registered { peers, stored_peers, .. } => {
            let mut presence = inner.presence.write().await;
            presence.reset();
            for peer in peers {
                presence.mark_online(peer.public_key, peer.name, peer.stored_for.unwrap_or(false));
            }
            if let Some(stored) = stored_peers {
                for s in stored {
                    presence.mark_storage_peer(s.public_key);
                }
            }
            drop(presence);

            inner.set_state(ClientState::Registered).await;
            *ever_registered = true;
            inner.events.publish(EventPayload::Connected {
                public_key: inner.config.public_key.clone(),
            });

            let mut waiter = inner.connect_waiter.lock().await;
            if let Some(tx) = waiter.take() {
                let _ = tx.send(Ok(()));
            }
        }
        RelayFrame::Message { from, envelope, .. } => {
            if let Err(e) = agora_envelope::verify(&envelope) {
                tracing::warn!(error = %e, "dropping envelope that failed verification");
                return;
            }
            if envelope.sender != from {
                tracing::warn!("dropping envelope whose sender does not match relay-reported origin");
                return;
            }
            let _ = inner.inbound.send(envelope);
        }
        RelayFrame::PeerOnline { public_key, name, stored_for } => {
            inner
                .presence
                .write()
                .await
                .mark_online(public_key, name, stored_for.unwrap_or(false));
        }
        RelayFrame::PeerOffline { public_key, .. } => {
            inner.presence.write().await.mark_offline(&public_key);
        }
        RelayFrame::Pong => {}
        RelayFrame::Error { message } => {
            tracing::warn!(message = %message, "relay reported an error");
            inner.events.publish(EventPayload::RelayError { message });
        }
    }
}
