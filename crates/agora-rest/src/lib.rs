//! The REST façade (§4.M): a thin HTTP adapter in front of one
//! [`agora_client::RelayClient`] per registered session, so that a
//! caller which cannot hold a persistent WebSocket open can still
//! register, send, and poll for messages over plain HTTP.

mod error;
mod mailbox;
mod ratelimit;

pub use error::ApiError;
pub use mailbox::Mailbox;
pub use ratelimit::{RateLimitCategory, RateLimitKey, RateLimiter};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use agora_client::{RelayClient, RelayClientConfig};
use agora_envelope::Envelope;
use agora_types::MessageType;
use axum::body::Body;
use axum::extract::{ConnectInfo, Extension};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

const REGISTER_LIMIT_PER_MINUTE: u32 = 10;
const SEND_LIMIT_PER_MINUTE: u32 = 120;

struct Session {
    token: String,
    public_key: String,
    private_key: String,
    client: RelayClient,
    mailbox: AsyncMutex<Mailbox>,
    drain_task: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.drain_task.abort();
    }
}

/// Shared façade state: the relay every session connects to, the live
/// session table, and the rate limiter guarding `/register` and
/// `/send`.
pub struct AppState {
    relay_url: String,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(relay_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            relay_url: relay_url.into(),
            sessions: RwLock::new(HashMap::new()),
            rate_limiter: RateLimiter::new(),
        })
    }
}

fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(rename = "publicKey")]
    public_key: String,
    #[serde(rename = "privateKey")]
    private_key: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    token: String,
    #[serde(rename = "publicKey")]
    public_key: String,
}

async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if req.public_key.is_empty() || req.private_key.is_empty() {
        return Err(ApiError::BadRequest("publicKey and privateKey are required".to_string()));
    }

    let mut config = RelayClientConfig::new(state.relay_url.clone(), req.public_key.clone(), req.private_key.clone());
    config.name = req.name.clone();
    let client = RelayClient::new(config);
    client
        .connect()
        .await
        .map_err(|e| ApiError::InternalServerError(format!("failed to connect to relay: {e}")))?;

    let token = mint_token();
    let mut inbound = client.subscribe_messages();

    // `Session` is built inside an `Arc` up front so the drain task below
    // can hold a weak-free clone of it and push straight into its
    // mailbox for as long as the session lives.
    let session = Arc::new_cyclic(|weak: &std::sync::Weak<Session>| {
        let weak = weak.clone();
        let drain_task = tokio::spawn(async move {
            while let Ok(envelope) = inbound.recv().await {
                let Some(session) = weak.upgrade() else { break };
                session.mailbox.lock().await.push(envelope);
            }
        });
        Session {
            token: token.clone(),
            public_key: req.public_key.clone(),
            private_key: req.private_key,
            client,
            mailbox: AsyncMutex::new(Mailbox::new()),
            drain_task,
        }
    });
    state.sessions.write().await.insert(token.clone(), session);

    Ok(Json(RegisterResponse {
        token,
        public_key: req.public_key,
    }))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    to: String,
    #[serde(rename = "type")]
    kind: String,
    payload: Value,
    #[serde(rename = "inReplyTo", default)]
    in_reply_to: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    id: String,
}

async fn send_handler(
    Extension(session): Extension<Arc<Session>>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let envelope = agora_envelope::create(
        MessageType::from(req.kind),
        &session.public_key,
        &session.private_key,
        req.payload,
        req.in_reply_to,
    )
    .map_err(|e| ApiError::InternalServerError(e.to_string()))?;

    let id = envelope.id.clone();
    session.client.send(req.to, envelope).await?;
    Ok((StatusCode::ACCEPTED, Json(SendResponse { id })))
}

async fn peers_handler(Extension(session): Extension<Arc<Session>>) -> Json<Value> {
    let presence = session.client.presence().await;
    let peers: Vec<Value> = presence
        .into_iter()
        .map(|(public_key, entry)| {
            json!({
                "publicKey": public_key,
                "name": entry.name,
                "storedFor": entry.stored_for,
            })
        })
        .collect();
    Json(json!({ "peers": peers }))
}

async fn messages_handler(Extension(session): Extension<Arc<Session>>) -> Json<Vec<Envelope>> {
    let drained = session.mailbox.lock().await.drain();
    Json(drained)
}

async fn disconnect_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
) -> StatusCode {
    session.client.disconnect().await;
    state.sessions.write().await.remove(&session.token);
    StatusCode::NO_CONTENT
}

/// Extracts the bearer token, looks up its session, and attaches it to
/// the request's extensions; 401 on anything else.
async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let session = state
        .sessions
        .read()
        .await
        .get(&token)
        .cloned()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// Classifies the request by path and checks it against the rate
/// limiter, keyed by the caller's IP.
async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let (category, limit) = match req.uri().path() {
        "/register" => (RateLimitCategory::Register, REGISTER_LIMIT_PER_MINUTE),
        "/send" => (RateLimitCategory::Send, SEND_LIMIT_PER_MINUTE),
        _ => return Ok(next.run(req).await),
    };

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or_else(|| "0.0.0.0".parse().unwrap());

    if !state.rate_limiter.check(RateLimitKey(ip, category), limit) {
        use axum::response::IntoResponse;
        return Ok(ApiError::RateLimited.into_response());
    }

    Ok(next.run(req).await)
}

/// Builds the façade's router. Bind with
/// `axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())`
/// so the rate limiter can see caller IPs.
pub fn app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/send", post(send_handler))
        .route("/peers", get(peers_handler))
        .route("/messages", get(messages_handler))
        .route("/disconnect", post(disconnect_handler))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/register", post(register_handler))
        .merge(protected)
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_crypto::Keypair;
    use agora_relay::{Relay, RelayConfig};
    use tokio::net::TcpListener;

    async fn spawn_relay() -> String {
        let relay = Relay::new(RelayConfig::default());
        let router = relay.router("/ws");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("ws://{addr}/ws")
    }

    async fn spawn_facade(relay_url: String) -> String {
        let state = AppState::new(relay_url);
        let router = app(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn register_then_send_then_poll_messages() {
        let relay_url = spawn_relay().await;
        let facade_a = spawn_facade(relay_url.clone()).await;
        let facade_b = spawn_facade(relay_url).await;
        let http = reqwest::Client::new();

        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let alice_reg: Value = http
            .post(format!("{facade_a}/register"))
            .json(&json!({"publicKey": alice.public_hex(), "privateKey": alice.private_hex()}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let alice_token = alice_reg["token"].as_str().unwrap().to_string();

        let bob_reg: Value = http
            .post(format!("{facade_b}/register"))
            .json(&json!({"publicKey": bob.public_hex(), "privateKey": bob.private_hex()}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let bob_token = bob_reg["token"].as_str().unwrap().to_string();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let send_resp = http
            .post(format!("{facade_a}/send"))
            .bearer_auth(&alice_token)
            .json(&json!({"to": bob.public_hex(), "type": "publish", "payload": {"text": "hi"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(send_resp.status(), 202);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let messages: Value = http
            .get(format!("{facade_b}/messages"))
            .bearer_auth(&bob_token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let arr = messages.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["payload"]["text"], "hi");
    }

    #[tokio::test]
    async fn send_without_bearer_token_is_unauthorized() {
        let relay_url = spawn_relay().await;
        let facade = spawn_facade(relay_url).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{facade}/send"))
            .json(&json!({"to": "x", "type": "publish", "payload": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn disconnect_invalidates_the_token() {
        let relay_url = spawn_relay().await;
        let facade = spawn_facade(relay_url).await;
        let http = reqwest::Client::new();
        let kp = Keypair::generate();

        let reg: Value = http
            .post(format!("{facade}/register"))
            .json(&json!({"publicKey": kp.public_hex(), "privateKey": kp.private_hex()}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let token = reg["token"].as_str().unwrap().to_string();

        let disc = http
            .post(format!("{facade}/disconnect"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(disc.status(), 204);

        let peers = http
            .get(format!("{facade}/peers"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(peers.status(), 401);
    }
}
