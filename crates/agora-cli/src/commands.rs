use std::path::Path;
use std::time::Duration;

use agora_client::{RelayClient, RelayClientConfig};
use agora_config::{Config, PeerEntry};
use agora_types::MessageType;
use serde_json::{json, Value};

use crate::error::CliError;

fn load(path: &Path) -> Result<Config, CliError> {
    Ok(agora_config::load(Some(path))?)
}

pub async fn init(path: &Path, name: Option<String>) -> Result<Value, CliError> {
    let mut config = load(path)?;
    if name.is_some() {
        config.identity.name = name;
    }
    agora_config::save(path, &config)?;
    Ok(json!({
        "publicKey": config.identity.public_key,
        "name": config.identity.name,
        "configPath": path.display().to_string(),
    }))
}

pub async fn whoami(path: &Path) -> Result<Value, CliError> {
    let config = load(path)?;
    Ok(json!({
        "publicKey": config.identity.public_key,
        "name": config.identity.name,
    }))
}

pub async fn status(path: &Path) -> Result<Value, CliError> {
    let config = load(path)?;
    Ok(json!({
        "publicKey": config.identity.public_key,
        "name": config.identity.name,
        "peerCount": config.peers.len(),
        "relayUrl": config.relay.url,
    }))
}

pub async fn peers_add(
    path: &Path,
    public_key: String,
    name: Option<String>,
    addresses: Vec<String>,
    webhook_token: Option<String>,
) -> Result<Value, CliError> {
    let mut config = load(path)?;
    config.add_peer(
        public_key.clone(),
        PeerEntry {
            name,
            addresses,
            webhook_token,
        },
    );
    agora_config::save(path, &config)?;
    Ok(json!({ "added": public_key }))
}

pub async fn peers_list(path: &Path) -> Result<Value, CliError> {
    let config = load(path)?;
    let peers: Vec<Value> = config
        .list_peers()
        .map(|(key, entry)| {
            json!({
                "publicKey": key,
                "name": entry.name,
                "addresses": entry.addresses,
            })
        })
        .collect();
    Ok(json!({ "peers": peers }))
}

pub async fn peers_remove(path: &Path, public_key: String) -> Result<Value, CliError> {
    let mut config = load(path)?;
    let removed = config.remove_peer(&public_key).is_some();
    agora_config::save(path, &config)?;
    Ok(json!({ "removed": removed }))
}

/// Short-lived relay connection that sends a signed `peer_list_request`
/// to `relay_identity` and waits for the matching `peer_list_response`.
pub async fn peers_discover(path: &Path, relay_identity: String) -> Result<Value, CliError> {
    let config = load(path)?;
    let client_config = RelayClientConfig::new(
        config.relay.url.clone(),
        config.identity.public_key.clone(),
        config.identity.private_key.clone(),
    );
    let client = RelayClient::new(client_config);
    client.connect().await?;

    let mut inbound = client.subscribe_messages();
    let request = agora_envelope::create(
        MessageType::PeerListRequest,
        &config.identity.public_key,
        &config.identity.private_key,
        json!({}),
        None,
    )?;
    let request_id = request.id.clone();
    client.send(relay_identity, request).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            received = inbound.recv() => {
                let Ok(envelope) = received else { return Err(CliError::Timeout) };
                if envelope.kind == MessageType::PeerListResponse && envelope.in_reply_to.as_deref() == Some(&request_id) {
                    client.disconnect().await;
                    return Ok(envelope.payload);
                }
            }
            _ = &mut deadline => {
                client.disconnect().await;
                return Err(CliError::Timeout);
            }
        }
    }
}

pub async fn send(
    path: &Path,
    to: String,
    kind: String,
    payload: Value,
    in_reply_to: Option<String>,
) -> Result<Value, CliError> {
    let config = load(path)?;
    let envelope = agora_envelope::create(
        MessageType::from(kind),
        &config.identity.public_key,
        &config.identity.private_key,
        payload,
        in_reply_to,
    )?;

    let peer = config.peers.get(&to);
    let webhook_url = peer.and_then(|p| {
        p.addresses
            .iter()
            .find(|a| a.starts_with("http://") || a.starts_with("https://"))
    });

    if let Some(url) = webhook_url {
        let http = agora_webhook::client()?;
        let token = peer.and_then(|p| p.webhook_token.as_deref()).unwrap_or("");
        agora_webhook::send_webhook(&http, url, token, &envelope, config.identity.name.as_deref()).await?;
        return Ok(json!({ "id": envelope.id, "via": "webhook" }));
    }

    let relay_url = peer
        .and_then(|p| p.addresses.iter().find(|a| a.starts_with("ws://") || a.starts_with("wss://")))
        .cloned()
        .unwrap_or_else(|| config.relay.url.clone());

    let client = RelayClient::new(RelayClientConfig::new(
        relay_url,
        config.identity.public_key.clone(),
        config.identity.private_key.clone(),
    ));
    client.connect().await?;
    let id = envelope.id.clone();
    client.send(to, envelope).await?;
    client.disconnect().await;
    Ok(json!({ "id": id, "via": "relay" }))
}

pub async fn decode(raw: String) -> Result<Value, CliError> {
    let envelope: agora_envelope::Envelope = serde_json::from_str(&raw)?;
    match agora_envelope::verify(&envelope) {
        Ok(()) => Ok(json!({ "valid": true, "envelope": envelope })),
        Err(e) => Ok(json!({ "valid": false, "reason": e.to_string(), "envelope": envelope })),
    }
}

pub async fn announce(path: &Path, payload: Value) -> Result<Value, CliError> {
    let config = load(path)?;
    let client = RelayClient::new(RelayClientConfig::new(
        config.relay.url.clone(),
        config.identity.public_key.clone(),
        config.identity.private_key.clone(),
    ));
    client.connect().await?;

    let mut delivered = Vec::new();
    for (public_key, _) in config.list_peers() {
        let envelope = agora_envelope::create(
            MessageType::Announce,
            &config.identity.public_key,
            &config.identity.private_key,
            payload.clone(),
            None,
        )?;
        if client.send(public_key.clone(), envelope).await.is_ok() {
            delivered.push(public_key.clone());
        }
    }
    client.disconnect().await;
    Ok(json!({ "announcedTo": delivered }))
}

pub async fn diagnose(path: &Path) -> Result<Value, CliError> {
    let mut checks = Vec::new();

    let config = match load(path) {
        Ok(c) => {
            checks.push(json!({ "check": "config", "ok": true }));
            c
        }
        Err(e) => {
            checks.push(json!({ "check": "config", "ok": false, "reason": e.to_string() }));
            return Ok(json!({ "checks": checks, "ok": false }));
        }
    };

    let identity_ok = agora_crypto::Keypair::import(&config.identity.public_key, &config.identity.private_key).is_ok();
    checks.push(json!({ "check": "identity", "ok": identity_ok }));

    let client = RelayClient::new(RelayClientConfig::new(
        config.relay.url.clone(),
        config.identity.public_key.clone(),
        config.identity.private_key.clone(),
    ));
    let relay_ok = client.connect().await.is_ok();
    checks.push(json!({ "check": "relay", "ok": relay_ok, "url": config.relay.url }));
    if relay_ok {
        client.disconnect().await;
    }

    let ok = identity_ok && relay_ok;
    Ok(json!({ "checks": checks, "ok": ok }))
}

/// Runs the REST façade, binding `127.0.0.1:{port}`. Never returns under
/// normal operation; the process is killed to stop it.
pub async fn serve(path: &Path, port: u16) -> Result<Value, CliError> {
    let config = load(path)?;
    let state = agora_rest::AppState::new(config.relay.url.clone());
    let app = agora_rest::app(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "agora-rest façade listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(json!({ "status": "stopped" }))
}

/// Runs the relay server, binding `127.0.0.1:{port}`. When `storage_peers`
/// is non-empty the relay's own identity also backs its peer-directory
/// service, and undelivered envelopes are persisted under a temporary
/// store root scoped to this process.
pub async fn relay(path: &Path, port: u16, storage_peers: Vec<String>) -> Result<Value, CliError> {
    let config = load(path)?;
    let identity = agora_crypto::Keypair::import(&config.identity.public_key, &config.identity.private_key)?;

    let store_root = if storage_peers.is_empty() {
        None
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let root = std::path::PathBuf::from(home).join(".agora").join("store");
        std::fs::create_dir_all(&root)?;
        Some(root)
    };

    let relay_config = agora_relay::RelayConfig {
        storage_peers: storage_peers.into_iter().collect(),
        store_root,
        identity: Some(identity),
    };
    let relay = agora_relay::Relay::new(relay_config);
    let app = relay.router("/ws");

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(json!({ "status": "stopped" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
