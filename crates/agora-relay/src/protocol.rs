//! Client→relay and relay→client frame schemas (§4.D).
//!
//! Framing is newline-free: one JSON object per WebSocket text message.

use agora_envelope::Envelope;
use serde::{Deserialize, Serialize};

/// A frame a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Register {
        #[serde(rename = "publicKey")]
        public_key: String,
        #[serde(default)]
        name: Option<String>,
    },
    Message {
        to: String,
        envelope: Envelope,
    },
    Broadcast {
        envelope: Envelope,
    },
    Ping,
}

/// A frame the relay sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Registered {
        #[serde(rename = "publicKey")]
        public_key: String,
        peers: Vec<PeerInfo>,
        #[serde(rename = "storedPeers", skip_serializing_if = "Option::is_none", default)]
        stored_peers: Option<Vec<StoredPeerInfo>>,
    },
    Message {
        from: String,
        #[serde(default)]
        name: Option<String>,
        envelope: Envelope,
    },
    PeerOnline {
        #[serde(rename = "publicKey")]
        public_key: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "storedFor", skip_serializing_if = "Option::is_none", default)]
        stored_for: Option<bool>,
    },
    PeerOffline {
        #[serde(rename = "publicKey")]
        public_key: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "storedFor", skip_serializing_if = "Option::is_none", default)]
        stored_for: Option<bool>,
    },
    Pong,
    Error {
        message: String,
    },
}

/// An entry in a `registered` frame's peer list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "storedFor", skip_serializing_if = "Option::is_none", default)]
    pub stored_for: Option<bool>,
}

/// An entry in a `registered` frame's `storedPeers` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPeerInfo {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}
