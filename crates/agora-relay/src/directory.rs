//! Signed relay-mediated peer-list directory service (§4.E.1).
//!
//! When the relay itself has an identity, any connected agent may ask
//! it "who else is here" via a signed `peer_list_request` envelope
//! addressed to the relay's own public key. The reply is itself a
//! signed, content-addressed envelope, so the requester can verify it
//! exactly like any other.

use agora_crypto::Keypair;
use agora_envelope::Envelope;
use agora_types::MessageType;
use serde::{Deserialize, Serialize};

use crate::agent::AgentRecord;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerListFilters {
    #[serde(rename = "activeWithin", default)]
    pub active_within_ms: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerListRequestPayload {
    #[serde(default)]
    pub filters: Option<PeerListFilters>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryPeerEntry {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerListResponsePayload {
    pub peers: Vec<DirectoryPeerEntry>,
    #[serde(rename = "totalPeers")]
    pub total_peers: usize,
    #[serde(rename = "relayPublicKey")]
    pub relay_public_key: String,
}

/// Builds the signed `peer_list_response` envelope for a request from
/// `requester`, given the full set of currently connected agents and
/// the current time (for `activeWithin` filtering).
///
/// `totalPeers` is the count of connected agents excluding the
/// requester *before* any filter is applied — `peers` itself may be a
/// smaller, filtered/limited view of that same set.
pub fn build_response(
    relay_identity: &Keypair,
    requester: &str,
    request_id: &str,
    connected: &[AgentRecord],
    filters: Option<PeerListFilters>,
    now: i64,
) -> Envelope {
    let mut candidates: Vec<&AgentRecord> = connected
        .iter()
        .filter(|agent| agent.public_key != requester)
        .collect();
    let total_peers = candidates.len();

    if let Some(active_within) = filters.as_ref().and_then(|f| f.active_within_ms) {
        candidates.retain(|agent| now - agent.last_seen < active_within);
    }
    if let Some(limit) = filters.as_ref().and_then(|f| f.limit) {
        candidates.truncate(limit);
    }

    let payload = PeerListResponsePayload {
        peers: candidates
            .into_iter()
            .map(|agent| DirectoryPeerEntry {
                public_key: agent.public_key.clone(),
                metadata: agent.metadata.clone(),
                last_seen: agent.last_seen,
            })
            .collect(),
        total_peers,
        relay_public_key: relay_identity.public_hex(),
    };

    agora_envelope::create(
        MessageType::PeerListResponse,
        &relay_identity.public_hex(),
        &relay_identity.private_hex(),
        serde_json::to_value(payload).expect("payload is always representable"),
        Some(request_id.to_string()),
    )
    .expect("relay identity is always a valid keypair")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(key: &str, last_seen: i64) -> AgentRecord {
        AgentRecord {
            public_key: key.to_string(),
            name: None,
            last_seen,
            metadata: None,
        }
    }

    #[test]
    fn total_peers_excludes_requester_and_ignores_filters_s5() {
        let relay = Keypair::generate();
        let connected = vec![agent("A", 1000), agent("B", 1000)];
        let env = build_response(&relay, "A", "req-1", &connected, None, 1000);
        assert_eq!(env.in_reply_to.as_deref(), Some("req-1"));
        let payload: PeerListResponsePayload = serde_json::from_value(env.payload.clone()).unwrap();
        assert_eq!(payload.total_peers, 1);
        assert_eq!(payload.peers.len(), 1);
        assert_eq!(payload.peers[0].public_key, "B");
        assert_eq!(payload.relay_public_key, relay.public_hex());
        assert_eq!(agora_envelope::verify(&env), Ok(()));
    }

    #[test]
    fn active_within_filters_stale_agents_but_total_peers_unaffected() {
        let relay = Keypair::generate();
        let connected = vec![agent("A", 1000), agent("B", 1000), agent("C", 0)];
        let filters = PeerListFilters {
            active_within_ms: Some(500),
            limit: None,
        };
        let env = build_response(&relay, "A", "req-2", &connected, Some(filters), 1000);
        let payload: PeerListResponsePayload = serde_json::from_value(env.payload).unwrap();
        assert_eq!(payload.total_peers, 2);
        assert_eq!(payload.peers.len(), 1);
        assert_eq!(payload.peers[0].public_key, "B");
    }

    #[test]
    fn limit_truncates_in_insertion_order() {
        let relay = Keypair::generate();
        let connected = vec![agent("A", 1000), agent("B", 1000), agent("C", 1000)];
        let filters = PeerListFilters {
            active_within_ms: None,
            limit: Some(1),
        };
        let env = build_response(&relay, "A", "req-3", &connected, Some(filters), 1000);
        let payload: PeerListResponsePayload = serde_json::from_value(env.payload).unwrap();
        assert_eq!(payload.peers.len(), 1);
        assert_eq!(payload.peers[0].public_key, "B");
    }
}
