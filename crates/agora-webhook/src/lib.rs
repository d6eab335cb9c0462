//! The webhook transport (§4.N): a wire adapter pair for agents reached
//! over plain HTTP instead of a persistent relay connection. Neither
//! direction persists anything — `send_webhook`/`decode_inbound` are
//! pure functions over the envelope type from `agora-envelope`.

use agora_config::PeerTable;
use agora_envelope::Envelope;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::time::Duration;
use thiserror::Error;

const ENVELOPE_PREFIX: &str = "[AGORA_ENVELOPE]";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("request to peer webhook failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("peer webhook responded with status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}

/// Builds a `reqwest::Client` with the webhook transport's fixed 10s
/// timeout. Callers share one client across sends rather than building
/// one per call, matching the connection-pooling discipline a `reqwest`
/// based integration normally relies on.
pub fn client() -> Result<reqwest::Client, WebhookError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(WebhookError::Request)
}

/// Delivers `envelope` to a peer reachable only over HTTP. POSTs to
/// `{peer_url}/agent` with the peer's bearer token, wrapping the
/// envelope in the same `[AGORA_ENVELOPE]`-prefixed, base64url-encoded
/// text body an embedding chat surface would carry as a message.
pub async fn send_webhook(
    client: &reqwest::Client,
    peer_url: &str,
    peer_token: &str,
    envelope: &Envelope,
    name: Option<&str>,
) -> Result<(), WebhookError> {
    let encoded = encode_outbound(envelope)?;
    let body = serde_json::json!({
        "message": encoded,
        "name": name,
        "sessionKey": envelope.id,
        "deliver": false,
    });

    let response = client
        .post(format!("{peer_url}/agent"))
        .bearer_auth(peer_token)
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), peer_url, "webhook delivery rejected by peer");
        return Err(WebhookError::UnexpectedStatus(response.status()));
    }
    tracing::debug!(peer_url, envelope_id = %envelope.id, "delivered envelope via webhook");
    Ok(())
}

/// Encodes `envelope` as `"[AGORA_ENVELOPE]" + base64url(json(envelope))`,
/// the wire text `decode_inbound` expects on the receiving end.
pub fn encode_outbound(envelope: &Envelope) -> Result<String, WebhookError> {
    let json = serde_json::to_vec(envelope)?;
    Ok(format!("{ENVELOPE_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

/// Why an inbound webhook message could not be accepted as an envelope.
#[derive(Debug, Error)]
pub enum WebhookDecodeError {
    #[error("message is missing the [AGORA_ENVELOPE] prefix")]
    MissingPrefix,
    #[error("failed to base64url-decode the envelope body: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to parse the envelope body as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope failed verification: {0}")]
    Verification(#[from] agora_envelope::VerifyError),
    #[error("sender {0} is not a known peer")]
    UnknownSender(String),
}

/// Parses, verifies, and authorizes an inbound webhook message. Each
/// failure mode names the step that failed: a message with no
/// `[AGORA_ENVELOPE]` prefix is simply not for us; a present but
/// malformed or unverifiable envelope, or one from a peer we don't
/// recognize, is rejected outright.
pub fn decode_inbound(message: &str, known_peers: &PeerTable) -> Result<Envelope, WebhookDecodeError> {
    let encoded = message
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or(WebhookDecodeError::MissingPrefix)?;
    let json = URL_SAFE_NO_PAD.decode(encoded)?;
    let envelope: Envelope = serde_json::from_slice(&json)?;
    agora_envelope::verify(&envelope)?;
    if !known_peers.contains_key(&envelope.sender) {
        return Err(WebhookDecodeError::UnknownSender(envelope.sender));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_config::PeerEntry;
    use agora_crypto::Keypair;
    use agora_types::MessageType;
    use std::collections::BTreeMap;

    fn sample_envelope() -> (Keypair, Envelope) {
        let kp = Keypair::generate();
        let envelope = agora_envelope::create(
            MessageType::Publish,
            &kp.public_hex(),
            &kp.private_hex(),
            serde_json::json!({"text": "hi"}),
            None,
        )
        .unwrap();
        (kp, envelope)
    }

    #[test]
    fn encode_then_decode_round_trips_for_a_known_peer() {
        let (kp, envelope) = sample_envelope();
        let encoded = encode_outbound(&envelope).unwrap();

        let mut peers = PeerTable::new();
        peers.insert(kp.public_hex(), PeerEntry::default());

        let decoded = decode_inbound(&encoded, &peers).unwrap();
        assert_eq!(decoded.id, envelope.id);
    }

    #[test]
    fn missing_prefix_is_rejected() {
        let peers = PeerTable::new();
        let err = decode_inbound("not an envelope", &peers).unwrap_err();
        assert!(matches!(err, WebhookDecodeError::MissingPrefix));
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let (_kp, envelope) = sample_envelope();
        let encoded = encode_outbound(&envelope).unwrap();
        let peers = PeerTable::new();
        let err = decode_inbound(&encoded, &peers).unwrap_err();
        assert!(matches!(err, WebhookDecodeError::UnknownSender(_)));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (kp, mut envelope) = sample_envelope();
        envelope.payload = serde_json::json!({"text": "tampered"});
        let encoded = encode_outbound(&envelope).unwrap();

        let mut peers = PeerTable::new();
        peers.insert(kp.public_hex(), PeerEntry::default());

        let err = decode_inbound(&encoded, &peers).unwrap_err();
        assert!(matches!(err, WebhookDecodeError::Verification(_)));
    }
}
