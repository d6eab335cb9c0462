//! The envelope primitive: canonical serialization, content-addressed
//! identity, signature discipline, verification.
//!
//! An [`Envelope`] is the universal message wrapper every other
//! component (the relay, the relay client, the reputation ledger's
//! signed records) builds on. Its `id` is the SHA-256 of the canonical
//! form of its own fields (minus `id` and `signature`); its `signature`
//! is an Ed25519 signature over that same preimage. Both invariants are
//! checked together by [`verify`].

use std::time::{SystemTime, UNIX_EPOCH};

use agora_crypto::Keypair;
use agora_types::MessageType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A signed, content-addressed, typed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Hex-encoded SHA-256 of the canonical preimage (see [`preimage`]).
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// The sender's public key, hex-encoded.
    pub sender: String,
    /// Milliseconds since the Unix epoch, assigned at creation.
    pub timestamp: i64,
    #[serde(rename = "inReplyTo", skip_serializing_if = "Option::is_none", default)]
    pub in_reply_to: Option<String>,
    /// Opaque to the core; its structure is dictated by `kind`.
    pub payload: serde_json::Value,
    /// Ed25519 signature over the canonical preimage, hex-encoded.
    pub signature: String,
}

/// Why an envelope failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("id does not match SHA-256 of the canonical preimage")]
    IdMismatch,
    #[error("signature does not verify against the sender's public key")]
    SignatureInvalid,
}

/// Builds the canonical preimage bytes for `{payload, sender, timestamp,
/// type, inReplyTo?}`. A missing `in_reply_to` is omitted from the
/// preimage entirely — it is never emitted as `null` — so that an
/// envelope created without a reply and one later re-serialized without
/// the field hash identically.
fn preimage(
    kind: &MessageType,
    sender: &str,
    timestamp: i64,
    in_reply_to: Option<&str>,
    payload: &serde_json::Value,
) -> Vec<u8> {
    let mut fields = serde_json::Map::new();
    fields.insert("payload".to_string(), payload.clone());
    fields.insert("sender".to_string(), serde_json::Value::String(sender.to_string()));
    fields.insert(
        "timestamp".to_string(),
        serde_json::Value::Number(timestamp.into()),
    );
    fields.insert(
        "type".to_string(),
        serde_json::Value::String(kind.as_str().to_string()),
    );
    if let Some(reply) = in_reply_to {
        fields.insert(
            "inReplyTo".to_string(),
            serde_json::Value::String(reply.to_string()),
        );
    }
    // Construction above can't produce non-finite numbers or duplicate
    // keys, so this can only fail if `payload` itself is unrepresentable
    // (e.g. a NaN float hidden inside it) — callers of `create`/`verify`
    // are expected to pass JSON-safe payloads, matching the core's
    // "opaque to the core" contract.
    agora_canon::canonicalize(&serde_json::Value::Object(fields))
        .expect("envelope fields are always representable in the canonical domain")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

/// Builds and signs a new envelope. `timestamp` is stamped at call time.
pub fn create(
    kind: MessageType,
    sender: &str,
    private_key_hex: &str,
    payload: serde_json::Value,
    in_reply_to: Option<String>,
) -> Result<Envelope, agora_crypto::CryptoError> {
    let keypair = Keypair::import(sender, private_key_hex)?;
    let timestamp = now_ms();
    let bytes = preimage(&kind, sender, timestamp, in_reply_to.as_deref(), &payload);
    let id = hex::encode(Sha256::digest(&bytes));
    let signature = keypair.sign(&bytes);
    Ok(Envelope {
        id,
        kind,
        sender: sender.to_string(),
        timestamp,
        in_reply_to,
        payload,
        signature,
    })
}

/// Recomputes the canonical preimage from the envelope's own fields and
/// checks both the content-addressed id and the signature.
///
/// A verified envelope is safe to route, store, or display. No field may
/// be mutated in place afterwards — doing so invalidates the id and/or
/// signature, which is exactly what [`verify`] is for detecting.
pub fn verify(envelope: &Envelope) -> Result<(), VerifyError> {
    let bytes = preimage(
        &envelope.kind,
        &envelope.sender,
        envelope.timestamp,
        envelope.in_reply_to.as_deref(),
        &envelope.payload,
    );
    let expected_id = hex::encode(Sha256::digest(&bytes));
    if expected_id != envelope.id {
        return Err(VerifyError::IdMismatch);
    }
    if !agora_crypto::verify(&bytes, &envelope.signature, &envelope.sender) {
        return Err(VerifyError::SignatureInvalid);
    }
    Ok(())
}
