//! Reputation record construction & validation (§4.H).
//!
//! Every record is signed and content-addressed exactly like an
//! envelope: `id` is the SHA-256 of the canonical form of its own fields
//! (minus `id` and `signature`), and `signature` is produced over that
//! same preimage by the record's author (`verifier` for verifications
//! and revocations, `agent` for commits and reveals).

use std::time::{SystemTime, UNIX_EPOCH};

use agora_crypto::Keypair;
use agora_types::Verdict;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationRecord {
    pub id: String,
    pub verifier: String,
    pub target: String,
    pub domain: String,
    pub verdict: Verdict,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evidence: Option<serde_json::Value>,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub id: String,
    pub agent: String,
    pub domain: String,
    /// Hex-encoded SHA-256 of the (still-secret) prediction.
    pub commitment: String,
    pub timestamp: i64,
    pub expiry: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevealRecord {
    pub id: String,
    pub agent: String,
    #[serde(rename = "commitmentId")]
    pub commitment_id: String,
    pub prediction: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evidence: Option<serde_json::Value>,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevocationRecord {
    pub id: String,
    pub verifier: String,
    #[serde(rename = "verificationId")]
    pub verification_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evidence: Option<serde_json::Value>,
    pub timestamp: i64,
    pub signature: String,
}

/// A tagged record as it appears in the reputation log: one JSON object
/// per line, `type` naming which of the four kinds it carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Verification(VerificationRecord),
    Commit(CommitRecord),
    Reveal(RevealRecord),
    Revocation(RevocationRecord),
}

impl Record {
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Verification(r) => r.timestamp,
            Self::Commit(r) => r.timestamp,
            Self::Reveal(r) => r.timestamp,
            Self::Revocation(r) => r.timestamp,
        }
    }
}

fn sign_fields(
    fields: serde_json::Map<String, serde_json::Value>,
    author_public: &str,
    author_private: &str,
) -> Result<(String, String), agora_crypto::CryptoError> {
    let bytes = agora_canon::canonicalize(&serde_json::Value::Object(fields))
        .expect("reputation record fields are always representable in the canonical domain");
    let id = hex::encode(Sha256::digest(&bytes));
    let keypair = Keypair::import(author_public, author_private)?;
    let signature = keypair.sign(&bytes);
    Ok((id, signature))
}

/// Builds and signs a verification record.
pub fn create_verification(
    verifier_public: &str,
    verifier_private: &str,
    target: &str,
    domain: &str,
    verdict: Verdict,
    confidence: f64,
    evidence: Option<serde_json::Value>,
) -> Result<VerificationRecord, agora_crypto::CryptoError> {
    let timestamp = now_ms();
    let mut fields = serde_json::Map::new();
    fields.insert("verifier".into(), verifier_public.into());
    fields.insert("target".into(), target.into());
    fields.insert("domain".into(), domain.into());
    fields.insert("verdict".into(), serde_json::to_value(verdict).unwrap());
    fields.insert("confidence".into(), serde_json::json!(confidence));
    fields.insert("timestamp".into(), serde_json::json!(timestamp));
    if let Some(ev) = &evidence {
        fields.insert("evidence".into(), ev.clone());
    }
    let (id, signature) = sign_fields(fields, verifier_public, verifier_private)?;
    Ok(VerificationRecord {
        id,
        verifier: verifier_public.to_string(),
        target: target.to_string(),
        domain: domain.to_string(),
        verdict,
        confidence,
        evidence,
        timestamp,
        signature,
    })
}

/// Builds and signs a commit record. `expiry` is milliseconds since the
/// epoch and must be after the stamped `timestamp`.
pub fn create_commit(
    agent_public: &str,
    agent_private: &str,
    domain: &str,
    prediction: &str,
    expiry: i64,
) -> Result<CommitRecord, agora_crypto::CryptoError> {
    let timestamp = now_ms();
    let commitment = hex::encode(Sha256::digest(prediction.as_bytes()));
    let mut fields = serde_json::Map::new();
    fields.insert("agent".into(), agent_public.into());
    fields.insert("domain".into(), domain.into());
    fields.insert("commitment".into(), commitment.clone().into());
    fields.insert("timestamp".into(), serde_json::json!(timestamp));
    fields.insert("expiry".into(), serde_json::json!(expiry));
    let (id, signature) = sign_fields(fields, agent_public, agent_private)?;
    Ok(CommitRecord {
        id,
        agent: agent_public.to_string(),
        domain: domain.to_string(),
        commitment,
        timestamp,
        expiry,
        signature,
    })
}

pub fn create_reveal(
    agent_public: &str,
    agent_private: &str,
    commitment_id: &str,
    prediction: &str,
    outcome: &str,
    evidence: Option<serde_json::Value>,
) -> Result<RevealRecord, agora_crypto::CryptoError> {
    let timestamp = now_ms();
    let mut fields = serde_json::Map::new();
    fields.insert("agent".into(), agent_public.into());
    fields.insert("commitmentId".into(), commitment_id.into());
    fields.insert("prediction".into(), prediction.into());
    fields.insert("outcome".into(), outcome.into());
    fields.insert("timestamp".into(), serde_json::json!(timestamp));
    if let Some(ev) = &evidence {
        fields.insert("evidence".into(), ev.clone());
    }
    let (id, signature) = sign_fields(fields, agent_public, agent_private)?;
    Ok(RevealRecord {
        id,
        agent: agent_public.to_string(),
        commitment_id: commitment_id.to_string(),
        prediction: prediction.to_string(),
        outcome: outcome.to_string(),
        evidence,
        timestamp,
        signature,
    })
}

pub fn create_revocation(
    verifier_public: &str,
    verifier_private: &str,
    verification_id: &str,
    reason: &str,
    evidence: Option<serde_json::Value>,
) -> Result<RevocationRecord, agora_crypto::CryptoError> {
    let timestamp = now_ms();
    let mut fields = serde_json::Map::new();
    fields.insert("verifier".into(), verifier_public.into());
    fields.insert("verificationId".into(), verification_id.into());
    fields.insert("reason".into(), reason.into());
    fields.insert("timestamp".into(), serde_json::json!(timestamp));
    if let Some(ev) = &evidence {
        fields.insert("evidence".into(), ev.clone());
    }
    let (id, signature) = sign_fields(fields, verifier_public, verifier_private)?;
    Ok(RevocationRecord {
        id,
        verifier: verifier_public.to_string(),
        verification_id: verification_id.to_string(),
        reason: reason.to_string(),
        evidence,
        timestamp,
        signature,
    })
}

/// Why a record failed validation (§4.H validation rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("id does not match SHA-256 of the canonical preimage")]
    IdMismatch,
    #[error("signature does not verify against the record's author")]
    SignatureInvalid,
    #[error("confidence must be within [0, 1]")]
    InvalidConfidence,
    #[error("commitment must be 64 hex characters")]
    InvalidCommitment,
    #[error("expiry must be after timestamp")]
    ExpiryNotAfterTimestamp,
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

fn recompute_id_and_verify(
    fields: serde_json::Map<String, serde_json::Value>,
    claimed_id: &str,
    signature: &str,
    author: &str,
) -> Result<(), ValidationError> {
    let bytes = agora_canon::canonicalize(&serde_json::Value::Object(fields))
        .map_err(|_| ValidationError::IdMismatch)?;
    let expected_id = hex::encode(Sha256::digest(&bytes));
    if expected_id != claimed_id {
        return Err(ValidationError::IdMismatch);
    }
    if !agora_crypto::verify(&bytes, signature, author) {
        return Err(ValidationError::SignatureInvalid);
    }
    Ok(())
}

fn verification_fields(r: &VerificationRecord) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = serde_json::Map::new();
    fields.insert("verifier".into(), r.verifier.clone().into());
    fields.insert("target".into(), r.target.clone().into());
    fields.insert("domain".into(), r.domain.clone().into());
    fields.insert("verdict".into(), serde_json::to_value(r.verdict).unwrap());
    fields.insert("confidence".into(), serde_json::json!(r.confidence));
    fields.insert("timestamp".into(), serde_json::json!(r.timestamp));
    if let Some(ev) = &r.evidence {
        fields.insert("evidence".into(), ev.clone());
    }
    fields
}

pub fn validate_verification(r: &VerificationRecord) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&r.confidence) {
        return Err(ValidationError::InvalidConfidence);
    }
    recompute_id_and_verify(verification_fields(r), &r.id, &r.signature, &r.verifier)
}

fn commit_fields(r: &CommitRecord) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = serde_json::Map::new();
    fields.insert("agent".into(), r.agent.clone().into());
    fields.insert("domain".into(), r.domain.clone().into());
    fields.insert("commitment".into(), r.commitment.clone().into());
    fields.insert("timestamp".into(), serde_json::json!(r.timestamp));
    fields.insert("expiry".into(), serde_json::json!(r.expiry));
    fields
}

pub fn validate_commit(r: &CommitRecord) -> Result<(), ValidationError> {
    if r.commitment.len() != 64 || !r.commitment.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidCommitment);
    }
    if r.expiry <= r.timestamp {
        return Err(ValidationError::ExpiryNotAfterTimestamp);
    }
    recompute_id_and_verify(commit_fields(r), &r.id, &r.signature, &r.agent)
}

fn reveal_fields(r: &RevealRecord) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = serde_json::Map::new();
    fields.insert("agent".into(), r.agent.clone().into());
    fields.insert("commitmentId".into(), r.commitment_id.clone().into());
    fields.insert("prediction".into(), r.prediction.clone().into());
    fields.insert("outcome".into(), r.outcome.clone().into());
    fields.insert("timestamp".into(), serde_json::json!(r.timestamp));
    if let Some(ev) = &r.evidence {
        fields.insert("evidence".into(), ev.clone());
    }
    fields
}

pub fn validate_reveal(r: &RevealRecord) -> Result<(), ValidationError> {
    if r.prediction.is_empty() {
        return Err(ValidationError::EmptyField("prediction"));
    }
    if r.outcome.is_empty() {
        return Err(ValidationError::EmptyField("outcome"));
    }
    recompute_id_and_verify(reveal_fields(r), &r.id, &r.signature, &r.agent)
}

fn revocation_fields(r: &RevocationRecord) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = serde_json::Map::new();
    fields.insert("verifier".into(), r.verifier.clone().into());
    fields.insert("verificationId".into(), r.verification_id.clone().into());
    fields.insert("reason".into(), r.reason.clone().into());
    fields.insert("timestamp".into(), serde_json::json!(r.timestamp));
    if let Some(ev) = &r.evidence {
        fields.insert("evidence".into(), ev.clone());
    }
    fields
}

pub fn validate_revocation(r: &RevocationRecord) -> Result<(), ValidationError> {
    if r.reason.is_empty() {
        return Err(ValidationError::EmptyField("reason"));
    }
    recompute_id_and_verify(revocation_fields(r), &r.id, &r.signature, &r.verifier)
}

/// Why a reveal does not bridge back to the commit it claims to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RevealMismatch {
    #[error("reveal.commitmentId does not match commit.id")]
    CommitmentIdMismatch,
    #[error("reveal.agent does not match commit.agent")]
    AgentMismatch,
    #[error("SHA-256(reveal.prediction) does not match commit.commitment")]
    PredictionHashMismatch,
}

/// The bridging check between a commit and its reveal (§4.H). Temporal
/// policy around `expiry` is left to the caller; this never rejects by
/// time.
pub fn verify_reveal_matches(commit: &CommitRecord, reveal: &RevealRecord) -> Result<(), RevealMismatch> {
    if reveal.commitment_id != commit.id {
        return Err(RevealMismatch::CommitmentIdMismatch);
    }
    if reveal.agent != commit.agent {
        return Err(RevealMismatch::AgentMismatch);
    }
    let predicted_commitment = hex::encode(Sha256::digest(reveal.prediction.as_bytes()));
    if predicted_commitment != commit.commitment {
        return Err(RevealMismatch::PredictionHashMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> Keypair {
        Keypair::generate()
    }

    #[test]
    fn verification_round_trips_and_validates() {
        let kp = keypair();
        let record = create_verification(
            &kp.public_hex(),
            &kp.private_hex(),
            "agent-x",
            "coding",
            Verdict::Correct,
            0.9,
            None,
        )
        .unwrap();
        assert_eq!(validate_verification(&record), Ok(()));
    }

    #[test]
    fn verification_out_of_range_confidence_rejected() {
        let kp = keypair();
        let mut record = create_verification(
            &kp.public_hex(),
            &kp.private_hex(),
            "agent-x",
            "coding",
            Verdict::Correct,
            0.9,
            None,
        )
        .unwrap();
        record.confidence = 1.5;
        assert_eq!(validate_verification(&record), Err(ValidationError::InvalidConfidence));
    }

    #[test]
    fn mutated_verification_fails_id_check() {
        let kp = keypair();
        let mut record = create_verification(
            &kp.public_hex(),
            &kp.private_hex(),
            "agent-x",
            "coding",
            Verdict::Correct,
            0.9,
            None,
        )
        .unwrap();
        record.target = "agent-y".to_string();
        assert_eq!(validate_verification(&record), Err(ValidationError::IdMismatch));
    }

    #[test]
    fn commit_expiry_must_be_after_timestamp() {
        let kp = keypair();
        let mut record = create_commit(&kp.public_hex(), &kp.private_hex(), "coding", "42", 10).unwrap();
        record.expiry = record.timestamp;
        // Recompute id/signature so only the semantic check can fail.
        let fields = commit_fields(&record);
        let (id, sig) = sign_fields(fields, &kp.public_hex(), &kp.private_hex()).unwrap();
        record.id = id;
        record.signature = sig;
        assert_eq!(validate_commit(&record), Err(ValidationError::ExpiryNotAfterTimestamp));
    }

    #[test]
    fn reveal_matches_its_commit() {
        let kp = keypair();
        let commit = create_commit(&kp.public_hex(), &kp.private_hex(), "coding", "the answer is 42", 9_999_999_999_999).unwrap();
        let reveal = create_reveal(&kp.public_hex(), &kp.private_hex(), &commit.id, "the answer is 42", "correct", None).unwrap();
        assert_eq!(validate_reveal(&reveal), Ok(()));
        assert_eq!(verify_reveal_matches(&commit, &reveal), Ok(()));
    }

    #[test]
    fn reveal_with_wrong_prediction_fails_the_hash_check() {
        let kp = keypair();
        let commit = create_commit(&kp.public_hex(), &kp.private_hex(), "coding", "the answer is 42", 9_999_999_999_999).unwrap();
        let reveal = create_reveal(&kp.public_hex(), &kp.private_hex(), &commit.id, "a different answer", "correct", None).unwrap();
        assert_eq!(
            verify_reveal_matches(&commit, &reveal),
            Err(RevealMismatch::PredictionHashMismatch)
        );
    }

    #[test]
    fn revocation_requires_a_non_empty_reason() {
        let kp = keypair();
        assert!(create_revocation(&kp.public_hex(), &kp.private_hex(), "verification-id", "", None)
            .map(|r| validate_revocation(&r))
            .unwrap()
            .is_err());
    }
}
