//! The relay's per-frame error taxonomy (§7). Every variant here maps to
//! an `error` frame sent back to the offending connection; none of them
//! abort the relay or any other connection.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("envelope id does not match its canonical preimage")]
    InvalidEnvelopeId,
    #[error("envelope signature does not verify")]
    InvalidEnvelopeSignature,
    #[error("envelope sender does not match the registered connection")]
    SenderMismatch,
    #[error("recipient not connected")]
    RecipientUnreachable,
    #[error("first frame on a connection must be register")]
    NotRegistered,
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl RelayError {
    /// The message text placed in an `error` frame — kept distinct from
    /// `Display` so the wire text can stay stable even if the Rust-side
    /// message wording changes.
    pub fn wire_message(&self) -> String {
        match self {
            Self::RecipientUnreachable => "Recipient not connected".to_string(),
            other => other.to_string(),
        }
    }
}
