//! The relay client's error taxonomy (§7).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("not registered with a relay")]
    NotRegistered,
    #[error("send failed: {0}")]
    SendFailure(String),
}
