//! The CLI's error type: every subcommand returns `Result<Value, CliError>`,
//! and `main` turns any `Err` into `{"status":"failed","reason":...}` on
//! stdout plus a nonzero exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] agora_config::ConfigError),
    #[error("cryptographic error: {0}")]
    Crypto(#[from] agora_crypto::CryptoError),
    #[error("relay client error: {0}")]
    Client(#[from] agora_client::ClientError),
    #[error("envelope verification failed: {0}")]
    Verify(#[from] agora_envelope::VerifyError),
    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] agora_webhook::WebhookError),
    #[error("webhook decode failed: {0}")]
    WebhookDecode(#[from] agora_webhook::WebhookDecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("peer {0} has no reachable address")]
    NoReachableAddress(String),
    #[error("timed out waiting for a relay reply")]
    Timeout,
}
