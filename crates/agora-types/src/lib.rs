//! Shared types used across the Agora workspace.
//!
//! No crate in the workspace depends on anything *except* `agora-types`
//! for cross-cutting type definitions, which keeps the dependency graph
//! a DAG rooted here.

mod message_type;
mod verdict;

pub use message_type::MessageType;
pub use verdict::Verdict;

/// A hex-encoded Ed25519 public key, 64 characters (32 bytes).
///
/// This is a type alias rather than a newtype: every crate that handles
/// public keys also handles arbitrary hex strings from the wire, and a
/// newtype would just relocate the validation rather than remove it.
pub type PublicKeyHex = String;
