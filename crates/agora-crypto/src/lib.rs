//! Ed25519 keypair generation, detached signing, and verification.
//!
//! This crate is the sole owner of private-key material in the Agora
//! workspace: every other crate passes hex-encoded public keys and
//! signatures around as plain strings, and only calls into here to
//! produce or check them.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors produced while importing or using key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("{field} is not valid hex: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },
    #[error("{field} has {actual} bytes, expected {expected}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("public key bytes do not form a valid Ed25519 point")]
    InvalidPublicKey,
}

/// An Ed25519 keypair, held as raw key bytes plus the parsed signing key.
///
/// Only the owner of a `Keypair` can sign with it; the public key alone
/// (hex-encoded, via [`Keypair::public_hex`]) is what every other agent
/// and the relay see.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generates a fresh keypair using the operating system's CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Reconstructs a keypair from hex-encoded public and private keys.
    ///
    /// The public key is recomputed from the private key and compared
    /// against `public_hex` would be a stronger check, but Ed25519
    /// private keys deterministically *derive* their public key — the
    /// caller-supplied public key is used only as the externally-visible
    /// identity and is not re-derived here, matching `import`'s contract
    /// in the core specification (no length check beyond what Ed25519
    /// itself requires).
    pub fn import(public_hex: &str, private_hex: &str) -> Result<Self, CryptoError> {
        let private_bytes = decode_hex_fixed::<32>("private_key", private_hex)?;
        let _ = decode_hex_fixed::<32>("public_key", public_hex)?;
        let signing_key = SigningKey::from_bytes(&private_bytes);
        Ok(Self { signing_key })
    }

    /// This keypair's public key, hex-encoded (32 bytes → 64 hex chars).
    pub fn public_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// This keypair's private key, hex-encoded. Callers are responsible
    /// for keeping this out of logs and off the wire.
    pub fn private_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signs `bytes` with this keypair's private key, returning a
    /// 64-byte detached signature, hex-encoded.
    pub fn sign(&self, bytes: &[u8]) -> String {
        hex::encode(self.signing_key.sign(bytes).to_bytes())
    }
}

/// Verifies a detached signature over `bytes` against a hex-encoded
/// public key.
///
/// Returns `false` on any malformed input (bad hex, wrong length,
/// invalid curve point) rather than propagating an error — per the core
/// specification, verification is a predicate the caller always gets an
/// answer from.
pub fn verify(bytes: &[u8], signature_hex: &str, public_hex: &str) -> bool {
    let Ok(public_bytes) = decode_hex_fixed::<32>("public_key", public_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_bytes) else {
        return false;
    };
    let Ok(signature_bytes) = decode_hex_fixed::<64>("signature", signature_hex) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key.verify(bytes, &signature).is_ok()
}

fn decode_hex_fixed<const N: usize>(
    field: &'static str,
    hex_str: &str,
) -> Result<[u8; N], CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|source| CryptoError::InvalidHex { field, source })?;
    if bytes.len() != N {
        return Err(CryptoError::WrongLength {
            field,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
