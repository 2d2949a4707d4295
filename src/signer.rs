//! Partner request signing (hash-then-sign).
//!
//! Outbound partner calls are authenticated by canonicalizing the JSON body,
//! hashing it with SHA-512, and signing the 64-byte digest with the
//! partner-registered Ed25519 key. The resulting metadata travels out of
//! band (HTTP headers), never inside the signed payload. Verification is the
//! partner's job; this module only produces signatures.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer as _, SigningKey};
use serde::Serialize;
use sha2::{Digest, Sha512};
use thiserror::Error;

/// Algorithm tag attached to every signed request.
pub const SIGNATURE_ALGORITHM: &str = "ed25519-sha512";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signing key must be 32 hex-encoded bytes: {0}")]
    BadKey(String),

    #[error("Failed to canonicalize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Out-of-band signature metadata for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMeta {
    pub partner_id: String,
    /// Base64-encoded Ed25519 signature over the SHA-512 payload digest.
    pub signature: String,
    pub algorithm: &'static str,
}

pub struct RequestSigner {
    partner_id: String,
    key: SigningKey,
}

impl RequestSigner {
    pub fn new(partner_id: impl Into<String>, key: SigningKey) -> Self {
        Self {
            partner_id: partner_id.into(),
            key,
        }
    }

    /// Build a signer from the hex-encoded 32-byte seed in config.
    pub fn from_hex(partner_id: impl Into<String>, seed_hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| SignerError::BadKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| SignerError::BadKey(format!("got {} bytes", b.len())))?;
        Ok(Self::new(partner_id, SigningKey::from_bytes(&seed)))
    }

    /// Sign a JSON-serializable payload.
    ///
    /// The digest is computed over `serde_json::to_vec(payload)`; the client
    /// must send those same bytes as the body, so it serializes exactly once
    /// and reuses the buffer.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<SignatureMeta, SignerError> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(self.sign_bytes(&bytes))
    }

    /// Sign the exact bytes that go on the wire.
    pub fn sign_bytes(&self, body: &[u8]) -> SignatureMeta {
        let digest = Sha512::digest(body);
        let signature = self.key.sign(digest.as_slice());
        SignatureMeta {
            partner_id: self.partner_id.clone(),
            signature: BASE64.encode(signature.to_bytes()),
            algorithm: SIGNATURE_ALGORITHM,
        }
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }
}
