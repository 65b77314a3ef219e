//! # Sealed — Repository Secret Envelopes
//!
//! GitHub Actions only accepts secrets encrypted to the repository's
//! curve25519 public key using an anonymous sealed box: an ephemeral sender
//! keypair is generated per message and its public half is prepended to the
//! XSalsa20-Poly1305 ciphertext (`ephemeral_pk ‖ box`). The provider holds
//! the matching secret key and is the only party able to open the envelope.
//!
//! The public key arrives base64-encoded together with an opaque `key_id`,
//! which must be echoed back verbatim on upload. [`RepoPublicKey`] decodes the
//! key once so a whole propagation batch reuses it.

use base64::Engine;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;

/// Length of a curve25519 public key.
pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid repository public key: {0}")]
    InvalidKey(String),
    #[error("sealed box construction failed: {0}")]
    CryptoFailure(String),
}

/// A decoded repository public key with the provider's identifier.
#[derive(Clone)]
pub struct RepoPublicKey {
    pub key_id: String,
    key: PublicKey,
}

impl std::fmt::Debug for RepoPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoPublicKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RepoPublicKey {
    /// Decode a base64 public key as returned by `actions/secrets/public-key`.
    pub fn from_base64(key_id: &str, key_b64: &str) -> Result<Self, EnvelopeError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64.trim())
            .map_err(|e| EnvelopeError::InvalidKey(format!("base64 decode failed: {}", e)))?;
        Self::from_bytes(key_id, &bytes)
    }

    /// Build from raw key bytes; anything but exactly 32 bytes is rejected.
    pub fn from_bytes(key_id: &str, bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            EnvelopeError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self {
            key_id: key_id.to_string(),
            key: PublicKey::from(raw),
        })
    }

    /// Seal `plaintext` and return the base64 envelope ready for upload.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, EnvelopeError> {
        let sealed = self
            .key
            .seal(&mut OsRng, plaintext)
            .map_err(|e| EnvelopeError::CryptoFailure(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }
}

/// One-shot helper: decode `public_key_b64` and seal `plaintext` with it.
pub fn seal_secret(plaintext: &[u8], key_id: &str, public_key_b64: &str) -> Result<String, EnvelopeError> {
    RepoPublicKey::from_base64(key_id, public_key_b64)?.seal(plaintext)
}
