//! License signature verification
//!
//! Verifies the `b64:`-prefixed signature blob over the canonical
//! license serialization. With a configured public key the blob must
//! be a valid Ed25519 signature; without one the verifier falls back
//! to a SHA-256 digest check, which keeps development licenses
//! self-contained.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Prefix carried by stored signature blobs.
const SIGNATURE_PREFIX: &str = "b64:";

/// Verifies license signatures.
pub struct SignatureVerifier {
    verifying_key: Option<VerifyingKey>,
}

impl SignatureVerifier {
    /// Verifier with an optional Ed25519 public key.
    pub fn new(verifying_key: Option<VerifyingKey>) -> Self {
        Self { verifying_key }
    }

    /// Load the public key from a file holding the 32 raw key bytes
    /// encoded as base64 or hex.
    ///
    /// An unreadable or malformed key file downgrades to the digest
    /// scheme with a warning; verification stays available.
    pub fn from_key_file(path: &Path) -> Self {
        let key = read_verifying_key(path);
        if key.is_none() {
            log::warn!(
                "No usable public key at {}, falling back to digest verification",
                path.display()
            );
        } else {
            log::info!("SignatureVerifier initialized with public key {}", path.display());
        }
        Self::new(key)
    }

    /// Whether a public key is configured.
    pub fn has_public_key(&self) -> bool {
        self.verifying_key.is_some()
    }

    /// Verify `signature` over `message` (the canonical license
    /// serialization). Pure in its inputs.
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        let payload = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
        let Ok(decoded) = BASE64.decode(payload) else {
            log::warn!("Signature is not valid base64");
            return false;
        };

        match &self.verifying_key {
            Some(key) => {
                let Ok(signature) = Signature::from_slice(&decoded) else {
                    log::warn!("Signature blob has wrong length for Ed25519");
                    return false;
                };
                key.verify(message.as_bytes(), &signature).is_ok()
            }
            None => {
                let digest = Sha256::digest(message.as_bytes());
                decoded.as_slice() == digest.as_slice()
            }
        }
    }

    /// Produce a digest-scheme signature for `message`.
    ///
    /// Development-side helper; production licenses are signed offline
    /// with the Ed25519 private key.
    pub fn sign_digest(message: &str) -> String {
        let digest = Sha256::digest(message.as_bytes());
        format!("{}{}", SIGNATURE_PREFIX, BASE64.encode(digest))
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new(None)
    }
}

fn read_verifying_key(path: &Path) -> Option<VerifyingKey> {
    let text = std::fs::read_to_string(path).ok()?;
    let trimmed = text.trim();

    let bytes = BASE64
        .decode(trimmed)
        .ok()
        .or_else(|| hex::decode(trimmed).ok())?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}
