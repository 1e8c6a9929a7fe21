//! Signed key tokens and Ed25519 signature verification.
//!
//! Tokens use the format: `base64url(payload).base64url(signature)`
//!
//! The payload is a JSON object containing:
//! - `code`: the key code
//! - `sub`: owning account id
//! - `tier`: pricing tier id
//! - `dl`: device limit
//! - `iat` / `exp`: issue and expiry times (milliseconds since epoch)
//!
//! The signature covers `payload_b64.as_bytes()` (the base64url-encoded
//! payload string, not the decoded JSON). A token lets a client check the
//! terms of a key offline; binding and revocation still go through the ledger.

use crate::error::TokenError;
use crate::key::Key;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use keyledger_types::Timestamp;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// The decoded token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTokenPayload {
    /// Key code.
    pub code: String,
    /// Owning account id.
    pub sub: String,
    /// Pricing tier id.
    pub tier: String,
    /// Device limit.
    pub dl: u32,
    /// Issued-at (milliseconds since epoch).
    pub iat: i64,
    /// Expires-at (milliseconds since epoch).
    pub exp: i64,
}

impl From<&Key> for KeyTokenPayload {
    fn from(key: &Key) -> Self {
        Self {
            code: key.code.to_string(),
            sub: key.account_id.to_string(),
            tier: key.tier_id.clone(),
            dl: key.device_limit,
            iat: key.issued_at.as_millis(),
            exp: key.expires_at.as_millis(),
        }
    }
}

/// A parsed and verified key token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyToken {
    raw: String,
    payload: KeyTokenPayload,
}

impl KeyToken {
    /// Parses and verifies a token against an issuer public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the token format is invalid or signature
    /// verification fails.
    pub fn parse_with_key(token: &str, pub_key_bytes: &[u8; 32]) -> Result<Self, TokenError> {
        let token = token.trim();

        let Some((payload_b64, signature_b64)) = token.split_once('.') else {
            return Err(TokenError::InvalidKeyFormat(
                "token must have exactly two parts separated by a dot".to_string(),
            ));
        };
        if signature_b64.contains('.') {
            return Err(TokenError::InvalidKeyFormat(
                "token must have exactly two parts separated by a dot".to_string(),
            ));
        }

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| TokenError::InvalidKeyFormat(format!("invalid signature base64: {e}")))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| TokenError::InvalidKeyFormat("invalid signature length".to_string()))?;

        let verifying_key = VerifyingKey::from_bytes(pub_key_bytes)
            .map_err(|_| TokenError::InvalidKeyFormat("invalid public key".to_string()))?;
        verifying_key
            .verify(payload_b64.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| TokenError::InvalidKeyFormat(format!("invalid payload base64: {e}")))?;
        let payload: KeyTokenPayload = serde_json::from_slice(&payload_json)
            .map_err(|e| TokenError::InvalidPayload(format!("invalid payload JSON: {e}")))?;

        Ok(Self {
            raw: token.to_string(),
            payload,
        })
    }

    /// Returns the raw token string.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the decoded payload.
    #[must_use]
    pub fn payload(&self) -> &KeyTokenPayload {
        &self.payload
    }

    /// Returns the key code the token was issued for.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.payload.code
    }

    /// Returns the expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> Timestamp {
        Timestamp::from_millis(self.payload.exp)
    }

    /// Returns true if the token's key has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }
}

/// Ed25519 signer for issued keys.
#[derive(Clone)]
pub struct KeySigner {
    signing_key: SigningKey,
}

impl KeySigner {
    /// Creates a signer from a 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Generates a fresh signer from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Returns the secret seed, for persisting the signer.
    #[must_use]
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Returns the public key clients verify tokens with.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs the terms of `key` into a token string.
    #[must_use]
    pub fn sign(&self, key: &Key) -> String {
        let payload = KeyTokenPayload::from(key);
        // A struct of strings and integers always serializes.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(json);
        let signature = self.signing_key.sign(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        format!("{payload_b64}.{sig_b64}")
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner")
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.public_key()))
            .finish()
    }
}
