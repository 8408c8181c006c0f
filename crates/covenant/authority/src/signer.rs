//! Signature boundary.
//!
//! Covenant never handles raw key material beyond this module. Signatures
//! are ed25519 over caller-supplied payload bytes, carried as lowercase hex.

use covenant_types::CircleId;
use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no verifying key registered for {0}")]
    UnknownSigner(CircleId),
    #[error("signature does not verify")]
    BadSignature,
    #[error("malformed signature: {0}")]
    Malformed(String),
}

/// Produces signatures on behalf of one circle.
pub trait PayloadSigner: Send + Sync {
    fn circle(&self) -> &CircleId;

    /// Hex-encoded signature over `payload`.
    fn sign(&self, payload: &[u8]) -> String;
}

/// Checks a circle's signature over a payload.
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        signer: &CircleId,
        payload: &[u8],
        signature_hex: &str,
    ) -> Result<(), SignatureError>;
}

/// ed25519 signer for one circle.
pub struct Ed25519Signer {
    circle: CircleId,
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(circle: CircleId, key: SigningKey) -> Self {
        Self { circle, key }
    }

    /// Deterministic signer from a 32-byte secret.
    pub fn from_secret(circle: CircleId, secret: &[u8; 32]) -> Self {
        Self::new(circle, SigningKey::from_bytes(secret))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl PayloadSigner for Ed25519Signer {
    fn circle(&self) -> &CircleId {
        &self.circle
    }

    fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.key.sign(payload).to_bytes())
    }
}

/// Registry of circle verifying keys.
#[derive(Default)]
pub struct Ed25519Keyring {
    keys: DashMap<CircleId, VerifyingKey>,
}

impl Ed25519Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, circle: CircleId, key: VerifyingKey) {
        self.keys.insert(circle, key);
    }

    /// Register the verifying half of `signer`.
    pub fn register_signer(&self, signer: &Ed25519Signer) {
        self.register(signer.circle.clone(), signer.verifying_key());
    }

    pub fn contains(&self, circle: &CircleId) -> bool {
        self.keys.contains_key(circle)
    }
}

impl SignatureVerifier for Ed25519Keyring {
    fn verify(
        &self,
        signer: &CircleId,
        payload: &[u8],
        signature_hex: &str,
    ) -> Result<(), SignatureError> {
        let key = *self
            .keys
            .get(signer)
            .ok_or_else(|| SignatureError::UnknownSigner(signer.clone()))?
            .value();

        let bytes = hex::decode(signature_hex).map_err(|e| SignatureError::Malformed(e.to_string()))?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| SignatureError::Malformed("expected 64 bytes".into()))?;
        let signature = Signature::from_bytes(&bytes);

        key.verify(payload, &signature)
            .map_err(|_| SignatureError::BadSignature)
    }
}
