//! Signed calls: the identity oracle for callers who hold an ed25519 key.
//!
//! A caller's identity is `0x` followed by the hex of the last 20 bytes of
//! SHA-256 over its verifying key. A [`SignedCall`] binds an action to a
//! per-identity nonce; the state file remembers the last nonce accepted for
//! each identity so an envelope cannot be replayed.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use custody_core::Identity;

use crate::script::VaultAction;

pub fn identity_of(key: &VerifyingKey) -> Identity {
    let digest = Sha256::digest(key.as_bytes());
    format!("0x{}", hex::encode(&digest[12..]))
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedCall {
    pub action: VaultAction,
    pub nonce: u64,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

fn call_digest(action: &VaultAction, nonce: u64) -> Result<[u8; 32], AuthError> {
    let encoded = serde_json::to_vec(action).map_err(|e| AuthError::Encoding(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(b"custody-call");
    hasher.update(nonce.to_le_bytes());
    hasher.update(&encoded);
    Ok(hasher.finalize().into())
}

impl SignedCall {
    pub fn sign(key: &SigningKey, action: VaultAction, nonce: u64) -> Result<Self, AuthError> {
        let digest = call_digest(&action, nonce)?;
        let signature = key.sign(&digest);
        Ok(Self {
            action,
            nonce,
            public_key: key.verifying_key().as_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Check the signature and return the caller identity it proves.
    pub fn verify(&self) -> Result<Identity, AuthError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::MalformedKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| AuthError::MalformedKey)?;
        let signature = Signature::from_slice(&self.signature).map_err(|_| AuthError::MalformedSignature)?;
        let digest = call_digest(&self.action, self.nonce)?;
        key.verify_strict(&digest, &signature)
            .map_err(|_| AuthError::InvalidSignature)?;
        Ok(identity_of(&key))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("public key is not a valid ed25519 key")]
    MalformedKey,
    #[error("signature is malformed")]
    MalformedSignature,
    #[error("signature does not match the call")]
    InvalidSignature,
    #[error("nonce {got} already used (last accepted {last})")]
    StaleNonce { got: u64, last: u64 },
    #[error("could not encode call: {0}")]
    Encoding(String),
}

pub fn parse_signing_key(hex_str: &str) -> Result<SigningKey, AuthError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| AuthError::MalformedKey)?;
    let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| AuthError::MalformedKey)?;
    Ok(SigningKey::from_bytes(&secret))
}

pub(crate) mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded.trim()).map_err(D::Error::custom)
    }
}
