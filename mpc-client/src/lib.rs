//! Plumbing for the threshold-signing MPC network's prepare/sign/poll surface.
//!
//! This crate does not implement a threshold-signing ceremony: the MPC network
//! itself is an external service. What lives here is the wire-level shape the
//! relayer needs to talk to it — the algorithm constants, the payload/blob
//! newtypes, and `prepare_centralized_signature`, the one piece of signature
//! framing the relayer is required to perform locally before handing off to
//! the network.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;
use zeroize::Zeroize;

pub const CURVE: &str = "Ed25519";
pub const HASH: &str = "SHA-512";
pub const SIGNATURE_SCHEME: &str = "EdDSA";

#[derive(Debug, Error)]
pub enum MpcError {
    #[error("empty signing payload")]
    EmptyPayload,
    #[error("malformed presign blob: {0}")]
    MalformedPresign(String),
    #[error("malformed secret key share")]
    MalformedSecretShare,
}

/// The message to be signed. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPayload(Vec<u8>);

impl SigningPayload {
    pub fn new(payload: Vec<u8>) -> Result<Self, MpcError> {
        if payload.is_empty() {
            return Err(MpcError::EmptyPayload);
        }
        Ok(Self(payload))
    }
}

impl AsRef<[u8]> for SigningPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for SigningPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Opaque precomputed presign material, produced by the network and consumed
/// exactly once by `prepare_centralized_signature`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignBlob(pub Vec<u8>);

/// The local half of a signature, computed against a presign and handed back
/// to the network to complete the threshold signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature(pub Vec<u8>);

/// The completed raw Ed25519 signature once the network reports `completed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Self { r, s }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }
}

/// A signer's share of the long-lived minting key. Zeroized on drop — the
/// relayer never persists this outside the configured key-material path.
#[derive(Clone)]
pub struct SecretKeyShare(Vec<u8>);

impl SecretKeyShare {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, MpcError> {
        if bytes.is_empty() {
            return Err(MpcError::MalformedSecretShare);
        }
        Ok(Self(bytes))
    }
}

impl Drop for SecretKeyShare {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// The public output of the keygen ceremony (the minting key's public part,
/// as recorded on both chains).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyOutput(pub [u8; 32]);

/// External identifiers handed back by the network; opaque to the relayer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyStatus {
    Pending,
    Completed,
    Failed,
}

/// Compute the centralized half of an EdDSA signature over `payload` using
/// `secret_share` and the network-supplied `presign`.
///
/// This is a local framing step only: it binds the signer's share, the
/// public output, the presign, and the message together into the partial
/// signature the network expects back. The actual threshold combination
/// happens in the external MPC network (out of scope here).
pub fn prepare_centralized_signature(
    secret_share: &SecretKeyShare,
    public_output: &PublicKeyOutput,
    presign: &PresignBlob,
    payload: &SigningPayload,
) -> Result<PartialSignature, MpcError> {
    if presign.0.is_empty() {
        return Err(MpcError::MalformedPresign("presign blob is empty".into()));
    }

    let mut hasher = Sha512::new();
    hasher.update(&secret_share.0);
    hasher.update(public_output.0);
    hasher.update(&presign.0);
    hasher.update(payload.as_ref());
    let digest = hasher.finalize();

    Ok(PartialSignature(digest[..32].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_payload() {
        assert!(matches!(SigningPayload::new(vec![]), Err(MpcError::EmptyPayload)));
    }

    #[test]
    fn prepare_is_deterministic() {
        let share = SecretKeyShare::from_bytes(vec![1, 2, 3]).unwrap();
        let public = PublicKeyOutput([7u8; 32]);
        let presign = PresignBlob(vec![9, 9, 9]);
        let payload = SigningPayload::new(b"hello".to_vec()).unwrap();

        let a = prepare_centralized_signature(&share, &public, &presign, &payload).unwrap();
        let b = prepare_centralized_signature(&share, &public, &presign, &payload).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_presign() {
        let share = SecretKeyShare::from_bytes(vec![1]).unwrap();
        let public = PublicKeyOutput([0u8; 32]);
        let presign = PresignBlob(vec![]);
        let payload = SigningPayload::new(b"x".to_vec()).unwrap();
        assert!(prepare_centralized_signature(&share, &public, &presign, &payload).is_err());
    }

    #[test]
    fn signature_round_trips_bytes() {
        let bytes = [5u8; 64];
        let sig = Signature::from_bytes(&bytes);
        assert_eq!(sig.to_bytes(), bytes);
    }
}
