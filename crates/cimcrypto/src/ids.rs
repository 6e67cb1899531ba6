//! Ledger identities: participants, registry instances and ciphertext
//! handles. All three are short fingerprints with stable byte encodings so
//! they can appear inside signed payloads.

use core::fmt;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Ciphertext, PaillierPublicKey};

/// A participant address: last 20 bytes of SHA-256 over the ed25519
/// verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub [u8; 20]);

impl Identity {
    pub fn from_verifying_key(vk: &VerifyingKey) -> Self {
        Self::from_key_bytes(&vk.to_bytes())
    }

    pub fn from_key_bytes(vk_bytes: &[u8; 32]) -> Self {
        let digest = Sha256::digest(vk_bytes);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..32]);
        Identity(out)
    }

    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity must be 20 bytes, got {}", bytes.len()))?;
        Ok(Identity(arr))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

/// Identity of one registry instance, derived from the service public key.
/// Input proofs and decryption authorizations are bound to it, so
/// ciphertexts produced for one registry cannot be replayed against another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryId(pub [u8; 20]);

impl RegistryId {
    pub fn from_service_key(pk: &PaillierPublicKey) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(b"CIM-REGISTRY-ID");
        h.update(&pk.n);
        h.update(&pk.n2);
        let digest = h.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[..20]);
        RegistryId(out)
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistryId({self})")
    }
}

/// Fingerprint of ciphertext bytes. The access ledger is keyed by this, so
/// grants survive the entry they were created for being overwritten.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub [u8; 32]);

impl HandleId {
    pub fn of(ct: &Ciphertext) -> Self {
        let mut h = blake3::Hasher::new();
        h.update(b"CIM-HANDLE");
        h.update(&ct.0);
        HandleId(*h.finalize().as_bytes())
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", hex::encode(&self.0[..8]))
    }
}
