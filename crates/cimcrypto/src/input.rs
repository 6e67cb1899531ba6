//! Encrypted-input construction: a client accumulates up to
//! [`INPUT_BATCH_MAX`] 32-bit values and encrypts them into one ciphertext
//! per value plus a single shared correctness proof. The proof is a
//! versioned transcript binding the whole batch to the submitting identity
//! and the target registry, so a ciphertext lifted from another party or
//! another registry instance fails verification. The registry checks it once
//! per submission, not once per value.

use anyhow::{bail, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ids::{Identity, RegistryId};
use crate::{enc_u32, Ciphertext, PaillierPublicKey};

/// Fixed capacity of one input batch.
pub const INPUT_BATCH_MAX: usize = 8;

const PROOF_TAG: &[u8] = b"CIM-INPUT-PROOF";
const PROOF_VER: u32 = 1;

/// Shared correctness proof over one batch of ciphertexts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputProof(#[serde(with = "serde_bytes")] pub Vec<u8>);

fn transcript(registry: &RegistryId, owner: &Identity, handles: &[Ciphertext]) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(PROOF_TAG);
    h.update(&PROOF_VER.to_be_bytes());
    h.update(&registry.0);
    h.update(&owner.0);
    h.update(&(handles.len() as u32).to_be_bytes());
    for ct in handles {
        h.update(&(ct.0.len() as u32).to_be_bytes());
        h.update(&ct.0);
    }
    *h.finalize().as_bytes()
}

impl InputProof {
    pub fn verify(&self, registry: &RegistryId, owner: &Identity, handles: &[Ciphertext]) -> bool {
        self.0 == transcript(registry, owner, handles)
    }
}

/// One encrypted batch as submitted to the registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handles: Vec<Ciphertext>,
    pub proof: InputProof,
}

/// Accumulates plaintext values for one submission. Bound to the registry
/// and submitter up front; plaintexts never leave this builder unencrypted.
pub struct EncryptedInputBuilder {
    registry: RegistryId,
    owner: Identity,
    values: Vec<u32>,
}

impl EncryptedInputBuilder {
    pub fn new(registry: RegistryId, owner: Identity) -> Self {
        Self {
            registry,
            owner,
            values: Vec::new(),
        }
    }

    pub fn add_u32(&mut self, value: u32) -> Result<&mut Self> {
        if self.values.len() >= INPUT_BATCH_MAX {
            bail!("input batch is full ({INPUT_BATCH_MAX} values max)");
        }
        self.values.push(value);
        Ok(self)
    }

    pub fn encrypt(&self, pk: &PaillierPublicKey, rng: &mut impl RngCore) -> EncryptedInput {
        let handles: Vec<Ciphertext> = self
            .values
            .iter()
            .map(|&v| enc_u32(pk, v, rng))
            .collect();
        let proof = InputProof(transcript(&self.registry, &self.owner, &handles).to_vec());
        EncryptedInput { handles, proof }
    }
}
