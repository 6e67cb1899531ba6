//! Protocol types for the confidential interest registry: request/response
//! payloads, ledger events, and the stable signing envelopes for mutating
//! requests. The node crate wraps these in its `Msg` transport envelope.

use serde::{Deserialize, Serialize};

pub use cimcrypto::{
    Ciphertext, DecryptionAuthorization, EqualityScheme, HandleId, Identity, InputProof,
    PaillierPublicKey, RegistryId,
};

pub const PROTO_VER: u32 = 1;

const SUBMIT_TAG: &[u8] = b"CIM-SUBMIT";
const MATCH_TAG: &[u8] = b"CIM-MATCH";
const ENVELOPE_VER: u32 = 1;

/// Signed content of a preference submission: the proof already commits to
/// the ciphertexts, so signing (registry, proof) covers the whole batch.
pub fn submit_signing_bytes(registry: &RegistryId, proof: &InputProof) -> Vec<u8> {
    let mut out = Vec::with_capacity(SUBMIT_TAG.len() + 4 + 20 + proof.0.len());
    out.extend_from_slice(SUBMIT_TAG);
    out.extend_from_slice(&ENVELOPE_VER.to_be_bytes());
    out.extend_from_slice(&registry.0);
    out.extend_from_slice(&proof.0);
    out
}

/// Signed content of a match request.
pub fn match_signing_bytes(registry: &RegistryId, candidate: &Identity) -> Vec<u8> {
    let mut out = Vec::with_capacity(MATCH_TAG.len() + 4 + 20 + 20);
    out.extend_from_slice(MATCH_TAG);
    out.extend_from_slice(&ENVELOPE_VER.to_be_bytes());
    out.extend_from_slice(&registry.0);
    out.extend_from_slice(&candidate.0);
    out
}

// ------- Handshake -------

#[derive(Debug, Serialize, Deserialize)]
pub struct Hello {
    pub proto_ver: u32,
    pub features: u64,
    pub client_nonce: [u8; 16],
}

/// Server's reply to `Hello`: everything a client needs to build inputs and
/// authorizations for this registry instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub pk: PaillierPublicKey,
    pub registry_id: RegistryId,
    pub equality_scheme: EqualityScheme,
    pub server_nonce: [u8; 16],
}

// ------- Mutations -------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReq {
    /// ed25519 verifying key; the owner identity is derived from it.
    pub owner_key: [u8; 32],
    pub handles: Vec<Ciphertext>,
    pub proof: InputProof,
    /// Signature over [`submit_signing_bytes`].
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResp {
    pub owner: Identity,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReq {
    pub requester_key: [u8; 32],
    pub candidate: Identity,
    /// Signature over [`match_signing_bytes`].
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchResp {
    pub indicator: Ciphertext,
}

// ------- Read-only queries -------

#[derive(Debug, Serialize, Deserialize)]
pub struct HasPrefsReq {
    pub identity: Identity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HasPrefsResp {
    pub present: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefsReq {
    pub identity: Identity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefsResp {
    pub handles: Vec<Ciphertext>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchGetReq {
    pub requester: Identity,
    pub candidate: Identity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchGetResp {
    pub indicator: Ciphertext,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayersReq {}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayersResp {
    pub players: Vec<Identity>,
}

// ------- Authorized decryption -------

#[derive(Debug, Serialize, Deserialize)]
pub struct UserDecryptReq {
    pub handle: Ciphertext,
    pub auth: DecryptionAuthorization,
    pub requester_key: [u8; 32],
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub reveal_pk: PaillierPublicKey,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserDecryptResp {
    /// Cleartext re-encrypted under the requester's reveal key.
    pub masked: Ciphertext,
}

// ------- Failures on the wire -------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    WrongCount,
    InvalidProof,
    SelfMatch,
    NoPreferences,
    NotFound,
    Unauthorized,
    BadRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResp {
    pub kind: ErrorKind,
    pub message: String,
}

// ------- Events -------

/// Observability stream, not queryable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    PreferencesRegistered {
        owner: Identity,
        timestamp: u64,
    },
    MatchComputed {
        requester: Identity,
        candidate: Identity,
    },
}
