//! Authorized decryption: a requester proves control of their ledger
//! identity with an ed25519 signature over a time-boxed, registry-scoped
//! authorization payload, and receives the cleartext of exactly one match
//! handle, re-encrypted under an ephemeral reveal key they supplied.
//!
//! The gateway here is a single-party stand-in for a threshold decryption
//! service: it holds the service private key and also answers the
//! [`RemoteEquality`] round trips the match engine needs.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rug::Integer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::equality::RemoteEquality;
use crate::ids::{Identity, RegistryId};
use crate::{dec, enc, Ciphertext, PaillierPrivateKey, PaillierPublicKey};

pub const SECONDS_PER_DAY: u64 = 86_400;

const AUTH_TAG: &[u8] = b"CIM-USER-DECRYPT";
const AUTH_VER: u32 = 1;

/// 32-byte fingerprint of a reveal public key, bound into the signed
/// authorization so the gateway re-encrypts to the key the requester signed
/// for and no other.
pub fn key_fingerprint(pk: &PaillierPublicKey) -> [u8; 32] {
    let mut h = blake3::Hasher::new();
    h.update(b"CIM-REVEAL-KEY");
    h.update(&pk.n);
    h.update(&pk.n2);
    *h.finalize().as_bytes()
}

/// Payload the requester signs with their ledger identity key. Validity is
/// `[valid_from, valid_from + duration_days * 86400)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionAuthorization {
    pub reveal_key_fingerprint: [u8; 32],
    pub registry_id: RegistryId,
    pub valid_from: u64,
    pub duration_days: u32,
}

impl DecryptionAuthorization {
    /// Stable signing encoding, independent of serde internals:
    /// tag | version | fingerprint | registry | valid_from | duration,
    /// integers big-endian.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AUTH_TAG.len() + 4 + 32 + 20 + 8 + 4);
        out.extend_from_slice(AUTH_TAG);
        out.extend_from_slice(&AUTH_VER.to_be_bytes());
        out.extend_from_slice(&self.reveal_key_fingerprint);
        out.extend_from_slice(&self.registry_id.0);
        out.extend_from_slice(&self.valid_from.to_be_bytes());
        out.extend_from_slice(&self.duration_days.to_be_bytes());
        out
    }

    pub fn sign(&self, key: &SigningKey) -> Signature {
        key.sign(&self.signing_bytes())
    }

    pub fn window_contains(&self, now: u64) -> bool {
        let end = self
            .valid_from
            .saturating_add(self.duration_days as u64 * SECONDS_PER_DAY);
        now >= self.valid_from && now < end
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("authorization signature rejected")]
    BadSignature,
    #[error("authorization is scoped to a different registry")]
    WrongRegistry,
    #[error("no decryption grant exists for this handle")]
    UnknownHandle,
    #[error("{identity} is not the grant holder for this handle")]
    NotGrantee { identity: Identity },
    #[error("authorization window does not cover the current time")]
    OutsideWindow,
    #[error("reveal key does not match the signed fingerprint")]
    RevealKeyMismatch,
}

/// Holder of the service keypair. Answers equality round trips for the
/// match engine and performs authorized user decryption.
#[derive(Clone)]
pub struct ThresholdGateway {
    pk: PaillierPublicKey,
    sk: PaillierPrivateKey,
    registry_id: RegistryId,
}

impl ThresholdGateway {
    pub fn new(pk: PaillierPublicKey, sk: PaillierPrivateKey) -> Self {
        let registry_id = RegistryId::from_service_key(&pk);
        Self { pk, sk, registry_id }
    }

    pub fn public_key(&self) -> &PaillierPublicKey {
        &self.pk
    }

    pub fn registry_id(&self) -> RegistryId {
        self.registry_id
    }

    /// Verify the authorization chain and, on success, return the handle's
    /// cleartext re-encrypted under the requester's reveal key.
    ///
    /// `grantee` is the access-ledger entry for the handle (`None` when the
    /// ledger has never granted it). Checked in order: registry scope,
    /// signature, grant holder, validity window, reveal-key binding.
    pub fn user_decrypt(
        &self,
        handle: &Ciphertext,
        grantee: Option<Identity>,
        auth: &DecryptionAuthorization,
        requester_key: &[u8; 32],
        signature: &[u8],
        reveal_pk: &PaillierPublicKey,
        now: u64,
    ) -> Result<Ciphertext, AccessError> {
        if auth.registry_id != self.registry_id {
            return Err(AccessError::WrongRegistry);
        }
        let vk = VerifyingKey::from_bytes(requester_key).map_err(|_| AccessError::BadSignature)?;
        let sig = Signature::from_slice(signature).map_err(|_| AccessError::BadSignature)?;
        vk.verify(&auth.signing_bytes(), &sig)
            .map_err(|_| AccessError::BadSignature)?;

        let identity = Identity::from_verifying_key(&vk);
        match grantee {
            None => return Err(AccessError::UnknownHandle),
            Some(holder) if holder != identity => {
                return Err(AccessError::NotGrantee { identity })
            }
            Some(_) => {}
        }
        if !auth.window_contains(now) {
            return Err(AccessError::OutsideWindow);
        }
        if key_fingerprint(reveal_pk) != auth.reveal_key_fingerprint {
            return Err(AccessError::RevealKeyMismatch);
        }

        let value = dec(&self.sk, handle);
        Ok(enc(reveal_pk, &value, &mut rand::thread_rng()))
    }
}

impl RemoteEquality for ThresholdGateway {
    fn eq_zero(&mut self, x: &Ciphertext) -> anyhow::Result<Ciphertext> {
        let v = dec(&self.sk, x);
        let bit = Integer::from((v == 0) as u32);
        Ok(enc(&self.pk, &bit, &mut rand::thread_rng()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dec, enc_u32, keygen};
    use rand::rngs::OsRng;

    struct Fixture {
        gateway: ThresholdGateway,
        handle: Ciphertext,
        grantee_key: SigningKey,
        grantee: Identity,
        reveal_pk: PaillierPublicKey,
        reveal_sk: PaillierPrivateKey,
    }

    fn fixture() -> Fixture {
        let mut rng = rand::thread_rng();
        let (pk, sk) = keygen(512, &mut rng);
        let gateway = ThresholdGateway::new(pk.clone(), sk);
        let handle = enc_u32(&pk, 1, &mut rng);
        let grantee_key = SigningKey::generate(&mut OsRng);
        let grantee = Identity::from_verifying_key(&grantee_key.verifying_key());
        let (reveal_pk, reveal_sk) = keygen(512, &mut rng);
        Fixture {
            gateway,
            handle,
            grantee_key,
            grantee,
            reveal_pk,
            reveal_sk,
        }
    }

    fn auth_for(f: &Fixture, valid_from: u64, duration_days: u32) -> DecryptionAuthorization {
        DecryptionAuthorization {
            reveal_key_fingerprint: key_fingerprint(&f.reveal_pk),
            registry_id: f.gateway.registry_id(),
            valid_from,
            duration_days,
        }
    }

    #[test]
    fn grantee_decrypts_within_window() {
        let f = fixture();
        let auth = auth_for(&f, 1_000, 1);
        let sig = auth.sign(&f.grantee_key);

        let masked = f
            .gateway
            .user_decrypt(
                &f.handle,
                Some(f.grantee),
                &auth,
                &f.grantee_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &f.reveal_pk,
                1_500,
            )
            .unwrap();
        assert_eq!(dec(&f.reveal_sk, &masked), 1);
    }

    #[test]
    fn other_identity_rejected_despite_valid_signature() {
        let f = fixture();
        let auth = auth_for(&f, 1_000, 1);
        let intruder = SigningKey::generate(&mut OsRng);
        let sig = auth.sign(&intruder);

        let err = f
            .gateway
            .user_decrypt(
                &f.handle,
                Some(f.grantee),
                &auth,
                &intruder.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &f.reveal_pk,
                1_500,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::NotGrantee { .. }));
    }

    #[test]
    fn expired_window_rejected() {
        let f = fixture();
        let auth = auth_for(&f, 1_000, 1);
        let sig = auth.sign(&f.grantee_key);

        let err = f
            .gateway
            .user_decrypt(
                &f.handle,
                Some(f.grantee),
                &auth,
                &f.grantee_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &f.reveal_pk,
                1_000 + SECONDS_PER_DAY,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::OutsideWindow));
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let f = fixture();
        let auth = auth_for(&f, 1_000, 1);
        let sig = auth.sign(&f.grantee_key);
        let mut forged = auth.clone();
        forged.duration_days = 3650;

        let err = f
            .gateway
            .user_decrypt(
                &f.handle,
                Some(f.grantee),
                &forged,
                &f.grantee_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &f.reveal_pk,
                1_500,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::BadSignature));
    }

    #[test]
    fn ungranted_handle_rejected() {
        let f = fixture();
        let auth = auth_for(&f, 1_000, 1);
        let sig = auth.sign(&f.grantee_key);

        let err = f
            .gateway
            .user_decrypt(
                &f.handle,
                None,
                &auth,
                &f.grantee_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &f.reveal_pk,
                1_500,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::UnknownHandle));
    }

    #[test]
    fn reveal_key_substitution_rejected() {
        let f = fixture();
        let auth = auth_for(&f, 1_000, 1);
        let sig = auth.sign(&f.grantee_key);
        let (other_pk, _) = keygen(512, &mut rand::thread_rng());

        let err = f
            .gateway
            .user_decrypt(
                &f.handle,
                Some(f.grantee),
                &auth,
                &f.grantee_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &other_pk,
                1_500,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::RevealKeyMismatch));
    }
}
