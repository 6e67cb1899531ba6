//! The registry ledger: preference records, the participant directory,
//! match-result entries and the access-control ledger, behind one
//! serializing lock. Mutations are linearizable; read queries clone
//! snapshots out of the lock and never observe partial state.
//!
//! Both mutating operations are upserts (last write wins), so a client
//! retry after an ambiguous outcome is self-correcting rather than
//! corrupting.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use cimcrypto::input::InputProof;
use cimcrypto::{EncU32, HandleId, Identity, RegistryId};
use cimengine::{intersect_indicator, EvalCtx, TRIPLE_LEN};
use cimproto::RegistryEvent;

/// One participant's stored preferences. Handles are opaque; their contents
/// never influence registry control flow.
#[derive(Clone, Debug)]
pub struct PreferenceRecord {
    pub handles: [EncU32; TRIPLE_LEN],
    pub registered_at: u64,
}

/// Last computed match for an ordered (requester, candidate) pair.
#[derive(Clone, Debug)]
pub struct MatchEntry {
    pub indicator: EncU32,
    pub grantee: Identity,
    pub computed_at: u64,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("exactly three encrypted interests required, got {got}")]
    WrongCount { got: usize },
    #[error("input proof rejected for {owner}")]
    InvalidProof { owner: Identity },
    #[error("Self matching not allowed")]
    SelfMatch,
    #[error("Submit preferences first")]
    NoPreferences { identity: Identity },
    #[error("no entry found")]
    NotFound,
    #[error("homomorphic evaluation failed")]
    Eval(#[from] anyhow::Error),
}

#[derive(Default)]
struct State {
    prefs: HashMap<Identity, PreferenceRecord>,
    directory: Vec<Identity>,
    matches: HashMap<(Identity, Identity), MatchEntry>,
    grants: HashMap<HandleId, Identity>,
    events: Vec<RegistryEvent>,
}

pub struct Registry {
    id: RegistryId,
    state: Mutex<State>,
}

impl Registry {
    pub fn new(id: RegistryId) -> Self {
        Self {
            id,
            state: Mutex::new(State::default()),
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    /// Store or replace `owner`'s three handles. First submission appends
    /// the owner to the participant directory; later submissions overwrite
    /// the record in place. All validation happens before any mutation.
    pub fn submit_preferences(
        &self,
        owner: Identity,
        handles: Vec<EncU32>,
        proof: &InputProof,
        now: u64,
    ) -> Result<(), RegistryError> {
        let handles: [EncU32; TRIPLE_LEN] = handles
            .try_into()
            .map_err(|v: Vec<EncU32>| RegistryError::WrongCount { got: v.len() })?;
        let raw: Vec<_> = handles.iter().map(|h| h.c.clone()).collect();
        if !proof.verify(&self.id, &owner, &raw) {
            return Err(RegistryError::InvalidProof { owner });
        }

        let mut state = self.state.lock().unwrap();
        if !state.prefs.contains_key(&owner) {
            state.directory.push(owner);
        }
        state.prefs.insert(
            owner,
            PreferenceRecord {
                handles,
                registered_at: now,
            },
        );
        state.events.push(RegistryEvent::PreferencesRegistered {
            owner,
            timestamp: now,
        });
        Ok(())
    }

    pub fn has_preferences(&self, identity: Identity) -> bool {
        self.state.lock().unwrap().prefs.contains_key(&identity)
    }

    pub fn get_encrypted_preferences(
        &self,
        identity: Identity,
    ) -> Result<[EncU32; TRIPLE_LEN], RegistryError> {
        self.state
            .lock()
            .unwrap()
            .prefs
            .get(&identity)
            .map(|r| r.handles.clone())
            .ok_or(RegistryError::NotFound)
    }

    pub fn registered_players(&self) -> Vec<Identity> {
        self.state.lock().unwrap().directory.clone()
    }

    /// Compute the intersection indicator for (requester, candidate) from
    /// the preferences stored *now*, overwrite any prior entry for the pair,
    /// and grant decryption of the fresh handle to the requester alone.
    ///
    /// Preconditions are checked in order: self-match, requester record,
    /// candidate record. The engine evaluation runs outside the state lock;
    /// the entry write is atomic.
    pub fn request_match(
        &self,
        requester: Identity,
        candidate: Identity,
        ctx: &mut EvalCtx,
        now: u64,
    ) -> Result<EncU32, RegistryError> {
        if requester == candidate {
            return Err(RegistryError::SelfMatch);
        }
        let (mine, theirs) = {
            let state = self.state.lock().unwrap();
            let mine = state
                .prefs
                .get(&requester)
                .ok_or(RegistryError::NoPreferences {
                    identity: requester,
                })?
                .handles
                .clone();
            let theirs = state
                .prefs
                .get(&candidate)
                .ok_or(RegistryError::NoPreferences {
                    identity: candidate,
                })?
                .handles
                .clone();
            (mine, theirs)
        };

        let indicator = intersect_indicator(&mine, &theirs, ctx)?;

        let mut state = self.state.lock().unwrap();
        state.grants.insert(indicator.handle_id(), requester);
        state.matches.insert(
            (requester, candidate),
            MatchEntry {
                indicator: indicator.clone(),
                grantee: requester,
                computed_at: now,
            },
        );
        state.events.push(RegistryEvent::MatchComputed {
            requester,
            candidate,
        });
        Ok(indicator)
    }

    /// Last computed entry for the ordered pair; never recomputes.
    pub fn get_encrypted_match(
        &self,
        requester: Identity,
        candidate: Identity,
    ) -> Result<EncU32, RegistryError> {
        self.state
            .lock()
            .unwrap()
            .matches
            .get(&(requester, candidate))
            .map(|e| e.indicator.clone())
            .ok_or(RegistryError::NotFound)
    }

    /// Access-ledger lookup for the decryption gateway. Grants are recorded
    /// per handle and never revoked, so a superseded entry's handle stays
    /// decryptable by its original requester.
    pub fn grant_holder(&self, handle: HandleId) -> Option<Identity> {
        self.state.lock().unwrap().grants.get(&handle).copied()
    }

    /// Take all events emitted since the previous drain.
    pub fn drain_events(&self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.state.lock().unwrap().events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cimcrypto::input::EncryptedInputBuilder;
    use cimcrypto::{dec, keygen, Ciphertext, EqualityScheme, PaillierPrivateKey,
        PaillierPublicKey, RemoteEquality};

    struct LocalOracle {
        pk: PaillierPublicKey,
        sk: PaillierPrivateKey,
    }

    impl RemoteEquality for LocalOracle {
        fn eq_zero(&mut self, x: &Ciphertext) -> anyhow::Result<Ciphertext> {
            let v = dec(&self.sk, x);
            let bit = rug::Integer::from((v == 0) as u32);
            Ok(cimcrypto::enc(&self.pk, &bit, &mut rand::thread_rng()))
        }
    }

    struct Fixture {
        registry: Registry,
        pk: PaillierPublicKey,
        sk: PaillierPrivateKey,
    }

    fn fixture() -> Fixture {
        let (pk, sk) = keygen(512, &mut rand::thread_rng());
        let registry = Registry::new(RegistryId::from_service_key(&pk));
        Fixture { registry, pk, sk }
    }

    fn ident(tag: u8) -> Identity {
        Identity([tag; 20])
    }

    fn submit(f: &Fixture, owner: Identity, values: [u32; 3], now: u64) {
        let mut builder = EncryptedInputBuilder::new(f.registry.id(), owner);
        for v in values {
            builder.add_u32(v).unwrap();
        }
        let input = builder.encrypt(&f.pk, &mut rand::thread_rng());
        let handles = input.handles.into_iter().map(EncU32::new).collect();
        f.registry
            .submit_preferences(owner, handles, &input.proof, now)
            .unwrap();
    }

    fn run_match(f: &Fixture, requester: Identity, candidate: Identity) -> Result<EncU32, RegistryError> {
        let mut oracle = LocalOracle {
            pk: f.pk.clone(),
            sk: f.sk.clone(),
        };
        let mut ctx = EvalCtx {
            pk: &f.pk,
            scheme: EqualityScheme::Blinded,
            eq: &mut oracle,
        };
        f.registry.request_match(requester, candidate, &mut ctx, 50)
    }

    fn decrypted(f: &Fixture, ind: &EncU32) -> u32 {
        u32::try_from(&dec(&f.sk, &ind.c)).unwrap()
    }

    #[test]
    fn submission_registers_and_emits() {
        let f = fixture();
        let alice = ident(1);
        assert!(!f.registry.has_preferences(alice));

        submit(&f, alice, [1, 2, 3], 10);
        assert!(f.registry.has_preferences(alice));
        assert_eq!(
            f.registry.drain_events(),
            vec![RegistryEvent::PreferencesRegistered {
                owner: alice,
                timestamp: 10
            }]
        );
    }

    #[test]
    fn resubmission_overwrites_and_keeps_directory_unique() {
        let f = fixture();
        let alice = ident(1);
        submit(&f, alice, [1, 2, 3], 10);
        let first = f.registry.get_encrypted_preferences(alice).unwrap();

        submit(&f, alice, [7, 8, 9], 20);
        let second = f.registry.get_encrypted_preferences(alice).unwrap();
        assert!(f.registry.has_preferences(alice));
        assert_ne!(first[0].c, second[0].c, "record must be replaced, not kept");
        assert_eq!(decrypted(&f, &second[0]), 7);
        assert_eq!(f.registry.registered_players(), vec![alice]);
    }

    #[test]
    fn wrong_count_rejected_before_mutation() {
        let f = fixture();
        let alice = ident(1);
        let mut builder = EncryptedInputBuilder::new(f.registry.id(), alice);
        builder.add_u32(1).unwrap();
        builder.add_u32(2).unwrap();
        let input = builder.encrypt(&f.pk, &mut rand::thread_rng());
        let handles: Vec<_> = input.handles.into_iter().map(EncU32::new).collect();

        let err = f
            .registry
            .submit_preferences(alice, handles, &input.proof, 10)
            .unwrap_err();
        assert!(matches!(err, RegistryError::WrongCount { got: 2 }));
        assert!(!f.registry.has_preferences(alice));
        assert!(f.registry.registered_players().is_empty());
    }

    #[test]
    fn foreign_proof_rejected() {
        let f = fixture();
        let alice = ident(1);
        let mallory = ident(3);
        // batch built for alice, replayed by mallory
        let mut builder = EncryptedInputBuilder::new(f.registry.id(), alice);
        for v in [1, 2, 3] {
            builder.add_u32(v).unwrap();
        }
        let input = builder.encrypt(&f.pk, &mut rand::thread_rng());
        let handles: Vec<_> = input.handles.into_iter().map(EncU32::new).collect();

        let err = f
            .registry
            .submit_preferences(mallory, handles, &input.proof, 10)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidProof { .. }));
        assert!(!f.registry.has_preferences(mallory));
    }

    #[test]
    fn self_match_always_rejected() {
        let f = fixture();
        let alice = ident(1);
        assert!(matches!(
            run_match(&f, alice, alice),
            Err(RegistryError::SelfMatch)
        ));
        submit(&f, alice, [1, 2, 3], 10);
        assert!(matches!(
            run_match(&f, alice, alice),
            Err(RegistryError::SelfMatch)
        ));
    }

    #[test]
    fn missing_either_side_is_no_preferences() {
        let f = fixture();
        let alice = ident(1);
        let bob = ident(2);
        match run_match(&f, alice, bob) {
            Err(RegistryError::NoPreferences { identity }) => assert_eq!(identity, alice),
            other => panic!("unexpected: {other:?}"),
        }
        submit(&f, alice, [1, 2, 3], 10);
        match run_match(&f, alice, bob) {
            Err(RegistryError::NoPreferences { identity }) => assert_eq!(identity, bob),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn overlap_indicator_and_grant() {
        let f = fixture();
        let alice = ident(1);
        let bob = ident(2);
        submit(&f, alice, [1, 2, 3], 10);
        submit(&f, bob, [5, 6, 3], 11);
        f.registry.drain_events();

        let ind = run_match(&f, alice, bob).unwrap();
        assert_eq!(decrypted(&f, &ind), 1);
        assert_eq!(f.registry.grant_holder(ind.handle_id()), Some(alice));
        assert_eq!(
            f.registry.drain_events(),
            vec![RegistryEvent::MatchComputed {
                requester: alice,
                candidate: bob
            }]
        );

        let stored = f.registry.get_encrypted_match(alice, bob).unwrap();
        assert_eq!(stored.c, ind.c);
        // the reverse ordered pair has no entry
        assert!(matches!(
            f.registry.get_encrypted_match(bob, alice),
            Err(RegistryError::NotFound)
        ));
    }

    #[test]
    fn disjoint_indicator_is_zero() {
        let f = fixture();
        let bob = ident(2);
        let carol = ident(4);
        submit(&f, bob, [1, 4, 5], 10);
        submit(&f, carol, [2, 3, 6], 11);

        let ind = run_match(&f, bob, carol).unwrap();
        assert_eq!(decrypted(&f, &ind), 0);
    }

    #[test]
    fn recompute_after_edit_overwrites_entry_and_keeps_grantee() {
        let f = fixture();
        let alice = ident(1);
        let bob = ident(2);
        submit(&f, alice, [1, 2, 3], 10);
        submit(&f, bob, [5, 6, 3], 11);

        let first = run_match(&f, alice, bob).unwrap();
        assert_eq!(decrypted(&f, &first), 1);

        // alice edits away the shared interest; the next request compares
        // current preferences, not historical ones
        submit(&f, alice, [7, 8, 9], 20);
        let second = run_match(&f, alice, bob).unwrap();
        assert_eq!(decrypted(&f, &second), 0);

        let stored = f.registry.get_encrypted_match(alice, bob).unwrap();
        assert_eq!(stored.c, second.c);
        // both handles stay granted to the original requester
        assert_eq!(f.registry.grant_holder(first.handle_id()), Some(alice));
        assert_eq!(f.registry.grant_holder(second.handle_id()), Some(alice));
    }

    #[test]
    fn grantee_alone_can_decrypt_through_the_gateway() {
        use cimcrypto::access::{key_fingerprint, DecryptionAuthorization};
        use cimcrypto::{AccessError, ThresholdGateway};
        use ed25519_dalek::SigningKey;

        let (pk, sk) = keygen(512, &mut rand::thread_rng());
        let gateway = ThresholdGateway::new(pk.clone(), sk.clone());
        let registry = Registry::new(gateway.registry_id());
        let f = Fixture { registry, pk, sk };

        let alice_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let alice = Identity::from_verifying_key(&alice_key.verifying_key());
        let bob_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let bob = Identity::from_verifying_key(&bob_key.verifying_key());

        submit(&f, alice, [1, 2, 3], 10);
        submit(&f, bob, [5, 6, 3], 11);

        let ind = {
            let mut oracle = gateway.clone();
            let mut ctx = EvalCtx {
                pk: &f.pk,
                scheme: EqualityScheme::Blinded,
                eq: &mut oracle,
            };
            f.registry.request_match(alice, bob, &mut ctx, 50).unwrap()
        };

        let (reveal_pk, reveal_sk) = keygen(512, &mut rand::thread_rng());
        let auth = DecryptionAuthorization {
            reveal_key_fingerprint: key_fingerprint(&reveal_pk),
            registry_id: gateway.registry_id(),
            valid_from: 40,
            duration_days: 1,
        };
        let grantee = f.registry.grant_holder(ind.handle_id());

        // the requester decrypts their indicator
        let sig = auth.sign(&alice_key);
        let masked = gateway
            .user_decrypt(
                &ind.c,
                grantee,
                &auth,
                &alice_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &reveal_pk,
                60,
            )
            .unwrap();
        assert_eq!(u32::try_from(&dec(&reveal_sk, &masked)).unwrap(), 1);

        // the candidate, with a perfectly valid signature of their own,
        // cannot decrypt the same handle
        let sig = auth.sign(&bob_key);
        let err = gateway
            .user_decrypt(
                &ind.c,
                grantee,
                &auth,
                &bob_key.verifying_key().to_bytes(),
                &sig.to_bytes(),
                &reveal_pk,
                60,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::NotGrantee { .. }));
    }

    #[test]
    fn directory_lists_everyone_once_in_order() {
        let f = fixture();
        let alice = ident(1);
        let bob = ident(2);
        let carol = ident(4);
        submit(&f, alice, [1, 2, 3], 10);
        submit(&f, bob, [4, 5, 6], 11);
        submit(&f, alice, [7, 8, 9], 12);
        submit(&f, carol, [1, 1, 1], 13);
        submit(&f, bob, [2, 2, 2], 14);

        assert_eq!(f.registry.registered_players(), vec![alice, bob, carol]);
    }
}
