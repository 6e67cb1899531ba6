//! Homomorphic equality over Paillier ciphertexts.
//!
//! Paillier is additively homomorphic only, so an equality test needs one
//! round trip to the party holding decryption capability. The interface for
//! that round trip is [`RemoteEquality`]; what travels over it depends on
//! the [`EqualityScheme`]:
//!
//! - `DevOracle` sends the raw difference ciphertext. The gateway learns the
//!   full difference value. Bring-up and testing only.
//! - `Blinded` multiplies the difference by a fresh nonzero scalar and
//!   rerandomizes before sending, so the gateway learns only whether the
//!   operands were equal, never by how much they differ.

use anyhow::Result;
use rug::Integer;
use serde::{Deserialize, Serialize};

use crate::{add, mul_plain, rand_int_bits, rerandomize, Ciphertext, PaillierPublicKey};

/// Bit width of the blinding scalar. Plaintexts are 32-bit, so a 128-bit
/// scalar keeps the blinded product far below the modulus.
pub const BLIND_BITS: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EqualityScheme {
    DevOracle,
    Blinded,
}

/// Capability for the single interactive step: produce `Enc([m == 0])` for
/// a ciphertext of `m`. Implemented by the decryption gateway; local oracle
/// stand-ins live in tests and benches.
pub trait RemoteEquality {
    fn eq_zero(&mut self, x: &Ciphertext) -> Result<Ciphertext>;
}

/// Multiply `x` by a fresh random nonzero scalar and rerandomize. Zero stays
/// zero; any nonzero plaintext becomes a nonzero value unrelated to the
/// original magnitude.
pub fn blind_nonzero(pk: &PaillierPublicKey, x: &Ciphertext) -> Ciphertext {
    let mut rng = rand::thread_rng();
    let r = loop {
        let r = rand_int_bits(BLIND_BITS, &mut rng);
        if r != 0 {
            break r;
        }
    };
    rerandomize(pk, &mul_plain(pk, x, &r), &mut rng)
}

/// `Enc([m == 0])` for a ciphertext of `m`, routed per scheme.
pub fn eq_zero_under(
    pk: &PaillierPublicKey,
    x: &Ciphertext,
    scheme: EqualityScheme,
    eq: &mut dyn RemoteEquality,
) -> Result<Ciphertext> {
    match scheme {
        EqualityScheme::DevOracle => eq.eq_zero(x),
        EqualityScheme::Blinded => eq.eq_zero(&blind_nonzero(pk, x)),
    }
}

/// `Enc([a == b])` via the difference `a - b`.
pub fn eq_ct(
    pk: &PaillierPublicKey,
    a: &Ciphertext,
    b: &Ciphertext,
    scheme: EqualityScheme,
    eq: &mut dyn RemoteEquality,
) -> Result<Ciphertext> {
    let diff = add(pk, a, &mul_plain(pk, b, &Integer::from(-1)));
    eq_zero_under(pk, &diff, scheme, eq)
}
