//! cimcrypto: Minimal Paillier runtime, ciphertext handle utilities, and the
//! client/gateway helpers the confidential interest registry builds on.
//!
//! SECURITY NOTE: The input proof is a bound transcript, not a zero-knowledge
//! proof, and the decryption gateway is a single-party stand-in for a
//! threshold service. Both carry the production contract shape only; do not
//! deploy them against an untrusted gateway.

use anyhow::Result;
use rand::RngCore;
use rug::integer::Order;
use rug::{Assign, Integer};
use serde::{Deserialize, Serialize};

pub mod access;
pub mod equality;
pub mod ids;
pub mod input;

pub use access::{AccessError, DecryptionAuthorization, ThresholdGateway};
pub use equality::{EqualityScheme, RemoteEquality};
pub use ids::{HandleId, Identity, RegistryId};
pub use input::{EncryptedInput, EncryptedInputBuilder, InputProof};

// ---------------- Paillier core ----------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaillierPublicKey {
    #[serde(with = "serde_bytes")]
    pub n: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub n2: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaillierPrivateKey {
    #[serde(with = "serde_bytes")]
    pub lambda: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub mu: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub n: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub n2: Vec<u8>,
}

/// Raw ciphertext bytes. Everything above this crate treats the contents as
/// opaque; the only defined operations are the homomorphic ones below.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ciphertext(#[serde(with = "serde_bytes")] pub Vec<u8>);

/// Handle to an encrypted 32-bit value. Nominal wrapper so plaintext
/// integers and ciphertext references cannot be mixed up at compile time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncU32 {
    pub c: Ciphertext,
}

impl EncU32 {
    pub fn new(c: Ciphertext) -> Self {
        Self { c }
    }

    /// Stable fingerprint of the ciphertext bytes; key of the access ledger.
    pub fn handle_id(&self) -> HandleId {
        HandleId::of(&self.c)
    }
}

impl PaillierPublicKey {
    pub fn n(&self) -> Integer {
        int_from_be(&self.n)
    }
    pub fn n2(&self) -> Integer {
        int_from_be(&self.n2)
    }
}

impl PaillierPrivateKey {
    pub fn n(&self) -> Integer {
        int_from_be(&self.n)
    }
    pub fn n2(&self) -> Integer {
        int_from_be(&self.n2)
    }
    pub fn lambda(&self) -> Integer {
        int_from_be(&self.lambda)
    }
    pub fn mu(&self) -> Integer {
        int_from_be(&self.mu)
    }

    pub fn public_key(&self) -> PaillierPublicKey {
        PaillierPublicKey {
            n: self.n.clone(),
            n2: self.n2.clone(),
        }
    }
}

#[inline]
fn int_from_be(bytes: &[u8]) -> Integer {
    Integer::from_digits(bytes, Order::MsfBe)
}

#[inline]
fn int_to_be(i: &Integer) -> Vec<u8> {
    i.to_digits::<u8>(Order::MsfBe)
}

/// Uniform non-negative Integer in [0, 2^bits).
pub fn rand_int_bits(bits: usize, rng: &mut impl RngCore) -> Integer {
    if bits == 0 {
        return Integer::from(0);
    }
    let nbytes = (bits + 7) / 8;
    let mut bytes = vec![0u8; nbytes];
    rng.fill_bytes(&mut bytes);
    let excess = 8 * nbytes - bits;
    if excess > 0 {
        bytes[0] &= 0xFFu8 >> excess;
    }
    Integer::from_digits(&bytes, Order::MsfBe)
}

pub fn keygen(bits: u32, rng: &mut impl RngCore) -> (PaillierPublicKey, PaillierPrivateKey) {
    use rug::integer::IsPrime;
    let half = bits / 2;
    let mut gen_prime = |bits: u32| -> Integer {
        loop {
            let mut bytes = vec![0u8; (bits as usize + 7) / 8];
            rng.fill_bytes(&mut bytes);
            // force top bit and odd
            if let Some(b) = bytes.first_mut() {
                *b |= 0x80;
            }
            if let Some(b) = bytes.last_mut() {
                *b |= 1;
            }
            let mut p = Integer::from_digits(&bytes, Order::MsfBe);
            p.next_prime_mut();
            if p.is_probably_prime(25) != IsPrime::No {
                return p;
            }
        }
    };
    let p = gen_prime(half);
    let q = gen_prime(half);
    let n: Integer = (&p * &q).into();
    let n2: Integer = (&n * &n).into();
    let lambda = lcm(&(p.clone() - 1), &(q.clone() - 1));
    // standard Paillier g = n + 1
    let g: Integer = {
        let mut t = n.clone();
        t += 1;
        t
    };
    let mut gl: Integer = g.pow_mod(&lambda, &n2).unwrap();
    let l_val = l_fn(&mut gl, &n);
    let mu = l_val.invert(&n).expect("invert exists");

    let pk = PaillierPublicKey {
        n: int_to_be(&n),
        n2: int_to_be(&n2),
    };
    let sk = PaillierPrivateKey {
        lambda: int_to_be(&lambda),
        mu: int_to_be(&mu),
        n: pk.n.clone(),
        n2: pk.n2.clone(),
    };
    (pk, sk)
}

// L(u) = (u - 1) / n
fn l_fn(x: &mut Integer, n: &Integer) -> Integer {
    let mut t = x.clone();
    t -= 1;
    t / n
}

fn gcd(mut a: Integer, mut b: Integer) -> Integer {
    while b != 0 {
        let r: Integer = (&a % &b).into();
        a = b;
        b = r;
    }
    a
}

fn lcm(a: &Integer, b: &Integer) -> Integer {
    let g = gcd(a.clone(), b.clone());
    let prod: Integer = (a * b).into();
    prod / g
}

pub fn enc(pk: &PaillierPublicKey, m: &Integer, rng: &mut impl RngCore) -> Ciphertext {
    let n = pk.n();
    let n2 = pk.n2();
    let mut r_bytes = vec![0u8; (n.significant_bits() as usize + 7) / 8];
    rng.fill_bytes(&mut r_bytes);
    let mut r = Integer::from_digits(&r_bytes, Order::MsfBe);
    r %= &n;
    if r == 0 {
        r.assign(1);
    }
    let g: Integer = {
        let mut t = n.clone();
        t += 1;
        t
    };
    let c = (g.pow_mod(m, &n2).unwrap() * r.pow_mod(&n, &n2).unwrap()) % n2;
    Ciphertext(int_to_be(&c))
}

/// Encrypt a 32-bit plaintext; the only plaintext width the registry handles.
pub fn enc_u32(pk: &PaillierPublicKey, v: u32, rng: &mut impl RngCore) -> Ciphertext {
    enc(pk, &Integer::from(v), rng)
}

pub fn dec(sk: &PaillierPrivateKey, c: &Ciphertext) -> Integer {
    let n = sk.n();
    let n2 = sk.n2();
    let ci = int_from_be(&c.0);
    let mut u = ci.pow_mod(&sk.lambda(), &n2).unwrap();
    let l = l_fn(&mut u, &n);
    (l * sk.mu()) % &n
}

pub fn add(pk: &PaillierPublicKey, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
    let n2 = pk.n2();
    let ai = int_from_be(&a.0);
    let bi = int_from_be(&b.0);
    Ciphertext(int_to_be(&((ai * bi) % n2)))
}

pub fn add_plain(pk: &PaillierPublicKey, a: &Ciphertext, k: &Integer) -> Ciphertext {
    let n = pk.n();
    let n2 = pk.n2();
    let ai = int_from_be(&a.0);
    let g: Integer = {
        let mut t = n.clone();
        t += 1;
        t
    };
    let mut kk = k.clone();
    if kk.is_negative() {
        kk = (kk % &n + &n) % &n;
    }
    let ek = g.pow_mod(&kk, &n2).unwrap();
    Ciphertext(int_to_be(&((ai * ek) % n2)))
}

pub fn mul_plain(pk: &PaillierPublicKey, a: &Ciphertext, k: &Integer) -> Ciphertext {
    let n2 = pk.n2();
    let mut ai = int_from_be(&a.0);
    // exponentiate by k modulo n^2; negative k reduced into Z_n first
    let mut kk = k.clone();
    if kk.is_negative() {
        let n = pk.n();
        kk = (kk % &n + &n) % &n;
    }
    ai.pow_mod_mut(&kk, &n2).unwrap();
    Ciphertext(int_to_be(&ai))
}

pub fn rerandomize(pk: &PaillierPublicKey, a: &Ciphertext, rng: &mut dyn RngCore) -> Ciphertext {
    let n = pk.n();
    let n2 = pk.n2();
    let mut r_bytes = vec![0u8; (n.significant_bits() as usize + 7) / 8];
    rng.fill_bytes(&mut r_bytes);
    let mut r = Integer::from_digits(&r_bytes, Order::MsfBe);
    r %= &n;
    if r == 0 {
        r.assign(1);
    }
    let ri = r.pow_mod(&n, &n2).unwrap();
    let ai = int_from_be(&a.0);
    Ciphertext(int_to_be(&((ai * ri) % n2)))
}

/// Hex fingerprint of a public key, used for pinning and registry identity.
pub fn hash_key(pk: &PaillierPublicKey) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&pk.n);
    h.update(&pk.n2);
    h.finalize().to_hex().to_string()
}

// --- Simple JSON (de)serialization helpers for keys ---

pub fn save_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn load_json<T: for<'de> Deserialize<'de>>(path: &str) -> Result<T> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

// ------------------- Tests -------------------
