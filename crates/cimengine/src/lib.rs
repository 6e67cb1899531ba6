//! The match engine: a pure function from two stored preference triples to
//! one encrypted intersection indicator.
//!
//! The homomorphic model cannot branch on secret values, so the "any shared
//! interest" predicate is an unconditional reduction: all nine pairwise
//! equality bits are computed and summed, then the sum is clamped to {0,1}
//! with one final equality-to-zero test. No early exit, positions and
//! multiplicities irrelevant.

use anyhow::Result;
use rug::Integer;

use cimcrypto::equality::{eq_ct, eq_zero_under};
use cimcrypto::{add, enc, mul_plain, rerandomize, EncU32, EqualityScheme, PaillierPublicKey,
    RemoteEquality};

/// Number of interests per participant. Fixed by the registry contract.
pub const TRIPLE_LEN: usize = 3;

/// Everything one indicator evaluation needs: the service key, the equality
/// scheme in force, and the remote-equality capability.
pub struct EvalCtx<'a> {
    pub pk: &'a PaillierPublicKey,
    pub scheme: EqualityScheme,
    pub eq: &'a mut dyn RemoteEquality,
}

/// Encrypted indicator of whether the two triples share at least one
/// interest: decrypts to exactly 1 on overlap, exactly 0 otherwise.
pub fn intersect_indicator(
    mine: &[EncU32; TRIPLE_LEN],
    theirs: &[EncU32; TRIPLE_LEN],
    ctx: &mut EvalCtx,
) -> Result<EncU32> {
    let mut rng = rand::thread_rng();

    // hits = Σ_{i,j} [mine_i == theirs_j], evaluated over the full 3×3 grid
    let mut hits = enc(ctx.pk, &Integer::from(0), &mut rng);
    for a in mine.iter() {
        for b in theirs.iter() {
            let bit = eq_ct(ctx.pk, &a.c, &b.c, ctx.scheme, ctx.eq)?;
            hits = add(ctx.pk, &hits, &bit);
        }
    }

    // indicator = 1 - [hits == 0]
    let none = eq_zero_under(ctx.pk, &hits, ctx.scheme, ctx.eq)?;
    let one = enc(ctx.pk, &Integer::from(1), &mut rng);
    let indicator = add(ctx.pk, &one, &mul_plain(ctx.pk, &none, &Integer::from(-1)));

    Ok(EncU32::new(rerandomize(ctx.pk, &indicator, &mut rng)))
}

/// Plaintext reference rule; the homomorphic path must agree with it.
pub fn intersects_plain(mine: &[u32; TRIPLE_LEN], theirs: &[u32; TRIPLE_LEN]) -> bool {
    mine.iter().any(|a| theirs.contains(a))
}
