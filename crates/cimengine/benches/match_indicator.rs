use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cimcrypto::{dec, enc, enc_u32, keygen, Ciphertext, EncU32, EqualityScheme,
    PaillierPrivateKey, PaillierPublicKey, RemoteEquality};
use cimengine::{intersect_indicator, EvalCtx};
use rug::Integer;

struct LocalOracle {
    pk: PaillierPublicKey,
    sk: PaillierPrivateKey,
}

impl RemoteEquality for LocalOracle {
    fn eq_zero(&mut self, x: &Ciphertext) -> anyhow::Result<Ciphertext> {
        let v = dec(&self.sk, x);
        let bit = Integer::from((v == 0) as u32);
        Ok(enc(&self.pk, &bit, &mut rand::thread_rng()))
    }
}

fn enc_triple(pk: &PaillierPublicKey, values: [u32; 3]) -> [EncU32; 3] {
    let mut rng = rand::thread_rng();
    values.map(|v| EncU32::new(enc_u32(pk, v, &mut rng)))
}

fn bench_match_indicator(c: &mut Criterion) {
    let (pk, sk) = keygen(1024, &mut rand::thread_rng());
    let mut oracle = LocalOracle {
        pk: pk.clone(),
        sk,
    };

    let mine = enc_triple(&pk, [1, 2, 3]);
    let theirs = enc_triple(&pk, [5, 6, 3]);

    c.bench_function("intersect_indicator_blinded", |bencher| {
        bencher.iter(|| {
            let mut ctx = EvalCtx {
                pk: &pk,
                scheme: EqualityScheme::Blinded,
                eq: &mut oracle,
            };
            let res = intersect_indicator(&mine, &theirs, &mut ctx).unwrap();
            black_box(res);
        });
    });
}

criterion_group!(benches, bench_match_indicator);
criterion_main!(benches);
