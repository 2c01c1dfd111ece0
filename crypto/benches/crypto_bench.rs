use criterion::{black_box, criterion_group, criterion_main, Criterion};
use taler_types::{Amount, BlindingSecret};

fn eddsa_sign_bench(c: &mut Criterion) {
    let kp = taler_crypto::generate_eddsa_keypair();
    let msg = [42u8; 128];

    c.bench_function("eddsa_sign_128B", |b| {
        b.iter(|| taler_crypto::eddsa_sign(black_box(&msg), &kp.private))
    });
}

fn eddsa_verify_bench(c: &mut Criterion) {
    let kp = taler_crypto::generate_eddsa_keypair();
    let msg = [42u8; 128];
    let sig = taler_crypto::eddsa_sign(&msg, &kp.private);

    c.bench_function("eddsa_verify_128B", |b| {
        b.iter(|| taler_crypto::eddsa_verify(black_box(&msg), &sig, &kp.public))
    });
}

fn sha512_1kb_bench(c: &mut Criterion) {
    let data = vec![0xCDu8; 1024];

    c.bench_function("sha512_1KB", |b| {
        b.iter(|| taler_crypto::sha512(black_box(&data)))
    });
}

fn create_planchet_bench(c: &mut Criterion) {
    let denom = taler_crypto::denom_keypair_from_seed(b"bench");

    c.bench_function("create_planchet", |b| {
        b.iter(|| {
            let secrets = taler_crypto::derive_withdrawal_secrets(black_box(&[7u8; 32]), 0);
            taler_crypto::create_planchet(secrets, &denom.public)
        })
    });
}

fn blind_sign_unblind_bench(c: &mut Criterion) {
    let denom = taler_crypto::denom_keypair_from_seed(b"bench");
    let coin = taler_crypto::generate_eddsa_keypair();
    let bks = BlindingSecret([3u8; 32]);
    let blinded = taler_crypto::blind(&coin.public, &bks);

    c.bench_function("sign_blinded", |b| {
        b.iter(|| taler_crypto::sign_blinded(&denom.private, black_box(&blinded)))
    });

    let sig = taler_crypto::sign_blinded(&denom.private, &blinded).unwrap();
    c.bench_function("unblind_and_verify", |b| {
        b.iter(|| taler_crypto::unblind_and_verify(&blinded, black_box(&sig), &bks, &denom.public))
    });
}

fn refresh_session_bench(c: &mut Criterion) {
    let coin = taler_crypto::generate_eddsa_keypair();
    let amount = Amount::parse("EUR:8").unwrap();
    let denoms: Vec<_> = (0..4u8)
        .map(|i| taler_crypto::denom_keypair_from_seed(&[i]).public)
        .collect();

    c.bench_function("derive_refresh_session_kappa3_4coins", |b| {
        b.iter(|| {
            taler_crypto::derive_refresh_session(&[1u8; 32], 3, &coin.public, &amount, black_box(&denoms))
        })
    });
}

criterion_group!(
    benches,
    eddsa_sign_bench,
    eddsa_verify_bench,
    sha512_1kb_bench,
    create_planchet_bench,
    blind_sign_unblind_bench,
    refresh_session_bench,
);
criterion_main!(benches);
