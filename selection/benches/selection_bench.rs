use criterion::{black_box, criterion_group, criterion_main, Criterion};
use taler_selection::{
    select_payment_coins, select_withdrawal_denoms, CandidateCoin, PaymentTarget, WithdrawableDenom,
};
use taler_types::{Amount, EddsaPublicKey, HashCode, Timestamp};

const DENOMS: [&str; 6] = ["KUDOS:0.1", "KUDOS:0.5", "KUDOS:1", "KUDOS:2", "KUDOS:5", "KUDOS:10"];

fn wallet_coins(n: usize) -> Vec<CandidateCoin> {
    (0..n)
        .map(|i| CandidateCoin {
            coin_pub: EddsaPublicKey([(i % 256) as u8; 32]),
            exchange_base_url: "https://exchange.example.com/".into(),
            denom_pub_hash: HashCode([(i % 6) as u8; 64]),
            value: Amount::parse(DENOMS[i % DENOMS.len()]).unwrap(),
            fee_deposit: Amount::parse("KUDOS:0").unwrap(),
            expire_deposit: Timestamp::new(1_000 + i as u64),
        })
        .collect()
}

fn payment_exact_bench(c: &mut Criterion) {
    let coins = wallet_coins(200);
    let target = PaymentTarget::new(Amount::parse("KUDOS:37.6").unwrap()).unwrap();

    c.bench_function("select_payment_200_coins", |b| {
        b.iter(|| select_payment_coins(black_box(&coins), &target))
    });
}

fn payment_partial_bench(c: &mut Criterion) {
    let coins = wallet_coins(200);
    let target = PaymentTarget::new(Amount::parse("KUDOS:37.63").unwrap()).unwrap();

    c.bench_function("select_payment_partial_200_coins", |b| {
        b.iter(|| select_payment_coins(black_box(&coins), &target))
    });
}

fn withdrawal_bench(c: &mut Criterion) {
    let denoms: Vec<WithdrawableDenom> = DENOMS
        .iter()
        .enumerate()
        .map(|(i, v)| WithdrawableDenom {
            denom_pub_hash: HashCode([i as u8; 64]),
            value: Amount::parse(v).unwrap(),
            fee_withdraw: Amount::parse("KUDOS:0.01").unwrap(),
        })
        .collect();
    let amount = Amount::parse("KUDOS:123.45").unwrap();

    c.bench_function("select_withdrawal_denoms", |b| {
        b.iter(|| select_withdrawal_denoms(black_box(&amount), &denoms))
    });
}

criterion_group!(benches, payment_exact_bench, payment_partial_bench, withdrawal_bench);
criterion_main!(benches);
