use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pairgate::infra::crypto::{aes_decrypt, aes_encrypt, sha256hex};

fn bench_hash_framing(c: &mut Criterion) {
    let alias = "alice.example";

    c.bench_function("sha256hex_alias", |b| {
        b.iter(|| sha256hex(black_box(alias.as_bytes())))
    });
}

fn bench_token_round_trip(c: &mut Criterion) {
    let key = [7u8; 32];
    let session_id = "d2657424-6a20-4d86-91a1-6c9a5c0a3a3e";

    c.bench_function("aes_token_encrypt", |b| {
        b.iter(|| aes_encrypt(black_box(session_id.as_bytes()), &key))
    });

    let token = aes_encrypt(session_id.as_bytes(), &key);
    c.bench_function("aes_token_decrypt", |b| {
        b.iter(|| aes_decrypt(black_box(&token), &key).unwrap())
    });
}

criterion_group!(benches, bench_hash_framing, bench_token_round_trip);
criterion_main!(benches);
