// Envelope benchmarks for the transaction engine.
//
// Covers key wrapping, payload sealing at a few sizes, full request
// construction and opening an encrypted storefront response.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use iap_engine::crypto::{
    open, random_iv, seal, unwrap_key, wrap_key, EncryptionContext, EnvelopeKeypair, SymmetricKey,
};
use iap_engine::purchase::{OutstandingRequestTable, RequestBuilder, ResponseDecoder, SealedPayload};
use iap_engine::sandbox::SandboxStorefront;

fn bench_wrap_key(c: &mut Criterion) {
    let recipient = EnvelopeKeypair::generate();
    let public = recipient.public_key();
    let key = SymmetricKey::generate();

    c.bench_function("x25519/wrap_key", |b| {
        b.iter(|| wrap_key(&key, &public).unwrap());
    });

    let wrapped = wrap_key(&key, &public).unwrap();
    c.bench_function("x25519/unwrap_key", |b| {
        b.iter(|| unwrap_key(&wrapped, &recipient).unwrap());
    });
}

fn bench_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("aes256gcm/seal_open");
    let key = SymmetricKey::generate();

    for size in [64usize, 1024, 16 * 1024] {
        let payload = vec![0x5au8; size];
        let iv = random_iv();
        let sealed = seal(&key, &iv, &payload).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("seal", size), &payload, |b, payload| {
            b.iter(|| seal(&key, &iv, payload).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("open", size), &sealed, |b, sealed| {
            b.iter(|| open(&key, &iv, sealed).unwrap());
        });
    }

    group.finish();
}

fn bench_build_request(c: &mut Criterion) {
    let storefront = EnvelopeKeypair::generate();
    let table = Arc::new(OutstandingRequestTable::new());
    let builder = RequestBuilder::new(
        EncryptionContext::new(storefront.public_key()),
        Arc::clone(&table),
        true,
    );

    c.bench_function("request/build", |b| {
        b.iter(|| {
            let (intent, envelope) = builder.build("sword").unwrap();
            table.resolve(intent.correlation_id()).unwrap();
            envelope
        });
    });
}

fn bench_open_response(c: &mut Criterion) {
    let client = EnvelopeKeypair::generate();
    let sandbox = SandboxStorefront::in_memory(
        EnvelopeKeypair::generate(),
        client.public_key(),
        SandboxStorefront::default_catalog(),
    )
    .unwrap();
    let decoder = ResponseDecoder::new(client, Arc::new(OutstandingRequestTable::new()));

    let raw = sandbox
        .seal_json(&serde_json::json!({
            "receipts": [
                {"identifier": "sword", "purchaseDate": "2024-03-05T00:00:00Z", "uuid": "r1"},
            ]
        }))
        .unwrap();
    let sealed: SealedPayload = serde_json::from_str(&raw).unwrap();

    c.bench_function("response/open", |b| {
        b.iter(|| decoder.open(&sealed).unwrap());
    });
    c.bench_function("response/decode_receipts", |b| {
        b.iter(|| decoder.decode_receipts(&raw).unwrap());
    });
}

criterion_group!(
    benches,
    bench_wrap_key,
    bench_seal,
    bench_build_request,
    bench_open_response,
);
criterion_main!(benches);
