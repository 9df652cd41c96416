use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use udprobe::engine::store::{CorrelationStore, InFlightPacket};
use udprobe::engine::wire;

fn bench_decode_echo(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let payload = wire::encode_probe(Uuid::new_v4(), 1_700_000_000_000, 1337, 256, &mut rng);

    c.bench_function("decode_echo_256b", |b| {
        b.iter(|| wire::decode_echo(black_box(&payload)))
    });
}

fn bench_encode_probe(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let tag = Uuid::new_v4();

    c.bench_function("encode_probe_256b", |b| {
        b.iter(|| wire::encode_probe(black_box(tag), 1_700_000_000_000, 1337, 256, &mut rng))
    });
}

fn expired_store(entries: u64, now: Instant) -> CorrelationStore {
    let mut store = CorrelationStore::new();
    for id in 1..=entries {
        store.insert(InFlightPacket {
            packet_id: id,
            target: "bench".to_string(),
            tag: Uuid::from_u128(u128::from(id)),
            sent_at_ms: id,
            sent_at: now - Duration::from_secs(120),
        });
    }
    store
}

fn bench_sweep_expired(c: &mut Criterion) {
    let now = Instant::now();

    c.bench_function("sweep_expired_10k", |b| {
        b.iter_batched(
            || expired_store(10_000, now),
            |mut store| store.sweep_expired(black_box(now), Duration::from_secs(60)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_decode_echo,
    bench_encode_probe,
    bench_sweep_expired
);
criterion_main!(benches);
