use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use xet_chunking::chunk_bytes;

fn bench_chunking(c: &mut Criterion) {
    let mut data = vec![0u8; 8 * 1024 * 1024];
    StdRng::seed_from_u64(42).fill_bytes(&mut data);

    let mut group = c.benchmark_group("chunking");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("chunk_bytes/8MiB", |b| {
        b.iter(|| chunk_bytes(black_box(&data)))
    });
    group.finish();
}

criterion_group!(benches, bench_chunking);
criterion_main!(benches);
