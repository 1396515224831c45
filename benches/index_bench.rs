// Hash index microbenchmarks: insert/find CAS throughput and the cost
// of growing the table under load, mirroring the teacher's
// `index_operations_bench.rs` shape (BenchmarkId-parameterized groups
// over a freshly built fixture per iteration).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hlogkv::address::Address;
use hlogkv::epoch::EpochManager;
use hlogkv::index::key_hash::KeyHash;
use hlogkv::index::HashIndex;

fn bench_find_or_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_index_find_or_create");
    for size in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let idx = HashIndex::new((size as u64).next_power_of_two());
            for i in 0..size as u64 {
                let h = KeyHash::of(&i);
                let found = idx.find_or_create_entry(h);
                idx.try_update_entry(&found, Address::new(1, i), h.tag(), false);
            }
            b.iter(|| {
                let h = KeyHash::of(&black_box(size as u64 / 2));
                black_box(idx.find_entry(h))
            });
        });
    }
    group.finish();
}

fn bench_grow(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_index_grow");
    for size in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let idx = HashIndex::new(size.next_power_of_two());
                for i in 0..size {
                    let h = KeyHash::of(&i);
                    let found = idx.find_or_create_entry(h);
                    idx.try_update_entry(&found, Address::new(1, i), h.tag(), false);
                }
                let epoch = EpochManager::new();
                idx.grow(&epoch, |addr| KeyHash::of(&addr.offset()));
                black_box(idx.entry_count());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find_or_create, bench_grow);
criterion_main!(benches);
