// Hybrid log allocator microbenchmarks: raw `allocate`/write throughput
// and the cost of a page-boundary roll (flush-triggering), mirroring
// the teacher's `buffer_pool_bench.rs` fixture-per-iteration shape.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hlogkv::config::LogSettings;
use hlogkv::epoch::EpochManager;
use hlogkv::log::device::LocalStorageDevice;
use hlogkv::log::HybridLogAllocator;
use tempfile::TempDir;

fn small_settings(page_size_bits: u32) -> LogSettings {
    LogSettings {
        page_size_bits,
        memory_size_bits: page_size_bits + 3,
        segment_size_bits: page_size_bits + 3,
        mutable_fraction: 0.9,
        copy_reads_to_tail: false,
        read_cache_settings: None,
    }
}

fn make_allocator(page_size_bits: u32) -> (HybridLogAllocator<LocalStorageDevice>, TempDir) {
    let dir = TempDir::new().unwrap();
    let device = LocalStorageDevice::create_in_dir(dir.path(), "hlog.dat").unwrap();
    let log = HybridLogAllocator::new(&small_settings(page_size_bits), device, EpochManager::new());
    (log, dir)
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_allocate");
    for record_size in [16usize, 64, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(record_size),
            &record_size,
            |b, &record_size| {
                let (log, _dir) = make_allocator(16);
                b.iter(|| black_box(log.allocate(record_size)));
            },
        );
    }
    group.finish();
}

fn bench_write_read_roundtrip(c: &mut Criterion) {
    c.bench_function("allocator_write_read_roundtrip", |b| {
        let (log, _dir) = make_allocator(16);
        let payload = vec![0xABu8; 64];
        b.iter(|| {
            let addr = log.allocate(payload.len());
            log.write_bytes(addr, &payload);
            black_box(log.read_bytes(addr, payload.len()));
        });
    });
}

fn bench_page_rollover(c: &mut Criterion) {
    c.bench_function("allocator_page_rollover", |b| {
        b.iter(|| {
            // Small pages force frequent rollovers, exercising the
            // flush/evict path on every iteration.
            let (log, _dir) = make_allocator(8);
            for _ in 0..64 {
                black_box(log.allocate(16));
            }
        });
    });
}

criterion_group!(benches, bench_allocate, bench_write_read_roundtrip, bench_page_rollover);
criterion_main!(benches);
