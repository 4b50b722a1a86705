use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mepoo::{
    ChunkHeader, ChunkSettings, MePooConfig, MemPool, MemoryManager, PanicHandler, SharedSegment,
};
use std::sync::Arc;
use std::thread;

const SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

fn benchmark_get_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("mempool_get_free");

    let pools = [
        (64, 1024, "64B"),         // Small messages
        (4 * 1024, 1024, "4KB"),   // Page sized
        (1024 * 1024, 16, "1MB"), // Large frames
    ];

    for (chunk_size, number_of_chunks, label) in pools.iter() {
        let mut segment = SharedSegment::anonymous(SEGMENT_SIZE).unwrap();
        let (mut management, mut chunks) = segment.split_allocators(64 * 1024).unwrap();
        let pool = MemPool::new(
            *chunk_size,
            *number_of_chunks,
            &mut management,
            &mut chunks,
            Arc::new(PanicHandler),
        )
        .unwrap();

        group.bench_with_input(BenchmarkId::new("single", label), chunk_size, |b, _| {
            b.iter(|| {
                let chunk = pool.get_chunk().unwrap();
                pool.free_chunk(black_box(chunk)).unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("mempool_contended");

    let mut segment = SharedSegment::anonymous(SEGMENT_SIZE).unwrap();
    let (mut management, mut chunks) = segment.split_allocators(64 * 1024).unwrap();
    let pool = MemPool::new(
        256,
        4096,
        &mut management,
        &mut chunks,
        Arc::new(PanicHandler),
    )
    .unwrap();

    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for _ in 0..1000 {
                                if let Some(chunk) = pool.get_chunk() {
                                    pool.free_chunk(chunk).unwrap();
                                }
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

fn benchmark_memory_manager(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_manager");

    let mut config = MePooConfig::new();
    config.add_pool(128, 1024).add_pool(1024, 512).add_pool(16 * 1024, 64);

    let mut segment = SharedSegment::anonymous(SEGMENT_SIZE).unwrap();
    let management_size = config.required_management_memory_size().unwrap();
    let (mut management, mut chunks) = segment.split_allocators(management_size + 64).unwrap();
    let manager =
        MemoryManager::new(&config, &mut management, &mut chunks, Arc::new(PanicHandler)).unwrap();

    for payload_size in [64u32, 1000, 10 * 1024] {
        let settings = ChunkSettings::with_payload(payload_size).unwrap();
        group.bench_with_input(
            BenchmarkId::new("get_free", payload_size),
            &settings,
            |b, settings| {
                b.iter(|| {
                    let header = manager.get_chunk(settings).unwrap();
                    let payload = unsafe { header.as_ref().payload() };
                    let found = unsafe { ChunkHeader::from_payload(black_box(payload)) }.unwrap();
                    manager.free_chunk(found).unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_get_free,
    benchmark_contended,
    benchmark_memory_manager
);
criterion_main!(benches);
