mod common;

use common::{RecordingHandler, as_bytes};
use mepoo::{
    BumpAllocator, ChunkHeader, ChunkSettings, FatalError, MePooConfig, MemPool, MemoryManager,
    OriginId,
};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Test the pool lifecycle from construction to exhaustion and back
///
/// Tests:
/// - Post-construction state
/// - Exhaustion returns None and keeps counters consistent
/// - Freeing everything restores the pool
/// - minFree keeps the low-water mark
#[test]
fn test_mempool_lifecycle() {
    const CHUNK_SIZE: u64 = 128;
    const NUMBER_OF_CHUNKS: u32 = 16;

    let mut management = vec![0u64; 1024];
    let mut chunks = vec![0u64; (CHUNK_SIZE as usize * NUMBER_OF_CHUNKS as usize) / 8];
    let handler = Arc::new(RecordingHandler::default());

    let pool = MemPool::new(
        CHUNK_SIZE,
        NUMBER_OF_CHUNKS,
        &mut BumpAllocator::new(as_bytes(&mut management)),
        &mut BumpAllocator::new(as_bytes(&mut chunks)),
        handler.clone(),
    )
    .unwrap();

    // TEST 1: fresh pool
    assert_eq!(pool.chunk_size(), CHUNK_SIZE);
    assert_eq!(pool.chunk_count(), NUMBER_OF_CHUNKS);
    assert_eq!(pool.used_chunks(), 0);
    assert_eq!(pool.min_free(), NUMBER_OF_CHUNKS);
    assert_eq!(pool.free_index_count(), NUMBER_OF_CHUNKS);

    // TEST 2: drain it
    let acquired: Vec<NonNull<u8>> = (0..NUMBER_OF_CHUNKS)
        .map(|_| pool.get_chunk().unwrap())
        .collect();
    assert_eq!(pool.used_chunks(), NUMBER_OF_CHUNKS);
    assert_eq!(pool.min_free(), 0);

    let base = pool.raw_memory().as_ptr() as usize;
    for chunk in &acquired {
        let offset = chunk.as_ptr() as usize - base;
        assert_eq!(offset % CHUNK_SIZE as usize, 0);
        assert!(offset < (CHUNK_SIZE * NUMBER_OF_CHUNKS as u64) as usize);
    }

    // TEST 3: exhaustion is not fatal
    assert!(pool.get_chunk().is_none());
    assert!(pool.get_chunk().is_none());
    assert_eq!(pool.used_chunks(), NUMBER_OF_CHUNKS);

    // TEST 4: give everything back
    for chunk in acquired {
        pool.free_chunk(chunk).unwrap();
    }
    assert_eq!(pool.used_chunks(), 0);
    assert_eq!(pool.free_index_count(), NUMBER_OF_CHUNKS);
    assert_eq!(pool.min_free(), 0, "minFree is a low-water mark");

    let info = pool.info();
    assert_eq!(info.used_chunks, 0);
    assert_eq!(info.min_free_chunks, 0);
    assert_eq!(info.peak_utilization(), 1.0);

    assert!(handler.errors().is_empty());
}

/// Test that double free is reported once per offending call and that the
/// pool keeps working afterwards
#[test]
fn test_double_free_does_not_corrupt_pool() {
    let mut management = vec![0u64; 256];
    let mut chunks = vec![0u64; 64];
    let handler = Arc::new(RecordingHandler::default());

    let pool = MemPool::new(
        64,
        8,
        &mut BumpAllocator::new(as_bytes(&mut management)),
        &mut BumpAllocator::new(as_bytes(&mut chunks)),
        handler.clone(),
    )
    .unwrap();

    let first = pool.get_chunk().unwrap();
    let second = pool.get_chunk().unwrap();
    pool.free_chunk(first).unwrap();

    assert_eq!(
        pool.free_chunk(first),
        Err(FatalError::DoubleFree { index: 0 })
    );
    assert_eq!(
        pool.free_chunk(first),
        Err(FatalError::DoubleFree { index: 0 })
    );
    assert_eq!(handler.errors().len(), 2);
    assert_eq!(pool.used_chunks(), 1);
    assert_eq!(pool.free_index_count(), 7);

    pool.free_chunk(second).unwrap();

    // Every chunk comes out exactly once
    let mut indices: Vec<u64> = (0..8)
        .map(|_| pool.offset_of(pool.get_chunk().unwrap()).unwrap().get() / 64)
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
    assert!(pool.get_chunk().is_none());
}

/// Test the pool under concurrent get/free from several threads
///
/// Each thread stamps the chunks it holds with its own id and checks the
/// stamp is still there before freeing. A chunk handed out twice would be
/// overwritten by the other holder.
#[test]
fn test_concurrent_get_and_free() {
    const CHUNK_SIZE: u64 = 64;
    const NUMBER_OF_CHUNKS: u32 = 32;
    const THREADS: u64 = 8;
    const ITERATIONS: usize = 5_000;

    let mut management = vec![0u64; 1024];
    let mut chunks = vec![0u64; (CHUNK_SIZE as usize * NUMBER_OF_CHUNKS as usize) / 8];
    let handler = Arc::new(RecordingHandler::default());

    let pool = MemPool::new(
        CHUNK_SIZE,
        NUMBER_OF_CHUNKS,
        &mut BumpAllocator::new(as_bytes(&mut management)),
        &mut BumpAllocator::new(as_bytes(&mut chunks)),
        handler.clone(),
    )
    .unwrap();

    let corrupted = AtomicBool::new(false);

    thread::scope(|scope| {
        for thread_id in 1..=THREADS {
            let pool = &pool;
            let corrupted = &corrupted;
            scope.spawn(move || {
                let mut held: Vec<NonNull<u8>> = Vec::with_capacity(4);
                for iteration in 0..ITERATIONS {
                    if held.len() < 4 {
                        if let Some(chunk) = pool.get_chunk() {
                            let stamp = (thread_id << 32) | iteration as u64;
                            unsafe { chunk.cast::<u64>().write_volatile(stamp) };
                            held.push(chunk);
                        }
                    }

                    if iteration % 3 != 0 {
                        continue;
                    }
                    if let Some(chunk) = held.pop() {
                        let stamp = unsafe { chunk.cast::<u64>().read_volatile() };
                        if stamp >> 32 != thread_id {
                            corrupted.store(true, Ordering::Relaxed);
                        }
                        pool.free_chunk(chunk).unwrap();
                    }
                }
                for chunk in held {
                    pool.free_chunk(chunk).unwrap();
                }
            });
        }
    });

    assert!(!corrupted.load(Ordering::Relaxed), "chunk handed out twice");
    assert_eq!(pool.used_chunks(), 0);
    assert_eq!(pool.free_index_count(), NUMBER_OF_CHUNKS);
    assert!(pool.min_free() <= NUMBER_OF_CHUNKS);
    assert!(handler.errors().is_empty());
}

/// Test the memory manager from request to header round trip
///
/// Tests:
/// - Requests go to the smallest fitting pool
/// - Header fields, custom header and payload addresses
/// - from_payload finds the header again
/// - Freeing through the header returns the chunk to its pool
#[test]
fn test_memory_manager_chunk_round_trip() {
    #[repr(C)]
    struct UserHeader {
        publisher: u64,
    }

    let mut config = MePooConfig::new();
    config.add_pool(32, 4).add_pool(512, 2);

    let management_size = config.required_management_memory_size().unwrap();
    let chunk_size = config.required_chunk_memory_size().unwrap();
    let mut management = vec![0u64; management_size as usize / 8 + 8];
    let mut chunks = vec![0u64; chunk_size as usize / 8 + 8];
    let handler = Arc::new(RecordingHandler::default());

    let manager = MemoryManager::new(
        &config,
        &mut BumpAllocator::new(as_bytes(&mut management)),
        &mut BumpAllocator::new(as_bytes(&mut chunks)),
        handler.clone(),
    )
    .unwrap();

    // 56 + 8 + 32 needs more than the 80 byte chunks of the small pool
    let settings = ChunkSettings::new(32, 8, size_of::<UserHeader>() as u32, 8).unwrap();
    assert!(settings.required_chunk_size() > manager.pools()[0].chunk_size());

    let mut header_ptr = manager.get_chunk(&settings).unwrap();
    let header = unsafe { header_ptr.as_mut() };
    assert_eq!(header.chunk_size(), manager.pools()[1].chunk_size());
    assert!(header.check_version().is_ok());
    assert!(header.has_custom_header());
    assert_eq!(header.payload_size(), 32);

    header.set_origin_id(OriginId::new(7));
    header.set_sequence_number(99);

    let custom = header.custom_header_mut::<UserHeader>().unwrap();
    unsafe { custom.write(UserHeader { publisher: 0xdead_beef }) };
    assert_eq!(
        custom as usize,
        header_ptr.as_ptr() as usize + ChunkHeader::SIZE
    );

    let payload = header.payload_mut();
    unsafe { payload.cast::<[u8; 32]>().write([5; 32]) };
    assert!(payload as usize + 32 <= header_ptr.as_ptr() as usize + header.chunk_size() as usize);
    assert!(header.used_size_of_chunk() <= header.chunk_size());

    let found = unsafe { ChunkHeader::from_payload(payload) }.unwrap();
    assert_eq!(found, header_ptr);
    let found = unsafe { found.as_ref() };
    assert_eq!(found.origin_id(), OriginId::new(7));
    assert_eq!(found.sequence_number(), 99);
    assert_eq!(
        unsafe { found.custom_header::<UserHeader>().unwrap().read().publisher },
        0xdead_beef
    );

    assert_eq!(manager.pools()[1].used_chunks(), 1);
    manager.free_chunk(header_ptr).unwrap();
    assert_eq!(manager.pools()[1].used_chunks(), 0);

    assert!(unsafe { ChunkHeader::from_payload(std::ptr::null()) }.is_none());
    assert!(handler.errors().is_empty());
}
