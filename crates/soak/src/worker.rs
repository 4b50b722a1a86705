use anyhow::Context;
use mepoo::{ChunkHeader, ChunkRequestError, ChunkSettings, MemoryManager, OriginId};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub acquired: u64,
    pub released: u64,
    pub exhausted: u64,
    pub corrupted: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.acquired += other.acquired;
        self.released += other.released;
        self.exhausted += other.exhausted;
        self.corrupted += other.corrupted;
    }
}

/// Acquires chunks round-robin over the configured payload sizes, stamps
/// them, and releases the oldest once it holds more than `hold_chunks`.
pub struct Worker<'a, 'm> {
    origin: OriginId,
    manager: &'a MemoryManager<'m>,
    payload_sizes: Vec<u32>,
    hold_chunks: usize,
    held: VecDeque<NonNull<ChunkHeader>>,
    sequence: u64,
    stats: WorkerStats,
}

impl<'a, 'm> Worker<'a, 'm> {
    /// `id` must be non-zero, zero is the invalid origin.
    pub fn new(
        id: u64,
        manager: &'a MemoryManager<'m>,
        payload_sizes: Vec<u32>,
        hold_chunks: usize,
    ) -> Self {
        Self {
            origin: OriginId::new(id),
            manager,
            payload_sizes,
            hold_chunks,
            held: VecDeque::with_capacity(hold_chunks + 1),
            sequence: 0,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub fn run(mut self, shutdown: &AtomicBool, deadline: Instant) -> anyhow::Result<WorkerStats> {
        tracing::debug!(origin = self.origin.get(), "Worker starting");

        while !shutdown.load(Ordering::Relaxed) && Instant::now() < deadline {
            self.step()?;
        }
        self.release_all()?;

        tracing::debug!(origin = self.origin.get(), stats = ?self.stats, "Worker stopped");
        Ok(self.stats)
    }

    /// Acquire one chunk, then release the oldest if over the hold limit.
    pub fn step(&mut self) -> anyhow::Result<()> {
        if self.payload_sizes.is_empty() {
            anyhow::bail!("No payload sizes configured");
        }
        let payload_size = self.payload_sizes[self.sequence as usize % self.payload_sizes.len()];
        let settings = ChunkSettings::with_payload(payload_size)?;
        self.sequence += 1;

        match self.manager.get_chunk(&settings) {
            Ok(mut header) => {
                let header_ref = unsafe { header.as_mut() };
                header_ref.set_origin_id(self.origin);
                header_ref.set_sequence_number(self.sequence);
                unsafe {
                    std::ptr::write_bytes(
                        header_ref.payload_mut(),
                        self.sequence as u8,
                        payload_size as usize,
                    )
                };
                self.held.push_back(header);
                self.stats.acquired += 1;
            }
            Err(ChunkRequestError::PoolExhausted { .. }) => {
                self.stats.exhausted += 1;
            }
            Err(error) => return Err(error).context("Chunk request cannot be served"),
        }

        if self.held.len() > self.hold_chunks {
            self.release_oldest()?;
        }
        Ok(())
    }

    fn release_oldest(&mut self) -> anyhow::Result<()> {
        let Some(header) = self.held.pop_front() else {
            return Ok(());
        };

        let header_ref = unsafe { header.as_ref() };
        if !self.is_intact(header_ref) {
            self.stats.corrupted += 1;
            tracing::warn!(
                origin = self.origin.get(),
                found_origin = header_ref.origin_id().get(),
                sequence = header_ref.sequence_number(),
                "Chunk was modified while held"
            );
        }

        self.manager.free_chunk(header)?;
        self.stats.released += 1;
        Ok(())
    }

    fn release_all(&mut self) -> anyhow::Result<()> {
        while !self.held.is_empty() {
            self.release_oldest()?;
        }
        Ok(())
    }

    fn is_intact(&self, header: &ChunkHeader) -> bool {
        if header.check_version().is_err() || header.origin_id() != self.origin {
            return false;
        }
        let pattern = header.sequence_number() as u8;
        let payload = unsafe {
            std::slice::from_raw_parts(header.payload(), header.payload_size() as usize)
        };
        payload.iter().all(|&byte| byte == pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mepoo::{MePooConfig, PanicHandler, SharedSegment};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn with_manager(config: &str, test: impl FnOnce(&MemoryManager<'_>)) {
        let config: MePooConfig = config.parse().unwrap();
        let mut segment = SharedSegment::anonymous(1024 * 1024).unwrap();
        let (mut management, mut chunks) = segment.split_allocators(32 * 1024).unwrap();
        let manager =
            MemoryManager::new(&config, &mut management, &mut chunks, Arc::new(PanicHandler))
                .unwrap();
        test(&manager);
    }

    #[test]
    fn test_step_holds_then_releases() {
        with_manager("64x8,512x4", |manager| {
            let mut worker = Worker::new(1, manager, vec![64, 512], 3);

            for _ in 0..3 {
                worker.step().unwrap();
            }
            assert_eq!(worker.held(), 3);
            assert_eq!(worker.stats().released, 0);

            worker.step().unwrap();
            assert_eq!(worker.held(), 3);
            assert_eq!(worker.stats().acquired, 4);
            assert_eq!(worker.stats().released, 1);
            assert_eq!(worker.stats().corrupted, 0);
        });
    }

    #[test]
    fn test_exhaustion_is_counted() {
        with_manager("64x2", |manager| {
            let mut worker = Worker::new(1, manager, vec![64], 10);

            for _ in 0..5 {
                worker.step().unwrap();
            }
            assert_eq!(worker.stats().acquired, 2);
            assert_eq!(worker.stats().exhausted, 3);
            assert_eq!(manager.pools()[0].used_chunks(), 2);
        });
    }

    #[test]
    fn test_oversized_payload_is_an_error() {
        with_manager("64x2", |manager| {
            let mut worker = Worker::new(1, manager, vec![4096], 1);
            assert!(worker.step().is_err());
        });
    }

    #[test]
    fn test_run_returns_all_chunks() {
        with_manager("64x16,1024x8", |manager| {
            let shutdown = AtomicBool::new(false);
            let deadline = Instant::now() + Duration::from_millis(50);

            let stats = thread::scope(|scope| {
                let handles: Vec<_> = (1..=4)
                    .map(|id| {
                        let shutdown = &shutdown;
                        scope.spawn(move || {
                            Worker::new(id, manager, vec![64, 1000], 4).run(shutdown, deadline)
                        })
                    })
                    .collect();

                let mut total = WorkerStats::default();
                for handle in handles {
                    total.merge(&handle.join().unwrap().unwrap());
                }
                total
            });

            assert!(stats.acquired > 0);
            assert_eq!(stats.acquired, stats.released);
            assert_eq!(stats.corrupted, 0);
            for pool in manager.pools() {
                assert_eq!(pool.used_chunks(), 0);
            }
        });
    }

    #[test]
    fn test_shutdown_stops_run() {
        with_manager("64x4", |manager| {
            let shutdown = AtomicBool::new(true);
            let deadline = Instant::now() + Duration::from_secs(3600);

            let stats = Worker::new(1, manager, vec![64], 2)
                .run(&shutdown, deadline)
                .unwrap();
            assert_eq!(stats, WorkerStats::default());
        });
    }
}
