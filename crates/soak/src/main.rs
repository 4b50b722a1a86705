use anyhow::Context;
use mepoo::fatal::default_handler;
use mepoo::{MemoryManager, SharedSegment};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use soak::config::SoakConfig;
use soak::logging::setup_logging;
use soak::worker::{Worker, WorkerStats};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    let config = SoakConfig::from_env()?;
    setup_logging(&config.environment);
    let shutdown = Arc::new(AtomicBool::new(false));

    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");
    tracing::info!(
        environment = config.environment.as_str(),
        threads = config.threads,
        duration_secs = config.duration.as_secs(),
        "Soak test starting with pools: {:?}",
        config.pools.pools
    );

    let management_size = config
        .pools
        .required_management_memory_size()
        .context("Management memory size overflows")?;
    let chunk_memory_size = config
        .pools
        .required_chunk_memory_size()
        .context("Chunk memory size overflows")?;
    let segment_size = management_size
        .checked_add(chunk_memory_size)
        .context("Segment size overflows")?;

    let mut segment = match &config.segment_path {
        Some(path) => SharedSegment::create(path, segment_size)
            .with_context(|| format!("Failed to map segment at {}", path.display()))?,
        None => SharedSegment::anonymous(segment_size).context("Failed to map anonymous segment")?,
    };
    let (mut management, mut chunks) = segment.split_allocators(management_size)?;
    let manager = MemoryManager::new(
        &config.pools,
        &mut management,
        &mut chunks,
        default_handler(),
    )?;

    let payload_sizes: Vec<u32> = config
        .pools
        .pools
        .iter()
        .filter_map(|pool| u32::try_from(pool.payload_size).ok())
        .collect();
    let deadline = Instant::now() + config.duration;

    let stats = thread::scope(|scope| -> anyhow::Result<WorkerStats> {
        let handles: Vec<_> = (1..=config.threads as u64)
            .map(|id| {
                let manager = &manager;
                let shutdown = shutdown.as_ref();
                let payload_sizes = payload_sizes.clone();
                let hold_chunks = config.hold_chunks;
                thread::Builder::new()
                    .name(format!("soak-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        Worker::new(id, manager, payload_sizes, hold_chunks)
                            .run(shutdown, deadline)
                    })
            })
            .collect::<Result<_, _>>()
            .context("Failed to spawn worker threads")?;

        while !handles.iter().all(|handle| handle.is_finished()) {
            thread::sleep(REPORT_INTERVAL);
            for (pool, info) in manager.pool_infos().iter().enumerate() {
                tracing::info!(
                    pool,
                    chunk_size = info.chunk_size,
                    used = info.used_chunks,
                    min_free = info.min_free_chunks,
                    "Pool usage"
                );
            }
        }

        let mut total = WorkerStats::default();
        for handle in handles {
            let worker_stats = handle
                .join()
                .map_err(|_| anyhow::anyhow!("Worker thread panicked"))??;
            total.merge(&worker_stats);
        }
        Ok(total)
    })?;

    if shutdown.load(Ordering::Relaxed) {
        tracing::info!("Shutdown requested, workers stopped early");
    }

    for (pool, info) in manager.pool_infos().iter().enumerate() {
        let json = serde_json::to_string(info)?;
        tracing::info!(pool, info = %json, "Pool statistics");
    }
    tracing::info!(
        acquired = stats.acquired,
        released = stats.released,
        exhausted = stats.exhausted,
        corrupted = stats.corrupted,
        "Soak test finished"
    );

    if stats.corrupted > 0 {
        anyhow::bail!("{} chunks were modified while held", stats.corrupted);
    }
    Ok(())
}
