use crate::allocator::Allocator;
use crate::chunk_header::ChunkHeader;
use crate::chunk_settings::ChunkSettings;
use crate::config::MePooConfig;
use crate::errors::{ChunkRequestError, FatalError};
use crate::fatal::{ErrorHandler, report};
use crate::info::MemPoolInfo;
use crate::mem_pool::MemPool;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Several mempools of different chunk sizes, sorted ascending.
///
/// Requests go to the smallest pool whose chunks fit, never to a larger one
/// when that pool is exhausted.
pub struct MemoryManager<'m> {
    pools: Vec<MemPool<'m>>,
    handler: Arc<dyn ErrorHandler>,
}

impl<'m> MemoryManager<'m> {
    pub fn new<M, C>(
        config: &MePooConfig,
        management_allocator: &mut M,
        chunk_memory_allocator: &mut C,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<Self, FatalError>
    where
        M: Allocator<'m> + ?Sized,
        C: Allocator<'m> + ?Sized,
    {
        let mut config = config.clone();
        config.optimize();

        let mut pools = Vec::with_capacity(config.pools.len());
        for pool in &config.pools {
            let chunk_size = pool.chunk_size().ok_or_else(|| {
                report(
                    handler.as_ref(),
                    FatalError::ChunkMemoryOverflow {
                        chunk_size: pool.payload_size,
                        number_of_chunks: pool.number_of_chunks,
                    },
                )
            })?;
            pools.push(MemPool::new(
                chunk_size,
                pool.number_of_chunks,
                management_allocator,
                chunk_memory_allocator,
                handler.clone(),
            )?);
        }

        tracing::debug!(pools = pools.len(), "Memory manager created");
        Ok(Self { pools, handler })
    }

    /// Acquire a chunk for `settings` and place a fresh header in it.
    pub fn get_chunk(
        &self,
        settings: &ChunkSettings,
    ) -> Result<NonNull<ChunkHeader>, ChunkRequestError> {
        let required = settings.required_chunk_size();
        let pool = self
            .pools
            .iter()
            .find(|pool| pool.chunk_size() >= required)
            .ok_or(ChunkRequestError::NoPoolForRequestedSize { required })?;

        let chunk = pool
            .get_chunk()
            .ok_or(ChunkRequestError::PoolExhausted {
                chunk_size: pool.chunk_size(),
            })?;

        // SAFETY: the chunk was just handed out, so nobody else references it,
        // and it spans chunk_size >= required bytes.
        let header = unsafe { ChunkHeader::init(chunk, pool.chunk_size(), settings) };
        Ok(NonNull::from(header))
    }

    /// Return a chunk to the pool whose memory contains it.
    pub fn free_chunk(&self, header: NonNull<ChunkHeader>) -> Result<(), FatalError> {
        let chunk = header.cast::<u8>();
        match self.pools.iter().find(|pool| pool.contains(chunk)) {
            Some(pool) => pool.free_chunk(chunk),
            None => Err(report(
                self.handler.as_ref(),
                FatalError::UnknownChunk {
                    address: chunk.as_ptr() as usize,
                },
            )),
        }
    }

    pub fn pools(&self) -> &[MemPool<'m>] {
        &self.pools
    }

    pub fn number_of_pools(&self) -> usize {
        self.pools.len()
    }

    pub fn pool_infos(&self) -> Vec<MemPoolInfo> {
        self.pools.iter().map(MemPool::info).collect()
    }
}

impl fmt::Debug for MemoryManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("pools", &self.pools)
            .finish()
    }
}
