use crate::chunk_header::ChunkHeader;
use crate::constants::CHUNK_MEMORY_ALIGNMENT;
use crate::errors::ConfigError;
use crate::mem_pool::MemPool;
use crate::utils::align_up;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Environment variable holding pools as `<payload_size>x<number_of_chunks>,...`
pub const MEPOO_POOLS_ENV: &str = "MEPOO_POOLS";

/// One size class. Sizes are payload sizes; the chunk header is added on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub payload_size: u64,
    pub number_of_chunks: u32,
}

impl PoolConfig {
    pub fn new(payload_size: u64, number_of_chunks: u32) -> Self {
        Self {
            payload_size,
            number_of_chunks,
        }
    }

    /// Payload plus chunk header, rounded up to the chunk memory alignment.
    pub fn chunk_size(&self) -> Option<u64> {
        let size = self.payload_size.checked_add(ChunkHeader::SIZE as u64)?;
        align_up(size, CHUNK_MEMORY_ALIGNMENT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MePooConfig {
    pub pools: Vec<PoolConfig>,
}

impl MePooConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool(&mut self, payload_size: u64, number_of_chunks: u32) -> &mut Self {
        self.pools.push(PoolConfig::new(payload_size, number_of_chunks));
        self
    }

    /// Sort ascending and merge entries that end up with the same chunk size,
    /// so chunk sizes are strictly increasing. A merged entry keeps the
    /// largest payload size of its group.
    pub fn optimize(&mut self) {
        self.pools.sort_by_key(|pool| pool.payload_size);
        let mut merged: Vec<PoolConfig> = Vec::with_capacity(self.pools.len());
        for pool in self.pools.drain(..) {
            match merged.last_mut() {
                Some(last)
                    if last.chunk_size().is_some() && last.chunk_size() == pool.chunk_size() =>
                {
                    last.payload_size = pool.payload_size;
                    last.number_of_chunks =
                        last.number_of_chunks.saturating_add(pool.number_of_chunks);
                }
                _ => merged.push(pool),
            }
        }
        self.pools = merged;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.is_empty() {
            return Err(ConfigError::Empty);
        }
        if let Some(pool) = self.pools.iter().find(|pool| pool.number_of_chunks == 0) {
            return Err(ConfigError::ZeroChunks {
                payload_size: pool.payload_size,
            });
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Pools from [`MEPOO_POOLS_ENV`], `None` if the variable is unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        match env::var(MEPOO_POOLS_ENV) {
            Ok(value) => value.parse().map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Total chunk memory for all pools, `None` on overflow.
    pub fn required_chunk_memory_size(&self) -> Option<u64> {
        self.pools.iter().try_fold(0u64, |total, pool| {
            let size = MemPool::required_chunk_memory_size(pool.chunk_size()?, pool.number_of_chunks)?;
            total.checked_add(size)
        })
    }

    /// Total management memory for all pools, alignment padding included.
    pub fn required_management_memory_size(&self) -> Option<u64> {
        self.pools.iter().try_fold(0u64, |total, pool| {
            let size = align_up(
                MemPool::required_management_memory_size(pool.number_of_chunks),
                CHUNK_MEMORY_ALIGNMENT,
            )?;
            total.checked_add(size)
        })
    }
}

impl FromStr for MePooConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Self::new();
        for entry in s.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let invalid = || ConfigError::InvalidPoolEntry(entry.to_string());
            let (payload_size, number_of_chunks) = entry.split_once('x').ok_or_else(invalid)?;
            let payload_size = payload_size.trim().parse().map_err(|_| invalid())?;
            let number_of_chunks = number_of_chunks.trim().parse().map_err(|_| invalid())?;
            config.add_pool(payload_size, number_of_chunks);
        }
        config.validate()?;
        Ok(config)
    }
}
