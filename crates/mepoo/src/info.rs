use serde::{Deserialize, Serialize};

/// Point-in-time statistics of one mempool.
///
/// The counters are read with relaxed ordering, so under concurrent traffic
/// the snapshot is consistent per field, not across fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemPoolInfo {
    pub used_chunks: u32,
    pub min_free_chunks: u32,
    pub number_of_chunks: u32,
    pub chunk_size: u64,
}

impl MemPoolInfo {
    pub fn new(used_chunks: u32, min_free_chunks: u32, number_of_chunks: u32, chunk_size: u64) -> Self {
        Self {
            used_chunks,
            min_free_chunks,
            number_of_chunks,
            chunk_size,
        }
    }

    pub fn free_chunks(&self) -> u32 {
        self.number_of_chunks.saturating_sub(self.used_chunks)
    }

    /// Highest share of chunks ever in use at the same time, in `0.0..=1.0`.
    pub fn peak_utilization(&self) -> f64 {
        if self.number_of_chunks == 0 {
            return 0.0;
        }
        let peak = self.number_of_chunks.saturating_sub(self.min_free_chunks);
        peak as f64 / self.number_of_chunks as f64
    }
}
