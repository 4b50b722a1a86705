use thiserror::Error;

/// Conditions that mean a participant is misconfigured or memory is corrupt.
///
/// Every variant is routed through the pool's [`crate::ErrorHandler`] before
/// it is returned, so the default handler never lets the caller continue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error(
        "Chunk size must be a multiple of {alignment}! Requested size is {chunk_size} for {number_of_chunks} chunks"
    )]
    ChunkSizeNotAligned {
        chunk_size: u64,
        number_of_chunks: u32,
        alignment: u64,
    },

    #[error("Invalid number of chunks: {number_of_chunks} (allowed 1..={max})")]
    InvalidChunkCount { number_of_chunks: u32, max: u32 },

    #[error(
        "Chunk size * number of chunks must not exceed u64::MAX ({chunk_size} * {number_of_chunks})"
    )]
    ChunkMemoryOverflow {
        chunk_size: u64,
        number_of_chunks: u32,
    },

    #[error("Upstream allocation failed: {0}")]
    AllocationFailed(#[from] AllocationError),

    #[error("Chunk at {address:#x} is outside of the mempool")]
    ChunkOutOfBounds { address: usize },

    #[error("Chunk offset {offset} is not a multiple of the chunk size {chunk_size}")]
    MisalignedChunk { offset: u64, chunk_size: u64 },

    #[error("Possible double free of chunk index {index}")]
    DoubleFree { index: u32 },

    #[error(
        "Payload of {payload_size} bytes at offset {payload_offset} exceeds chunk size {chunk_size}"
    )]
    PayloadExceedsChunk {
        payload_offset: u64,
        payload_size: u32,
        chunk_size: u64,
    },

    #[error("Mempool control block is corrupt or was never initialized")]
    CorruptControlBlock,

    #[error("Chunk at {address:#x} does not belong to any mempool")]
    UnknownChunk { address: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Requested {requested} bytes (alignment {alignment}) but only {available} are left")]
    OutOfMemory {
        requested: u64,
        alignment: u64,
        available: u64,
    },

    #[error("Alignment {alignment} is not a power of two")]
    InvalidAlignment { alignment: u64 },

    #[error("Zero-sized allocations are not supported")]
    ZeroSize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkSettingsError {
    #[error("Alignment {alignment} is not a power of two")]
    AlignmentNotPowerOfTwo { alignment: u32 },

    #[error("Custom header alignment {alignment} exceeds the chunk header alignment {max}")]
    CustomHeaderAlignmentExceedsLimit { alignment: u32, max: u32 },

    #[error("Required chunk size exceeds u64::MAX")]
    RequiredChunkSizeExceedsLimit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkHeaderError {
    #[error("Chunk header version {found} is incompatible with expected version {expected}")]
    IncompatibleVersion { found: u8, expected: u8 },
}

/// Recoverable outcomes of asking a [`crate::MemoryManager`] for a chunk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkRequestError {
    #[error("No mempool provides chunks of at least {required} bytes")]
    NoPoolForRequestedSize { required: u64 },

    #[error("Mempool with chunk size {chunk_size} is exhausted")]
    PoolExhausted { chunk_size: u64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid pool entry '{0}', expected '<payload_size>x<number_of_chunks>'")]
    InvalidPoolEntry(String),

    #[error("Mempool config has no pools")]
    Empty,

    #[error("Pool with payload size {payload_size} has no chunks")]
    ZeroChunks { payload_size: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
