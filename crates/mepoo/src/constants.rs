//! Layout constants shared by every participant mapping a pool.
//!
//! Producers and consumers in different processes must agree on these
//! values, so they live in one place.

/// Alignment of chunk memory and of every chunk size.
pub const CHUNK_MEMORY_ALIGNMENT: u64 = 8;

/// Current `ChunkHeader` binary layout version.
pub const CHUNK_HEADER_VERSION: u8 = 1;

/// Payload alignment used when the producer does not ask for one.
pub const CHUNK_DEFAULT_PAYLOAD_ALIGNMENT: u32 = 8;

/// Custom header size meaning "no custom header".
pub const CHUNK_NO_CUSTOM_HEADER_SIZE: u32 = 0;

/// Custom header alignment meaning "no custom header".
pub const CHUNK_NO_CUSTOM_HEADER_ALIGNMENT: u32 = 1;
