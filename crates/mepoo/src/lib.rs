pub mod allocator;
pub mod chunk_header;
pub mod chunk_settings;
pub mod config;
pub mod constants;
pub mod errors;
pub mod fatal;
pub mod free_list;
pub mod info;
pub mod mem_pool;
pub mod memory_manager;
#[cfg(feature = "segment")]
pub mod segment;
pub mod types;
mod utils;

#[cfg(test)]
mod test_utils;

pub use allocator::{Allocator, BumpAllocator};
pub use chunk_header::ChunkHeader;
pub use chunk_settings::ChunkSettings;
pub use config::{MePooConfig, PoolConfig};
pub use errors::{
    AllocationError, ChunkHeaderError, ChunkRequestError, ChunkSettingsError, ConfigError,
    FatalError,
};
pub use fatal::{AbortHandler, ErrorHandler, PanicHandler};
pub use free_list::FreeIndexList;
pub use info::MemPoolInfo;
pub use mem_pool::MemPool;
pub use memory_manager::MemoryManager;
#[cfg(feature = "segment")]
pub use segment::{SegmentError, SharedSegment};
pub use types::{ChunkOffset, OriginId};
