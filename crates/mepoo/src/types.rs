use serde::{Deserialize, Serialize};

/// Byte offset of a chunk from the start of its pool's chunk memory.
///
/// Offsets are the only chunk references that may cross a process boundary.
/// Each process turns them back into pointers against its own mapping with
/// [`crate::MemPool::chunk_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ChunkOffset(u64);

impl ChunkOffset {
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Offset of chunk `index`.
    ///
    /// Meaningful only for sizes that passed pool construction, where
    /// `index * chunk_size` cannot overflow; other inputs wrap.
    pub const fn from_index(index: u32, chunk_size: u64) -> Self {
        Self((index as u64).wrapping_mul(chunk_size))
    }

    /// Exact inverse of [`ChunkOffset::from_index`]; `None` if the offset
    /// is not a multiple of `chunk_size` or the index does not fit a `u32`.
    pub fn to_index(self, chunk_size: u64) -> Option<u32> {
        if chunk_size == 0 || self.0 % chunk_size != 0 {
            return None;
        }
        u32::try_from(self.0 / chunk_size).ok()
    }
}

/// Identifier of the logical producer of a chunk. Informational only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct OriginId(u64);

impl OriginId {
    pub const INVALID: Self = Self(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}
