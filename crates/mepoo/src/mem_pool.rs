//! Fixed-size chunk pool over pre-allocated (shared) memory.
//!
//! The pool keeps nothing but pointers in process-local memory. Its counters
//! and free list live in a control block inside the management allocation:
//!
//! ```text
//! management allocation                 chunk memory allocation
//! ┌──────────────────────────┐          ┌─────────┬─────────┬─────┬─────────┐
//! │ PoolControl (40 bytes)   │ ───────▶ │ chunk 0 │ chunk 1 │ ... │ chunk n-1│
//! ├──────────────────────────┤ relative └─────────┴─────────┴─────┴─────────┘
//! │ FreeIndexList            │ offset
//! └──────────────────────────┘
//! ```
//!
//! When both allocations come from the same shared segment, a second
//! process can open the pool with [`MemPool::attach`].

use crate::allocator::Allocator;
use crate::constants::CHUNK_MEMORY_ALIGNMENT;
use crate::errors::FatalError;
use crate::fatal::{ErrorHandler, report};
use crate::free_list::FreeIndexList;
use crate::info::MemPoolInfo;
use crate::types::ChunkOffset;
use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

const POOL_MAGIC: u64 = u64::from_le_bytes(*b"MEPOOL\0\0");
const POOL_LAYOUT_VERSION: u32 = 1;

#[repr(C, align(8))]
struct PoolControl {
    magic: u64,
    chunk_size: u64,
    /// Chunk memory address minus control block address.
    chunk_memory_offset: i64,
    number_of_chunks: u32,
    layout_version: u32,
    used_chunks: AtomicU32,
    min_free: AtomicU32,
}

const _: () = assert!(size_of::<PoolControl>() == 40);

pub struct MemPool<'m> {
    control: NonNull<PoolControl>,
    raw_memory: NonNull<u8>,
    free_indices: FreeIndexList<'m>,
    chunk_size: u64,
    number_of_chunks: u32,
    handler: Arc<dyn ErrorHandler>,
}

// Shared state is only touched through atomics; the rest is immutable.
unsafe impl Send for MemPool<'_> {}
unsafe impl Sync for MemPool<'_> {}

impl<'m> MemPool<'m> {
    /// Bytes the management allocator must provide for a pool of `number_of_chunks`.
    pub const fn required_management_memory_size(number_of_chunks: u32) -> u64 {
        size_of::<PoolControl>() as u64
            + FreeIndexList::required_index_memory_size(number_of_chunks)
    }

    /// Bytes the chunk memory allocator must provide, `None` on overflow.
    pub const fn required_chunk_memory_size(chunk_size: u64, number_of_chunks: u32) -> Option<u64> {
        chunk_size.checked_mul(number_of_chunks as u64)
    }

    /// Carve a pool out of the two allocators.
    ///
    /// Misconfiguration (unaligned chunk size, zero chunks, size overflow) and
    /// allocation failure are fatal: they go to `handler` and come back as `Err`.
    pub fn new<M, C>(
        chunk_size: u64,
        number_of_chunks: u32,
        management_allocator: &mut M,
        chunk_memory_allocator: &mut C,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<Self, FatalError>
    where
        M: Allocator<'m> + ?Sized,
        C: Allocator<'m> + ?Sized,
    {
        if let Err(error) = validate_layout(chunk_size, number_of_chunks) {
            return Err(report(handler.as_ref(), error));
        }
        let chunk_memory_size = Self::required_chunk_memory_size(chunk_size, number_of_chunks)
            .filter(|&size| size <= isize::MAX as u64)
            .ok_or(FatalError::ChunkMemoryOverflow {
                chunk_size,
                number_of_chunks,
            })
            .map_err(|error| report(handler.as_ref(), error))?;

        let raw_memory = chunk_memory_allocator
            .allocate(chunk_memory_size, CHUNK_MEMORY_ALIGNMENT)
            .map_err(|error| report(handler.as_ref(), error.into()))?;
        let management = management_allocator
            .allocate(
                Self::required_management_memory_size(number_of_chunks),
                CHUNK_MEMORY_ALIGNMENT,
            )
            .map_err(|error| report(handler.as_ref(), error.into()))?;

        let control = management.cast::<PoolControl>();
        let free_indices = unsafe {
            FreeIndexList::init(management.add(size_of::<PoolControl>()), number_of_chunks)
        };
        let chunk_memory_offset =
            (raw_memory.as_ptr() as i64).wrapping_sub(control.as_ptr() as i64);
        unsafe {
            control.write(PoolControl {
                magic: POOL_MAGIC,
                chunk_size,
                chunk_memory_offset,
                number_of_chunks,
                layout_version: POOL_LAYOUT_VERSION,
                used_chunks: AtomicU32::new(0),
                min_free: AtomicU32::new(number_of_chunks),
            })
        };

        tracing::debug!(chunk_size, number_of_chunks, "Mempool created");

        Ok(Self {
            control,
            raw_memory,
            free_indices,
            chunk_size,
            number_of_chunks,
            handler,
        })
    }

    /// Open a pool another mapping created, e.g. from a second process.
    ///
    /// The control block is validated; a corrupt one is reported as fatal.
    ///
    /// # Safety
    ///
    /// `management` must point to the start of the management allocation of
    /// a pool created by [`MemPool::new`], and both that allocation and the
    /// pool's chunk memory must be mapped in this process for `'m`, at the
    /// same distance from each other as in the creating mapping.
    pub unsafe fn attach(
        management: NonNull<u8>,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<Self, FatalError> {
        let control = management.cast::<PoolControl>();
        let block = unsafe { control.as_ref() };
        let chunk_size = block.chunk_size;
        let number_of_chunks = block.number_of_chunks;
        let chunk_memory_offset = block.chunk_memory_offset;
        if block.magic != POOL_MAGIC
            || block.layout_version != POOL_LAYOUT_VERSION
            || validate_layout(chunk_size, number_of_chunks).is_err()
        {
            return Err(report(handler.as_ref(), FatalError::CorruptControlBlock));
        }

        let free_indices =
            unsafe { FreeIndexList::attach(management.add(size_of::<PoolControl>())) }
                .filter(|list| list.capacity() == number_of_chunks);
        let raw_memory = NonNull::new(
            management
                .as_ptr()
                .wrapping_offset(chunk_memory_offset as isize),
        );
        let (Some(free_indices), Some(raw_memory)) = (free_indices, raw_memory) else {
            return Err(report(handler.as_ref(), FatalError::CorruptControlBlock));
        };

        tracing::debug!(chunk_size, number_of_chunks, "Mempool attached");

        Ok(Self {
            control,
            raw_memory,
            free_indices,
            chunk_size,
            number_of_chunks,
            handler,
        })
    }

    #[inline]
    fn control(&self) -> &PoolControl {
        unsafe { self.control.as_ref() }
    }

    /// Hand out a free chunk, or `None` when the pool is exhausted.
    ///
    /// Exhaustion is not an error of the pool; the caller decides whether to
    /// drop, retry or push back.
    pub fn get_chunk(&self) -> Option<NonNull<u8>> {
        let Some(index) = self.free_indices.pop() else {
            tracing::warn!(
                chunk_size = self.chunk_size,
                number_of_chunks = self.number_of_chunks,
                used_chunks = self.used_chunks(),
                "Mempool has no more space left"
            );
            return None;
        };

        let used = self.control().used_chunks.fetch_add(1, Ordering::Relaxed) + 1;
        self.adjust_min_free(used);

        let offset = ChunkOffset::from_index(index, self.chunk_size);
        // SAFETY: index < number_of_chunks, so the offset lies inside chunk memory.
        Some(unsafe { self.raw_memory.add(offset.get() as usize) })
    }

    /// Best-effort low-water mark. `used` may already be stale when the
    /// minimum is taken; the value is diagnostic only.
    fn adjust_min_free(&self, used: u32) {
        let free = self.number_of_chunks.saturating_sub(used);
        self.control().min_free.fetch_min(free, Ordering::Relaxed);
    }

    /// Return a chunk obtained from [`MemPool::get_chunk`].
    ///
    /// A pointer outside the pool, one not on a chunk boundary, or a chunk
    /// that is already free is fatal. The free list is left untouched in
    /// all of these cases.
    pub fn free_chunk(&self, chunk: NonNull<u8>) -> Result<(), FatalError> {
        let address = chunk.as_ptr() as usize;
        if !self.contains(chunk) {
            return Err(report(
                self.handler.as_ref(),
                FatalError::ChunkOutOfBounds { address },
            ));
        }

        let Some(index) =
            Self::pointer_to_index(chunk.as_ptr(), self.chunk_size, self.raw_memory.as_ptr())
        else {
            return Err(report(
                self.handler.as_ref(),
                FatalError::MisalignedChunk {
                    offset: (address - self.raw_memory.as_ptr() as usize) as u64,
                    chunk_size: self.chunk_size,
                },
            ));
        };

        if !self.free_indices.push(index) {
            return Err(report(
                self.handler.as_ref(),
                FatalError::DoubleFree { index },
            ));
        }

        self.control().used_chunks.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether `chunk` lies in `[first chunk, last chunk]` of this pool.
    pub fn contains(&self, chunk: NonNull<u8>) -> bool {
        let address = chunk.as_ptr() as usize;
        let base = self.raw_memory.as_ptr() as usize;
        let offset_to_last_chunk = (self.chunk_size * (self.number_of_chunks as u64 - 1)) as usize;
        address >= base && address - base <= offset_to_last_chunk
    }

    /// Mapping-independent reference to `chunk`, `None` if it is not a chunk
    /// of this pool.
    pub fn offset_of(&self, chunk: NonNull<u8>) -> Option<ChunkOffset> {
        if !self.contains(chunk) {
            return None;
        }
        let index =
            Self::pointer_to_index(chunk.as_ptr(), self.chunk_size, self.raw_memory.as_ptr())?;
        Some(ChunkOffset::from_index(index, self.chunk_size))
    }

    /// Turn an offset received from another participant into a pointer in
    /// this process's mapping.
    pub fn chunk_at(&self, offset: ChunkOffset) -> Option<NonNull<u8>> {
        let index = offset.to_index(self.chunk_size)?;
        if index >= self.number_of_chunks {
            return None;
        }
        // SAFETY: index is in range, see above.
        Some(unsafe { self.raw_memory.add(offset.get() as usize) })
    }

    /// Address of chunk `index`. Pure arithmetic: inputs that do not describe
    /// a constructed pool wrap instead of panicking.
    pub fn index_to_pointer(index: u32, chunk_size: u64, raw_memory_base: *mut u8) -> *mut u8 {
        let offset = ChunkOffset::from_index(index, chunk_size);
        raw_memory_base.wrapping_add(offset.get() as usize)
    }

    /// Exact inverse of [`MemPool::index_to_pointer`]; `None` if `chunk` lies
    /// before the base or not on a chunk boundary.
    pub fn pointer_to_index(
        chunk: *const u8,
        chunk_size: u64,
        raw_memory_base: *const u8,
    ) -> Option<u32> {
        let offset = (chunk as usize).checked_sub(raw_memory_base as usize)?;
        ChunkOffset::new(offset as u64).to_index(chunk_size)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.number_of_chunks
    }

    pub fn used_chunks(&self) -> u32 {
        self.control().used_chunks.load(Ordering::Relaxed)
    }

    pub fn min_free(&self) -> u32 {
        self.control().min_free.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> MemPoolInfo {
        MemPoolInfo::new(
            self.used_chunks(),
            self.min_free(),
            self.number_of_chunks,
            self.chunk_size,
        )
    }

    /// Walks the free list; exact only while no other participant is active.
    pub fn free_index_count(&self) -> u32 {
        self.free_indices.count_free()
    }

    /// Start of the management allocation, for [`MemPool::attach`].
    pub fn management_memory(&self) -> NonNull<u8> {
        self.control.cast()
    }

    pub fn raw_memory(&self) -> NonNull<u8> {
        self.raw_memory
    }
}

fn validate_layout(chunk_size: u64, number_of_chunks: u32) -> Result<(), FatalError> {
    if number_of_chunks == 0 || number_of_chunks > FreeIndexList::MAX_CAPACITY {
        return Err(FatalError::InvalidChunkCount {
            number_of_chunks,
            max: FreeIndexList::MAX_CAPACITY,
        });
    }
    if chunk_size < CHUNK_MEMORY_ALIGNMENT || chunk_size % CHUNK_MEMORY_ALIGNMENT != 0 {
        return Err(FatalError::ChunkSizeNotAligned {
            chunk_size,
            number_of_chunks,
            alignment: CHUNK_MEMORY_ALIGNMENT,
        });
    }
    if chunk_size.checked_mul(number_of_chunks as u64).is_none() {
        return Err(FatalError::ChunkMemoryOverflow {
            chunk_size,
            number_of_chunks,
        });
    }
    Ok(())
}

impl fmt::Debug for MemPool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("raw_memory", &self.raw_memory)
            .field("info", &self.info())
            .finish()
    }
}
