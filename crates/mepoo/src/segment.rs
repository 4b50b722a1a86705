//! Shared memory segments to carve pools from.
//!
//! A segment is just a mapping; creating, sizing and removing the backing
//! file (e.g. under `/dev/shm`) stays with the caller.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use thiserror::Error;

use crate::allocator::BumpAllocator;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Segment size must not be zero")]
    ZeroSize,

    #[error("Segment is {actual} bytes, expected at least {expected}")]
    TooSmall { expected: u64, actual: u64 },
}

pub struct SharedSegment {
    mmap: MmapMut,
}

impl SharedSegment {
    /// Create or open the file at `path`, grow it to `size` if smaller, and map it.
    ///
    /// Existing contents are kept; pools are laid out by whoever builds them.
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Self, SegmentError> {
        if size == 0 {
            return Err(SegmentError::ZeroSize);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Only resize if the file is smaller than needed
        if file.metadata()?.len() < size {
            file.set_len(size)?;
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self { mmap })
    }

    /// Map an existing segment, e.g. from a second process.
    pub fn open(path: impl AsRef<Path>, min_size: u64) -> Result<Self, SegmentError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let actual = file.metadata()?.len();
        if actual < min_size || actual == 0 {
            return Err(SegmentError::TooSmall {
                expected: min_size.max(1),
                actual,
            });
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self { mmap })
    }

    /// Process-private anonymous mapping, for single-process use and benches.
    pub fn anonymous(size: u64) -> Result<Self, SegmentError> {
        if size == 0 {
            return Err(SegmentError::ZeroSize);
        }
        let mmap = MmapOptions::new().len(size as usize).map_anon()?;
        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Start of this process's mapping. Page aligned.
    pub fn base(&mut self) -> NonNull<u8> {
        NonNull::from(&mut self.mmap[..]).cast()
    }

    /// Pointer `offset` bytes into the mapping, `None` past its end.
    pub fn at_offset(&mut self, offset: u64) -> Option<NonNull<u8>> {
        if offset >= self.len() as u64 {
            return None;
        }
        // SAFETY: offset < len
        Some(unsafe { self.base().add(offset as usize) })
    }

    /// Offset of `ptr` from the start of this mapping, `None` if outside.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<u64> {
        let base = self.mmap.as_ptr() as usize;
        let offset = (ptr.as_ptr() as usize).checked_sub(base)?;
        (offset < self.len()).then_some(offset as u64)
    }

    /// Split the segment into a management arena of `management_size` bytes
    /// followed by a chunk arena holding the rest.
    pub fn split_allocators(
        &mut self,
        management_size: u64,
    ) -> Result<(BumpAllocator<'_>, BumpAllocator<'_>), SegmentError> {
        if management_size > self.len() as u64 {
            return Err(SegmentError::TooSmall {
                expected: management_size,
                actual: self.len() as u64,
            });
        }
        let (management, chunks) = self.mmap.split_at_mut(management_size as usize);
        Ok((BumpAllocator::new(management), BumpAllocator::new(chunks)))
    }

    pub fn flush(&self) -> Result<(), SegmentError> {
        self.mmap.flush()?;
        Ok(())
    }
}
