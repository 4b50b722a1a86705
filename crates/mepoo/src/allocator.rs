use crate::errors::AllocationError;
use crate::utils::align_up;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Upstream source of raw memory for pools.
///
/// # Safety
///
/// Implementors must hand out regions that are valid for reads and writes of
/// `size` bytes for the whole lifetime `'m`, aligned to `alignment`, and never
/// overlapping another region returned by the same allocator. Pools write to
/// these regions without further checks.
pub unsafe trait Allocator<'m> {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<NonNull<u8>, AllocationError>;
}

/// Monotonic arena over a borrowed byte range; never reclaims.
///
/// The borrow ties everything carved out of the arena to the memory it came
/// from, so a pool cannot outlive its backing mapping.
pub struct BumpAllocator<'m> {
    start: NonNull<u8>,
    length: u64,
    used: u64,
    _memory: PhantomData<&'m mut [u8]>,
}

impl<'m> BumpAllocator<'m> {
    pub fn new(memory: &'m mut [u8]) -> Self {
        let length = memory.len() as u64;
        Self {
            start: NonNull::from(memory).cast(),
            length,
            used: 0,
            _memory: PhantomData,
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn available(&self) -> u64 {
        self.length - self.used
    }
}

unsafe impl<'m> Allocator<'m> for BumpAllocator<'m> {
    fn allocate(&mut self, size: u64, alignment: u64) -> Result<NonNull<u8>, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSize);
        }
        if !alignment.is_power_of_two() {
            return Err(AllocationError::InvalidAlignment { alignment });
        }

        let out_of_memory = AllocationError::OutOfMemory {
            requested: size,
            alignment,
            available: self.available(),
        };

        // Align the absolute address, not the offset, since the start of the
        // borrowed range may itself be unaligned.
        let base = self.start.as_ptr() as u64;
        let current = base.checked_add(self.used).ok_or(out_of_memory.clone())?;
        let aligned = align_up(current, alignment).ok_or(out_of_memory.clone())?;
        let offset = aligned - base;
        let end = offset.checked_add(size).ok_or(out_of_memory.clone())?;
        if end > self.length {
            return Err(out_of_memory);
        }

        self.used = end;
        // SAFETY: offset + size <= length, so the result stays inside the borrowed range.
        Ok(unsafe { self.start.add(offset as usize) })
    }
}
