//! Lock-free free list of chunk indices.
//!
//! SAFETY & MEMORY ORDERING:
//!
//! The list lives entirely in shared memory:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  FreeListHeader (16 bytes)                   │
//! │    head: AtomicU64  = tag << 32 | index      │
//! │    capacity: u32                             │
//! ├──────────────────────────────────────────────┤
//! │  next: [AtomicU32; capacity]                 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `next[i]` is the successor of a free index `i`, or `INVALID` while `i`
//! is handed out. The head carries a tag that is bumped on every successful
//! exchange so a stale head never wins a compare-exchange (ABA).
//!
//! Push publishes with `Release`, pop observes with `Acquire`: everything the
//! previous owner wrote to a chunk happens-before the next owner pops its index.
//! No operation holds anything across a preemption point, so a process killed
//! mid-operation cannot stall the others.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[repr(C, align(8))]
struct FreeListHeader {
    head: AtomicU64,
    capacity: u32,
    _reserved: u32,
}

const _: () = assert!(size_of::<FreeListHeader>() == 16);

#[inline]
fn pack(index: u32, tag: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline]
fn unpack(head: u64) -> (u32, u32) {
    (head as u32, (head >> 32) as u32)
}

pub struct FreeIndexList<'m> {
    header: NonNull<FreeListHeader>,
    next: NonNull<AtomicU32>,
    capacity: u32,
    _memory: PhantomData<&'m ()>,
}

// Only atomics are reached through the pointers.
unsafe impl Send for FreeIndexList<'_> {}
unsafe impl Sync for FreeIndexList<'_> {}

impl<'m> FreeIndexList<'m> {
    /// Two values above the largest index are reserved as sentinels.
    pub const MAX_CAPACITY: u32 = u32::MAX - 2;

    pub const ALIGNMENT: u64 = 8;

    pub const fn required_index_memory_size(capacity: u32) -> u64 {
        size_of::<FreeListHeader>() as u64 + capacity as u64 * size_of::<AtomicU32>() as u64
    }

    /// Lay out a list holding every index `0..capacity`, in ascending pop order.
    ///
    /// # Safety
    ///
    /// `memory` must be valid for `required_index_memory_size(capacity)` bytes
    /// for `'m`, aligned to [`Self::ALIGNMENT`], and not in use by anyone else
    /// during initialization. `capacity` must be in `1..=MAX_CAPACITY`.
    pub unsafe fn init(memory: NonNull<u8>, capacity: u32) -> Self {
        debug_assert!(capacity >= 1 && capacity <= Self::MAX_CAPACITY);

        let header = memory.cast::<FreeListHeader>();
        let next = unsafe { memory.add(size_of::<FreeListHeader>()) }.cast::<AtomicU32>();

        for index in 0..capacity {
            // The last free index points at `capacity`, the end marker.
            unsafe { next.add(index as usize).write(AtomicU32::new(index + 1)) };
        }
        unsafe {
            header.write(FreeListHeader {
                head: AtomicU64::new(pack(0, 0)),
                capacity,
                _reserved: 0,
            })
        };

        Self {
            header,
            next,
            capacity,
            _memory: PhantomData,
        }
    }

    /// Open a list another mapping initialized.
    ///
    /// Returns `None` if the stored capacity is out of range.
    ///
    /// # Safety
    ///
    /// `memory` must point to a list created by [`FreeIndexList::init`] and
    /// stay mapped for `'m`.
    pub unsafe fn attach(memory: NonNull<u8>) -> Option<Self> {
        let header = memory.cast::<FreeListHeader>();
        let capacity = unsafe { header.as_ref() }.capacity;
        if capacity == 0 || capacity > Self::MAX_CAPACITY {
            return None;
        }
        let next = unsafe { memory.add(size_of::<FreeListHeader>()) }.cast::<AtomicU32>();

        Some(Self {
            header,
            next,
            capacity,
            _memory: PhantomData,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    fn end(&self) -> u32 {
        self.capacity
    }

    #[inline]
    fn invalid(&self) -> u32 {
        self.capacity + 1
    }

    #[inline]
    fn head(&self) -> &AtomicU64 {
        unsafe { &self.header.as_ref().head }
    }

    #[inline]
    fn next(&self, index: u32) -> &AtomicU32 {
        debug_assert!(index < self.capacity);
        unsafe { self.next.add(index as usize).as_ref() }
    }

    /// Return `index` to the free set.
    ///
    /// Returns `false` without touching the list if `index` is out of range or
    /// already free. Concurrent pushes of the same index are detected too:
    /// exactly one of them claims the slot.
    pub fn push(&self, index: u32) -> bool {
        if index >= self.capacity {
            return false;
        }

        let slot = self.next(index);
        if slot
            .compare_exchange(self.invalid(), self.end(), Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let head = self.head();
        let mut old = head.load(Ordering::Relaxed);
        loop {
            let (old_index, tag) = unpack(old);
            slot.store(old_index, Ordering::Relaxed);
            match head.compare_exchange_weak(
                old,
                pack(index, tag.wrapping_add(1)),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => {
                    old = current;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Take one free index, or `None` if the list is empty. Never blocks.
    pub fn pop(&self) -> Option<u32> {
        let head = self.head();
        let mut old = head.load(Ordering::Acquire);
        loop {
            let (index, tag) = unpack(old);
            // `end()` means empty. A larger value is a head another participant
            // corrupted; it is treated as empty too.
            if index >= self.capacity {
                return None;
            }

            // May be stale if another participant popped `index` meanwhile;
            // the tag makes the exchange below fail in that case.
            let successor = self.next(index).load(Ordering::Relaxed);
            match head.compare_exchange_weak(
                old,
                pack(successor, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.next(index).store(self.invalid(), Ordering::Relaxed);
                    return Some(index);
                }
                Err(current) => {
                    old = current;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Whether `index` is currently free.
    pub fn contains(&self, index: u32) -> bool {
        index < self.capacity && self.next(index).load(Ordering::Relaxed) != self.invalid()
    }

    /// Number of free indices.
    ///
    /// Walks the list, so the result is only exact when no push or pop runs
    /// concurrently. The walk is bounded by the capacity either way.
    pub fn count_free(&self) -> u32 {
        let (mut index, _) = unpack(self.head().load(Ordering::Acquire));
        let mut count = 0;
        while index < self.capacity && count < self.capacity {
            count += 1;
            index = self.next(index).load(Ordering::Relaxed);
        }
        count
    }
}
