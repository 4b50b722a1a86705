//! Self-describing header at the start of every chunk.
//!
//! Binary layout (stable across processes, guarded by `chunk_header_version`):
//!
//! ```text
//!  0  chunk_size            u64
//!  8  chunk_header_version  u8
//!  9  reserved1..3          u8 x 3   (always 0)
//! 12  custom_header_size    u32      (0 = none)
//! 16  origin_id             u64
//! 24  sequence_number       u64
//! 32  payload_size          u32
//! 36  payload_alignment     u32
//! 40  payload_offset        u64
//! 48  [custom header][padding][back-offset u64] payload ...
//! ```
//!
//! The eight bytes directly in front of the payload always hold the distance
//! from the header to the payload. For an adjacent payload that is
//! `payload_offset` itself, which is why it is the last field.

use crate::chunk_settings::ChunkSettings;
use crate::constants::{CHUNK_HEADER_VERSION, CHUNK_MEMORY_ALIGNMENT};
use crate::errors::{ChunkHeaderError, FatalError};
use crate::fatal::{ErrorHandler, fail_fast, report};
use crate::types::OriginId;
use crate::utils::align_up;
use std::mem::{align_of, offset_of, size_of};
use std::ptr::NonNull;

pub type PayloadOffset = u64;

#[repr(C, align(8))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub(crate) chunk_size: u64,
    pub(crate) chunk_header_version: u8,
    pub(crate) reserved1: u8,
    pub(crate) reserved2: u8,
    pub(crate) reserved3: u8,
    pub(crate) custom_header_size: u32,
    pub(crate) origin_id: OriginId,
    pub(crate) sequence_number: u64,
    pub(crate) payload_size: u32,
    pub(crate) payload_alignment: u32,
    pub(crate) payload_offset: PayloadOffset,
}

const _: () = {
    assert!(size_of::<ChunkHeader>() == 48);
    assert!(align_of::<ChunkHeader>() as u64 == CHUNK_MEMORY_ALIGNMENT);
    assert!(offset_of!(ChunkHeader, custom_header_size) == 12);
    assert!(offset_of!(ChunkHeader, origin_id) == 16);
    assert!(offset_of!(ChunkHeader, payload_size) == 32);
    assert!(offset_of!(ChunkHeader, payload_offset) == ChunkHeader::SIZE - size_of::<PayloadOffset>());
};

impl ChunkHeader {
    pub const SIZE: usize = size_of::<Self>();

    const BACK_OFFSET_SIZE: u64 = size_of::<PayloadOffset>() as u64;

    fn with_offset(chunk_size: u64, settings: &ChunkSettings, payload_offset: u64) -> Self {
        Self {
            chunk_size,
            chunk_header_version: CHUNK_HEADER_VERSION,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            custom_header_size: settings.custom_header_size(),
            origin_id: OriginId::INVALID,
            sequence_number: 0,
            payload_size: settings.payload_size(),
            payload_alignment: settings.payload_alignment(),
            payload_offset,
        }
    }

    /// Header value for a layout whose payload directly follows the header.
    ///
    /// Returns `None` for layouts where the payload position depends on the
    /// chunk's address; those must be placed with [`ChunkHeader::init`].
    pub fn new(chunk_size: u64, settings: &ChunkSettings) -> Option<Self> {
        settings
            .is_payload_adjacent()
            .then(|| Self::with_offset(chunk_size, settings, Self::SIZE as u64))
    }

    /// Place a header at the start of `chunk` and write the back-offset.
    ///
    /// Aborts the process if the payload would run past `chunk_size`.
    ///
    /// # Safety
    ///
    /// `chunk` must be aligned to [`CHUNK_MEMORY_ALIGNMENT`] and valid for
    /// writes of `chunk_size` bytes for `'a`, with no other live references
    /// into that range.
    pub unsafe fn init<'a>(
        chunk: NonNull<u8>,
        chunk_size: u64,
        settings: &ChunkSettings,
    ) -> &'a mut ChunkHeader {
        match Self::checked_payload_offset(chunk, chunk_size, settings) {
            Ok(payload_offset) => unsafe {
                Self::write_at(chunk, chunk_size, settings, payload_offset)
            },
            Err(error) => fail_fast(error),
        }
    }

    /// Like [`ChunkHeader::init`], but a payload that does not fit goes to
    /// `handler` and comes back as `Err`, leaving the chunk untouched.
    ///
    /// # Safety
    ///
    /// Same as [`ChunkHeader::init`].
    pub unsafe fn init_with<'a>(
        chunk: NonNull<u8>,
        chunk_size: u64,
        settings: &ChunkSettings,
        handler: &dyn ErrorHandler,
    ) -> Result<&'a mut ChunkHeader, FatalError> {
        let payload_offset = Self::checked_payload_offset(chunk, chunk_size, settings)
            .map_err(|error| report(handler, error))?;
        Ok(unsafe { Self::write_at(chunk, chunk_size, settings, payload_offset) })
    }

    fn checked_payload_offset(
        chunk: NonNull<u8>,
        chunk_size: u64,
        settings: &ChunkSettings,
    ) -> Result<u64, FatalError> {
        debug_assert_eq!(chunk.as_ptr() as u64 % CHUNK_MEMORY_ALIGNMENT, 0);

        let payload_offset = Self::payload_offset_at(chunk.as_ptr() as u64, settings);
        let fits = payload_offset
            .and_then(|offset| offset.checked_add(settings.payload_size() as u64))
            .is_some_and(|end| end <= chunk_size);
        payload_offset
            .filter(|_| fits)
            .ok_or(FatalError::PayloadExceedsChunk {
                payload_offset: payload_offset.unwrap_or(u64::MAX),
                payload_size: settings.payload_size(),
                chunk_size,
            })
    }

    /// # Safety
    ///
    /// As [`ChunkHeader::init`], and `payload_offset` must come from
    /// `checked_payload_offset` for the same arguments.
    unsafe fn write_at<'a>(
        chunk: NonNull<u8>,
        chunk_size: u64,
        settings: &ChunkSettings,
        payload_offset: u64,
    ) -> &'a mut ChunkHeader {
        let header = chunk.cast::<ChunkHeader>();
        unsafe {
            header.write(Self::with_offset(chunk_size, settings, payload_offset));
            // For an adjacent payload this rewrites `payload_offset` with the same value.
            chunk
                .add((payload_offset - Self::BACK_OFFSET_SIZE) as usize)
                .cast::<PayloadOffset>()
                .write(payload_offset);
            &mut *header.as_ptr()
        }
    }

    fn payload_offset_at(address: u64, settings: &ChunkSettings) -> Option<u64> {
        let header_end = address.checked_add(Self::SIZE as u64)?;
        let payload_alignment = settings.payload_alignment() as u64;

        let payload_address = if !settings.has_custom_header() {
            if settings.is_payload_adjacent() {
                return Some(Self::SIZE as u64);
            }
            align_up(header_end, payload_alignment)?
        } else {
            let custom_end = header_end.checked_add(settings.custom_header_size() as u64)?;
            let back_offset = align_up(custom_end, align_of::<PayloadOffset>() as u64)?;
            align_up(back_offset.checked_add(Self::BACK_OFFSET_SIZE)?, payload_alignment)?
        };
        Some(payload_address - address)
    }

    /// Header owning `payload`, found through the back-offset in front of it.
    ///
    /// A null payload yields `None`.
    ///
    /// # Safety
    ///
    /// A non-null `payload` must have been obtained from [`ChunkHeader::payload`]
    /// of a header placed with [`ChunkHeader::init`] (or built with
    /// [`ChunkHeader::new`] in front of its payload), and still be mapped.
    pub unsafe fn from_payload(payload: *const u8) -> Option<NonNull<ChunkHeader>> {
        if payload.is_null() {
            return None;
        }
        unsafe {
            let back_offset = payload
                .sub(Self::BACK_OFFSET_SIZE as usize)
                .cast::<PayloadOffset>()
                .read();
            NonNull::new(payload.sub(back_offset as usize) as *mut ChunkHeader)
        }
    }

    /// Readers must call this before trusting any other field.
    pub fn check_version(&self) -> Result<(), ChunkHeaderError> {
        if self.chunk_header_version != CHUNK_HEADER_VERSION {
            return Err(ChunkHeaderError::IncompatibleVersion {
                found: self.chunk_header_version,
                expected: CHUNK_HEADER_VERSION,
            });
        }
        Ok(())
    }

    pub fn payload(&self) -> *const u8 {
        (self as *const Self)
            .cast::<u8>()
            .wrapping_add(self.payload_offset as usize)
    }

    pub fn payload_mut(&mut self) -> *mut u8 {
        (self as *mut Self)
            .cast::<u8>()
            .wrapping_add(self.payload_offset as usize)
    }

    /// Address right behind the header, if a custom header that can hold a
    /// `T` was configured.
    pub fn custom_header<T>(&self) -> Option<*const T> {
        self.custom_header_fits::<T>().then(|| {
            (self as *const Self)
                .cast::<u8>()
                .wrapping_add(Self::SIZE)
                .cast::<T>()
        })
    }

    pub fn custom_header_mut<T>(&mut self) -> Option<*mut T> {
        self.custom_header_fits::<T>().then(|| {
            (self as *mut Self)
                .cast::<u8>()
                .wrapping_add(Self::SIZE)
                .cast::<T>()
        })
    }

    fn custom_header_fits<T>(&self) -> bool {
        self.custom_header_size != 0
            && size_of::<T>() <= self.custom_header_size as usize
            && align_of::<T>() <= align_of::<Self>()
    }

    /// Bytes of the chunk in use up to the end of the payload.
    ///
    /// Aborts the process if that end lies past `chunk_size` or is not
    /// representable.
    pub fn used_size_of_chunk(&self) -> u64 {
        match self.try_used_size_of_chunk() {
            Ok(size) => size,
            Err(error) => fail_fast(error),
        }
    }

    /// Like [`ChunkHeader::used_size_of_chunk`], but the error goes to
    /// `handler` and comes back as `Err` when the handler returns.
    pub fn used_size_of_chunk_with(&self, handler: &dyn ErrorHandler) -> Result<u64, FatalError> {
        self.try_used_size_of_chunk()
            .map_err(|error| report(handler, error))
    }

    pub fn try_used_size_of_chunk(&self) -> Result<u64, FatalError> {
        self.payload_offset
            .checked_add(self.payload_size as u64)
            .filter(|&used| used <= self.chunk_size)
            .ok_or(FatalError::PayloadExceedsChunk {
                payload_offset: self.payload_offset,
                payload_size: self.payload_size,
                chunk_size: self.chunk_size,
            })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_header_version(&self) -> u8 {
        self.chunk_header_version
    }

    pub fn custom_header_size(&self) -> u32 {
        self.custom_header_size
    }

    pub fn has_custom_header(&self) -> bool {
        self.custom_header_size != 0
    }

    pub fn origin_id(&self) -> OriginId {
        self.origin_id
    }

    pub fn set_origin_id(&mut self, origin_id: OriginId) {
        self.origin_id = origin_id;
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: u64) {
        self.sequence_number = sequence_number;
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    pub fn payload_alignment(&self) -> u32 {
        self.payload_alignment
    }

    pub fn payload_offset(&self) -> PayloadOffset {
        self.payload_offset
    }
}
