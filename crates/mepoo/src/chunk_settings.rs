use crate::chunk_header::ChunkHeader;
use crate::constants::{CHUNK_DEFAULT_PAYLOAD_ALIGNMENT, CHUNK_NO_CUSTOM_HEADER_ALIGNMENT};
use crate::errors::ChunkSettingsError;
use crate::utils::align_up;
use std::mem::{align_of, size_of};

/// Validated shape of a chunk: payload and optional custom header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    payload_size: u32,
    payload_alignment: u32,
    custom_header_size: u32,
    custom_header_alignment: u32,
    required_chunk_size: u64,
}

impl ChunkSettings {
    /// An alignment of 0 is treated as 1. A custom header size of 0 means
    /// "no custom header" and its alignment is then ignored.
    pub fn new(
        payload_size: u32,
        payload_alignment: u32,
        custom_header_size: u32,
        custom_header_alignment: u32,
    ) -> Result<Self, ChunkSettingsError> {
        let payload_alignment = payload_alignment.max(1);
        let custom_header_alignment = if custom_header_size == 0 {
            CHUNK_NO_CUSTOM_HEADER_ALIGNMENT
        } else {
            custom_header_alignment.max(1)
        };

        for alignment in [payload_alignment, custom_header_alignment] {
            if !alignment.is_power_of_two() {
                return Err(ChunkSettingsError::AlignmentNotPowerOfTwo { alignment });
            }
        }

        // The custom header directly follows the chunk header, so it cannot
        // ask for more than the chunk header's own alignment.
        let max = align_of::<ChunkHeader>() as u32;
        if custom_header_alignment > max {
            return Err(ChunkSettingsError::CustomHeaderAlignmentExceedsLimit {
                alignment: custom_header_alignment,
                max,
            });
        }

        let required_chunk_size =
            required_chunk_size(payload_size, payload_alignment, custom_header_size)
                .ok_or(ChunkSettingsError::RequiredChunkSizeExceedsLimit)?;

        Ok(Self {
            payload_size,
            payload_alignment,
            custom_header_size,
            custom_header_alignment,
            required_chunk_size,
        })
    }

    /// Payload with default alignment and no custom header.
    pub fn with_payload(payload_size: u32) -> Result<Self, ChunkSettingsError> {
        Self::new(
            payload_size,
            CHUNK_DEFAULT_PAYLOAD_ALIGNMENT,
            crate::constants::CHUNK_NO_CUSTOM_HEADER_SIZE,
            CHUNK_NO_CUSTOM_HEADER_ALIGNMENT,
        )
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    pub fn payload_alignment(&self) -> u32 {
        self.payload_alignment
    }

    pub fn custom_header_size(&self) -> u32 {
        self.custom_header_size
    }

    pub fn custom_header_alignment(&self) -> u32 {
        self.custom_header_alignment
    }

    pub fn has_custom_header(&self) -> bool {
        self.custom_header_size != 0
    }

    /// Whether the payload sits directly behind the chunk header, independent
    /// of where the chunk is placed.
    pub fn is_payload_adjacent(&self) -> bool {
        !self.has_custom_header() && self.payload_alignment as usize <= align_of::<ChunkHeader>()
    }

    /// Smallest chunk that fits this layout wherever an aligned chunk starts.
    pub fn required_chunk_size(&self) -> u64 {
        self.required_chunk_size
    }
}

fn required_chunk_size(
    payload_size: u32,
    payload_alignment: u32,
    custom_header_size: u32,
) -> Option<u64> {
    let header_size = size_of::<ChunkHeader>() as u64;
    let header_alignment = align_of::<ChunkHeader>() as u64;
    let back_offset_size = size_of::<u64>() as u64;
    let payload_size = payload_size as u64;
    let payload_alignment = payload_alignment as u64;

    if custom_header_size == 0 {
        if payload_alignment <= header_alignment {
            return header_size.checked_add(payload_size);
        }
        // The back-offset is the header's own last field; in the worst case
        // the payload starts one full alignment past the header.
        let overhang = header_size - header_alignment;
        return overhang
            .checked_add(payload_alignment)?
            .checked_add(payload_size);
    }

    let headers_end = header_size.checked_add(custom_header_size as u64)?;
    let back_offset_position = align_up(headers_end, align_of::<u64>() as u64)?;
    let max_padding = back_offset_size.max(payload_alignment);
    back_offset_position
        .checked_add(max_padding)?
        .checked_add(payload_size)
}
