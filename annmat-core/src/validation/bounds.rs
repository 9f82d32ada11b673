//! Array bounds validation
//!
//! Pure arithmetic validation of array size calculations with overflow
//! protection.

use crate::FormatError;

/// Validate array bounds for a given element type
///
/// Returns the element count stored in `byte_len` bytes.
pub const fn validate_array_bounds<T>(byte_len: usize) -> Result<usize, FormatError> {
    let element_size = core::mem::size_of::<T>();

    if byte_len % element_size != 0 {
        return Err(FormatError::ArrayAlignment);
    }

    let count = byte_len / element_size;

    // Conservative bound so downstream offset arithmetic cannot overflow
    if count > usize::MAX / 8 {
        return Err(FormatError::ArraySizeOverflow);
    }

    Ok(count)
}

/// Validate that `offset..offset + len` lies inside a buffer of `total` bytes
pub const fn validate_extent(offset: u64, len: u64, total: u64) -> Result<(), FormatError> {
    let end = match offset.checked_add(len) {
        Some(end) => end,
        None => return Err(FormatError::ArraySizeOverflow),
    };
    if end > total {
        return Err(FormatError::IndexOutOfBounds);
    }
    Ok(())
}
