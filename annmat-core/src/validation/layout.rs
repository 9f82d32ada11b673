//! Layout arithmetic for payload placement

use crate::FormatError;

/// Align an offset to a power-of-two boundary
pub const fn align_to_boundary(offset: usize, boundary: usize) -> usize {
    (offset + boundary - 1) & !(boundary - 1)
}

/// Padding needed to reach the next alignment boundary
pub const fn calculate_padding(offset: usize, boundary: usize) -> usize {
    align_to_boundary(offset, boundary) - offset
}

/// Validate chunk boundary constraints
///
/// `start..end` must be a (possibly empty) range inside `0..total_size`.
pub const fn validate_chunk_boundaries(
    start: usize,
    end: usize,
    total_size: usize,
) -> Result<(), FormatError> {
    if start > end {
        return Err(FormatError::InvalidRange);
    }

    if end > total_size {
        return Err(FormatError::IndexOutOfBounds);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to_boundary() {
        assert_eq!(align_to_boundary(0, 8), 0);
        assert_eq!(align_to_boundary(1, 8), 8);
        assert_eq!(align_to_boundary(8, 8), 8);
        assert_eq!(align_to_boundary(9, 8), 16);
        assert_eq!(align_to_boundary(5, 4), 8);
    }

    #[test]
    fn test_calculate_padding() {
        assert_eq!(calculate_padding(0, 8), 0);
        assert_eq!(calculate_padding(1, 8), 7);
        assert_eq!(calculate_padding(64, 8), 0);
        assert_eq!(calculate_padding(66, 8), 6);
    }

    #[test]
    fn test_validate_chunk_boundaries() {
        assert_eq!(validate_chunk_boundaries(0, 10, 20), Ok(()));
        assert_eq!(validate_chunk_boundaries(10, 10, 20), Ok(()));
        assert_eq!(validate_chunk_boundaries(0, 20, 20), Ok(()));

        assert_eq!(
            validate_chunk_boundaries(15, 10, 20),
            Err(FormatError::InvalidRange)
        );
        assert_eq!(
            validate_chunk_boundaries(0, 25, 20),
            Err(FormatError::IndexOutOfBounds)
        );
    }
}
