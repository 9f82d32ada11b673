//! Error types for annmat format operations

/// Errors raised while decoding or validating the on-disk layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Invalid header format
    InvalidHeader,
    /// Format version newer than this library understands
    UnsupportedVersion,
    /// Data corruption detected
    CorruptedData,
    /// Index out of bounds
    IndexOutOfBounds,
    /// Malformed or inverted range
    InvalidRange,
    /// Array not aligned to its element size
    ArrayAlignment,
    /// Array size calculation would overflow
    ArraySizeOverflow,
}

impl core::fmt::Display for FormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            FormatError::InvalidHeader => "Invalid annmat header",
            FormatError::UnsupportedVersion => "Unsupported format version",
            FormatError::CorruptedData => "Data corruption detected",
            FormatError::IndexOutOfBounds => "Index out of bounds",
            FormatError::InvalidRange => "Invalid range",
            FormatError::ArrayAlignment => "Array not aligned to element size",
            FormatError::ArraySizeOverflow => "Array size overflow",
        };
        write!(f, "{msg}")
    }
}

impl core::error::Error for FormatError {}

/// Result type for format operations
pub type Result<T> = core::result::Result<T, FormatError>;
