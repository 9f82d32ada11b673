//! Format constants and magic bytes

/// Default alignment boundary for every payload blob
pub const ALIGNMENT_BOUNDARY: usize = 8;

/// Magic bytes at the start of every annmat file
pub const MAGIC: [u8; 4] = *b"ANNM";

/// Current file format version
pub const VERSION: u8 = 1;

/// Fixed size of the file header
pub const HEADER_SIZE: usize = 64;

/// Upper bound on the JSON manifest size (256 MiB)
pub const MAX_MANIFEST_SIZE: u64 = 256 * 1024 * 1024;

/// Header flags
pub mod flags {
    /// The manifest carries at least one layer
    pub const HAS_LAYERS: u8 = 1 << 0;
    /// The primary matrix is stored compressed (CSR or CSC)
    pub const SPARSE_X: u8 = 1 << 1;
}
