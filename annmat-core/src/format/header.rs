//! Fixed-size file header for annmat files
//!
//! The header is the only fixed-layout structure in a file. Every payload
//! is described by the JSON manifest whose location the header records.

use super::constants::{HEADER_SIZE, MAGIC, MAX_MANIFEST_SIZE, VERSION};
use crate::error::{FormatError, Result};

/// Fixed-size header for annmat files (64 bytes, little-endian)
///
/// Layout:
///
/// | bytes  | field             |
/// |--------|-------------------|
/// | 0..4   | magic `ANNM`      |
/// | 4      | version           |
/// | 5      | flags             |
/// | 6..8   | padding           |
/// | 8..16  | `nrows`           |
/// | 16..24 | `ncols`           |
/// | 24..32 | `manifest_offset` |
/// | 32..40 | `manifest_size`   |
/// | 40..64 | reserved          |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileHeader {
    /// Magic bytes: "ANNM"
    pub magic: [u8; 4],
    /// Format version
    pub version: u8,
    /// Summary flags, see [`crate::format::constants::flags`]
    pub flags: u8,
    /// Number of observations (rows of X)
    pub nrows: u64,
    /// Number of variables (columns of X)
    pub ncols: u64,
    /// Offset of the JSON manifest from the start of the file
    pub manifest_offset: u64,
    /// Size of the JSON manifest in bytes
    pub manifest_size: u64,
    /// Reserved bytes for future use
    pub reserved: [u8; 24],
}

impl FileHeader {
    /// Magic bytes for annmat files
    pub const MAGIC: [u8; 4] = MAGIC;

    /// Current format version
    pub const VERSION: u8 = VERSION;

    /// Size of the header in bytes
    pub const SIZE: usize = HEADER_SIZE;

    /// Create a new header with default values
    pub const fn new() -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            flags: 0,
            nrows: 0,
            ncols: 0,
            manifest_offset: 0,
            manifest_size: 0,
            reserved: [0; 24],
        }
    }

    /// Byte range of the manifest, checked against the file length
    pub fn manifest_region(&self, file_len: u64) -> Result<(u64, u64)> {
        let end = self
            .manifest_offset
            .checked_add(self.manifest_size)
            .ok_or(FormatError::ArraySizeOverflow)?;
        if self.manifest_offset < Self::SIZE as u64 || end > file_len {
            return Err(FormatError::CorruptedData);
        }
        Ok((self.manifest_offset, self.manifest_size))
    }

    /// Parse and validate a header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(FormatError::InvalidHeader);
        }

        if bytes[0..4] != Self::MAGIC {
            return Err(FormatError::InvalidHeader);
        }

        let version = bytes[4];
        if version == 0 {
            return Err(FormatError::InvalidHeader);
        }
        if version > Self::VERSION {
            return Err(FormatError::UnsupportedVersion);
        }

        let mut header = Self::new();
        header.version = version;
        header.flags = bytes[5];
        header.nrows = read_u64(bytes, 8)?;
        header.ncols = read_u64(bytes, 16)?;
        header.manifest_offset = read_u64(bytes, 24)?;
        header.manifest_size = read_u64(bytes, 32)?;
        header.reserved.copy_from_slice(&bytes[40..64]);

        if header.manifest_size > MAX_MANIFEST_SIZE {
            return Err(FormatError::CorruptedData);
        }
        header
            .manifest_offset
            .checked_add(header.manifest_size)
            .ok_or(FormatError::ArraySizeOverflow)?;

        Ok(header)
    }

    /// Convert the header to its on-disk bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes[5] = self.flags;
        // bytes 6..8 stay zero
        bytes[8..16].copy_from_slice(&self.nrows.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.ncols.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.manifest_offset.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.manifest_size.to_le_bytes());
        bytes[40..64].copy_from_slice(&self.reserved);
        bytes
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64> {
    let field: [u8; 8] = bytes
        .get(at..at + 8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(FormatError::InvalidHeader)?;
    Ok(u64::from_le_bytes(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileHeader {
        let mut header = FileHeader::new();
        header.nrows = 3;
        header.ncols = 7;
        header.manifest_offset = 128;
        header.manifest_size = 40;
        header.flags = crate::format::constants::flags::SPARSE_X;
        header
    }

    #[test]
    fn test_header_bytes_roundtrip() {
        let header = sample();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"ANNM");
        assert_eq!(FileHeader::from_bytes(&bytes), Ok(header));
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert_eq!(FileHeader::from_bytes(&bytes), Err(FormatError::InvalidHeader));

        let mut bytes = sample().to_bytes();
        bytes[4] = FileHeader::VERSION + 1;
        assert_eq!(
            FileHeader::from_bytes(&bytes),
            Err(FormatError::UnsupportedVersion)
        );

        assert_eq!(
            FileHeader::from_bytes(&bytes[..10]),
            Err(FormatError::InvalidHeader)
        );
    }

    #[test]
    fn test_manifest_region_bounds() {
        let header = sample();
        assert_eq!(header.manifest_region(168), Ok((128, 40)));
        assert_eq!(
            header.manifest_region(100),
            Err(FormatError::CorruptedData)
        );

        let mut overlapping = sample();
        overlapping.manifest_offset = 8;
        assert_eq!(
            overlapping.manifest_region(1024),
            Err(FormatError::CorruptedData)
        );
    }
}
