//! Element data types and storage layouts

/// Numeric element types a matrix may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    I32 = 2,
    I64 = 3,
    U32 = 4,
    U64 = 5,
}

impl DataType {
    /// Get the size in bytes for this data type
    pub const fn size_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
        }
    }

    /// Whether values of this type can hold NaN
    pub const fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Common supertype of two data types.
    ///
    /// Follows the numpy promotion lattice restricted to the supported
    /// types: mixing a float with any integer yields `F64` unless both are
    /// `F32`, and `U64` mixed with a signed integer has no exact integer
    /// supertype so it also becomes `F64`.
    pub fn promote(self, other: DataType) -> DataType {
        use DataType::*;

        if self == other {
            return self;
        }
        match (self, other) {
            (F64, _) | (_, F64) => F64,
            (F32, _) | (_, F32) => F64,
            (U64, I32) | (I32, U64) | (U64, I64) | (I64, U64) => F64,
            (U32, U64) | (U64, U32) => U64,
            // remaining mixes are I32/I64/U32 pairs, all exact in I64
            _ => I64,
        }
    }

    /// Data type able to represent the missing-value sentinel (NaN)
    pub const fn with_missing(self) -> DataType {
        match self {
            DataType::F32 => DataType::F32,
            _ => DataType::F64,
        }
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DataType::F32 => write!(f, "f32"),
            DataType::F64 => write!(f, "f64"),
            DataType::I32 => write!(f, "i32"),
            DataType::I64 => write!(f, "i64"),
            DataType::U32 => write!(f, "u32"),
            DataType::U64 => write!(f, "u64"),
        }
    }
}

/// Matrix storage layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum MatrixFormat {
    /// Row-major dense array
    Dense = 0,
    /// Compressed Sparse Row (CSR)
    Csr = 1,
    /// Compressed Sparse Column (CSC)
    Csc = 2,
}

impl MatrixFormat {
    /// Whether the layout is compressed sparse
    pub const fn is_sparse(&self) -> bool {
        !matches!(self, MatrixFormat::Dense)
    }
}

impl core::fmt::Display for MatrixFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MatrixFormat::Dense => write!(f, "dense"),
            MatrixFormat::Csr => write!(f, "csr"),
            MatrixFormat::Csc => write!(f, "csc"),
        }
    }
}
