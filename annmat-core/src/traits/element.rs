//! Matrix element type constraints
//!
//! This module defines the trait that constrains what types can be
//! stored as matrix elements.

use crate::format::DataType;

/// Trait for types that can be stored as matrix elements
///
/// All element types are plain-old-data so payload blobs can be viewed
/// directly through `bytemuck` without copying.
pub trait MatrixElement: bytemuck::Pod + PartialEq + core::fmt::Debug + Send + Sync + 'static {
    /// Get the DataType representation for this element type
    fn data_type() -> DataType;

    /// Get the size in bytes of this element type
    fn size_bytes() -> usize {
        core::mem::size_of::<Self>()
    }

    /// Convert from f64 for generic construction
    fn from_f64(value: f64) -> Self;

    /// Convert to f64 for generic operations
    fn to_f64(self) -> f64;

    /// Exact integer value, `None` for floating point types
    fn to_i128(self) -> Option<i128>;

    /// Convert from an exact integer value
    fn from_i128(value: i128) -> Self;

    /// Convert between element types following the promotion rules
    ///
    /// Integer to integer conversions are exact whenever the target is a
    /// supertype of the source; everything else goes through `f64`.
    fn cast_from<S: MatrixElement>(value: S) -> Self {
        match (Self::data_type().is_float(), value.to_i128()) {
            (false, Some(exact)) => Self::from_i128(exact),
            _ => Self::from_f64(value.to_f64()),
        }
    }
}

macro_rules! impl_float_element {
    ($type:ty, $variant:ident) => {
        impl MatrixElement for $type {
            fn data_type() -> DataType {
                DataType::$variant
            }

            fn from_f64(value: f64) -> Self {
                value as $type
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i128(self) -> Option<i128> {
                None
            }

            fn from_i128(value: i128) -> Self {
                value as $type
            }
        }
    };
}

macro_rules! impl_int_element {
    ($type:ty, $variant:ident) => {
        impl MatrixElement for $type {
            fn data_type() -> DataType {
                DataType::$variant
            }

            fn from_f64(value: f64) -> Self {
                value as $type
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i128(self) -> Option<i128> {
                Some(self as i128)
            }

            fn from_i128(value: i128) -> Self {
                value as $type
            }
        }
    };
}

impl_float_element!(f32, F32);
impl_float_element!(f64, F64);
impl_int_element!(i32, I32);
impl_int_element!(i64, I64);
impl_int_element!(u32, U32);
impl_int_element!(u64, U64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_integer_widening_is_exact() {
        let big = (1u64 << 60) + 1;
        assert_eq!(u64::cast_from(big), big);
        assert_eq!(i64::cast_from(-7i32), -7i64);
        assert_eq!(i64::cast_from(u32::MAX), u32::MAX as i64);
    }

    #[test]
    fn test_cast_to_float() {
        assert_eq!(f64::cast_from(3i32), 3.0);
        assert_eq!(f32::cast_from(0.5f64), 0.5f32);
        assert_eq!(f64::data_type(), DataType::F64);
        assert_eq!(u32::size_bytes(), 4);
    }
}
