//! Binary format definitions for annmat files
//!
//! This module contains pure data structure definitions for the annmat
//! container layout. No I/O operations, only format specifications.

pub mod constants;
pub mod dtype;
pub mod header;

pub use dtype::{DataType, MatrixFormat};
pub use header::FileHeader;
