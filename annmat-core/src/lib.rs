#![no_std]

//! annmat core - annotated matrix format definitions
//!
//! This crate provides the element types, matrix formats, file header and
//! validation helpers shared by every annmat storage backend. It performs
//! no I/O.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod error;
pub mod format;
pub mod traits;
pub mod validation;

pub use error::*;
pub use format::*;
pub use traits::*;
pub use validation::*;
