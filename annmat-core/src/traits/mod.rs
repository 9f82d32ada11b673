//! Abstract interfaces shared by annmat storage backends
//!
//! Traits are pure interfaces - no concrete implementations beyond the
//! primitive element types.

pub mod element;
pub mod matrix;

pub use element::MatrixElement;
pub use matrix::MatrixAccess;
