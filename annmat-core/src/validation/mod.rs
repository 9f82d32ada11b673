//! Layout validation utilities
//!
//! This module contains pure validation functions with no I/O dependencies.
//! All functions are arithmetic on data layout and format constraints.

pub mod bounds;
pub mod layout;
pub mod parsing;

pub use bounds::{validate_array_bounds, validate_extent};
pub use layout::{align_to_boundary, calculate_padding, validate_chunk_boundaries};
pub use parsing::parse_range;
#[cfg(feature = "alloc")]
pub use parsing::parse_positions;
