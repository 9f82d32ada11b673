//! annmat - annotated matrices with lazy views and disk-backed storage
//!
//! An [`AnnData`] pairs a primary matrix with row (observation) and column
//! (variable) metadata, optional layers, multi-dimensional annotations and
//! free-form `uns` data. Selections are cheap views that read through to
//! their root; containers opened from disk read only the chunks a
//! selection touches.
//!
//! ## Architecture
//!
//! - **annmat-core**: element types, formats, the file header and
//!   validation (no I/O)
//! - **annmat**: containers, views, backed storage, concatenation and the
//!   file codec
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use annmat::{concat, io, Axis, ConcatOptions, Join, Selector};
//!
//! fn example() -> annmat::Result<()> {
//!     let a = io::open("a.annm")?;
//!     let b = io::open("b.annm")?;
//!
//!     // views read only the selected rows from disk
//!     let head = a.select(Selector::Range(0..100), ..)?;
//!     let sums = head.sum_x(Axis::Rows)?;
//!     println!("{} column sums", sums.len());
//!
//!     let merged = concat(&[&a, &b], &ConcatOptions::new(Axis::Rows, Join::Outer))?;
//!     merged.write("merged.annm")?;
//!     Ok(())
//! }
//! ```

pub use annmat_core::{
    // Element and format definitions
    DataType, FileHeader, MatrixAccess, MatrixElement, MatrixFormat,
    // Low-level errors and selector parsing
    FormatError, parse_positions, parse_range,
};

pub mod anndata;
pub mod axis;
pub mod backed;
pub mod concat;
pub mod error;
pub mod io;
pub mod storage;
pub mod table;
pub mod view;

pub use anndata::{AnnData, ContainerId};
pub use axis::{Axis, AxisIndex, Rename, Selector, UniqueLabels, DEFAULT_UNIQUE_SEPARATOR};
pub use backed::{BackedArray, BackedFile, CancelToken, ChunkConfig, ChunkRead, ReadOptions};
pub use concat::{
    concat, concat_with_report, BatchKey, ConcatOptions, ConcatReport, Join, LabelStrategy,
    MergeStrategy, Uniqueness,
};
pub use error::{Error, Result};
pub use storage::{ArrayData, ArrayElement, CompressedMatrix, DenseMatrix, Matrix, Storage};
pub use table::{Categorical, Cell, Column, ColumnKind, Table};
