//! Core matrix access trait
//!
//! Implemented by every in-memory matrix representation, dense or
//! compressed, regardless of element type.

/// Format-agnostic read access to a two-dimensional matrix
pub trait MatrixAccess {
    /// Get matrix dimensions as (rows, cols)
    fn dimensions(&self) -> (usize, usize);

    /// Get number of stored elements
    ///
    /// For dense matrices this is `rows * cols`.
    fn nnz(&self) -> usize;

    /// Get an element widened to `f64`
    ///
    /// Returns `None` if the position is out of bounds. Implicit zeros of
    /// compressed matrices are returned as `Some(0.0)`.
    fn get_f64(&self, row: usize, col: usize) -> Option<f64>;
}
