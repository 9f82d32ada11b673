//! Disk-backed matrix storage
//!
//! A [`BackedFile`] owns the memory map of one annmat file and is shared by
//! every container and view opened from it. A [`BackedArray`] describes one
//! matrix inside that file and reads exactly the chunks a selection needs:
//! requested positions are grouped into runs of consecutive positions and
//! each run is read as one contiguous block.

use crate::axis::Axis;
use crate::error::{Error, Result};
use crate::storage::{u32_from_bytes, u64_from_bytes, ArrayData, CompressedMatrix, DenseMatrix, Matrix};
use annmat_core::{
    validate_array_bounds, validate_chunk_boundaries, validate_extent, DataType, FormatError, MatrixFormat,
};
use log::debug;
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Configuration for chunked reads of backed matrices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum memory usage per chunk in MB
    pub memory_limit_mb: usize,
    /// Maximum run length, in positions along the major axis, read at once
    pub chunk_size: usize,
}

impl ChunkConfig {
    /// Create config with memory limit
    pub fn with_memory_limit(memory_limit_mb: usize) -> Self {
        Self {
            memory_limit_mb,
            ..Self::default()
        }
    }

    /// Set chunk size in positions
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Get chunk size in positions
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Get the per-chunk memory budget in bytes
    pub fn chunk_size_bytes(&self) -> usize {
        self.memory_limit_mb * 1024 * 1024
    }

    /// Chunk size that keeps one chunk of `row_bytes`-wide rows under the memory limit
    pub fn bounded_chunk_size(&self, row_bytes: usize) -> usize {
        let by_memory = self.chunk_size_bytes() / row_bytes.max(1);
        self.chunk_size().min(by_memory.max(1))
    }

}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 128,
            chunk_size: 100_000,
        }
    }
}

/// Cooperative cancellation flag for long reads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for reads that may touch backed storage
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub chunk: ChunkConfig,
    pub cancel: Option<CancelToken>,
}

impl ReadOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk = self.chunk.with_chunk_size(chunk_size);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// One block read from a backed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRead {
    pub element: String,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

/// Byte range of one payload blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl Extent {
    fn range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.len) as usize
    }
}

/// On-disk layout of one matrix element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayLayout {
    pub format: MatrixFormat,
    pub dtype: DataType,
    pub shape: (usize, usize),
    pub data: Extent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Extent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indptr: Option<Extent>,
}

impl ArrayLayout {
    fn major_len(&self) -> usize {
        match self.format {
            MatrixFormat::Csc => self.shape.1,
            _ => self.shape.0,
        }
    }

    /// Check every extent against the file length and the declared shape
    pub fn validate(&self, file_len: u64) -> Result<()> {
        validate_extent(self.data.offset, self.data.len, file_len)?;
        let count = element_count(self.dtype, self.data.len)?;

        match self.format {
            MatrixFormat::Dense => {
                let expected = self.shape.0 * self.shape.1;
                if count != expected {
                    return Err(Error::dimension("dense payload", expected, count));
                }
            }
            MatrixFormat::Csr | MatrixFormat::Csc => {
                let (Some(indices), Some(indptr)) = (self.indices, self.indptr) else {
                    return Err(Error::Manifest("sparse element without indices".into()));
                };
                validate_extent(indices.offset, indices.len, file_len)?;
                validate_extent(indptr.offset, indptr.len, file_len)?;
                let stored = validate_array_bounds::<u32>(indices.len as usize)?;
                if stored != count {
                    return Err(Error::dimension("sparse indices", count, stored));
                }
                let expected = self.major_len() + 1;
                let pointers = validate_array_bounds::<u64>(indptr.len as usize)?;
                if pointers != expected {
                    return Err(Error::dimension("indptr", expected, pointers));
                }
            }
        }
        Ok(())
    }
}

fn element_count(dtype: DataType, byte_len: u64) -> Result<usize> {
    let byte_len = usize::try_from(byte_len).map_err(|_| FormatError::ArraySizeOverflow)?;
    let count = match dtype {
        DataType::F32 => validate_array_bounds::<f32>(byte_len),
        DataType::F64 => validate_array_bounds::<f64>(byte_len),
        DataType::I32 => validate_array_bounds::<i32>(byte_len),
        DataType::I64 => validate_array_bounds::<i64>(byte_len),
        DataType::U32 => validate_array_bounds::<u32>(byte_len),
        DataType::U64 => validate_array_bounds::<u64>(byte_len),
    }?;
    Ok(count)
}

/// Shared memory-mapped session for one file
#[derive(Debug)]
pub struct BackedFile {
    path: PathBuf,
    len: u64,
    map: RwLock<Option<Mmap>>,
    trace: Mutex<Option<Vec<ChunkRead>>>,
}

impl BackedFile {
    /// Map `path` read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(err),
        })?;
        let len = file.metadata()?.len();
        // SAFETY: the map is read-only and every access re-checks that the
        // file still exists with its original length
        let map = unsafe { MmapOptions::new().map(&file)? };
        debug!("mapped {} ({} bytes)", path.display(), len);
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            len,
            map: RwLock::new(Some(map)),
            trace: Mutex::new(None),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_open(&self) -> bool {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// End the session; later reads fail with `BackingUnavailable`
    pub fn close(&self) {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        if map.take().is_some() {
            debug!("closed {}", self.path.display());
        }
    }

    /// Start recording every chunk read, discarding earlier records
    pub fn enable_trace(&self) {
        *self.trace.lock().unwrap_or_else(PoisonError::into_inner) = Some(Vec::new());
    }

    /// Chunk reads recorded since [`enable_trace`](Self::enable_trace)
    pub fn trace(&self) -> Vec<ChunkRead> {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    fn record(&self, element: &str, rows: Range<usize>, cols: Range<usize>) {
        debug!("read {element} rows {rows:?} cols {cols:?}");
        if let Some(trace) = self
            .trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            trace.push(ChunkRead {
                element: element.to_string(),
                rows,
                cols,
            });
        }
    }

    fn unavailable(&self) -> Error {
        Error::BackingUnavailable(self.path.clone())
    }

    /// Run `f` over the mapped bytes after checking the file is still intact
    pub(crate) fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() == self.len => {}
            _ => return Err(self.unavailable()),
        }
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        let bytes = map.as_ref().ok_or_else(|| self.unavailable())?;
        f(bytes)
    }
}

impl Drop for BackedFile {
    fn drop(&mut self) {
        if self.is_open() {
            debug!("releasing {}", self.path.display());
        }
    }
}

fn slice(bytes: &[u8], range: Range<usize>) -> Result<&[u8]> {
    bytes.get(range).ok_or(Error::Format(FormatError::CorruptedData))
}

/// Split sorted unique positions into runs of consecutive positions
fn runs(sorted: &[usize], cap: usize) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    for &position in sorted {
        match runs.last_mut() {
            Some(run) if run.end == position && run.len() < cap => run.end += 1,
            _ => runs.push(position..position + 1),
        }
    }
    runs
}

fn sorted_unique(positions: &[usize]) -> Vec<usize> {
    let mut unique = positions.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

/// Positions of `requested` inside `compact`, which holds them sorted and unique
fn compact_positions(requested: &[usize], compact: &[usize]) -> Vec<usize> {
    requested
        .iter()
        .filter_map(|p| compact.binary_search(p).ok())
        .collect()
}

/// One matrix element stored in a backed file
#[derive(Debug, Clone)]
pub struct BackedArray {
    file: Arc<BackedFile>,
    name: String,
    layout: ArrayLayout,
}

impl BackedArray {
    pub fn new(file: Arc<BackedFile>, name: impl Into<String>, layout: ArrayLayout) -> Result<Self> {
        layout.validate(file.len())?;
        Ok(Self {
            file,
            name: name.into(),
            layout,
        })
    }

    pub fn file(&self) -> &Arc<BackedFile> {
        &self.file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    pub fn shape(&self) -> (usize, usize) {
        self.layout.shape
    }

    pub fn dtype(&self) -> DataType {
        self.layout.dtype
    }

    pub fn format(&self) -> MatrixFormat {
        self.layout.format
    }

    /// Read the contiguous block `rows × cols`.
    ///
    /// Compressed layouts return every stored entry of the selected major
    /// positions restricted to the minor range.
    pub fn read_chunk(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Matrix> {
        let (nrows, ncols) = self.shape();
        validate_chunk_boundaries(rows.start, rows.end, nrows)
            .and(validate_chunk_boundaries(cols.start, cols.end, ncols))
            .map_err(|_| {
                Error::IndexError(format!(
                    "chunk {rows:?} x {cols:?} outside matrix of shape ({nrows}, {ncols})"
                ))
            })?;
        self.file.record(&self.name, rows.clone(), cols.clone());

        let layout = &self.layout;
        let size = layout.dtype.size_bytes();
        self.file.with_bytes(|bytes| {
            let payload = slice(bytes, layout.data.range())?;
            match layout.format {
                MatrixFormat::Dense => {
                    let data = if cols.start == 0 && cols.end == ncols {
                        ArrayData::from_bytes(
                            layout.dtype,
                            slice(payload, rows.start * ncols * size..rows.end * ncols * size)?,
                        )?
                    } else {
                        let mut data = ArrayData::with_capacity(layout.dtype, rows.len() * cols.len());
                        for row in rows.clone() {
                            let start = (row * ncols + cols.start) * size;
                            let end = (row * ncols + cols.end) * size;
                            data.extend_from(&ArrayData::from_bytes(layout.dtype, slice(payload, start..end)?)?);
                        }
                        data
                    };
                    Ok(Matrix::Dense(DenseMatrix::new(rows.len(), cols.len(), data)?))
                }
                MatrixFormat::Csr | MatrixFormat::Csc => {
                    let (major, minor) = match layout.format {
                        MatrixFormat::Csc => (cols.clone(), rows.clone()),
                        _ => (rows.clone(), cols.clone()),
                    };
                    let (Some(indices_at), Some(indptr_at)) = (layout.indices, layout.indptr) else {
                        return Err(Error::Manifest(format!("element `{}` has no indices", self.name)));
                    };
                    let indptr_bytes = slice(bytes, indptr_at.range())?;
                    let indptr = u64_from_bytes(slice(indptr_bytes, major.start * 8..(major.end + 1) * 8)?)?;
                    if !indptr.windows(2).all(|pair| pair[0] <= pair[1]) {
                        return Err(FormatError::CorruptedData.into());
                    }
                    let (first, last) = match (indptr.first(), indptr.last()) {
                        (Some(&first), Some(&last)) => (first as usize, last as usize),
                        _ => return Err(FormatError::CorruptedData.into()),
                    };
                    let indices = u32_from_bytes(slice(
                        slice(bytes, indices_at.range())?,
                        first * 4..last * 4,
                    )?)?;
                    let data = ArrayData::from_bytes(layout.dtype, slice(payload, first * size..last * size)?)?;
                    let rebased: Vec<u64> = indptr.iter().map(|p| p - first as u64).collect();

                    let full_minor = match layout.format {
                        MatrixFormat::Csc => nrows,
                        _ => ncols,
                    };
                    let (chunk_rows, chunk_cols) = match layout.format {
                        MatrixFormat::Csc => (full_minor, major.len()),
                        _ => (major.len(), full_minor),
                    };
                    let chunk = CompressedMatrix::new(layout.format, chunk_rows, chunk_cols, rebased, indices, data)?;
                    if minor.start == 0 && minor.end == full_minor {
                        return Ok(Matrix::Sparse(chunk));
                    }
                    let all_major: Vec<Option<usize>> = (0..major.len()).map(Some).collect();
                    let minor_positions: Vec<Option<usize>> = minor.map(Some).collect();
                    let restricted = match layout.format {
                        MatrixFormat::Csc => chunk.gather(&minor_positions, &all_major),
                        _ => chunk.gather(&all_major, &minor_positions),
                    };
                    Ok(Matrix::Sparse(restricted))
                }
            }
        })
    }

    fn check_positions(&self, rows: &[usize], cols: &[usize]) -> Result<()> {
        let (nrows, ncols) = self.shape();
        if let Some(bad) = rows.iter().find(|&&r| r >= nrows) {
            return Err(Error::IndexError(format!("row {bad} outside {nrows} rows")));
        }
        if let Some(bad) = cols.iter().find(|&&c| c >= ncols) {
            return Err(Error::IndexError(format!("column {bad} outside {ncols} columns")));
        }
        Ok(())
    }

    fn empty(&self, nrows: usize, ncols: usize) -> Matrix {
        match self.layout.format {
            MatrixFormat::Dense => Matrix::Dense(DenseMatrix::zeros(nrows, ncols, self.dtype())),
            format => Matrix::Sparse(CompressedMatrix::empty(format, nrows, ncols, self.dtype())),
        }
    }

    /// Read the selected positions, touching only the runs they cover.
    ///
    /// The result keeps the requested order and duplicates. A cancelled
    /// token aborts between chunks and the partial result is dropped.
    pub fn read(&self, rows: &[usize], cols: &[usize], options: &ReadOptions) -> Result<Matrix> {
        self.check_positions(rows, cols)?;
        if rows.is_empty() || cols.is_empty() {
            return Ok(self.empty(rows.len(), cols.len()));
        }

        let unique_rows = sorted_unique(rows);
        let unique_cols = sorted_unique(cols);
        let (nrows, ncols) = self.shape();

        let mut blocks = Vec::new();
        match self.layout.format {
            MatrixFormat::Dense => {
                let row_bytes = unique_cols.len() * self.dtype().size_bytes();
                let row_cap = options.chunk.bounded_chunk_size(row_bytes);
                let col_runs = runs(&unique_cols, usize::MAX);
                for row_run in runs(&unique_rows, row_cap) {
                    let mut pieces = Vec::with_capacity(col_runs.len());
                    for col_run in &col_runs {
                        options.check_cancelled()?;
                        pieces.push(self.read_chunk(row_run.clone(), col_run.clone())?);
                    }
                    let refs: Vec<&Matrix> = pieces.iter().collect();
                    blocks.push(Matrix::stack(Axis::Cols, &refs)?);
                }
                let refs: Vec<&Matrix> = blocks.iter().collect();
                let compact = Matrix::stack(Axis::Rows, &refs)?;
                Ok(compact.select(
                    &compact_positions(rows, &unique_rows),
                    &compact_positions(cols, &unique_cols),
                ))
            }
            MatrixFormat::Csr => {
                for row_run in runs(&unique_rows, options.chunk.chunk_size()) {
                    options.check_cancelled()?;
                    blocks.push(self.read_chunk(row_run, 0..ncols)?);
                }
                let refs: Vec<&Matrix> = blocks.iter().collect();
                let compact = Matrix::stack(Axis::Rows, &refs)?;
                Ok(compact.select(&compact_positions(rows, &unique_rows), cols))
            }
            MatrixFormat::Csc => {
                for col_run in runs(&unique_cols, options.chunk.chunk_size()) {
                    options.check_cancelled()?;
                    blocks.push(self.read_chunk(0..nrows, col_run)?);
                }
                let refs: Vec<&Matrix> = blocks.iter().collect();
                let compact = Matrix::stack(Axis::Cols, &refs)?;
                Ok(compact.select(rows, &compact_positions(cols, &unique_cols)))
            }
        }
    }

    pub fn read_all(&self, options: &ReadOptions) -> Result<Matrix> {
        let (nrows, ncols) = self.shape();
        let rows: Vec<usize> = (0..nrows).collect();
        let cols: Vec<usize> = (0..ncols).collect();
        self.read(&rows, &cols, options)
    }

    /// Sums of the selected region computed one chunk at a time
    pub fn sum_axis(
        &self,
        axis: Axis,
        rows: &[usize],
        cols: &[usize],
        options: &ReadOptions,
    ) -> Result<Vec<f64>> {
        self.check_positions(rows, cols)?;
        let by_cols = self.layout.format == MatrixFormat::Csc;
        let outer = if by_cols { cols } else { rows };
        let collapses_outer = (axis == Axis::Rows) != by_cols;
        let chunk = options.chunk.chunk_size();

        let mut sums = vec![0.0; axis.other().len_of((rows.len(), cols.len()))];
        for (index, piece) in outer.chunks(chunk).enumerate() {
            let part = if by_cols {
                self.read(rows, piece, options)?
            } else {
                self.read(piece, cols, options)?
            };
            let partial = part.sum_axis(axis);
            if collapses_outer {
                for (sum, value) in sums.iter_mut().zip(partial) {
                    *sum += value;
                }
            } else {
                let start = index * chunk;
                sums[start..start + partial.len()].copy_from_slice(&partial);
            }
        }
        Ok(sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_split_and_cap() {
        assert_eq!(runs(&[0, 1, 2, 5, 6, 9], usize::MAX), vec![0..3, 5..7, 9..10]);
        assert_eq!(runs(&[0, 1, 2, 3, 4], 2), vec![0..2, 2..4, 4..5]);
        assert!(runs(&[], 4).is_empty());
    }

    #[test]
    fn test_compact_positions() {
        let requested = [4, 1, 4, 2];
        let unique = sorted_unique(&requested);
        assert_eq!(unique, vec![1, 2, 4]);
        assert_eq!(compact_positions(&requested, &unique), vec![2, 0, 2, 1]);
    }

    #[test]
    fn test_chunk_config() {
        let config = ChunkConfig::with_memory_limit(1).with_chunk_size(0);
        assert_eq!(config.chunk_size(), 1);
        assert_eq!(config.chunk_size_bytes(), 1024 * 1024);

        let config = ChunkConfig::default();
        assert_eq!(config.bounded_chunk_size(1024 * 1024), 128);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let options = ReadOptions::default().with_cancel(token.clone());
        assert!(options.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(options.check_cancelled(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_layout_validation() {
        let layout = ArrayLayout {
            format: MatrixFormat::Dense,
            dtype: DataType::F32,
            shape: (2, 2),
            data: Extent { offset: 64, len: 16 },
            indices: None,
            indptr: None,
        };
        assert!(layout.validate(80).is_ok());
        assert!(matches!(layout.validate(70), Err(Error::Format(_))));

        let wrong_shape = ArrayLayout { shape: (3, 2), ..layout.clone() };
        assert!(matches!(
            wrong_shape.validate(80),
            Err(Error::DimensionMismatch { .. })
        ));

        let ragged = ArrayLayout { data: Extent { offset: 64, len: 15 }, ..layout.clone() };
        assert!(matches!(
            ragged.validate(80),
            Err(Error::Format(FormatError::ArrayAlignment))
        ));

        let sparse = ArrayLayout { format: MatrixFormat::Csr, ..layout };
        assert!(matches!(sparse.validate(80), Err(Error::Manifest(_))));
    }
}
