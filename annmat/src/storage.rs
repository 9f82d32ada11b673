//! In-memory matrix storage
//!
//! Matrices are stored either dense (row-major) or compressed (CSR/CSC)
//! over a typed [`ArrayData`] buffer. Every element type goes through the
//! same code path; per-type work is expanded by the dispatch macros below.

use crate::axis::Axis;
use crate::backed::{BackedArray, ReadOptions};
use crate::error::{Error, Result};
use annmat_core::{DataType, FormatError, MatrixAccess, MatrixElement, MatrixFormat};

/// Element types with a dedicated [`ArrayData`] variant
pub trait ArrayElement: MatrixElement {
    fn into_data(values: Vec<Self>) -> ArrayData;
    fn slice_of(data: &ArrayData) -> Option<&[Self]>;
}

macro_rules! impl_array_element {
    ($type:ty, $variant:ident) => {
        impl ArrayElement for $type {
            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn slice_of(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

/// Bind the typed vector of any variant and evaluate `$body`
macro_rules! dispatch {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::F32($values) => $body,
            ArrayData::F64($values) => $body,
            ArrayData::I32($values) => $body,
            ArrayData::I64($values) => $body,
            ArrayData::U32($values) => $body,
            ArrayData::U64($values) => $body,
        }
    };
}

/// Like `dispatch!` but rewraps the result in the same variant
macro_rules! map_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::F32($values) => ArrayData::F32($body),
            ArrayData::F64($values) => ArrayData::F64($body),
            ArrayData::I32($values) => ArrayData::I32($body),
            ArrayData::I64($values) => ArrayData::I64($body),
            ArrayData::U32($values) => ArrayData::U32($body),
            ArrayData::U64($values) => ArrayData::U64($body),
        }
    };
}

/// Typed element buffer
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl_array_element!(f32, F32);
impl_array_element!(f64, F64);
impl_array_element!(i32, I32);
impl_array_element!(i64, I64);
impl_array_element!(u32, U32);
impl_array_element!(u64, U64);

impl<T: ArrayElement> From<Vec<T>> for ArrayData {
    fn from(values: Vec<T>) -> Self {
        T::into_data(values)
    }
}

fn extend_cast<S: MatrixElement, T: MatrixElement>(dst: &mut Vec<T>, src: &[S]) {
    dst.extend(src.iter().map(|&value| T::cast_from(value)));
}

fn pod_vec<T: bytemuck::Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(FormatError::ArrayAlignment.into());
    }
    match bytemuck::try_cast_slice::<u8, T>(bytes) {
        Ok(values) => Ok(values.to_vec()),
        // unaligned source
        Err(_) => Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect()),
    }
}

impl ArrayData {
    pub fn with_capacity(dtype: DataType, capacity: usize) -> ArrayData {
        match dtype {
            DataType::F32 => ArrayData::F32(Vec::with_capacity(capacity)),
            DataType::F64 => ArrayData::F64(Vec::with_capacity(capacity)),
            DataType::I32 => ArrayData::I32(Vec::with_capacity(capacity)),
            DataType::I64 => ArrayData::I64(Vec::with_capacity(capacity)),
            DataType::U32 => ArrayData::U32(Vec::with_capacity(capacity)),
            DataType::U64 => ArrayData::U64(Vec::with_capacity(capacity)),
        }
    }

    pub fn zeros(dtype: DataType, len: usize) -> ArrayData {
        map_data!(ArrayData::with_capacity(dtype, 0), values => {
            let mut values = values;
            values.resize(len, bytemuck::Zeroable::zeroed());
            values
        })
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::F32(_) => DataType::F32,
            ArrayData::F64(_) => DataType::F64,
            ArrayData::I32(_) => DataType::I32,
            ArrayData::I64(_) => DataType::I64,
            ArrayData::U32(_) => DataType::U32,
            ArrayData::U64(_) => DataType::U64,
        }
    }

    pub fn len(&self) -> usize {
        dispatch!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_f64(&self, position: usize) -> Option<f64> {
        dispatch!(self, values => values.get(position).map(|v| v.to_f64()))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        dispatch!(self, values => values.iter().map(|v| v.to_f64()).collect())
    }

    /// Typed slice when `T` matches the stored type
    pub fn as_slice<T: ArrayElement>(&self) -> Option<&[T]> {
        T::slice_of(self)
    }

    /// Append all of `other`, converting to this buffer's type
    pub fn extend_from(&mut self, other: &ArrayData) {
        self.extend_range(other, 0..other.len());
    }

    /// Append `other[range]`, converting to this buffer's type
    pub fn extend_range(&mut self, other: &ArrayData, range: std::ops::Range<usize>) {
        dispatch!(self, dst => dispatch!(other, src => extend_cast(dst, &src[range])))
    }

    pub fn cast(&self, dtype: DataType) -> ArrayData {
        if self.dtype() == dtype {
            return self.clone();
        }
        let mut out = ArrayData::with_capacity(dtype, self.len());
        out.extend_from(self);
        out
    }

    /// Gather by already-validated positions
    pub fn take(&self, positions: &[usize]) -> ArrayData {
        map_data!(self, values => positions.iter().map(|&p| values[p]).collect())
    }

    /// Gather where `None` produces `fill` converted to the element type
    pub fn take_filled(&self, positions: &[Option<usize>], fill: f64) -> ArrayData {
        map_data!(self, values => positions
            .iter()
            .map(|p| p.map_or_else(|| MatrixElement::from_f64(fill), |i| values[i]))
            .collect())
    }

    /// Dense buffer of `len` zeros with this buffer's values written at `targets`
    pub fn scatter(&self, len: usize, targets: &[usize]) -> ArrayData {
        map_data!(self, values => {
            let mut out = vec![bytemuck::Zeroable::zeroed(); len];
            for (value, &target) in values.iter().zip(targets) {
                out[target] = *value;
            }
            out
        })
    }

    /// Positions holding a value other than zero
    pub fn nonzero_positions(&self) -> Vec<usize> {
        dispatch!(self, values => values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| (v.to_f64() != 0.0).then_some(i))
            .collect())
    }

    /// Payload bytes in host byte order
    pub fn as_bytes(&self) -> &[u8] {
        dispatch!(self, values => bytemuck::cast_slice(values.as_slice()))
    }

    /// Decode a payload written in host byte order
    pub fn from_bytes(dtype: DataType, bytes: &[u8]) -> Result<ArrayData> {
        Ok(match dtype {
            DataType::F32 => ArrayData::F32(pod_vec(bytes)?),
            DataType::F64 => ArrayData::F64(pod_vec(bytes)?),
            DataType::I32 => ArrayData::I32(pod_vec(bytes)?),
            DataType::I64 => ArrayData::I64(pod_vec(bytes)?),
            DataType::U32 => ArrayData::U32(pod_vec(bytes)?),
            DataType::U64 => ArrayData::U64(pod_vec(bytes)?),
        })
    }
}

pub(crate) fn u32_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    pod_vec(bytes)
}

pub(crate) fn u64_from_bytes(bytes: &[u8]) -> Result<Vec<u64>> {
    pod_vec(bytes)
}

/// Row-major dense matrix
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    nrows: usize,
    ncols: usize,
    data: ArrayData,
}

impl DenseMatrix {
    pub fn new(nrows: usize, ncols: usize, data: impl Into<ArrayData>) -> Result<Self> {
        let data = data.into();
        let expected = nrows
            .checked_mul(ncols)
            .ok_or(FormatError::ArraySizeOverflow)?;
        if data.len() != expected {
            return Err(Error::dimension("dense matrix data", expected, data.len()));
        }
        Ok(Self { nrows, ncols, data })
    }

    pub fn zeros(nrows: usize, ncols: usize, dtype: DataType) -> Self {
        Self {
            nrows,
            ncols,
            data: ArrayData::zeros(dtype, nrows * ncols),
        }
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Values of one row widened to `f64`
    pub fn row_f64(&self, row: usize) -> Vec<f64> {
        (0..self.ncols)
            .filter_map(|col| self.data.get_f64(row * self.ncols + col))
            .collect()
    }

    /// Gather rows and columns; `None` produces NaN and promotes integer types.
    pub fn gather(&self, rows: &[Option<usize>], cols: &[Option<usize>]) -> DenseMatrix {
        let positions: Vec<Option<usize>> = rows
            .iter()
            .flat_map(|row| {
                cols.iter()
                    .map(move |col| Some((*row)? * self.ncols + (*col)?))
            })
            .collect();

        let data = if positions.iter().all(Option::is_some) {
            let positions: Vec<usize> = positions.into_iter().flatten().collect();
            self.data.take(&positions)
        } else {
            self.data
                .cast(self.dtype().with_missing())
                .take_filled(&positions, f64::NAN)
        };

        DenseMatrix {
            nrows: rows.len(),
            ncols: cols.len(),
            data,
        }
    }

    fn stack(axis: Axis, parts: &[&DenseMatrix], dtype: DataType) -> Result<DenseMatrix> {
        let total: usize = parts.iter().map(|p| p.nrows * p.ncols).sum();
        let mut data = ArrayData::with_capacity(dtype, total);
        match axis {
            Axis::Rows => {
                let ncols = parts.first().map_or(0, |p| p.ncols);
                for part in parts {
                    if part.ncols != ncols {
                        return Err(Error::dimension("stacked dense columns", ncols, part.ncols));
                    }
                    data.extend_from(&part.data);
                }
                Ok(DenseMatrix {
                    nrows: parts.iter().map(|p| p.nrows).sum(),
                    ncols,
                    data,
                })
            }
            Axis::Cols => {
                let nrows = parts.first().map_or(0, |p| p.nrows);
                if let Some(bad) = parts.iter().find(|p| p.nrows != nrows) {
                    return Err(Error::dimension("stacked dense rows", nrows, bad.nrows));
                }
                for row in 0..nrows {
                    for part in parts {
                        data.extend_range(&part.data, row * part.ncols..(row + 1) * part.ncols);
                    }
                }
                Ok(DenseMatrix {
                    nrows,
                    ncols: parts.iter().map(|p| p.ncols).sum(),
                    data,
                })
            }
        }
    }
}

impl MatrixAccess for DenseMatrix {
    fn dimensions(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    fn nnz(&self) -> usize {
        self.nrows * self.ncols
    }

    fn get_f64(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        self.data.get_f64(row * self.ncols + col)
    }
}

/// Compressed sparse matrix (CSR or CSC) with sorted minor indices
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedMatrix {
    format: MatrixFormat,
    nrows: usize,
    ncols: usize,
    indptr: Vec<u64>,
    indices: Vec<u32>,
    data: ArrayData,
}

impl CompressedMatrix {
    pub fn new(
        format: MatrixFormat,
        nrows: usize,
        ncols: usize,
        indptr: Vec<u64>,
        indices: Vec<u32>,
        data: impl Into<ArrayData>,
    ) -> Result<Self> {
        let data = data.into();
        if !format.is_sparse() {
            return Err(FormatError::CorruptedData.into());
        }
        let (major, minor) = match format {
            MatrixFormat::Csc => (ncols, nrows),
            _ => (nrows, ncols),
        };
        if indptr.len() != major + 1 {
            return Err(Error::dimension("indptr", major + 1, indptr.len()));
        }
        if indices.len() != data.len() {
            return Err(Error::dimension("sparse indices", data.len(), indices.len()));
        }
        if indptr[0] != 0 || indptr[major] as usize != data.len() {
            return Err(FormatError::CorruptedData.into());
        }
        for segment in indptr.windows(2) {
            if segment[0] > segment[1] {
                return Err(FormatError::CorruptedData.into());
            }
            let minors = &indices[segment[0] as usize..segment[1] as usize];
            if minors.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(FormatError::CorruptedData.into());
            }
            if minors.last().is_some_and(|&last| last as usize >= minor) {
                return Err(FormatError::IndexOutOfBounds.into());
            }
        }
        Ok(Self {
            format,
            nrows,
            ncols,
            indptr,
            indices,
            data,
        })
    }

    pub fn empty(format: MatrixFormat, nrows: usize, ncols: usize, dtype: DataType) -> Self {
        let major = if format == MatrixFormat::Csc { ncols } else { nrows };
        Self {
            format,
            nrows,
            ncols,
            indptr: vec![0; major + 1],
            indices: Vec::new(),
            data: ArrayData::with_capacity(dtype, 0),
        }
    }

    /// Compress a dense matrix, dropping zeros
    pub fn from_dense(dense: &DenseMatrix, format: MatrixFormat) -> Self {
        let csr_positions = dense.data.nonzero_positions();
        let mut indptr = vec![0u64; dense.nrows + 1];
        let mut indices = Vec::with_capacity(csr_positions.len());
        for &position in &csr_positions {
            indptr[position / dense.ncols + 1] += 1;
            indices.push((position % dense.ncols) as u32);
        }
        for row in 0..dense.nrows {
            indptr[row + 1] += indptr[row];
        }
        let csr = CompressedMatrix {
            format: MatrixFormat::Csr,
            nrows: dense.nrows,
            ncols: dense.ncols,
            indptr,
            indices,
            data: dense.data.take(&csr_positions),
        };
        match format {
            MatrixFormat::Csc => csr.to_format(MatrixFormat::Csc),
            _ => csr,
        }
    }

    pub fn format(&self) -> MatrixFormat {
        self.format
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn indptr(&self) -> &[u64] {
        &self.indptr
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    fn major_len(&self) -> usize {
        self.indptr.len() - 1
    }

    fn minor_len(&self) -> usize {
        match self.format {
            MatrixFormat::Csc => self.nrows,
            _ => self.ncols,
        }
    }

    fn segment(&self, major: usize) -> std::ops::Range<usize> {
        self.indptr[major] as usize..self.indptr[major + 1] as usize
    }

    /// Gather rows and columns; `None` positions hold implicit zeros.
    pub fn gather(&self, rows: &[Option<usize>], cols: &[Option<usize>]) -> CompressedMatrix {
        let (majors, minors) = match self.format {
            MatrixFormat::Csc => (cols, rows),
            _ => (rows, cols),
        };

        let identity = minors.len() == self.minor_len()
            && minors.iter().enumerate().all(|(i, m)| *m == Some(i));
        let remap: Vec<Vec<u32>> = if identity {
            Vec::new()
        } else {
            let mut remap = vec![Vec::new(); self.minor_len()];
            for (new, old) in minors.iter().enumerate() {
                if let Some(old) = old {
                    remap[*old].push(new as u32);
                }
            }
            remap
        };

        let mut indptr = Vec::with_capacity(majors.len() + 1);
        indptr.push(0u64);
        let mut indices = Vec::new();
        let mut sources = Vec::new();
        let mut entries: Vec<(u32, usize)> = Vec::new();

        for major in majors {
            if let Some(major) = major {
                let segment = self.segment(*major);
                if identity {
                    indices.extend_from_slice(&self.indices[segment.clone()]);
                    sources.extend(segment);
                } else {
                    entries.clear();
                    for source in segment {
                        let old = self.indices[source] as usize;
                        entries.extend(remap[old].iter().map(|&new| (new, source)));
                    }
                    entries.sort_unstable_by_key(|&(new, _)| new);
                    indices.extend(entries.iter().map(|&(new, _)| new));
                    sources.extend(entries.iter().map(|&(_, source)| source));
                }
            }
            indptr.push(indices.len() as u64);
        }

        CompressedMatrix {
            format: self.format,
            nrows: rows.len(),
            ncols: cols.len(),
            indptr,
            indices,
            data: self.data.take(&sources),
        }
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut targets = Vec::with_capacity(self.indices.len());
        for major in 0..self.major_len() {
            for source in self.segment(major) {
                let minor = self.indices[source] as usize;
                targets.push(match self.format {
                    MatrixFormat::Csc => minor * self.ncols + major,
                    _ => major * self.ncols + minor,
                });
            }
        }
        DenseMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            data: self.data.scatter(self.nrows * self.ncols, &targets),
        }
    }

    /// Convert between CSR and CSC with a counting transpose
    pub fn to_format(&self, format: MatrixFormat) -> CompressedMatrix {
        if format == self.format || !format.is_sparse() {
            return self.clone();
        }
        let new_major = self.minor_len();
        let mut indptr = vec![0u64; new_major + 1];
        for &minor in &self.indices {
            indptr[minor as usize + 1] += 1;
        }
        for i in 0..new_major {
            indptr[i + 1] += indptr[i];
        }
        let mut cursor: Vec<u64> = indptr[..new_major].to_vec();
        let mut indices = vec![0u32; self.indices.len()];
        let mut sources = vec![0usize; self.indices.len()];
        for major in 0..self.major_len() {
            for source in self.segment(major) {
                let minor = self.indices[source] as usize;
                let slot = cursor[minor] as usize;
                cursor[minor] += 1;
                indices[slot] = major as u32;
                sources[slot] = source;
            }
        }
        CompressedMatrix {
            format,
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            data: self.data.take(&sources),
        }
    }

    fn stack(axis: Axis, parts: &[CompressedMatrix], dtype: DataType) -> Result<CompressedMatrix> {
        let format = match axis {
            Axis::Rows => MatrixFormat::Csr,
            Axis::Cols => MatrixFormat::Csc,
        };
        let minor = parts.first().map_or(0, |p| p.minor_len());
        let nnz: usize = parts.iter().map(|p| p.indices.len()).sum();
        let mut indptr = vec![0u64];
        let mut indices = Vec::with_capacity(nnz);
        let mut data = ArrayData::with_capacity(dtype, nnz);
        for part in parts {
            debug_assert_eq!(part.format, format);
            if part.minor_len() != minor {
                return Err(Error::dimension("stacked sparse minor axis", minor, part.minor_len()));
            }
            let offset = indices.len() as u64;
            indptr.extend(part.indptr[1..].iter().map(|p| p + offset));
            indices.extend_from_slice(&part.indices);
            data.extend_from(&part.data);
        }
        let major: usize = parts.iter().map(|p| p.major_len()).sum();
        let (nrows, ncols) = match axis {
            Axis::Rows => (major, minor),
            Axis::Cols => (minor, major),
        };
        Ok(CompressedMatrix {
            format,
            nrows,
            ncols,
            indptr,
            indices,
            data,
        })
    }
}

impl MatrixAccess for CompressedMatrix {
    fn dimensions(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    fn nnz(&self) -> usize {
        self.indices.len()
    }

    fn get_f64(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        let (major, minor) = match self.format {
            MatrixFormat::Csc => (col, row),
            _ => (row, col),
        };
        let segment = self.segment(major);
        match self.indices[segment.clone()].binary_search(&(minor as u32)) {
            Ok(offset) => self.data.get_f64(segment.start + offset),
            Err(_) => Some(0.0),
        }
    }
}

/// In-memory matrix in any supported layout
#[derive(Debug, Clone, PartialEq)]
pub enum Matrix {
    Dense(DenseMatrix),
    Sparse(CompressedMatrix),
}

impl From<DenseMatrix> for Matrix {
    fn from(matrix: DenseMatrix) -> Self {
        Matrix::Dense(matrix)
    }
}

impl From<CompressedMatrix> for Matrix {
    fn from(matrix: CompressedMatrix) -> Self {
        Matrix::Sparse(matrix)
    }
}

impl MatrixAccess for Matrix {
    fn dimensions(&self) -> (usize, usize) {
        match self {
            Matrix::Dense(m) => m.dimensions(),
            Matrix::Sparse(m) => m.dimensions(),
        }
    }

    fn nnz(&self) -> usize {
        match self {
            Matrix::Dense(m) => m.nnz(),
            Matrix::Sparse(m) => m.nnz(),
        }
    }

    fn get_f64(&self, row: usize, col: usize) -> Option<f64> {
        match self {
            Matrix::Dense(m) => m.get_f64(row, col),
            Matrix::Sparse(m) => m.get_f64(row, col),
        }
    }
}

impl Matrix {
    pub fn shape(&self) -> (usize, usize) {
        self.dimensions()
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Matrix::Dense(m) => m.dtype(),
            Matrix::Sparse(m) => m.dtype(),
        }
    }

    pub fn format(&self) -> MatrixFormat {
        match self {
            Matrix::Dense(_) => MatrixFormat::Dense,
            Matrix::Sparse(m) => m.format(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Matrix::Sparse(_))
    }

    /// Select by already-validated positions, keeping order and duplicates
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> Matrix {
        let rows: Vec<Option<usize>> = rows.iter().copied().map(Some).collect();
        let cols: Vec<Option<usize>> = cols.iter().copied().map(Some).collect();
        self.reindex(&rows, &cols)
    }

    /// Gather positions where `None` is filled with the missing sentinel:
    /// an implicit zero for sparse matrices, NaN for dense ones.
    pub fn reindex(&self, rows: &[Option<usize>], cols: &[Option<usize>]) -> Matrix {
        match self {
            Matrix::Dense(m) => Matrix::Dense(m.gather(rows, cols)),
            Matrix::Sparse(m) => Matrix::Sparse(m.gather(rows, cols)),
        }
    }

    pub fn cast(&self, dtype: DataType) -> Matrix {
        if self.dtype() == dtype {
            return self.clone();
        }
        match self {
            Matrix::Dense(m) => Matrix::Dense(DenseMatrix {
                nrows: m.nrows,
                ncols: m.ncols,
                data: m.data.cast(dtype),
            }),
            Matrix::Sparse(m) => Matrix::Sparse(CompressedMatrix {
                data: m.data.cast(dtype),
                ..m.clone()
            }),
        }
    }

    pub fn to_dense(&self) -> DenseMatrix {
        match self {
            Matrix::Dense(m) => m.clone(),
            Matrix::Sparse(m) => m.to_dense(),
        }
    }

    pub fn into_dense(self) -> DenseMatrix {
        match self {
            Matrix::Dense(m) => m,
            Matrix::Sparse(m) => m.to_dense(),
        }
    }

    pub fn to_format(&self, format: MatrixFormat) -> Matrix {
        match (self, format) {
            (Matrix::Dense(_), MatrixFormat::Dense) => self.clone(),
            (Matrix::Sparse(m), MatrixFormat::Dense) => Matrix::Dense(m.to_dense()),
            (Matrix::Dense(m), sparse) => Matrix::Sparse(CompressedMatrix::from_dense(m, sparse)),
            (Matrix::Sparse(m), sparse) => Matrix::Sparse(m.to_format(sparse)),
        }
    }

    /// Concatenate along `axis`.
    ///
    /// Any dense part makes the result dense; an all-sparse stack is CSR
    /// when stacking rows and CSC when stacking columns. The element type is
    /// the promotion of every part's type.
    pub fn stack(axis: Axis, parts: &[&Matrix]) -> Result<Matrix> {
        let Some(first) = parts.first() else {
            return Err(Error::EmptyInput);
        };
        let dtype = parts
            .iter()
            .skip(1)
            .fold(first.dtype(), |dtype, part| dtype.promote(part.dtype()));

        if parts.iter().all(|part| part.is_sparse()) {
            let format = match axis {
                Axis::Rows => MatrixFormat::Csr,
                Axis::Cols => MatrixFormat::Csc,
            };
            let converted: Vec<CompressedMatrix> = parts
                .iter()
                .filter_map(|part| match part.to_format(format) {
                    Matrix::Sparse(m) => Some(m),
                    Matrix::Dense(_) => None,
                })
                .collect();
            CompressedMatrix::stack(axis, &converted, dtype).map(Matrix::Sparse)
        } else {
            let dense: Vec<DenseMatrix> = parts.iter().map(|part| part.to_dense()).collect();
            let refs: Vec<&DenseMatrix> = dense.iter().collect();
            DenseMatrix::stack(axis, &refs, dtype).map(Matrix::Dense)
        }
    }

    /// Sum collapsing `axis`: `Axis::Rows` yields one value per column,
    /// `Axis::Cols` one value per row.
    pub fn sum_axis(&self, axis: Axis) -> Vec<f64> {
        let (nrows, ncols) = self.shape();
        let mut sums = vec![0.0; axis.other().len_of((nrows, ncols))];
        let mut add = |row: usize, col: usize, value: f64| match axis {
            Axis::Rows => sums[col] += value,
            Axis::Cols => sums[row] += value,
        };
        match self {
            Matrix::Dense(m) => {
                let values = m.data.to_f64_vec();
                for (position, value) in values.into_iter().enumerate() {
                    add(position / ncols, position % ncols, value);
                }
            }
            Matrix::Sparse(m) => {
                for major in 0..m.major_len() {
                    for source in m.segment(major) {
                        let minor = m.indices[source] as usize;
                        let value = m.data.get_f64(source).unwrap_or(0.0);
                        match m.format {
                            MatrixFormat::Csc => add(minor, major, value),
                            _ => add(major, minor, value),
                        }
                    }
                }
            }
        }
        sums
    }

    /// Extend in place by the rows of `other`.
    ///
    /// Dense matrices need equal column counts. CSR matrices grow their
    /// column count to the wider of the two. Other layouts are rejected.
    pub fn append_rows(&mut self, other: &Matrix) -> Result<()> {
        match (self, other) {
            (Matrix::Dense(left), Matrix::Dense(right)) => {
                if left.ncols != right.ncols {
                    return Err(Error::dimension("appended dense columns", left.ncols, right.ncols));
                }
                left.data.extend_from(&right.data);
                left.nrows += right.nrows;
                Ok(())
            }
            (Matrix::Sparse(left), Matrix::Sparse(right))
                if left.format == MatrixFormat::Csr && right.format == MatrixFormat::Csr =>
            {
                let offset = left.indices.len() as u64;
                left.indptr.extend(right.indptr[1..].iter().map(|p| p + offset));
                left.indices.extend_from_slice(&right.indices);
                left.data.extend_from(&right.data);
                left.nrows += right.nrows;
                left.ncols = left.ncols.max(right.ncols);
                Ok(())
            }
            (left, right) => Err(Error::AxisMismatch(format!(
                "cannot append {} rows to a {} matrix",
                right.format(),
                left.format()
            ))),
        }
    }
}

/// Storage behind a container element: loaded or still on disk
#[derive(Debug, Clone)]
pub enum Storage {
    InMemory(Matrix),
    Backed(BackedArray),
}

impl From<Matrix> for Storage {
    fn from(matrix: Matrix) -> Self {
        Storage::InMemory(matrix)
    }
}

impl From<DenseMatrix> for Storage {
    fn from(matrix: DenseMatrix) -> Self {
        Storage::InMemory(matrix.into())
    }
}

impl From<CompressedMatrix> for Storage {
    fn from(matrix: CompressedMatrix) -> Self {
        Storage::InMemory(matrix.into())
    }
}

impl From<BackedArray> for Storage {
    fn from(array: BackedArray) -> Self {
        Storage::Backed(array)
    }
}

impl Storage {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Storage::InMemory(m) => m.shape(),
            Storage::Backed(b) => b.shape(),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Storage::InMemory(m) => m.dtype(),
            Storage::Backed(b) => b.dtype(),
        }
    }

    pub fn format(&self) -> MatrixFormat {
        match self {
            Storage::InMemory(m) => m.format(),
            Storage::Backed(b) => b.format(),
        }
    }

    pub fn is_backed(&self) -> bool {
        matches!(self, Storage::Backed(_))
    }

    /// Read the selected region into memory
    pub fn read(&self, rows: &[usize], cols: &[usize], options: &ReadOptions) -> Result<Matrix> {
        match self {
            Storage::InMemory(m) => Ok(m.select(rows, cols)),
            Storage::Backed(b) => b.read(rows, cols, options),
        }
    }

    pub fn read_all(&self, options: &ReadOptions) -> Result<Matrix> {
        match self {
            Storage::InMemory(m) => Ok(m.clone()),
            Storage::Backed(b) => b.read_all(options),
        }
    }

    /// Per-column (`Axis::Rows`) or per-row (`Axis::Cols`) sums of the
    /// selected region, read chunk by chunk for backed storage
    pub fn sum_axis(
        &self,
        axis: Axis,
        rows: &[usize],
        cols: &[usize],
        options: &ReadOptions,
    ) -> Result<Vec<f64>> {
        match self {
            Storage::InMemory(m) => Ok(m.select(rows, cols).sum_axis(axis)),
            Storage::Backed(b) => b.sum_axis(axis, rows, cols, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_3x3() -> DenseMatrix {
        DenseMatrix::new(3, 3, vec![1.0f64, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0, 5.0]).unwrap()
    }

    fn values(matrix: &Matrix) -> Vec<f64> {
        let (r, c) = matrix.shape();
        (0..r)
            .flat_map(|row| (0..c).map(move |col| (row, col)))
            .map(|(row, col)| matrix.get_f64(row, col).unwrap())
            .collect()
    }

    #[test]
    fn test_dense_new_checks_length() {
        assert!(matches!(
            DenseMatrix::new(2, 2, vec![1i32, 2, 3]),
            Err(Error::DimensionMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_select_order_and_duplicates() {
        let m = Matrix::Dense(dense_3x3());
        let picked = m.select(&[2, 0, 2], &[2, 0]);
        assert_eq!(picked.shape(), (3, 2));
        assert_eq!(values(&picked), vec![5.0, 4.0, 2.0, 1.0, 5.0, 4.0]);

        for format in [MatrixFormat::Csr, MatrixFormat::Csc] {
            let sparse = m.to_format(format);
            let picked_sparse = sparse.select(&[2, 0, 2], &[2, 0]);
            assert_eq!(picked_sparse.format(), format);
            assert_eq!(values(&picked_sparse), values(&picked));
        }
    }

    #[test]
    fn test_sparse_duplicate_minor_selection_stays_sorted() {
        let csr = CompressedMatrix::from_dense(&dense_3x3(), MatrixFormat::Csr);
        let picked = csr.gather(&[Some(0)], &[Some(2), Some(0), Some(2)]);
        assert_eq!(picked.indices(), &[0, 1, 2]);
        assert_eq!(picked.data().to_f64_vec(), vec![2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_format_roundtrip() {
        let dense = dense_3x3();
        let csr = CompressedMatrix::from_dense(&dense, MatrixFormat::Csr);
        assert_eq!(csr.nnz(), 5);
        let csc = csr.to_format(MatrixFormat::Csc);
        assert_eq!(csc.indptr(), &[0, 2, 3, 5]);
        assert_eq!(csc.to_dense(), dense);
        assert_eq!(csr.to_dense(), dense);
    }

    #[test]
    fn test_compressed_validation() {
        let bad_ptr = CompressedMatrix::new(MatrixFormat::Csr, 2, 2, vec![0, 1], vec![0], vec![1.0f32]);
        assert!(matches!(bad_ptr, Err(Error::DimensionMismatch { .. })));
        let unsorted =
            CompressedMatrix::new(MatrixFormat::Csr, 1, 3, vec![0, 2], vec![2, 1], vec![1.0f32, 2.0]);
        assert!(matches!(unsorted, Err(Error::Format(FormatError::CorruptedData))));
        let out_of_range =
            CompressedMatrix::new(MatrixFormat::Csr, 1, 2, vec![0, 1], vec![5], vec![1.0f32]);
        assert!(matches!(out_of_range, Err(Error::Format(FormatError::IndexOutOfBounds))));
    }

    #[test]
    fn test_reindex_fills_missing() {
        let ints = Matrix::Dense(DenseMatrix::new(1, 2, vec![7i32, 8]).unwrap());
        let filled = ints.reindex(&[Some(0)], &[Some(1), None, Some(0)]);
        assert_eq!(filled.dtype(), DataType::F64);
        assert_eq!(filled.get_f64(0, 0), Some(8.0));
        assert!(filled.get_f64(0, 1).unwrap().is_nan());

        let sparse = ints.to_format(MatrixFormat::Csr);
        let filled = sparse.reindex(&[Some(0), None], &[None, Some(0)]);
        assert_eq!(filled.dtype(), DataType::I32);
        assert_eq!(values(&filled), vec![0.0, 7.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stack_rules() {
        let dense = Matrix::Dense(DenseMatrix::new(1, 2, vec![1i32, 2]).unwrap());
        let sparse = Matrix::Dense(DenseMatrix::new(1, 2, vec![0.5f32, 0.0]).unwrap())
            .to_format(MatrixFormat::Csc);

        let mixed = Matrix::stack(Axis::Rows, &[&dense, &sparse]).unwrap();
        assert_eq!(mixed.format(), MatrixFormat::Dense);
        assert_eq!(mixed.dtype(), DataType::F64);
        assert_eq!(values(&mixed), vec![1.0, 2.0, 0.5, 0.0]);

        let sparse_rows = Matrix::stack(Axis::Rows, &[&sparse, &sparse]).unwrap();
        assert_eq!(sparse_rows.format(), MatrixFormat::Csr);
        assert_eq!(sparse_rows.shape(), (2, 2));

        let sparse_cols = Matrix::stack(Axis::Cols, &[&sparse, &dense.to_format(MatrixFormat::Csr)]).unwrap();
        assert_eq!(sparse_cols.format(), MatrixFormat::Csc);
        assert_eq!(values(&sparse_cols), vec![0.5, 0.0, 1.0, 2.0]);

        let dense_cols = Matrix::stack(Axis::Cols, &[&dense, &dense]).unwrap();
        assert_eq!(values(&dense_cols), vec![1.0, 2.0, 1.0, 2.0]);

        let wide = Matrix::Dense(DenseMatrix::zeros(1, 3, DataType::F32));
        assert!(matches!(
            Matrix::stack(Axis::Rows, &[&dense, &wide]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_sum_axis() {
        let m = Matrix::Dense(dense_3x3());
        assert_eq!(m.sum_axis(Axis::Rows), vec![5.0, 3.0, 7.0]);
        assert_eq!(m.sum_axis(Axis::Cols), vec![3.0, 3.0, 9.0]);
        let csc = m.to_format(MatrixFormat::Csc);
        assert_eq!(csc.sum_axis(Axis::Rows), vec![5.0, 3.0, 7.0]);
    }

    #[test]
    fn test_append_rows() {
        let mut left = Matrix::Dense(DenseMatrix::new(1, 2, vec![1.0f64, 0.0]).unwrap())
            .to_format(MatrixFormat::Csr);
        let right = Matrix::Dense(DenseMatrix::new(1, 3, vec![0.0f64, 0.0, 9.0]).unwrap())
            .to_format(MatrixFormat::Csr);
        left.append_rows(&right).unwrap();
        assert_eq!(left.shape(), (2, 3));
        assert_eq!(left.get_f64(1, 2), Some(9.0));

        let mut csc = right.to_format(MatrixFormat::Csc);
        assert!(matches!(csc.append_rows(&right), Err(Error::AxisMismatch(_))));
    }

    #[test]
    fn test_bytes_roundtrip_unaligned() {
        let data = ArrayData::from(vec![1u64, 2, 3]);
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(data.as_bytes());
        let decoded = ArrayData::from_bytes(DataType::U64, &shifted[1..]).unwrap();
        assert_eq!(decoded, data);
        assert!(ArrayData::from_bytes(DataType::U64, &shifted[..5]).is_err());
    }
}
