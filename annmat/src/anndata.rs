//! The annotated matrix container
//!
//! An [`AnnData`] is either an owned container or a view. Owned containers
//! share their state through an `Arc` and copy it on first write. A view
//! holds only the root state plus the selected root positions; reads go
//! through the selection and mutations promote the view first (see
//! [`AnnData::materialize`]).

use crate::axis::{Axis, AxisIndex, Rename};
use crate::backed::{BackedFile, ReadOptions};
use crate::error::{Error, Result};
use crate::storage::{Matrix, Storage};
use crate::table::{Column, Table};
use annmat_core::{DataType, MatrixFormat};
use log::warn;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an owned container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    pub(crate) fn next() -> Self {
        ContainerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Every element of one owned container
#[derive(Debug, Clone, Default)]
pub(crate) struct Inner {
    pub x: Option<Storage>,
    pub layers: BTreeMap<String, Storage>,
    pub obs: Table,
    pub var: Table,
    pub obsm: BTreeMap<String, Matrix>,
    pub varm: BTreeMap<String, Matrix>,
    pub uns: Map<String, Value>,
}

impl Inner {
    pub fn shape(&self) -> (usize, usize) {
        (self.obs.n_rows(), self.var.n_rows())
    }

    /// Internal shape invariant; a failure is a bug in this crate
    pub fn assert_consistent(&self) {
        let shape = self.shape();
        if let Some(x) = &self.x {
            assert_eq!(x.shape(), shape, "X shape disagrees with obs/var");
        }
        for (name, layer) in &self.layers {
            assert_eq!(layer.shape(), shape, "layer `{name}` shape disagrees with X");
        }
        for (name, m) in &self.obsm {
            assert_eq!(m.shape().0, shape.0, "obsm `{name}` rows disagree with obs");
        }
        for (name, m) in &self.varm {
            assert_eq!(m.shape().0, shape.1, "varm `{name}` rows disagree with var");
        }
    }
}

/// Root state plus root positions selected on each axis
#[derive(Debug, Clone)]
pub(crate) struct ViewState {
    pub root: Arc<Inner>,
    pub root_id: ContainerId,
    pub rows: Arc<[usize]>,
    pub cols: Arc<[usize]>,
}

#[derive(Debug)]
pub(crate) enum Repr {
    Owned { id: ContainerId, inner: Arc<Inner> },
    View(ViewState),
}

/// Annotated two-dimensional matrix with axis-aligned metadata
pub struct AnnData {
    pub(crate) repr: Repr,
    pub(crate) read_options: ReadOptions,
}

impl Clone for AnnData {
    /// Clones of owned containers get a new identity and share state until
    /// either side writes
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Owned { inner, .. } => Repr::Owned {
                id: ContainerId::next(),
                inner: Arc::clone(inner),
            },
            Repr::View(view) => Repr::View(view.clone()),
        };
        Self {
            repr,
            read_options: self.read_options.clone(),
        }
    }
}

impl fmt::Debug for AnnData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n_obs, n_vars) = self.shape();
        f.debug_struct("AnnData")
            .field("n_obs", &n_obs)
            .field("n_vars", &n_vars)
            .field("is_view", &self.is_view())
            .field("is_backed", &self.is_backed())
            .field("layers", &self.layer_names())
            .finish()
    }
}

fn warn_duplicates(axis: &str, index: &AxisIndex) {
    if index.has_duplicates() {
        warn!(
            "{axis} names are not unique ({} duplicated); label lookups resolve to first occurrences",
            index.duplicated().len()
        );
    }
}

impl AnnData {
    /// Container over `x` with the given axis tables
    pub fn new(x: impl Into<Storage>, obs: Table, var: Table) -> Result<Self> {
        let x = x.into();
        let (rows, cols) = x.shape();
        if obs.n_rows() != rows {
            return Err(Error::dimension("obs rows vs X rows", rows, obs.n_rows()));
        }
        if var.n_rows() != cols {
            return Err(Error::dimension("var rows vs X columns", cols, var.n_rows()));
        }
        Ok(Self::from_inner(Inner {
            x: Some(x),
            obs,
            var,
            ..Inner::default()
        }))
    }

    /// Container over `x` with positional labels on both axes
    pub fn from_matrix(x: impl Into<Storage>) -> Self {
        let x = x.into();
        let (rows, cols) = x.shape();
        Self::from_inner(Inner {
            x: Some(x),
            obs: Table::new(AxisIndex::default_labels(rows)),
            var: Table::new(AxisIndex::default_labels(cols)),
            ..Inner::default()
        })
    }

    /// Container with labelled axes and no primary matrix
    pub fn without_x(obs: Table, var: Table) -> Self {
        Self::from_inner(Inner {
            obs,
            var,
            ..Inner::default()
        })
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        inner.assert_consistent();
        warn_duplicates("obs", inner.obs.index());
        warn_duplicates("var", inner.var.index());
        Self {
            repr: Repr::Owned {
                id: ContainerId::next(),
                inner: Arc::new(inner),
            },
            read_options: ReadOptions::default(),
        }
    }

    pub fn with_layer(mut self, name: impl Into<String>, layer: impl Into<Storage>) -> Result<Self> {
        self.set_layer(name, layer)?;
        Ok(self)
    }

    pub fn with_obsm(mut self, name: impl Into<String>, value: impl Into<Matrix>) -> Result<Self> {
        self.set_obsm(name, value)?;
        Ok(self)
    }

    pub fn with_varm(mut self, name: impl Into<String>, value: impl Into<Matrix>) -> Result<Self> {
        self.set_varm(name, value)?;
        Ok(self)
    }

    pub fn with_uns(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.uns_mut()?.insert(key.into(), value.into());
        Ok(self)
    }

    pub fn with_read_options(mut self, options: ReadOptions) -> Self {
        self.read_options = options;
        self
    }

    // ----- reads -----

    pub(crate) fn root(&self) -> &Inner {
        match &self.repr {
            Repr::Owned { inner, .. } => inner,
            Repr::View(view) => &view.root,
        }
    }

    /// Selected root positions, `None` for owned containers
    pub fn selection(&self) -> Option<(&[usize], &[usize])> {
        match &self.repr {
            Repr::Owned { .. } => None,
            Repr::View(view) => Some((&view.rows[..], &view.cols[..])),
        }
    }

    /// Positions to read from the root on each axis
    pub(crate) fn positions(&self) -> (Cow<'_, [usize]>, Cow<'_, [usize]>) {
        match &self.repr {
            Repr::Owned { inner, .. } => {
                let (rows, cols) = inner.shape();
                (Cow::Owned((0..rows).collect()), Cow::Owned((0..cols).collect()))
            }
            Repr::View(view) => (Cow::Borrowed(&view.rows[..]), Cow::Borrowed(&view.cols[..])),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match &self.repr {
            Repr::Owned { inner, .. } => inner.shape(),
            Repr::View(view) => (view.rows.len(), view.cols.len()),
        }
    }

    pub fn n_obs(&self) -> usize {
        self.shape().0
    }

    pub fn n_vars(&self) -> usize {
        self.shape().1
    }

    pub fn is_view(&self) -> bool {
        matches!(self.repr, Repr::View(_))
    }

    /// Whether the primary matrix still lives on disk
    pub fn is_backed(&self) -> bool {
        self.root().x.as_ref().is_some_and(Storage::is_backed)
    }

    /// Identity of an owned container, `None` for views
    pub fn id(&self) -> Option<ContainerId> {
        match &self.repr {
            Repr::Owned { id, .. } => Some(*id),
            Repr::View(_) => None,
        }
    }

    /// Identity of the root container a view reads from
    pub fn parent_id(&self) -> Option<ContainerId> {
        match &self.repr {
            Repr::Owned { .. } => None,
            Repr::View(view) => Some(view.root_id),
        }
    }

    pub fn read_options(&self) -> &ReadOptions {
        &self.read_options
    }

    pub fn set_read_options(&mut self, options: ReadOptions) {
        self.read_options = options;
    }

    pub fn obs(&self) -> Cow<'_, Table> {
        match &self.repr {
            Repr::Owned { inner, .. } => Cow::Borrowed(&inner.obs),
            Repr::View(view) => Cow::Owned(view.root.obs.take(&view.rows)),
        }
    }

    pub fn var(&self) -> Cow<'_, Table> {
        match &self.repr {
            Repr::Owned { inner, .. } => Cow::Borrowed(&inner.var),
            Repr::View(view) => Cow::Owned(view.root.var.take(&view.cols)),
        }
    }

    pub fn obs_names(&self) -> Cow<'_, AxisIndex> {
        match &self.repr {
            Repr::Owned { inner, .. } => Cow::Borrowed(inner.obs.index()),
            Repr::View(view) => Cow::Owned(view.root.obs.index().take(&view.rows)),
        }
    }

    pub fn var_names(&self) -> Cow<'_, AxisIndex> {
        match &self.repr {
            Repr::Owned { inner, .. } => Cow::Borrowed(inner.var.index()),
            Repr::View(view) => Cow::Owned(view.root.var.index().take(&view.cols)),
        }
    }

    pub fn duplicate_obs_names(&self) -> Vec<String> {
        self.obs_names().duplicated().into_iter().map(str::to_string).collect()
    }

    pub fn duplicate_var_names(&self) -> Vec<String> {
        self.var_names().duplicated().into_iter().map(str::to_string).collect()
    }

    pub fn has_x(&self) -> bool {
        self.root().x.is_some()
    }

    /// File session X is read from, if X is backed
    pub fn backing_file(&self) -> Option<&Arc<BackedFile>> {
        match self.root().x.as_ref()? {
            Storage::Backed(array) => Some(array.file()),
            Storage::InMemory(_) => None,
        }
    }

    /// Storage format and element type of X, as stored in the root
    pub fn x_format(&self) -> Option<(MatrixFormat, DataType)> {
        self.root().x.as_ref().map(|x| (x.format(), x.dtype()))
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.root().layers.keys().map(String::as_str).collect()
    }

    pub fn obsm_names(&self) -> Vec<&str> {
        self.root().obsm.keys().map(String::as_str).collect()
    }

    pub fn varm_names(&self) -> Vec<&str> {
        self.root().varm.keys().map(String::as_str).collect()
    }

    /// Unstructured annotations; views share the root's mapping
    pub fn uns(&self) -> &Map<String, Value> {
        &self.root().uns
    }

    fn x_storage(&self) -> Result<&Storage> {
        self.root()
            .x
            .as_ref()
            .ok_or_else(|| Error::NotFound("X".into()))
    }

    fn layer_storage(&self, name: &str) -> Result<&Storage> {
        self.root()
            .layers
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("layer `{name}`")))
    }

    /// Primary matrix of this container or view, read into memory
    pub fn read_x(&self) -> Result<Matrix> {
        let storage = self.x_storage()?;
        self.read_storage(storage)
    }

    pub fn read_layer(&self, name: &str) -> Result<Matrix> {
        let storage = self.layer_storage(name)?;
        self.read_storage(storage)
    }

    pub(crate) fn read_storage(&self, storage: &Storage) -> Result<Matrix> {
        match &self.repr {
            Repr::Owned { .. } => storage.read_all(&self.read_options),
            Repr::View(view) => storage.read(&view.rows, &view.cols, &self.read_options),
        }
    }

    pub fn read_obsm(&self, name: &str) -> Result<Matrix> {
        let value = self
            .root()
            .obsm
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("obsm `{name}`")))?;
        Ok(self.slice_annotation(value, Axis::Rows))
    }

    pub fn read_varm(&self, name: &str) -> Result<Matrix> {
        let value = self
            .root()
            .varm
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("varm `{name}`")))?;
        Ok(self.slice_annotation(value, Axis::Cols))
    }

    fn slice_annotation(&self, value: &Matrix, axis: Axis) -> Matrix {
        match &self.repr {
            Repr::Owned { .. } => value.clone(),
            Repr::View(view) => {
                let positions = match axis {
                    Axis::Rows => &view.rows,
                    Axis::Cols => &view.cols,
                };
                let width: Vec<usize> = (0..value.shape().1).collect();
                value.select(positions, &width)
            }
        }
    }

    /// Sums of X collapsing `axis`, computed chunk by chunk over the
    /// selected region without materializing it
    pub fn sum_x(&self, axis: Axis) -> Result<Vec<f64>> {
        let storage = self.x_storage()?;
        let (rows, cols) = self.positions();
        storage.sum_axis(axis, &rows, &cols, &self.read_options)
    }

    // ----- mutations -----

    /// Owned state for writing: views are promoted first, shared state is
    /// copied once
    pub(crate) fn inner_mut(&mut self) -> Result<&mut Inner> {
        if self.is_view() {
            self.materialize()?;
        }
        match &mut self.repr {
            Repr::Owned { inner, .. } => Ok(Arc::make_mut(inner)),
            Repr::View(_) => unreachable!("materialize leaves an owned container"),
        }
    }

    pub fn set_x(&mut self, x: impl Into<Storage>) -> Result<()> {
        let x = x.into();
        check_shape("X", self.shape(), x.shape())?;
        self.inner_mut()?.x = Some(x);
        Ok(())
    }

    /// Mutable primary matrix, loading backed storage into memory
    pub fn x_mut(&mut self) -> Result<&mut Matrix> {
        let options = self.read_options.clone();
        let inner = self.inner_mut()?;
        let slot = inner.x.as_mut().ok_or_else(|| Error::NotFound("X".into()))?;
        load_in_place(slot, &options)
    }

    pub fn set_layer(&mut self, name: impl Into<String>, layer: impl Into<Storage>) -> Result<()> {
        let name = name.into();
        let layer = layer.into();
        check_shape(&format!("layer `{name}`"), self.shape(), layer.shape())?;
        self.inner_mut()?.layers.insert(name, layer);
        Ok(())
    }

    pub fn remove_layer(&mut self, name: &str) -> Result<Option<Storage>> {
        if !self.root().layers.contains_key(name) {
            return Ok(None);
        }
        Ok(self.inner_mut()?.layers.remove(name))
    }

    pub fn layer_mut(&mut self, name: &str) -> Result<&mut Matrix> {
        self.layer_storage(name)?;
        let options = self.read_options.clone();
        let inner = self.inner_mut()?;
        let slot = inner
            .layers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("layer `{name}`")))?;
        load_in_place(slot, &options)
    }

    pub fn set_obs_column(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let column = column.into();
        if column.len() != self.n_obs() {
            return Err(Error::dimension("obs column", self.n_obs(), column.len()));
        }
        self.inner_mut()?.obs.set_column(name, column)
    }

    pub fn set_var_column(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let column = column.into();
        if column.len() != self.n_vars() {
            return Err(Error::dimension("var column", self.n_vars(), column.len()));
        }
        self.inner_mut()?.var.set_column(name, column)
    }

    pub fn remove_obs_column(&mut self, name: &str) -> Result<Option<Column>> {
        if self.root().obs.column(name).is_none() {
            return Ok(None);
        }
        Ok(self.inner_mut()?.obs.remove_column(name))
    }

    pub fn remove_var_column(&mut self, name: &str) -> Result<Option<Column>> {
        if self.root().var.column(name).is_none() {
            return Ok(None);
        }
        Ok(self.inner_mut()?.var.remove_column(name))
    }

    pub fn set_obs_names(&mut self, names: impl Into<AxisIndex>) -> Result<()> {
        let names = names.into();
        if names.len() != self.n_obs() {
            return Err(Error::dimension("obs names", self.n_obs(), names.len()));
        }
        warn_duplicates("obs", &names);
        self.inner_mut()?.obs.set_index(names)
    }

    pub fn set_var_names(&mut self, names: impl Into<AxisIndex>) -> Result<()> {
        let names = names.into();
        if names.len() != self.n_vars() {
            return Err(Error::dimension("var names", self.n_vars(), names.len()));
        }
        warn_duplicates("var", &names);
        self.inner_mut()?.var.set_index(names)
    }

    /// Suffix duplicate observation labels; returns every rename
    pub fn obs_names_make_unique(&mut self, separator: &str) -> Result<Vec<Rename>> {
        if !self.obs_names().has_duplicates() {
            return Ok(Vec::new());
        }
        Ok(self.inner_mut()?.obs.index_mut().make_unique_in_place(separator))
    }

    /// Suffix duplicate variable labels; returns every rename
    pub fn var_names_make_unique(&mut self, separator: &str) -> Result<Vec<Rename>> {
        if !self.var_names().has_duplicates() {
            return Ok(Vec::new());
        }
        Ok(self.inner_mut()?.var.index_mut().make_unique_in_place(separator))
    }

    pub fn set_obsm(&mut self, name: impl Into<String>, value: impl Into<Matrix>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        if value.shape().0 != self.n_obs() {
            return Err(Error::dimension(format!("obsm `{name}` rows"), self.n_obs(), value.shape().0));
        }
        self.inner_mut()?.obsm.insert(name, value);
        Ok(())
    }

    pub fn set_varm(&mut self, name: impl Into<String>, value: impl Into<Matrix>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        if value.shape().0 != self.n_vars() {
            return Err(Error::dimension(format!("varm `{name}` rows"), self.n_vars(), value.shape().0));
        }
        self.inner_mut()?.varm.insert(name, value);
        Ok(())
    }

    pub fn remove_obsm(&mut self, name: &str) -> Result<Option<Matrix>> {
        if !self.root().obsm.contains_key(name) {
            return Ok(None);
        }
        Ok(self.inner_mut()?.obsm.remove(name))
    }

    pub fn remove_varm(&mut self, name: &str) -> Result<Option<Matrix>> {
        if !self.root().varm.contains_key(name) {
            return Ok(None);
        }
        Ok(self.inner_mut()?.varm.remove(name))
    }

    pub fn uns_mut(&mut self) -> Result<&mut Map<String, Value>> {
        Ok(&mut self.inner_mut()?.uns)
    }
}

fn check_shape(context: &str, expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
    if expected.0 != actual.0 {
        return Err(Error::dimension(format!("{context} rows"), expected.0, actual.0));
    }
    if expected.1 != actual.1 {
        return Err(Error::dimension(format!("{context} columns"), expected.1, actual.1));
    }
    Ok(())
}

fn load_in_place<'a>(slot: &'a mut Storage, options: &ReadOptions) -> Result<&'a mut Matrix> {
    if let Storage::Backed(backed) = slot {
        let loaded = backed.read_all(options)?;
        *slot = Storage::InMemory(loaded);
    }
    match slot {
        Storage::InMemory(matrix) => Ok(matrix),
        Storage::Backed(_) => unreachable!("backed storage replaced above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DenseMatrix;
    use annmat_core::MatrixAccess;

    fn sample() -> AnnData {
        let x = DenseMatrix::new(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let obs = Table::new(AxisIndex::new(["c1", "c2"]))
            .with_column("batch", vec!["a", "b"])
            .unwrap();
        let var = Table::new(AxisIndex::new(["g1", "g2", "g3"]));
        AnnData::new(x, obs, var).unwrap()
    }

    #[test]
    fn test_new_checks_shapes() {
        let x = DenseMatrix::zeros(2, 2, annmat_core::DataType::F64);
        let err = AnnData::new(
            x,
            Table::new(AxisIndex::default_labels(3)),
            Table::new(AxisIndex::default_labels(2)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let a = sample();
        let mut b = a.clone();
        assert_ne!(a.id(), b.id());
        b.set_obs_column("score", vec![0.5, 0.1]).unwrap();
        assert!(a.obs().column("score").is_none());
        assert!(b.obs().column("score").is_some());
    }

    #[test]
    fn test_layers_and_annotations() {
        let mut a = sample();
        let layer = DenseMatrix::zeros(2, 3, annmat_core::DataType::I32);
        a.set_layer("counts", layer).unwrap();
        assert_eq!(a.layer_names(), vec!["counts"]);
        assert!(matches!(
            a.set_layer("bad", DenseMatrix::zeros(2, 2, annmat_core::DataType::I32)),
            Err(Error::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
        assert!(matches!(a.read_layer("missing"), Err(Error::NotFound(_))));

        a.set_obsm("pca", DenseMatrix::zeros(2, 5, annmat_core::DataType::F32)).unwrap();
        assert!(a.set_varm("loadings", DenseMatrix::zeros(2, 5, annmat_core::DataType::F32)).is_err());
        a.uns_mut().unwrap().insert("title".into(), Value::from("demo"));
        assert_eq!(a.uns()["title"], "demo");

        a.x_mut().unwrap();
        assert_eq!(a.read_x().unwrap().get_f64(1, 2), Some(6.0));
    }

    #[test]
    fn test_make_unique_reports_renames() {
        let x = DenseMatrix::zeros(3, 1, annmat_core::DataType::F32);
        let mut a = AnnData::new(
            x,
            Table::new(AxisIndex::new(["a", "a", "b"])),
            Table::new(AxisIndex::default_labels(1)),
        )
        .unwrap();
        assert_eq!(a.duplicate_obs_names(), vec!["a".to_string()]);
        let renamed = a.obs_names_make_unique("-").unwrap();
        assert_eq!(renamed.len(), 1);
        assert_eq!(a.obs_names().labels(), &["a", "a-1", "b"]);
        assert!(a.duplicate_obs_names().is_empty());
    }

    #[test]
    fn test_sum_x() {
        let a = sample();
        assert_eq!(a.sum_x(Axis::Rows).unwrap(), vec![5.0, 7.0, 9.0]);
        assert_eq!(a.sum_x(Axis::Cols).unwrap(), vec![6.0, 15.0]);
    }
}
