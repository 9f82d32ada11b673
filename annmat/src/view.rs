//! Lazy selection over containers
//!
//! A view records root positions only. Selecting from a view composes the
//! new positions with the existing ones, so every view reads straight from
//! the root no matter how deeply selections are chained.

use crate::anndata::{AnnData, ContainerId, Inner, Repr, ViewState};
use crate::axis::Selector;
use crate::backed::ReadOptions;
use crate::error::Result;
use crate::storage::{Matrix, Storage};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

fn annotations(
    source: &BTreeMap<String, Matrix>,
    positions: &[usize],
) -> BTreeMap<String, Matrix> {
    source
        .iter()
        .map(|(name, value)| {
            let width: Vec<usize> = (0..value.shape().1).collect();
            (name.clone(), value.select(positions, &width))
        })
        .collect()
}

/// Owned in-memory state for `rows × cols` of `root`
fn build_inner(root: &Inner, rows: &[usize], cols: &[usize], options: &ReadOptions) -> Result<Inner> {
    let x = match &root.x {
        Some(storage) => Some(Storage::InMemory(storage.read(rows, cols, options)?)),
        None => None,
    };
    let layers = root
        .layers
        .iter()
        .map(|(name, storage)| Ok((name.clone(), Storage::InMemory(storage.read(rows, cols, options)?))))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(Inner {
        x,
        layers,
        obs: root.obs.take(rows),
        var: root.var.take(cols),
        obsm: annotations(&root.obsm, rows),
        varm: annotations(&root.varm, cols),
        uns: root.uns.clone(),
    })
}

impl AnnData {
    /// Lazy view of the selected observations and variables.
    ///
    /// Selectors resolve against this container's own axes. Nothing is
    /// copied; the view keeps the root alive and reads through it.
    pub fn select(&self, rows: impl Into<Selector>, cols: impl Into<Selector>) -> Result<AnnData> {
        let rows = rows.into();
        let cols = cols.into();
        let local_rows = self.obs_names().resolve(&rows)?;
        let local_cols = self.var_names().resolve(&cols)?;

        let view = match &self.repr {
            Repr::Owned { id, inner } => ViewState {
                root: Arc::clone(inner),
                root_id: *id,
                rows: Arc::from(local_rows),
                cols: Arc::from(local_cols),
            },
            Repr::View(parent) => ViewState {
                root: Arc::clone(&parent.root),
                root_id: parent.root_id,
                rows: local_rows.iter().map(|&p| parent.rows[p]).collect(),
                cols: local_cols.iter().map(|&p| parent.cols[p]).collect(),
            },
        };
        debug!(
            "view {}x{} of container {}",
            view.rows.len(),
            view.cols.len(),
            view.root_id
        );

        Ok(AnnData {
            repr: Repr::View(view),
            read_options: self.read_options.clone(),
        })
    }

    /// Promote a view to an owned container in one step.
    ///
    /// Every owned structure is built before the representation changes, so
    /// a failed read leaves the view untouched. The root and any other views
    /// of it are unaffected. Owned containers are left as they are.
    pub fn materialize(&mut self) -> Result<()> {
        let Repr::View(view) = &self.repr else {
            return Ok(());
        };
        let inner = build_inner(&view.root, &view.rows, &view.cols, &self.read_options)?;
        debug!(
            "materialized {}x{} view of container {}",
            view.rows.len(),
            view.cols.len(),
            view.root_id
        );
        inner.assert_consistent();
        self.repr = Repr::Owned {
            id: ContainerId::next(),
            inner: Arc::new(inner),
        };
        Ok(())
    }

    /// Owned copy with every matrix loaded into memory
    pub fn to_memory(&self) -> Result<AnnData> {
        let (rows, cols) = self.positions();
        let inner = build_inner(self.root(), &rows, &cols, &self.read_options)?;
        Ok(AnnData {
            repr: Repr::Owned {
                id: ContainerId::next(),
                inner: Arc::new(inner),
            },
            read_options: self.read_options.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::axis::{AxisIndex, Selector};
    use crate::error::Error;
    use crate::storage::DenseMatrix;
    use crate::table::{Cell, Table};
    use crate::AnnData;
    use annmat_core::MatrixAccess;

    fn sample() -> AnnData {
        let x = DenseMatrix::new(3, 2, vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let obs = Table::new(AxisIndex::new(["r0", "r1", "r2"]))
            .with_column("n", vec![10.0, 11.0, 12.0])
            .unwrap();
        AnnData::new(x, obs, Table::new(AxisIndex::new(["g0", "g1"]))).unwrap()
    }

    #[test]
    fn test_composed_selection_maps_to_root() {
        let a = sample();
        let v = a.select(Selector::Range(1..3), ..).unwrap();
        let w = v.select(Selector::positions([1, 0]), ["g1"]).unwrap();
        assert_eq!(w.selection(), Some((&[2, 1][..], &[1][..])));
        assert_eq!(w.parent_id(), a.id());
        let x = w.read_x().unwrap();
        assert_eq!(x.get_f64(0, 0), Some(6.0));
        assert_eq!(x.get_f64(1, 0), Some(4.0));
        assert_eq!(w.obs_names().labels(), &["r2", "r1"]);
    }

    #[test]
    fn test_materialize_on_write_leaves_parent() {
        let a = sample();
        let mut v = a.select(["r1"], ..).unwrap();
        v.set_obs_column("n", vec![99.0]).unwrap();
        assert!(!v.is_view());
        assert_eq!(v.obs().cell(0, "n"), Some(Cell::Numeric(99.0)));
        assert_eq!(a.obs().cell(1, "n"), Some(Cell::Numeric(11.0)));
    }

    #[test]
    fn test_duplicate_positions() {
        let a = sample();
        let v = a.select(Selector::positions([1, 0, 1]), ..).unwrap();
        assert_eq!(v.shape(), (3, 2));
        assert_eq!(v.obs_names().labels(), &["r1", "r0", "r1"]);
        let x = v.read_x().unwrap();
        assert_eq!(x.get_f64(2, 1), Some(4.0));
    }

    #[test]
    fn test_selection_errors() {
        let a = sample();
        assert!(matches!(a.select(["missing"], ..), Err(Error::IndexError(_))));
        assert!(matches!(
            a.select([true, false], ..),
            Err(Error::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
        assert!(matches!(a.select(Selector::Range(0..4), ..), Err(Error::IndexError(_))));
    }

    #[test]
    fn test_to_memory_detaches() {
        let a = sample();
        let v = a.select(Selector::mask([true, false, true]), ..).unwrap();
        let m = v.to_memory().unwrap();
        assert!(!m.is_view());
        assert_eq!(m.shape(), (2, 2));
        assert_eq!(m.read_x().unwrap().get_f64(1, 0), Some(5.0));
    }
}
