//! Concatenation of containers along one axis
//!
//! Inputs are stacked along the concatenation axis in sequence order after
//! every matrix has been reindexed onto one unified orthogonal axis. The
//! orthogonal axis is the intersection (`inner`) or first-seen union
//! (`outer`) of the inputs' labels; cells an input does not cover are filled
//! with the missing sentinel of their storage (implicit zero for sparse
//! matrices, NaN for dense ones, a missing cell for metadata).

use crate::anndata::{AnnData, Inner};
use crate::axis::{Axis, AxisIndex, DEFAULT_UNIQUE_SEPARATOR};
use crate::error::{Error, Result};
use crate::storage::{CompressedMatrix, DenseMatrix, Matrix, Storage};
use crate::table::{join_names, Categorical, Cell, Column, Table};
use annmat_core::MatrixAccess;
use hashbrown::HashSet;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// How the orthogonal axes of the inputs are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Join {
    /// Labels shared by every input, in the first input's order
    #[default]
    Inner,
    /// Every label, in first-seen order
    Outer,
}

/// How elements that are not stacked are combined across inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Keep elements present in every input with equal values
    #[default]
    Same,
    /// Keep elements with at most one distinct value across inputs
    Unique,
    /// Take the first value seen in input order
    First,
    /// Keep nothing
    Drop,
}

/// Collision handling for labels on the concatenation axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uniqueness {
    /// Labels are stacked unchanged
    #[default]
    Keep,
    /// Each input is made unique before stacking
    PerInput,
    /// The stacked index is made unique; the first input wins unsuffixed names
    Global,
}

/// Per-input batch key recorded as a generated categorical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchKey {
    pub column: String,
    /// One key per input; empty means `"0"`, `"1"`, ...
    #[serde(default)]
    pub keys: Vec<String>,
    /// When set, every label becomes `"{label}{separator}{key}"`
    #[serde(default)]
    pub index_separator: Option<String>,
}

impl BatchKey {
    pub fn new<S: Into<String>>(column: impl Into<String>, keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            column: column.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            index_separator: None,
        }
    }

    pub fn with_index_separator(mut self, separator: impl Into<String>) -> Self {
        self.index_separator = Some(separator.into());
        self
    }

    fn keys_for(&self, inputs: usize) -> Result<Vec<String>> {
        if self.keys.is_empty() {
            return Ok((0..inputs).map(|i| i.to_string()).collect());
        }
        if self.keys.len() != inputs {
            return Err(Error::dimension("batch keys", inputs, self.keys.len()));
        }
        Ok(self.keys.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelStrategy {
    pub uniqueness: Uniqueness,
    pub separator: String,
    pub batch: Option<BatchKey>,
}

impl Default for LabelStrategy {
    fn default() -> Self {
        Self {
            uniqueness: Uniqueness::Keep,
            separator: DEFAULT_UNIQUE_SEPARATOR.to_string(),
            batch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConcatOptions {
    pub axis: Axis,
    pub join: Join,
    /// Applied to orthogonal metadata columns and annotations
    pub merge: MergeStrategy,
    pub uns_merge: MergeStrategy,
    pub labels: LabelStrategy,
    /// Accept an empty orthogonal axis from an inner join
    pub allow_empty_join: bool,
}

impl ConcatOptions {
    pub fn new(axis: Axis, join: Join) -> Self {
        Self {
            axis,
            join,
            ..Self::default()
        }
    }

    pub fn with_merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_uns_merge(mut self, merge: MergeStrategy) -> Self {
        self.uns_merge = merge;
        self
    }

    pub fn with_uniqueness(mut self, uniqueness: Uniqueness) -> Self {
        self.labels.uniqueness = uniqueness;
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.labels.separator = separator.into();
        self
    }

    pub fn with_batch(mut self, batch: BatchKey) -> Self {
        self.labels.batch = Some(batch);
        self
    }

    pub fn with_allow_empty_join(mut self, allow: bool) -> Self {
        self.allow_empty_join = allow;
        self
    }
}

/// Everything a concatenation left out of its result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcatReport {
    /// Layers missing from at least one input
    pub dropped_layers: Vec<String>,
    /// Orthogonal metadata columns rejected by the merge strategy
    pub dropped_columns: Vec<String>,
    /// Multi-dimensional annotations not carried over, as `obsm/<key>` or `varm/<key>`
    pub dropped_annotations: Vec<String>,
    /// Unstructured keys not carried over, nested keys joined with `/`
    pub dropped_uns_keys: Vec<String>,
    /// Labels still duplicated on the concatenation axis
    pub duplicate_labels: Vec<String>,
    /// Whether X was dropped because some inputs had none
    pub dropped_x: bool,
}

/// Concatenate `inputs` into a new owned in-memory container
pub fn concat(inputs: &[&AnnData], options: &ConcatOptions) -> Result<AnnData> {
    concat_with_report(inputs, options).map(|(result, _)| result)
}

/// Like [`concat`], also returning what was dropped on the way
pub fn concat_with_report(inputs: &[&AnnData], options: &ConcatOptions) -> Result<(AnnData, ConcatReport)> {
    if inputs.is_empty() {
        return Err(Error::EmptyInput);
    }
    let along = options.axis;
    let orth = along.other();
    let mut report = ConcatReport::default();

    // orthogonal axis
    let orth_indexes: Vec<Cow<'_, AxisIndex>> = inputs.iter().map(|a| axis_names(a, orth)).collect();
    let orth_refs: Vec<&AxisIndex> = orth_indexes.iter().map(|c| c.as_ref()).collect();
    let unified = unify_axis(&orth_refs, options.join)?;
    if unified.is_empty() && options.join == Join::Inner && !options.allow_empty_join {
        return Err(Error::AxisMismatch(format!(
            "inner join of {} inputs leaves an empty {} axis",
            inputs.len(),
            axis_name(orth)
        )));
    }
    let reindex: Vec<Option<Vec<Option<usize>>>> = orth_refs
        .iter()
        .map(|index| positions_on(index, &unified))
        .collect();

    // primary matrix and layers
    let x = if inputs.iter().all(|a| a.has_x()) {
        let parts = inputs
            .iter()
            .zip(&reindex)
            .map(|(a, positions)| Ok(reindex_matrix(a.read_x()?, orth, positions.as_deref())))
            .collect::<Result<Vec<_>>>()?;
        Some(Storage::InMemory(stack(along, &parts)?))
    } else {
        if inputs.iter().any(|a| a.has_x()) {
            warn!("X missing from some inputs; dropping it from the result");
            report.dropped_x = true;
        }
        None
    };

    let layer_names = join_names(inputs.iter().map(|a| a.layer_names()), Join::Outer);
    let mut layers = BTreeMap::new();
    for name in layer_names {
        if !inputs.iter().all(|a| a.layer_names().contains(&name.as_str())) {
            warn!("layer `{name}` missing from some inputs; dropping it from the result");
            report.dropped_layers.push(name);
            continue;
        }
        let parts = inputs
            .iter()
            .zip(&reindex)
            .map(|(a, positions)| Ok(reindex_matrix(a.read_layer(&name)?, orth, positions.as_deref())))
            .collect::<Result<Vec<_>>>()?;
        layers.insert(name, Storage::InMemory(stack(along, &parts)?));
    }

    // concatenation axis labels and table
    let along_index = stacked_labels(inputs, along, &options.labels)?;
    let duplicates: Vec<String> = along_index.duplicated().into_iter().map(str::to_string).collect();
    if !duplicates.is_empty() {
        warn!(
            "{} labels on the {} axis are duplicated after concatenation",
            duplicates.len(),
            axis_name(along)
        );
    }
    report.duplicate_labels = duplicates;

    let along_tables: Vec<Cow<'_, Table>> = inputs.iter().map(|a| axis_table(a, along)).collect();
    let along_refs: Vec<&Table> = along_tables.iter().map(|t| t.as_ref()).collect();
    let mut along_table = Table::concat_rows(&along_refs, along_index, options.join)?;
    if let Some(batch) = &options.labels.batch {
        let keys = batch.keys_for(inputs.len())?;
        let values = inputs
            .iter()
            .zip(&keys)
            .flat_map(|(a, key)| std::iter::repeat(Some(key.as_str())).take(along.len_of(a.shape())));
        along_table.set_column(batch.column.clone(), Categorical::from_values(values))?;
    }

    // orthogonal table
    let orth_tables: Vec<Cow<'_, Table>> = inputs.iter().map(|a| axis_table(a, orth)).collect();
    let orth_table_refs: Vec<&Table> = orth_tables.iter().map(|t| t.as_ref()).collect();
    let orth_table = merge_tables(&orth_table_refs, &reindex, unified.clone(), options.merge, &mut report)?;

    // annotations
    let along_annotations = stack_annotations(inputs, along, options.join, &mut report)?;
    let orth_annotations = merge_annotations(inputs, orth, &reindex, &unified, options.merge, &mut report)?;

    // unstructured
    let uns_maps: Vec<&Map<String, Value>> = inputs.iter().map(|a| a.uns()).collect();
    let uns = merge_maps(&uns_maps, options.uns_merge, "", &mut report.dropped_uns_keys);
    if !report.dropped_uns_keys.is_empty() {
        warn!("dropped {} uns keys while merging", report.dropped_uns_keys.len());
    }

    let (obs, var, obsm, varm) = match along {
        Axis::Rows => (along_table, orth_table, along_annotations, orth_annotations),
        Axis::Cols => (orth_table, along_table, orth_annotations, along_annotations),
    };
    let result = AnnData::from_inner(Inner {
        x,
        layers,
        obs,
        var,
        obsm,
        varm,
        uns,
    });
    info!(
        "concatenated {} inputs along {} into {}x{}",
        inputs.len(),
        axis_name(along),
        result.n_obs(),
        result.n_vars()
    );
    Ok((result, report))
}

fn axis_name(axis: Axis) -> &'static str {
    match axis {
        Axis::Rows => "obs",
        Axis::Cols => "var",
    }
}

fn axis_names(a: &AnnData, axis: Axis) -> Cow<'_, AxisIndex> {
    match axis {
        Axis::Rows => a.obs_names(),
        Axis::Cols => a.var_names(),
    }
}

fn axis_table(a: &AnnData, axis: Axis) -> Cow<'_, Table> {
    match axis {
        Axis::Rows => a.obs(),
        Axis::Cols => a.var(),
    }
}

/// Unified orthogonal labels for a join
fn unify_axis(indexes: &[&AxisIndex], join: Join) -> Result<AxisIndex> {
    let first = indexes[0];
    if indexes.iter().all(|index| *index == first) {
        return Ok(first.clone());
    }
    if let Some(dup) = indexes.iter().find(|index| index.has_duplicates()) {
        return Err(Error::AxisMismatch(format!(
            "cannot join on an axis with duplicate labels ({})",
            dup.duplicated().join(", ")
        )));
    }
    let labels = join_names(indexes.iter().map(|index| index.iter().collect()), join);
    Ok(AxisIndex::from(labels))
}

/// Input positions for each unified label, `None` when already aligned
fn positions_on(index: &AxisIndex, unified: &AxisIndex) -> Option<Vec<Option<usize>>> {
    if index == unified {
        return None;
    }
    Some(unified.iter().map(|label| index.lookup(label)).collect())
}

/// Input row backing unified position `i`
fn source_row(positions: Option<&[Option<usize>]>, i: usize) -> Option<usize> {
    match positions {
        None => Some(i),
        Some(positions) => positions[i],
    }
}

fn reindex_matrix(matrix: Matrix, orth: Axis, positions: Option<&[Option<usize>]>) -> Matrix {
    let Some(positions) = positions else {
        return matrix;
    };
    let (rows, cols) = matrix.shape();
    match orth {
        Axis::Cols => {
            let all: Vec<Option<usize>> = (0..rows).map(Some).collect();
            matrix.reindex(&all, positions)
        }
        Axis::Rows => {
            let all: Vec<Option<usize>> = (0..cols).map(Some).collect();
            matrix.reindex(positions, &all)
        }
    }
}

fn stack(along: Axis, parts: &[Matrix]) -> Result<Matrix> {
    let refs: Vec<&Matrix> = parts.iter().collect();
    Matrix::stack(along, &refs)
}

/// Labels of the concatenation axis after batch suffixes and uniqueness
fn stacked_labels(inputs: &[&AnnData], along: Axis, strategy: &LabelStrategy) -> Result<AxisIndex> {
    let mut parts: Vec<AxisIndex> = inputs.iter().map(|a| axis_names(a, along).into_owned()).collect();

    if let Some(batch) = &strategy.batch {
        if let Some(separator) = &batch.index_separator {
            let keys = batch.keys_for(inputs.len())?;
            parts = parts
                .iter()
                .zip(&keys)
                .map(|(index, key)| index.with_suffix(separator, key))
                .collect();
        }
    }

    if strategy.uniqueness == Uniqueness::PerInput {
        for part in &mut parts {
            part.make_unique_in_place(&strategy.separator);
        }
    }

    let refs: Vec<&AxisIndex> = parts.iter().collect();
    let mut stacked = AxisIndex::concat(&refs);
    if strategy.uniqueness == Uniqueness::Global {
        stacked.make_unique_in_place(&strategy.separator);
    }
    Ok(stacked)
}

/// Orthogonal metadata merged over the unified labels
fn merge_tables(
    tables: &[&Table],
    reindex: &[Option<Vec<Option<usize>>>],
    unified: AxisIndex,
    strategy: MergeStrategy,
    report: &mut ConcatReport,
) -> Result<Table> {
    let names = join_names(tables.iter().map(|t| t.column_names()), Join::Outer);
    let mut columns = Vec::new();

    for name in names {
        if strategy == MergeStrategy::Drop {
            report.dropped_columns.push(name);
            continue;
        }
        let providers: Vec<(Option<&[Option<usize>]>, &Column)> = tables
            .iter()
            .zip(reindex)
            .filter_map(|(t, positions)| t.column(&name).map(|c| (positions.as_deref(), c)))
            .collect();
        if strategy == MergeStrategy::Same && providers.len() != tables.len() {
            report.dropped_columns.push(name);
            continue;
        }

        let mut picks = Vec::with_capacity(unified.len());
        let mut keep = true;
        for i in 0..unified.len() {
            let cells: Vec<(usize, usize, Cell<'_>)> = providers
                .iter()
                .enumerate()
                .filter_map(|(src, (positions, column))| {
                    source_row(*positions, i).map(|row| (src, row, column.cell(row)))
                })
                .collect();
            let pick = match strategy {
                MergeStrategy::Same => {
                    keep &= cells.windows(2).all(|pair| pair[0].2 == pair[1].2);
                    cells.first().map(|&(src, row, _)| (src, row))
                }
                MergeStrategy::Unique => {
                    let present: Vec<&(usize, usize, Cell<'_>)> =
                        cells.iter().filter(|(_, _, cell)| *cell != Cell::Missing).collect();
                    keep &= present.windows(2).all(|pair| pair[0].2 == pair[1].2);
                    present.first().map(|&&(src, row, _)| (src, row))
                }
                MergeStrategy::First | MergeStrategy::Drop => cells.first().map(|&(src, row, _)| (src, row)),
            };
            if !keep {
                break;
            }
            picks.push(pick);
        }

        if !keep {
            report.dropped_columns.push(name);
            continue;
        }
        let sources: Vec<&Column> = providers.iter().map(|(_, c)| *c).collect();
        let column = Column::gather(&name, &sources, &picks)?;
        columns.push((name, column));
    }

    if !report.dropped_columns.is_empty() {
        warn!(
            "dropped {} orthogonal metadata columns while merging",
            report.dropped_columns.len()
        );
    }
    Table::from_parts(unified, columns)
}

fn annotation_names(a: &AnnData, axis: Axis) -> Vec<&str> {
    match axis {
        Axis::Rows => a.obsm_names(),
        Axis::Cols => a.varm_names(),
    }
}

fn read_annotation(a: &AnnData, axis: Axis, name: &str) -> Result<Matrix> {
    match axis {
        Axis::Rows => a.read_obsm(name),
        Axis::Cols => a.read_varm(name),
    }
}

fn annotation_key(axis: Axis, name: &str) -> String {
    match axis {
        Axis::Rows => format!("obsm/{name}"),
        Axis::Cols => format!("varm/{name}"),
    }
}

/// Missing-sentinel block shaped like `like` with `rows` rows
fn missing_block(like: &Matrix, rows: usize) -> Matrix {
    let width = like.shape().1;
    match like {
        Matrix::Sparse(m) => Matrix::Sparse(CompressedMatrix::empty(m.format(), rows, width, m.dtype())),
        Matrix::Dense(m) => {
            let dtype = m.dtype().with_missing();
            let nan = DenseMatrix::zeros(rows, width, dtype);
            Matrix::Dense(nan).reindex(
                &vec![None; rows],
                &(0..width).map(Some).collect::<Vec<_>>(),
            )
        }
    }
}

/// Stack annotations aligned with the concatenation axis
fn stack_annotations(
    inputs: &[&AnnData],
    along: Axis,
    join: Join,
    report: &mut ConcatReport,
) -> Result<BTreeMap<String, Matrix>> {
    let names = join_names(inputs.iter().map(|a| annotation_names(a, along)), Join::Outer);
    let mut out = BTreeMap::new();

    for name in names {
        let present: Vec<Option<Matrix>> = inputs
            .iter()
            .map(|a| {
                if annotation_names(a, along).contains(&name.as_str()) {
                    read_annotation(a, along, &name).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect::<Result<_>>()?;

        let everywhere = present.iter().all(Option::is_some);
        let widths: HashSet<usize> = present.iter().flatten().map(|m| m.shape().1).collect();
        if (join == Join::Inner && !everywhere) || widths.len() != 1 {
            warn!("annotation `{}` not stacked", annotation_key(along, &name));
            report.dropped_annotations.push(annotation_key(along, &name));
            continue;
        }

        let Some(like) = present.iter().flatten().next().cloned() else {
            continue;
        };
        let parts: Vec<Matrix> = present
            .into_iter()
            .zip(inputs)
            .map(|(matrix, a)| matrix.unwrap_or_else(|| missing_block(&like, along.len_of(a.shape()))))
            .collect();
        // annotations keep the concatenation axis on their rows
        out.insert(name, stack(Axis::Rows, &parts)?);
    }
    Ok(out)
}

fn rows_agree(left: &[f64], right: &[f64]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(l, r)| l == r || (l.is_nan() && r.is_nan()))
}

/// Merge annotations aligned with the orthogonal axis over the unified labels.
///
/// Merged annotations are dense `f64`; labels no input provides are NaN.
fn merge_annotations(
    inputs: &[&AnnData],
    orth: Axis,
    reindex: &[Option<Vec<Option<usize>>>],
    unified: &AxisIndex,
    strategy: MergeStrategy,
    report: &mut ConcatReport,
) -> Result<BTreeMap<String, Matrix>> {
    let names = join_names(inputs.iter().map(|a| annotation_names(a, orth)), Join::Outer);
    let mut out = BTreeMap::new();

    for name in names {
        let mut providers: Vec<(Option<&[Option<usize>]>, DenseMatrix)> = Vec::new();
        for (a, positions) in inputs.iter().zip(reindex) {
            if annotation_names(a, orth).contains(&name.as_str()) {
                let matrix = read_annotation(a, orth, &name)?.into_dense();
                providers.push((positions.as_deref(), matrix));
            }
        }
        let widths: HashSet<usize> = providers.iter().map(|(_, m)| m.dimensions().1).collect();
        let rejected = strategy == MergeStrategy::Drop
            || widths.len() != 1
            || (strategy == MergeStrategy::Same && providers.len() != inputs.len());
        if rejected {
            report.dropped_annotations.push(annotation_key(orth, &name));
            continue;
        }
        let width = providers[0].1.dimensions().1;

        let mut values = Vec::with_capacity(unified.len() * width);
        let mut keep = true;
        for i in 0..unified.len() {
            let rows: Vec<Vec<f64>> = providers
                .iter()
                .filter_map(|(positions, m)| source_row(*positions, i).map(|row| m.row_f64(row)))
                .collect();
            let candidates: Vec<&Vec<f64>> = match strategy {
                MergeStrategy::Unique => rows.iter().filter(|r| !r.iter().all(|v| v.is_nan())).collect(),
                _ => rows.iter().collect(),
            };
            if matches!(strategy, MergeStrategy::Same | MergeStrategy::Unique)
                && !candidates.windows(2).all(|pair| rows_agree(pair[0], pair[1]))
            {
                keep = false;
                break;
            }
            match candidates.first() {
                Some(row) => values.extend_from_slice(row),
                None => values.extend(std::iter::repeat(f64::NAN).take(width)),
            }
        }

        if !keep {
            report.dropped_annotations.push(annotation_key(orth, &name));
            continue;
        }
        out.insert(name, Matrix::Dense(DenseMatrix::new(unified.len(), width, values)?));
    }
    Ok(out)
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}

/// Merge unstructured mappings, recursing into nested objects
fn merge_maps(
    maps: &[&Map<String, Value>],
    strategy: MergeStrategy,
    path: &str,
    dropped: &mut Vec<String>,
) -> Map<String, Value> {
    let keys = join_names(maps.iter().map(|m| m.keys().map(String::as_str).collect()), Join::Outer);
    let mut out = Map::new();

    for key in keys {
        let values: Vec<&Value> = maps.iter().filter_map(|m| m.get(&key)).collect();
        let full = join_path(path, &key);

        if strategy == MergeStrategy::Drop {
            dropped.push(full);
            continue;
        }
        if strategy == MergeStrategy::Same && values.len() != maps.len() {
            dropped.push(full);
            continue;
        }

        let objects: Vec<&Map<String, Value>> = values.iter().filter_map(|v| v.as_object()).collect();
        if objects.len() == values.len() && strategy != MergeStrategy::First {
            let nested = merge_maps(&objects, strategy, &full, dropped);
            out.insert(key, Value::Object(nested));
            continue;
        }

        let agree = values.windows(2).all(|pair| pair[0] == pair[1]);
        match (strategy, values.first()) {
            (MergeStrategy::First, Some(value)) => {
                out.insert(key, (*value).clone());
            }
            (MergeStrategy::Same | MergeStrategy::Unique, Some(value)) if agree => {
                out.insert(key, (*value).clone());
            }
            _ => dropped.push(full),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use annmat_core::{MatrixAccess, MatrixFormat};

    fn container(rows: &[&str], cols: &[&str], values: Vec<f64>) -> AnnData {
        let x = DenseMatrix::new(rows.len(), cols.len(), values).unwrap();
        AnnData::new(
            x,
            Table::new(AxisIndex::new(rows.iter().copied())),
            Table::new(AxisIndex::new(cols.iter().copied())),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(concat(&[], &ConcatOptions::default()), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_outer_fills_dense_with_nan() {
        let a = container(&["r1", "r2"], &["g1", "g2"], vec![1.0, 2.0, 3.0, 4.0]);
        let b = container(&["r3"], &["g2", "g3"], vec![5.0, 6.0]);
        let out = concat(&[&a, &b], &ConcatOptions::new(Axis::Rows, Join::Outer)).unwrap();
        assert_eq!(out.obs_names().labels(), &["r1", "r2", "r3"]);
        assert_eq!(out.var_names().labels(), &["g1", "g2", "g3"]);
        let x = out.read_x().unwrap();
        assert!(x.get_f64(0, 2).unwrap().is_nan());
        assert!(x.get_f64(2, 0).unwrap().is_nan());
        assert_eq!(x.get_f64(2, 1), Some(5.0));
        assert_eq!(x.get_f64(1, 1), Some(4.0));
    }

    #[test]
    fn test_outer_fills_sparse_with_zero() {
        let a = container(&["r1", "r2"], &["g1", "g2"], vec![1.0, 0.0, 0.0, 4.0]);
        let b = container(&["r3"], &["g2", "g3"], vec![5.0, 6.0]);
        let sparse = |c: &AnnData| {
            let x = c.read_x().unwrap().to_format(MatrixFormat::Csr);
            AnnData::new(x, c.obs().into_owned(), c.var().into_owned()).unwrap()
        };
        let (a, b) = (sparse(&a), sparse(&b));
        let out = concat(&[&a, &b], &ConcatOptions::new(Axis::Rows, Join::Outer)).unwrap();
        let x = out.read_x().unwrap();
        assert_eq!(x.format(), MatrixFormat::Csr);
        assert_eq!(x.get_f64(0, 2), Some(0.0));
        assert_eq!(x.get_f64(2, 0), Some(0.0));
        assert_eq!(x.get_f64(2, 2), Some(6.0));
    }

    #[test]
    fn test_inner_join_columns_and_empty() {
        let a = container(&["r1"], &["g3", "g1", "g2"], vec![1.0, 2.0, 3.0]);
        let b = container(&["r2"], &["g2", "g3"], vec![4.0, 5.0]);
        let out = concat(&[&a, &b], &ConcatOptions::default()).unwrap();
        assert_eq!(out.var_names().labels(), &["g3", "g2"]);
        assert_eq!(out.read_x().unwrap().get_f64(1, 0), Some(5.0));

        let c = container(&["r3"], &["zz"], vec![0.0]);
        assert!(matches!(
            concat(&[&a, &c], &ConcatOptions::default()),
            Err(Error::AxisMismatch(_))
        ));
        let empty = concat(&[&a, &c], &ConcatOptions::default().with_allow_empty_join(true)).unwrap();
        assert_eq!(empty.shape(), (2, 0));
    }

    #[test]
    fn test_global_uniqueness_first_input_wins() {
        let a = container(&["c", "c"], &["g"], vec![1.0, 2.0]);
        let b = container(&["c"], &["g"], vec![3.0]);
        let options = ConcatOptions::default().with_uniqueness(Uniqueness::Global);
        let (out, report) = concat_with_report(&[&a, &b], &options).unwrap();
        assert_eq!(out.obs_names().labels(), &["c", "c-1", "c-2"]);
        assert!(report.duplicate_labels.is_empty());

        let per_input = ConcatOptions::default().with_uniqueness(Uniqueness::PerInput);
        let (out, report) = concat_with_report(&[&a, &b], &per_input).unwrap();
        assert_eq!(out.obs_names().labels(), &["c", "c-1", "c"]);
        assert_eq!(report.duplicate_labels, vec!["c".to_string()]);
    }

    #[test]
    fn test_batch_key_column_and_suffix() {
        let a = container(&["c"], &["g"], vec![1.0]);
        let b = container(&["c"], &["g"], vec![2.0]);
        let options = ConcatOptions::default()
            .with_batch(BatchKey::new("batch", ["x", "y"]).with_index_separator("_"));
        let out = concat(&[&a, &b], &options).unwrap();
        assert_eq!(out.obs_names().labels(), &["c_x", "c_y"]);
        assert_eq!(out.obs().cell(1, "batch"), Some(Cell::Text("y")));

        let bad = ConcatOptions::default().with_batch(BatchKey::new("batch", ["only"]));
        assert!(matches!(concat(&[&a, &b], &bad), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_layers_dropped_and_reported() {
        let a = container(&["r1"], &["g"], vec![1.0])
            .with_layer("counts", DenseMatrix::new(1, 1, vec![7i32]).unwrap())
            .unwrap();
        let b = container(&["r2"], &["g"], vec![2.0]);
        let (out, report) = concat_with_report(&[&a, &b], &ConcatOptions::default()).unwrap();
        assert!(out.layer_names().is_empty());
        assert_eq!(report.dropped_layers, vec!["counts".to_string()]);
    }

    #[test]
    fn test_orthogonal_columns_merge() {
        let mut a = container(&["r1"], &["g1", "g2"], vec![1.0, 2.0]);
        let mut b = container(&["r2"], &["g1", "g2"], vec![3.0, 4.0]);
        a.set_var_column("symbol", vec!["A", "B"]).unwrap();
        b.set_var_column("symbol", vec!["A", "B"]).unwrap();
        a.set_var_column("score", vec![1.0, 2.0]).unwrap();
        b.set_var_column("score", vec![1.0, 9.0]).unwrap();

        let (same, report) = concat_with_report(&[&a, &b], &ConcatOptions::default()).unwrap();
        assert_eq!(same.var().column_names(), vec!["symbol"]);
        assert_eq!(report.dropped_columns, vec!["score".to_string()]);

        let first = concat(&[&a, &b], &ConcatOptions::default().with_merge(MergeStrategy::First)).unwrap();
        assert_eq!(first.var().cell(1, "score"), Some(Cell::Numeric(2.0)));
    }

    #[test]
    fn test_obs_columns_and_schema_conflict() {
        let mut a = container(&["r1"], &["g"], vec![1.0]);
        let mut b = container(&["r2"], &["g"], vec![2.0]);
        a.set_obs_column("qc", vec![true]).unwrap();
        b.set_obs_column("qc", vec![0.5]).unwrap();
        let out = concat(&[&a, &b], &ConcatOptions::default()).unwrap();
        assert_eq!(out.obs().column("qc"), Some(&Column::Numeric(vec![1.0, 0.5])));

        b.set_obs_column("qc", vec!["text"]).unwrap();
        assert!(matches!(
            concat(&[&a, &b], &ConcatOptions::default()),
            Err(Error::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_annotations() {
        let a = container(&["r1"], &["g"], vec![1.0])
            .with_obsm("pca", DenseMatrix::new(1, 2, vec![0.1, 0.2]).unwrap())
            .unwrap()
            .with_varm("load", DenseMatrix::new(1, 1, vec![3.0]).unwrap())
            .unwrap();
        let b = container(&["r2"], &["g"], vec![2.0])
            .with_varm("load", DenseMatrix::new(1, 1, vec![3.0]).unwrap())
            .unwrap();

        let (inner, report) = concat_with_report(&[&a, &b], &ConcatOptions::default()).unwrap();
        assert!(inner.obsm_names().is_empty());
        assert_eq!(report.dropped_annotations, vec!["obsm/pca".to_string()]);
        assert_eq!(inner.read_varm("load").unwrap().get_f64(0, 0), Some(3.0));

        let outer = concat(&[&a, &b], &ConcatOptions::new(Axis::Rows, Join::Outer)).unwrap();
        let pca = outer.read_obsm("pca").unwrap();
        assert_eq!(pca.shape(), (2, 2));
        assert!(pca.get_f64(1, 0).unwrap().is_nan());
    }

    #[test]
    fn test_uns_merge() {
        let a = container(&["r1"], &["g"], vec![1.0])
            .with_uns("shared", 1)
            .unwrap()
            .with_uns("conflict", "a")
            .unwrap()
            .with_uns("nested", serde_json::json!({"k": 1, "x": 2}))
            .unwrap();
        let b = container(&["r2"], &["g"], vec![2.0])
            .with_uns("shared", 1)
            .unwrap()
            .with_uns("conflict", "b")
            .unwrap()
            .with_uns("nested", serde_json::json!({"k": 1, "x": 3}))
            .unwrap()
            .with_uns("only_b", true)
            .unwrap();

        let (out, report) = concat_with_report(&[&a, &b], &ConcatOptions::default()).unwrap();
        assert_eq!(out.uns().get("shared"), Some(&Value::from(1)));
        assert_eq!(out.uns()["nested"], serde_json::json!({"k": 1}));
        assert_eq!(
            report.dropped_uns_keys,
            vec!["conflict".to_string(), "nested/x".to_string(), "only_b".to_string()]
        );

        let unique = concat(&[&a, &b], &ConcatOptions::default().with_uns_merge(MergeStrategy::Unique)).unwrap();
        assert_eq!(unique.uns().get("only_b"), Some(&Value::from(true)));
        assert!(unique.uns().get("conflict").is_none());
    }

    #[test]
    fn test_shared_duplicate_orthogonal_labels_stay_positional() {
        let with_metadata = |row: &str, values: Vec<f64>| {
            let mut a = container(&[row], &["g", "g"], values)
                .with_varm("load", DenseMatrix::new(2, 1, vec![1.0, 2.0]).unwrap())
                .unwrap();
            a.set_var_column("symbol", vec!["A", "B"]).unwrap();
            a
        };
        let a = with_metadata("r1", vec![1.0, 2.0]);
        let b = with_metadata("r2", vec![3.0, 4.0]);

        for inputs in [vec![&a], vec![&a, &b]] {
            let out = concat(&inputs, &ConcatOptions::default()).unwrap();
            assert_eq!(out.var().cell(0, "symbol"), Some(Cell::Text("A")));
            assert_eq!(out.var().cell(1, "symbol"), Some(Cell::Text("B")));
            let load = out.read_varm("load").unwrap();
            assert_eq!(load.get_f64(0, 0), Some(1.0));
            assert_eq!(load.get_f64(1, 0), Some(2.0));
            assert_eq!(out.read_x().unwrap().get_f64(0, 1), Some(2.0));
        }

        let c = container(&["r3"], &["g", "h"], vec![5.0, 6.0]);
        assert!(matches!(
            concat(&[&a, &c], &ConcatOptions::new(Axis::Rows, Join::Outer)),
            Err(Error::AxisMismatch(_))
        ));
    }

    #[test]
    fn test_concat_columns_axis() {
        let a = container(&["r1", "r2"], &["g1"], vec![1.0, 2.0]);
        let b = container(&["r2", "r1"], &["g2"], vec![3.0, 4.0]);
        let out = concat(&[&a, &b], &ConcatOptions::new(Axis::Cols, Join::Inner)).unwrap();
        assert_eq!(out.shape(), (2, 2));
        assert_eq!(out.obs_names().labels(), &["r1", "r2"]);
        let x = out.read_x().unwrap();
        assert_eq!(x.get_f64(0, 1), Some(4.0));
        assert_eq!(x.get_f64(1, 1), Some(3.0));
    }
}
