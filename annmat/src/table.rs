//! Axis-aligned metadata tables
//!
//! A [`Table`] is an ordered set of named, typed columns sharing one
//! [`AxisIndex`]. Column values come from a closed set of variants with an
//! explicit promotion table, so merging heterogeneous schemas never relies
//! on runtime coercion:
//!
//! | left \ right | Numeric | Boolean | Text | Categorical |
//! |--------------|---------|---------|------|-------------|
//! | Numeric      | Numeric | Numeric | -    | -           |
//! | Boolean      | Numeric | Boolean | -    | -           |
//! | Text         | -       | -       | Text | Text        |
//! | Categorical  | -       | -       | Text | Categorical |
//!
//! `-` is a schema conflict. Missing cells are `NaN` for numeric columns
//! and `None` for the others.

use crate::axis::AxisIndex;
use crate::concat::Join;
use crate::error::{Error, Result};
use hashbrown::{HashMap, HashSet};
use std::borrow::Cow;

/// Column variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Numeric,
    Boolean,
    Text,
    Categorical,
}

impl ColumnKind {
    /// Common kind of two columns, `None` when no promotion applies
    pub fn promote(self, other: ColumnKind) -> Option<ColumnKind> {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Numeric, Boolean) | (Boolean, Numeric) => Some(Numeric),
            (Text, Categorical) | (Categorical, Text) => Some(Text),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
            ColumnKind::Categorical => "categorical",
        }
    }
}

/// Dictionary-encoded text column
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Categorical {
    categories: Vec<String>,
    codes: Vec<Option<u32>>,
}

impl Categorical {
    pub fn new(categories: Vec<String>, codes: Vec<Option<u32>>) -> Result<Self> {
        if let Some(bad) = codes
            .iter()
            .flatten()
            .find(|&&code| code as usize >= categories.len())
        {
            return Err(Error::IndexError(format!(
                "category code {bad} outside {} categories",
                categories.len()
            )));
        }
        Ok(Self { categories, codes })
    }

    /// Encode values, assigning categories in order of first appearance
    pub fn from_values<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let mut categories: Vec<String> = Vec::new();
        let mut lookup: HashMap<String, u32> = HashMap::new();
        let codes = values
            .into_iter()
            .map(|value| {
                value.map(|text| {
                    *lookup.entry(text.to_string()).or_insert_with(|| {
                        categories.push(text.to_string());
                        (categories.len() - 1) as u32
                    })
                })
            })
            .collect();
        Self { categories, codes }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn codes(&self) -> &[Option<u32>] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&str> {
        self.codes
            .get(row)
            .copied()
            .flatten()
            .map(|code| self.categories[code as usize].as_str())
    }
}

/// One metadata column
#[derive(Debug, Clone)]
pub enum Column {
    /// Floating point values; `NaN` marks a missing cell
    Numeric(Vec<f64>),
    Boolean(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Categorical(Categorical),
}

/// Borrowed view of one cell, used for value comparisons
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Missing,
    Numeric(f64),
    Boolean(bool),
    Text(&'a str),
}

impl Column {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Numeric(_) => ColumnKind::Numeric,
            Column::Boolean(_) => ColumnKind::Boolean,
            Column::Text(_) => ColumnKind::Text,
            Column::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Boolean(values) => values.len(),
            Column::Text(values) => values.len(),
            Column::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column of `len` missing cells
    pub fn missing(kind: ColumnKind, len: usize) -> Column {
        match kind {
            ColumnKind::Numeric => Column::Numeric(vec![f64::NAN; len]),
            ColumnKind::Boolean => Column::Boolean(vec![None; len]),
            ColumnKind::Text => Column::Text(vec![None; len]),
            ColumnKind::Categorical => Column::Categorical(Categorical {
                categories: Vec::new(),
                codes: vec![None; len],
            }),
        }
    }

    pub fn cell(&self, row: usize) -> Cell<'_> {
        match self {
            Column::Numeric(values) => match values.get(row) {
                Some(value) if !value.is_nan() => Cell::Numeric(*value),
                _ => Cell::Missing,
            },
            Column::Boolean(values) => values
                .get(row)
                .copied()
                .flatten()
                .map_or(Cell::Missing, Cell::Boolean),
            Column::Text(values) => values
                .get(row)
                .and_then(Option::as_deref)
                .map_or(Cell::Missing, Cell::Text),
            Column::Categorical(values) => values.get(row).map_or(Cell::Missing, Cell::Text),
        }
    }

    /// Select rows by already-validated positions
    pub fn take(&self, positions: &[usize]) -> Column {
        match self {
            Column::Numeric(values) => Column::Numeric(positions.iter().map(|&p| values[p]).collect()),
            Column::Boolean(values) => Column::Boolean(positions.iter().map(|&p| values[p]).collect()),
            Column::Text(values) => {
                Column::Text(positions.iter().map(|&p| values[p].clone()).collect())
            }
            Column::Categorical(values) => Column::Categorical(Categorical {
                categories: values.categories.clone(),
                codes: positions.iter().map(|&p| values.codes[p]).collect(),
            }),
        }
    }

    /// Rows by position, `None` producing a missing cell
    pub fn reindex(&self, positions: &[Option<usize>]) -> Column {
        let picks: Vec<Option<(usize, usize)>> =
            positions.iter().map(|p| p.map(|row| (0, row))).collect();
        match self {
            Column::Numeric(values) => Column::Numeric(
                positions
                    .iter()
                    .map(|p| p.map_or(f64::NAN, |row| values[row]))
                    .collect(),
            ),
            Column::Boolean(values) => {
                Column::Boolean(positions.iter().map(|p| p.and_then(|row| values[row])).collect())
            }
            Column::Text(values) => Column::Text(
                positions
                    .iter()
                    .map(|p| p.and_then(|row| values[row].clone()))
                    .collect(),
            ),
            Column::Categorical(values) => Column::Categorical(gather_categorical(&[values], &picks)),
        }
    }

    fn numeric_values(&self, name: &str) -> Result<Cow<'_, [f64]>> {
        match self {
            Column::Numeric(values) => Ok(Cow::Borrowed(values)),
            Column::Boolean(values) => Ok(Cow::Owned(
                values
                    .iter()
                    .map(|value| value.map_or(f64::NAN, |flag| if flag { 1.0 } else { 0.0 }))
                    .collect(),
            )),
            other => Err(conflict(name, ColumnKind::Numeric, other.kind())),
        }
    }

    fn boolean_values(&self, name: &str) -> Result<&[Option<bool>]> {
        match self {
            Column::Boolean(values) => Ok(values),
            other => Err(conflict(name, ColumnKind::Boolean, other.kind())),
        }
    }

    fn text_values(&self, name: &str) -> Result<Cow<'_, [Option<String>]>> {
        match self {
            Column::Text(values) => Ok(Cow::Borrowed(values)),
            Column::Categorical(values) => Ok(Cow::Owned(
                (0..values.len())
                    .map(|row| values.get(row).map(str::to_string))
                    .collect(),
            )),
            other => Err(conflict(name, ColumnKind::Text, other.kind())),
        }
    }

    fn categorical_values(&self, name: &str) -> Result<&Categorical> {
        match self {
            Column::Categorical(values) => Ok(values),
            other => Err(conflict(name, ColumnKind::Categorical, other.kind())),
        }
    }

    /// Common kind of several columns, reporting `SchemaConflict` by name
    pub fn promoted_kind(name: &str, columns: &[&Column]) -> Result<Option<ColumnKind>> {
        let mut kind: Option<ColumnKind> = None;
        for column in columns {
            kind = Some(match kind {
                None => column.kind(),
                Some(current) => current
                    .promote(column.kind())
                    .ok_or_else(|| conflict(name, current, column.kind()))?,
            });
        }
        Ok(kind)
    }

    /// Build a column by picking `(source, row)` cells from `sources`.
    ///
    /// Sources are promoted to their common kind first; `None` picks become
    /// missing cells.
    pub fn gather(
        name: &str,
        sources: &[&Column],
        picks: &[Option<(usize, usize)>],
    ) -> Result<Column> {
        let Some(kind) = Column::promoted_kind(name, sources)? else {
            return Ok(Column::missing(ColumnKind::Numeric, picks.len()));
        };

        let column = match kind {
            ColumnKind::Numeric => {
                let values = sources
                    .iter()
                    .map(|source| source.numeric_values(name))
                    .collect::<Result<Vec<_>>>()?;
                Column::Numeric(
                    picks
                        .iter()
                        .map(|pick| pick.map_or(f64::NAN, |(src, row)| values[src][row]))
                        .collect(),
                )
            }
            ColumnKind::Boolean => {
                let values = sources
                    .iter()
                    .map(|source| source.boolean_values(name))
                    .collect::<Result<Vec<_>>>()?;
                Column::Boolean(
                    picks
                        .iter()
                        .map(|pick| pick.and_then(|(src, row)| values[src][row]))
                        .collect(),
                )
            }
            ColumnKind::Text => {
                let values = sources
                    .iter()
                    .map(|source| source.text_values(name))
                    .collect::<Result<Vec<_>>>()?;
                Column::Text(
                    picks
                        .iter()
                        .map(|pick| pick.and_then(|(src, row)| values[src][row].clone()))
                        .collect(),
                )
            }
            ColumnKind::Categorical => {
                let values = sources
                    .iter()
                    .map(|source| source.categorical_values(name))
                    .collect::<Result<Vec<_>>>()?;
                Column::Categorical(gather_categorical(&values, picks))
            }
        };
        Ok(column)
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.len() == other.len()
            && (0..self.len()).all(|row| self.cell(row) == other.cell(row))
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Column::Numeric(values)
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Column::Boolean(values.into_iter().map(Some).collect())
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Column::Text(values.into_iter().map(|v| Some(v.to_string())).collect())
    }
}

impl From<Categorical> for Column {
    fn from(values: Categorical) -> Self {
        Column::Categorical(values)
    }
}

fn conflict(column: &str, left: ColumnKind, right: ColumnKind) -> Error {
    Error::SchemaConflict {
        column: column.to_string(),
        left: left.name().to_string(),
        right: right.name().to_string(),
    }
}

/// Categories are unioned in first-seen order across sources
fn gather_categorical(sources: &[&Categorical], picks: &[Option<(usize, usize)>]) -> Categorical {
    let mut categories: Vec<String> = Vec::new();
    let mut lookup: HashMap<&str, u32> = HashMap::new();
    let remap: Vec<Vec<u32>> = sources
        .iter()
        .map(|source| {
            source
                .categories
                .iter()
                .map(|category| {
                    *lookup.entry(category.as_str()).or_insert_with(|| {
                        categories.push(category.clone());
                        (categories.len() - 1) as u32
                    })
                })
                .collect()
        })
        .collect();

    let codes = picks
        .iter()
        .map(|pick| {
            pick.and_then(|(src, row)| sources[src].codes[row].map(|code| remap[src][code as usize]))
        })
        .collect();

    Categorical { categories, codes }
}

/// Ordered, named-typed-column table aligned with one axis
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    index: AxisIndex,
    columns: Vec<(String, Column)>,
}

impl Table {
    pub fn new(index: AxisIndex) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<Self> {
        self.set_column(name, column)?;
        Ok(self)
    }

    pub fn index(&self) -> &AxisIndex {
        &self.index
    }

    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    /// Replace the row labels, keeping every column
    pub fn set_index(&mut self, index: AxisIndex) -> Result<()> {
        if index.len() != self.n_rows() {
            return Err(Error::dimension("table index", self.n_rows(), index.len()));
        }
        self.index = index;
        Ok(())
    }

    pub(crate) fn index_mut(&mut self) -> &mut AxisIndex {
        &mut self.index
    }

    /// Insert or replace a column
    pub fn set_column(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        if column.len() != self.n_rows() {
            return Err(Error::dimension(
                format!("column `{name}`"),
                self.n_rows(),
                column.len(),
            ));
        }
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = column,
            None => self.columns.push((name, column)),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let position = self.columns.iter().position(|(existing, _)| existing == name)?;
        Some(self.columns.remove(position).1)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, column)| column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> + '_ {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<Cell<'_>> {
        self.column(name).map(|column| column.cell(row))
    }

    /// Select rows by already-validated positions
    pub fn take(&self, positions: &[usize]) -> Table {
        Table {
            index: self.index.take(positions),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.take(positions)))
                .collect(),
        }
    }

    /// Stack tables row-wise under a new index.
    ///
    /// `inner` keeps the columns every table has, `outer` keeps all of them
    /// in first-seen order and fills the gaps with missing cells.
    pub fn concat_rows(parts: &[&Table], index: AxisIndex, join: Join) -> Result<Table> {
        let total: usize = parts.iter().map(|part| part.n_rows()).sum();
        if total != index.len() {
            return Err(Error::dimension("concatenated table index", total, index.len()));
        }

        let names = join_names(parts.iter().map(|part| part.column_names()), join);

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let mut sources = Vec::new();
            let mut picks = Vec::with_capacity(total);
            for part in parts {
                match part.column(&name) {
                    Some(column) => {
                        let src = sources.len();
                        sources.push(column);
                        picks.extend((0..part.n_rows()).map(|row| Some((src, row))));
                    }
                    None => picks.extend(std::iter::repeat(None).take(part.n_rows())),
                }
            }
            let column = Column::gather(&name, &sources, &picks)?;
            columns.push((name, column));
        }

        Ok(Table { index, columns })
    }

    /// Rows by position, `None` producing a row of missing cells
    pub fn reindex(&self, positions: &[Option<usize>], index: AxisIndex) -> Result<Table> {
        if index.len() != positions.len() {
            return Err(Error::dimension("reindexed table index", positions.len(), index.len()));
        }
        Ok(Table {
            index,
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.reindex(positions)))
                .collect(),
        })
    }

    pub(crate) fn from_parts(index: AxisIndex, columns: Vec<(String, Column)>) -> Result<Table> {
        let mut table = Table::new(index);
        for (name, column) in columns {
            table.set_column(name, column)?;
        }
        Ok(table)
    }
}

/// Column (or key) names under a join policy, in first-seen order
pub(crate) fn join_names<'a, I>(per_part: I, join: Join) -> Vec<String>
where
    I: IntoIterator<Item = Vec<&'a str>>,
{
    let per_part: Vec<Vec<&str>> = per_part.into_iter().collect();
    let Some(first) = per_part.first() else {
        return Vec::new();
    };
    match join {
        Join::Inner => {
            let others: Vec<HashSet<&str>> = per_part[1..]
                .iter()
                .map(|names| names.iter().copied().collect())
                .collect();
            first
                .iter()
                .filter(|name| others.iter().all(|set| set.contains(*name)))
                .map(|name| name.to_string())
                .collect()
        }
        Join::Outer => {
            let mut seen = HashSet::new();
            per_part
                .iter()
                .flatten()
                .filter(|name| seen.insert(**name))
                .map(|name| name.to_string())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(labels: &[&str]) -> Table {
        Table::new(AxisIndex::new(labels.iter().copied()))
    }

    #[test]
    fn test_promotion_table() {
        use ColumnKind::*;
        assert_eq!(Numeric.promote(Boolean), Some(Numeric));
        assert_eq!(Categorical.promote(Text), Some(Text));
        assert_eq!(Categorical.promote(Categorical), Some(Categorical));
        assert_eq!(Numeric.promote(Text), None);
        assert_eq!(Boolean.promote(Categorical), None);
    }

    #[test]
    fn test_set_column_checks_length() {
        let mut t = table(&["a", "b"]);
        assert!(t.set_column("x", vec![1.0, 2.0]).is_ok());
        assert!(matches!(
            t.set_column("y", vec![1.0]),
            Err(Error::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
        t.set_column("x", vec![3.0, 4.0]).unwrap();
        assert_eq!(t.column_names(), vec!["x"]);
        assert_eq!(t.cell(1, "x"), Some(Cell::Numeric(4.0)));
    }

    #[test]
    fn test_take_keeps_order_and_duplicates() {
        let t = table(&["a", "b", "c"])
            .with_column("n", vec![1.0, 2.0, 3.0])
            .unwrap()
            .with_column("s", vec!["x", "y", "z"])
            .unwrap();
        let taken = t.take(&[2, 0, 2]);
        assert_eq!(taken.index().labels(), &["c", "a", "c"]);
        assert_eq!(taken.column("n"), Some(&Column::Numeric(vec![3.0, 1.0, 3.0])));
        assert_eq!(taken.cell(1, "s"), Some(Cell::Text("x")));
    }

    #[test]
    fn test_concat_rows_outer_fills_missing() {
        let a = table(&["a"]).with_column("n", vec![1.0]).unwrap();
        let b = table(&["b"])
            .with_column("n", vec![true])
            .unwrap()
            .with_column("tag", vec!["t"])
            .unwrap();
        let index = AxisIndex::new(["a", "b"]);
        let out = Table::concat_rows(&[&a, &b], index, Join::Outer).unwrap();
        assert_eq!(out.column_names(), vec!["n", "tag"]);
        assert_eq!(out.column("n"), Some(&Column::Numeric(vec![1.0, 1.0])));
        assert_eq!(out.cell(0, "tag"), Some(Cell::Missing));
        assert_eq!(out.cell(1, "tag"), Some(Cell::Text("t")));
    }

    #[test]
    fn test_concat_rows_inner_and_conflict() {
        let a = table(&["a"])
            .with_column("n", vec![1.0])
            .unwrap()
            .with_column("only_a", vec![0.0])
            .unwrap();
        let b = table(&["b"]).with_column("n", vec!["text"]).unwrap();
        let index = AxisIndex::new(["a", "b"]);
        let err = Table::concat_rows(&[&a, &b], index.clone(), Join::Inner).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref column, .. } if column == "n"));

        let c = table(&["c"]).with_column("n", vec![5.0]).unwrap();
        let out = Table::concat_rows(&[&a, &c], AxisIndex::new(["a", "c"]), Join::Inner).unwrap();
        assert_eq!(out.column_names(), vec!["n"]);
    }

    #[test]
    fn test_reindex_fills_missing_rows() {
        let t = table(&["a", "b"])
            .with_column("n", vec![1.0, 2.0])
            .unwrap()
            .with_column("f", vec![true, false])
            .unwrap();
        let out = t
            .reindex(&[Some(1), None, Some(0)], AxisIndex::new(["b", "z", "a"]))
            .unwrap();
        assert_eq!(out.cell(0, "n"), Some(Cell::Numeric(2.0)));
        assert_eq!(out.cell(1, "n"), Some(Cell::Missing));
        assert_eq!(out.cell(1, "f"), Some(Cell::Missing));
        assert_eq!(out.cell(2, "f"), Some(Cell::Boolean(true)));
    }

    #[test]
    fn test_categorical_union() {
        let a = Column::Categorical(Categorical::from_values([Some("x"), Some("y")]));
        let b = Column::Categorical(Categorical::from_values([Some("z"), Some("x"), None]));
        let picks = [Some((0, 1)), Some((1, 0)), Some((1, 1)), Some((1, 2)), None];
        let out = Column::gather("c", &[&a, &b], &picks).unwrap();
        let Column::Categorical(cat) = &out else {
            panic!("expected categorical, got {out:?}");
        };
        assert_eq!(cat.categories(), &["x", "y", "z"]);
        assert_eq!(cat.get(0), Some("y"));
        assert_eq!(cat.get(1), Some("z"));
        assert_eq!(cat.get(2), Some("x"));
        assert_eq!(cat.get(3), None);
        assert_eq!(cat.get(4), None);
    }

    #[test]
    fn test_categorical_code_validation() {
        assert!(Categorical::new(vec!["a".into()], vec![Some(0), None]).is_ok());
        assert!(matches!(
            Categorical::new(vec!["a".into()], vec![Some(1)]),
            Err(Error::IndexError(_))
        ));
    }
}
