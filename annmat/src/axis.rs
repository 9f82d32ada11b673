//! Axis labels and selector resolution
//!
//! An [`AxisIndex`] is the ordered label sequence of one axis. Label lookups
//! go through a label→position map that is built lazily on first use and
//! lives with the index instance; axis-changing operations always build a
//! new index, so a replaced index never serves a stale map.

use crate::error::{Error, Result};
use hashbrown::{HashMap, HashSet};
use std::fmt;
use std::ops::{Range, RangeFull};
use std::sync::OnceLock;

/// Separator used by [`AxisIndex::make_unique`] unless told otherwise
pub const DEFAULT_UNIQUE_SEPARATOR: &str = "-";

/// One of the two matrix axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Observations (matrix rows)
    #[default]
    Rows,
    /// Variables (matrix columns)
    Cols,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::Rows => Axis::Cols,
            Axis::Cols => Axis::Rows,
        }
    }

    /// Length of this axis for a `(rows, cols)` shape
    pub fn len_of(self, shape: (usize, usize)) -> usize {
        match self {
            Axis::Rows => shape.0,
            Axis::Cols => shape.1,
        }
    }
}

/// Per-axis index expression
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    /// Every position in axis order
    #[default]
    All,
    /// A half-open positional range
    Range(Range<usize>),
    /// Explicit positions; order and duplicates are kept verbatim
    Positions(Vec<usize>),
    /// Labels resolved through the axis index
    Labels(Vec<String>),
    /// Boolean mask; must match the axis length exactly
    Mask(Vec<bool>),
}

impl Selector {
    pub fn positions(positions: impl IntoIterator<Item = usize>) -> Self {
        Selector::Positions(positions.into_iter().collect())
    }

    pub fn labels<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Selector::Labels(labels.into_iter().map(Into::into).collect())
    }

    pub fn mask(mask: impl IntoIterator<Item = bool>) -> Self {
        Selector::Mask(mask.into_iter().collect())
    }
}

impl From<RangeFull> for Selector {
    fn from(_: RangeFull) -> Self {
        Selector::All
    }
}

impl From<Range<usize>> for Selector {
    fn from(range: Range<usize>) -> Self {
        Selector::Range(range)
    }
}

impl From<Vec<usize>> for Selector {
    fn from(positions: Vec<usize>) -> Self {
        Selector::Positions(positions)
    }
}

impl From<&[usize]> for Selector {
    fn from(positions: &[usize]) -> Self {
        Selector::Positions(positions.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Selector {
    fn from(positions: [usize; N]) -> Self {
        Selector::Positions(positions.to_vec())
    }
}

impl From<Vec<bool>> for Selector {
    fn from(mask: Vec<bool>) -> Self {
        Selector::Mask(mask)
    }
}

impl<const N: usize> From<[bool; N]> for Selector {
    fn from(mask: [bool; N]) -> Self {
        Selector::Mask(mask.to_vec())
    }
}

impl From<Vec<String>> for Selector {
    fn from(labels: Vec<String>) -> Self {
        Selector::Labels(labels)
    }
}

impl From<Vec<&str>> for Selector {
    fn from(labels: Vec<&str>) -> Self {
        Selector::labels(labels)
    }
}

impl<const N: usize> From<[&str; N]> for Selector {
    fn from(labels: [&str; N]) -> Self {
        Selector::labels(labels)
    }
}

/// One label rewritten by [`AxisIndex::make_unique`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub position: usize,
    pub from: String,
    pub to: String,
}

/// Result of [`AxisIndex::make_unique`]
#[derive(Debug, Clone)]
pub struct UniqueLabels {
    /// Rewritten index with every label distinct
    pub index: AxisIndex,
    /// Old→new mapping for every rewritten position, in axis order
    pub renamed: Vec<Rename>,
}

#[derive(Debug, Clone)]
struct LabelMap {
    first: HashMap<String, usize>,
    duplicates: bool,
}

impl LabelMap {
    fn build(labels: &[String]) -> Self {
        let mut first = HashMap::with_capacity(labels.len());
        let mut duplicates = false;
        for (position, label) in labels.iter().enumerate() {
            if first.contains_key(label.as_str()) {
                duplicates = true;
            } else {
                first.insert(label.clone(), position);
            }
        }
        Self { first, duplicates }
    }
}

/// Ordered labels of one axis
#[derive(Clone, Default)]
pub struct AxisIndex {
    labels: Vec<String>,
    lookup: OnceLock<LabelMap>,
}

impl AxisIndex {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            lookup: OnceLock::new(),
        }
    }

    /// Positional labels `"0".."n-1"`
    pub fn default_labels(len: usize) -> Self {
        Self::new((0..len).map(|i| i.to_string()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.labels.get(position).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.labels.iter().map(String::as_str)
    }

    pub fn into_labels(self) -> Vec<String> {
        self.labels
    }

    fn label_map(&self) -> &LabelMap {
        self.lookup.get_or_init(|| LabelMap::build(&self.labels))
    }

    /// Position of the first occurrence of `label`
    pub fn lookup(&self, label: &str) -> Option<usize> {
        self.label_map().first.get(label).copied()
    }

    /// Like [`lookup`](Self::lookup) but reports a missing label as `IndexError`
    pub fn position(&self, label: &str) -> Result<usize> {
        self.lookup(label)
            .ok_or_else(|| Error::IndexError(format!("label `{label}` not found")))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }

    pub fn has_duplicates(&self) -> bool {
        self.label_map().duplicates
    }

    /// Labels occurring more than once, in order of first appearance
    pub fn duplicated(&self) -> Vec<&str> {
        if !self.has_duplicates() {
            return Vec::new();
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in &self.labels {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        let mut reported = HashSet::new();
        self.labels
            .iter()
            .map(String::as_str)
            .filter(|label| counts[label] > 1 && reported.insert(*label))
            .collect()
    }

    /// Resolve any selector to a concrete ordered list of positions
    pub fn resolve(&self, selector: &Selector) -> Result<Vec<usize>> {
        let len = self.len();
        match selector {
            Selector::All => Ok((0..len).collect()),
            Selector::Range(range) => {
                if range.start > range.end || range.end > len {
                    return Err(Error::IndexError(format!(
                        "range {}..{} outside axis of length {len}",
                        range.start, range.end
                    )));
                }
                Ok(range.clone().collect())
            }
            Selector::Positions(positions) => {
                if let Some(bad) = positions.iter().find(|&&p| p >= len) {
                    return Err(Error::IndexError(format!(
                        "position {bad} outside axis of length {len}"
                    )));
                }
                Ok(positions.clone())
            }
            Selector::Labels(labels) => {
                if self.has_duplicates() {
                    log::warn!(
                        "label selection on an index with duplicate labels resolves to first occurrences"
                    );
                }
                labels.iter().map(|label| self.position(label)).collect()
            }
            Selector::Mask(mask) => {
                if mask.len() != len {
                    return Err(Error::dimension("boolean mask", len, mask.len()));
                }
                Ok(mask
                    .iter()
                    .enumerate()
                    .filter_map(|(position, &keep)| keep.then_some(position))
                    .collect())
            }
        }
    }

    /// Build a new index from already-validated positions
    pub fn take(&self, positions: &[usize]) -> AxisIndex {
        AxisIndex::new(positions.iter().map(|&p| self.labels[p].clone()))
    }

    /// Labels of every part, in sequence order
    pub fn concat(parts: &[&AxisIndex]) -> AxisIndex {
        AxisIndex::new(
            parts
                .iter()
                .flat_map(|part| part.labels.iter().cloned()),
        )
    }

    /// Append `"{separator}{key}"` to every label
    pub fn with_suffix(&self, separator: &str, key: &str) -> AxisIndex {
        AxisIndex::new(
            self.labels
                .iter()
                .map(|label| format!("{label}{separator}{key}")),
        )
    }

    /// Rewrite duplicate labels with a counter suffix.
    ///
    /// The first occurrence of a label keeps it; later occurrences become
    /// `label{separator}1`, `label{separator}2`, ... in order of appearance.
    /// A generated label that already exists on the axis is skipped in
    /// favour of the next counter value. `self` is left untouched.
    pub fn make_unique(&self, separator: &str) -> UniqueLabels {
        if !self.has_duplicates() {
            return UniqueLabels {
                index: self.clone(),
                renamed: Vec::new(),
            };
        }

        let mut taken: HashSet<String> = self.labels.iter().cloned().collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.len());
        let mut counters: HashMap<&str, usize> = HashMap::new();
        let mut labels = Vec::with_capacity(self.len());
        let mut renamed = Vec::new();

        for (position, label) in self.labels.iter().enumerate() {
            if seen.insert(label.as_str()) {
                labels.push(label.clone());
                continue;
            }
            let counter = counters.entry(label.as_str()).or_insert(0);
            let candidate = loop {
                *counter += 1;
                let candidate = format!("{label}{separator}{counter}");
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(candidate.clone());
            renamed.push(Rename {
                position,
                from: label.clone(),
                to: candidate.clone(),
            });
            labels.push(candidate);
        }

        UniqueLabels {
            index: AxisIndex::new(labels),
            renamed,
        }
    }

    /// Apply [`make_unique`](Self::make_unique), replacing this index
    pub fn make_unique_in_place(&mut self, separator: &str) -> Vec<Rename> {
        let UniqueLabels { index, renamed } = self.make_unique(separator);
        if !renamed.is_empty() {
            *self = index;
        }
        renamed
    }
}

impl PartialEq for AxisIndex {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for AxisIndex {}

impl fmt::Debug for AxisIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AxisIndex").field(&self.labels).finish()
    }
}

impl<S: Into<String>> FromIterator<S> for AxisIndex {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        AxisIndex::new(iter)
    }
}

impl From<Vec<String>> for AxisIndex {
    fn from(labels: Vec<String>) -> Self {
        Self {
            labels,
            lookup: OnceLock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(labels: &[&str]) -> AxisIndex {
        AxisIndex::new(labels.iter().copied())
    }

    #[test]
    fn test_lookup_and_position() {
        let idx = index(&["a", "b", "c"]);
        assert_eq!(idx.lookup("b"), Some(1));
        assert_eq!(idx.lookup("z"), None);
        assert!(matches!(idx.position("z"), Err(Error::IndexError(_))));
        assert!(!idx.has_duplicates());
    }

    #[test]
    fn test_duplicates_reported() {
        let idx = index(&["a", "b", "a", "c", "b", "a"]);
        assert!(idx.has_duplicates());
        assert_eq!(idx.duplicated(), vec!["a", "b"]);
        assert_eq!(idx.lookup("a"), Some(0));
    }

    #[test]
    fn test_resolve_selectors() {
        let idx = index(&["a", "b", "c"]);
        assert_eq!(idx.resolve(&Selector::All).unwrap(), vec![0, 1, 2]);
        assert_eq!(idx.resolve(&Selector::Range(1..3)).unwrap(), vec![1, 2]);
        assert_eq!(idx.resolve(&Selector::positions([2, 0, 2])).unwrap(), vec![2, 0, 2]);
        assert_eq!(idx.resolve(&["c", "a"].into()).unwrap(), vec![2, 0]);
        assert_eq!(
            idx.resolve(&[true, false, true].into()).unwrap(),
            vec![0, 2]
        );
        assert_eq!(idx.resolve(&Selector::Range(0..0)).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_resolve_errors() {
        let idx = index(&["a", "b", "c"]);
        assert!(matches!(
            idx.resolve(&Selector::positions([0, 3])),
            Err(Error::IndexError(_))
        ));
        assert!(matches!(
            idx.resolve(&Selector::Range(2..5)),
            Err(Error::IndexError(_))
        ));
        assert!(matches!(
            idx.resolve(&["missing"].into()),
            Err(Error::IndexError(_))
        ));
        assert!(matches!(
            idx.resolve(&[true, false].into()),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_make_unique_suffix_order() {
        let idx = index(&["a", "b", "a", "a", "b"]);
        let unique = idx.make_unique("-");
        assert_eq!(
            unique.index.labels(),
            &["a", "b", "a-1", "a-2", "b-1"]
        );
        assert_eq!(unique.renamed.len(), 3);
        assert_eq!(
            unique.renamed[0],
            Rename {
                position: 2,
                from: "a".into(),
                to: "a-1".into()
            }
        );
        // the original is untouched
        assert_eq!(idx.labels(), &["a", "b", "a", "a", "b"]);
    }

    #[test]
    fn test_make_unique_skips_existing_labels() {
        let idx = index(&["a", "a", "a-1"]);
        let unique = idx.make_unique("-");
        assert_eq!(unique.index.labels(), &["a", "a-2", "a-1"]);
        assert!(!unique.index.has_duplicates());
    }

    #[test]
    fn test_make_unique_in_place_replaces_cache() {
        let mut idx = index(&["x", "x"]);
        assert_eq!(idx.lookup("x"), Some(0));
        let renamed = idx.make_unique_in_place("_");
        assert_eq!(renamed.len(), 1);
        assert_eq!(idx.lookup("x_1"), Some(1));
        assert!(!idx.has_duplicates());
    }
}
