//! annmat file codec
//!
//! A file is a [`FileHeader`], a run of 8-byte aligned blobs and a trailing
//! JSON manifest. The manifest names every element and points at its blobs;
//! numeric metadata columns are blobs too so they round-trip bit for bit.
//!
//! The header is always little-endian. Blobs are raw element bytes in host
//! order, so a file is little-endian only when written on a little-endian
//! host, and it only reads back correctly on a host of the same order.

use crate::anndata::{AnnData, Inner};
use crate::axis::AxisIndex;
use crate::backed::{ArrayLayout, BackedArray, BackedFile, Extent, ReadOptions};
use crate::error::{Error, Result};
use crate::storage::{ArrayData, Matrix, Storage};
use crate::table::{Categorical, Column, Table};
use annmat_core::format::constants::{flags, ALIGNMENT_BOUNDARY};
use annmat_core::{calculate_padding, validate_extent, DataType, FileHeader, MatrixAccess, MatrixFormat};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    shape: (usize, usize),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<ArrayLayout>,
    #[serde(default)]
    layers: BTreeMap<String, ArrayLayout>,
    obs: TableEntry,
    var: TableEntry,
    #[serde(default)]
    obsm: BTreeMap<String, ArrayLayout>,
    #[serde(default)]
    varm: BTreeMap<String, ArrayLayout>,
    #[serde(default)]
    uns: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableEntry {
    index: Vec<String>,
    #[serde(default)]
    columns: Vec<ColumnEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnEntry {
    name: String,
    #[serde(flatten)]
    data: ColumnData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ColumnData {
    /// `f64` blob, NaN for missing
    Numeric { values: Extent },
    Boolean { values: Vec<Option<bool>> },
    Text { values: Vec<Option<String>> },
    Categorical {
        categories: Vec<String>,
        codes: Vec<Option<u32>>,
    },
}

struct PayloadWriter<W: Write> {
    out: W,
    pos: u64,
}

impl<W: Write> PayloadWriter<W> {
    fn new(mut out: W) -> Result<Self> {
        // rewritten once the manifest location is known
        out.write_all(&[0u8; FileHeader::SIZE])?;
        Ok(Self {
            out,
            pos: FileHeader::SIZE as u64,
        })
    }

    fn pad(&mut self) -> Result<()> {
        let padding = calculate_padding(self.pos as usize, ALIGNMENT_BOUNDARY);
        if padding > 0 {
            self.out.write_all(&[0u8; ALIGNMENT_BOUNDARY][..padding])?;
            self.pos += padding as u64;
        }
        Ok(())
    }

    fn blob(&mut self, bytes: &[u8]) -> Result<Extent> {
        self.pad()?;
        let offset = self.pos;
        self.out.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(Extent {
            offset,
            len: bytes.len() as u64,
        })
    }

    fn matrix(&mut self, matrix: &Matrix) -> Result<ArrayLayout> {
        match matrix {
            Matrix::Dense(m) => Ok(ArrayLayout {
                format: MatrixFormat::Dense,
                dtype: m.dtype(),
                shape: m.dimensions(),
                data: self.blob(m.data().as_bytes())?,
                indices: None,
                indptr: None,
            }),
            Matrix::Sparse(m) => Ok(ArrayLayout {
                format: m.format(),
                dtype: m.dtype(),
                shape: m.dimensions(),
                data: self.blob(m.data().as_bytes())?,
                indices: Some(self.blob(bytemuck::cast_slice(m.indices()))?),
                indptr: Some(self.blob(bytemuck::cast_slice(m.indptr()))?),
            }),
        }
    }

    fn table(&mut self, table: &Table) -> Result<TableEntry> {
        let mut columns = Vec::with_capacity(table.n_columns());
        for (name, column) in table.columns() {
            let data = match column {
                Column::Numeric(values) => ColumnData::Numeric {
                    values: self.blob(bytemuck::cast_slice(values.as_slice()))?,
                },
                Column::Boolean(values) => ColumnData::Boolean {
                    values: values.clone(),
                },
                Column::Text(values) => ColumnData::Text {
                    values: values.clone(),
                },
                Column::Categorical(values) => ColumnData::Categorical {
                    categories: values.categories().to_vec(),
                    codes: values.codes().to_vec(),
                },
            };
            columns.push(ColumnEntry {
                name: name.to_string(),
                data,
            });
        }
        Ok(TableEntry {
            index: table.index().labels().to_vec(),
            columns,
        })
    }

    fn finish(mut self) -> Result<(W, u64)> {
        self.pad()?;
        self.out.flush()?;
        Ok((self.out, self.pos))
    }
}

/// Write `data` to `path`, replacing it atomically.
///
/// Views and backed containers are written through their reads. The file
/// is assembled next to `path` and only moved into place once complete, so
/// a failed write leaves an existing destination untouched.
pub fn write(path: impl AsRef<Path>, data: &AnnData) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)?;
    let mut writer = PayloadWriter::new(BufWriter::new(temp))?;

    let x = if data.has_x() {
        Some(writer.matrix(&data.read_x()?)?)
    } else {
        None
    };
    let mut layers = BTreeMap::new();
    for name in data.layer_names() {
        layers.insert(name.to_string(), writer.matrix(&data.read_layer(name)?)?);
    }
    let mut obsm = BTreeMap::new();
    for name in data.obsm_names() {
        obsm.insert(name.to_string(), writer.matrix(&data.read_obsm(name)?)?);
    }
    let mut varm = BTreeMap::new();
    for name in data.varm_names() {
        varm.insert(name.to_string(), writer.matrix(&data.read_varm(name)?)?);
    }
    let obs = writer.table(&data.obs())?;
    let var = writer.table(&data.var())?;

    let sparse_x = x.as_ref().is_some_and(|layout| layout.format.is_sparse());
    let manifest = Manifest {
        shape: data.shape(),
        x,
        layers,
        obs,
        var,
        obsm,
        varm,
        uns: data.uns().clone(),
    };
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    let manifest_extent = writer.blob(&manifest_bytes)?;
    let (out, total) = writer.finish()?;

    let mut header = FileHeader::new();
    header.nrows = data.n_obs() as u64;
    header.ncols = data.n_vars() as u64;
    header.manifest_offset = manifest_extent.offset;
    header.manifest_size = manifest_extent.len;
    if !manifest.layers.is_empty() {
        header.flags |= flags::HAS_LAYERS;
    }
    if sparse_x {
        header.flags |= flags::SPARSE_X;
    }

    let mut temp = out.into_inner().map_err(|err| err.into_error())?;
    temp.seek(SeekFrom::Start(0))?;
    temp.write_all(&header.to_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;

    info!(
        "wrote {} ({}x{}, {} layers, {} bytes)",
        path.display(),
        data.n_obs(),
        data.n_vars(),
        manifest.layers.len(),
        total
    );
    Ok(())
}

fn read_manifest(file: &BackedFile) -> Result<Manifest> {
    file.with_bytes(|bytes| {
        let header = FileHeader::from_bytes(bytes)?;
        let (offset, size) = header.manifest_region(bytes.len() as u64)?;
        let region = &bytes[offset as usize..(offset + size) as usize];
        let manifest: Manifest =
            serde_json::from_slice(region).map_err(|err| Error::Manifest(err.to_string()))?;
        if (header.nrows, header.ncols) != (manifest.shape.0 as u64, manifest.shape.1 as u64) {
            return Err(Error::Manifest(format!(
                "header shape {}x{} disagrees with manifest shape {}x{}",
                header.nrows, header.ncols, manifest.shape.0, manifest.shape.1
            )));
        }
        Ok(manifest)
    })
}

fn check_shape(element: &str, expected: (usize, usize), layout: &ArrayLayout) -> Result<()> {
    if layout.shape != expected {
        return Err(Error::Manifest(format!(
            "{element} is {}x{}, expected {}x{}",
            layout.shape.0, layout.shape.1, expected.0, expected.1
        )));
    }
    Ok(())
}

fn decode_table(bytes: &[u8], entry: &TableEntry, rows: usize, axis: &str) -> Result<Table> {
    if entry.index.len() != rows {
        return Err(Error::Manifest(format!(
            "{axis} index has {} labels, expected {rows}",
            entry.index.len()
        )));
    }
    let mut table = Table::new(AxisIndex::new(entry.index.iter().cloned()));
    for ColumnEntry { name, data } in &entry.columns {
        let column = match data {
            ColumnData::Numeric { values } => {
                validate_extent(values.offset, values.len, bytes.len() as u64)?;
                let blob = &bytes[values.offset as usize..(values.offset + values.len) as usize];
                Column::Numeric(ArrayData::from_bytes(DataType::F64, blob)?.to_f64_vec())
            }
            ColumnData::Boolean { values } => Column::Boolean(values.clone()),
            ColumnData::Text { values } => Column::Text(values.clone()),
            ColumnData::Categorical { categories, codes } => {
                Column::Categorical(Categorical::new(categories.clone(), codes.clone())?)
            }
        };
        table
            .set_column(name.clone(), column)
            .map_err(|err| Error::Manifest(format!("{axis} column `{name}`: {err}")))?;
    }
    Ok(table)
}

fn load_annotations(
    file: &Arc<BackedFile>,
    group: &str,
    entries: &BTreeMap<String, ArrayLayout>,
    rows: usize,
) -> Result<BTreeMap<String, Matrix>> {
    entries
        .iter()
        .map(|(name, layout)| {
            if layout.shape.0 != rows {
                return Err(Error::Manifest(format!(
                    "{group}/{name} has {} rows, expected {rows}",
                    layout.shape.0
                )));
            }
            let array = BackedArray::new(Arc::clone(file), format!("{group}/{name}"), layout.clone())?;
            Ok((name.clone(), array.read_all(&ReadOptions::default())?))
        })
        .collect()
}

/// Open `path` as a backed container.
///
/// X and the layers stay on disk and are read chunk by chunk; metadata
/// tables, annotations and `uns` are loaded. The file stays mapped while
/// any container or view opened from it is alive.
pub fn open(path: impl AsRef<Path>) -> Result<AnnData> {
    let path = path.as_ref();
    let file = BackedFile::open(path)?;
    let manifest = read_manifest(&file)?;
    let shape = manifest.shape;

    let x = match &manifest.x {
        Some(layout) => {
            check_shape("X", shape, layout)?;
            Some(Storage::Backed(BackedArray::new(Arc::clone(&file), "X", layout.clone())?))
        }
        None => None,
    };
    let mut layers = BTreeMap::new();
    for (name, layout) in &manifest.layers {
        check_shape(&format!("layers/{name}"), shape, layout)?;
        let array = BackedArray::new(Arc::clone(&file), format!("layers/{name}"), layout.clone())?;
        layers.insert(name.clone(), Storage::Backed(array));
    }

    let (obs, var) = file.with_bytes(|bytes| {
        Ok((
            decode_table(bytes, &manifest.obs, shape.0, "obs")?,
            decode_table(bytes, &manifest.var, shape.1, "var")?,
        ))
    })?;
    let obsm = load_annotations(&file, "obsm", &manifest.obsm, shape.0)?;
    let varm = load_annotations(&file, "varm", &manifest.varm, shape.1)?;

    debug!(
        "opened {} ({}x{}, {} layers)",
        path.display(),
        shape.0,
        shape.1,
        layers.len()
    );
    Ok(AnnData::from_inner(Inner {
        x,
        layers,
        obs,
        var,
        obsm,
        varm,
        uns: manifest.uns,
    }))
}

/// Read `path` fully into memory
pub fn read(path: impl AsRef<Path>) -> Result<AnnData> {
    open(path)?.to_memory()
}

impl AnnData {
    /// Shorthand for [`write`]
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        write(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Selector;
    use crate::storage::{CompressedMatrix, DenseMatrix};
    use crate::table::Cell;
    use annmat_core::FormatError;
    use tempfile::TempDir;

    fn sample() -> AnnData {
        let dense = DenseMatrix::new(3, 2, vec![1.0f32, 0.0, 0.0, 2.5, 3.0, 0.0]).unwrap();
        let x = CompressedMatrix::from_dense(&dense, MatrixFormat::Csr);
        let obs = Table::new(AxisIndex::new(["c0", "c1", "c2"]))
            .with_column("score", vec![0.1, f64::NAN, 1e-300])
            .unwrap()
            .with_column("kept", vec![true, false, true])
            .unwrap()
            .with_column("note", vec!["a", "b", "c"])
            .unwrap()
            .with_column("type", Categorical::from_values([Some("t"), None, Some("b")]))
            .unwrap();
        AnnData::new(x, obs, Table::new(AxisIndex::new(["g0", "g1"])))
            .unwrap()
            .with_layer("counts", DenseMatrix::new(3, 2, vec![1i64, 2, 3, 4, 5, 6]).unwrap())
            .unwrap()
            .with_obsm("pca", DenseMatrix::new(3, 1, vec![0.5f64, 1.5, 2.5]).unwrap())
            .unwrap()
            .with_uns("params", serde_json::json!({"k": 3}))
            .unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.annm");
        let original = sample();
        original.write(&path).unwrap();

        let loaded = read(&path).unwrap();
        assert!(!loaded.is_backed());
        assert_eq!(loaded.read_x().unwrap(), original.read_x().unwrap());
        assert_eq!(loaded.read_layer("counts").unwrap(), original.read_layer("counts").unwrap());
        assert_eq!(loaded.read_obsm("pca").unwrap(), original.read_obsm("pca").unwrap());
        assert_eq!(loaded.obs().as_ref(), original.obs().as_ref());
        assert_eq!(loaded.obs().cell(2, "score"), Some(Cell::Numeric(1e-300)));
        assert_eq!(loaded.uns(), original.uns());
    }

    #[test]
    fn test_open_is_backed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.annm");
        sample().write(&path).unwrap();

        let opened = open(&path).unwrap();
        assert!(opened.is_backed());
        assert_eq!(opened.shape(), (3, 2));
        assert_eq!(opened.layer_names(), vec!["counts"]);
        assert_eq!(opened.read_x().unwrap().get_f64(1, 1), Some(2.5));
    }

    #[test]
    fn test_open_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(open(dir.path().join("missing.annm")), Err(Error::NotFound(_))));

        let junk = dir.path().join("junk.annm");
        std::fs::write(&junk, vec![7u8; 100]).unwrap();
        assert!(matches!(open(&junk), Err(Error::Format(_))));
    }

    #[test]
    fn test_failed_write_keeps_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.annm");
        let dest = dir.path().join("dest.annm");
        sample().write(&source).unwrap();
        std::fs::write(&dest, b"previous").unwrap();

        let backed = open(&source).unwrap();
        if let Some(Storage::Backed(array)) = &backed.root().x {
            array.file().close();
        }
        assert!(matches!(backed.write(&dest), Err(Error::BackingUnavailable(_))));
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
    }

    #[test]
    fn test_corrupt_indptr_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.annm");
        sample().write(&path).unwrap();

        let indptr = match &open(&path).unwrap().root().x {
            Some(Storage::Backed(array)) => array.layout().indptr.unwrap(),
            _ => panic!("expected backed X"),
        };
        let mut bytes = std::fs::read(&path).unwrap();
        // [0, 1, 2, 3] becomes [0, 1, 0, 3]
        let at = indptr.offset as usize + 2 * 8;
        bytes[at..at + 8].copy_from_slice(&0u64.to_ne_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let opened = open(&path).unwrap();
        let view = opened.select(Selector::Range(1..3), ..).unwrap();
        assert!(matches!(
            view.read_x(),
            Err(Error::Format(FormatError::CorruptedData))
        ));
        assert!(matches!(
            opened.read_x(),
            Err(Error::Format(FormatError::CorruptedData))
        ));
    }

    #[test]
    fn test_header_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.annm");
        sample().write(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let header = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.flags, flags::HAS_LAYERS | flags::SPARSE_X);
        assert_eq!((header.nrows, header.ncols), (3, 2));
        assert_eq!(header.manifest_offset % 8, 0);
    }
}
