//! Resizable chunked arrays.
//!
//! Each array is a zarr v3 array node at `/<path>`, managed by `zarrs`.
//! Plain arrays are 1-D and chunked every `chunk_rows` rows. Matrix arrays
//! hold fixed-width `uint8` rows (one genotype per sample) as a 2-D array
//! chunked `chunk_rows x chunk_rows`, so a block of columns is read without
//! decoding whole rows. Chunks that were never written read back as the
//! fill value: zero, JSON null, or an empty list.
//!
//! Writes to distinct chunks may run concurrently. Two writers touching the
//! same chunk must be serialized by the caller.

use crate::codec;
use crate::dtype::{Column, DType};
use crate::store::{storage_err, Store};
use gs_common::{Error, Result};
use gs_config::CodecConfig;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::ReadableWritableListableStorageTraits;

/// Array attribute carrying the genostore layout of a node.
const LAYOUT_ATTR: &str = "genostore";

type ZarrArray = Array<dyn ReadableWritableListableStorageTraits>;

/// Shape and encoding requested when an array is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArraySpec {
    pub dtype: DType,
    /// Row width of a matrix array; `None` for a plain 1-D array.
    pub width: Option<usize>,
    pub chunk_rows: usize,
    pub codec: CodecConfig,
}

impl ArraySpec {
    pub fn new(dtype: DType, chunk_rows: usize, codec: CodecConfig) -> Self {
        Self {
            dtype,
            width: None,
            chunk_rows,
            codec,
        }
    }

    /// Make this a `uint8` matrix with `width` columns.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Layout {
    dtype: DType,
    matrix: bool,
    chunk_rows: usize,
    codec: CodecConfig,
}

fn zarr_type(dtype: DType) -> (DataType, FillValue) {
    match dtype {
        DType::Float64 => (DataType::Float64, FillValue::from(0.0f64)),
        DType::UInt8 => (DataType::UInt8, FillValue::from(0u8)),
        DType::Int32 => (DataType::Int32, FillValue::from(0i32)),
        // JSON text per cell; the empty string reads back as null.
        DType::Json => (DataType::String, FillValue::new(Vec::new())),
        // Ragged int32 rows are stored as packed little-endian bytes.
        DType::RaggedInt32 | DType::RaggedUInt8 => (DataType::Binary, FillValue::new(Vec::new())),
    }
}

fn node_path(path: &str) -> String {
    format!("/{path}")
}

fn parse_json_cell(path: &str, cell: &str) -> Result<serde_json::Value> {
    if cell.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(cell).map_err(|e| storage_err(path, e))
}

fn pack_i32(row: &[i32]) -> Vec<u8> {
    row.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn unpack_i32(path: &str, bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Storage(format!(
            "'{path}': ragged int32 cell of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

struct ArrayInner {
    path: String,
    store: Store,
    layout: Layout,
    array: RwLock<ZarrArray>,
}

/// Handle to one array in a store. Clones refer to the same array.
#[derive(Clone)]
pub struct ChunkedArray {
    inner: Arc<ArrayInner>,
}

impl ChunkedArray {
    /// Create an empty array at `path`, replacing any existing node.
    pub fn create(store: &Store, path: &str, spec: ArraySpec) -> Result<Self> {
        if spec.chunk_rows == 0 {
            return Err(Error::Validation(format!(
                "array '{path}': chunk_rows must be at least 1"
            )));
        }
        if spec.width.is_some() && spec.dtype != DType::UInt8 {
            return Err(Error::Schema(format!(
                "array '{path}': only uint8 arrays may be matrices"
            )));
        }
        store.check_writable(path)?;

        let layout = Layout {
            dtype: spec.dtype,
            matrix: spec.width.is_some(),
            chunk_rows: spec.chunk_rows,
            codec: spec.codec,
        };
        let c = spec.chunk_rows as u64;
        let (shape, chunk_shape) = match spec.width {
            Some(width) => (vec![0, width as u64], vec![c, c]),
            None => (vec![0], vec![c]),
        };
        let (data_type, fill_value) = zarr_type(spec.dtype);
        let mut attributes = Map::new();
        attributes.insert(LAYOUT_ATTR.to_string(), serde_json::to_value(layout)?);

        let array = ArrayBuilder::new(
            shape,
            data_type,
            chunk_shape.try_into().map_err(|e| storage_err(path, e))?,
            fill_value,
        )
        .bytes_to_bytes_codecs(codec::bytes_codecs(spec.codec))
        .attributes(attributes)
        .build(store.storage(), &node_path(path))
        .map_err(|e| storage_err(path, e))?;
        array.store_metadata().map_err(|e| storage_err(path, e))?;
        Ok(Self::from_parts(store, path, layout, array))
    }

    /// Open an existing array node.
    pub fn open(store: &Store, path: &str) -> Result<Self> {
        let array = ZarrArray::open(store.storage(), &node_path(path))
            .map_err(|e| Error::Schema(format!("no array at '{path}': {e}")))?;
        let layout: Layout = array
            .attributes()
            .get(LAYOUT_ATTR)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| Error::Storage(format!("array '{path}' has no genostore layout")))?;
        if layout.chunk_rows == 0 {
            return Err(Error::Storage(format!(
                "array '{path}' metadata has zero chunk_rows"
            )));
        }
        Ok(Self::from_parts(store, path, layout, array))
    }

    fn from_parts(store: &Store, path: &str, layout: Layout, array: ZarrArray) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                path: path.to_string(),
                store: store.clone(),
                layout,
                array: RwLock::new(array),
            }),
        }
    }

    fn array(&self) -> RwLockReadGuard<'_, ZarrArray> {
        match self.inner.array.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn array_mut(&self) -> Result<RwLockWriteGuard<'_, ZarrArray>> {
        self.inner
            .array
            .write()
            .map_err(|_| Error::Concurrency(format!("array '{}' lock poisoned", self.inner.path)))
    }

    fn fail(&self, e: impl fmt::Display) -> Error {
        storage_err(&self.inner.path, e)
    }

    fn shape_of(array: &ZarrArray) -> (usize, usize) {
        let shape = array.shape();
        let len = shape.first().copied().unwrap_or(0) as usize;
        let width = shape.get(1).copied().unwrap_or(1) as usize;
        (len, width)
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn dtype(&self) -> DType {
        self.inner.layout.dtype
    }

    /// Whether rows are fixed-width `uint8` vectors stored 2-D.
    pub fn is_matrix(&self) -> bool {
        self.inner.layout.matrix
    }

    /// Row width; 1 for plain arrays.
    pub fn width(&self) -> usize {
        Self::shape_of(&self.array()).1
    }

    pub fn chunk_rows(&self) -> usize {
        self.inner.layout.chunk_rows
    }

    pub fn codec(&self) -> CodecConfig {
        self.inner.layout.codec
    }

    pub fn len(&self) -> usize {
        Self::shape_of(&self.array()).0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of row chunks covering `len` rows.
    pub fn num_chunks(&self) -> usize {
        self.len().div_ceil(self.chunk_rows())
    }

    fn column_chunks(&self, width: usize) -> usize {
        if self.is_matrix() {
            width.div_ceil(self.chunk_rows())
        } else {
            1
        }
    }

    fn chunk_index(&self, row_chunk: usize, col_chunk: usize) -> Vec<u64> {
        if self.is_matrix() {
            vec![row_chunk as u64, col_chunk as u64]
        } else {
            vec![row_chunk as u64]
        }
    }

    /// Number of chunks actually present in the store.
    pub fn stored_chunks(&self) -> Result<usize> {
        let prefix = format!("{}/c/", self.inner.path);
        Ok(self
            .inner
            .store
            .keys()?
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .count())
    }

    /// Set the row count. Shrinking discards rows past the new end.
    pub fn resize(&self, new_len: usize) -> Result<()> {
        let mut array = self.array_mut()?;
        let (len, width) = Self::shape_of(&array);
        if new_len == len {
            return Ok(());
        }
        self.inner.store.check_writable(&self.inner.path)?;

        if new_len < len {
            let c = self.chunk_rows();
            for row_chunk in new_len.div_ceil(c)..len.div_ceil(c) {
                for col_chunk in 0..self.column_chunks(width) {
                    array
                        .erase_chunk(&self.chunk_index(row_chunk, col_chunk))
                        .map_err(|e| self.fail(e))?;
                }
            }
            if new_len % c != 0 {
                // Blank the boundary chunk past the new end so growing
                // again reads fill values there.
                let boundary_end = (new_len.div_ceil(c) * c).min(len);
                let n = boundary_end - new_len;
                let blank = Column::filled(self.dtype(), width, n);
                self.store_rows(&array, width, new_len, &blank, n)?;
            }
        }

        let mut shape = array.shape().to_vec();
        shape[0] = new_len as u64;
        array.set_shape(shape);
        array.store_metadata().map_err(|e| self.fail(e))?;
        trace!(array = %self.inner.path, from = len, to = new_len, "resized");
        Ok(())
    }

    /// Change the row width of an empty matrix array.
    pub fn reshape_width(&self, width: usize) -> Result<()> {
        if !self.is_matrix() {
            return Err(Error::Schema(format!(
                "'{}' is not a matrix array",
                self.inner.path
            )));
        }
        let mut array = self.array_mut()?;
        let (len, _) = Self::shape_of(&array);
        if len != 0 {
            return Err(Error::Schema(format!(
                "cannot change width of '{}' with {len} rows",
                self.inner.path
            )));
        }
        self.inner.store.check_writable(&self.inner.path)?;
        array.set_shape(vec![0, width as u64]);
        array.store_metadata().map_err(|e| self.fail(e))
    }

    fn store_rows(
        &self,
        array: &ZarrArray,
        width: usize,
        start: usize,
        src: &Column,
        n: usize,
    ) -> Result<()> {
        let rows = start as u64..(start + n) as u64;
        let subset = if self.is_matrix() {
            if width == 0 {
                return Ok(());
            }
            ArraySubset::new_with_ranges(&[rows, 0..width as u64])
        } else {
            ArraySubset::new_with_ranges(&[rows])
        };
        let stored = match src {
            Column::Float64(v) => array.store_array_subset_elements::<f64>(&subset, &v[..n]),
            Column::Int32(v) => array.store_array_subset_elements::<i32>(&subset, &v[..n]),
            Column::UInt8 { width, data, .. } => {
                array.store_array_subset_elements::<u8>(&subset, &data[..n * width])
            }
            Column::Json(v) => {
                let cells = v[..n]
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                array.store_array_subset_elements::<String>(&subset, &cells)
            }
            Column::RaggedInt32(v) => {
                let cells: Vec<Vec<u8>> = v[..n].iter().map(|row| pack_i32(row)).collect();
                array.store_array_subset_elements::<Vec<u8>>(&subset, &cells)
            }
            Column::RaggedUInt8(v) => {
                array.store_array_subset_elements::<Vec<u8>>(&subset, &v[..n])
            }
        };
        stored.map_err(|e| self.fail(e))
    }

    /// Write `src[..n]` to rows `start..start + n`.
    ///
    /// The rows must already exist (see [`ChunkedArray::resize`]). Chunks
    /// only partly covered by the write are merged by `zarrs`.
    pub fn write_rows(&self, start: usize, src: &Column, n: usize) -> Result<()> {
        let array = self.array();
        let (len, width) = Self::shape_of(&array);
        if src.dtype() != self.dtype() || src.width() != width {
            return Err(Error::Schema(format!(
                "cannot write {} (width {}) rows into '{}' ({} width {width})",
                src.dtype(),
                src.width(),
                self.inner.path,
                self.dtype(),
            )));
        }
        if n > src.len() {
            return Err(Error::Schema(format!(
                "asked to write {n} rows from a buffer of {}",
                src.len()
            )));
        }
        if start + n > len {
            return Err(Error::Schema(format!(
                "rows {start}..{} outside '{}' of length {len}",
                start + n,
                self.inner.path,
            )));
        }
        self.inner.store.check_writable(&self.inner.path)?;
        if n == 0 {
            return Ok(());
        }
        trace!(array = %self.inner.path, start, rows = n, "writing rows");
        self.store_rows(&array, width, start, src, n)
    }

    fn retrieve(&self, array: &ZarrArray, rows: Range<usize>, cols: Range<usize>) -> Result<Column> {
        let n = rows.len();
        let row_range = rows.start as u64..rows.end as u64;
        if self.is_matrix() {
            let width = cols.len();
            if n == 0 || width == 0 {
                return Ok(Column::filled(DType::UInt8, width, n));
            }
            let subset =
                ArraySubset::new_with_ranges(&[row_range, cols.start as u64..cols.end as u64]);
            let data = array
                .retrieve_array_subset_elements::<u8>(&subset)
                .map_err(|e| self.fail(e))?;
            return Ok(Column::UInt8 { width, rows: n, data });
        }
        if n == 0 {
            return Ok(Column::filled(self.dtype(), 1, 0));
        }

        let subset = ArraySubset::new_with_ranges(&[row_range]);
        let path = self.inner.path.as_str();
        Ok(match self.dtype() {
            DType::Float64 => Column::Float64(
                array
                    .retrieve_array_subset_elements::<f64>(&subset)
                    .map_err(|e| self.fail(e))?,
            ),
            DType::Int32 => Column::Int32(
                array
                    .retrieve_array_subset_elements::<i32>(&subset)
                    .map_err(|e| self.fail(e))?,
            ),
            DType::UInt8 => Column::UInt8 {
                width: 1,
                rows: n,
                data: array
                    .retrieve_array_subset_elements::<u8>(&subset)
                    .map_err(|e| self.fail(e))?,
            },
            DType::Json => Column::Json(
                array
                    .retrieve_array_subset_elements::<String>(&subset)
                    .map_err(|e| self.fail(e))?
                    .iter()
                    .map(|cell| parse_json_cell(path, cell))
                    .collect::<Result<_>>()?,
            ),
            DType::RaggedInt32 => Column::RaggedInt32(
                array
                    .retrieve_array_subset_elements::<Vec<u8>>(&subset)
                    .map_err(|e| self.fail(e))?
                    .iter()
                    .map(|cell| unpack_i32(path, cell))
                    .collect::<Result<_>>()?,
            ),
            DType::RaggedUInt8 => Column::RaggedUInt8(
                array
                    .retrieve_array_subset_elements::<Vec<u8>>(&subset)
                    .map_err(|e| self.fail(e))?,
            ),
        })
    }

    /// Rows of the `index`-th row chunk, clipped to `len`.
    pub fn read_chunk(&self, index: usize) -> Result<Column> {
        let array = self.array();
        let (len, width) = Self::shape_of(&array);
        let c = self.chunk_rows();
        if index >= len.div_ceil(c) {
            return Err(Error::Schema(format!(
                "chunk {index} outside '{}' with {} chunks",
                self.inner.path,
                len.div_ceil(c)
            )));
        }
        let rows = index * c..((index + 1) * c).min(len);
        self.retrieve(&array, rows, 0..width)
    }

    pub fn read_rows(&self, range: Range<usize>) -> Result<Column> {
        let array = self.array();
        let (len, width) = Self::shape_of(&array);
        if range.start > range.end || range.end > len {
            return Err(Error::Schema(format!(
                "rows {}..{} outside '{}' of length {len}",
                range.start, range.end, self.inner.path
            )));
        }
        self.retrieve(&array, range, 0..width)
    }

    pub fn read_all(&self) -> Result<Column> {
        self.read_rows(0..self.len())
    }

    /// The `rows x cols` block of a matrix array. Only the chunks that
    /// intersect the block are decoded.
    pub fn read_block(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Column> {
        if !self.is_matrix() {
            return Err(Error::Schema(format!(
                "'{}' is not a matrix array",
                self.inner.path
            )));
        }
        let array = self.array();
        let (len, width) = Self::shape_of(&array);
        if rows.start > rows.end || rows.end > len || cols.start > cols.end || cols.end > width {
            return Err(Error::Schema(format!(
                "block {}..{} x {}..{} outside '{}' of shape {len} x {width}",
                rows.start, rows.end, cols.start, cols.end, self.inner.path
            )));
        }
        self.retrieve(&array, rows, cols)
    }
}

impl fmt::Debug for ChunkedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedArray")
            .field("path", &self.inner.path)
            .field("layout", &self.inner.layout)
            .field("len", &self.len())
            .finish()
    }
}

impl fmt::Display for ChunkedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stored = self
            .stored_chunks()
            .map(|n| n.to_string())
            .unwrap_or_else(|_| "?".to_string());
        write!(
            f,
            "{}: dtype={} len={} chunks={}/{} chunk_rows={} codec={}",
            self.inner.path,
            self.dtype(),
            self.len(),
            stored,
            self.num_chunks() * self.column_chunks(self.width()),
            self.chunk_rows(),
            self.codec()
        )?;
        if self.is_matrix() {
            write!(f, " width={}", self.width())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Value;
    use proptest::prelude::*;
    use serde_json::json;

    fn int_array(chunk_rows: usize) -> ChunkedArray {
        let spec = ArraySpec::new(DType::Int32, chunk_rows, CodecConfig::default());
        ChunkedArray::create(&Store::memory(), "values", spec).unwrap()
    }

    fn matrix(store: &Store, chunk_rows: usize, width: usize) -> ChunkedArray {
        let spec = ArraySpec::new(DType::UInt8, chunk_rows, CodecConfig::None).with_width(width);
        ChunkedArray::create(store, "sites/genotypes", spec).unwrap()
    }

    #[test]
    fn test_create_then_open() {
        let store = Store::memory();
        let array = matrix(&store, 4, 3);
        array.resize(5).unwrap();

        let reopened = ChunkedArray::open(&store, "sites/genotypes").unwrap();
        assert_eq!(reopened.len(), 5);
        assert_eq!(reopened.width(), 3);
        assert!(reopened.is_matrix());
        assert_eq!(reopened.num_chunks(), 2);
        assert_eq!(reopened.chunk_rows(), 4);
    }

    #[test]
    fn test_open_missing_array() {
        assert!(matches!(
            ChunkedArray::open(&Store::memory(), "nope"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_unwritten_rows_read_as_defaults() {
        let array = int_array(4);
        array.resize(6).unwrap();
        assert_eq!(array.read_all().unwrap(), Column::Int32(vec![0; 6]));
        assert_eq!(array.stored_chunks().unwrap(), 0);
    }

    #[test]
    fn test_partial_chunk_writes_merge() {
        let array = int_array(4);
        array.resize(6).unwrap();
        array.write_rows(1, &Column::Int32(vec![1, 2]), 2).unwrap();
        array.write_rows(3, &Column::Int32(vec![3, 4, 5]), 3).unwrap();
        assert_eq!(array.read_all().unwrap(), Column::Int32(vec![0, 1, 2, 3, 4, 5]));
        assert_eq!(array.read_rows(2..5).unwrap(), Column::Int32(vec![2, 3, 4]));
    }

    #[test]
    fn test_write_past_end_is_rejected() {
        let array = int_array(4);
        array.resize(2).unwrap();
        let err = array.write_rows(1, &Column::Int32(vec![1, 2]), 2).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_write_wrong_dtype_is_rejected() {
        let array = int_array(4);
        array.resize(1).unwrap();
        assert!(array.write_rows(0, &Column::Float64(vec![1.0]), 1).is_err());
    }

    #[test]
    fn test_shrink_discards_rows() {
        let array = int_array(2);
        array.resize(5).unwrap();
        array
            .write_rows(0, &Column::Int32(vec![1, 2, 3, 4, 5]), 5)
            .unwrap();
        assert_eq!(array.stored_chunks().unwrap(), 3);

        array.resize(3).unwrap();
        assert_eq!(array.stored_chunks().unwrap(), 2);
        array.resize(5).unwrap();
        assert_eq!(array.read_all().unwrap(), Column::Int32(vec![1, 2, 3, 0, 0]));
    }

    #[test]
    fn test_variable_length_cells() {
        let store = Store::memory();
        let json_spec = ArraySpec::new(DType::Json, 2, CodecConfig::default());
        let alleles = ChunkedArray::create(&store, "sites/alleles", json_spec).unwrap();
        alleles.resize(3).unwrap();
        let cells = Column::Json(vec![json!(["A", "T"]), json!({"name": "YRI"})]);
        alleles.write_rows(0, &cells, 2).unwrap();
        assert_eq!(
            alleles.read_all().unwrap(),
            Column::Json(vec![json!(["A", "T"]), json!({"name": "YRI"}), json!(null)])
        );

        let ragged_spec = ArraySpec::new(DType::RaggedInt32, 2, CodecConfig::default());
        let focal = ChunkedArray::create(&store, "ancestors/focal_sites", ragged_spec).unwrap();
        focal.resize(3).unwrap();
        let rows = Column::RaggedInt32(vec![vec![3, -1], vec![], vec![7]]);
        focal.write_rows(0, &rows, 3).unwrap();
        assert_eq!(focal.read_chunk(1).unwrap(), Column::RaggedInt32(vec![vec![7]]));
        assert_eq!(focal.read_all().unwrap(), rows);
    }

    #[test]
    fn test_matrix_chunks_in_both_dimensions() {
        let store = Store::memory();
        let array = matrix(&store, 2, 5);
        array.resize(5).unwrap();
        let mut rows = Column::filled(DType::UInt8, 5, 5);
        for r in 0..5 {
            rows.set(r, Value::UInt8s((0..5).map(|c| (r * 5 + c + 1) as u8).collect()))
                .unwrap();
        }
        array.write_rows(0, &rows, 5).unwrap();
        assert_eq!(array.stored_chunks().unwrap(), 9);

        let block = array.read_block(2..4, 2..4).unwrap();
        assert_eq!(block.width(), 2);
        assert_eq!(block.u8_row(0), Some(&[13u8, 14][..]));
        assert_eq!(block.u8_row(1), Some(&[18u8, 19][..]));
        assert_eq!(array.read_chunk(2).unwrap().u8_row(0), Some(&[21u8, 22, 23, 24, 25][..]));
        assert!(array.read_block(0..1, 4..6).is_err());
    }

    #[test]
    fn test_reshape_width_only_when_empty() {
        let array = matrix(&Store::memory(), 4, 0);
        array.reshape_width(3).unwrap();
        array.resize(1).unwrap();
        let mut row = Column::filled(DType::UInt8, 3, 1);
        row.set(0, Value::UInt8s(vec![1, 0, 1])).unwrap();
        array.write_rows(0, &row, 1).unwrap();
        assert_eq!(array.read_chunk(0).unwrap().u8_row(0), Some(&[1u8, 0, 1][..]));
        assert!(array.reshape_width(2).is_err());
        assert!(int_array(4).reshape_width(2).is_err());
    }

    #[test]
    fn test_sealed_store_rejects_writes_from_old_handles() {
        let store = Store::memory();
        let spec = ArraySpec::new(DType::Float64, 4, CodecConfig::None);
        let handle = ChunkedArray::create(&store, "x", spec).unwrap();
        handle.resize(2).unwrap();
        store.seal();

        assert!(matches!(handle.resize(5), Err(Error::Schema(_))));
        assert!(matches!(
            handle.write_rows(0, &Column::Float64(vec![1.0]), 1),
            Err(Error::Schema(_))
        ));
        assert_eq!(ChunkedArray::open(&store, "x").unwrap().len(), 2);
    }

    #[test]
    fn test_zstd_chunks_are_compressed() {
        let store = Store::memory();
        let spec = ArraySpec::new(DType::Int32, 1024, CodecConfig::Zstd { level: 9 });
        let array = ChunkedArray::create(&store, "values", spec).unwrap();
        array.resize(1024).unwrap();
        let values: Vec<i32> = (0..1024).map(|i| i % 4).collect();
        array.write_rows(0, &Column::Int32(values.clone()), 1024).unwrap();

        let blob = store.get("values/c/0").unwrap().unwrap();
        assert!(blob.len() < 4096 / 10);
        assert_eq!(array.read_all().unwrap(), Column::Int32(values));
    }

    #[test]
    fn test_display_summary() {
        let array = int_array(4);
        array.resize(3).unwrap();
        let text = array.to_string();
        assert!(text.starts_with("values: dtype=int32 len=3"));
        assert!(text.contains("zstd(level=9)"));
    }

    proptest! {
        #[test]
        fn prop_piecewise_writes_match_whole(
            chunk_rows in 1usize..6,
            values in prop::collection::vec(any::<i32>(), 0..40),
            cut in 0usize..40,
        ) {
            let array = int_array(chunk_rows);
            array.resize(values.len()).unwrap();
            let cut = cut.min(values.len());
            let head = Column::Int32(values[..cut].to_vec());
            let tail = Column::Int32(values[cut..].to_vec());
            array.write_rows(0, &head, cut).unwrap();
            array.write_rows(cut, &tail, values.len() - cut).unwrap();
            prop_assert_eq!(array.read_all().unwrap(), Column::Int32(values));
        }
    }
}
