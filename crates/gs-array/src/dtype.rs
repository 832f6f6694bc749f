//! Element types, cell values, and column buffers.
//!
//! A [`Column`] holds a contiguous run of rows of one [`DType`]. Write
//! buffers and read blocks are both columns.

use gs_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Element type of a chunked array, persisted by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "float64")]
    Float64,
    /// Bytes; rows may be fixed-width (e.g. one genotype per sample).
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "int32")]
    Int32,
    /// Arbitrary JSON values (metadata, allele lists).
    #[serde(rename = "object:json")]
    Json,
    /// Variable-length int32 lists.
    #[serde(rename = "array:i4")]
    RaggedInt32,
    /// Variable-length byte lists.
    #[serde(rename = "array:u1")]
    RaggedUInt8,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Float64 => "float64",
            DType::UInt8 => "uint8",
            DType::Int32 => "int32",
            DType::Json => "object:json",
            DType::RaggedInt32 => "array:i4",
            DType::RaggedUInt8 => "array:u1",
        };
        f.write_str(name)
    }
}

/// One cell destined for (or read from) a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float64(f64),
    UInt8(u8),
    Int32(i32),
    Json(serde_json::Value),
    /// A fixed-width `uint8` row or a ragged byte list.
    UInt8s(Vec<u8>),
    Int32s(Vec<i32>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Float64(_) => "float64",
            Value::UInt8(_) => "uint8",
            Value::Int32(_) => "int32",
            Value::Json(_) => "json",
            Value::UInt8s(_) => "uint8 list",
            Value::Int32s(_) => "int32 list",
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::UInt8(u8::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::UInt8s(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::Int32s(v)
    }
}

/// A run of rows of a single dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float64(Vec<f64>),
    /// Row-major bytes, `width` per row.
    UInt8 {
        width: usize,
        rows: usize,
        data: Vec<u8>,
    },
    Int32(Vec<i32>),
    Json(Vec<serde_json::Value>),
    RaggedInt32(Vec<Vec<i32>>),
    RaggedUInt8(Vec<Vec<u8>>),
}

impl Column {
    /// A column of `rows` default-valued rows (zero, null, or empty).
    pub fn filled(dtype: DType, width: usize, rows: usize) -> Self {
        match dtype {
            DType::Float64 => Column::Float64(vec![0.0; rows]),
            DType::UInt8 => Column::UInt8 {
                width,
                rows,
                data: vec![0; width * rows],
            },
            DType::Int32 => Column::Int32(vec![0; rows]),
            DType::Json => Column::Json(vec![serde_json::Value::Null; rows]),
            DType::RaggedInt32 => Column::RaggedInt32(vec![Vec::new(); rows]),
            DType::RaggedUInt8 => Column::RaggedUInt8(vec![Vec::new(); rows]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Column::Float64(_) => DType::Float64,
            Column::UInt8 { .. } => DType::UInt8,
            Column::Int32(_) => DType::Int32,
            Column::Json(_) => DType::Json,
            Column::RaggedInt32(_) => DType::RaggedInt32,
            Column::RaggedUInt8(_) => DType::RaggedUInt8,
        }
    }

    /// Row width; only fixed-width `uint8` columns have a width other than 1.
    pub fn width(&self) -> usize {
        match self {
            Column::UInt8 { width, .. } => *width,
            _ => 1,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Float64(v) => v.len(),
            Column::UInt8 { rows, .. } => *rows,
            Column::Int32(v) => v.len(),
            Column::Json(v) => v.len(),
            Column::RaggedInt32(v) => v.len(),
            Column::RaggedUInt8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that `value` can be stored in this column without writing it.
    pub fn check(&self, value: &Value) -> Result<()> {
        let ok = match (self, value) {
            (Column::Float64(_), Value::Float64(_)) => true,
            (Column::Int32(_), Value::Int32(_)) => true,
            (Column::Json(_), Value::Json(_)) => true,
            (Column::RaggedInt32(_), Value::Int32s(_)) => true,
            (Column::RaggedUInt8(_), Value::UInt8s(_)) => true,
            (Column::UInt8 { width, .. }, Value::UInt8(_)) => *width == 1,
            (Column::UInt8 { width, .. }, Value::UInt8s(row)) => {
                if row.len() != *width {
                    return Err(Error::Schema(format!(
                        "uint8 row has {} values, column width is {}",
                        row.len(),
                        width
                    )));
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Schema(format!(
                "cannot store {} value in {} column",
                value.kind(),
                self.dtype()
            )))
        }
    }

    /// Overwrite row `row` with `value`.
    pub fn set(&mut self, row: usize, value: Value) -> Result<()> {
        self.check(&value)?;
        if row >= self.len() {
            return Err(Error::Schema(format!(
                "row {row} out of range for column of {} rows",
                self.len()
            )));
        }
        match (self, value) {
            (Column::Float64(v), Value::Float64(x)) => v[row] = x,
            (Column::Int32(v), Value::Int32(x)) => v[row] = x,
            (Column::Json(v), Value::Json(x)) => v[row] = x,
            (Column::RaggedInt32(v), Value::Int32s(x)) => v[row] = x,
            (Column::RaggedUInt8(v), Value::UInt8s(x)) => v[row] = x,
            (Column::UInt8 { data, .. }, Value::UInt8(x)) => data[row] = x,
            (Column::UInt8 { width, data, .. }, Value::UInt8s(x)) => {
                let w = *width;
                data[row * w..(row + 1) * w].copy_from_slice(&x);
            }
            _ => unreachable!("checked above"),
        }
        Ok(())
    }

    /// Read one row back as a value.
    pub fn get(&self, row: usize) -> Option<Value> {
        if row >= self.len() {
            return None;
        }
        Some(match self {
            Column::Float64(v) => Value::Float64(v[row]),
            Column::Int32(v) => Value::Int32(v[row]),
            Column::Json(v) => Value::Json(v[row].clone()),
            Column::RaggedInt32(v) => Value::Int32s(v[row].clone()),
            Column::RaggedUInt8(v) => Value::UInt8s(v[row].clone()),
            Column::UInt8 { width: 1, data, .. } => Value::UInt8(data[row]),
            Column::UInt8 { width, data, .. } => {
                Value::UInt8s(data[row * width..(row + 1) * width].to_vec())
            }
        })
    }

    /// Copy of the rows in `range`.
    pub fn slice(&self, range: Range<usize>) -> Column {
        match self {
            Column::Float64(v) => Column::Float64(v[range].to_vec()),
            Column::Int32(v) => Column::Int32(v[range].to_vec()),
            Column::Json(v) => Column::Json(v[range].to_vec()),
            Column::RaggedInt32(v) => Column::RaggedInt32(v[range].to_vec()),
            Column::RaggedUInt8(v) => Column::RaggedUInt8(v[range].to_vec()),
            Column::UInt8 { width, data, .. } => Column::UInt8 {
                width: *width,
                rows: range.len(),
                data: data[range.start * width..range.end * width].to_vec(),
            },
        }
    }

    /// Copy `src[src_range]` over `self[dst_start..]`.
    pub fn copy_rows(&mut self, dst_start: usize, src: &Column, src_range: Range<usize>) -> Result<()> {
        let n = src_range.len();
        if dst_start + n > self.len() || src_range.end > src.len() {
            return Err(Error::Schema(format!(
                "row copy of {n} rows at {dst_start} exceeds column bounds"
            )));
        }
        if self.dtype() != src.dtype() || self.width() != src.width() {
            return Err(Error::Schema(format!(
                "cannot copy {} (width {}) rows into {} (width {}) column",
                src.dtype(),
                src.width(),
                self.dtype(),
                self.width()
            )));
        }
        let dst = dst_start..dst_start + n;
        match (self, src) {
            (Column::Float64(d), Column::Float64(s)) => d[dst].copy_from_slice(&s[src_range]),
            (Column::Int32(d), Column::Int32(s)) => d[dst].copy_from_slice(&s[src_range]),
            (Column::Json(d), Column::Json(s)) => d[dst].clone_from_slice(&s[src_range]),
            (Column::RaggedInt32(d), Column::RaggedInt32(s)) => {
                d[dst].clone_from_slice(&s[src_range])
            }
            (Column::RaggedUInt8(d), Column::RaggedUInt8(s)) => {
                d[dst].clone_from_slice(&s[src_range])
            }
            (Column::UInt8 { width, data: d, .. }, Column::UInt8 { data: s, .. }) => {
                let w = *width;
                d[dst.start * w..dst.end * w]
                    .copy_from_slice(&s[src_range.start * w..src_range.end * w]);
            }
            _ => unreachable!("dtype checked above"),
        }
        Ok(())
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Column::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Column::Int32(v) => Some(v),
            _ => None,
        }
    }

    /// Flat row-major bytes of a `uint8` column.
    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Column::UInt8 { data, .. } => Some(data),
            _ => None,
        }
    }

    /// One fixed-width `uint8` row.
    pub fn u8_row(&self, row: usize) -> Option<&[u8]> {
        match self {
            Column::UInt8 { width, rows, data } if row < *rows => {
                Some(&data[row * width..(row + 1) * width])
            }
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&[serde_json::Value]> {
        match self {
            Column::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ragged_i32(&self) -> Option<&[Vec<i32>]> {
        match self {
            Column::RaggedInt32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ragged_u8(&self) -> Option<&[Vec<u8>]> {
        match self {
            Column::RaggedUInt8(v) => Some(v),
            _ => None,
        }
    }
}
