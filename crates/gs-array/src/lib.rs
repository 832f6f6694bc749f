//! Chunked columnar arrays for genostore containers.
//!
//! Groups and arrays are zarr v3 nodes managed through `zarrs`:
//!
//! - [`dtype`]: element types, cell values, and column buffers
//! - [`codec`]: the zstd chunk codec chain
//! - [`store`]: memory and staged-directory backing, single-file packing
//! - [`group`]: the root group and its JSON attributes
//! - [`array`]: resizable arrays chunked by rows (and columns, for matrices)

pub mod array;
pub mod codec;
pub mod dtype;
pub mod group;
pub mod store;

pub use array::{ArraySpec, ChunkedArray};
pub use dtype::{Column, DType, Value};
pub use group::Group;
pub use store::{read_packed, CompactionReport, StagedFile, Store};
