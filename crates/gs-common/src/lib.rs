//! Genostore common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the genostore crates:
//! - The unified error taxonomy
//! - Container identity tokens
//! - Format descriptors and version compatibility checks

pub mod error;
pub mod id;
pub mod schema;

pub use error::{Error, Result};
pub use id::ContainerId;
pub use schema::{
    check_format, FormatVersion, FINALIZED_KEY, FORMAT_NAME_KEY, FORMAT_VERSION_KEY, UUID_KEY,
};
