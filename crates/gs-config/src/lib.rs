//! Genostore configuration loading and validation.
//!
//! This crate provides:
//! - Typed store options (chunk size, flush threads, compression codec)
//! - Config resolution (explicit file → env file → XDG → defaults, then env overrides)
//! - Semantic validation

pub mod options;
pub mod resolve;

pub use options::{CodecConfig, StoreOptions};
pub use resolve::{resolve_options, ConfigSource, ResolvedOptions};
