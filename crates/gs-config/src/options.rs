//! Store option types.

use gs_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default zstd level for chunk compression.
pub const DEFAULT_ZSTD_LEVEL: i32 = 9;

/// Upper bound on flush workers; anything larger is a configuration mistake.
pub const MAX_FLUSH_THREADS: usize = 256;

/// Compression applied to each chunk blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum CodecConfig {
    /// Store chunks uncompressed.
    None,
    /// zstd with the given level (1-22).
    Zstd { level: i32 },
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig::Zstd {
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl std::fmt::Display for CodecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecConfig::None => write!(f, "none"),
            CodecConfig::Zstd { level } => write!(f, "zstd(level={level})"),
        }
    }
}

/// Options shared by every container created in write mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Rows per chunk along each array's leading dimension.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Flush worker threads per writer; `0` flushes synchronously.
    #[serde(default)]
    pub num_flush_threads: usize,

    #[serde(default)]
    pub codec: CodecConfig,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_flush_threads: 0,
            codec: CodecConfig::default(),
        }
    }
}

impl StoreOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_flush_threads(mut self, num_flush_threads: usize) -> Self {
        self.num_flush_threads = num_flush_threads;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: StoreOptions = serde_json::from_str(&contents)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".to_string()));
        }
        if self.num_flush_threads > MAX_FLUSH_THREADS {
            return Err(Error::Config(format!(
                "num_flush_threads = {} exceeds maximum {}",
                self.num_flush_threads, MAX_FLUSH_THREADS
            )));
        }
        if let CodecConfig::Zstd { level } = self.codec {
            if !(1..=22).contains(&level) {
                return Err(Error::Config(format!(
                    "zstd level {level} outside [1, 22]"
                )));
            }
        }
        Ok(())
    }
}
