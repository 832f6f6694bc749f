//! Option resolution.
//!
//! Precedence, highest first:
//! 1. Explicit path passed by the caller (CLI `--config`)
//! 2. `GENOSTORE_CONFIG` environment variable
//! 3. `<config_dir>/genostore/config.json`
//! 4. Built-in defaults
//!
//! Scalar environment overrides (`GENOSTORE_CHUNK_SIZE`,
//! `GENOSTORE_FLUSH_THREADS`, `GENOSTORE_ZSTD_LEVEL`) are applied on top of
//! whichever source won.

use crate::options::{CodecConfig, StoreOptions};
use gs_common::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_CONFIG: &str = "GENOSTORE_CONFIG";
pub const ENV_CHUNK_SIZE: &str = "GENOSTORE_CHUNK_SIZE";
pub const ENV_FLUSH_THREADS: &str = "GENOSTORE_FLUSH_THREADS";
pub const ENV_ZSTD_LEVEL: &str = "GENOSTORE_ZSTD_LEVEL";

const CONFIG_FILE_NAME: &str = "config.json";

/// Where the resolved options came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigSource {
    Explicit(PathBuf),
    Environment(PathBuf),
    UserConfig(PathBuf),
    Defaults,
}

/// Options plus their provenance, for display by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedOptions {
    pub source: ConfigSource,
    pub overrides: Vec<String>,
    pub options: StoreOptions,
}

/// Default user config location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("genostore").join(CONFIG_FILE_NAME))
}

/// Resolve options using the process environment.
pub fn resolve_options(explicit: Option<&Path>) -> Result<ResolvedOptions> {
    resolve_with_env(explicit, default_config_path(), |key| std::env::var(key).ok())
}

/// Resolve options with an injectable environment lookup.
pub fn resolve_with_env<F>(
    explicit: Option<&Path>,
    user_config: Option<PathBuf>,
    env: F,
) -> Result<ResolvedOptions>
where
    F: Fn(&str) -> Option<String>,
{
    let (source, mut options) = if let Some(path) = explicit {
        (
            ConfigSource::Explicit(path.to_path_buf()),
            StoreOptions::from_json_file(path)?,
        )
    } else if let Some(path) = env(ENV_CONFIG).map(PathBuf::from) {
        let options = StoreOptions::from_json_file(&path)?;
        (ConfigSource::Environment(path), options)
    } else if let Some(path) = user_config.filter(|p| p.exists()) {
        let options = StoreOptions::from_json_file(&path)?;
        (ConfigSource::UserConfig(path), options)
    } else {
        (ConfigSource::Defaults, StoreOptions::default())
    };

    let mut overrides = Vec::new();
    if let Some(raw) = env(ENV_CHUNK_SIZE) {
        options.chunk_size = parse_env(ENV_CHUNK_SIZE, &raw)?;
        overrides.push(ENV_CHUNK_SIZE.to_string());
    }
    if let Some(raw) = env(ENV_FLUSH_THREADS) {
        options.num_flush_threads = parse_env(ENV_FLUSH_THREADS, &raw)?;
        overrides.push(ENV_FLUSH_THREADS.to_string());
    }
    if let Some(raw) = env(ENV_ZSTD_LEVEL) {
        let level: i32 = parse_env(ENV_ZSTD_LEVEL, &raw)?;
        options.codec = if level == 0 {
            CodecConfig::None
        } else {
            CodecConfig::Zstd { level }
        };
        overrides.push(ENV_ZSTD_LEVEL.to_string());
    }
    options.validate()?;

    debug!(source = ?source, overrides = ?overrides, "resolved store options");
    Ok(ResolvedOptions {
        source,
        overrides,
        options,
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has invalid value '{raw}'")))
}
