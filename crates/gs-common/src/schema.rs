//! Format versioning and compatibility.
//!
//! Every container stores a `(name, version)` pair in its root attributes.
//! A reader accepts a container iff the name matches exactly and the major
//! version is equal; minor differences are tolerated in either direction.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Root attribute holding the format name.
pub const FORMAT_NAME_KEY: &str = "format_name";
/// Root attribute holding the `[major, minor]` version pair.
pub const FORMAT_VERSION_KEY: &str = "format_version";
/// Root attribute holding the container identity.
pub const UUID_KEY: &str = "uuid";
/// Root attribute present (and true) only once a container is finalized.
pub const FINALIZED_KEY: &str = "finalized";

/// Two-field format version, persisted as a `[major, minor]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl From<(u32, u32)> for FormatVersion {
    fn from((major, minor): (u32, u32)) -> Self {
        Self { major, minor }
    }
}

impl From<FormatVersion> for (u32, u32) {
    fn from(v: FormatVersion) -> Self {
        (v.major, v.minor)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Validate the format attributes of a container against a reader's
/// expected name and version.
pub fn check_format(attrs: &Map<String, Value>, name: &str, current: FormatVersion) -> Result<()> {
    let found_name = attrs
        .get(FORMAT_NAME_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Format {
            expected: name.to_string(),
            actual: "<missing format_name>".to_string(),
        })?;
    let found_version: FormatVersion = attrs
        .get(FORMAT_VERSION_KEY)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| Error::Format {
            expected: name.to_string(),
            actual: format!("{found_name} <missing format_version>"),
        })?;

    if found_name != name {
        return Err(Error::Format {
            expected: name.to_string(),
            actual: found_name.to_string(),
        });
    }
    if found_version.major < current.major {
        return Err(Error::Version {
            found: found_version.to_string(),
            current: current.to_string(),
            skew: "old",
        });
    }
    if found_version.major > current.major {
        return Err(Error::Version {
            found: found_version.to_string(),
            current: current.to_string(),
            skew: "new",
        });
    }
    Ok(())
}
