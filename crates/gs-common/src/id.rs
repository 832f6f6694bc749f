//! Container identity.
//!
//! A container is identified by a random v4 UUID stamped at creation. The
//! identifier is an identity token only; it is never derived from content.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity token of one data container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        ContainerId(uuid::Uuid::new_v4().to_string())
    }

    /// Parse and validate an identifier read back from a store.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| ContainerId(u.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
