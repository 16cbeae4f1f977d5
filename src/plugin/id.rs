// SPDX-License-Identifier: Apache-2.0

//! A plugin's on-disk and in-memory identity: `(id, version)`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Uniquely identifies one version of one plugin. Used as the cache and
/// manifest key throughout the engine, rather than passing around raw
/// strings, so a bare plugin name can never be mistaken for a resolved
/// cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginId {
    pub id: String,
    pub version: Version,
}

impl PluginId {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// The path segment this id contributes under `<root>/<id>/<version>`.
    pub fn path_segments(&self) -> PathBuf {
        PathBuf::from(&self.id).join(self.version.to_string())
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

impl FromStr for PluginId {
    type Err = Error;

    /// Parse an `"<id>@<version>"` identifier string.
    fn from_str(s: &str) -> Result<Self> {
        let (id, version) = s
            .split_once('@')
            .ok_or_else(|| Error::Invocation(format!("invalid plugin identifier '{s}', expected '<id>@<version>'")))?;
        let version = Version::parse(version)
            .map_err(|e| Error::Invocation(format!("invalid version in '{s}': {e}")))?;
        Ok(PluginId::new(id, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = PluginId::new("tcp-scan", Version::new(1, 2, 3));
        let rendered = id.to_string();
        assert_eq!(rendered, "tcp-scan@1.2.3");
        let parsed: PluginId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_missing_version() {
        assert!("tcp-scan".parse::<PluginId>().is_err());
    }

    #[test]
    fn path_segments_join_id_and_version() {
        let id = PluginId::new("tcp-scan", Version::new(1, 0, 0));
        assert_eq!(id.path_segments(), PathBuf::from("tcp-scan").join("1.0.0"));
    }
}
