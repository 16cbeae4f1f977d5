// SPDX-License-Identifier: Apache-2.0

//! The typed error taxonomy used across the engine.
//!
//! Every variant corresponds to one of the error classes the engine's
//! partial-failure contracts distinguish between: a failure's *class*
//! decides whether it aborts a batch, aborts a single item, or is purely
//! informational. `Error::Cancelled` is kept distinct from every other
//! variant so callers can test for it after it has been wrapped with
//! additional context.

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// A limited analogue of `anyhow!`, for ad hoc messages that don't need a
/// dedicated variant.
#[macro_export]
macro_rules! vt_error {
    ($msg:literal $(,)?) => {
        $crate::error::Error::Other($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Other(format!($fmt, $($arg)*))
    };
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad target, bad flag, missing argument.
    #[error("invocation error: {0}")]
    Invocation(String),

    /// Plugin id not found, or a cyclic/missing dependency in the DAG.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// DNS, connect, or HTTP-status failures. Always named to one plugin.
    #[error("network error for plugin '{plugin_id}': {source}")]
    Network {
        plugin_id: String,
        #[source]
        source: Box<Error>,
    },

    /// Checksum mismatch, truncated artifact, or corrupt manifest.
    #[error("integrity error for '{id}' version {version}: {reason}")]
    Integrity {
        id: String,
        version: String,
        reason: String,
    },

    /// Disk full, permission denied, or any other filesystem failure.
    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A lower-level `std::io::Error` with no associated path. Prefer
    /// [`Error::Io`] when a path is available.
    #[error(transparent)]
    BareIo(#[from] io::Error),

    /// The scan context was cancelled or hit its deadline. Preserves the
    /// identity of the underlying cause so callers can match on it even
    /// after it has been wrapped with `.context(...)`.
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// A plugin's `run` returned a non-nil error. Recorded, not fatal to
    /// siblings.
    #[error("plugin '{plugin_id}' failed: {reason}")]
    PluginRuntime { plugin_id: String, reason: String },

    /// The DAG planner detected a cycle. The string names every plugin id
    /// on the cycle, in the order the search walked them.
    #[error("cyclic dependency detected among plugins: {0}")]
    CyclicDependency(String),

    /// A plugin declared a dependency that is not part of the set being
    /// planned.
    #[error("plugin '{consumer}' depends on missing plugin '{dependency}'")]
    MissingDependency { consumer: String, dependency: String },

    /// `uninstall` (or similar) targeted a plugin id with no manifest
    /// entry.
    #[error("plugin '{0}' is not installed")]
    PluginNotInstalled(String),

    /// One or more items in a batch operation failed while at least one
    /// succeeded.
    #[error("partial failure: {succeeded} succeeded, {failed} failed")]
    PartialFailure { succeeded: usize, failed: usize },

    /// A checksum did not match the expected digest.
    #[error("checksum mismatch for '{id}': expected {expected}, found {found}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        found: String,
    },

    /// An install targeted an `(id, version)` key that's already cached
    /// with different bytes than what's being installed now.
    #[error("conflict installing '{id}': already cached with different contents")]
    Conflict { id: String },

    /// Deserialization of a YAML plugin/source document failed.
    #[error("parse error in {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Catch-all for messages that don't warrant a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an I/O error with the path that was being operated on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a plugin id to a network-class error.
    pub fn network(plugin_id: impl Into<String>, source: Error) -> Self {
        Error::Network {
            plugin_id: plugin_id.into(),
            source: Box::new(source),
        }
    }

    /// True iff this error (or its direct cause) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Build a `Cancelled` error, preserving the triggering reason.
    pub fn cancelled(reason: impl fmt::Display) -> Self {
        Error::Cancelled {
            reason: reason.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(source: serde_yaml::Error) -> Self {
        Error::Parse {
            context: "yaml document".to_string(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Parse {
            context: "json document".to_string(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_detected_through_helper() {
        let err = Error::cancelled("deadline exceeded");
        assert!(err.is_cancelled());
        assert!(!Error::Other("x".into()).is_cancelled());
    }

    #[test]
    fn macro_builds_other_variant() {
        let err = vt_error!("plugin {} missing", "foo");
        assert_eq!(err.to_string(), "plugin foo missing");
    }

    #[test]
    fn network_error_names_the_plugin() {
        let err = Error::network("tcp-scan", Error::Other("timeout".into()));
        assert!(err.to_string().contains("tcp-scan"));
    }
}
