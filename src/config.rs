// SPDX-License-Identifier: Apache-2.0

//! Resolution of the workspace root and related environment configuration.

use std::path::{Path, PathBuf};

const WORKSPACE_ENV_VAR: &str = "VULNTOR_WORKSPACE";
const PLUGIN_SOURCES_ENV_VAR: &str = "VULNTOR_PLUGIN_SOURCES";
const WORKSPACE_DIR_NAME: &str = ".vulntor";

/// Resolved layout of the on-disk workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolve the workspace root in order: `VULNTOR_WORKSPACE` env var ->
    /// `$HOME/.vulntor` -> current directory.
    pub fn resolve() -> Self {
        let root = std::env::var_os(WORKSPACE_ENV_VAR)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(WORKSPACE_DIR_NAME)))
            .unwrap_or_else(|| PathBuf::from("."));
        Self { root }
    }

    /// Build a workspace rooted at an explicit path, bypassing env
    /// resolution. Used by tests and by callers that already know where
    /// they want to operate.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn scans_root(&self) -> PathBuf {
        self.root.join("scans")
    }

    pub fn scan_result_path(&self, scan_id: &str) -> PathBuf {
        self.scans_root().join(scan_id).join("result.json")
    }
}

/// Parse `VULNTOR_PLUGIN_SOURCES` (comma-separated URLs) into a list of
/// `url::Url`s, silently skipping entries that don't parse.
pub fn plugin_source_urls_from_env() -> Vec<url::Url> {
    std::env::var(PLUGIN_SOURCES_ENV_VAR)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| url::Url::parse(s).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Whether ANSI styling should be disabled, per the `NO_COLOR` convention.
pub fn color_disabled() -> bool {
    std::env::var_os("NO_COLOR").is_some()
}
