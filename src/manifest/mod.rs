// SPDX-License-Identifier: Apache-2.0

//! The manifest registry: a JSON-persisted ledger of what's installed,
//! from where, and when.
//!
//! Structurally this is the same "index file next to the cache directory"
//! idiom hipcheck's `HcRepoCache` uses (`index.json`, loaded once,
//! opportunistically rewritten), just keyed on [`PluginId`] instead of a
//! repository path. Writes use a sibling `.lock` file as a simple advisory
//! lock: a second registry instance racing a write will fail fast rather
//! than interleave with the first.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::plugin::PluginId;

const LOCK_FILE_NAME: &str = "registry.lock";

/// One installed plugin's provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: PluginId,
    pub installed_at: DateTime<Utc>,
    #[serde(default)]
    pub source_url: Option<Url>,
    pub checksum: String,
}

/// An advisory lock held for the duration of a registry mutation. Dropped
/// automatically, removing the lock file, when the mutation completes or
/// panics.
struct RegistryLock {
    path: PathBuf,
}

impl RegistryLock {
    fn acquire(registry_path: &Path) -> Result<Self> {
        let path = registry_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(LOCK_FILE_NAME);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::Invocation("manifest registry is locked by another operation".to_string())
                } else {
                    Error::io(&path, e)
                }
            })?;
        Ok(RegistryLock { path })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The persisted set of installed plugins, backed by a single JSON file.
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl ManifestRegistry {
    /// Load the registry from `path`, treating a missing file as an empty
    /// registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(Error::from)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::io(&path, e)),
        };
        Ok(ManifestRegistry { path, entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn find(&self, id: &PluginId) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Insert or replace the entry for `entry.id`, then persist.
    pub fn upsert(&mut self, entry: ManifestEntry) -> Result<()> {
        let _lock = RegistryLock::acquire(&self.path)?;
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
        self.persist()
    }

    /// Remove the entry for `id`, if present, then persist. Returns
    /// whether an entry was actually removed.
    pub fn remove(&mut self, id: &PluginId) -> Result<bool> {
        let _lock = RegistryLock::acquire(&self.path)?;
        let before = self.entries.len();
        self.entries.retain(|e| &e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Write the current entry set to disk via a temp-file-then-rename,
    /// so a crash mid-write never leaves a truncated registry.
    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let serialized = serde_json::to_string_pretty(&self.entries).map_err(Error::from)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|e| Error::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::io(&self.path, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use tempfile::tempdir;

    fn sample_entry(id: &str) -> ManifestEntry {
        ManifestEntry {
            id: PluginId::new(id, Version::new(1, 0, 0)),
            installed_at: Utc::now(),
            source_url: None,
            checksum: "deadbeef".to_string(),
        }
    }

    #[test]
    fn load_missing_file_yields_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = ManifestRegistry::load(dir.path().join("registry.json")).unwrap();
        assert!(registry.entries().is_empty());
    }

    #[test]
    fn upsert_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut registry = ManifestRegistry::load(&path).unwrap();
        registry.upsert(sample_entry("alpha")).unwrap();

        let reloaded = ManifestRegistry::load(&path).unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert_eq!(reloaded.entries()[0].id.id, "alpha");
    }

    #[test]
    fn upsert_replaces_existing_entry_for_same_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut registry = ManifestRegistry::load(&path).unwrap();
        registry.upsert(sample_entry("alpha")).unwrap();
        let mut updated = sample_entry("alpha");
        updated.checksum = "cafebabe".to_string();
        registry.upsert(updated).unwrap();

        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].checksum, "cafebabe");
    }

    #[test]
    fn remove_reports_whether_an_entry_existed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut registry = ManifestRegistry::load(&path).unwrap();
        registry.upsert(sample_entry("alpha")).unwrap();

        let id = PluginId::new("alpha", Version::new(1, 0, 0));
        assert!(registry.remove(&id).unwrap());
        assert!(!registry.remove(&id).unwrap());
    }
}
