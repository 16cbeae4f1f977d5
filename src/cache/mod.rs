// SPDX-License-Identifier: Apache-2.0

//! Content-addressed on-disk storage for installed plugin documents.
//!
//! Layout mirrors hipcheck's `HcPluginCache`: `<root>/<id>/<version>/plugin.yaml`,
//! with a sibling `meta.json` recording the checksum and provenance of that
//! install. Writes go to a sibling temp file first and are renamed into
//! place only after the SHA-256 digest has been verified, so a crash or a
//! failed download can never leave a corrupt entry where a caller expects a
//! good one -- the same verify-before-write discipline hipcheck's
//! `download_plugin` uses before unpacking a plugin archive.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::plugin::{Plugin, PluginId};

const ENTRY_FILE_NAME: &str = "plugin.yaml";
const META_FILE_NAME: &str = "meta.json";

/// The provenance recorded alongside an installed plugin, persisted as
/// `meta.json` next to `plugin.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMeta {
    checksum: String,
    #[serde(default)]
    source: Option<Url>,
    added_at: DateTime<Utc>,
}

/// A single installed plugin's location on disk, plus the checksum and
/// provenance recorded for it in `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: PluginId,
    pub path: PathBuf,
    pub checksum: String,
    pub source: Option<Url>,
    pub added_at: DateTime<Utc>,
}

/// The plugin cache rooted at a workspace-relative directory.
#[derive(Debug, Clone)]
pub struct PluginCache {
    root: PathBuf,
}

impl PluginCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, id: &PluginId) -> PathBuf {
        self.root.join(id.path_segments())
    }

    fn entry_path(&self, id: &PluginId) -> PathBuf {
        self.entry_dir(id).join(ENTRY_FILE_NAME)
    }

    fn meta_path(&self, id: &PluginId) -> PathBuf {
        self.entry_dir(id).join(META_FILE_NAME)
    }

    /// Whether a given id/version is already installed.
    pub fn contains(&self, id: &PluginId) -> bool {
        self.entry_path(id).is_file()
    }

    fn write_meta(&self, id: &PluginId, meta: &CacheMeta) -> Result<()> {
        let path = self.meta_path(id);
        let serialized = serde_json::to_string_pretty(meta)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|e| Error::io(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::io(&path, e)
        })
    }

    fn read_meta(&self, id: &PluginId) -> Result<CacheMeta> {
        let path = self.meta_path(id);
        let raw = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::from_str(&raw).map_err(Error::from)
    }

    fn load_entry(&self, id: &PluginId) -> Result<CacheEntry> {
        let meta = self.read_meta(id)?;
        Ok(CacheEntry {
            id: id.clone(),
            path: self.entry_path(id),
            checksum: meta.checksum,
            source: meta.source,
            added_at: meta.added_at,
        })
    }

    /// Verify `contents` hashes to `expected_sha256`, then write it into
    /// the cache atomically: write to a temp file in the same directory,
    /// then rename over the final path, and record `source`/the install
    /// time in a sibling `meta.json`.
    ///
    /// Re-installing the same `(id, version)` key succeeds as a no-op iff
    /// the bytes are byte-for-byte identical to what's already cached;
    /// otherwise it fails with [`Error::Conflict`] rather than silently
    /// overwriting a different artifact under the same key.
    pub fn install(&self, id: &PluginId, contents: &[u8], expected_sha256: &str, source: Option<Url>) -> Result<CacheEntry> {
        let found = sha256::digest(contents);
        if !found.eq_ignore_ascii_case(expected_sha256) {
            return Err(Error::ChecksumMismatch {
                id: id.to_string(),
                expected: expected_sha256.to_string(),
                found,
            });
        }

        let final_path = self.entry_path(id);
        if final_path.is_file() {
            let existing = fs::read(&final_path).map_err(|e| Error::io(&final_path, e))?;
            if existing == contents {
                return self.load_entry(id);
            }
            return Err(Error::Conflict { id: id.to_string() });
        }

        let dir = self.entry_dir(id);
        let dir_preexisted = dir.is_dir();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let temp_path = dir.join(format!("{ENTRY_FILE_NAME}.{}.tmp", fastrand::u64(..)));
        if let Err(e) = fs::write(&temp_path, contents) {
            if !dir_preexisted {
                let _ = fs_extra::dir::remove(&dir);
            }
            return Err(Error::io(&temp_path, e));
        }
        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            if !dir_preexisted {
                let _ = fs_extra::dir::remove(&dir);
            }
            Error::io(&final_path, e)
        })?;

        let meta = CacheMeta {
            checksum: found,
            source,
            added_at: Utc::now(),
        };
        self.write_meta(id, &meta)?;

        Ok(CacheEntry {
            id: id.clone(),
            path: final_path,
            checksum: meta.checksum,
            source: meta.source,
            added_at: meta.added_at,
        })
    }

    /// Load and parse an installed plugin document.
    pub fn get(&self, id: &PluginId) -> Result<Plugin> {
        let path = self.entry_path(id);
        let source = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::PluginNotInstalled(id.to_string())
            } else {
                Error::io(&path, e)
            }
        })?;
        Plugin::parse(&source)
    }

    /// List every installed plugin id, sorted by id then version for
    /// deterministic iteration order. An entry whose `meta.json` is
    /// missing or unreadable (never written by this cache's own `install`)
    /// falls back to an empty checksum, no source, and the Unix epoch as
    /// its `added_at`, so it reads as eligible for pruning rather than
    /// aborting the listing.
    pub fn list(&self) -> Result<Vec<CacheEntry>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if dir_entry.file_name() != ENTRY_FILE_NAME {
                continue;
            }
            let path = dir_entry.path();
            let version_dir = path.parent().ok_or_else(|| {
                Error::Invocation(format!("cache entry '{}' has no parent directory", path.display()))
            })?;
            let id_dir = version_dir.parent().ok_or_else(|| {
                Error::Invocation(format!("cache entry '{}' has no plugin id directory", path.display()))
            })?;
            let version_str = version_dir
                .file_name()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::Invocation(format!("non-UTF8 version directory at '{}'", path.display())))?;
            let id_str = id_dir
                .file_name()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::Invocation(format!("non-UTF8 plugin id directory at '{}'", path.display())))?;
            let version = semver::Version::parse(version_str)
                .map_err(|e| Error::Invocation(format!("invalid cached version '{version_str}': {e}")))?;
            let id = PluginId::new(id_str, version);
            let meta = self.read_meta(&id).unwrap_or_else(|_| CacheMeta {
                checksum: String::new(),
                source: None,
                added_at: DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is a valid timestamp"),
            });
            entries.push(CacheEntry {
                id,
                path: path.to_path_buf(),
                checksum: meta.checksum,
                source: meta.source,
                added_at: meta.added_at,
            });
        }
        entries.sort_by(|a, b| (&a.id.id, &a.id.version).cmp(&(&b.id.id, &b.id.version)));
        Ok(entries)
    }

    /// Remove one installed plugin, including its now-empty version
    /// directory if it's the only version installed.
    pub fn remove(&self, id: &PluginId) -> Result<()> {
        let dir = self.entry_dir(id);
        if !dir.exists() {
            return Err(Error::PluginNotInstalled(id.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        if let Some(id_dir) = dir.parent() {
            if fs::read_dir(id_dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(id_dir);
            }
        }
        Ok(())
    }

    /// Remove every installed entry whose id is not present in `keep` AND
    /// whose `added_at` is older than `min_age`. Both conditions must
    /// hold: a stale-but-still-referenced entry, or a fresh-but-orphaned
    /// one, survives a `prune` call. Returns the number of entries
    /// removed.
    pub fn prune(&self, keep: &std::collections::HashSet<PluginId>, min_age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - min_age;
        let mut removed = 0;
        for entry in self.list()? {
            if !keep.contains(&entry.id) && entry.added_at < cutoff {
                self.remove(&entry.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use tempfile::tempdir;

    const DOC: &str = r#"
id: sample
name: Sample
version: 1.0.0
output:
  message: "hi"
"#;

    fn sha256_hex(bytes: &[u8]) -> String {
        sha256::digest(bytes)
    }

    #[test]
    fn install_rejects_mismatched_checksum() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let id = PluginId::new("sample", Version::new(1, 0, 0));
        let err = cache.install(&id, DOC.as_bytes(), "deadbeef", None).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!cache.contains(&id));
    }

    #[test]
    fn install_then_get_round_trips_the_document() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let id = PluginId::new("sample", Version::new(1, 0, 0));
        let digest = sha256_hex(DOC.as_bytes());
        let entry = cache.install(&id, DOC.as_bytes(), &digest, None).unwrap();
        assert!(cache.contains(&id));
        assert_eq!(entry.checksum, digest);
        let plugin = cache.get(&id).unwrap();
        assert_eq!(plugin.id, "sample");
    }

    #[test]
    fn reinstalling_identical_bytes_succeeds_as_a_no_op() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let id = PluginId::new("sample", Version::new(1, 0, 0));
        let digest = sha256_hex(DOC.as_bytes());
        cache.install(&id, DOC.as_bytes(), &digest, None).unwrap();
        let second = cache.install(&id, DOC.as_bytes(), &digest, None).unwrap();
        assert_eq!(second.checksum, digest);
    }

    #[test]
    fn reinstalling_different_bytes_under_the_same_key_conflicts() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let id = PluginId::new("sample", Version::new(1, 0, 0));
        let digest = sha256_hex(DOC.as_bytes());
        cache.install(&id, DOC.as_bytes(), &digest, None).unwrap();

        let other_doc = format!("{DOC}\nextra: true\n");
        let other_digest = sha256_hex(other_doc.as_bytes());
        let err = cache.install(&id, other_doc.as_bytes(), &other_digest, None).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn list_finds_installed_entries_sorted() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let id_b = PluginId::new("bravo", Version::new(1, 0, 0));
        let id_a = PluginId::new("alpha", Version::new(1, 0, 0));
        let digest = sha256_hex(DOC.as_bytes());
        cache.install(&id_b, DOC.as_bytes(), &digest, None).unwrap();
        cache.install(&id_a, DOC.as_bytes(), &digest, None).unwrap();
        let entries = cache.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id.id, "alpha");
        assert_eq!(entries[1].id.id, "bravo");
    }

    #[test]
    fn remove_errors_when_not_installed() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let id = PluginId::new("ghost", Version::new(1, 0, 0));
        assert!(matches!(cache.remove(&id), Err(Error::PluginNotInstalled(_))));
    }

    #[test]
    fn prune_removes_everything_not_kept_and_old_enough() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let keep_id = PluginId::new("keep-me", Version::new(1, 0, 0));
        let drop_id = PluginId::new("drop-me", Version::new(1, 0, 0));
        let digest = sha256_hex(DOC.as_bytes());
        cache.install(&keep_id, DOC.as_bytes(), &digest, None).unwrap();
        cache.install(&drop_id, DOC.as_bytes(), &digest, None).unwrap();

        let mut keep = std::collections::HashSet::new();
        keep.insert(keep_id.clone());
        let removed = cache.prune(&keep, chrono::Duration::zero()).unwrap();

        assert_eq!(removed, 1);
        assert!(cache.contains(&keep_id));
        assert!(!cache.contains(&drop_id));
    }

    #[test]
    fn prune_spares_orphaned_entries_younger_than_min_age() {
        let dir = tempdir().unwrap();
        let cache = PluginCache::new(dir.path());
        let drop_id = PluginId::new("drop-me", Version::new(1, 0, 0));
        let digest = sha256_hex(DOC.as_bytes());
        cache.install(&drop_id, DOC.as_bytes(), &digest, None).unwrap();

        let keep = std::collections::HashSet::new();
        let removed = cache.prune(&keep, chrono::Duration::days(30)).unwrap();

        assert_eq!(removed, 0);
        assert!(cache.contains(&drop_id));
    }
}
