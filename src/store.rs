// SPDX-License-Identifier: Apache-2.0

//! Persistent storage for completed scan results. Deliberately kept
//! behind a narrow trait: the engine's core (plugins, DAG planning,
//! orchestration) never depends on a concrete storage backend, only on
//! [`ScanStore`], so a caller embedding this engine can swap in a
//! database-backed store without touching the orchestrator.

use std::fs;
use std::path::PathBuf;

use crate::data::ScanResult;
use crate::error::{Error, Result};

/// Where completed scan results go, and how they're listed and reclaimed.
pub trait ScanStore: Send + Sync {
    fn save(&self, result: &ScanResult) -> Result<()>;
    fn list(&self) -> Result<Vec<String>>;
    fn load(&self, scan_id: &str) -> Result<ScanResult>;

    /// Remove every stored result except the `keep_latest` most recent
    /// (by lexicographic scan-id order, which matches insertion order
    /// for the timestamp-prefixed ids this engine generates). Returns
    /// the number of results removed.
    fn gc(&self, keep_latest: usize) -> Result<usize>;
}

/// The default filesystem-backed [`ScanStore`]: one JSON file per scan,
/// under `<workspace>/scans/<id>/result.json`.
pub struct FsScanStore {
    root: PathBuf,
}

impl FsScanStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn result_path(&self, scan_id: &str) -> PathBuf {
        self.root.join(scan_id).join("result.json")
    }
}

impl ScanStore for FsScanStore {
    fn save(&self, result: &ScanResult) -> Result<()> {
        let path = self.result_path(&result.scan_id);
        let dir = path.parent().expect("result path has a parent");
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let serialized = serde_json::to_string_pretty(result).map_err(Error::from)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|e| Error::io(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::io(&path, e)
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| Error::io(&self.root, e))? {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            if entry.path().join("result.json").is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load(&self, scan_id: &str) -> Result<ScanResult> {
        let path = self.result_path(scan_id);
        let raw = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Resolution(format!("no stored scan result for '{scan_id}'"))
            } else {
                Error::io(&path, e)
            }
        })?;
        serde_json::from_str(&raw).map_err(Error::from)
    }

    fn gc(&self, keep_latest: usize) -> Result<usize> {
        let mut ids = self.list()?;
        if ids.len() <= keep_latest {
            return Ok(0);
        }
        let drop_count = ids.len() - keep_latest;
        let to_drop: Vec<String> = ids.drain(..drop_count).collect();
        for id in &to_drop {
            let dir = self.root.join(id);
            fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(to_drop.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(id: &str) -> ScanResult {
        ScanResult {
            scan_id: id.to_string(),
            assets: Vec::new(),
            findings: Vec::new(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsScanStore::new(dir.path());
        store.save(&sample("scan-0001")).unwrap();
        let loaded = store.load("scan-0001").unwrap();
        assert_eq!(loaded.scan_id, "scan-0001");
    }

    #[test]
    fn load_missing_scan_reports_resolution_error() {
        let dir = tempdir().unwrap();
        let store = FsScanStore::new(dir.path());
        assert!(matches!(store.load("ghost"), Err(Error::Resolution(_))));
    }

    #[test]
    fn gc_keeps_only_the_most_recent_entries() {
        let dir = tempdir().unwrap();
        let store = FsScanStore::new(dir.path());
        for id in ["scan-0001", "scan-0002", "scan-0003"] {
            store.save(&sample(id)).unwrap();
        }
        let removed = store.gc(1).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list().unwrap(), vec!["scan-0003".to_string()]);
    }
}
