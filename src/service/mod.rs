// SPDX-License-Identifier: Apache-2.0

//! The plugin service: the single façade callers use to install, update,
//! remove, verify, and list plugins. Internally it composes the
//! downloader, cache, and manifest registry, the same layering hipcheck's
//! `retrieve_plugins` uses over its cache/retrieval/manifest modules.
//!
//! Batch operations never fail fast: each plugin in a batch is attempted
//! independently and its outcome recorded, so one bad plugin in a list of
//! ten doesn't block the other nine. This mirrors the recursive,
//! dedup-by-id retrieval hipcheck performs when resolving a plugin's
//! transitive dependencies.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::PluginCache;
use crate::download::{Downloader, SourceIndex, SourceIndexEntry};
use crate::error::{Error, Result};
use crate::manifest::{ManifestEntry, ManifestRegistry};
use crate::plugin::{Plugin, PluginId};

/// The result of a batch operation over multiple plugins: every attempt
/// is counted, and every failure is named, rather than the batch
/// aborting on the first error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub installed_count: usize,
    pub failed_count: usize,
    pub success_count: usize,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    fn record_success(&mut self) {
        self.installed_count += 1;
        self.success_count += 1;
    }

    fn record_failure(&mut self, id: &str, err: &Error) {
        self.failed_count += 1;
        self.errors.push(format!("{id}: {err}"));
    }
}

/// The aggregate result of verifying every installed plugin's digest
/// against the manifest registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub failures: Vec<String>,
}

/// The plugin service façade.
pub struct PluginService {
    cache: PluginCache,
    registry: Mutex<ManifestRegistry>,
    downloader: Downloader,
    source_url: Url,
}

impl PluginService {
    pub fn new(cache: PluginCache, registry: ManifestRegistry, source_url: Url, http_timeout: Duration) -> Self {
        Self {
            cache,
            registry: Mutex::new(registry),
            downloader: Downloader::new(http_timeout),
            source_url,
        }
    }

    /// Install one plugin by id and version, recursively installing any
    /// `dependsOn` targets that aren't already installed. Already-satisfied
    /// dependencies are left untouched.
    pub fn install(&self, id: &str, version: &semver::Version, cancel: &CancellationToken) -> Result<ManifestEntry> {
        let mut seen = HashSet::new();
        self.install_recursive(id, version, cancel, &mut seen)
    }

    fn install_recursive(
        &self,
        id: &str,
        version: &semver::Version,
        cancel: &CancellationToken,
        seen: &mut HashSet<PluginId>,
    ) -> Result<ManifestEntry> {
        let plugin_id = PluginId::new(id, version.clone());
        if !seen.insert(plugin_id.clone()) {
            return Err(Error::CyclicDependency(plugin_id.to_string()));
        }

        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("install of '{plugin_id}' cancelled")));
        }

        let index = self.downloader.fetch_source_index(&self.source_url, cancel)?;
        let entry = index
            .find(id, version)
            .ok_or_else(|| Error::Resolution(format!("'{plugin_id}' is not present in the source index")))?
            .clone();

        let bytes = self.downloader.download(&entry, cancel)?;
        let plugin = Plugin::parse(&String::from_utf8_lossy(&bytes))?;
        crate::plugin::validate(&plugin)?;

        for dependency_id in &plugin.depends_on {
            let already_installed = self
                .cache
                .list()?
                .iter()
                .any(|e| &e.id.id == dependency_id);
            if already_installed {
                continue;
            }
            let dependency_version = self.resolve_latest(&index, dependency_id).ok_or_else(|| {
                Error::MissingDependency {
                    consumer: plugin_id.to_string(),
                    dependency: dependency_id.clone(),
                }
            })?;
            self.install_recursive(dependency_id, &dependency_version, cancel, seen)?;
        }

        self.cache.install(&plugin_id, &bytes, &entry.sha256, Some(entry.url.clone()))?;

        let manifest_entry = ManifestEntry {
            id: plugin_id,
            installed_at: Utc::now(),
            source_url: Some(entry.url.clone()),
            checksum: entry.sha256.clone(),
        };
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .upsert(manifest_entry.clone())?;

        Ok(manifest_entry)
    }

    /// Install several plugins, aggregating per-plugin outcomes rather
    /// than stopping at the first failure. Returns `Ok` only when every
    /// request succeeded; when some succeeded and others failed this
    /// returns `Error::PartialFailure`, and when every request failed it
    /// returns a plain error built from the first failure. Either way the
    /// full `BatchOutcome` detail -- which ids failed and why -- has
    /// already been logged to the shell before the error is returned.
    pub fn install_many(&self, requests: &[(String, semver::Version)], cancel: &CancellationToken) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for (id, version) in requests {
            if cancel.is_cancelled() {
                outcome.record_failure(id, &Error::cancelled("batch install cancelled"));
                continue;
            }
            match self.install(id, version, cancel) {
                Ok(_) => outcome.record_success(),
                Err(e) => outcome.record_failure(id, &e),
            }
        }

        if outcome.failed_count > 0 && outcome.installed_count > 0 {
            return Err(Error::PartialFailure {
                succeeded: outcome.installed_count,
                failed: outcome.failed_count,
            });
        }
        if outcome.failed_count > 0 {
            return Err(Error::Resolution(format!(
                "all {} install(s) failed: {}",
                outcome.failed_count,
                outcome.errors.join("; ")
            )));
        }
        Ok(outcome)
    }

    /// Update an installed plugin to the latest version advertised by the
    /// source index, if newer than what's installed.
    pub fn update(&self, id: &str, cancel: &CancellationToken) -> Result<ManifestEntry> {
        let index = self.downloader.fetch_source_index(&self.source_url, cancel)?;
        let latest = self
            .resolve_latest(&index, id)
            .ok_or_else(|| Error::Resolution(format!("'{id}' is not present in the source index")))?;
        self.install(id, &latest, cancel)
    }

    /// Remove an installed plugin from both the cache and the registry.
    pub fn uninstall(&self, plugin_id: &PluginId) -> Result<()> {
        self.cache.remove(plugin_id)?;
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .remove(plugin_id)?;
        Ok(())
    }

    /// Recompute every installed plugin's digest and compare it against
    /// the manifest registry, detecting on-disk tampering or corruption
    /// across the whole catalog in one pass. A manifest entry recorded
    /// with no checksum (never hashed at install time) is skipped
    /// entirely -- it counts toward neither success nor failure -- and a
    /// manifest entry whose cache artifact is missing counts as a
    /// failure.
    pub fn verify(&self) -> Result<VerifyOutcome> {
        let entries = self.registry.lock().expect("registry mutex poisoned").entries().to_vec();

        let mut outcome = VerifyOutcome::default();
        for entry in &entries {
            if entry.checksum.is_empty() {
                outcome.skipped_count += 1;
                continue;
            }

            let path = self.cache.root().join(entry.id.path_segments()).join("plugin.yaml");
            match std::fs::read(&path) {
                Ok(contents) => {
                    let found = sha256::digest(contents.as_slice());
                    if found.eq_ignore_ascii_case(&entry.checksum) {
                        outcome.success_count += 1;
                    } else {
                        outcome.failed_count += 1;
                        outcome.failures.push(format!("{}: checksum mismatch", entry.id));
                    }
                }
                Err(_) => {
                    outcome.failed_count += 1;
                    outcome.failures.push(format!("{}: cache artifact missing", entry.id));
                }
            }
        }

        Ok(outcome)
    }

    /// Remove every cached plugin not present in the manifest registry and
    /// added at least `min_age` ago, reclaiming space left behind by
    /// interrupted or superseded installs without evicting something a
    /// concurrent install just placed.
    pub fn clean(&self, min_age: chrono::Duration) -> Result<usize> {
        let keep: HashSet<PluginId> = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .entries()
            .iter()
            .map(|e| e.id.clone())
            .collect();
        self.cache.prune(&keep, min_age)
    }

    /// List every installed plugin's manifest entry.
    pub fn list(&self) -> Vec<ManifestEntry> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .entries()
            .to_vec()
    }

    fn resolve_latest(&self, index: &SourceIndex, id: &str) -> Option<semver::Version> {
        index
            .plugins
            .iter()
            .filter(|e: &&SourceIndexEntry| e.id == id)
            .map(|e| e.version.clone())
            .max()
    }
}
