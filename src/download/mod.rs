// SPDX-License-Identifier: Apache-2.0

//! Fetching the remote plugin source index, and downloading individual
//! plugin documents from it.
//!
//! Uses a blocking `ureq` agent the same way hipcheck's
//! `plugin::retrieval::download_plugin` does: preallocate a buffer sized
//! to the advertised length, read the whole body, then verify its SHA-256
//! digest before the caller is allowed to treat it as good. A download
//! that doesn't match its advertised digest is discarded, never cached.

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};

/// One entry in the remote source index: where to find a specific
/// plugin version and what it should hash to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIndexEntry {
    pub id: String,
    pub version: semver::Version,
    pub url: Url,
    pub sha256: String,
}

/// The parsed remote source index (YAML or JSON; format is detected by
/// content rather than by URL suffix, since index hosts vary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceIndex {
    #[serde(default)]
    pub plugins: Vec<SourceIndexEntry>,
}

impl SourceIndex {
    pub fn find(&self, id: &str, version: &semver::Version) -> Option<&SourceIndexEntry> {
        self.plugins
            .iter()
            .find(|e| e.id == id && &e.version == version)
    }
}

/// A buffer-size ceiling on plugin documents; these are small declarative
/// YAML files, not binaries, so a generous but bounded cap catches a
/// misbehaving or compromised source host rather than exhausting memory.
const MAX_DOWNLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Downloads source indices and individual plugin documents over HTTP(S).
pub struct Downloader {
    agent: ureq::Agent,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }

    /// Fetch and parse the source index at `url`. Tries YAML first (the
    /// canonical plugin document format), falling back to JSON.
    pub fn fetch_source_index(&self, url: &Url, cancel: &CancellationToken) -> Result<SourceIndex> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("source index fetch cancelled before it started"));
        }
        let body = self.get_body(url)?;
        serde_yaml::from_str(&body)
            .map_err(Error::from)
            .or_else(|_| serde_json::from_str(&body).map_err(Error::from))
    }

    /// Download a plugin document's raw bytes and verify them against
    /// `expected_sha256` before returning. A checksum mismatch is
    /// reported as [`Error::ChecksumMismatch`], never silently accepted.
    pub fn download(
        &self,
        entry: &SourceIndexEntry,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!(
                "download of '{}' cancelled before it started",
                entry.id
            )));
        }

        let response = self
            .agent
            .get(entry.url.as_str())
            .call()
            .map_err(|e| Error::network(entry.id.clone(), Error::Other(e.to_string())))?;

        let mut bytes = Vec::with_capacity(8192);
        response
            .into_reader()
            .take(MAX_DOWNLOAD_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| Error::network(entry.id.clone(), Error::BareIo(e)))?;

        if bytes.len() > MAX_DOWNLOAD_BYTES {
            return Err(Error::Integrity {
                id: entry.id.clone(),
                version: entry.version.to_string(),
                reason: format!("download exceeded the {MAX_DOWNLOAD_BYTES}-byte limit"),
            });
        }

        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("download of '{}' cancelled mid-transfer", entry.id)));
        }

        let found = sha256::digest(bytes.as_slice());
        if !found.eq_ignore_ascii_case(&entry.sha256) {
            return Err(Error::ChecksumMismatch {
                id: entry.id.clone(),
                expected: entry.sha256.clone(),
                found,
            });
        }

        Ok(bytes)
    }

    fn get_body(&self, url: &Url) -> Result<String> {
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|e| Error::network(url.to_string(), Error::Other(e.to_string())))?;
        response
            .into_string()
            .map_err(|e| Error::network(url.to_string(), Error::BareIo(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_index_find_matches_id_and_version() {
        let index = SourceIndex {
            plugins: vec![SourceIndexEntry {
                id: "ssh-weak-version".to_string(),
                version: semver::Version::new(1, 0, 0),
                url: Url::parse("https://plugins.example.com/ssh-weak-version-1.0.0.yaml").unwrap(),
                sha256: "abc123".to_string(),
            }],
        };
        let found = index.find("ssh-weak-version", &semver::Version::new(1, 0, 0));
        assert!(found.is_some());
        assert!(index.find("ssh-weak-version", &semver::Version::new(2, 0, 0)).is_none());
    }

    #[test]
    fn download_refuses_when_already_cancelled() {
        let downloader = Downloader::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let entry = SourceIndexEntry {
            id: "x".to_string(),
            version: semver::Version::new(1, 0, 0),
            url: Url::parse("https://example.invalid/x.yaml").unwrap(),
            sha256: "ignored".to_string(),
        };
        let err = downloader.download(&entry, &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }
}
