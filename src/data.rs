// SPDX-License-Identifier: Apache-2.0

//! Request- and result-shaped data: what a caller asks to scan, and what
//! the engine learns about a target while doing it. These are the
//! concrete payloads that flow into the shared [`crate::orchestrator::DataContext`].

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::orchestrator::Finding;

/// A single open port observed on a target, optionally classified by
/// [`crate::parser::Dispatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortProfile {
    pub port: u16,
    pub open: bool,
    pub banner: Option<String>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
}

/// Everything learned about one scan target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetProfile {
    pub ip: IpAddr,
    pub ports: Vec<PortProfile>,
    pub alive: bool,
}

impl AssetProfile {
    /// Every `service_name` observed across this asset's ports, used by
    /// the smart loader to infer plugin categories.
    pub fn service_names(&self) -> Vec<String> {
        self.ports
            .iter()
            .filter_map(|p| p.service_name.clone())
            .collect()
    }

    /// Every open port on this asset, used by the smart loader to infer
    /// plugin categories from well-known port numbers.
    pub fn open_ports(&self) -> Vec<u16> {
        self.ports.iter().filter(|p| p.open).map(|p| p.port).collect()
    }
}

/// A caller's request to scan one or more targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub targets: Vec<IpAddr>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub allow_loopback: bool,
}

/// The complete, persistable result of one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub assets: Vec<AssetProfile>,
    pub findings: Vec<Finding>,
}
