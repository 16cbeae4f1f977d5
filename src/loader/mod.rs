// SPDX-License-Identifier: Apache-2.0

//! The smart loader: narrows the full installed plugin catalog down to
//! the set relevant to a particular scan, instead of running every
//! installed plugin against every target.
//!
//! Relevance is driven by category: a plugin whose `metadata.category`
//! intersects the scan's inferred category set is loaded. Plugins that
//! declare no category at all fall back to a keyword scan over their
//! trigger data keys (e.g. a trigger on `"ssh/banner"` implies the `ssh`
//! category) so an author isn't required to keep metadata in lockstep
//! with their own trigger keys.

use std::collections::BTreeSet;

use crate::plugin::Plugin;

/// Well-known port-to-category associations used to infer categories
/// from an open-port scan, when the caller hasn't supplied explicit
/// categories.
const PORT_CATEGORIES: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (110, "pop3"),
    (143, "imap"),
    (443, "http"),
    (3306, "mysql"),
    (5432, "postgres"),
    (6379, "redis"),
    (8080, "http"),
    (8443, "http"),
];

/// The scan-side information the smart loader uses to decide which
/// plugins are in scope.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    pub ports: Vec<u16>,
    pub services: Vec<String>,
    pub explicit_categories: Vec<String>,
}

impl LoadContext {
    /// The full inferred category set: explicit categories, plus
    /// port-derived categories, plus the lowercased service names
    /// themselves (a service name like `"redis"` is also a category).
    pub fn categories(&self) -> BTreeSet<String> {
        let mut categories: BTreeSet<String> = self
            .explicit_categories
            .iter()
            .map(|c| c.to_lowercase())
            .collect();

        for port in &self.ports {
            if let Some((_, category)) = PORT_CATEGORIES.iter().find(|(p, _)| p == port) {
                categories.insert((*category).to_string());
            }
        }

        for service in &self.services {
            categories.insert(service.to_lowercase());
        }

        categories
    }
}

/// Select the subset of `catalog` relevant to `ctx`.
pub fn load_for_context<'a>(catalog: &'a [Plugin], ctx: &LoadContext) -> Vec<&'a Plugin> {
    let categories = ctx.categories();
    catalog
        .iter()
        .filter(|plugin| plugin_is_relevant(plugin, &categories))
        .collect()
}

fn plugin_is_relevant(plugin: &Plugin, categories: &BTreeSet<String>) -> bool {
    if !plugin.metadata.category.is_empty() {
        return plugin
            .metadata
            .category
            .iter()
            .any(|c| categories.contains(&c.to_lowercase()));
    }

    // No explicit category: infer one from the plugin's trigger data
    // keys, e.g. a trigger on "ssh/banner" implies the "ssh" category.
    plugin.triggers.iter().any(|trigger| {
        categories
            .iter()
            .any(|category| trigger.data_key.to_lowercase().contains(category.as_str()))
    })
}
