// SPDX-License-Identifier: Apache-2.0

//! The plugin model: identity, the declarative YAML document, and the
//! condition grammar triggers and match rules are written in.

pub mod document;
pub mod id;

pub use document::{Condition, Match, Metadata, Output, Plugin, Predicate, Severity};
pub use id::PluginId;

/// Validate the structural invariants a plugin document must satisfy
/// beyond what parsing alone enforces: a non-empty id/name, and no
/// self-dependency.
pub fn validate(plugin: &Plugin) -> crate::error::Result<()> {
    if plugin.id.trim().is_empty() {
        return Err(crate::error::Error::Invocation(
            "plugin document is missing a non-empty 'id'".to_string(),
        ));
    }
    if plugin.name.trim().is_empty() {
        return Err(crate::error::Error::Invocation(format!(
            "plugin '{}' is missing a non-empty 'name'",
            plugin.id
        )));
    }
    if plugin.depends_on.iter().any(|dep| dep == &plugin.id) {
        return Err(crate::error::Error::Invocation(format!(
            "plugin '{}' declares a dependency on itself",
            plugin.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, depends_on: Vec<&str>) -> Plugin {
        Plugin {
            id: id.to_string(),
            name: "Sample".to_string(),
            version: semver::Version::new(1, 0, 0),
            metadata: Metadata::default(),
            triggers: Vec::new(),
            match_block: Match::default(),
            output: Output {
                message: "msg".to_string(),
                remediation: None,
                is_vulnerability: false,
            },
            depends_on: depends_on.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn validate_rejects_empty_id() {
        let plugin = sample("", vec![]);
        assert!(validate(&plugin).is_err());
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let plugin = sample("a", vec!["a"]);
        assert!(validate(&plugin).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_plugin() {
        let plugin = sample("a", vec!["b"]);
        assert!(validate(&plugin).is_ok());
    }
}
