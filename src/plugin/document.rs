// SPDX-License-Identifier: Apache-2.0

//! The plugin document: a YAML file describing one plugin's identity,
//! metadata, triggers, match rules, output, and dependencies.
//!
//! Parsed with `serde`/`serde_yaml`, mirroring how hipcheck's
//! `plugin_manifest` module turns a declarative on-disk format into typed
//! Rust structs field-by-field -- but with `serde` derives doing the work
//! that hipcheck's KDL format needed hand-rolled node parsing for.

use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::id::PluginId;

/// Severity band a plugin's findings fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Free-form, non-authoritative metadata describing a plugin. `category`
/// drives smart-loader selection; everything else is descriptive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
}

/// A predicate evaluated against one key in the shared data context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Exists,
    NotExists,
    Equals(String),
    Contains(String),
}

impl FromStr for Predicate {
    type Err = Error;

    /// Grammar: `exists`, `not_exists`, `== <value>`, `contains <value>`.
    /// Quoted values have their quotes stripped.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("exists") {
            return Ok(Predicate::Exists);
        }
        if s.eq_ignore_ascii_case("not_exists") {
            return Ok(Predicate::NotExists);
        }
        if let Some(rest) = s.strip_prefix("==") {
            return Ok(Predicate::Equals(unquote(rest.trim())));
        }
        if let Some(rest) = s.strip_prefix("contains") {
            return Ok(Predicate::Contains(unquote(rest.trim())));
        }
        Err(Error::Invocation(format!("unrecognized condition expression '{s}'")))
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

/// A single `(dataKey, condition)` pair, used for both triggers and match
/// rules. The two share a shape since the spec leaves the exact match-rule
/// grammar unspecified and a uniform representation keeps the document
/// schema simple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub data_key: String,
    pub predicate: Predicate,
}

impl Condition {
    /// Evaluate against a single optional string value pulled from the
    /// shared data context for `data_key`.
    pub fn evaluate(&self, value: Option<&str>) -> bool {
        match &self.predicate {
            Predicate::Exists => value.is_some(),
            Predicate::NotExists => value.is_none(),
            Predicate::Equals(expected) => value == Some(expected.as_str()),
            Predicate::Contains(needle) => value.is_some_and(|v| v.contains(needle.as_str())),
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "dataKey")]
            data_key: String,
            condition: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        let predicate = Predicate::from_str(&raw.condition).map_err(serde::de::Error::custom)?;
        Ok(Condition {
            data_key: raw.data_key,
            predicate,
        })
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let rendered = match &self.predicate {
            Predicate::Exists => "exists".to_string(),
            Predicate::NotExists => "not_exists".to_string(),
            Predicate::Equals(v) => format!("== \"{v}\""),
            Predicate::Contains(v) => format!("contains \"{v}\""),
        };
        let mut state = serializer.serialize_struct("Condition", 2)?;
        state.serialize_field("dataKey", &self.data_key)?;
        state.serialize_field("condition", &rendered)?;
        state.end()
    }
}

/// The action a plugin takes once its triggers and match rules are
/// satisfied: a message to surface, optional remediation guidance, and
/// whether the finding constitutes a vulnerability (vs. informational).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub message: String,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(rename = "isVulnerability", default)]
    pub is_vulnerability: bool,
}

/// A match block: all rules must hold (logical AND) for the plugin to
/// fire once its triggers have supplied data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Match {
    #[serde(default)]
    pub rules: Vec<Condition>,
}

impl Match {
    pub fn is_satisfied(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        self.rules
            .iter()
            .all(|rule| rule.evaluate(lookup(&rule.data_key).as_deref()))
    }
}

/// One declarative plugin document, as parsed from its YAML file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, rename = "triggers")]
    pub triggers: Vec<Condition>,
    #[serde(default, rename = "match")]
    pub match_block: Match,
    pub output: Output,
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
}

impl Plugin {
    pub fn plugin_id(&self) -> PluginId {
        PluginId::new(self.id.clone(), self.version.clone())
    }

    /// Parse a plugin document from its YAML source text.
    pub fn parse(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id: ssh-weak-version
name: SSH Weak Version Check
version: 1.0.0
metadata:
  author: vulntor
  severity: high
  tags: ["ssh", "outdated"]
  category: ["ssh"]
triggers:
  - dataKey: "ssh/banner"
    condition: "exists"
match:
  rules:
    - dataKey: "ssh/version"
      condition: "contains \"7.2\""
output:
  message: "Outdated SSH server detected"
  remediation: "Upgrade OpenSSH to the latest stable release"
  isVulnerability: true
dependsOn:
  - "ssh-banner-grab"
"#;

    #[test]
    fn parses_a_full_plugin_document() {
        let plugin = Plugin::parse(SAMPLE).unwrap();
        assert_eq!(plugin.id, "ssh-weak-version");
        assert_eq!(plugin.version, Version::new(1, 0, 0));
        assert_eq!(plugin.metadata.category, vec!["ssh".to_string()]);
        assert_eq!(plugin.triggers.len(), 1);
        assert_eq!(plugin.match_block.rules.len(), 1);
        assert!(plugin.output.is_vulnerability);
        assert_eq!(plugin.depends_on, vec!["ssh-banner-grab".to_string()]);
    }

    #[test]
    fn plugin_id_combines_id_and_version() {
        let plugin = Plugin::parse(SAMPLE).unwrap();
        assert_eq!(plugin.plugin_id().to_string(), "ssh-weak-version@1.0.0");
    }

    #[test]
    fn condition_exists_predicate_evaluates_presence() {
        let cond = Condition {
            data_key: "ssh/banner".to_string(),
            predicate: Predicate::Exists,
        };
        assert!(cond.evaluate(Some("SSH-2.0-OpenSSH_7.2")));
        assert!(!cond.evaluate(None));
    }

    #[test]
    fn condition_contains_predicate_matches_substring() {
        let cond = Condition {
            data_key: "ssh/version".to_string(),
            predicate: Predicate::Contains("7.2".to_string()),
        };
        assert!(cond.evaluate(Some("OpenSSH 7.2p2")));
        assert!(!cond.evaluate(Some("OpenSSH 8.9p1")));
    }

    #[test]
    fn match_block_requires_all_rules_to_hold() {
        let m = Match {
            rules: vec![
                Condition {
                    data_key: "a".to_string(),
                    predicate: Predicate::Exists,
                },
                Condition {
                    data_key: "b".to_string(),
                    predicate: Predicate::Equals("x".to_string()),
                },
            ],
        };
        let data = [("a", "present"), ("b", "x")];
        let lookup = |k: &str| data.iter().find(|(key, _)| *key == k).map(|(_, v)| v.to_string());
        assert!(m.is_satisfied(lookup));

        let data_missing_b = [("a", "present")];
        let lookup2 = |k: &str| {
            data_missing_b
                .iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.to_string())
        };
        assert!(!m.is_satisfied(lookup2));
    }

    #[test]
    fn rejects_unrecognized_condition_expression() {
        assert!(Predicate::from_str("frobnicate").is_err());
    }
}
