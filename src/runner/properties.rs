//! Build properties
//!
//! Properties are declared with defaults by the build script and may be
//! overridden from the command line. An override always wins: declaring a
//! default for an overridden property, in any order, leaves the override in
//! place.

use crate::error::{ConfigError, ConfigResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
    overridden: BTreeSet<String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a set of overrides
    pub fn with_overrides<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut properties = Self::new();
        for (key, value) in overrides {
            properties.set_override(key, value);
        }
        properties
    }

    /// Set a value that declared defaults cannot replace
    pub fn set_override(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.values.insert(key.clone(), value.into());
        self.overridden.insert(key);
    }

    /// Declare a default value.
    ///
    /// Returns `false` when an override for the key is already in place.
    pub fn declare(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.overridden.contains(&key) {
            debug!(property = %key, "keeping overridden property value");
            return false;
        }
        self.values.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_overridden(&self, key: &str) -> bool {
        self.overridden.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parse a `KEY=VALUE` command line override
pub fn parse_override(raw: &str) -> ConfigResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidOverride(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_sets_default() {
        let mut props = Properties::new();
        assert!(props.declare("configuration", "Debug"));
        assert_eq!(props.get("configuration"), Some("Debug"));
        assert!(!props.is_overridden("configuration"));
    }

    #[test]
    fn test_override_survives_later_default() {
        let mut props = Properties::with_overrides([("configuration", "Release")]);
        assert!(!props.declare("configuration", "Debug"));
        assert_eq!(props.get("configuration"), Some("Release"));
    }

    #[test]
    fn test_override_replaces_earlier_default() {
        let mut props = Properties::new();
        props.declare("configuration", "Debug");
        props.set_override("configuration", "Release");
        props.declare("configuration", "Debug");
        assert_eq!(props.get("configuration"), Some("Release"));
    }

    #[test]
    fn test_later_default_replaces_earlier_default() {
        let mut props = Properties::new();
        props.declare("level", "1");
        props.declare("level", "2");
        assert_eq!(props.get("level"), Some("2"));
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("version=1.0=beta").unwrap(),
            ("version".to_string(), "1.0=beta".to_string())
        );
        assert_eq!(
            parse_override("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(matches!(
            parse_override("novalue"),
            Err(ConfigError::InvalidOverride(_))
        ));
        assert!(parse_override("=value").is_err());
    }
}
