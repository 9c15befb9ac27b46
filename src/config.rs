//! Configuration for a `Graph` handle.

use std::path::Path;

use serde::Deserialize;

use crate::storage::BackendConfig;
use crate::{Error, Result};

/// Entity-layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: BackendConfig,
    /// Generic labels dropped when attribute kinds are discovered.
    pub marker_labels: Vec<String>,
    /// Attribute ids of the form `<date_prefix>:<spec>` go to the time tree.
    pub date_prefix: String,
    /// Longest label or property kind accepted, in bytes.
    pub max_identifier_len: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            marker_labels: ["Node", "Attribute", "Time", "Geo", "SubGraph"]
                .into_iter()
                .map(String::from)
                .collect(),
            date_prefix: "Time".to_string(),
            max_identifier_len: 64,
        }
    }
}

impl GraphConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "loading graph config");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: GraphConfig = toml::from_str(content)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// True when `label` is a generic marker rather than an attribute kind.
    pub fn is_marker(&self, label: &str) -> bool {
        self.marker_labels.iter().any(|m| m == label)
    }

    fn validate(&self) -> Result<()> {
        if self.date_prefix.is_empty() || self.date_prefix.contains(':') {
            return Err(Error::Config(format!(
                "date_prefix must be non-empty and contain no ':', got '{}'",
                self.date_prefix
            )));
        }
        if self.max_identifier_len == 0 {
            return Err(Error::Config("max_identifier_len must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = GraphConfig::from_toml("").unwrap();
        assert_eq!(config, GraphConfig::default());
        assert!(config.is_marker("Attribute"));
        assert!(!config.is_marker("Person"));
    }

    #[test]
    fn test_overrides() {
        let config = GraphConfig::from_toml(
            r#"
            marker_labels = ["Node"]
            date_prefix = "Date"

            [backend]
            kind = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.marker_labels, vec!["Node"]);
        assert_eq!(config.date_prefix, "Date");
        assert_eq!(config.max_identifier_len, 64);
    }

    #[test]
    fn test_rejects_bad_prefix() {
        assert!(matches!(
            GraphConfig::from_toml("date_prefix = \"a:b\""),
            Err(Error::Config(_))
        ));
        assert!(GraphConfig::from_toml("max_identifier_len = \"x\"").is_err());
    }
}
