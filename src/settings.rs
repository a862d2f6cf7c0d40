//! Database settings for a reconciliation run
//!
//! Settings come from a TOML file:
//!
//! ```toml
//! url = "postgres://tap@localhost/archive"
//! metadata_schema = "tap_schema"
//! default_schema = "public"
//! create_metadata_catalog = true
//! ```
//!
//! or from the global options of the declarative document itself
//! (`datasource.url`, `datasource.schema`, `tap.schema`, `tap.createCatalog`).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::database::tap_schema::DEFAULT_METADATA_SCHEMA;
use crate::error::ConfigurationResult;
use crate::models::Configuration;
use crate::models::configuration::keys;
use crate::models::table::DEFAULT_SCHEMA;

/// Error loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where the database lives and where its TAP metadata is kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection URL; blank means no datasource
    pub url: String,
    /// Schema holding the TAP metadata catalog
    pub metadata_schema: String,
    /// Schema used for unqualified table names
    pub default_schema: String,
    /// Create the metadata catalog before applying changes
    pub create_metadata_catalog: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            metadata_schema: DEFAULT_METADATA_SCHEMA.to_string(),
            default_schema: DEFAULT_SCHEMA.to_string(),
            create_metadata_catalog: true,
        }
    }
}

impl DatabaseSettings {
    /// Parse settings from TOML text; absent keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Derive settings from a document's global options
    pub fn from_configuration(configuration: &Configuration) -> ConfigurationResult<Self> {
        let defaults = Self::default();
        let options = configuration.options();
        Ok(Self {
            url: configuration.datasource_url().unwrap_or_default().to_string(),
            metadata_schema: options
                .get_or(keys::TAP_SCHEMA, &defaults.metadata_schema)
                .to_string(),
            default_schema: options
                .get_or(keys::DATASOURCE_SCHEMA, &defaults.default_schema)
                .to_string(),
            create_metadata_catalog: options
                .get_boolean_or(keys::TAP_CREATE_CATALOG, defaults.create_metadata_catalog)?,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Connection URL, `None` when blank
    pub fn url(&self) -> Option<&str> {
        Some(self.url.trim()).filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = DatabaseSettings::default();
        assert_eq!(settings.url(), None);
        assert_eq!(settings.metadata_schema, "tap_schema");
        assert_eq!(settings.default_schema, "public");
        assert!(settings.create_metadata_catalog);
    }

    #[test]
    fn test_from_toml_partial() {
        let settings = DatabaseSettings::from_toml_str("url = \"postgres://localhost/tap\"\n").unwrap();
        assert_eq!(settings.url(), Some("postgres://localhost/tap"));
        assert_eq!(settings.metadata_schema, "tap_schema");

        assert!(DatabaseSettings::from_toml_str("url = 5\n").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "metadata_schema = \"tap_meta\"").unwrap();
        writeln!(file, "create_metadata_catalog = false").unwrap();
        let settings = DatabaseSettings::load(file.path()).unwrap();
        assert_eq!(settings.metadata_schema, "tap_meta");
        assert!(!settings.create_metadata_catalog);

        assert!(matches!(
            DatabaseSettings::load("/nonexistent/settings.toml"),
            Err(SettingsError::Io { .. })
        ));
    }

    #[test]
    fn test_from_configuration() {
        let mut config = Configuration::new();
        config.options_mut().put(keys::DATASOURCE_URL, " postgres://db/tap ");
        config.options_mut().put(keys::TAP_SCHEMA, "tap_meta");
        config.options_mut().put(keys::TAP_CREATE_CATALOG, "no");
        let settings = DatabaseSettings::from_configuration(&config).unwrap();
        assert_eq!(settings.url(), Some("postgres://db/tap"));
        assert_eq!(settings.metadata_schema, "tap_meta");
        assert_eq!(settings.default_schema, "public");
        assert!(!settings.create_metadata_catalog);
    }
}
