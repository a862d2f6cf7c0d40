//! Root aggregate of the declarative document

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::change::{Action, Change};
use super::endpoint::{EndPoint, ServiceType};
use super::table::TableConfig;
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::options::Options;

/// Well-known global option keys
pub mod keys {
    pub const DATASOURCE_URL: &str = "datasource.url";
    pub const DATASOURCE_SCHEMA: &str = "datasource.schema";
    pub const TAP_SCHEMA: &str = "tap.schema";
    pub const TAP_CREATE_CATALOG: &str = "tap.createCatalog";
}

/// Declarative configuration: global options, endpoints keyed by name and
/// tables keyed by full name, plus the change level and action requested
/// for the current reconciliation cycle
///
/// Equality covers the document content only. The change level and action
/// are run parameters the codec does not encode, so they are not compared.
///
/// # Example
///
/// ```rust
/// use tap_config::models::{Configuration, TableConfig};
///
/// let mut config = Configuration::new();
/// config.options_mut().put("datasource.url", "");
/// config.add_table(TableConfig::new("public.obs"));
/// assert!(config.get_table_config("public.obs").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    options: Options,
    end_points: BTreeMap<String, EndPoint>,
    tables: BTreeMap<String, TableConfig>,
    change: Change,
    action: Action,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.options == other.options
            && self.end_points == other.end_points
            && self.tables == other.tables
    }
}

impl Eq for Configuration {}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Get a global option
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key)
    }

    /// Get a global option as a comma separated list; blank entries are skipped
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.options
            .get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connection URL of the datasource; blank means no datasource
    pub fn datasource_url(&self) -> Option<&str> {
        self.options
            .get(keys::DATASOURCE_URL)
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn change(&self) -> Change {
        self.change
    }

    pub fn set_change(&mut self, change: Change) {
        self.change = change;
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    pub fn end_points(&self) -> &BTreeMap<String, EndPoint> {
        &self.end_points
    }

    pub fn get_end_point(&self, name: &str) -> Option<&EndPoint> {
        self.end_points.get(name)
    }

    pub fn end_point_mut(&mut self, name: &str) -> Option<&mut EndPoint> {
        self.end_points.get_mut(name)
    }

    /// Add an endpoint, replacing one with the same name
    pub fn add_end_point(&mut self, end_point: EndPoint) -> Option<EndPoint> {
        self.end_points
            .insert(end_point.name().to_string(), end_point)
    }

    pub fn tables(&self) -> &BTreeMap<String, TableConfig> {
        &self.tables
    }

    pub fn get_table_config(&self, full_name: &str) -> Option<&TableConfig> {
        self.tables.get(full_name)
    }

    pub fn table_mut(&mut self, full_name: &str) -> Option<&mut TableConfig> {
        self.tables.get_mut(full_name)
    }

    /// Add a table, replacing one with the same full name
    pub fn add_table(&mut self, table: TableConfig) -> Option<TableConfig> {
        self.tables.insert(table.full_name().to_string(), table)
    }

    /// Remove a table; endpoints keep their references until re-validated
    pub fn remove_table(&mut self, full_name: &str) -> Option<TableConfig> {
        self.tables.remove(full_name)
    }

    /// Readiness rule for the service behind an endpoint
    ///
    /// The endpoint must exist and every exposed table must be configured.
    /// SCS endpoints additionally need a positive `max.radius` and may only
    /// expose `scs`-enabled tables with at least one column carrying a
    /// verbosity level.
    pub fn check_end_point(&self, name: &str) -> ConfigurationResult<()> {
        let end_point = self.get_end_point(name).ok_or_else(|| ConfigurationError::MissingKey {
            context: "endPoints".to_string(),
            key: name.to_string(),
        })?;

        for full_name in end_point.tables() {
            let table = self.get_table_config(full_name).ok_or_else(|| {
                ConfigurationError::Invalid(format!(
                    "endpoint {} exposes unknown table {}",
                    name, full_name
                ))
            })?;
            table.validate()?;
        }

        if end_point.service_type() == Some(ServiceType::Scs) {
            match end_point.max_radius()? {
                Some(radius) if radius > 0.0 => {}
                Some(radius) => {
                    return Err(ConfigurationError::Invalid(format!(
                        "endpoint {} has non-positive max.radius {}",
                        name, radius
                    )));
                }
                None => {
                    return Err(ConfigurationError::MissingKey {
                        context: format!("endPoints.{}", name),
                        key: super::endpoint::keys::MAX_RADIUS.to_string(),
                    });
                }
            }
            for full_name in end_point.tables() {
                let Some(table) = self.get_table_config(full_name) else {
                    continue;
                };
                if !table.scs_enabled()? {
                    return Err(ConfigurationError::Invalid(format!(
                        "table {} is exposed through {} but not scs-enabled",
                        full_name, name
                    )));
                }
                let mut has_verbosity = false;
                for column in table.columns().values() {
                    has_verbosity |= column.verbosity()?.is_some();
                }
                if !has_verbosity {
                    return Err(ConfigurationError::Invalid(format!(
                        "table {} declares no column with a verbosity level",
                        full_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Copy with column orders renumbered in every table
    pub fn normalized(&self) -> ConfigurationResult<Configuration> {
        let mut normalized = self.clone();
        for table in normalized.tables.values_mut() {
            table.renumber_columns()?;
        }
        Ok(normalized)
    }

    /// SHA-256 of the serialized document, hex encoded
    pub fn fingerprint(&self) -> ConfigurationResult<String> {
        let text = crate::codec::serialize(self)?;
        Ok(format!("{:x}", Sha256::digest(text.as_bytes())))
    }
}
