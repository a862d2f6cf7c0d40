//! Table configuration

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::column::ColumnConfig;
use crate::database::TableRef;
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::options::{Options, TypeCoercionError};

/// Well-known table option keys
pub mod keys {
    pub const DB_SCHEMA: &str = "dbSchema";
    pub const DB_NAME: &str = "dbName";
    pub const TYPE: &str = "type";
    pub const DESCRIPTION: &str = "description";
    pub const LONG_DESCRIPTION: &str = "longDescription";
    pub const UTYPE: &str = "utype";
    pub const PARAMS: &str = "params";
    pub const SCS: &str = "scs";
    pub const RELEASE_REQUIRED: &str = "releaseRequired";
    pub const RELEASE_DATE: &str = "releaseDate";
}

/// Schema used for tables whose full name is not qualified
pub const DEFAULT_SCHEMA: &str = "public";

/// Logical table: options, columns keyed by name, and raw constraint and
/// index DDL fragments keyed by name
///
/// Constraint and index fragments are stored verbatim and never parsed by
/// the model; keeping them consistent with the columns is the reconciler's
/// job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    full_name: String,
    options: Options,
    columns: BTreeMap<String, ColumnConfig>,
    constraints: BTreeMap<String, String>,
    indexes: BTreeMap<String, String>,
}

impl TableConfig {
    /// Create an empty table with the given schema-qualified name
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            options: Options::new(),
            columns: BTreeMap::new(),
            constraints: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Database schema; `dbSchema` or the qualifier of the full name
    pub fn db_schema(&self) -> &str {
        if let Some(schema) = self.options.get(keys::DB_SCHEMA) {
            return schema;
        }
        match self.full_name.split_once('.') {
            Some((schema, _)) => schema,
            None => DEFAULT_SCHEMA,
        }
    }

    /// Database table name; `dbName` or the unqualified part of the full name
    pub fn db_name(&self) -> &str {
        if let Some(name) = self.options.get(keys::DB_NAME) {
            return name;
        }
        match self.full_name.split_once('.') {
            Some((_, name)) => name,
            None => &self.full_name,
        }
    }

    /// Reference used by the database layer
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.full_name, self.db_schema(), self.db_name())
    }

    /// `table` or `view`
    pub fn table_type(&self) -> &str {
        self.options.get_or(keys::TYPE, "table")
    }

    pub fn description(&self) -> Option<&str> {
        self.options.get(keys::DESCRIPTION)
    }

    pub fn set_description(&mut self, description: Option<&str>) {
        self.options.set_opt(keys::DESCRIPTION, description);
    }

    pub fn long_description(&self) -> Option<&str> {
        self.options.get(keys::LONG_DESCRIPTION)
    }

    pub fn utype(&self) -> Option<&str> {
        self.options.get(keys::UTYPE)
    }

    pub fn set_utype(&mut self, utype: Option<&str>) {
        self.options.set_opt(keys::UTYPE, utype);
    }

    pub fn params(&self) -> Option<&str> {
        self.options.get(keys::PARAMS)
    }

    /// Whether the table is exposed through simple cone search
    pub fn scs_enabled(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::SCS, false)
    }

    pub fn release_required(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::RELEASE_REQUIRED, false)
    }

    /// Release date in `YYYY-MM-DD` form
    pub fn release_date(&self) -> Result<Option<NaiveDate>, TypeCoercionError> {
        match self.options.get(keys::RELEASE_DATE) {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(Some)
                .map_err(|_| TypeCoercionError {
                    key: keys::RELEASE_DATE.to_string(),
                    value: raw.to_string(),
                    expected: "date (YYYY-MM-DD)",
                }),
        }
    }

    pub fn set_release_date(&mut self, date: Option<NaiveDate>) {
        self.options.set_opt(
            keys::RELEASE_DATE,
            date.map(|d| d.format("%Y-%m-%d").to_string()),
        );
    }

    /// Add a column, replacing any column with the same name
    ///
    /// The column's back-reference is pointed at this table.
    pub fn add_column(&mut self, mut column: ColumnConfig) -> Option<ColumnConfig> {
        column.attach(&self.full_name);
        self.columns.insert(column.name().to_string(), column)
    }

    /// Remove and detach a column
    pub fn remove_column(&mut self, name: &str) -> Option<ColumnConfig> {
        self.columns.remove(name).map(|mut column| {
            column.attach("");
            column
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnConfig> {
        self.columns.get(name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnConfig> {
        self.columns.get_mut(name)
    }

    /// Find a column by its physical name, case-insensitively
    pub fn column_by_db_name(&self, db_name: &str) -> Option<&ColumnConfig> {
        self.columns
            .values()
            .find(|c| c.db_name().eq_ignore_ascii_case(db_name))
    }

    /// Columns keyed by name
    pub fn columns(&self) -> &BTreeMap<String, ColumnConfig> {
        &self.columns
    }

    /// Columns sorted by declared order; unordered columns last, then by name
    ///
    /// Unparsable orders sort with the unordered columns.
    pub fn columns_in_order(&self) -> Vec<&ColumnConfig> {
        let mut columns: Vec<&ColumnConfig> = self.columns.values().collect();
        columns.sort_by_key(|c| (c.order().ok().flatten().unwrap_or(u32::MAX), c.name().to_string()));
        columns
    }

    /// Give every column without an order the next sequential position
    /// after the current maximum
    pub fn renumber_columns(&mut self) -> Result<(), TypeCoercionError> {
        let mut next = 0;
        let mut unordered = Vec::new();
        for column in self.columns.values() {
            match column.order()? {
                Some(order) => next = next.max(order),
                None => unordered.push(column.name().to_string()),
            }
        }
        for name in unordered {
            next += 1;
            if let Some(column) = self.columns.get_mut(&name) {
                column.set_order(Some(next));
            }
        }
        Ok(())
    }

    pub fn constraints(&self) -> &BTreeMap<String, String> {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.constraints
    }

    pub fn indexes(&self) -> &BTreeMap<String, String> {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.indexes
    }

    /// Check that every column back-reference points at this table and that
    /// every constraint and index only references declared columns
    pub fn validate(&self) -> ConfigurationResult<()> {
        for column in self.columns.values() {
            if column.table_name() != self.full_name {
                return Err(ConfigurationError::Invalid(format!(
                    "column {} is attached to '{}' but owned by {}",
                    column.name(),
                    column.table_name(),
                    self.full_name
                )));
            }
            column.verbosity()?;
        }
        let fragments = self
            .constraints
            .iter()
            .map(|(n, f)| ("constraint", n, f))
            .chain(self.indexes.iter().map(|(n, f)| ("index", n, f)));
        for (kind, name, fragment) in fragments {
            for referenced in crate::database::ddl::referenced_columns(fragment) {
                if self.column_by_db_name(&referenced).is_none() {
                    return Err(ConfigurationError::Invalid(format!(
                        "{} {} on {} references undeclared column '{}'",
                        kind, name, self.full_name, referenced
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, order: Option<u32>) -> ColumnConfig {
        let mut column = ColumnConfig::new(name);
        column.set_datatype("INTEGER");
        column.set_order(order);
        column
    }

    #[test]
    fn test_name_splitting() {
        let table = TableConfig::new("ivoa.obscore");
        assert_eq!(table.db_schema(), "ivoa");
        assert_eq!(table.db_name(), "obscore");

        let table = TableConfig::new("plain");
        assert_eq!(table.db_schema(), DEFAULT_SCHEMA);
        assert_eq!(table.db_name(), "plain");

        let mut table = TableConfig::new("ivoa.obscore");
        table.options_mut().put(keys::DB_SCHEMA, "archive");
        table.options_mut().put(keys::DB_NAME, "obscore_v1");
        assert_eq!(table.table_ref().schema, "archive");
        assert_eq!(table.table_ref().name, "obscore_v1");
        assert_eq!(table.table_ref().full_name, "ivoa.obscore");
    }

    #[test]
    fn test_add_column_sets_parent() {
        let mut table = TableConfig::new("public.obs");
        table.add_column(column("ra", None));
        assert_eq!(table.column("ra").unwrap().table_name(), "public.obs");

        let removed = table.remove_column("ra").unwrap();
        assert_eq!(removed.table_name(), "");
        assert!(table.column("ra").is_none());
    }

    #[test]
    fn test_columns_in_order() {
        let mut table = TableConfig::new("public.obs");
        table.add_column(column("c", Some(1)));
        table.add_column(column("a", None));
        table.add_column(column("b", Some(2)));
        let names: Vec<&str> = table.columns_in_order().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_renumber_columns() {
        let mut table = TableConfig::new("public.obs");
        table.add_column(column("x", Some(5)));
        table.add_column(column("b", None));
        table.add_column(column("a", None));
        table.renumber_columns().unwrap();
        assert_eq!(table.column("a").unwrap().order().unwrap(), Some(6));
        assert_eq!(table.column("b").unwrap().order().unwrap(), Some(7));
        assert_eq!(table.column("x").unwrap().order().unwrap(), Some(5));
    }

    #[test]
    fn test_validate_rejects_dangling_constraint() {
        let mut table = TableConfig::new("public.obs");
        table.add_column(column("id", Some(1)));
        table
            .constraints_mut()
            .insert("obs_pkey".to_string(), "PRIMARY KEY (id)".to_string());
        assert!(table.validate().is_ok());

        table
            .indexes_mut()
            .insert("obs_ra_idx".to_string(), "(ra)".to_string());
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared column 'ra'"));
    }

    #[test]
    fn test_validate_checks_functional_index_arguments() {
        let mut table = TableConfig::new("public.obs");
        table.add_column(column("ra", Some(1)));
        table.indexes_mut().insert(
            "obs_pos_idx".to_string(),
            "USING gist (spoint(radians(ra), radians(dec)))".to_string(),
        );
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared column 'dec'"));

        table.add_column(column("dec", Some(2)));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_release_date() {
        let mut table = TableConfig::new("public.obs");
        assert_eq!(table.release_date().unwrap(), None);
        table.set_release_date(NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(table.options().get(keys::RELEASE_DATE), Some("2025-03-01"));
        table.options_mut().put(keys::RELEASE_DATE, "March");
        assert!(table.release_date().is_err());
    }
}
