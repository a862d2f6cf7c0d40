//! TAP_SCHEMA metadata catalog
//!
//! Rows of the five TAP_SCHEMA 1.1 tables as plain structs. Ownership is
//! explicit: a schema owns the tables whose `schema_name` points at it, a
//! table owns the columns whose `table_name` points at it, and a key owns its
//! [`KeyColumnRow`]s directly.

use std::collections::BTreeMap;

use super::{DatabaseError, TableRef};
use super::ddl::{ForeignKeyFragment, qualified_name};
use crate::error::ConfigurationResult;
use crate::models::column::keys as column_keys;
use crate::models::table::keys as table_keys;
use crate::models::{ColumnConfig, Configuration, TableConfig};

/// TAP_SCHEMA version implemented by the catalog
pub const TAP_SCHEMA_VERSION: &str = "1.1";

/// Default schema holding the catalog tables
pub const DEFAULT_METADATA_SCHEMA: &str = "tap_schema";

/// DDL creating the catalog in `schema` (PostgreSQL syntax)
pub fn catalog_ddl(schema: &str) -> String {
    let schemas = qualified_name(schema, "schemas");
    let tables = qualified_name(schema, "tables");
    let columns = qualified_name(schema, "columns");
    let keys = qualified_name(schema, "keys");
    let key_columns = qualified_name(schema, "key_columns");
    format!(
        r#"
CREATE SCHEMA IF NOT EXISTS {schema_ident};

CREATE TABLE IF NOT EXISTS {schemas} (
    schema_name VARCHAR(64) PRIMARY KEY,
    utype VARCHAR(512),
    description VARCHAR(512),
    schema_index INTEGER
);

CREATE TABLE IF NOT EXISTS {tables} (
    schema_name VARCHAR(64) NOT NULL REFERENCES {schemas} (schema_name) ON DELETE CASCADE,
    table_name VARCHAR(128) PRIMARY KEY,
    table_type VARCHAR(8) NOT NULL DEFAULT 'table',
    utype VARCHAR(512),
    description VARCHAR(512),
    table_index INTEGER,
    db_table_name VARCHAR(128)
);

ALTER TABLE {tables} ADD COLUMN IF NOT EXISTS db_table_name VARCHAR(128);

CREATE TABLE IF NOT EXISTS {columns} (
    table_name VARCHAR(128) NOT NULL REFERENCES {tables} (table_name) ON DELETE CASCADE,
    column_name VARCHAR(64) NOT NULL,
    datatype VARCHAR(64) NOT NULL,
    arraysize VARCHAR(16),
    "size" INTEGER,
    description VARCHAR(512),
    utype VARCHAR(512),
    unit VARCHAR(64),
    ucd VARCHAR(64),
    indexed INTEGER NOT NULL DEFAULT 0,
    principal INTEGER NOT NULL DEFAULT 0,
    std INTEGER NOT NULL DEFAULT 0,
    column_index INTEGER,
    scs_verbosity INTEGER,
    PRIMARY KEY (table_name, column_name)
);

CREATE TABLE IF NOT EXISTS {keys} (
    key_id VARCHAR(64) PRIMARY KEY,
    from_table VARCHAR(128) NOT NULL REFERENCES {tables} (table_name) ON DELETE CASCADE,
    target_table VARCHAR(128) NOT NULL,
    utype VARCHAR(512),
    description VARCHAR(512)
);

CREATE TABLE IF NOT EXISTS {key_columns} (
    key_id VARCHAR(64) NOT NULL REFERENCES {keys} (key_id) ON DELETE CASCADE,
    from_column VARCHAR(64) NOT NULL,
    target_column VARCHAR(64) NOT NULL,
    PRIMARY KEY (key_id, from_column)
);
"#,
        schema_ident = super::ddl::quote_identifier(schema),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRow {
    pub schema_name: String,
    pub description: Option<String>,
    pub utype: Option<String>,
}

impl SchemaRow {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            description: None,
            utype: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Owning schema, which is also the table's database schema
    pub schema_name: String,
    /// Full (logical) table name
    pub table_name: String,
    /// Database table name the table was created with
    pub db_name: String,
    pub table_type: String,
    pub description: Option<String>,
    pub utype: Option<String>,
}

impl TableRow {
    pub fn from_config(table: &TableConfig) -> Self {
        Self {
            schema_name: table.db_schema().to_string(),
            table_name: table.full_name().to_string(),
            db_name: table.db_name().to_string(),
            table_type: table.table_type().to_string(),
            description: table.description().map(str::to_string),
            utype: table.utype().map(str::to_string),
        }
    }

    /// Physical table the row describes
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.table_name, &self.schema_name, &self.db_name)
    }
}

/// Database table name implied by a full name without `dbName`
pub fn unqualified(full_name: &str) -> &str {
    full_name
        .split_once('.')
        .map(|(_, name)| name)
        .unwrap_or(full_name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    /// Owning table (full name)
    pub table_name: String,
    pub column_name: String,
    /// Protocol-level type name
    pub datatype: String,
    pub size: Option<u32>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub ucd: Option<String>,
    pub utype: Option<String>,
    pub principal: bool,
    pub indexed: bool,
    pub std: bool,
    pub column_index: Option<u32>,
    pub scs_verbosity: Option<u8>,
}

impl ColumnRow {
    /// Metadata row for a declared column; the column must have a type
    pub fn from_config(table: &TableConfig, column: &ColumnConfig) -> ConfigurationResult<Self> {
        let sql_type = column.sql_type()?.ok_or_else(|| crate::error::ConfigurationError::MissingKey {
            context: format!("column {}.{}", table.full_name(), column.name()),
            key: column_keys::TYPE.to_string(),
        })?;
        Ok(Self {
            table_name: table.full_name().to_string(),
            column_name: column.db_name().to_string(),
            datatype: sql_type.name,
            size: sql_type.size,
            description: column.description().map(str::to_string),
            unit: column.unit().map(str::to_string),
            ucd: column.ucd().map(str::to_string),
            utype: column.utype().map(str::to_string),
            principal: column.principal()?,
            indexed: column.indexed()?,
            std: column.std()?,
            column_index: column.order()?,
            scs_verbosity: column.verbosity()?,
        })
    }

    /// Column configuration carrying only the persisted metadata
    pub fn to_column(&self, name: &str) -> ColumnConfig {
        let mut column = ColumnConfig::new(name);
        if name != self.column_name {
            column.options_mut().put(column_keys::DB_NAME, &self.column_name);
        }
        let options = column.options_mut();
        options.put(column_keys::TYPE, &self.datatype);
        options.set_opt(column_keys::SIZE, self.size.map(|s| s.to_string()));
        options.set_opt(column_keys::DESCRIPTION, self.description.as_deref());
        options.set_opt(column_keys::UNIT, self.unit.as_deref());
        options.set_opt(column_keys::UCD, self.ucd.as_deref());
        options.set_opt(column_keys::UTYPE, self.utype.as_deref());
        for (key, flag) in [
            (column_keys::PRINCIPAL, self.principal),
            (column_keys::INDEXED, self.indexed),
            (column_keys::STD, self.std),
        ] {
            if flag {
                options.put(key, "true");
            }
        }
        options.set_opt(column_keys::VERBOSITY, self.scs_verbosity.map(|v| v.to_string()));
        options.set_opt(column_keys::ORDER, self.column_index.map(|o| o.to_string()));
        column
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumnRow {
    pub from_column: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRow {
    pub key_id: String,
    /// Owning table (full name)
    pub from_table: String,
    pub target_table: String,
    pub description: Option<String>,
    pub utype: Option<String>,
    pub columns: Vec<KeyColumnRow>,
}

impl KeyRow {
    /// Key row for a foreign key constraint named `constraint` on `table`
    ///
    /// Unqualified targets are resolved against the table's schema.
    pub fn from_foreign_key(table: &TableConfig, constraint: &str, fk: &ForeignKeyFragment) -> Self {
        let target_table = if fk.target_table.contains('.') {
            fk.target_table.clone()
        } else {
            format!("{}.{}", table.db_schema(), fk.target_table)
        };
        Self {
            key_id: key_id(table.full_name(), constraint),
            from_table: table.full_name().to_string(),
            target_table,
            description: None,
            utype: None,
            columns: fk
                .from_columns
                .iter()
                .zip(&fk.target_columns)
                .map(|(from, target)| KeyColumnRow {
                    from_column: from.clone(),
                    target_column: target.clone(),
                })
                .collect(),
        }
    }

    /// Constraint name the key was derived from
    pub fn constraint_name(&self) -> &str {
        self.key_id
            .strip_prefix(&self.from_table)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(&self.key_id)
    }

    /// Render as a `FOREIGN KEY` constraint fragment
    pub fn to_fragment(&self) -> String {
        let from: Vec<&str> = self.columns.iter().map(|c| c.from_column.as_str()).collect();
        let target: Vec<&str> = self.columns.iter().map(|c| c.target_column.as_str()).collect();
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            from.join(", "),
            self.target_table,
            target.join(", ")
        )
    }
}

/// Key id of the foreign key `constraint` declared on `table`
pub fn key_id(table: &str, constraint: &str) -> String {
    format!("{}.{}", table, constraint)
}

/// One row to insert or replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRow {
    Schema(SchemaRow),
    Table(TableRow),
    Column(ColumnRow),
    Key(KeyRow),
}

impl MetadataRow {
    /// Table the row belongs to, for log output
    pub fn table(&self) -> &str {
        match self {
            MetadataRow::Schema(row) => &row.schema_name,
            MetadataRow::Table(row) => &row.table_name,
            MetadataRow::Column(row) => &row.table_name,
            MetadataRow::Key(row) => &row.from_table,
        }
    }
}

/// Identity of a row to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataKey {
    Schema(String),
    Table(String),
    Column { table: String, column: String },
    Key(String),
}

/// All persisted TAP metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapCatalog {
    pub schemas: BTreeMap<String, SchemaRow>,
    pub tables: BTreeMap<String, TableRow>,
    pub columns: BTreeMap<(String, String), ColumnRow>,
    pub keys: BTreeMap<String, KeyRow>,
}

impl TapCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row
    pub fn apply(&mut self, row: MetadataRow) {
        match row {
            MetadataRow::Schema(row) => {
                self.schemas.insert(row.schema_name.clone(), row);
            }
            MetadataRow::Table(row) => {
                self.tables.insert(row.table_name.clone(), row);
            }
            MetadataRow::Column(row) => {
                self.columns
                    .insert((row.table_name.clone(), row.column_name.clone()), row);
            }
            MetadataRow::Key(row) => {
                self.keys.insert(row.key_id.clone(), row);
            }
        }
    }

    /// Remove a row together with every row it owns
    pub fn remove(&mut self, key: &MetadataKey) {
        match key {
            MetadataKey::Schema(schema) => {
                self.schemas.remove(schema);
                let owned: Vec<String> = self
                    .tables
                    .values()
                    .filter(|t| &t.schema_name == schema)
                    .map(|t| t.table_name.clone())
                    .collect();
                for table in owned {
                    self.remove(&MetadataKey::Table(table));
                }
            }
            MetadataKey::Table(table) => {
                self.tables.remove(table);
                self.columns.retain(|(owner, _), _| owner != table);
                self.keys.retain(|_, k| &k.from_table != table);
            }
            MetadataKey::Column { table, column } => {
                self.columns.remove(&(table.clone(), column.clone()));
            }
            MetadataKey::Key(key_id) => {
                self.keys.remove(key_id);
            }
        }
    }

    pub fn table(&self, full_name: &str) -> Option<&TableRow> {
        self.tables.get(full_name)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnRow> {
        self.columns.get(&(table.to_string(), column.to_string()))
    }

    /// Column rows owned by `table`
    pub fn columns_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ColumnRow> + 'a {
        self.columns.values().filter(move |c| c.table_name == table)
    }

    /// Key rows owned by `table`
    pub fn keys_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a KeyRow> + 'a {
        self.keys.values().filter(move |k| k.from_table == table)
    }

    /// Render the catalog as a configuration in the document model
    ///
    /// Column rows and key rows must belong to a known table.
    pub fn to_configuration(&self) -> Result<Configuration, DatabaseError> {
        let mut configuration = Configuration::new();
        for row in self.tables.values() {
            let mut table = TableConfig::new(&row.table_name);
            if row.table_type != "table" {
                table.options_mut().put(table_keys::TYPE, &row.table_type);
            }
            table.set_description(row.description.as_deref());
            table.set_utype(row.utype.as_deref());
            configuration.add_table(table);
        }

        for row in self.columns.values() {
            let table = configuration.table_mut(&row.table_name).ok_or_else(|| {
                DatabaseError::MalformedMetadata(format!(
                    "column {} belongs to unknown table {}",
                    row.column_name, row.table_name
                ))
            })?;
            table.add_column(row.to_column(&row.column_name));
        }

        for row in self.keys.values() {
            let table = configuration.table_mut(&row.from_table).ok_or_else(|| {
                DatabaseError::MalformedMetadata(format!(
                    "key {} belongs to unknown table {}",
                    row.key_id, row.from_table
                ))
            })?;
            table
                .constraints_mut()
                .insert(row.constraint_name().to_string(), row.to_fragment());
        }
        Ok(configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ddl::parse_foreign_key;

    fn obs_table() -> TableConfig {
        let mut table = TableConfig::new("public.obs");
        table.set_description(Some("Observations"));
        let mut ra = ColumnConfig::new("ra");
        ra.set_datatype("DOUBLE");
        ra.set_unit(Some("deg"));
        ra.options_mut().put(column_keys::PRINCIPAL, "yes");
        ra.set_order(Some(1));
        table.add_column(ra);
        table
    }

    #[test]
    fn test_column_row_from_config() {
        let table = obs_table();
        let row = ColumnRow::from_config(&table, table.column("ra").unwrap()).unwrap();
        assert_eq!(row.table_name, "public.obs");
        assert_eq!(row.datatype, "DOUBLE");
        assert_eq!(row.unit.as_deref(), Some("deg"));
        assert!(row.principal);
        assert!(!row.indexed);
        assert_eq!(row.column_index, Some(1));
    }

    #[test]
    fn test_removing_table_cascades() {
        let table = obs_table();
        let mut catalog = TapCatalog::new();
        catalog.apply(MetadataRow::Schema(SchemaRow::new("public")));
        catalog.apply(MetadataRow::Table(TableRow::from_config(&table)));
        catalog.apply(MetadataRow::Column(
            ColumnRow::from_config(&table, table.column("ra").unwrap()).unwrap(),
        ));
        assert_eq!(catalog.columns_of("public.obs").count(), 1);

        catalog.remove(&MetadataKey::Schema("public".to_string()));
        assert!(catalog.tables.is_empty());
        assert!(catalog.columns.is_empty());
    }

    #[test]
    fn test_to_configuration() {
        let table = obs_table();
        let mut catalog = TapCatalog::new();
        catalog.apply(MetadataRow::Table(TableRow::from_config(&table)));
        catalog.apply(MetadataRow::Column(
            ColumnRow::from_config(&table, table.column("ra").unwrap()).unwrap(),
        ));
        let fk = parse_foreign_key("FOREIGN KEY (ra) REFERENCES other (ra)").unwrap();
        catalog.apply(MetadataRow::Key(KeyRow::from_foreign_key(&table, "obs_fk", &fk)));

        let config = catalog.to_configuration().unwrap();
        let exported = config.get_table_config("public.obs").unwrap();
        assert_eq!(exported.description(), Some("Observations"));
        let ra = exported.column("ra").unwrap();
        assert_eq!(ra.unit(), Some("deg"));
        assert!(ra.principal().unwrap());
        assert!(table.column("ra").unwrap().metadata_differences(ra).is_empty());
        assert_eq!(
            exported.constraints()["obs_fk"],
            "FOREIGN KEY (ra) REFERENCES public.other (ra)"
        );
    }

    #[test]
    fn test_orphan_column_is_malformed() {
        let table = obs_table();
        let mut catalog = TapCatalog::new();
        catalog.apply(MetadataRow::Column(
            ColumnRow::from_config(&table, table.column("ra").unwrap()).unwrap(),
        ));
        assert!(matches!(
            catalog.to_configuration(),
            Err(DatabaseError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_catalog_ddl_uses_schema() {
        let ddl = catalog_ddl("tap_schema");
        assert!(ddl.contains("CREATE SCHEMA IF NOT EXISTS \"tap_schema\""));
        assert!(ddl.contains("\"tap_schema\".\"key_columns\""));
        assert!(ddl.contains("scs_verbosity INTEGER"));
        assert!(ddl.contains("ADD COLUMN IF NOT EXISTS db_table_name"));
    }

    #[test]
    fn test_table_row_keeps_physical_name() {
        let mut table = TableConfig::new("ivoa.obscore");
        table.options_mut().put(table_keys::DB_SCHEMA, "public");
        table.options_mut().put(table_keys::DB_NAME, "obscore_v1");
        let row = TableRow::from_config(&table);
        assert_eq!(row.table_ref(), table.table_ref());
        assert_eq!(unqualified("ivoa.obscore"), "obscore");
        assert_eq!(unqualified("plain"), "plain");
    }
}
