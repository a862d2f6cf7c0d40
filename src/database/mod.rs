//! Schema introspection and DDL execution
//!
//! The [`SchemaDao`] trait is the only way the reconciler talks to a
//! database. Implementations:
//! - [`MemoryDao`]: in-memory catalog for dry runs and tests
//! - [`PostgresDao`]: PostgreSQL through `tokio-postgres` (feature `postgres-backend`)
//!
//! Every structural method is one independent unit of work. Statements
//! autocommit; nothing here opens a transaction spanning several calls.

pub mod ddl;
pub mod memory;
#[cfg(feature = "postgres-backend")]
pub mod postgres;
pub mod tap_schema;
pub mod types;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{ConfigurationError, ConfigurationResult};
use crate::models::{ColumnConfig, TableConfig};

pub use ddl::Statement;
pub use memory::MemoryDao;
#[cfg(feature = "postgres-backend")]
pub use postgres::PostgresDao;
pub use tap_schema::{MetadataKey, MetadataRow, TapCatalog};
pub use types::{SqlType, TypeChange, classify_type_change, type_of};

/// Error type for database operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query failed: {message}")]
    Query { statement: String, message: String },
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Physical location of a logical table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    /// Logical full name used in the document and in log output
    pub full_name: String,
    /// Database schema
    pub schema: String,
    /// Database table name
    pub name: String,
}

impl TableRef {
    pub fn new(full_name: impl Into<String>, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            schema: schema.into(),
            name: name.into(),
        }
    }
}

/// A column as reported by the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    /// Native type, e.g. `character varying(64)`
    pub native_type: String,
    pub nullable: bool,
    /// 1-based ordinal position
    pub position: u32,
    pub comment: Option<String>,
}

impl ColumnDescription {
    /// Protocol-level type of the column
    pub fn sql_type(&self) -> SqlType {
        SqlType::parse(&self.native_type, None)
    }
}

/// Actual structure of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table: TableRef,
    /// Columns in ordinal position order
    pub columns: Vec<ColumnDescription>,
    /// Constraint name to definition fragment
    pub constraints: BTreeMap<String, String>,
    /// Index name to definition fragment (see [`ddl::index_fragment`]);
    /// indexes backing a constraint are not listed
    pub indexes: BTreeMap<String, String>,
    pub comment: Option<String>,
}

impl TableDescription {
    /// Find a column by name, case-insensitively
    pub fn column(&self, name: &str) -> Option<&ColumnDescription> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

pub(crate) fn execution_error(statement: &Statement, source: DatabaseError) -> ConfigurationError {
    ConfigurationError::SqlExecution {
        table: statement.table.clone(),
        statement: statement.sql.clone(),
        source,
    }
}

/// Database access used by the reconciler
///
/// Introspection and metadata methods fail with [`DatabaseError`];
/// structural methods render their DDL through [`ddl`] and fail with
/// [`ConfigurationError::SqlExecution`] naming the table and statement.
#[async_trait]
pub trait SchemaDao: Send + Sync {
    /// Verify connectivity and report the server version
    async fn check_version(&self) -> Result<String, DatabaseError>;

    /// Schema used for unqualified table names
    fn default_schema(&self) -> &str;

    /// Schema holding the TAP metadata catalog
    fn metadata_schema(&self) -> &str;

    /// Describe a table; `None` when it does not exist
    async fn describe_table(&self, table: &TableRef) -> Result<Option<TableDescription>, DatabaseError>;

    /// Names of the tables in `schema`
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DatabaseError>;

    /// Execute one statement
    async fn execute(&self, statement: &Statement) -> Result<(), DatabaseError>;

    async fn create_table(&self, table: &TableConfig) -> ConfigurationResult<()>;

    async fn add_column(&self, table: &TableRef, column: &ColumnConfig) -> ConfigurationResult<()>;

    /// Change a column to the native type `to`, e.g. `varchar(64)`
    async fn alter_column_type(&self, table: &TableRef, column: &str, to: &str) -> ConfigurationResult<()>;

    async fn alter_nullability(&self, table: &TableRef, column: &str, nullable: bool) -> ConfigurationResult<()>;

    async fn drop_column(&self, table: &TableRef, column: &str) -> ConfigurationResult<()>;

    async fn add_constraint(&self, table: &TableRef, name: &str, fragment: &str) -> ConfigurationResult<()>;

    async fn drop_constraint(&self, table: &TableRef, name: &str) -> ConfigurationResult<()>;

    async fn create_index(&self, table: &TableRef, name: &str, fragment: &str) -> ConfigurationResult<()>;

    async fn drop_index(&self, table: &TableRef, name: &str) -> ConfigurationResult<()>;

    async fn drop_table(&self, table: &TableRef) -> ConfigurationResult<()>;

    /// Create the TAP metadata schema and tables if missing
    async fn init_metadata_catalog(&self) -> Result<(), DatabaseError>;

    /// Read every persisted TAP metadata row
    async fn read_metadata(&self) -> Result<TapCatalog, DatabaseError>;

    /// Insert or replace one metadata row
    async fn upsert_metadata(&self, row: &MetadataRow) -> Result<(), DatabaseError>;

    /// Delete one metadata row and the rows it owns
    async fn delete_metadata(&self, key: &MetadataKey) -> Result<(), DatabaseError>;

    /// Persisted TAP metadata rendered as a declarative document
    async fn read_metadata_document(&self) -> ConfigurationResult<String> {
        let catalog = self.read_metadata().await?;
        let configuration = catalog.to_configuration()?;
        Ok(crate::codec::serialize(&configuration)?)
    }
}
