//! In-memory schema DAO
//!
//! Keeps tables and TAP metadata in process memory while rendering exactly
//! the statements a real database would receive. Used for dry runs and
//! tests. Dropping a column also drops the constraints and indexes that
//! reference it, as PostgreSQL does.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::ddl::{self, Statement, referenced_columns};
use super::tap_schema::{DEFAULT_METADATA_SCHEMA, MetadataKey, MetadataRow, TapCatalog};
use super::{
    ColumnDescription, DatabaseError, SchemaDao, TableDescription, TableRef, execution_error,
};
use crate::error::ConfigurationResult;
use crate::models::{ColumnConfig, TableConfig};
use crate::models::table::DEFAULT_SCHEMA;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnDescription>,
    constraints: BTreeMap<String, String>,
    indexes: BTreeMap<String, String>,
    comment: Option<String>,
}

impl MemoryTable {
    fn column_mut(&mut self, name: &str) -> Result<&mut ColumnDescription, DatabaseError> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| missing(format!("column \"{}\" does not exist", name)))
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn next_position(&self) -> u32 {
        self.columns.iter().map(|c| c.position).max().unwrap_or(0) + 1
    }

    /// Reject fragments referencing columns the table does not have
    fn check_references(&self, fragment: &str) -> Result<(), DatabaseError> {
        match referenced_columns(fragment)
            .into_iter()
            .find(|column| !self.has_column(column))
        {
            Some(column) => Err(missing(format!("column \"{}\" does not exist", column))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<(String, String), MemoryTable>,
    catalog: TapCatalog,
    statements: Vec<Statement>,
    fail_on: Option<String>,
    calls: usize,
}

impl MemoryState {
    fn table_mut(&mut self, table: &TableRef) -> Result<&mut MemoryTable, DatabaseError> {
        self.tables
            .get_mut(&(table.schema.clone(), table.name.clone()))
            .ok_or_else(|| missing(format!("relation \"{}.{}\" does not exist", table.schema, table.name)))
    }

    fn check_failure(&self, text: &str) -> Result<(), DatabaseError> {
        match &self.fail_on {
            Some(pattern) if text.contains(pattern.as_str()) => Err(DatabaseError::Query {
                statement: text.to_string(),
                message: format!("injected failure on '{}'", pattern),
            }),
            _ => Ok(()),
        }
    }
}

fn missing(message: String) -> DatabaseError {
    DatabaseError::Query {
        statement: String::new(),
        message,
    }
}

/// In-memory [`SchemaDao`]
///
/// # Example
///
/// ```rust
/// use tap_config::database::{MemoryDao, SchemaDao};
///
/// let dao = MemoryDao::new();
/// assert_eq!(dao.default_schema(), "public");
/// assert!(dao.statements().is_empty());
/// ```
#[derive(Debug)]
pub struct MemoryDao {
    default_schema: String,
    metadata_schema: String,
    state: Mutex<MemoryState>,
}

impl Default for MemoryDao {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDao {
    pub fn new() -> Self {
        Self::with_schemas(DEFAULT_SCHEMA, DEFAULT_METADATA_SCHEMA)
    }

    pub fn with_schemas(default_schema: impl Into<String>, metadata_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            metadata_schema: metadata_schema.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Statements executed so far, in order
    pub fn statements(&self) -> Vec<Statement> {
        self.state().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.state().statements.clear();
    }

    /// Fail every statement or metadata write whose text contains `pattern`
    pub fn fail_when(&self, pattern: impl Into<String>) {
        self.state().fail_on = Some(pattern.into());
    }

    pub fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    /// Number of DAO calls made so far
    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    /// Snapshot of the persisted TAP metadata
    pub fn catalog(&self) -> TapCatalog {
        self.state().catalog.clone()
    }

    /// Install a table directly, bypassing statement execution
    pub fn seed_table(&self, description: TableDescription) {
        let key = (description.table.schema.clone(), description.table.name.clone());
        self.state().tables.insert(
            key,
            MemoryTable {
                columns: description.columns,
                constraints: description.constraints,
                indexes: description.indexes,
                comment: description.comment,
            },
        );
    }

    /// Execute a rendered statement, applying `mutate` to the state on success
    fn run(
        &self,
        statement: &Statement,
        mutate: impl FnOnce(&mut MemoryState) -> Result<(), DatabaseError>,
    ) -> ConfigurationResult<()> {
        let mut state = self.state();
        state.calls += 1;
        let result = state.check_failure(&statement.sql).and_then(|_| mutate(&mut *state));
        match result {
            Ok(()) => {
                info!(table = %statement.table, "{}", statement.sql);
                state.statements.push(statement.clone());
                Ok(())
            }
            Err(DatabaseError::Query { message, .. }) => Err(execution_error(
                statement,
                DatabaseError::Query {
                    statement: statement.sql.clone(),
                    message,
                },
            )),
            Err(other) => Err(execution_error(statement, other)),
        }
    }

    fn metadata_write(&self, description: String, mutate: impl FnOnce(&mut TapCatalog)) -> Result<(), DatabaseError> {
        let mut state = self.state();
        state.calls += 1;
        state.check_failure(&description)?;
        debug!("{}", description);
        mutate(&mut state.catalog);
        Ok(())
    }
}

#[async_trait]
impl SchemaDao for MemoryDao {
    async fn check_version(&self) -> Result<String, DatabaseError> {
        self.state().calls += 1;
        Ok(format!("memory {}", env!("CARGO_PKG_VERSION")))
    }

    fn default_schema(&self) -> &str {
        &self.default_schema
    }

    fn metadata_schema(&self) -> &str {
        &self.metadata_schema
    }

    async fn describe_table(&self, table: &TableRef) -> Result<Option<TableDescription>, DatabaseError> {
        let mut state = self.state();
        state.calls += 1;
        Ok(state
            .tables
            .get(&(table.schema.clone(), table.name.clone()))
            .map(|t| {
                let mut columns = t.columns.clone();
                columns.sort_by_key(|c| c.position);
                TableDescription {
                    table: table.clone(),
                    columns,
                    constraints: t.constraints.clone(),
                    indexes: t.indexes.clone(),
                    comment: t.comment.clone(),
                }
            }))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DatabaseError> {
        let mut state = self.state();
        state.calls += 1;
        Ok(state
            .tables
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, name)| name.clone())
            .collect())
    }

    /// Raw statements are logged but not interpreted
    async fn execute(&self, statement: &Statement) -> Result<(), DatabaseError> {
        let mut state = self.state();
        state.calls += 1;
        state.check_failure(&statement.sql)?;
        info!(table = %statement.table, "{}", statement.sql);
        state.statements.push(statement.clone());
        Ok(())
    }

    async fn create_table(&self, table: &TableConfig) -> ConfigurationResult<()> {
        let target = table.table_ref();
        let mut columns = Vec::new();
        for (index, column) in table.columns_in_order().into_iter().enumerate() {
            columns.push(ColumnDescription {
                name: column.db_name().to_string(),
                native_type: ddl::declared_type(column)?,
                nullable: column.nullable()?,
                position: index as u32 + 1,
                comment: column.description().map(str::to_string),
            });
        }
        let comments = usize::from(table.description().is_some())
            + table
                .columns()
                .values()
                .filter(|c| c.description().is_some())
                .count();

        let mut statements = ddl::create_table(table)?.into_iter();
        if let Some(create) = statements.next() {
            let key = (target.schema.clone(), target.name.clone());
            let created = MemoryTable {
                columns,
                constraints: BTreeMap::new(),
                indexes: BTreeMap::new(),
                comment: table.description().map(str::to_string),
            };
            self.run(&create, move |state| {
                if state.tables.contains_key(&key) {
                    return Err(missing(format!("relation \"{}.{}\" already exists", key.0, key.1)));
                }
                state.tables.insert(key, created);
                Ok(())
            })?;
        }
        for statement in statements.by_ref().take(comments) {
            self.run(&statement, |_| Ok(()))?;
        }
        for (statement, (name, fragment)) in statements.zip(table.constraints()) {
            self.run(&statement, |state| {
                let memory = state.table_mut(&target)?;
                memory.check_references(fragment)?;
                memory.constraints.insert(name.clone(), fragment.trim().to_string());
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn add_column(&self, table: &TableRef, column: &ColumnConfig) -> ConfigurationResult<()> {
        let statement = ddl::add_column(table, column)?;
        let native = ddl::declared_type(column)?;
        let nullable = column.nullable()?;
        let name = column.db_name().to_string();
        let comment = column.description().map(str::to_string);
        self.run(&statement, |state| {
            let memory = state.table_mut(table)?;
            if memory.has_column(&name) {
                return Err(missing(format!("column \"{}\" already exists", name)));
            }
            let position = memory.next_position();
            memory.columns.push(ColumnDescription {
                name: name.clone(),
                native_type: native,
                nullable,
                position,
                comment: None,
            });
            Ok(())
        })?;
        if let Some(description) = comment {
            let statement = ddl::comment_on_column(table, &name, Some(&description));
            self.run(&statement, |state| {
                state.table_mut(table)?.column_mut(&name)?.comment = Some(description.clone());
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn alter_column_type(&self, table: &TableRef, column: &str, to: &str) -> ConfigurationResult<()> {
        let statement = ddl::alter_column_type(table, column, to);
        self.run(&statement, |state| {
            state.table_mut(table)?.column_mut(column)?.native_type = to.to_string();
            Ok(())
        })
    }

    async fn alter_nullability(&self, table: &TableRef, column: &str, nullable: bool) -> ConfigurationResult<()> {
        let statement = ddl::alter_nullability(table, column, nullable);
        self.run(&statement, |state| {
            state.table_mut(table)?.column_mut(column)?.nullable = nullable;
            Ok(())
        })
    }

    async fn drop_column(&self, table: &TableRef, column: &str) -> ConfigurationResult<()> {
        let statement = ddl::drop_column(table, column);
        self.run(&statement, |state| {
            let memory = state.table_mut(table)?;
            if !memory.has_column(column) {
                return Err(missing(format!("column \"{}\" does not exist", column)));
            }
            memory.columns.retain(|c| !c.name.eq_ignore_ascii_case(column));
            let depends = |fragment: &str| {
                referenced_columns(fragment)
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(column))
            };
            memory.constraints.retain(|_, fragment| !depends(fragment.as_str()));
            memory.indexes.retain(|_, fragment| !depends(fragment.as_str()));
            Ok(())
        })
    }

    async fn add_constraint(&self, table: &TableRef, name: &str, fragment: &str) -> ConfigurationResult<()> {
        let statement = ddl::add_constraint(table, name, fragment);
        self.run(&statement, |state| {
            let memory = state.table_mut(table)?;
            if memory.constraints.contains_key(name) {
                return Err(missing(format!("constraint \"{}\" already exists", name)));
            }
            memory.check_references(fragment)?;
            memory
                .constraints
                .insert(name.to_string(), fragment.trim().to_string());
            Ok(())
        })
    }

    async fn drop_constraint(&self, table: &TableRef, name: &str) -> ConfigurationResult<()> {
        let statement = ddl::drop_constraint(table, name);
        self.run(&statement, |state| {
            state.table_mut(table)?.constraints.remove(name);
            Ok(())
        })
    }

    async fn create_index(&self, table: &TableRef, name: &str, fragment: &str) -> ConfigurationResult<()> {
        let statement = ddl::create_index(table, name, fragment);
        self.run(&statement, |state| {
            let memory = state.table_mut(table)?;
            if memory.indexes.contains_key(name) {
                return Err(missing(format!("relation \"{}\" already exists", name)));
            }
            memory.check_references(fragment)?;
            memory.indexes.insert(name.to_string(), fragment.trim().to_string());
            Ok(())
        })
    }

    async fn drop_index(&self, table: &TableRef, name: &str) -> ConfigurationResult<()> {
        let statement = ddl::drop_index(table, name);
        self.run(&statement, |state| {
            if let Ok(memory) = state.table_mut(table) {
                memory.indexes.remove(name);
            }
            Ok(())
        })
    }

    async fn drop_table(&self, table: &TableRef) -> ConfigurationResult<()> {
        let statement = ddl::drop_table(table);
        self.run(&statement, |state| {
            state
                .tables
                .remove(&(table.schema.clone(), table.name.clone()));
            Ok(())
        })
    }

    async fn init_metadata_catalog(&self) -> Result<(), DatabaseError> {
        let schema = self.metadata_schema.clone();
        self.metadata_write(format!("CREATE CATALOG {}", schema), |_| {})
    }

    async fn read_metadata(&self) -> Result<TapCatalog, DatabaseError> {
        let mut state = self.state();
        state.calls += 1;
        Ok(state.catalog.clone())
    }

    async fn upsert_metadata(&self, row: &MetadataRow) -> Result<(), DatabaseError> {
        let description = match row {
            MetadataRow::Schema(r) => format!("UPSERT {}.schemas {}", self.metadata_schema, r.schema_name),
            MetadataRow::Table(r) => format!("UPSERT {}.tables {}", self.metadata_schema, r.table_name),
            MetadataRow::Column(r) => format!(
                "UPSERT {}.columns {}.{}",
                self.metadata_schema, r.table_name, r.column_name
            ),
            MetadataRow::Key(r) => format!("UPSERT {}.keys {}", self.metadata_schema, r.key_id),
        };
        self.metadata_write(description, |catalog| catalog.apply(row.clone()))
    }

    async fn delete_metadata(&self, key: &MetadataKey) -> Result<(), DatabaseError> {
        let description = match key {
            MetadataKey::Schema(schema) => format!("DELETE {}.schemas {}", self.metadata_schema, schema),
            MetadataKey::Table(table) => format!("DELETE {}.tables {}", self.metadata_schema, table),
            MetadataKey::Column { table, column } => {
                format!("DELETE {}.columns {}.{}", self.metadata_schema, table, column)
            }
            MetadataKey::Key(key_id) => format!("DELETE {}.keys {}", self.metadata_schema, key_id),
        };
        self.metadata_write(description, |catalog| catalog.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs_table() -> TableConfig {
        let mut table = TableConfig::new("public.obs");
        let mut id = ColumnConfig::new("obs_id");
        id.set_datatype("BIGINT");
        id.set_nullable(false);
        id.set_order(Some(1));
        let mut ra = ColumnConfig::new("ra");
        ra.set_datatype("DOUBLE");
        ra.set_order(Some(2));
        table.add_column(id);
        table.add_column(ra);
        table
            .constraints_mut()
            .insert("obs_pkey".to_string(), "PRIMARY KEY (obs_id)".to_string());
        table
    }

    #[tokio::test]
    async fn test_create_and_describe() {
        let dao = MemoryDao::new();
        let table = obs_table();
        dao.create_table(&table).await.unwrap();

        let description = dao.describe_table(&table.table_ref()).await.unwrap().unwrap();
        assert_eq!(description.columns.len(), 2);
        assert_eq!(description.columns[0].name, "obs_id");
        assert!(!description.columns[0].nullable);
        assert_eq!(description.columns[1].native_type, "double precision");
        assert_eq!(description.constraints["obs_pkey"], "PRIMARY KEY (obs_id)");
        assert_eq!(dao.statements().len(), 2);
        assert_eq!(dao.list_tables("public").await.unwrap(), vec!["obs"]);
    }

    #[tokio::test]
    async fn test_drop_column_cascades() {
        let dao = MemoryDao::new();
        let table = obs_table();
        let target = table.table_ref();
        dao.create_table(&table).await.unwrap();
        dao.create_index(&target, "obs_ra_idx", "(ra)").await.unwrap();

        dao.drop_column(&target, "ra").await.unwrap();
        let description = dao.describe_table(&target).await.unwrap().unwrap();
        assert!(description.column("ra").is_none());
        assert!(description.indexes.is_empty());
        assert!(description.constraints.contains_key("obs_pkey"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let dao = MemoryDao::new();
        dao.fail_when("CREATE TABLE");
        let err = dao.create_table(&obs_table()).await.unwrap_err();
        match err {
            crate::error::ConfigurationError::SqlExecution { table, statement, .. } => {
                assert_eq!(table, "public.obs");
                assert!(statement.starts_with("CREATE TABLE"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(dao.statements().is_empty());
        assert!(dao.describe_table(&obs_table().table_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_constraint_on_unknown_column_fails() {
        let dao = MemoryDao::new();
        let table = obs_table();
        dao.create_table(&table).await.unwrap();
        let result = dao
            .add_constraint(&table.table_ref(), "obs_uq", "UNIQUE (dec)")
            .await;
        assert!(result.is_err());
    }
}
