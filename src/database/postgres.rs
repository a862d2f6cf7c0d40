//! PostgreSQL schema DAO
//!
//! Introspection reads `pg_catalog` so that native types keep their
//! modifiers (`format_type`) and constraint and index definitions come back
//! in canonical form (`pg_get_constraintdef`, `pg_get_indexdef`). TAP
//! metadata lives in a configurable schema (default `tap_schema`).
//!
//! Every statement runs on its own and autocommits.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use super::ddl::{self, Statement, index_fragment, qualified_name};
use super::tap_schema::{
    ColumnRow, KeyColumnRow, KeyRow, MetadataKey, MetadataRow, SchemaRow, TableRow, TapCatalog, catalog_ddl,
    unqualified,
};
use super::{ColumnDescription, DatabaseError, SchemaDao, TableDescription, TableRef, execution_error};
use crate::error::ConfigurationResult;
use crate::models::{ColumnConfig, TableConfig};
use crate::settings::DatabaseSettings;

type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Row returned by [`PostgresDao::query_for_list`]; every value is text
pub type TextRow = BTreeMap<String, Option<String>>;

const TABLE_EXISTS: &str = "SELECT c.oid::text
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p', 'v', 'm')";

const TABLE_COMMENT: &str = "SELECT obj_description(c.oid, 'pg_class')
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relname = $2";

const TABLE_COLUMNS: &str = "SELECT a.attname::text AS name,
       format_type(a.atttypid, a.atttypmod) AS native_type,
       (NOT a.attnotnull)::text AS nullable,
       a.attnum::text AS position,
       col_description(c.oid, a.attnum) AS comment
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY a.attnum";

const TABLE_CONSTRAINTS: &str = "SELECT con.conname::text AS name,
       pg_get_constraintdef(con.oid) AS definition
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relname = $2 AND con.contype IN ('p', 'u', 'f', 'c')
ORDER BY con.conname";

const TABLE_INDEXES: &str = "SELECT i.relname::text AS name,
       pg_get_indexdef(ix.indexrelid) AS definition
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_class c ON c.oid = ix.indrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relname = $2
  AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_constraint con WHERE con.conindid = ix.indexrelid)
ORDER BY i.relname";

const LIST_TABLES: &str = "SELECT table_name::text AS name
FROM information_schema.tables
WHERE table_schema = $1
ORDER BY table_name";

fn query_error(sql: &str, e: tokio_postgres::Error) -> DatabaseError {
    let message = match e.as_db_error() {
        Some(db) => db.message().to_string(),
        None => e.to_string(),
    };
    DatabaseError::Query {
        statement: sql.to_string(),
        message,
    }
}

fn text<'a>(row: &'a TextRow, column: &str) -> Option<&'a str> {
    row.get(column).and_then(|v| v.as_deref())
}

fn required(row: &TextRow, column: &str) -> Result<String, DatabaseError> {
    text(row, column)
        .map(str::to_string)
        .ok_or_else(|| DatabaseError::MalformedMetadata(format!("missing value for '{}'", column)))
}

fn parsed<T: FromStr>(row: &TextRow, column: &str) -> Result<Option<T>, DatabaseError> {
    match text(row, column) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            DatabaseError::MalformedMetadata(format!("invalid value '{}' for '{}'", raw, column))
        }),
    }
}

fn flag(row: &TextRow, column: &str) -> Result<bool, DatabaseError> {
    Ok(parsed::<i32>(row, column)?.unwrap_or(0) != 0)
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

/// PostgreSQL [`SchemaDao`]
pub struct PostgresDao {
    client: Client,
    default_schema: String,
    metadata_schema: String,
}

impl PostgresDao {
    /// Connect using the given settings
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DatabaseError> {
        let url = settings
            .url()
            .ok_or_else(|| DatabaseError::Connection("no datasource url configured".to_string()))?;
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        info!(
            "Connected to PostgreSQL (schema {}, metadata schema {})",
            settings.default_schema, settings.metadata_schema
        );
        Ok(Self {
            client,
            default_schema: settings.default_schema.clone(),
            metadata_schema: settings.metadata_schema.clone(),
        })
    }

    /// Run a query and return every row with its values as text
    pub async fn query_for_list(&self, sql: &str, params: Params<'_>) -> Result<Vec<TextRow>, DatabaseError> {
        let rows = self
            .client
            .query(sql, params)
            .await
            .map_err(|e| query_error(sql, e))?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = TextRow::new();
            for (index, column) in row.columns().iter().enumerate() {
                let value: Option<String> = row.try_get(index).map_err(|e| query_error(sql, e))?;
                values.insert(column.name().to_string(), value);
            }
            result.push(values);
        }
        Ok(result)
    }

    /// Run a query expected to return at most one row
    pub async fn query_for_map(&self, sql: &str, params: Params<'_>) -> Result<Option<TextRow>, DatabaseError> {
        Ok(self.query_for_list(sql, params).await?.into_iter().next())
    }

    /// Run a query and return the first column of the first row
    pub async fn query_for_object(&self, sql: &str, params: Params<'_>) -> Result<Option<String>, DatabaseError> {
        let row = self
            .client
            .query_opt(sql, params)
            .await
            .map_err(|e| query_error(sql, e))?;
        match row {
            None => Ok(None),
            Some(row) => row.try_get::<_, Option<String>>(0).map_err(|e| query_error(sql, e)),
        }
    }

    async fn modify(&self, sql: &str, params: Params<'_>) -> Result<u64, DatabaseError> {
        debug!("{}", sql);
        self.client
            .execute(sql, params)
            .await
            .map_err(|e| query_error(sql, e))
    }

    async fn run(&self, statement: Statement) -> ConfigurationResult<()> {
        self.execute(&statement)
            .await
            .map_err(|source| execution_error(&statement, source))
    }

    fn catalog_table(&self, name: &str) -> String {
        qualified_name(&self.metadata_schema, name)
    }
}

#[async_trait]
impl SchemaDao for PostgresDao {
    async fn check_version(&self) -> Result<String, DatabaseError> {
        self.query_for_object("SELECT version()", &[])
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?
            .ok_or_else(|| DatabaseError::Connection("server did not report a version".to_string()))
    }

    fn default_schema(&self) -> &str {
        &self.default_schema
    }

    fn metadata_schema(&self) -> &str {
        &self.metadata_schema
    }

    async fn describe_table(&self, table: &TableRef) -> Result<Option<TableDescription>, DatabaseError> {
        let params: Params<'_> = &[&table.schema, &table.name];
        if self.query_for_object(TABLE_EXISTS, params).await?.is_none() {
            return Ok(None);
        }

        let mut columns = Vec::new();
        for row in self.query_for_list(TABLE_COLUMNS, params).await? {
            columns.push(ColumnDescription {
                name: required(&row, "name")?,
                native_type: required(&row, "native_type")?,
                nullable: text(&row, "nullable") == Some("true"),
                position: parsed(&row, "position")?.unwrap_or(0),
                comment: owned(text(&row, "comment")),
            });
        }

        let mut constraints = BTreeMap::new();
        for row in self.query_for_list(TABLE_CONSTRAINTS, params).await? {
            constraints.insert(required(&row, "name")?, required(&row, "definition")?);
        }

        let mut indexes = BTreeMap::new();
        for row in self.query_for_list(TABLE_INDEXES, params).await? {
            indexes.insert(
                required(&row, "name")?,
                index_fragment(&required(&row, "definition")?),
            );
        }

        let comment = self.query_for_object(TABLE_COMMENT, params).await?;
        Ok(Some(TableDescription {
            table: table.clone(),
            columns,
            constraints,
            indexes,
            comment,
        }))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DatabaseError> {
        self.query_for_list(LIST_TABLES, &[&schema])
            .await?
            .iter()
            .map(|row| required(row, "name"))
            .collect()
    }

    async fn execute(&self, statement: &Statement) -> Result<(), DatabaseError> {
        info!(table = %statement.table, "{}", statement.sql);
        self.client
            .batch_execute(&statement.sql)
            .await
            .map_err(|e| query_error(&statement.sql, e))
    }

    async fn create_table(&self, table: &TableConfig) -> ConfigurationResult<()> {
        for statement in ddl::create_table(table)? {
            self.run(statement).await?;
        }
        Ok(())
    }

    async fn add_column(&self, table: &TableRef, column: &ColumnConfig) -> ConfigurationResult<()> {
        self.run(ddl::add_column(table, column)?).await?;
        if let Some(description) = column.description() {
            self.run(ddl::comment_on_column(table, column.db_name(), Some(description)))
                .await?;
        }
        Ok(())
    }

    async fn alter_column_type(&self, table: &TableRef, column: &str, to: &str) -> ConfigurationResult<()> {
        self.run(ddl::alter_column_type(table, column, to)).await
    }

    async fn alter_nullability(&self, table: &TableRef, column: &str, nullable: bool) -> ConfigurationResult<()> {
        self.run(ddl::alter_nullability(table, column, nullable)).await
    }

    async fn drop_column(&self, table: &TableRef, column: &str) -> ConfigurationResult<()> {
        self.run(ddl::drop_column(table, column)).await
    }

    async fn add_constraint(&self, table: &TableRef, name: &str, fragment: &str) -> ConfigurationResult<()> {
        self.run(ddl::add_constraint(table, name, fragment)).await
    }

    async fn drop_constraint(&self, table: &TableRef, name: &str) -> ConfigurationResult<()> {
        self.run(ddl::drop_constraint(table, name)).await
    }

    async fn create_index(&self, table: &TableRef, name: &str, fragment: &str) -> ConfigurationResult<()> {
        self.run(ddl::create_index(table, name, fragment)).await
    }

    async fn drop_index(&self, table: &TableRef, name: &str) -> ConfigurationResult<()> {
        self.run(ddl::drop_index(table, name)).await
    }

    async fn drop_table(&self, table: &TableRef) -> ConfigurationResult<()> {
        self.run(ddl::drop_table(table)).await
    }

    async fn init_metadata_catalog(&self) -> Result<(), DatabaseError> {
        let ddl = catalog_ddl(&self.metadata_schema);
        info!("Initializing TAP metadata catalog in schema {}", self.metadata_schema);
        self.client
            .batch_execute(&ddl)
            .await
            .map_err(|e| query_error(&ddl, e))
    }

    async fn read_metadata(&self) -> Result<TapCatalog, DatabaseError> {
        let mut catalog = TapCatalog::new();

        let sql = format!(
            "SELECT schema_name::text, description::text, utype::text FROM {}",
            self.catalog_table("schemas")
        );
        for row in self.query_for_list(&sql, &[]).await? {
            catalog.apply(MetadataRow::Schema(SchemaRow {
                schema_name: required(&row, "schema_name")?,
                description: owned(text(&row, "description")),
                utype: owned(text(&row, "utype")),
            }));
        }

        let sql = format!(
            "SELECT schema_name::text, table_name::text, db_table_name::text, table_type::text, \
             description::text, utype::text FROM {}",
            self.catalog_table("tables")
        );
        for row in self.query_for_list(&sql, &[]).await? {
            let table_name = required(&row, "table_name")?;
            // rows written by other tools carry no physical name
            let db_name = text(&row, "db_table_name")
                .unwrap_or_else(|| unqualified(&table_name))
                .to_string();
            catalog.apply(MetadataRow::Table(TableRow {
                schema_name: required(&row, "schema_name")?,
                table_name,
                db_name,
                table_type: text(&row, "table_type").unwrap_or("table").to_string(),
                description: owned(text(&row, "description")),
                utype: owned(text(&row, "utype")),
            }));
        }

        let sql = format!(
            "SELECT table_name::text, column_name::text, datatype::text, \"size\"::text AS size, \
             description::text, unit::text, ucd::text, utype::text, principal::text, \
             indexed::text, std::text, column_index::text, scs_verbosity::text FROM {}",
            self.catalog_table("columns")
        );
        for row in self.query_for_list(&sql, &[]).await? {
            catalog.apply(MetadataRow::Column(ColumnRow {
                table_name: required(&row, "table_name")?,
                column_name: required(&row, "column_name")?,
                datatype: required(&row, "datatype")?,
                size: parsed(&row, "size")?,
                description: owned(text(&row, "description")),
                unit: owned(text(&row, "unit")),
                ucd: owned(text(&row, "ucd")),
                utype: owned(text(&row, "utype")),
                principal: flag(&row, "principal")?,
                indexed: flag(&row, "indexed")?,
                std: flag(&row, "std")?,
                column_index: parsed(&row, "column_index")?,
                scs_verbosity: parsed(&row, "scs_verbosity")?,
            }));
        }

        let sql = format!(
            "SELECT key_id::text, from_column::text, target_column::text FROM {} ORDER BY key_id, from_column",
            self.catalog_table("key_columns")
        );
        let mut key_columns: BTreeMap<String, Vec<KeyColumnRow>> = BTreeMap::new();
        for row in self.query_for_list(&sql, &[]).await? {
            key_columns
                .entry(required(&row, "key_id")?)
                .or_default()
                .push(KeyColumnRow {
                    from_column: required(&row, "from_column")?,
                    target_column: required(&row, "target_column")?,
                });
        }

        let sql = format!(
            "SELECT key_id::text, from_table::text, target_table::text, description::text, utype::text FROM {}",
            self.catalog_table("keys")
        );
        for row in self.query_for_list(&sql, &[]).await? {
            let key_id = required(&row, "key_id")?;
            let columns = key_columns.remove(&key_id).unwrap_or_default();
            catalog.apply(MetadataRow::Key(KeyRow {
                key_id,
                from_table: required(&row, "from_table")?,
                target_table: required(&row, "target_table")?,
                description: owned(text(&row, "description")),
                utype: owned(text(&row, "utype")),
                columns,
            }));
        }

        if let Some(orphan) = key_columns.keys().next() {
            return Err(DatabaseError::MalformedMetadata(format!(
                "key_columns reference unknown key {}",
                orphan
            )));
        }
        Ok(catalog)
    }

    async fn upsert_metadata(&self, row: &MetadataRow) -> Result<(), DatabaseError> {
        match row {
            MetadataRow::Schema(r) => {
                let sql = format!(
                    "INSERT INTO {} (schema_name, description, utype) VALUES ($1, $2, $3)
                     ON CONFLICT (schema_name) DO UPDATE SET description = EXCLUDED.description, utype = EXCLUDED.utype",
                    self.catalog_table("schemas")
                );
                self.modify(&sql, &[&r.schema_name, &r.description, &r.utype]).await?;
            }
            MetadataRow::Table(r) => {
                let sql = format!(
                    "INSERT INTO {} (schema_name, table_name, db_table_name, table_type, description, utype)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (table_name) DO UPDATE SET schema_name = EXCLUDED.schema_name,
                     db_table_name = EXCLUDED.db_table_name, table_type = EXCLUDED.table_type,
                     description = EXCLUDED.description, utype = EXCLUDED.utype",
                    self.catalog_table("tables")
                );
                self.modify(
                    &sql,
                    &[&r.schema_name, &r.table_name, &r.db_name, &r.table_type, &r.description, &r.utype],
                )
                .await?;
            }
            MetadataRow::Column(r) => {
                let sql = format!(
                    "INSERT INTO {} (table_name, column_name, datatype, \"size\", description, unit, ucd, utype,
                     principal, indexed, std, column_index, scs_verbosity)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                     ON CONFLICT (table_name, column_name) DO UPDATE SET datatype = EXCLUDED.datatype,
                     \"size\" = EXCLUDED.\"size\", description = EXCLUDED.description, unit = EXCLUDED.unit,
                     ucd = EXCLUDED.ucd, utype = EXCLUDED.utype, principal = EXCLUDED.principal,
                     indexed = EXCLUDED.indexed, std = EXCLUDED.std, column_index = EXCLUDED.column_index,
                     scs_verbosity = EXCLUDED.scs_verbosity",
                    self.catalog_table("columns")
                );
                let size = r.size.map(|s| s as i32);
                let principal = i32::from(r.principal);
                let indexed = i32::from(r.indexed);
                let std = i32::from(r.std);
                let column_index = r.column_index.map(|i| i as i32);
                let verbosity = r.scs_verbosity.map(i32::from);
                self.modify(
                    &sql,
                    &[
                        &r.table_name,
                        &r.column_name,
                        &r.datatype,
                        &size,
                        &r.description,
                        &r.unit,
                        &r.ucd,
                        &r.utype,
                        &principal,
                        &indexed,
                        &std,
                        &column_index,
                        &verbosity,
                    ],
                )
                .await?;
            }
            MetadataRow::Key(r) => {
                let sql = format!(
                    "INSERT INTO {} (key_id, from_table, target_table, description, utype) VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (key_id) DO UPDATE SET from_table = EXCLUDED.from_table,
                     target_table = EXCLUDED.target_table, description = EXCLUDED.description, utype = EXCLUDED.utype",
                    self.catalog_table("keys")
                );
                self.modify(
                    &sql,
                    &[&r.key_id, &r.from_table, &r.target_table, &r.description, &r.utype],
                )
                .await?;

                let key_columns = self.catalog_table("key_columns");
                let sql = format!("DELETE FROM {} WHERE key_id = $1", key_columns);
                self.modify(&sql, &[&r.key_id]).await?;
                let sql = format!(
                    "INSERT INTO {} (key_id, from_column, target_column) VALUES ($1, $2, $3)",
                    key_columns
                );
                for column in &r.columns {
                    self.modify(&sql, &[&r.key_id, &column.from_column, &column.target_column])
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn delete_metadata(&self, key: &MetadataKey) -> Result<(), DatabaseError> {
        match key {
            MetadataKey::Schema(schema) => {
                let sql = format!("DELETE FROM {} WHERE schema_name = $1", self.catalog_table("schemas"));
                self.modify(&sql, &[schema]).await?;
            }
            MetadataKey::Table(table) => {
                let sql = format!("DELETE FROM {} WHERE table_name = $1", self.catalog_table("tables"));
                self.modify(&sql, &[table]).await?;
            }
            MetadataKey::Column { table, column } => {
                let sql = format!(
                    "DELETE FROM {} WHERE table_name = $1 AND column_name = $2",
                    self.catalog_table("columns")
                );
                self.modify(&sql, &[table, column]).await?;
            }
            MetadataKey::Key(key_id) => {
                let sql = format!("DELETE FROM {} WHERE key_id = $1", self.catalog_table("keys"));
                self.modify(&sql, &[key_id]).await?;
            }
        }
        Ok(())
    }
}
