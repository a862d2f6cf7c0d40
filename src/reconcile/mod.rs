//! Reconciliation engine
//!
//! Keeps a live database in line with a declarative [`Configuration`] in two
//! explicit phases:
//!
//! 1. [`Reconciler::plan`] introspects the database and the TAP metadata
//!    catalog and lists the operations needed, without changing anything.
//! 2. [`Reconciler::apply`] gates the whole plan against the granted
//!    [`Change`] level, executes it table by table and re-exports the
//!    database as the new configuration.
//!
//! Within a table, operations run table-level first, then columns (in
//! declared order, columns only present in the database afterwards), then
//! constraints, then indexes. At most one destructive operation runs per
//! table and run; the others are deferred and planned again next time.

pub mod plan;

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{DocumentCodec, YamlCodec};
use crate::database::ddl::{declared_type, normalize_fragment, parse_foreign_key};
use crate::database::tap_schema::{
    ColumnRow, KeyRow, MetadataKey, MetadataRow, SchemaRow, TableRow, TapCatalog, key_id,
};
use crate::database::types::{TypeChange, classify_type_change, is_sized, split_native, type_of};
use crate::database::{DatabaseError, SchemaDao, TableDescription, TableRef};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::models::column::{METADATA_FIELDS, keys as column_keys};
use crate::models::table::keys as table_keys;
use crate::models::{Action, Change, ColumnConfig, Configuration, TableConfig};

pub use plan::{MetadataDrift, Operation, Plan, PlanEntry, TablePlan, TableState, metadata_drift};

/// Result of a reconciliation run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Configuration to make current: the re-exported database state after
    /// an apply, the desired configuration otherwise
    pub configuration: Configuration,
    /// `configuration` serialized as a document
    pub document: String,
    /// Executed plan; `None` when the database was not contacted
    pub plan: Option<Plan>,
}

/// Serialize `desired` without touching any database
///
/// This is what [`Action::Current`] does; it works without a datasource.
pub fn current(desired: &Configuration, codec: &dyn DocumentCodec) -> ConfigurationResult<RunOutcome> {
    let document = codec.serialize(desired)?;
    Ok(RunOutcome {
        configuration: desired.clone(),
        document,
        plan: None,
    })
}

fn metadata_error(table: &str, what: String, source: DatabaseError) -> ConfigurationError {
    ConfigurationError::SqlExecution {
        table: table.to_string(),
        statement: what,
        source,
    }
}

/// Plans and applies configuration changes against one database
///
/// `apply` calls are serialized; planning alone never mutates the database.
pub struct Reconciler {
    dao: Arc<dyn SchemaDao>,
    codec: Arc<dyn DocumentCodec>,
    create_metadata_catalog: bool,
    apply_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(dao: Arc<dyn SchemaDao>) -> Self {
        Self {
            dao,
            codec: Arc::new(YamlCodec),
            create_metadata_catalog: false,
            apply_lock: Mutex::new(()),
        }
    }

    /// Use a different document codec for serialized output
    pub fn with_codec(mut self, codec: Arc<dyn DocumentCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Create the metadata catalog before each apply
    pub fn with_catalog_creation(mut self, enabled: bool) -> Self {
        self.create_metadata_catalog = enabled;
        self
    }

    pub fn dao(&self) -> &Arc<dyn SchemaDao> {
        &self.dao
    }

    /// Compute the operations reconciling the database with `desired`
    pub async fn plan(&self, desired: &Configuration) -> ConfigurationResult<Plan> {
        let desired = desired.normalized()?;
        self.plan_normalized(&desired).await
    }

    async fn plan_normalized(&self, desired: &Configuration) -> ConfigurationResult<Plan> {
        let catalog = self.dao.read_metadata().await?;
        let mut registered: BTreeSet<String> = catalog.schemas.keys().cloned().collect();
        let mut plan = Plan::default();

        for table in desired.tables().values() {
            table.validate()?;
            let target = table.table_ref();
            let actual = self.dao.describe_table(&target).await?;

            let mut operations = Vec::new();
            let schema = table.db_schema().to_string();
            if !registered.contains(&schema) {
                operations.push(Operation::RegisterSchema {
                    schema: schema.clone(),
                });
                registered.insert(schema);
            }

            let state = match actual {
                None => {
                    debug!(table = %table.full_name(), "table absent, planning CREATE TABLE");
                    operations.push(Operation::CreateTable);
                    for (name, fragment) in table.indexes() {
                        operations.push(Operation::CreateIndex {
                            name: name.clone(),
                            fragment: fragment.clone(),
                            new_table: true,
                        });
                    }
                    TableState::Absent
                }
                Some(actual) => {
                    let before = operations.len();
                    plan_table(table, &actual, &catalog, &mut operations)?;
                    if operations.len() == before {
                        TableState::Matching
                    } else {
                        TableState::Differing
                    }
                }
            };

            let table_plan = TablePlan::new(target, state, table.clone(), operations);
            for operation in &table_plan.deferred {
                info!(
                    table = %table.full_name(),
                    "{} deferred, only one destructive operation runs per table",
                    operation.describe()
                );
            }
            plan.tables.push(table_plan);
        }

        for row in catalog.tables.values() {
            if desired.get_table_config(&row.table_name).is_some()
                || row.schema_name == self.dao.metadata_schema()
            {
                continue;
            }
            debug!(table = %row.table_name, "table no longer configured, planning DROP TABLE");
            let mut dropped = TableConfig::new(&row.table_name);
            let options = dropped.options_mut();
            options.put(table_keys::DB_SCHEMA, &row.schema_name);
            options.put(table_keys::DB_NAME, &row.db_name);
            plan.tables.push(TablePlan::new(
                row.table_ref(),
                TableState::Differing,
                dropped,
                vec![Operation::DropTable],
            ));
        }

        Ok(plan)
    }

    /// Reconcile the database with `desired` within the `ceiling` level
    ///
    /// The whole plan is checked before the first statement runs. A failing
    /// statement abandons the rest of its table's operations; the other
    /// tables are still reconciled and the failure is returned afterwards.
    /// Statements already executed stay committed. On success the database
    /// is re-exported and returned.
    pub async fn apply(&self, desired: &Configuration, ceiling: Change) -> ConfigurationResult<RunOutcome> {
        let _guard = self.apply_lock.lock().await;
        let desired = desired.normalized()?;

        if self.create_metadata_catalog {
            self.dao.init_metadata_catalog().await?;
        }

        let plan = self.plan_normalized(&desired).await?;
        plan.check(ceiling)?;

        info!(
            "Applying {} operations on {} tables (level {})",
            plan.entries().len(),
            plan.tables.iter().filter(|t| !t.operations.is_empty()).count(),
            ceiling
        );
        let mut failures = Vec::new();
        for table in &plan.tables {
            if let Err(e) = self.execute(table).await {
                warn!(
                    table = %table.table.full_name,
                    "Abandoned the remaining operations of the table: {}", e
                );
                failures.push(e);
            }
        }
        if failures.len() == 1 {
            return Err(failures.remove(0));
        }
        if !failures.is_empty() {
            return Err(ConfigurationError::PartialApply { failures });
        }

        let mut exported = self.export(&desired).await?;
        exported.set_change(ceiling);
        exported.set_action(Action::Apply);
        let document = self.codec.serialize(&exported)?;
        Ok(RunOutcome {
            configuration: exported,
            document,
            plan: Some(plan),
        })
    }

    async fn execute(&self, plan: &TablePlan) -> ConfigurationResult<()> {
        let table = &plan.desired;
        let target = &plan.table;
        let full_name = target.full_name.as_str();

        for operation in &plan.operations {
            debug!(table = %full_name, "{}", operation.describe());
            match operation {
                Operation::RegisterSchema { schema } => {
                    self.upsert(full_name, MetadataRow::Schema(SchemaRow::new(schema)))
                        .await?;
                }
                Operation::CreateTable => {
                    self.dao.create_table(table).await?;
                    self.upsert(full_name, MetadataRow::Table(TableRow::from_config(table)))
                        .await?;
                    for column in table.columns_in_order() {
                        self.upsert(full_name, MetadataRow::Column(ColumnRow::from_config(table, column)?))
                            .await?;
                    }
                    for (name, fragment) in table.constraints() {
                        if let Some(fk) = parse_foreign_key(fragment) {
                            self.upsert(full_name, MetadataRow::Key(KeyRow::from_foreign_key(table, name, &fk)))
                                .await?;
                        }
                    }
                }
                Operation::CreateIndex { name, fragment, .. } => {
                    self.dao.create_index(target, name, fragment).await?;
                }
                Operation::UpdateTableMetadata => {
                    self.upsert(full_name, MetadataRow::Table(TableRow::from_config(table)))
                        .await?;
                }
                Operation::AddColumn { column } => {
                    self.dao.add_column(target, column).await?;
                    self.upsert(full_name, MetadataRow::Column(ColumnRow::from_config(table, column)?))
                        .await?;
                }
                Operation::UpdateColumnMetadata { column, .. } => {
                    let column = self.with_actual_type(target, column).await?;
                    self.upsert(full_name, MetadataRow::Column(ColumnRow::from_config(table, &column)?))
                        .await?;
                }
                Operation::AlterColumnType { column, .. } => {
                    self.dao
                        .alter_column_type(target, column.db_name(), &declared_type(column)?)
                        .await?;
                    self.upsert(full_name, MetadataRow::Column(ColumnRow::from_config(table, column)?))
                        .await?;
                }
                Operation::AlterNullability { column, nullable } => {
                    self.dao.alter_nullability(target, column, *nullable).await?;
                }
                Operation::DropColumn { column } => {
                    self.dao.drop_column(target, column).await?;
                    self.delete(
                        full_name,
                        MetadataKey::Column {
                            table: full_name.to_string(),
                            column: column.clone(),
                        },
                    )
                    .await?;
                }
                Operation::AddConstraint { name, fragment } => {
                    self.dao.add_constraint(target, name, fragment).await?;
                    if let Some(fk) = parse_foreign_key(fragment) {
                        self.upsert(full_name, MetadataRow::Key(KeyRow::from_foreign_key(table, name, &fk)))
                            .await?;
                    }
                }
                Operation::DropConstraint { name } => {
                    self.dao.drop_constraint(target, name).await?;
                    self.delete(full_name, MetadataKey::Key(key_id(full_name, name)))
                        .await?;
                }
                Operation::DropIndex { name } => {
                    self.dao.drop_index(target, name).await?;
                }
                Operation::DropTable => {
                    self.dao.drop_table(target).await?;
                    self.delete(full_name, MetadataKey::Table(full_name.to_string()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Column declared without a type, completed with its actual type
    async fn with_actual_type(&self, target: &TableRef, column: &ColumnConfig) -> ConfigurationResult<ColumnConfig> {
        let mut column = column.clone();
        if column.datatype().is_some() {
            return Ok(column);
        }
        let actual = self
            .dao
            .describe_table(target)
            .await?
            .and_then(|d| d.column(column.db_name()).map(|c| c.sql_type()));
        if let Some(actual) = actual {
            column.set_datatype(&actual.name);
            column.set_size(actual.size);
        }
        Ok(column)
    }

    async fn upsert(&self, table: &str, row: MetadataRow) -> ConfigurationResult<()> {
        self.dao
            .upsert_metadata(&row)
            .await
            .map_err(|source| metadata_error(table, format!("upsert metadata for {}", row.table()), source))
    }

    async fn delete(&self, table: &str, key: MetadataKey) -> ConfigurationResult<()> {
        self.dao
            .delete_metadata(&key)
            .await
            .map_err(|source| metadata_error(table, format!("delete metadata {:?}", key), source))
    }

    /// Rebuild the configuration from the database
    ///
    /// Global options and endpoints are taken from `desired`. Every desired
    /// table that exists is rebuilt from its description merged with the
    /// persisted TAP metadata; tables that do not exist are left out.
    pub async fn export(&self, desired: &Configuration) -> ConfigurationResult<Configuration> {
        let catalog = self.dao.read_metadata().await?;
        let mut exported = Configuration::new();
        *exported.options_mut() = desired.options().clone();
        for end_point in desired.end_points().values() {
            exported.add_end_point(end_point.clone());
        }
        exported.set_change(desired.change());
        exported.set_action(desired.action());

        for table in desired.tables().values() {
            let Some(actual) = self.dao.describe_table(&table.table_ref()).await? else {
                debug!(table = %table.full_name(), "not exported, table does not exist");
                continue;
            };
            exported.add_table(export_table(table, &actual, &catalog));
        }
        Ok(exported)
    }

    /// Differences between `desired` and the persisted TAP metadata
    pub async fn verify(&self, desired: &Configuration) -> ConfigurationResult<Vec<MetadataDrift>> {
        let desired = desired.normalized()?;
        let persisted = self.dao.read_metadata().await?.to_configuration()?;
        Ok(metadata_drift(&desired, &persisted))
    }

    /// Run one reconciliation cycle
    ///
    /// [`Action::Current`] serializes `desired` without contacting the
    /// database; [`Action::Apply`] applies it within `change`.
    pub async fn run(&self, desired: &Configuration, change: Change, action: Action) -> ConfigurationResult<RunOutcome> {
        match action {
            Action::Current => current(desired, self.codec.as_ref()),
            Action::Apply => self.apply(desired, change).await,
        }
    }
}

/// Plan the changes for a table that exists
fn plan_table(
    table: &TableConfig,
    actual: &TableDescription,
    catalog: &TapCatalog,
    operations: &mut Vec<Operation>,
) -> ConfigurationResult<()> {
    let full_name = table.full_name();

    if catalog.table(full_name) != Some(&TableRow::from_config(table)) {
        operations.push(Operation::UpdateTableMetadata);
    }

    for column in table.columns_in_order() {
        let Some(existing) = actual.column(column.db_name()) else {
            debug!(table = %full_name, column = %column.db_name(), "column absent");
            operations.push(Operation::AddColumn {
                column: column.clone(),
            });
            continue;
        };

        if let Some(desired_type) = column.sql_type()? {
            let actual_type = existing.sql_type();
            match classify_type_change(&actual_type, &desired_type) {
                TypeChange::Unchanged => {}
                TypeChange::Incompatible => {
                    return Err(ConfigurationError::IncompatibleTypeChange {
                        table: full_name.to_string(),
                        column: column.name().to_string(),
                        from: actual_type.to_string(),
                        to: desired_type.to_string(),
                    });
                }
                change => operations.push(Operation::AlterColumnType {
                    column: column.clone(),
                    from: actual_type,
                    to: desired_type,
                    change,
                }),
            }
        }

        if column.options().contains_key(column_keys::NULLABLE) {
            let nullable = column.nullable()?;
            if nullable != existing.nullable {
                operations.push(Operation::AlterNullability {
                    column: existing.name.clone(),
                    nullable,
                });
            }
        }

        let fields = match catalog.column(full_name, column.db_name()) {
            None => vec!["missing"],
            Some(row) => column.metadata_differences(&row.to_column(column.name())),
        };
        if !fields.is_empty() {
            operations.push(Operation::UpdateColumnMetadata {
                column: column.clone(),
                fields,
            });
        }
    }

    for existing in &actual.columns {
        if table.column_by_db_name(&existing.name).is_none() {
            debug!(table = %full_name, column = %existing.name, "column no longer configured");
            operations.push(Operation::DropColumn {
                column: existing.name.clone(),
            });
        }
    }

    for (name, fragment) in &actual.constraints {
        match table.constraints().get(name) {
            None => operations.push(Operation::DropConstraint { name: name.clone() }),
            Some(desired) if normalize_fragment(desired) != normalize_fragment(fragment) => {
                warn!(
                    table = %full_name,
                    "constraint {} differs from the database ('{}' vs '{}'), leaving it unchanged",
                    name, desired, fragment
                );
            }
            Some(_) => {}
        }
    }
    for (name, fragment) in table.constraints() {
        if !actual.constraints.contains_key(name) {
            operations.push(Operation::AddConstraint {
                name: name.clone(),
                fragment: fragment.clone(),
            });
        }
    }

    for (name, fragment) in &actual.indexes {
        match table.indexes().get(name) {
            None => operations.push(Operation::DropIndex { name: name.clone() }),
            Some(desired) if normalize_fragment(desired) != normalize_fragment(fragment) => {
                warn!(
                    table = %full_name,
                    "index {} differs from the database ('{}' vs '{}'), leaving it unchanged",
                    name, desired, fragment
                );
            }
            Some(_) => {}
        }
    }
    for (name, fragment) in table.indexes() {
        if !actual.indexes.contains_key(name) {
            operations.push(Operation::CreateIndex {
                name: name.clone(),
                fragment: fragment.clone(),
                new_table: false,
            });
        }
    }
    Ok(())
}

/// Rebuild one table from its description and the persisted metadata
fn export_table(desired: &TableConfig, actual: &TableDescription, catalog: &TapCatalog) -> TableConfig {
    let full_name = desired.full_name();
    let mut table = TableConfig::new(full_name);
    *table.options_mut() = desired.options().clone();
    if let Some(row) = catalog.table(full_name) {
        table.set_description(row.description.as_deref());
        table.set_utype(row.utype.as_deref());
    }

    for existing in &actual.columns {
        let declared = desired.column_by_db_name(&existing.name);
        let name = declared.map(ColumnConfig::name).unwrap_or(&existing.name);
        let mut column = ColumnConfig::new(name);

        if let Some(declared) = declared {
            for (key, value) in declared.options().iter() {
                let carried = !METADATA_FIELDS.iter().any(|field| *field == key)
                    && key != column_keys::TYPE
                    && key != column_keys::SIZE
                    && key != column_keys::NULLABLE;
                if carried {
                    column.options_mut().put(key, value);
                }
            }
        }
        let protocol = type_of(&existing.native_type);
        let (_, length) = split_native(&existing.native_type);
        column.set_datatype(&protocol);
        if is_sized(&protocol) {
            column.set_size(length);
        }
        let explicit = declared.is_some_and(|c| c.options().contains_key(column_keys::NULLABLE));
        if explicit || !existing.nullable {
            column.set_nullable(existing.nullable);
        }

        let db_name = declared.map(ColumnConfig::db_name).unwrap_or(&existing.name);
        if let Some(row) = catalog.column(full_name, db_name) {
            let persisted = row.to_column(name);
            for field in METADATA_FIELDS {
                column
                    .options_mut()
                    .set_opt(field, persisted.options().get(field));
            }
        }
        table.add_column(column);
    }

    *table.constraints_mut() = actual.constraints.clone();
    *table.indexes_mut() = actual.indexes.clone();
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDao;

    fn obs_config() -> Configuration {
        let mut table = TableConfig::new("public.obs");
        table.set_description(Some("Observations"));
        let mut id = ColumnConfig::new("obs_id");
        id.set_datatype("BIGINT");
        id.set_nullable(false);
        let mut ra = ColumnConfig::new("ra");
        ra.set_datatype("DOUBLE");
        ra.set_unit(Some("deg"));
        let mut name = ColumnConfig::new("target_name");
        name.set_datatype("VARCHAR");
        name.set_size(Some(64));
        table.add_column(id);
        table.add_column(ra);
        table.add_column(name);
        table
            .constraints_mut()
            .insert("obs_pkey".to_string(), "PRIMARY KEY (obs_id)".to_string());
        table
            .indexes_mut()
            .insert("obs_ra_idx".to_string(), "(ra)".to_string());

        let mut config = Configuration::new();
        config.add_table(table);
        config
    }

    fn reconciler() -> (Arc<MemoryDao>, Reconciler) {
        let dao = Arc::new(MemoryDao::new());
        let reconciler = Reconciler::new(dao.clone());
        (dao, reconciler)
    }

    #[tokio::test]
    async fn test_plan_for_absent_table() {
        let (dao, reconciler) = reconciler();
        let plan = reconciler.plan(&obs_config()).await.unwrap();
        let table = plan.table("public.obs").unwrap();
        assert_eq!(table.state, TableState::Absent);
        assert_eq!(
            table.operations.iter().map(Operation::describe).collect::<Vec<_>>(),
            vec!["REGISTER SCHEMA public", "CREATE TABLE", "CREATE INDEX obs_ra_idx"]
        );
        assert_eq!(plan.required(), Change::Update);
        assert!(dao.statements().is_empty());
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (dao, reconciler) = reconciler();
        reconciler.apply(&obs_config(), Change::Update).await.unwrap();
        let executed = dao.statements().len();

        let plan = reconciler.plan(&obs_config()).await.unwrap();
        assert!(plan.is_empty(), "unexpected operations: {:?}", plan.entries());
        assert_eq!(plan.table("public.obs").unwrap().state, TableState::Matching);

        reconciler.apply(&obs_config(), Change::None).await.unwrap();
        assert_eq!(dao.statements().len(), executed);
    }

    #[tokio::test]
    async fn test_export_overlays_database_types() {
        let (_, reconciler) = reconciler();
        let outcome = reconciler.apply(&obs_config(), Change::Update).await.unwrap();
        let table = outcome.configuration.get_table_config("public.obs").unwrap();
        let name = table.column("target_name").unwrap();
        assert_eq!(name.datatype(), Some("VARCHAR"));
        assert_eq!(name.size().unwrap(), Some(64));
        assert!(!table.column("obs_id").unwrap().nullable().unwrap());
        assert_eq!(table.column("ra").unwrap().unit(), Some("deg"));
        assert_eq!(table.description(), Some("Observations"));
        assert_eq!(table.indexes()["obs_ra_idx"], "(ra)");
        assert_eq!(outcome.configuration.action(), Action::Apply);
        assert!(outcome.document.starts_with("!Configuration"));
    }

    #[tokio::test]
    async fn test_differing_index_definition_is_left_alone() {
        let (dao, reconciler) = reconciler();
        reconciler.apply(&obs_config(), Change::Update).await.unwrap();

        let mut changed = obs_config();
        changed
            .table_mut("public.obs")
            .unwrap()
            .indexes_mut()
            .insert("obs_ra_idx".to_string(), "(ra, obs_id)".to_string());
        let plan = reconciler.plan(&changed).await.unwrap();
        assert!(plan.is_empty());
        let description = dao
            .describe_table(&changed.get_table_config("public.obs").unwrap().table_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(description.indexes["obs_ra_idx"], "(ra)");
    }

    #[tokio::test]
    async fn test_untyped_column_takes_actual_type_in_metadata() {
        let (dao, reconciler) = reconciler();
        reconciler.apply(&obs_config(), Change::Update).await.unwrap();

        let mut untyped = obs_config();
        let ra = untyped
            .table_mut("public.obs")
            .unwrap()
            .column_mut("ra")
            .unwrap();
        ra.options_mut().remove(column_keys::TYPE);
        ra.set_unit(Some("rad"));

        let plan = reconciler.plan(&untyped).await.unwrap();
        assert_eq!(plan.entries().len(), 1);
        reconciler.apply(&untyped, Change::Update).await.unwrap();
        let row = dao.catalog().column("public.obs", "ra").cloned().unwrap();
        assert_eq!(row.datatype, "DOUBLE");
        assert_eq!(row.unit.as_deref(), Some("rad"));
    }

    #[tokio::test]
    async fn test_undeclared_table_is_dropped_at_drop_level() {
        let (dao, reconciler) = reconciler();
        reconciler.apply(&obs_config(), Change::Update).await.unwrap();

        let empty = Configuration::new();
        let plan = reconciler.plan(&empty).await.unwrap();
        assert_eq!(plan.entries()[0].operation, "DROP TABLE");
        assert!(reconciler.apply(&empty, Change::Reindex).await.is_err());

        reconciler.apply(&empty, Change::Drop).await.unwrap();
        assert!(dao.catalog().tables.is_empty());
        assert!(dao.list_tables("public").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_current_does_not_touch_database() {
        let (dao, reconciler) = reconciler();
        let outcome = reconciler
            .run(&obs_config(), Change::Drop, Action::Current)
            .await
            .unwrap();
        assert!(outcome.plan.is_none());
        assert_eq!(outcome.configuration, obs_config());
        assert_eq!(dao.call_count(), 0);
    }
}
