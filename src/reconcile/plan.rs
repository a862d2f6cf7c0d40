//! Reconciliation plans
//!
//! A [`Plan`] lists, per table, the operations that turn the actual
//! database into the desired configuration. Each operation knows the
//! [`Change`] level it needs; [`Plan::check`] gates the whole plan against
//! the level an operator granted before anything runs.

use serde::Serialize;

use crate::database::TableRef;
use crate::database::types::{SqlType, TypeChange};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::models::{ColumnConfig, Change, Configuration, TableConfig};

/// Actual state of a desired table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableState {
    /// The table does not exist
    Absent,
    /// The table exists and needs no change
    Matching,
    /// The table exists and needs changes
    Differing,
}

/// One reconciliation step on a single table
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Add the schema row the table's metadata row refers to
    RegisterSchema { schema: String },
    /// Create the table with comments, constraints and metadata rows
    CreateTable,
    CreateIndex {
        name: String,
        fragment: String,
        /// The index belongs to a table created in the same run
        new_table: bool,
    },
    UpdateTableMetadata,
    AddColumn { column: ColumnConfig },
    UpdateColumnMetadata {
        column: ColumnConfig,
        fields: Vec<&'static str>,
    },
    AlterColumnType {
        column: ColumnConfig,
        from: SqlType,
        to: SqlType,
        change: TypeChange,
    },
    AlterNullability { column: String, nullable: bool },
    DropColumn { column: String },
    AddConstraint { name: String, fragment: String },
    DropConstraint { name: String },
    DropIndex { name: String },
    DropTable,
}

impl Operation {
    /// Change level needed to execute the operation
    pub fn required(&self) -> Change {
        match self {
            Operation::RegisterSchema { .. }
            | Operation::CreateTable
            | Operation::UpdateTableMetadata
            | Operation::AddColumn { .. }
            | Operation::UpdateColumnMetadata { .. }
            | Operation::AddConstraint { .. } => Change::Update,
            Operation::CreateIndex { new_table: true, .. } => Change::Update,
            Operation::CreateIndex { new_table: false, .. } => Change::Reindex,
            Operation::AlterColumnType { change, .. } => match change {
                TypeChange::Widening | TypeChange::Unchanged => Change::Update,
                TypeChange::Narrowing | TypeChange::Incompatible => Change::Drop,
            },
            Operation::AlterNullability { nullable: true, .. } => Change::Update,
            Operation::AlterNullability { nullable: false, .. } => Change::Drop,
            Operation::DropColumn { .. }
            | Operation::DropConstraint { .. }
            | Operation::DropIndex { .. }
            | Operation::DropTable => Change::Drop,
        }
    }

    /// Whether the operation removes data or structure
    pub fn is_destructive(&self) -> bool {
        self.required() == Change::Drop
    }

    /// Short human-readable description, e.g. `ADD COLUMN ra`
    pub fn describe(&self) -> String {
        match self {
            Operation::RegisterSchema { schema } => format!("REGISTER SCHEMA {}", schema),
            Operation::CreateTable => "CREATE TABLE".to_string(),
            Operation::CreateIndex { name, .. } => format!("CREATE INDEX {}", name),
            Operation::UpdateTableMetadata => "UPDATE TABLE METADATA".to_string(),
            Operation::AddColumn { column } => format!("ADD COLUMN {}", column.db_name()),
            Operation::UpdateColumnMetadata { column, fields } => format!(
                "UPDATE COLUMN METADATA {} ({})",
                column.db_name(),
                fields.join(", ")
            ),
            Operation::AlterColumnType { column, from, to, .. } => {
                format!("ALTER COLUMN {} TYPE {} -> {}", column.db_name(), from, to)
            }
            Operation::AlterNullability { column, nullable } => format!(
                "ALTER COLUMN {} {}",
                column,
                if *nullable { "DROP NOT NULL" } else { "SET NOT NULL" }
            ),
            Operation::DropColumn { column } => format!("DROP COLUMN {}", column),
            Operation::AddConstraint { name, .. } => format!("ADD CONSTRAINT {}", name),
            Operation::DropConstraint { name } => format!("DROP CONSTRAINT {}", name),
            Operation::DropIndex { name } => format!("DROP INDEX {}", name),
            Operation::DropTable => "DROP TABLE".to_string(),
        }
    }
}

/// Operations for one table, in execution order
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub table: TableRef,
    pub state: TableState,
    /// Desired definition; for a dropped table, what the catalog knew of it
    pub desired: TableConfig,
    pub operations: Vec<Operation>,
    /// Destructive operations held back for a later run
    pub deferred: Vec<Operation>,
}

impl TablePlan {
    pub fn new(table: TableRef, state: TableState, desired: TableConfig, operations: Vec<Operation>) -> Self {
        let (operations, deferred) = defer_destructive(operations);
        Self {
            table,
            state,
            desired,
            operations,
            deferred,
        }
    }

    /// Highest level any operation of this table needs
    pub fn required(&self) -> Change {
        self.operations
            .iter()
            .map(Operation::required)
            .max()
            .unwrap_or(Change::None)
    }
}

/// Split `operations` so that at most one destructive operation runs
///
/// The first destructive operation in execution order is kept; later ones
/// are returned separately and planned again by the next run.
pub fn defer_destructive(operations: Vec<Operation>) -> (Vec<Operation>, Vec<Operation>) {
    let mut kept: Vec<Operation> = Vec::with_capacity(operations.len());
    let mut deferred = Vec::new();
    for operation in operations {
        if operation.is_destructive() && kept.iter().any(Operation::is_destructive) {
            deferred.push(operation);
        } else {
            kept.push(operation);
        }
    }
    (kept, deferred)
}

/// One planned operation in flat, serializable form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub table: String,
    pub operation: String,
    pub required: Change,
}

/// Every operation needed to reconcile a configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub tables: Vec<TablePlan>,
}

impl Plan {
    /// Whether the database already matches
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.operations.is_empty())
    }

    /// Highest level any operation needs
    pub fn required(&self) -> Change {
        self.tables
            .iter()
            .map(TablePlan::required)
            .max()
            .unwrap_or(Change::None)
    }

    pub fn table(&self, full_name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.table.full_name == full_name)
    }

    /// Flatten into entries in execution order
    pub fn entries(&self) -> Vec<PlanEntry> {
        self.tables
            .iter()
            .flat_map(|t| flatten(t, &t.operations))
            .collect()
    }

    /// Destructive operations left for a later run
    pub fn deferred(&self) -> Vec<PlanEntry> {
        self.tables
            .iter()
            .flat_map(|t| flatten(t, &t.deferred))
            .collect()
    }

    /// Reject the plan if any operation needs more than `ceiling`
    ///
    /// The error names the first disallowed operation in execution order.
    pub fn check(&self, ceiling: Change) -> ConfigurationResult<()> {
        for table in &self.tables {
            for operation in &table.operations {
                let required = operation.required();
                if !ceiling.allows(required) {
                    return Err(ConfigurationError::ChangeNotAllowed {
                        table: table.table.full_name.clone(),
                        operation: operation.describe(),
                        required,
                        allowed: ceiling,
                    });
                }
            }
        }
        Ok(())
    }
}

fn flatten<'a>(table: &'a TablePlan, operations: &'a [Operation]) -> impl Iterator<Item = PlanEntry> + 'a {
    operations.iter().map(move |op| PlanEntry {
        table: table.table.full_name.clone(),
        operation: op.describe(),
        required: op.required(),
    })
}

/// Difference between desired and persisted TAP metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataDrift {
    pub table: String,
    /// `None` for table-level drift
    pub column: Option<String>,
    /// Fields that differ; `missing` when no row is persisted
    pub fields: Vec<String>,
}

/// Compare a desired configuration with persisted metadata rendered through
/// [`TapCatalog::to_configuration`](crate::database::TapCatalog::to_configuration)
///
/// Columns are compared with the same rule the planner uses.
pub fn metadata_drift(desired: &Configuration, persisted: &Configuration) -> Vec<MetadataDrift> {
    let mut drift = Vec::new();
    for (full_name, table) in desired.tables() {
        let Some(stored) = persisted.get_table_config(full_name) else {
            drift.push(MetadataDrift {
                table: full_name.clone(),
                column: None,
                fields: vec!["missing".to_string()],
            });
            continue;
        };
        if table.description() != stored.description() || table.utype() != stored.utype() {
            let mut fields = Vec::new();
            if table.description() != stored.description() {
                fields.push("description".to_string());
            }
            if table.utype() != stored.utype() {
                fields.push("utype".to_string());
            }
            drift.push(MetadataDrift {
                table: full_name.clone(),
                column: None,
                fields,
            });
        }
        for column in table.columns_in_order() {
            let fields = match stored.column_by_db_name(column.db_name()) {
                None => vec!["missing".to_string()],
                Some(row) => column
                    .metadata_differences(row)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            };
            if !fields.is_empty() {
                drift.push(MetadataDrift {
                    table: full_name.clone(),
                    column: Some(column.name().to_string()),
                    fields,
                });
            }
        }
    }
    drift
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(operations: Vec<Operation>) -> Plan {
        Plan {
            tables: vec![TablePlan::new(
                TableRef::new("public.obs", "public", "obs"),
                TableState::Differing,
                TableConfig::new("public.obs"),
                operations,
            )],
        }
    }

    #[test]
    fn test_operation_levels() {
        assert_eq!(Operation::CreateTable.required(), Change::Update);
        assert_eq!(
            Operation::CreateIndex { name: "i".into(), fragment: "(a)".into(), new_table: true }.required(),
            Change::Update
        );
        assert_eq!(
            Operation::CreateIndex { name: "i".into(), fragment: "(a)".into(), new_table: false }.required(),
            Change::Reindex
        );
        assert_eq!(Operation::DropColumn { column: "a".into() }.required(), Change::Drop);
        assert_eq!(
            Operation::AlterNullability { column: "a".into(), nullable: true }.required(),
            Change::Update
        );
        assert_eq!(
            Operation::AlterNullability { column: "a".into(), nullable: false }.required(),
            Change::Drop
        );
    }

    #[test]
    fn test_check_names_first_disallowed_operation() {
        let plan = plan_with(vec![
            Operation::UpdateTableMetadata,
            Operation::DropIndex { name: "obs_ra_idx".into() },
            Operation::AddColumn { column: ColumnConfig::new("mag") },
        ]);
        assert_eq!(plan.required(), Change::Drop);
        assert!(plan.check(Change::Drop).is_ok());

        match plan.check(Change::Update).unwrap_err() {
            ConfigurationError::ChangeNotAllowed { table, operation, required, allowed } => {
                assert_eq!(table, "public.obs");
                assert_eq!(operation, "DROP INDEX obs_ra_idx");
                assert_eq!(required, Change::Drop);
                assert_eq!(allowed, Change::Update);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_one_destructive_operation_per_table() {
        let plan = plan_with(vec![
            Operation::DropColumn { column: "b".into() },
            Operation::AddColumn { column: ColumnConfig::new("mag") },
            Operation::DropColumn { column: "c".into() },
            Operation::DropIndex { name: "obs_b_idx".into() },
        ]);
        let operations: Vec<String> = plan.entries().into_iter().map(|e| e.operation).collect();
        assert_eq!(operations, vec!["DROP COLUMN b", "ADD COLUMN mag"]);
        let deferred: Vec<String> = plan.deferred().into_iter().map(|e| e.operation).collect();
        assert_eq!(deferred, vec!["DROP COLUMN c", "DROP INDEX obs_b_idx"]);
        assert!(plan.tables[0].deferred.iter().all(Operation::is_destructive));
    }

    #[test]
    fn test_empty_plan_passes_at_none() {
        let plan = plan_with(Vec::new());
        assert!(plan.is_empty());
        assert!(plan.check(Change::None).is_ok());
        assert_eq!(plan.required(), Change::None);
    }

    #[test]
    fn test_entries_are_flat_and_ordered() {
        let plan = plan_with(vec![
            Operation::CreateTable,
            Operation::CreateIndex { name: "obs_ra_idx".into(), fragment: "(ra)".into(), new_table: true },
        ]);
        let entries = plan.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "CREATE TABLE");
        assert_eq!(entries[1].required, Change::Update);
        let json = serde_json::to_value(&entries).unwrap();
        assert_eq!(json[1]["required"], "update");
    }

    #[test]
    fn test_metadata_drift() {
        let mut desired = Configuration::new();
        let mut table = TableConfig::new("public.obs");
        let mut ra = ColumnConfig::new("ra");
        ra.set_unit(Some("deg"));
        table.add_column(ra);
        desired.add_table(table);

        let persisted = Configuration::new();
        let drift = metadata_drift(&desired, &persisted);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].fields, vec!["missing"]);

        let mut persisted = desired.clone();
        persisted
            .table_mut("public.obs")
            .unwrap()
            .column_mut("ra")
            .unwrap()
            .set_unit(Some("rad"));
        let drift = metadata_drift(&desired, &persisted);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].column.as_deref(), Some("ra"));
        assert_eq!(drift[0].fields, vec!["unit"]);

        assert!(metadata_drift(&desired, &desired).is_empty());
    }
}
