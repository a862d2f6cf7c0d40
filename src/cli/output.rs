//! Output formatting for CLI

use crate::reconcile::{MetadataDrift, Plan, TableState};

/// Format a plan for the terminal, one line per operation
pub fn format_plan(plan: &Plan) -> String {
    let mut output = String::new();
    for table in &plan.tables {
        let state = match table.state {
            TableState::Absent => "absent",
            TableState::Matching => "up to date",
            TableState::Differing => "differs",
        };
        output.push_str(&format!("{} ({})\n", table.table.full_name, state));
        for operation in &table.operations {
            output.push_str(&format!(
                "  [{:<7}] {}\n",
                operation.required().as_str(),
                operation.describe()
            ));
        }
        for operation in &table.deferred {
            output.push_str(&format!(
                "  [{:<7}] {} (deferred to a later run)\n",
                operation.required().as_str(),
                operation.describe()
            ));
        }
    }

    if plan.is_empty() {
        output.push_str("\nNothing to do.\n");
    } else {
        output.push_str(&format!(
            "\n{} operation(s), requires level '{}'\n",
            plan.entries().len(),
            plan.required()
        ));
    }
    output
}

/// Format a plan as a JSON array of entries
pub fn format_plan_json(plan: &Plan) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&plan.entries())
}

/// Format metadata drift, one line per table or column
pub fn format_drift(drift: &[MetadataDrift]) -> String {
    if drift.is_empty() {
        return "Metadata is in sync.\n".to_string();
    }
    let mut output = String::new();
    for entry in drift {
        let target = match &entry.column {
            Some(column) => format!("{}.{}", entry.table, column),
            None => entry.table.clone(),
        };
        output.push_str(&format!("  - {}: {}\n", target, entry.fields.join(", ")));
    }
    output
}
