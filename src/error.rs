//! Error types for configuration and reconciliation

use thiserror::Error;

use crate::codec::DocumentParseError;
use crate::database::DatabaseError;
use crate::models::Change;
use crate::options::TypeCoercionError;

/// Primary error type of the reconciliation engine
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A required option is absent
    #[error("missing required configuration key '{key}' in {context}")]
    MissingKey { context: String, key: String },

    /// A planned operation needs a higher change level than was granted
    #[error(
        "{table}: {operation} requires change level '{required}' but only '{allowed}' is allowed"
    )]
    ChangeNotAllowed {
        table: String,
        operation: String,
        required: Change,
        allowed: Change,
    },

    /// A column type change that cannot be expressed as `ALTER COLUMN TYPE`
    #[error(
        "{table}.{column}: type change is not supported ({from} -> {to}); drop and re-add the column explicitly"
    )]
    IncompatibleTypeChange {
        table: String,
        column: String,
        from: String,
        to: String,
    },

    /// A statement failed; the remaining plan for `table` was abandoned
    #[error("{table}: failed to execute '{statement}': {source}")]
    SqlExecution {
        table: String,
        statement: String,
        #[source]
        source: DatabaseError,
    },

    /// Several tables failed; every other table was reconciled
    #[error("{} tables failed to reconcile: {}", .failures.len(), failed_tables(.failures))]
    PartialApply { failures: Vec<ConfigurationError> },

    /// The database could not be reached for a required check
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// The configuration is internally inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Document(#[from] DocumentParseError),

    #[error(transparent)]
    TypeCoercion(#[from] TypeCoercionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ConfigurationError {
    /// Whether retrying with a higher change level could succeed
    pub fn is_change_level(&self) -> bool {
        matches!(self, ConfigurationError::ChangeNotAllowed { .. })
    }

    /// Table a failed statement belonged to
    pub fn table(&self) -> Option<&str> {
        match self {
            ConfigurationError::ChangeNotAllowed { table, .. }
            | ConfigurationError::IncompatibleTypeChange { table, .. }
            | ConfigurationError::SqlExecution { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            ConfigurationError::ChangeNotAllowed { required, .. } => {
                format!("{self}\n\nHint: re-run with '--level {required}' to authorise it.")
            }
            ConfigurationError::IncompatibleTypeChange { column, .. } => {
                format!(
                    "{self}\n\nHint: remove '{column}' from the document, apply with '--level drop', then add it back."
                )
            }
            ConfigurationError::PartialApply { failures } => {
                let details: Vec<String> = failures.iter().map(|e| format!("  - {e}")).collect();
                format!("{self}\n{}", details.join("\n"))
            }
            _ => self.to_string(),
        }
    }
}

fn failed_tables(failures: &[ConfigurationError]) -> String {
    failures
        .iter()
        .map(|e| e.table().unwrap_or("?"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias for configuration results
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(table: &str) -> ConfigurationError {
        ConfigurationError::SqlExecution {
            table: table.to_string(),
            statement: format!("CREATE TABLE {table}"),
            source: DatabaseError::Query {
                statement: format!("CREATE TABLE {table}"),
                message: "permission denied".to_string(),
            },
        }
    }

    #[test]
    fn test_partial_apply_names_every_table() {
        let err = ConfigurationError::PartialApply {
            failures: vec![failed("public.a"), failed("public.b")],
        };
        assert_eq!(err.to_string(), "2 tables failed to reconcile: public.a, public.b");
        assert!(err.table().is_none());

        let message = err.user_message();
        assert!(message.contains("  - public.a: failed to execute 'CREATE TABLE public.a'"));
        assert!(message.contains("  - public.b:"));
    }
}
