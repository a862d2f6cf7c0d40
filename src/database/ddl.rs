//! PostgreSQL DDL rendering for reconciliation operations
//!
//! # Security
//!
//! All identifiers (schema, table, column, constraint and index names) are
//! quoted and internal quote characters are escaped by doubling them.
//! Constraint and index definitions are operator-authored DDL fragments taken
//! verbatim from the declarative document.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::TableRef;
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::models::{ColumnConfig, TableConfig};

static FOREIGN_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*FOREIGN\s+KEY\s*\(([^)]*)\)\s*REFERENCES\s+([A-Za-z0-9_."]+)\s*\(([^)]*)\)"#)
        .unwrap()
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// A single SQL statement attributed to the table it targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Full (logical) name of the target table
    pub table: String,
    /// SQL text
    pub sql: String,
}

impl Statement {
    pub fn new(table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sql: sql.into(),
        }
    }
}

/// Quote and escape an identifier using PostgreSQL double quotes
///
/// ```rust
/// use tap_config::database::ddl::quote_identifier;
///
/// assert_eq!(quote_identifier("obs"), "\"obs\"");
/// assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote a string literal, escaping single quotes by doubling
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render `"schema"."name"`
pub fn qualified_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
}

fn table_name(table: &TableRef) -> String {
    qualified_name(&table.schema, &table.name)
}

/// Native DDL type of a column that must declare one
pub fn declared_type(column: &ColumnConfig) -> ConfigurationResult<String> {
    column.native_type()?.ok_or_else(|| ConfigurationError::MissingKey {
        context: format!("column {}.{}", column.table_name(), column.name()),
        key: crate::models::column::keys::TYPE.to_string(),
    })
}

/// Render a column definition for `CREATE TABLE` / `ADD COLUMN`
pub fn column_definition(column: &ColumnConfig) -> ConfigurationResult<String> {
    let mut definition = format!(
        "{} {}",
        quote_identifier(column.db_name()),
        declared_type(column)?
    );
    if !column.nullable()? {
        definition.push_str(" NOT NULL");
    }
    Ok(definition)
}

/// Render the statements creating a table: the table itself, table and
/// column comments, then its constraints
pub fn create_table(table: &TableConfig) -> ConfigurationResult<Vec<Statement>> {
    let target = table.table_ref();
    let mut definitions = Vec::new();
    for column in table.columns_in_order() {
        definitions.push(format!("  {}", column_definition(column)?));
    }
    if definitions.is_empty() {
        return Err(ConfigurationError::Invalid(format!(
            "table {} declares no columns",
            table.full_name()
        )));
    }

    let mut statements = vec![Statement::new(
        table.full_name(),
        format!(
            "CREATE TABLE {} (\n{}\n)",
            table_name(&target),
            definitions.join(",\n")
        ),
    )];

    if let Some(description) = table.description() {
        statements.push(comment_on_table(&target, description));
    }
    for column in table.columns_in_order() {
        if let Some(description) = column.description() {
            statements.push(comment_on_column(&target, column.db_name(), Some(description)));
        }
    }
    for (name, fragment) in table.constraints() {
        statements.push(add_constraint(&target, name, fragment));
    }
    Ok(statements)
}

pub fn comment_on_table(table: &TableRef, description: &str) -> Statement {
    Statement::new(
        &table.full_name,
        format!(
            "COMMENT ON TABLE {} IS {}",
            table_name(table),
            quote_literal(description)
        ),
    )
}

pub fn comment_on_column(table: &TableRef, column: &str, description: Option<&str>) -> Statement {
    Statement::new(
        &table.full_name,
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            table_name(table),
            quote_identifier(column),
            description.map(quote_literal).unwrap_or_else(|| "NULL".to_string())
        ),
    )
}

pub fn add_column(table: &TableRef, column: &ColumnConfig) -> ConfigurationResult<Statement> {
    Ok(Statement::new(
        &table.full_name,
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            table_name(table),
            column_definition(column)?
        ),
    ))
}

/// `to` is a native type as rendered by [`declared_type`]
pub fn alter_column_type(table: &TableRef, column: &str, to: &str) -> Statement {
    Statement::new(
        &table.full_name,
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            table_name(table),
            quote_identifier(column),
            to
        ),
    )
}

pub fn alter_nullability(table: &TableRef, column: &str, nullable: bool) -> Statement {
    let action = if nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
    Statement::new(
        &table.full_name,
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            table_name(table),
            quote_identifier(column),
            action
        ),
    )
}

pub fn drop_column(table: &TableRef, column: &str) -> Statement {
    Statement::new(
        &table.full_name,
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            table_name(table),
            quote_identifier(column)
        ),
    )
}

pub fn add_constraint(table: &TableRef, name: &str, fragment: &str) -> Statement {
    Statement::new(
        &table.full_name,
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            table_name(table),
            quote_identifier(name),
            fragment.trim()
        ),
    )
}

/// Constraints may already be gone when a column they reference was dropped
/// earlier in the same run, hence `IF EXISTS`
pub fn drop_constraint(table: &TableRef, name: &str) -> Statement {
    Statement::new(
        &table.full_name,
        format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            table_name(table),
            quote_identifier(name)
        ),
    )
}

/// Render `CREATE [UNIQUE] INDEX`; a fragment starting with `UNIQUE` makes a
/// unique index, the rest (`USING method (...)` or `(...)`) follows the table
pub fn create_index(table: &TableRef, name: &str, fragment: &str) -> Statement {
    let fragment = fragment.trim();
    let (unique, rest) = match fragment.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("unique") => (true, fragment[6..].trim()),
        _ => (false, fragment),
    };
    Statement::new(
        &table.full_name,
        format!(
            "CREATE {}INDEX {} ON {} {}",
            if unique { "UNIQUE " } else { "" },
            quote_identifier(name),
            table_name(table),
            rest
        ),
    )
}

pub fn drop_index(table: &TableRef, name: &str) -> Statement {
    Statement::new(
        &table.full_name,
        format!("DROP INDEX IF EXISTS {}", qualified_name(&table.schema, name)),
    )
}

pub fn drop_table(table: &TableRef) -> Statement {
    Statement::new(
        &table.full_name,
        format!("DROP TABLE IF EXISTS {}", table_name(table)),
    )
}

/// Extract the index fragment from a full `CREATE INDEX` definition as
/// reported by `pg_get_indexdef`
pub fn index_fragment(definition: &str) -> String {
    let unique = definition
        .trim_start()
        .to_ascii_uppercase()
        .starts_with("CREATE UNIQUE");
    let rest = match definition.find(" USING ") {
        Some(pos) => definition[pos + 1..].trim().to_string(),
        None => definition
            .find('(')
            .map(|pos| definition[pos..].trim().to_string())
            .unwrap_or_else(|| definition.trim().to_string()),
    };
    if unique {
        format!("UNIQUE {}", rest)
    } else {
        rest
    }
}

/// SQL words that never name a column when unquoted
const SQL_WORDS: &[&str] = &[
    "AND", "OR", "NOT", "NULL", "IS", "IN", "BETWEEN", "LIKE", "ILIKE", "TRUE", "FALSE", "CASE",
    "WHEN", "THEN", "ELSE", "END", "ASC", "DESC", "NULLS", "FIRST", "LAST", "COLLATE", "ANY",
    "ALL", "SOME", "SIMILAR", "TO", "ESCAPE", "DISTINCT", "ARRAY", "INTERVAL",
];

/// Column names referenced by a constraint or index fragment
///
/// Columns are read from the first parenthesised group, including those
/// passed to functions, and from a trailing `WHERE` predicate. Function
/// names, type casts, qualifiers, operator classes and SQL words are
/// skipped. A fragment the tokenizer rejects references nothing.
///
/// ```rust
/// use tap_config::database::ddl::referenced_columns;
///
/// assert_eq!(referenced_columns("PRIMARY KEY (obs_id, \"ra\")"), vec!["obs_id", "ra"]);
/// assert_eq!(referenced_columns("CHECK ((ra >= 0))"), vec!["ra"]);
/// ```
pub fn referenced_columns(fragment: &str) -> Vec<String> {
    let Ok(tokens) = Tokenizer::new(&PostgreSqlDialect {}, fragment).tokenize() else {
        return Vec::new();
    };
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();
    let Some(open) = tokens.iter().position(|t| *t == Token::LParen) else {
        return Vec::new();
    };

    let mut depth = 0usize;
    let mut close = tokens.len();
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    close = i;
                    break;
                }
            }
            _ => {}
        }
    }

    let mut columns = Vec::new();
    collect_columns(&tokens[open + 1..close], &mut columns);
    let predicate = tokens
        .iter()
        .skip(close)
        .position(|t| matches!(t, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("WHERE")));
    if let Some(offset) = predicate {
        collect_columns(&tokens[close + offset + 1..], &mut columns);
    }
    columns
}

fn collect_columns(tokens: &[Token], columns: &mut Vec<String>) {
    let mut in_cast = false;
    let mut after_collate = false;
    // an operator class follows a column or a closing parenthesis
    let mut after_operand = false;
    for (i, token) in tokens.iter().enumerate() {
        let Token::Word(word) = token else {
            in_cast = matches!(token, Token::DoubleColon);
            after_collate = false;
            after_operand = matches!(token, Token::RParen);
            continue;
        };
        let sql_word = word.quote_style.is_none()
            && SQL_WORDS.iter().any(|w| w.eq_ignore_ascii_case(&word.value));
        let qualifier_or_call = matches!(tokens.get(i + 1), Some(Token::LParen | Token::Period));
        let skip = in_cast || after_collate || after_operand || sql_word || qualifier_or_call;

        after_collate = sql_word && word.value.eq_ignore_ascii_case("COLLATE");
        after_operand = !sql_word && !qualifier_or_call;
        if !skip && !columns.contains(&word.value) {
            columns.push(word.value.clone());
        }
    }
}

/// Parsed `FOREIGN KEY (...) REFERENCES target (...)` fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyFragment {
    pub from_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
}

/// Parse a foreign key constraint fragment; other constraints yield `None`
pub fn parse_foreign_key(fragment: &str) -> Option<ForeignKeyFragment> {
    let caps = FOREIGN_KEY.captures(fragment)?;
    let split = |list: &str| -> Vec<String> {
        list.split(',')
            .map(|c| c.trim().trim_matches('"').to_string())
            .filter(|c| !c.is_empty())
            .collect()
    };
    Some(ForeignKeyFragment {
        from_columns: split(&caps[1]),
        target_table: caps[2].replace('"', ""),
        target_columns: split(&caps[3]),
    })
}

/// Normalize a fragment for comparison: case, quoting, whitespace and the
/// default `btree` access method are ignored
pub fn normalize_fragment(fragment: &str) -> String {
    let lowered = fragment.to_lowercase().replace('"', "");
    let collapsed = WHITESPACE.replace_all(lowered.trim(), " ");
    collapsed
        .replace("using btree ", "")
        .replace(" (", "(")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace(", ", ",")
}
