//! YAML document format
//!
//! ```yaml
//! !Configuration
//! options:
//!   datasource.url: postgres://localhost/tap
//! endPoints:
//!   tap:
//!     tables:
//!     - public.obs
//!     options:
//!       max.records: 2000
//!     examples:
//!       count: SELECT COUNT(*) FROM public.obs
//! tables:
//!   public.obs:
//!     options:
//!       description: Observations
//!     columns:
//!       obs_id: !Column
//!         type: BIGINT
//!         nullable: false
//!       ra: !Column
//!     constraints:
//!       obs_pkey: PRIMARY KEY (obs_id)
//!     indexDefs:
//!       obs_ra_idx: (ra)
//! ```
//!
//! Leaves are written as booleans or integers when the stored string is the
//! canonical form of one, as strings otherwise, and always read back as
//! strings. Null leaves are skipped. Any tag other than `!Configuration` on
//! the root and `!Column` on column nodes is rejected.

use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value};

use super::{DocumentCodec, DocumentParseError};
use crate::models::{ColumnConfig, Configuration, EndPoint, TableConfig};
use crate::options::Options;

const ROOT_TAG: &str = "Configuration";
const COLUMN_TAG: &str = "Column";

const OPTIONS: &str = "options";
const END_POINTS: &str = "endPoints";
const TABLES: &str = "tables";
const COLUMNS: &str = "columns";
const CONSTRAINTS: &str = "constraints";
const INDEX_DEFS: &str = "indexDefs";
const EXAMPLES: &str = "examples";

/// YAML implementation of [`DocumentCodec`]
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl DocumentCodec for YamlCodec {
    fn parse(&self, text: &str) -> Result<Configuration, DocumentParseError> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| {
            let location = e.location();
            DocumentParseError {
                message: e.to_string(),
                line: location.as_ref().map(|l| l.line()),
                column: location.as_ref().map(|l| l.column()),
                context: None,
            }
        })?;
        decode_root(value)
    }

    fn serialize(&self, configuration: &Configuration) -> Result<String, DocumentParseError> {
        serde_yaml::to_string(&encode_root(configuration))
            .map_err(|e| DocumentParseError::new(format!("failed to serialize document: {}", e)))
    }
}

fn tag_name(tag: &Tag) -> String {
    tag.to_string().trim_start_matches('!').to_string()
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged node",
    }
}

fn decode_root(value: Value) -> Result<Configuration, DocumentParseError> {
    let body = match value {
        Value::Tagged(tagged) if tag_name(&tagged.tag) == ROOT_TAG => tagged.value,
        Value::Tagged(tagged) => {
            return Err(DocumentParseError::new(format!(
                "expected root tag !{} but found {}",
                ROOT_TAG, tagged.tag
            )));
        }
        other => {
            return Err(DocumentParseError::new(format!(
                "missing root tag !{} (found untagged {})",
                ROOT_TAG,
                kind(&other)
            )));
        }
    };

    let mut configuration = Configuration::new();
    for (key, value) in mapping_entries(body, "")? {
        match key.as_str() {
            OPTIONS => *configuration.options_mut() = decode_options(value, OPTIONS)?,
            END_POINTS => {
                for (name, node) in mapping_entries(value, END_POINTS)? {
                    let path = child_path(END_POINTS, &name);
                    configuration.add_end_point(decode_end_point(name, node, &path)?);
                }
            }
            TABLES => {
                for (full_name, node) in mapping_entries(value, TABLES)? {
                    let path = child_path(TABLES, &full_name);
                    configuration.add_table(decode_table(full_name, node, &path)?);
                }
            }
            other => {
                return Err(DocumentParseError::new(format!("unknown section '{}'", other)));
            }
        }
    }
    Ok(configuration)
}

/// Entries of a plain mapping node; null counts as empty
fn mapping_entries(value: Value, path: &str) -> Result<Vec<(String, Value)>, DocumentParseError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Mapping(mapping) => mapping
            .into_iter()
            .map(|(key, value)| {
                let key = scalar_text(&key).ok_or_else(|| {
                    DocumentParseError::new(format!("mapping key must be a scalar, found {}", kind(&key)))
                        .at(path)
                })?;
                Ok((key, value))
            })
            .collect(),
        Value::Tagged(tagged) => Err(DocumentParseError::new(format!(
            "unexpected tag {} on a plain mapping",
            tagged.tag
        ))
        .at(path)),
        other => Err(DocumentParseError::new(format!("expected a mapping, found {}", kind(&other))).at(path)),
    }
}

/// Text of a scalar leaf, `None` for non-scalars
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_leaf(value: &Value, path: &str) -> Result<Option<String>, DocumentParseError> {
    match value {
        Value::Null => Ok(None),
        Value::Tagged(tagged) => Err(DocumentParseError::new(format!(
            "unexpected tag {} on a scalar value",
            tagged.tag
        ))
        .at(path)),
        other => scalar_text(other).map(Some).ok_or_else(|| {
            DocumentParseError::new(format!("expected a scalar value, found {}", kind(other))).at(path)
        }),
    }
}

fn decode_options(value: Value, path: &str) -> Result<Options, DocumentParseError> {
    let mut options = Options::new();
    for (key, leaf) in mapping_entries(value, path)? {
        if let Some(text) = decode_leaf(&leaf, &child_path(path, &key))? {
            options.put(key, text);
        }
    }
    Ok(options)
}

fn decode_fragments(
    value: Value,
    path: &str,
    target: &mut std::collections::BTreeMap<String, String>,
) -> Result<(), DocumentParseError> {
    for (name, leaf) in mapping_entries(value, path)? {
        let fragment_path = child_path(path, &name);
        let fragment = decode_leaf(&leaf, &fragment_path)?.ok_or_else(|| {
            DocumentParseError::new("definition must not be empty").at(fragment_path.clone())
        })?;
        target.insert(name, fragment);
    }
    Ok(())
}

fn decode_end_point(name: String, value: Value, path: &str) -> Result<EndPoint, DocumentParseError> {
    let mut end_point = EndPoint::new(name);
    for (key, node) in mapping_entries(value, path)? {
        let section = child_path(path, &key);
        match key.as_str() {
            TABLES => match node {
                Value::Null => {}
                Value::Sequence(items) => {
                    for item in &items {
                        if let Some(full_name) = decode_leaf(item, &section)? {
                            end_point.add_table(full_name);
                        }
                    }
                }
                other => {
                    return Err(DocumentParseError::new(format!(
                        "expected a sequence of table names, found {}",
                        kind(&other)
                    ))
                    .at(section));
                }
            },
            OPTIONS => *end_point.options_mut() = decode_options(node, &section)?,
            EXAMPLES => {
                for (example, leaf) in mapping_entries(node, &section)? {
                    if let Some(query) = decode_leaf(&leaf, &child_path(&section, &example))? {
                        end_point.add_example(example, query);
                    }
                }
            }
            other => {
                return Err(DocumentParseError::new(format!("unknown endpoint key '{}'", other)).at(path));
            }
        }
    }
    Ok(end_point)
}

fn decode_table(full_name: String, value: Value, path: &str) -> Result<TableConfig, DocumentParseError> {
    let mut table = TableConfig::new(full_name);
    for (key, node) in mapping_entries(value, path)? {
        let section = child_path(path, &key);
        match key.as_str() {
            OPTIONS => *table.options_mut() = decode_options(node, &section)?,
            COLUMNS => {
                for (name, column) in mapping_entries(node, &section)? {
                    let column_path = child_path(&section, &name);
                    table.add_column(decode_column(name, column, &column_path)?);
                }
            }
            CONSTRAINTS => decode_fragments(node, &section, table.constraints_mut())?,
            INDEX_DEFS => decode_fragments(node, &section, table.indexes_mut())?,
            other => {
                return Err(DocumentParseError::new(format!("unknown table key '{}'", other)).at(path));
            }
        }
    }
    Ok(table)
}

fn decode_column(name: String, value: Value, path: &str) -> Result<ColumnConfig, DocumentParseError> {
    match value {
        Value::Tagged(tagged) if tag_name(&tagged.tag) == COLUMN_TAG => {
            let body = match tagged.value {
                Value::String(s) if s.is_empty() => Value::Null,
                other => other,
            };
            Ok(ColumnConfig::with_options(name, decode_options(body, path)?))
        }
        Value::Tagged(tagged) => Err(DocumentParseError::new(format!(
            "expected !{} but found {}",
            COLUMN_TAG, tagged.tag
        ))
        .at(path)),
        other => Err(DocumentParseError::new(format!(
            "column node must be tagged !{} (found untagged {})",
            COLUMN_TAG,
            kind(&other)
        ))
        .at(path)),
    }
}

fn encode_leaf(text: &str) -> Value {
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match text.parse::<i64>() {
            Ok(n) if n.to_string() == text => Value::Number(n.into()),
            _ => Value::String(text.to_string()),
        },
    }
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn encode_options(options: &Options) -> Value {
    let mut mapping = Mapping::new();
    for (k, v) in options.iter() {
        mapping.insert(key(k), encode_leaf(v));
    }
    Value::Mapping(mapping)
}

fn encode_strings<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> Value {
    let mut mapping = Mapping::new();
    for (k, v) in entries {
        mapping.insert(key(k), Value::String(v.clone()));
    }
    Value::Mapping(mapping)
}

fn encode_end_point(end_point: &EndPoint) -> Value {
    let mut node = Mapping::new();
    node.insert(
        key(TABLES),
        Value::Sequence(end_point.tables().iter().map(|t| Value::String(t.clone())).collect()),
    );
    if !end_point.options().is_empty() {
        node.insert(key(OPTIONS), encode_options(end_point.options()));
    }
    if !end_point.examples().is_empty() {
        node.insert(key(EXAMPLES), encode_strings(end_point.examples().iter()));
    }
    Value::Mapping(node)
}

fn encode_table(table: &TableConfig) -> Value {
    let mut columns = Mapping::new();
    for (name, column) in table.columns() {
        columns.insert(
            key(name),
            Value::Tagged(Box::new(TaggedValue {
                tag: Tag::new(COLUMN_TAG),
                value: encode_options(column.options()),
            })),
        );
    }

    let mut node = Mapping::new();
    if !table.options().is_empty() {
        node.insert(key(OPTIONS), encode_options(table.options()));
    }
    node.insert(key(COLUMNS), Value::Mapping(columns));
    if !table.constraints().is_empty() {
        node.insert(key(CONSTRAINTS), encode_strings(table.constraints().iter()));
    }
    if !table.indexes().is_empty() {
        node.insert(key(INDEX_DEFS), encode_strings(table.indexes().iter()));
    }
    Value::Mapping(node)
}

fn encode_root(configuration: &Configuration) -> Value {
    let mut end_points = Mapping::new();
    for (name, end_point) in configuration.end_points() {
        end_points.insert(key(name), encode_end_point(end_point));
    }
    let mut tables = Mapping::new();
    for (full_name, table) in configuration.tables() {
        tables.insert(key(full_name), encode_table(table));
    }

    let mut root = Mapping::new();
    root.insert(key(OPTIONS), encode_options(configuration.options()));
    root.insert(key(END_POINTS), Value::Mapping(end_points));
    root.insert(key(TABLES), Value::Mapping(tables));

    Value::Tagged(Box::new(TaggedValue {
        tag: Tag::new(ROOT_TAG),
        value: Value::Mapping(root),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"!Configuration
options:
  datasource.url: ''
  tap.maxrec: 2000
endPoints:
  tap:
    tables:
    - public.obs
tables:
  public.obs:
    options:
      description: Observations
      scs: true
    columns:
      obs_id: !Column
        type: BIGINT
        nullable: false
      ra: !Column
        type: DOUBLE
        unit: deg
        unused:
      empty: !Column
    constraints:
      obs_pkey: PRIMARY KEY (obs_id)
    indexDefs:
      obs_ra_idx: (ra)
"#;

    #[test]
    fn test_parse_document() {
        let config = YamlCodec.parse(DOCUMENT).unwrap();
        assert_eq!(config.get("datasource.url"), Some(""));
        assert_eq!(config.options().get_long("tap.maxrec").unwrap(), Some(2000));
        assert!(config.get_end_point("tap").unwrap().exposes("public.obs"));

        let table = config.get_table_config("public.obs").unwrap();
        assert_eq!(table.description(), Some("Observations"));
        assert!(table.scs_enabled().unwrap());
        assert_eq!(table.columns().len(), 3);
        assert!(!table.column("obs_id").unwrap().nullable().unwrap());
        assert_eq!(table.column("ra").unwrap().unit(), Some("deg"));
        assert!(!table.column("ra").unwrap().options().contains_key("unused"));
        assert!(table.column("empty").unwrap().options().is_empty());
        assert_eq!(table.column("ra").unwrap().table_name(), "public.obs");
        assert_eq!(table.constraints()["obs_pkey"], "PRIMARY KEY (obs_id)");
        assert_eq!(table.indexes()["obs_ra_idx"], "(ra)");
    }

    #[test]
    fn test_round_trip() {
        let parsed = YamlCodec.parse(DOCUMENT).unwrap();
        let text = YamlCodec.serialize(&parsed).unwrap();
        assert!(text.starts_with("!Configuration"));
        assert_eq!(YamlCodec.parse(&text).unwrap(), parsed);
    }

    #[test]
    fn test_typed_leaves_on_output() {
        assert_eq!(encode_leaf("true"), Value::Bool(true));
        assert_eq!(encode_leaf("42"), Value::Number(42.into()));
        assert_eq!(encode_leaf("042"), Value::String("042".to_string()));
        assert_eq!(encode_leaf("1.5"), Value::String("1.5".to_string()));
        assert_eq!(encode_leaf("yes"), Value::String("yes".to_string()));
    }

    #[test]
    fn test_missing_root_tag() {
        let err = YamlCodec.parse("options: {}\n").unwrap_err();
        assert!(err.message.contains("missing root tag"));
        let err = YamlCodec.parse("!Config\noptions: {}\n").unwrap_err();
        assert!(err.message.contains("expected root tag"));
    }

    #[test]
    fn test_untagged_column_is_rejected() {
        let text = "!Configuration\ntables:\n  public.t:\n    columns:\n      a:\n        type: INTEGER\n";
        let err = YamlCodec.parse(text).unwrap_err();
        assert!(err.message.contains("must be tagged !Column"));
        assert_eq!(err.context.as_deref(), Some("tables.public.t.columns.a"));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let text = "!Configuration\ntables:\n  public.t:\n    columns:\n      a: !Col\n        type: INTEGER\n";
        let err = YamlCodec.parse(text).unwrap_err();
        assert!(err.message.contains("expected !Column"));

        let text = "!Configuration\noptions:\n  x: !Secret abc\n";
        assert!(YamlCodec.parse(text).is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(YamlCodec.parse("!Configuration\nviews: {}\n").is_err());
        let err = YamlCodec
            .parse("!Configuration\ntables:\n  public.t:\n    indexes: {}\n")
            .unwrap_err();
        assert!(err.message.contains("unknown table key 'indexes'"));
    }

    #[test]
    fn test_syntax_error_has_location() {
        let err = YamlCodec
            .parse("!Configuration\noptions:\n  a: [1, 2\n")
            .unwrap_err();
        assert!(err.line.is_some());
    }

    #[test]
    fn test_nested_value_in_options_is_rejected() {
        let err = YamlCodec
            .parse("!Configuration\noptions:\n  a:\n    b: c\n")
            .unwrap_err();
        assert_eq!(err.context.as_deref(), Some("options.a"));
    }
}
