//! Native database types and their protocol-level (TAP/ADQL) names
//!
//! Introspection reports native PostgreSQL type names such as
//! `character varying(32)` or `double precision`. Comparison and export work
//! on protocol names (`VARCHAR`, `DOUBLE`, ...), so both sides of a diff are
//! funnelled through [`type_of`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static NATIVE_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*([A-Za-z_][A-Za-z0-9_ ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*\d+\s*)?\))?\s*((?:with|without)\s+time\s+zone)?\s*(?:\[\])?\s*$",
    )
    .unwrap()
});

/// Split a native type into its lowercase base name and optional length
///
/// `character varying(32)` becomes `("character varying", Some(32))`,
/// `timestamp(3) with time zone` becomes `("timestamp with time zone", None)`
/// since precision is not a length.
pub fn split_native(native: &str) -> (String, Option<u32>) {
    match NATIVE_TYPE.captures(native) {
        Some(caps) => {
            let mut base = caps[1]
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            let zone = caps.get(3).map(|m| m.as_str().to_lowercase());
            let length = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
            if let Some(zone) = zone {
                base = format!("{} {}", base, zone.split_whitespace().collect::<Vec<_>>().join(" "));
            }
            let length = if base.starts_with("timestamp") || base.starts_with("time") {
                None
            } else {
                length
            };
            (base, length)
        }
        None => (native.trim().to_lowercase(), None),
    }
}

fn protocol_name(base: &str) -> Option<&'static str> {
    let name = match base {
        "smallint" | "int2" => "SMALLINT",
        "integer" | "int" | "int4" | "serial" => "INTEGER",
        "bigint" | "int8" | "bigserial" => "BIGINT",
        "real" | "float4" => "REAL",
        "double precision" | "double" | "float8" | "float" => "DOUBLE",
        "boolean" | "bool" => "BOOLEAN",
        "character varying" | "varchar" | "text" => "VARCHAR",
        "character" | "char" | "bpchar" => "CHAR",
        "timestamp"
        | "timestamp with time zone"
        | "timestamp without time zone"
        | "timestamptz"
        | "date" => "TIMESTAMP",
        "bytea" | "varbinary" => "VARBINARY",
        "geometry" | "geography" | "polygon" | "circle" | "box" | "spoly" | "scircle"
        | "sbox" | "region" => "REGION",
        "point" | "spoint" => "POINT",
        _ => return None,
    };
    Some(name)
}

/// Translate a native type name into its protocol-level name
///
/// Unknown native types pass through uppercased.
///
/// # Example
///
/// ```rust
/// use tap_config::database::types::type_of;
///
/// assert_eq!(type_of("double precision"), "DOUBLE");
/// assert_eq!(type_of("character varying(64)"), "VARCHAR");
/// assert_eq!(type_of("geometry"), "REGION");
/// assert_eq!(type_of("hstore"), "HSTORE");
/// ```
pub fn type_of(native: &str) -> String {
    let (base, _) = split_native(native);
    protocol_name(&base)
        .map(str::to_string)
        .unwrap_or_else(|| native.trim().to_uppercase())
}

/// Whether a protocol type carries a length
pub fn is_sized(protocol: &str) -> bool {
    matches!(protocol, "CHAR" | "VARCHAR" | "VARBINARY")
}

const PROTOCOL_NAMES: [&str; 12] = [
    "SMALLINT",
    "INTEGER",
    "BIGINT",
    "REAL",
    "DOUBLE",
    "BOOLEAN",
    "TIMESTAMP",
    "CHAR",
    "VARCHAR",
    "VARBINARY",
    "POINT",
    "REGION",
];

/// Whether `declared` is a bare protocol-level name such as `DOUBLE`
pub fn is_protocol_name(declared: &str) -> bool {
    let declared = declared.trim();
    PROTOCOL_NAMES.iter().any(|name| name.eq_ignore_ascii_case(declared))
}

/// Render a declared column type for PostgreSQL DDL
///
/// Protocol names are translated to their native counterpart. Anything else
/// is a native type and is kept as written, including time zones and array
/// suffixes; `size` is appended only to character types without a length.
///
/// ```rust
/// use tap_config::database::types::native_ddl;
///
/// assert_eq!(native_ddl("VARCHAR", Some(64)), "varchar(64)");
/// assert_eq!(native_ddl("timestamp with time zone", None), "timestamp with time zone");
/// assert_eq!(native_ddl("integer[]", None), "integer[]");
/// assert_eq!(native_ddl("character varying", Some(16)), "character varying(16)");
/// ```
pub fn native_ddl(declared: &str, size: Option<u32>) -> String {
    let declared = declared.trim();
    if is_protocol_name(declared) {
        return SqlType::parse(declared, size).native();
    }
    let (base, embedded) = split_native(declared);
    let character = matches!(
        base.as_str(),
        "character varying" | "varchar" | "character" | "char"
    );
    match size {
        Some(size) if character && embedded.is_none() && !declared.ends_with("[]") => {
            format!("{}({})", declared, size)
        }
        _ => declared.to_string(),
    }
}

/// Protocol-level column type with optional length
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlType {
    /// Protocol name, e.g. `VARCHAR`
    pub name: String,
    /// Length for sized types, `None` for unbounded or unsized types
    pub size: Option<u32>,
}

impl SqlType {
    /// Resolve a declared or native type plus an optional explicit size
    ///
    /// A length embedded in `declared` wins over `size`. Lengths on unsized
    /// types are dropped.
    pub fn parse(declared: &str, size: Option<u32>) -> Self {
        let (base, embedded) = split_native(declared);
        let name = type_of(declared);
        // text is unbounded whatever size the document gives it
        let size = if is_sized(&name) && base != "text" {
            embedded.or(size)
        } else {
            None
        };
        Self { name, size }
    }

    /// Render the type for use in PostgreSQL DDL
    pub fn native(&self) -> String {
        let base = match self.name.as_str() {
            "SMALLINT" => "smallint",
            "INTEGER" => "integer",
            "BIGINT" => "bigint",
            "REAL" => "real",
            "DOUBLE" => "double precision",
            "BOOLEAN" => "boolean",
            "TIMESTAMP" => "timestamp",
            "CHAR" => "char",
            "VARCHAR" => "varchar",
            "VARBINARY" => "bytea",
            "POINT" => "point",
            "REGION" => "polygon",
            other => return other.to_lowercase(),
        };
        match (self.size, self.name.as_str()) {
            (Some(size), "CHAR" | "VARCHAR") => format!("{}({})", base, size),
            _ => base.to_string(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "{}({})", self.name, size),
            None => f.write_str(&self.name),
        }
    }
}

/// How a column type change relates to the existing data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
    Unchanged,
    /// Every existing value fits the new type
    Widening,
    /// Same family, smaller range or length; may fail or truncate
    Narrowing,
    /// Different families; never attempted
    Incompatible,
}

fn numeric_rank(name: &str) -> Option<(u8, u8)> {
    match name {
        "SMALLINT" => Some((0, 1)),
        "INTEGER" => Some((0, 2)),
        "BIGINT" => Some((0, 3)),
        "REAL" => Some((1, 1)),
        "DOUBLE" => Some((1, 2)),
        _ => None,
    }
}

/// Effective length of a character type; `None` means unbounded
fn char_length(ty: &SqlType) -> Option<u32> {
    match (ty.name.as_str(), ty.size) {
        ("CHAR", None) => Some(1),
        (_, size) => size,
    }
}

fn compare_lengths(from: Option<u32>, to: Option<u32>) -> TypeChange {
    match (from, to) {
        (a, b) if a == b => TypeChange::Unchanged,
        (_, None) => TypeChange::Widening,
        (None, Some(_)) => TypeChange::Narrowing,
        (Some(a), Some(b)) if b > a => TypeChange::Widening,
        _ => TypeChange::Narrowing,
    }
}

/// Classify the change from the actual type `from` to the desired type `to`
pub fn classify_type_change(from: &SqlType, to: &SqlType) -> TypeChange {
    if from == to {
        return TypeChange::Unchanged;
    }

    if from.name == to.name {
        return if is_sized(&from.name) {
            compare_lengths(char_length(from), char_length(to))
        } else {
            TypeChange::Unchanged
        };
    }

    if let (Some((fam_a, rank_a)), Some((fam_b, rank_b))) =
        (numeric_rank(&from.name), numeric_rank(&to.name))
    {
        if fam_a == fam_b {
            return if rank_b > rank_a {
                TypeChange::Widening
            } else {
                TypeChange::Narrowing
            };
        }
        // smallint and integer fit exactly into double precision
        if fam_a == 0 && rank_a <= 2 && to.name == "DOUBLE" {
            return TypeChange::Widening;
        }
        return TypeChange::Incompatible;
    }

    match (from.name.as_str(), to.name.as_str()) {
        ("CHAR", "VARCHAR") => match compare_lengths(char_length(from), char_length(to)) {
            TypeChange::Narrowing => TypeChange::Narrowing,
            _ => TypeChange::Widening,
        },
        ("VARCHAR", "CHAR") => TypeChange::Narrowing,
        _ => TypeChange::Incompatible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_mappings() {
        let cases = [
            ("double precision", "DOUBLE"),
            ("character varying(32)", "VARCHAR"),
            ("character varying", "VARCHAR"),
            ("character(8)", "CHAR"),
            ("text", "VARCHAR"),
            ("integer", "INTEGER"),
            ("bigint", "BIGINT"),
            ("smallint", "SMALLINT"),
            ("real", "REAL"),
            ("boolean", "BOOLEAN"),
            ("timestamp with time zone", "TIMESTAMP"),
            ("timestamp without time zone", "TIMESTAMP"),
            ("timestamp(3) with time zone", "TIMESTAMP"),
            ("geometry", "REGION"),
            ("polygon", "REGION"),
            ("spoint", "POINT"),
            ("bytea", "VARBINARY"),
        ];
        for (native, protocol) in cases {
            assert_eq!(type_of(native), protocol, "{}", native);
        }
    }

    #[test]
    fn test_unknown_types_pass_through_uppercased() {
        assert_eq!(type_of("hstore"), "HSTORE");
        assert_eq!(type_of("numeric(10,2)"), "NUMERIC(10,2)");
    }

    #[test]
    fn test_protocol_names_map_to_themselves() {
        for name in ["VARCHAR", "DOUBLE", "REGION", "TIMESTAMP", "BIGINT", "POINT"] {
            assert_eq!(type_of(name), name);
        }
    }

    #[test]
    fn test_split_native() {
        assert_eq!(
            split_native("character varying(32)"),
            ("character varying".to_string(), Some(32))
        );
        assert_eq!(split_native("  Double   Precision "), ("double precision".to_string(), None));
        assert_eq!(
            split_native("timestamp(6) without time zone"),
            ("timestamp without time zone".to_string(), None)
        );
    }

    #[test]
    fn test_sql_type_parse() {
        assert_eq!(
            SqlType::parse("varchar(16)", Some(99)),
            SqlType { name: "VARCHAR".to_string(), size: Some(16) }
        );
        assert_eq!(
            SqlType::parse("VARCHAR", Some(64)),
            SqlType { name: "VARCHAR".to_string(), size: Some(64) }
        );
        assert_eq!(
            SqlType::parse("integer", Some(4)),
            SqlType { name: "INTEGER".to_string(), size: None }
        );
    }

    #[test]
    fn test_native_rendering_round_trips() {
        for declared in ["varchar(32)", "char(4)", "double precision", "bigint", "text", "polygon"] {
            let ty = SqlType::parse(declared, None);
            assert_eq!(SqlType::parse(&ty.native(), None), ty, "{}", declared);
        }
        assert_eq!(SqlType::parse("VARCHAR", Some(12)).native(), "varchar(12)");
        assert_eq!(SqlType::parse("DOUBLE", None).native(), "double precision");
    }

    #[test]
    fn test_native_ddl_keeps_declared_native_types() {
        let cases = [
            ("timestamp with time zone", None, "timestamp with time zone"),
            ("geometry", None, "geometry"),
            ("integer[]", None, "integer[]"),
            ("date", None, "date"),
            ("text", Some(32), "text"),
            ("varchar(16)", Some(99), "varchar(16)"),
            ("character varying", Some(16), "character varying(16)"),
            ("DOUBLE", None, "double precision"),
            ("varchar", Some(8), "varchar(8)"),
            ("REGION", None, "polygon"),
        ];
        for (declared, size, native) in cases {
            assert_eq!(native_ddl(declared, size), native, "{}", declared);
        }
    }

    #[test]
    fn test_native_ddl_compares_equal_to_its_declaration() {
        for declared in ["timestamp with time zone", "geometry", "integer[]", "date", "text"] {
            let rendered = native_ddl(declared, Some(32));
            assert_eq!(
                classify_type_change(&SqlType::parse(&rendered, None), &SqlType::parse(declared, Some(32))),
                TypeChange::Unchanged,
                "{}",
                declared
            );
        }
    }

    #[test]
    fn test_classify_widening() {
        let cases = [
            ("varchar(16)", "varchar(32)"),
            ("varchar(16)", "text"),
            ("char(4)", "varchar(8)"),
            ("smallint", "integer"),
            ("integer", "bigint"),
            ("real", "double precision"),
            ("integer", "double precision"),
        ];
        for (from, to) in cases {
            assert_eq!(
                classify_type_change(&SqlType::parse(from, None), &SqlType::parse(to, None)),
                TypeChange::Widening,
                "{} -> {}",
                from,
                to
            );
        }
    }

    #[test]
    fn test_classify_narrowing_and_incompatible() {
        let narrowing = [("varchar(32)", "varchar(16)"), ("bigint", "integer"), ("text", "varchar(8)")];
        for (from, to) in narrowing {
            assert_eq!(
                classify_type_change(&SqlType::parse(from, None), &SqlType::parse(to, None)),
                TypeChange::Narrowing,
                "{} -> {}",
                from,
                to
            );
        }

        let incompatible = [
            ("varchar(32)", "integer"),
            ("double precision", "integer"),
            ("timestamp", "varchar"),
            ("bigint", "double precision"),
        ];
        for (from, to) in incompatible {
            assert_eq!(
                classify_type_change(&SqlType::parse(from, None), &SqlType::parse(to, None)),
                TypeChange::Incompatible,
                "{} -> {}",
                from,
                to
            );
        }
    }

    #[test]
    fn test_classify_unchanged_ignores_spelling() {
        assert_eq!(
            classify_type_change(
                &SqlType::parse("character varying(32)", None),
                &SqlType::parse("VARCHAR", Some(32))
            ),
            TypeChange::Unchanged
        );
    }
}
