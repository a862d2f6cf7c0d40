//! String-keyed property bag shared by every configuration entity
//!
//! Values are stored as strings and coerced on read. Keeping everything a
//! string keeps the declarative document simple and diff-friendly; coercion
//! failures surface as [`TypeCoercionError`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Error raised when an option value cannot be read as the requested type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("option '{key}' has value '{value}' which is not a valid {expected}")]
pub struct TypeCoercionError {
    /// Option key
    pub key: String,
    /// Raw value found in the bag
    pub value: String,
    /// Name of the requested type
    pub expected: &'static str,
}

/// Ordered mapping of option key to string value
///
/// Keys are case-preserving. Surrounding quotes are stripped from keys on
/// both insert and lookup, so `"size"` and `size` address the same entry.
///
/// # Example
///
/// ```rust
/// use tap_config::Options;
///
/// let mut options = Options::new();
/// options.put("\"max.records\"", "2000");
/// assert_eq!(options.get_long("max.records").unwrap(), Some(2000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: BTreeMap<String, String>,
}

impl Options {
    /// Create an empty option bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the raw value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(normalize_key(key)).map(String::as_str)
    }

    /// Get the raw value for a key, falling back to `default`
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Set a value, returning the previous one
    pub fn put(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.values
            .insert(normalize_key(key.as_ref()).to_string(), value.into())
    }

    /// Set a value when `value` is `Some`, remove the key otherwise
    pub fn set_opt(&mut self, key: &str, value: Option<impl Into<String>>) {
        match value {
            Some(value) => {
                self.put(key, value);
            }
            None => {
                self.remove(key);
            }
        }
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(normalize_key(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(normalize_key(key))
    }

    /// Iterate over key/value pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy all entries of `other` into this bag, overwriting existing keys
    pub fn extend(&mut self, other: &Options) {
        for (key, value) in other.iter() {
            self.put(key, value);
        }
    }

    /// Read a value as `i32`
    pub fn get_int(&self, key: &str) -> Result<Option<i32>, TypeCoercionError> {
        self.parse_with(key, "integer")
    }

    /// Read a value as `i64`
    pub fn get_long(&self, key: &str) -> Result<Option<i64>, TypeCoercionError> {
        self.parse_with(key, "long")
    }

    /// Read a value as `f32`
    pub fn get_float(&self, key: &str) -> Result<Option<f32>, TypeCoercionError> {
        self.parse_with(key, "float")
    }

    /// Read a value as `f64`
    pub fn get_double(&self, key: &str) -> Result<Option<f64>, TypeCoercionError> {
        self.parse_with(key, "double")
    }

    /// Read a value as a boolean (see [`parse_boolean`])
    pub fn get_boolean(&self, key: &str) -> Result<Option<bool>, TypeCoercionError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse_boolean(raw)
                .map(Some)
                .ok_or_else(|| coercion_error(key, raw, "boolean")),
        }
    }

    pub fn get_int_or(&self, key: &str, default: i32) -> Result<i32, TypeCoercionError> {
        Ok(self.get_int(key)?.unwrap_or(default))
    }

    pub fn get_long_or(&self, key: &str, default: i64) -> Result<i64, TypeCoercionError> {
        Ok(self.get_long(key)?.unwrap_or(default))
    }

    pub fn get_float_or(&self, key: &str, default: f32) -> Result<f32, TypeCoercionError> {
        Ok(self.get_float(key)?.unwrap_or(default))
    }

    pub fn get_double_or(&self, key: &str, default: f64) -> Result<f64, TypeCoercionError> {
        Ok(self.get_double(key)?.unwrap_or(default))
    }

    pub fn get_boolean_or(&self, key: &str, default: bool) -> Result<bool, TypeCoercionError> {
        Ok(self.get_boolean(key)?.unwrap_or(default))
    }

    fn parse_with<T: FromStr>(
        &self,
        key: &str,
        expected: &'static str,
    ) -> Result<Option<T>, TypeCoercionError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| coercion_error(key, raw, expected)),
        }
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Options::new();
        for (key, value) in iter {
            options.put(key, value);
        }
        options
    }
}

/// Parse a boolean option value
///
/// Accepts `1`, `true`, `on`, `yes` and `0`, `false`, `off`, `no`,
/// case-insensitively. Anything else yields `None`.
pub fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Strip optional surrounding quotes from an option key
fn normalize_key(key: &str) -> &str {
    let trimmed = key.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn coercion_error(key: &str, raw: &str, expected: &'static str) -> TypeCoercionError {
    TypeCoercionError {
        key: normalize_key(key).to_string(),
        value: raw.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_keys_address_same_entry() {
        let mut options = Options::new();
        options.put("\"size\"", "32");
        assert_eq!(options.get("size"), Some("32"));
        assert_eq!(options.get("'size'"), Some("32"));

        options.put("size", "64");
        assert_eq!(options.len(), 1);
        assert_eq!(options.get("\"size\""), Some("64"));
    }

    #[test]
    fn test_keys_are_case_preserving() {
        let mut options = Options::new();
        options.put("dbName", "obs");
        assert_eq!(options.get("dbName"), Some("obs"));
        assert_eq!(options.get("dbname"), None);
    }

    #[test]
    fn test_equality_normalizes_quoting() {
        let a: Options = [("\"unit\"", "deg"), ("ucd", "pos.eq.ra")].into_iter().collect();
        let b: Options = [("unit", "deg"), ("'ucd'", "pos.eq.ra")].into_iter().collect();
        assert_eq!(a, b);

        let c: Options = [("unit", "arcsec"), ("ucd", "pos.eq.ra")].into_iter().collect();
        assert_ne!(a, c);
    }

    #[test]
    fn test_boolean_parsing() {
        for raw in ["1", "true", "ON", "Yes", " true "] {
            assert_eq!(parse_boolean(raw), Some(true), "{}", raw);
        }
        for raw in ["0", "FALSE", "off", "no"] {
            assert_eq!(parse_boolean(raw), Some(false), "{}", raw);
        }
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn test_typed_getters() {
        let options: Options = [
            ("max.records", "2000"),
            ("max.radius", "2.5"),
            ("upload", "on"),
            ("verbosity", "3"),
        ]
        .into_iter()
        .collect();

        assert_eq!(options.get_long("max.records").unwrap(), Some(2000));
        assert_eq!(options.get_double("max.radius").unwrap(), Some(2.5));
        assert_eq!(options.get_float("max.radius").unwrap(), Some(2.5));
        assert_eq!(options.get_boolean("upload").unwrap(), Some(true));
        assert_eq!(options.get_int("verbosity").unwrap(), Some(3));
        assert_eq!(options.get_int("missing").unwrap(), None);
        assert_eq!(options.get_int_or("missing", 7).unwrap(), 7);
        assert_eq!(options.get_or("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_coercion_failure_is_typed() {
        let options: Options = [("size", "wide"), ("flag", "maybe")].into_iter().collect();

        let err = options.get_int("size").unwrap_err();
        assert_eq!(err.key, "size");
        assert_eq!(err.value, "wide");
        assert_eq!(err.expected, "integer");

        let err = options.get_boolean("flag").unwrap_err();
        assert_eq!(err.expected, "boolean");
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_set_opt_removes_on_none() {
        let mut options = Options::new();
        options.set_opt("unit", Some("deg"));
        assert!(options.contains_key("unit"));
        options.set_opt("unit", None::<String>);
        assert!(!options.contains_key("unit"));
    }
}
