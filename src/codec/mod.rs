//! Declarative document codec
//!
//! Translates between the [`Configuration`] tree and its textual form. The
//! only format is YAML with explicit `!Configuration` and `!Column` tags; see
//! [`yaml`] for the layout.

pub mod yaml;

use crate::models::Configuration;

pub use yaml::YamlCodec;

/// Malformed declarative text
///
/// `line` and `column` are filled in for syntax errors reported by the YAML
/// parser; structural errors carry the path of the offending node in
/// `context` (for example `tables.public.obs.columns.ra`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid document: {message}{}", location_suffix(.line, .column, .context))]
pub struct DocumentParseError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub context: Option<String>,
}

impl DocumentParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            context: None,
        }
    }

    /// Attach the path of the node being decoded
    pub fn at(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

fn location_suffix(line: &Option<usize>, column: &Option<usize>, context: &Option<String>) -> String {
    let mut suffix = String::new();
    if let Some(context) = context {
        suffix.push_str(&format!(" (at {})", context));
    }
    match (line, column) {
        (Some(line), Some(column)) => suffix.push_str(&format!(" (line {}, column {})", line, column)),
        (Some(line), None) => suffix.push_str(&format!(" (line {})", line)),
        _ => {}
    }
    suffix
}

/// Bidirectional translation between a [`Configuration`] and text
///
/// Implementations must round-trip: `parse(serialize(c)) == c` for every
/// configuration they can serialize.
pub trait DocumentCodec: Send + Sync {
    /// Parse declarative text into a configuration
    fn parse(&self, text: &str) -> Result<Configuration, DocumentParseError>;

    /// Serialize a configuration into declarative text
    fn serialize(&self, configuration: &Configuration) -> Result<String, DocumentParseError>;
}

/// Parse a YAML document
pub fn parse(text: &str) -> Result<Configuration, DocumentParseError> {
    YamlCodec.parse(text)
}

/// Serialize a configuration as a YAML document
pub fn serialize(configuration: &Configuration) -> Result<String, DocumentParseError> {
    YamlCodec.serialize(configuration)
}
