//! Column configuration

use crate::database::types::{SqlType, native_ddl};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::options::{Options, TypeCoercionError};

/// Well-known column option keys
pub mod keys {
    pub const DB_NAME: &str = "dbName";
    pub const TYPE: &str = "type";
    pub const SIZE: &str = "size";
    pub const NULLABLE: &str = "nullable";
    pub const DESCRIPTION: &str = "description";
    pub const LONG_DESCRIPTION: &str = "longDescription";
    pub const UNIT: &str = "unit";
    pub const UCD: &str = "ucd";
    pub const UTYPE: &str = "utype";
    pub const PRINCIPAL: &str = "principal";
    pub const INDEXED: &str = "indexed";
    pub const STD: &str = "std";
    pub const VERBOSITY: &str = "verbosity";
    pub const ORDER: &str = "order";
}

/// TAP metadata fields compared between desired and persisted columns
pub const METADATA_FIELDS: [&str; 9] = [
    keys::DESCRIPTION,
    keys::UNIT,
    keys::UCD,
    keys::UTYPE,
    keys::PRINCIPAL,
    keys::INDEXED,
    keys::STD,
    keys::VERBOSITY,
    keys::ORDER,
];

/// Column configuration backed by an [`Options`] bag
///
/// The column name is its key inside the owning table; `table_name` is the
/// back-reference to that table, maintained by
/// [`TableConfig::add_column`](crate::models::TableConfig::add_column).
///
/// # Example
///
/// ```rust
/// use tap_config::models::ColumnConfig;
///
/// let mut column = ColumnConfig::new("ra");
/// column.set_datatype("DOUBLE");
/// column.set_unit(Some("deg"));
/// column.set_verbosity(Some(1)).unwrap();
/// assert_eq!(column.db_name(), "ra");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnConfig {
    name: String,
    table: String,
    options: Options,
}

impl ColumnConfig {
    /// Create an unattached column with no options
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            options: Options::new(),
        }
    }

    /// Create an unattached column from an existing option bag
    pub fn with_options(name: impl Into<String>, options: Options) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full name of the owning table, empty while unattached
    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub(crate) fn attach(&mut self, table: &str) {
        self.table = table.to_string();
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Physical column name; defaults to the logical name
    pub fn db_name(&self) -> &str {
        self.options.get(keys::DB_NAME).unwrap_or(&self.name)
    }

    /// Declared type exactly as written in the document
    pub fn datatype(&self) -> Option<&str> {
        self.options.get(keys::TYPE)
    }

    pub fn set_datatype(&mut self, datatype: &str) {
        self.options.put(keys::TYPE, datatype);
    }

    pub fn size(&self) -> Result<Option<u32>, TypeCoercionError> {
        self.unsigned(keys::SIZE)
    }

    pub fn set_size(&mut self, size: Option<u32>) {
        self.options.set_opt(keys::SIZE, size.map(|s| s.to_string()));
    }

    /// Declared type resolved to its protocol-level form
    pub fn sql_type(&self) -> Result<Option<SqlType>, TypeCoercionError> {
        let size = self.size()?;
        Ok(self.datatype().map(|declared| SqlType::parse(declared, size)))
    }

    /// Declared type rendered for DDL, keeping native spellings intact
    pub fn native_type(&self) -> Result<Option<String>, TypeCoercionError> {
        let size = self.size()?;
        Ok(self.datatype().map(|declared| native_ddl(declared, size)))
    }

    pub fn nullable(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::NULLABLE, true)
    }

    pub fn set_nullable(&mut self, nullable: bool) {
        self.options.put(keys::NULLABLE, nullable.to_string());
    }

    pub fn description(&self) -> Option<&str> {
        self.options.get(keys::DESCRIPTION)
    }

    pub fn set_description(&mut self, description: Option<&str>) {
        self.options.set_opt(keys::DESCRIPTION, description);
    }

    pub fn long_description(&self) -> Option<&str> {
        self.options.get(keys::LONG_DESCRIPTION)
    }

    pub fn unit(&self) -> Option<&str> {
        self.options.get(keys::UNIT)
    }

    pub fn set_unit(&mut self, unit: Option<&str>) {
        self.options.set_opt(keys::UNIT, unit);
    }

    pub fn ucd(&self) -> Option<&str> {
        self.options.get(keys::UCD)
    }

    pub fn set_ucd(&mut self, ucd: Option<&str>) {
        self.options.set_opt(keys::UCD, ucd);
    }

    pub fn utype(&self) -> Option<&str> {
        self.options.get(keys::UTYPE)
    }

    pub fn set_utype(&mut self, utype: Option<&str>) {
        self.options.set_opt(keys::UTYPE, utype);
    }

    pub fn principal(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::PRINCIPAL, false)
    }

    pub fn indexed(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::INDEXED, false)
    }

    pub fn std(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::STD, false)
    }

    /// SCS verbosity level, 1 to 3
    pub fn verbosity(&self) -> ConfigurationResult<Option<u8>> {
        match self.options.get_int(keys::VERBOSITY)? {
            None => Ok(None),
            Some(level @ 1..=3) => Ok(Some(level as u8)),
            Some(other) => Err(ConfigurationError::Invalid(format!(
                "column {}.{} has verbosity {} (expected 1 to 3)",
                self.table, self.name, other
            ))),
        }
    }

    pub fn set_verbosity(&mut self, verbosity: Option<u8>) -> ConfigurationResult<()> {
        if let Some(level) = verbosity
            && !(1..=3).contains(&level)
        {
            return Err(ConfigurationError::Invalid(format!(
                "verbosity {} out of range for column {}",
                level, self.name
            )));
        }
        self.options
            .set_opt(keys::VERBOSITY, verbosity.map(|v| v.to_string()));
        Ok(())
    }

    /// Position used when ordering SELECT fields
    pub fn order(&self) -> Result<Option<u32>, TypeCoercionError> {
        self.unsigned(keys::ORDER)
    }

    pub fn set_order(&mut self, order: Option<u32>) {
        self.options.set_opt(keys::ORDER, order.map(|o| o.to_string()));
    }

    /// Names of the TAP metadata fields whose values differ from `other`
    ///
    /// Boolean flags are compared by meaning (`yes` equals `true`), absent
    /// flags count as `false`.
    pub fn metadata_differences(&self, other: &ColumnConfig) -> Vec<&'static str> {
        METADATA_FIELDS
            .iter()
            .copied()
            .filter(|field| {
                metadata_value(&self.options, field) != metadata_value(&other.options, field)
            })
            .collect()
    }

    fn unsigned(&self, key: &str) -> Result<Option<u32>, TypeCoercionError> {
        match self.options.get_long(key)? {
            None => Ok(None),
            Some(value) => u32::try_from(value).map(Some).map_err(|_| TypeCoercionError {
                key: key.to_string(),
                value: value.to_string(),
                expected: "non-negative integer",
            }),
        }
    }
}

fn metadata_value(options: &Options, field: &str) -> Option<String> {
    match field {
        keys::PRINCIPAL | keys::INDEXED | keys::STD => {
            let flag = options
                .get(field)
                .and_then(crate::options::parse_boolean)
                .unwrap_or(false);
            Some(flag.to_string())
        }
        _ => options
            .get(field)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_name_defaults_to_name() {
        let mut column = ColumnConfig::new("ra");
        assert_eq!(column.db_name(), "ra");
        column.options_mut().put(keys::DB_NAME, "s_ra");
        assert_eq!(column.db_name(), "s_ra");
    }

    #[test]
    fn test_sql_type_resolution() {
        let mut column = ColumnConfig::new("name");
        assert_eq!(column.sql_type().unwrap(), None);
        column.set_datatype("VARCHAR");
        column.set_size(Some(64));
        let ty = column.sql_type().unwrap().unwrap();
        assert_eq!(ty.to_string(), "VARCHAR(64)");
        assert_eq!(column.native_type().unwrap().as_deref(), Some("varchar(64)"));

        column.set_datatype("timestamp with time zone");
        assert_eq!(column.sql_type().unwrap().unwrap().to_string(), "TIMESTAMP");
        assert_eq!(
            column.native_type().unwrap().as_deref(),
            Some("timestamp with time zone")
        );
    }

    #[test]
    fn test_verbosity_range() {
        let mut column = ColumnConfig::new("ra");
        assert!(column.set_verbosity(Some(4)).is_err());
        column.set_verbosity(Some(2)).unwrap();
        assert_eq!(column.verbosity().unwrap(), Some(2));

        column.options_mut().put(keys::VERBOSITY, "9");
        assert!(matches!(
            column.verbosity(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_negative_order_is_rejected() {
        let mut column = ColumnConfig::new("ra");
        column.options_mut().put(keys::ORDER, "-1");
        assert!(column.order().is_err());
    }

    #[test]
    fn test_metadata_differences() {
        let mut desired = ColumnConfig::new("ra");
        desired.set_unit(Some("deg"));
        desired.set_ucd(Some("pos.eq.ra;meta.main"));
        desired.options_mut().put(keys::PRINCIPAL, "yes");

        let mut persisted = desired.clone();
        persisted.options_mut().put(keys::PRINCIPAL, "1");
        assert!(desired.metadata_differences(&persisted).is_empty());

        persisted.set_unit(Some("rad"));
        persisted.set_description(Some("ra"));
        assert_eq!(
            desired.metadata_differences(&persisted),
            vec![keys::DESCRIPTION, keys::UNIT]
        );
    }

    #[test]
    fn test_type_does_not_count_as_metadata() {
        let mut a = ColumnConfig::new("ra");
        a.set_datatype("DOUBLE");
        let mut b = ColumnConfig::new("ra");
        b.set_datatype("REAL");
        assert!(a.metadata_differences(&b).is_empty());
    }
}
