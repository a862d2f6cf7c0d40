//! Service endpoint configuration

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::options::{Options, TypeCoercionError};

/// Well-known endpoint option keys
pub mod keys {
    pub const MAX_RADIUS: &str = "max.radius";
    pub const MAX_RECORDS: &str = "max.records";
    pub const UPLOAD_ENABLED: &str = "upload.enabled";
}

/// VO service exposed by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceType {
    Tap,
    Scs,
    Sia1,
    Sia2,
    Ssa,
    DataLink,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Tap => "tap",
            ServiceType::Scs => "scs",
            ServiceType::Sia1 => "sia1",
            ServiceType::Sia2 => "sia2",
            ServiceType::Ssa => "ssa",
            ServiceType::DataLink => "datalink",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tap" => Ok(ServiceType::Tap),
            "scs" | "cone" | "conesearch" => Ok(ServiceType::Scs),
            "sia" | "sia1" => Ok(ServiceType::Sia1),
            "sia2" => Ok(ServiceType::Sia2),
            "ssa" | "ssap" => Ok(ServiceType::Ssa),
            "datalink" => Ok(ServiceType::DataLink),
            other => Err(format!("unknown service type '{}'", other)),
        }
    }
}

/// One VO service endpoint: exposed tables, service properties and example
/// queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndPoint {
    name: String,
    options: Options,
    tables: BTreeSet<String>,
    examples: BTreeMap<String, String>,
}

impl EndPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Options::new(),
            tables: BTreeSet::new(),
            examples: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service type derived from the endpoint name, `None` for custom names
    pub fn service_type(&self) -> Option<ServiceType> {
        self.name.parse().ok()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Full names of the tables exposed through this endpoint
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn add_table(&mut self, full_name: impl Into<String>) -> bool {
        self.tables.insert(full_name.into())
    }

    pub fn remove_table(&mut self, full_name: &str) -> bool {
        self.tables.remove(full_name)
    }

    pub fn exposes(&self, full_name: &str) -> bool {
        self.tables.contains(full_name)
    }

    /// Example queries keyed by name
    pub fn examples(&self) -> &BTreeMap<String, String> {
        &self.examples
    }

    pub fn add_example(&mut self, name: impl Into<String>, query: impl Into<String>) {
        self.examples.insert(name.into(), query.into());
    }

    /// Maximum cone search radius in degrees
    pub fn max_radius(&self) -> Result<Option<f64>, TypeCoercionError> {
        self.options.get_double(keys::MAX_RADIUS)
    }

    pub fn max_records(&self) -> Result<Option<i64>, TypeCoercionError> {
        self.options.get_long(keys::MAX_RECORDS)
    }

    pub fn upload_enabled(&self) -> Result<bool, TypeCoercionError> {
        self.options.get_boolean_or(keys::UPLOAD_ENABLED, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_from_name() {
        assert_eq!(EndPoint::new("tap").service_type(), Some(ServiceType::Tap));
        assert_eq!(EndPoint::new("SCS").service_type(), Some(ServiceType::Scs));
        assert_eq!(EndPoint::new("sia").service_type(), Some(ServiceType::Sia1));
        assert_eq!(EndPoint::new("datalink").service_type(), Some(ServiceType::DataLink));
        assert_eq!(EndPoint::new("custom").service_type(), None);
    }

    #[test]
    fn test_service_properties() {
        let mut scs = EndPoint::new("scs");
        assert_eq!(scs.max_radius().unwrap(), None);
        assert!(!scs.upload_enabled().unwrap());

        scs.options_mut().put(keys::MAX_RADIUS, "0.5");
        scs.options_mut().put(keys::MAX_RECORDS, "2000");
        scs.options_mut().put(keys::UPLOAD_ENABLED, "on");
        assert_eq!(scs.max_radius().unwrap(), Some(0.5));
        assert_eq!(scs.max_records().unwrap(), Some(2000));
        assert!(scs.upload_enabled().unwrap());

        scs.options_mut().put(keys::MAX_RECORDS, "lots");
        assert!(scs.max_records().is_err());
    }

    #[test]
    fn test_exposed_tables() {
        let mut tap = EndPoint::new("tap");
        assert!(tap.add_table("ivoa.obscore"));
        assert!(!tap.add_table("ivoa.obscore"));
        assert!(tap.exposes("ivoa.obscore"));
        assert!(tap.remove_table("ivoa.obscore"));
        assert!(tap.tables().is_empty());
    }
}
