//! TAP configuration SDK - declarative schema configuration for TAP services
//!
//! Provides unified interfaces for:
//! - The declarative document model and its YAML codec
//! - Schema introspection and DDL execution (in-memory and PostgreSQL)
//! - The TAP_SCHEMA metadata catalog
//! - Plan/apply reconciliation gated by change levels
//! - The registry holding the active configuration

pub mod codec;
pub mod database;
pub mod error;
pub mod models;
pub mod options;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod settings;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use codec::{DocumentCodec, DocumentParseError, YamlCodec};
pub use database::{DatabaseError, MemoryDao, SchemaDao};
#[cfg(feature = "postgres-backend")]
pub use database::PostgresDao;
pub use error::{ConfigurationError, ConfigurationResult};
pub use options::{Options, TypeCoercionError};
pub use reconcile::{Operation, Plan, Reconciler, RunOutcome};
pub use registry::{ConfigurationListener, ConfigurationRegistry, EndPointReadiness};
pub use service::ConfigurationService;
pub use settings::DatabaseSettings;

// Re-export models
pub use models::{Action, Change, ColumnConfig, Configuration, EndPoint, ServiceType, TableConfig};
