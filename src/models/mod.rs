//! Document model
//!
//! In-memory tree of the declarative document: a [`Configuration`] owns its
//! [`EndPoint`]s and [`TableConfig`]s, each table owns its [`ColumnConfig`]s.
//! Every entity is backed by an [`Options`](crate::Options) bag.

pub mod change;
pub mod column;
pub mod configuration;
pub mod endpoint;
pub mod table;

pub use change::{Action, Change};
pub use column::ColumnConfig;
pub use configuration::Configuration;
pub use endpoint::{EndPoint, ServiceType};
pub use table::TableConfig;
