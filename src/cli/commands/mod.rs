//! Command implementations

pub mod apply;
pub mod check;
pub mod metadata;
pub mod plan;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::error::CliError;
use crate::codec;
use crate::database::PostgresDao;
use crate::models::Configuration;
use crate::reconcile::Reconciler;
use crate::settings::DatabaseSettings;

/// Load input content from file or stdin
pub fn load_input(input: &str) -> Result<String, CliError> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| CliError::InvalidArgument(format!("Failed to read stdin: {}", e)))?;
        Ok(content)
    } else {
        let path = PathBuf::from(input);
        std::fs::read_to_string(&path).map_err(|e| CliError::FileReadError(path, e.to_string()))
    }
}

/// Load and parse a declarative document
pub fn load_document(input: &str) -> Result<Configuration, CliError> {
    let content = load_input(input)?;
    Ok(codec::parse(&content).map_err(crate::error::ConfigurationError::from)?)
}

/// Settings from `--settings` if given, else from the document's options
pub fn resolve_settings(
    settings: Option<&Path>,
    document: Option<&Configuration>,
) -> Result<DatabaseSettings, CliError> {
    match (settings, document) {
        (Some(path), _) => Ok(DatabaseSettings::load(path)?),
        (None, Some(document)) => Ok(DatabaseSettings::from_configuration(document)?),
        (None, None) => Ok(DatabaseSettings::default()),
    }
}

/// Connect to the configured datasource
pub async fn connect(settings: &DatabaseSettings) -> Result<Arc<PostgresDao>, CliError> {
    if settings.url().is_none() {
        return Err(CliError::NoDatasource);
    }
    Ok(Arc::new(PostgresDao::connect(settings).await?))
}

/// Reconciler over the configured datasource
pub async fn reconciler(settings: &DatabaseSettings) -> Result<Reconciler, CliError> {
    let dao = connect(settings).await?;
    Ok(Reconciler::new(dao).with_catalog_creation(settings.create_metadata_catalog))
}
