//! Metadata catalog command implementations

use std::path::Path;

use crate::cli::commands::{connect, resolve_settings};
use crate::cli::error::CliError;
use crate::database::SchemaDao;

/// Handle the metadata command: print the persisted TAP metadata as a document
pub async fn handle_metadata(settings: Option<&Path>) -> Result<(), CliError> {
    let settings = resolve_settings(settings, None)?;
    let dao = connect(&settings).await?;
    print!("{}", dao.read_metadata_document().await?);
    Ok(())
}

/// Handle the init-catalog command
pub async fn handle_init_catalog(settings: Option<&Path>) -> Result<(), CliError> {
    let settings = resolve_settings(settings, None)?;
    let dao = connect(&settings).await?;
    let version = dao.check_version().await?;
    dao.init_metadata_catalog().await?;
    println!(
        "Metadata catalog ready in schema '{}' ({})",
        settings.metadata_schema, version
    );
    Ok(())
}
