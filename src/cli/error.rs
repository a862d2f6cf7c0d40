//! CLI error type

use std::path::PathBuf;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::error::ConfigurationError;
use crate::settings::SettingsError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {0}: {1}")]
    FileReadError(PathBuf, String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no datasource configured; set 'datasource.url' in the document or 'url' in the settings file")]
    NoDatasource,

    #[error("{}", .0.user_message())]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("failed to render output: {0}")]
    Output(String),
}
