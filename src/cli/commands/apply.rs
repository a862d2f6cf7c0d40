//! Apply and export command implementations

use std::path::Path;

use crate::cli::commands::{load_document, reconciler, resolve_settings};
use crate::cli::error::CliError;
use crate::cli::output::format_plan;
use crate::codec;
use crate::models::Change;

/// Handle the apply command; prints the executed plan to stderr and the
/// resulting document to stdout
pub async fn handle_apply(input: &str, settings: Option<&Path>, level: Change) -> Result<(), CliError> {
    let document = load_document(input)?;
    let settings = resolve_settings(settings, Some(&document))?;
    let outcome = reconciler(&settings).await?.apply(&document, level).await?;
    if let Some(plan) = &outcome.plan {
        eprint!("{}", format_plan(plan));
    }
    print!("{}", outcome.document);
    Ok(())
}

/// Handle the export command
pub async fn handle_export(input: &str, settings: Option<&Path>) -> Result<(), CliError> {
    let document = load_document(input)?;
    let settings = resolve_settings(settings, Some(&document))?;
    let exported = reconciler(&settings).await?.export(&document).await?;
    let text = codec::serialize(&exported).map_err(crate::error::ConfigurationError::from)?;
    print!("{}", text);
    Ok(())
}
