//! Plan and verify command implementations

use std::path::Path;

use crate::cli::commands::{load_document, reconciler, resolve_settings};
use crate::cli::error::CliError;
use crate::cli::output::{format_drift, format_plan, format_plan_json};

/// Handle the plan command
pub async fn handle_plan(input: &str, settings: Option<&Path>, json: bool) -> Result<(), CliError> {
    let document = load_document(input)?;
    let settings = resolve_settings(settings, Some(&document))?;
    let plan = reconciler(&settings).await?.plan(&document).await?;
    if json {
        println!("{}", format_plan_json(&plan).map_err(|e| CliError::Output(e.to_string()))?);
    } else {
        print!("{}", format_plan(&plan));
    }
    Ok(())
}

/// Handle the verify command: compare the document with persisted metadata
pub async fn handle_verify(input: &str, settings: Option<&Path>) -> Result<bool, CliError> {
    let document = load_document(input)?;
    let settings = resolve_settings(settings, Some(&document))?;
    let drift = reconciler(&settings).await?.verify(&document).await?;
    print!("{}", format_drift(&drift));
    Ok(drift.is_empty())
}
