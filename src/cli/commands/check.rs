//! Check and current command implementations

use crate::cli::commands::load_document;
use crate::cli::error::CliError;
use crate::codec::YamlCodec;
use crate::reconcile;

/// Handle the check command: parse the document and validate every table
/// and endpoint without contacting a database
pub fn handle_check(input: &str) -> Result<(), CliError> {
    let document = load_document(input)?;
    let normalized = document.normalized()?;
    for table in normalized.tables().values() {
        table.validate()?;
    }
    for name in normalized.end_points().keys() {
        normalized.check_end_point(name)?;
    }
    println!(
        "Document is valid: {} table(s), {} endpoint(s)",
        normalized.tables().len(),
        normalized.end_points().len()
    );
    Ok(())
}

/// Handle the current command: print the normalized document
pub fn handle_current(input: &str) -> Result<(), CliError> {
    let document = load_document(input)?;
    let outcome = reconcile::current(&document, &YamlCodec)?;
    print!("{}", outcome.document);
    Ok(())
}
