//! Input path validation.
//!
//! Commands check their input files up front so a missing path fails with a
//! clear message instead of surfacing later from the middle of a run.

use std::path::Path;

use crate::errors::{FlowcallError, Result};

/// Validates that a file exists.
///
/// `description` names the file's role in error messages (e.g. "Input
/// wells", "Barcode set").
///
/// # Errors
///
/// Returns an error if the file does not exist.
///
/// # Example
/// ```
/// use flowcall_lib::validation::validate_file_exists;
///
/// let result = validate_file_exists("/nonexistent/chip.rawwells", "Input wells");
/// assert!(result.is_err());
/// ```
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(FlowcallError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "file does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validates that every listed file exists, failing on the first missing one.
///
/// # Errors
///
/// Returns an error for the first file that does not exist.
pub fn validate_files_exist<P: AsRef<Path>>(files: &[(P, &str)]) -> Result<()> {
    for (path, desc) in files {
        validate_file_exists(path, desc)?;
    }
    Ok(())
}
