//! Safety utilities to prevent clobbering the catalog with a report.
//!
//! The CLI writes JSON reports next to the catalog it reads. These checks
//! refuse report paths that could overwrite a source database.

use anyhow::{bail, Result};
use std::path::Path;

/// Extensions that always denote a database, never a report
const DATABASE_EXTENSIONS: [&str; 4] = ["sqlite3", "sqlite", "db", "db3"];

/// Validates that a report path is safe to overwrite.
///
/// Checks:
/// - Output file must have the required extension (e.g., "json")
/// - Output cannot be the same as any of the provided source paths
/// - Output cannot carry a database extension
pub fn validate_output_path(output: &Path, required_extension: &str, source_paths: &[&Path]) -> Result<()> {
    let extension = output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if DATABASE_EXTENSIONS.contains(&extension.as_str()) {
        bail!(
            "Safety check failed: output '{}' looks like a database file",
            output.display()
        );
    }

    if extension != required_extension.to_ascii_lowercase() {
        bail!(
            "Safety check failed: output file '{}' must end in '.{}'",
            output.display(),
            required_extension
        );
    }

    for source in source_paths {
        if same_file(output, source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    Ok(())
}

/// Path equality, resolving symlinks and relative parts when both exist.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_report_path() {
        let output = PathBuf::from("/tmp/duplicates-report.json");
        let source = PathBuf::from("/data/catalog.sqlite3");
        assert!(validate_output_path(&output, "json", &[&source]).is_ok());
    }

    #[test]
    fn test_wrong_extension() {
        let output = PathBuf::from("/tmp/report.txt");
        let source = PathBuf::from("/data/catalog.sqlite3");
        let result = validate_output_path(&output, "json", &[&source]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must end in '.json'"));
    }

    #[test]
    fn test_output_equals_source() {
        let path = PathBuf::from("/data/catalog.json");
        let result = validate_output_path(&path, "json", &[&path]);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as source"));
    }

    #[test]
    fn test_database_extension_blocked() {
        let output = PathBuf::from("/tmp/catalog.sqlite3");
        let source = PathBuf::from("/data/other.sqlite3");
        let result = validate_output_path(&output, "sqlite3", &[&source]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("looks like a database"));
    }
}
