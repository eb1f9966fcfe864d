//! File format parsers for importing charged particle configurations.
//!
//! Supported formats:
//! - [`.xyz`](xyz): XYZ coordinate files with an optional charge column

pub mod xyz;

use std::path::Path;

use thiserror::Error;

/// Errors during configuration file parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

/// A parsed particle: position, charge and the label it was read with.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParticle {
    /// Position in the file's length unit.
    pub position: [f64; 3],
    /// Charge in elementary charges.
    pub charge: f64,
    /// Element or type label.
    pub label: String,
}

/// Read a configuration file, choosing the parser by extension.
pub fn load(path: &Path) -> Result<Vec<ParsedParticle>, ParseError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xyz") => {
            let content = std::fs::read_to_string(path)?;
            xyz::parse_xyz(&content)
        }
        Some(ext) => Err(ParseError::UnsupportedFormat(ext.to_string())),
        None => Err(ParseError::UnsupportedFormat(format!(
            "{} has no extension",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension_rejected() {
        let err = load(Path::new("ions.pdb")).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
        assert!(load(Path::new("ions")).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/ions.xyz")).unwrap_err();
        assert!(matches!(err, ParseError::IoError(_)));
    }
}
