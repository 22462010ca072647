//! Error types for manifest management operations.
//!
//! Structured error handling with meaningful context for file operations,
//! format parsing, validation, and I/O.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for manifest management operations.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest file not found at the specified path.
    #[error("manifest file not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid or unsupported manifest file format.
    #[error("invalid manifest format for file '{file}': {reason}")]
    InvalidFormat {
        /// The file path that caused the error
        file: PathBuf,
        /// Detailed reason for the format error
        reason: String,
    },

    /// Manifest content failed validation.
    #[error("manifest validation failed for '{file}': {details}")]
    ValidationError {
        /// The file path that failed validation
        file: PathBuf,
        /// Detailed validation error information
        details: String,
    },

    /// Failed to parse manifest content.
    #[error("failed to parse manifest in '{file}': {source}")]
    ParseError {
        /// The file path that failed to parse
        file: PathBuf,
        /// The underlying parsing error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File I/O operation failed.
    #[error("I/O error for file '{file}': {source}")]
    IoError {
        /// The file path involved in the I/O operation
        file: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Entry not found in the manifest.
    #[error("entry {action:?}/{state:?} not found in manifest '{file}'")]
    EntryNotFound {
        /// The action name that was not found
        action: String,
        /// The lifecycle state that was not found
        state: String,
        /// The file where the entry was searched
        file: PathBuf,
    },

    /// An entry's shape did not satisfy the canonical registry's invariants.
    #[error("invalid entry {action:?}/{state:?}: {reason}")]
    InvalidEntry {
        /// The offending action name
        action: String,
        /// The offending lifecycle state string
        state: String,
        /// Reason the entry is invalid
        reason: String,
    },

    /// Failed to serialize manifest data.
    #[error("failed to serialize manifest to '{format}' format: {source}")]
    SerializationError {
        /// The target format for serialization
        format: String,
        /// The underlying serialization error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Directory operation failed.
    #[error("directory operation failed for '{directory}': {reason}")]
    DirectoryError {
        /// The directory path that caused the error
        directory: PathBuf,
        /// Detailed reason for the directory error
        reason: String,
    },
}

impl ManifestError {
    /// Create a new file-not-found error.
    pub fn file_not_found(path: PathBuf) -> Self {
        Self::FileNotFound(path)
    }

    /// Create a new invalid-format error with context.
    pub fn invalid_format<P: Into<PathBuf>, S: Into<String>>(file: P, reason: S) -> Self {
        Self::InvalidFormat { file: file.into(), reason: reason.into() }
    }

    /// Create a new validation error with details.
    pub fn validation_error<P: Into<PathBuf>, S: Into<String>>(file: P, details: S) -> Self {
        Self::ValidationError { file: file.into(), details: details.into() }
    }

    /// Create a new parse error with source.
    pub fn parse_error<P: Into<PathBuf>, E: std::error::Error + Send + Sync + 'static>(file: P, source: E) -> Self {
        Self::ParseError { file: file.into(), source: Box::new(source) }
    }

    /// Create a new I/O error with file context.
    pub fn io_error<P: Into<PathBuf>>(file: P, source: std::io::Error) -> Self {
        Self::IoError { file: file.into(), source }
    }

    /// Create a new entry-not-found error.
    pub fn entry_not_found<A: Into<String>, S: Into<String>, P: Into<PathBuf>>(action: A, state: S, file: P) -> Self {
        Self::EntryNotFound { action: action.into(), state: state.into(), file: file.into() }
    }

    /// Create a new invalid-entry error.
    pub fn invalid_entry<A: Into<String>, S: Into<String>, R: Into<String>>(action: A, state: S, reason: R) -> Self {
        Self::InvalidEntry { action: action.into(), state: state.into(), reason: reason.into() }
    }

    /// Create a new serialization error.
    pub fn serialization_error<F: Into<String>, E: std::error::Error + Send + Sync + 'static>(format: F, source: E) -> Self {
        Self::SerializationError { format: format.into(), source: Box::new(source) }
    }

    /// Create a new directory error.
    pub fn directory_error<P: Into<PathBuf>, R: Into<String>>(directory: P, reason: R) -> Self {
        Self::DirectoryError { directory: directory.into(), reason: reason.into() }
    }

    /// Whether this error indicates a missing file.
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }

    /// Whether this error indicates a validation problem.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::ValidationError { .. })
    }
}

/// Result alias for manifest operations.
pub type Result<T> = std::result::Result<T, ManifestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_construction_and_predicates() {
        let path = PathBuf::from("manifest.yaml");

        let error = ManifestError::file_not_found(path.clone());
        assert!(error.is_file_not_found());
        assert!(!error.is_validation_error());

        let error = ManifestError::validation_error(&path, "duplicate entry");
        assert!(error.is_validation_error());
        assert!(!error.is_file_not_found());
    }

    #[test]
    fn error_display_includes_path() {
        let path = PathBuf::from("manifest.json");
        let error = ManifestError::file_not_found(path);
        let text = error.to_string();
        assert!(text.contains("manifest file not found"));
        assert!(text.contains("manifest.json"));
    }

    #[test]
    fn invalid_entry_error_carries_all_three_fields() {
        let error = ManifestError::invalid_entry("create_product", "bogus", "unknown lifecycle state");
        match error {
            ManifestError::InvalidEntry { action, state, reason } => {
                assert_eq!(action, "create_product");
                assert_eq!(state, "bogus");
                assert_eq!(reason, "unknown lifecycle state");
            }
            _ => panic!("expected InvalidEntry"),
        }
    }
}
