//! Validation helpers for manifest files and their entries.
//!
//! Path-safety validation is format-agnostic and kept close to the
//! original config-management tool's shape; entry and manifest-body
//! validation are specific to the declarative event-type manifest this
//! CLI manages.

use std::path::{Path, PathBuf};

use crate::error::{ManifestError, Result};

const KNOWN_STATES: &[&str] = &["requested", "started", "completed", "failed", "cancelled"];

/// Validates that a file path is safe and accessible for operations.
pub fn validate_file_path(path: &Path, require_exists: bool) -> Result<()> {
    if path.components().any(|component| matches!(component, std::path::Component::ParentDir)) {
        return Err(ManifestError::invalid_format(path, "path traversal (../) is not allowed for security reasons"));
    }

    if let Some(extension) = path.extension() {
        let ext_str = extension.to_string_lossy().to_lowercase();
        if !matches!(ext_str.as_str(), "yaml" | "yml" | "json" | "toml") {
            return Err(ManifestError::invalid_format(path, format!("unsupported file extension: {ext_str}")));
        }
    } else {
        return Err(ManifestError::invalid_format(path, "file must have a supported extension (.yaml, .yml, .json, .toml)"));
    }

    if require_exists && !path.exists() {
        return Err(ManifestError::file_not_found(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if !parent.exists() {
                return Err(ManifestError::directory_error(parent, "parent directory does not exist"));
            }
            if let Err(error) = std::fs::read_dir(parent) {
                return Err(ManifestError::io_error(parent, error));
            }
        }
    }

    Ok(())
}

/// Validates a directory path for listing operations.
pub fn validate_directory_path(directory: &Path) -> Result<()> {
    if directory.components().any(|component| matches!(component, std::path::Component::ParentDir)) {
        return Err(ManifestError::directory_error(directory, "path traversal (../) is not allowed for security reasons"));
    }
    if !directory.exists() {
        return Err(ManifestError::directory_error(directory, "directory does not exist"));
    }
    if !directory.is_dir() {
        return Err(ManifestError::directory_error(directory, "path exists but is not a directory"));
    }
    if let Err(error) = std::fs::read_dir(directory) {
        return Err(ManifestError::io_error(directory, error));
    }
    Ok(())
}

/// Determines the manifest format from a file extension.
pub fn detect_format_from_path(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .ok_or_else(|| ManifestError::invalid_format(path, "file must have an extension to determine format"))?
        .to_string_lossy()
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => Ok("yaml".to_string()),
        "json" => Ok("json".to_string()),
        "toml" => Ok("toml".to_string()),
        _ => Err(ManifestError::invalid_format(path, format!("unsupported file extension: {extension}"))),
    }
}

/// Sanitizes a file path by resolving it to an absolute, traversal-free path.
pub fn sanitize_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_err(|error| ManifestError::io_error("current directory", error))?.join(path)
    };

    validate_file_path(&absolute_path, false)?;

    Ok(absolute_path)
}

/// Validate a single entry's fields before it is added to a manifest.
///
/// `action` must look like a snake_case identifier and `state` must be
/// one of the five canonical lifecycle states.
pub fn validate_entry(action: &str, state: &str) -> Result<()> {
    if action.is_empty() {
        return Err(ManifestError::invalid_entry(action, state, "action name must not be empty"));
    }
    if action.len() > 64 {
        return Err(ManifestError::invalid_entry(action, state, "action name must not exceed 64 characters"));
    }
    let starts_with_letter = action.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    if !starts_with_letter {
        return Err(ManifestError::invalid_entry(action, state, "action name must start with a lowercase letter"));
    }
    let valid_chars = action.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_chars {
        return Err(ManifestError::invalid_entry(action, state, "action name must be snake_case (lowercase letters, digits, underscores)"));
    }

    if !KNOWN_STATES.contains(&state) {
        return Err(ManifestError::invalid_entry(action, state, format!("unknown lifecycle state, expected one of {KNOWN_STATES:?}")));
    }

    Ok(())
}

/// Validate that a whole manifest body has no duplicate `(action, state)`
/// pairs, which would make the declarative registry ambiguous.
pub fn validate_no_duplicate_entries(entries: &[(String, String)]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for (action, state) in entries {
        if !seen.insert((action.as_str(), state.as_str())) {
            return Err(ManifestError::validation_error(PathBuf::new(), format!("duplicate entry for action {action:?} state {state:?}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_extensions() {
        assert!(detect_format_from_path(Path::new("service.yaml")).is_ok());
        assert!(detect_format_from_path(Path::new("service.json")).is_ok());
        assert!(detect_format_from_path(Path::new("service.toml")).is_ok());
    }

    #[test]
    fn rejects_unsupported_extension() {
        let result = detect_format_from_path(Path::new("service.xml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unsupported"));
    }

    #[test]
    fn rejects_path_traversal() {
        let result = validate_file_path(Path::new("../../etc/service.yaml"), false);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("traversal"));
    }

    #[test]
    fn entry_validation_enforces_snake_case_action() {
        assert!(validate_entry("create_product", "requested").is_ok());
        assert!(validate_entry("CreateProduct", "requested").is_err());
        assert!(validate_entry("1create", "requested").is_err());
        assert!(validate_entry("", "requested").is_err());
    }

    #[test]
    fn entry_validation_rejects_unknown_state() {
        assert!(validate_entry("create_product", "bogus").is_err());
        for state in KNOWN_STATES {
            assert!(validate_entry("create_product", state).is_ok());
        }
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let entries = vec![("create_product".to_string(), "requested".to_string()), ("create_product".to_string(), "requested".to_string())];
        assert!(validate_no_duplicate_entries(&entries).is_err());
    }

    #[test]
    fn distinct_state_for_same_action_is_not_a_duplicate() {
        let entries = vec![("create_product".to_string(), "requested".to_string()), ("create_product".to_string(), "completed".to_string())];
        assert!(validate_no_duplicate_entries(&entries).is_ok());
    }
}
