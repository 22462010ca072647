//! Declarative event-type manifest management.
//!
//! A manifest is a small document naming every `(action, state, major)`
//! triple a service is willing to accept or emit — the same shape
//! `fabric_registry::EventTypeRegistry::load` consumes at startup. This
//! module lets an operator author that document by hand in whichever
//! format is convenient and compile it into the canonical registry.

use std::fs;
use std::path::Path;

use fabric_registry::CanonicalEventTypeEntry;
use fabric_types::EventState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cli::ManifestFormat;
use crate::error::{ManifestError, Result};
use crate::validation::{detect_format_from_path, sanitize_path, validate_directory_path, validate_entry, validate_file_path, validate_no_duplicate_entries};

/// One declarative entry: the action's name, the lifecycle state it
/// covers, and the major version of its contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntryDef {
    /// Action name, e.g. `"create_product"`.
    pub action: String,
    /// Lifecycle state string: one of requested/started/completed/failed/cancelled.
    pub state: String,
    /// Major version of the action's contract.
    pub major: u32,
}

/// A service's full declarative event-type manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    /// The service this manifest belongs to.
    pub service: String,
    /// Declared `(action, state, major)` entries.
    #[serde(default)]
    pub entries: Vec<ManifestEntryDef>,
}

impl Manifest {
    fn parse_state(state: &str) -> Option<EventState> {
        match state {
            "requested" => Some(EventState::Requested),
            "started" => Some(EventState::Started),
            "completed" => Some(EventState::Completed),
            "failed" => Some(EventState::Failed),
            "cancelled" => Some(EventState::Cancelled),
            _ => None,
        }
    }

    /// Build the canonical registry entries this manifest declares.
    ///
    /// `CanonicalEventTypeEntry::action` is `&'static str`, so each
    /// deserialized owned action name is leaked once here. The manifest
    /// CLI loads a document and exits (or a service loads one manifest
    /// at startup), so the leak is bounded by process lifetime, the same
    /// tradeoff the registry's own compile-time entries make for free.
    pub fn to_canonical_entries(&self) -> Result<Vec<CanonicalEventTypeEntry>> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let state = Self::parse_state(&entry.state).ok_or_else(|| ManifestError::invalid_entry(&entry.action, &entry.state, "unknown lifecycle state"))?;
            let action: &'static str = Box::leak(entry.action.clone().into_boxed_str());
            out.push(CanonicalEventTypeEntry { action, state, major: entry.major });
        }
        Ok(out)
    }
}

/// Main interface for manifest CRUD and compilation.
pub struct ManifestManager {}

impl ManifestManager {
    /// Create a new manager.
    pub fn new() -> Self {
        debug!("creating new manifest manager");
        Self {}
    }

    /// Create a new, empty manifest file for `service_name`.
    pub async fn create_manifest(&self, file_path: &Path, format: ManifestFormat, service_name: String) -> Result<()> {
        info!(?file_path, %format, "creating manifest");

        let safe_path = sanitize_path(file_path)?;
        validate_file_path(&safe_path, false)?;

        if safe_path.exists() {
            return Err(ManifestError::invalid_format(&safe_path, "file already exists, use add-entry to modify an existing manifest"));
        }

        let manifest = Manifest { service: service_name, entries: Vec::new() };
        let formatted = self.serialize(&manifest, format)?;

        if let Some(parent) = safe_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ManifestError::io_error(parent, e))?;
            }
        }

        fs::write(&safe_path, formatted).map_err(|e| ManifestError::io_error(&safe_path, e))?;

        println!("created manifest: {}", safe_path.display());
        Ok(())
    }

    /// Read and pretty-print a manifest file.
    pub async fn read_manifest(&self, file_path: &Path) -> Result<()> {
        info!(?file_path, "reading manifest");

        let safe_path = sanitize_path(file_path)?;
        let manifest = self.load(&safe_path)?;

        println!("manifest file: {}", safe_path.display());
        println!("service: {}", manifest.service);
        println!("entries: {}", manifest.entries.len());
        let pretty = serde_json::to_string_pretty(&manifest).map_err(|e| ManifestError::serialization_error("json", e))?;
        println!("{pretty}");

        Ok(())
    }

    /// Add an entry to an existing manifest.
    pub async fn add_entry(&self, file_path: &Path, action: String, state: String, major: u32) -> Result<()> {
        info!(?file_path, %action, %state, major, "adding manifest entry");

        validate_entry(&action, &state)?;

        let safe_path = sanitize_path(file_path)?;
        validate_file_path(&safe_path, true)?;
        let mut manifest = self.load(&safe_path)?;

        if manifest.entries.iter().any(|e| e.action == action && e.state == state) {
            return Err(ManifestError::validation_error(&safe_path, format!("entry for action {action:?} state {state:?} already exists")));
        }

        manifest.entries.push(ManifestEntryDef { action: action.clone(), state: state.clone(), major });
        self.save(&safe_path, &manifest)?;

        println!("added entry {action:?}/{state:?} (major {major}) to {}", safe_path.display());
        Ok(())
    }

    /// Remove an entry from an existing manifest.
    pub async fn remove_entry(&self, file_path: &Path, action: &str, state: &str) -> Result<()> {
        info!(?file_path, %action, %state, "removing manifest entry");

        let safe_path = sanitize_path(file_path)?;
        validate_file_path(&safe_path, true)?;
        let mut manifest = self.load(&safe_path)?;

        let before = manifest.entries.len();
        manifest.entries.retain(|e| !(e.action == action && e.state == state));
        if manifest.entries.len() == before {
            return Err(ManifestError::entry_not_found(action, state, &safe_path));
        }

        self.save(&safe_path, &manifest)?;
        println!("removed entry {action:?}/{state:?} from {}", safe_path.display());
        Ok(())
    }

    /// Validate a manifest's shape: parses cleanly, every entry is
    /// well-formed, and no `(action, state)` pair repeats.
    pub async fn validate_manifest(&self, file_path: &Path) -> Result<()> {
        info!(?file_path, "validating manifest");

        let safe_path = sanitize_path(file_path)?;
        validate_file_path(&safe_path, true)?;
        let manifest = self.load(&safe_path)?;

        for entry in &manifest.entries {
            validate_entry(&entry.action, &entry.state)?;
        }
        let pairs: Vec<(String, String)> = manifest.entries.iter().map(|e| (e.action.clone(), e.state.clone())).collect();
        validate_no_duplicate_entries(&pairs)?;

        println!("manifest is valid: {}", safe_path.display());
        println!("service: {}", manifest.service);
        println!("entries: {}", manifest.entries.len());
        Ok(())
    }

    /// List manifest files in a directory alongside a quick validity check.
    pub async fn list_manifests(&self, directory: &Path) -> Result<()> {
        info!(?directory, "listing manifests");

        validate_directory_path(directory)?;
        let entries = fs::read_dir(directory).map_err(|e| ManifestError::io_error(directory, e))?;

        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ManifestError::io_error(directory, e))?;
            let path = entry.path();
            if path.is_file() {
                if let Ok(format) = detect_format_from_path(&path) {
                    let status = if self.load(&path).is_ok() { "valid" } else { "invalid" };
                    manifests.push((path, format, status));
                }
            }
        }

        println!("manifests in: {}", directory.display());
        if manifests.is_empty() {
            println!("  none found");
        } else {
            for (path, format, status) in manifests {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("unknown");
                println!("  [{status}] {name} ({format})");
            }
        }
        Ok(())
    }

    /// Compile a manifest into the canonical `(action, state, major)`
    /// triples a running service would load at startup, and print them.
    pub async fn compile_manifest(&self, file_path: &Path) -> Result<()> {
        info!(?file_path, "compiling manifest");

        let safe_path = sanitize_path(file_path)?;
        validate_file_path(&safe_path, true)?;
        let manifest = self.load(&safe_path)?;
        let canonical = manifest.to_canonical_entries()?;

        println!("compiled {} canonical event type(s) for service {:?}", canonical.len(), manifest.service);
        for entry in &canonical {
            println!("  {}:{}:v{}:{:?}", manifest.service, entry.action, entry.major, entry.state);
        }
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Manifest> {
        let content = fs::read_to_string(path).map_err(|e| ManifestError::io_error(path, e))?;
        let format = detect_format_from_path(path)?;
        self.parse(&content, &format, path)
    }

    fn save(&self, path: &Path, manifest: &Manifest) -> Result<()> {
        let format = match detect_format_from_path(path)?.as_str() {
            "yaml" => ManifestFormat::Yaml,
            "json" => ManifestFormat::Json,
            "toml" => ManifestFormat::Toml,
            _ => return Err(ManifestError::invalid_format(path, "unknown format")),
        };
        let formatted = self.serialize(manifest, format)?;
        fs::write(path, formatted).map_err(|e| ManifestError::io_error(path, e))
    }

    fn parse(&self, content: &str, format: &str, file_path: &Path) -> Result<Manifest> {
        match format {
            "json" => serde_json::from_str(content).map_err(|e| ManifestError::parse_error(file_path, e)),
            "yaml" => serde_yaml::from_str(content).map_err(|e| ManifestError::parse_error(file_path, e)),
            "toml" => toml::from_str(content).map_err(|e| ManifestError::parse_error(file_path, e)),
            _ => Err(ManifestError::invalid_format(file_path, "unsupported format")),
        }
    }

    fn serialize(&self, manifest: &Manifest, format: ManifestFormat) -> Result<String> {
        match format {
            ManifestFormat::Json => serde_json::to_string_pretty(manifest).map_err(|e| ManifestError::serialization_error("json", e)),
            ManifestFormat::Yaml => serde_yaml::to_string(manifest).map_err(|e| ManifestError::serialization_error("yaml", e)),
            ManifestFormat::Toml => toml::to_string_pretty(manifest).map_err(|e| ManifestError::serialization_error("toml", e)),
        }
    }
}

impl Default for ManifestManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager_and_dir() -> (ManifestManager, TempDir) {
        (ManifestManager::new(), TempDir::new().unwrap())
    }

    #[tokio::test]
    async fn create_and_read_manifest_round_trips() {
        let (manager, dir) = manager_and_dir().await;
        let path = dir.path().join("product.yaml");

        manager.create_manifest(&path, ManifestFormat::Yaml, "product".to_string()).await.unwrap();
        assert!(path.exists());

        manager.read_manifest(&path).await.unwrap();
    }

    #[tokio::test]
    async fn add_entry_then_compile() {
        let (manager, dir) = manager_and_dir().await;
        let path = dir.path().join("product.json");

        manager.create_manifest(&path, ManifestFormat::Json, "product".to_string()).await.unwrap();
        manager.add_entry(&path, "create_product".to_string(), "requested".to_string(), 1).await.unwrap();
        manager.add_entry(&path, "create_product".to_string(), "completed".to_string(), 1).await.unwrap();

        manager.compile_manifest(&path).await.unwrap();

        let manifest = manager.load(&path).unwrap();
        assert_eq!(manifest.entries.len(), 2);
        let canonical = manifest.to_canonical_entries().unwrap();
        assert_eq!(canonical.len(), 2);
        assert_eq!(canonical[0].action, "create_product");
    }

    #[tokio::test]
    async fn duplicate_entry_rejected() {
        let (manager, dir) = manager_and_dir().await;
        let path = dir.path().join("product.toml");

        manager.create_manifest(&path, ManifestFormat::Toml, "product".to_string()).await.unwrap();
        manager.add_entry(&path, "create_product".to_string(), "requested".to_string(), 1).await.unwrap();

        let result = manager.add_entry(&path, "create_product".to_string(), "requested".to_string(), 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn remove_missing_entry_errors() {
        let (manager, dir) = manager_and_dir().await;
        let path = dir.path().join("product.yaml");

        manager.create_manifest(&path, ManifestFormat::Yaml, "product".to_string()).await.unwrap();
        let result = manager.remove_entry(&path, "create_product", "requested").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn validate_manifest_reports_success() {
        let (manager, dir) = manager_and_dir().await;
        let path = dir.path().join("product.yaml");

        manager.create_manifest(&path, ManifestFormat::Yaml, "product".to_string()).await.unwrap();
        manager.add_entry(&path, "create_product".to_string(), "requested".to_string(), 1).await.unwrap();

        manager.validate_manifest(&path).await.unwrap();
    }

    #[tokio::test]
    async fn list_manifests_in_directory() {
        let (manager, dir) = manager_and_dir().await;
        manager.create_manifest(&dir.path().join("a.yaml"), ManifestFormat::Yaml, "a".to_string()).await.unwrap();
        manager.create_manifest(&dir.path().join("b.json"), ManifestFormat::Json, "b".to_string()).await.unwrap();
        fs::write(dir.path().join("readme.txt"), "not a manifest").unwrap();

        manager.list_manifests(dir.path()).await.unwrap();
    }
}
