//! CLI command definitions and argument parsing.
//!
//! Defines the command-line interface for authoring and compiling a
//! service's declarative event-type manifest.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Declarative event-type manifest management CLI.
#[derive(Parser)]
#[command(name = "fabric-manifest")]
#[command(about = "Declarative event-type manifest management - create, edit, validate and compile a service's canonical action/event-type registry")]
#[command(version)]
pub struct Cli {
    /// Log level for the application
    #[arg(long, default_value = "info")]
    #[arg(value_enum)]
    pub log_level: LogLevel,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available log levels for the application.
#[derive(Clone, ValueEnum)]
pub enum LogLevel {
    /// Trace level logging (most verbose)
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging (default)
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging (least verbose)
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Supported manifest file formats.
#[derive(Clone, Copy, ValueEnum)]
pub enum ManifestFormat {
    /// YAML format (.yml, .yaml)
    Yaml,
    /// JSON format (.json)
    Json,
    /// TOML format (.toml)
    Toml,
}

impl std::fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestFormat::Yaml => write!(f, "yaml"),
            ManifestFormat::Json => write!(f, "json"),
            ManifestFormat::Toml => write!(f, "toml"),
        }
    }
}

/// Available commands for manifest management.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a new, empty manifest file for a service.
    Create {
        /// Path to the manifest file to create
        #[arg(short, long)]
        file: PathBuf,

        /// Format of the manifest file
        #[arg(short = 't', long)]
        #[arg(value_enum)]
        format: ManifestFormat,

        /// Name of the service this manifest declares entries for
        #[arg(short, long)]
        service: String,
    },
    /// Read and display a manifest file
    Read {
        /// Path to the manifest file to read
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Add an `(action, state, major)` entry to a manifest
    AddEntry {
        /// Path to the manifest file
        #[arg(short, long)]
        file: PathBuf,

        /// Action name, e.g. "create_product"
        #[arg(short, long)]
        action: String,

        /// Lifecycle state: requested, started, completed, failed, or cancelled
        #[arg(short = 'S', long)]
        state: String,

        /// Major version of the action's contract
        #[arg(short, long, default_value_t = 1)]
        major: u32,
    },
    /// Remove an `(action, state)` entry from a manifest
    RemoveEntry {
        /// Path to the manifest file
        #[arg(short, long)]
        file: PathBuf,

        /// Action name of the entry to remove
        #[arg(short, long)]
        action: String,

        /// Lifecycle state of the entry to remove
        #[arg(short = 'S', long)]
        state: String,
    },
    /// Validate the syntax and shape of a manifest file
    Validate {
        /// Path to the manifest file to validate
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List all manifest files in a directory
    List {
        /// Directory to search for manifest files
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,
    },
    /// Compile a manifest into its canonical event-type entries
    Compile {
        /// Path to the manifest file to compile
        #[arg(short, long)]
        file: PathBuf,
    },
}
