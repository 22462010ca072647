#![forbid(unsafe_code)]

//! **fabric-manifest-cli** – Declarative event-type manifest management.
//!
//! Authors, validates and compiles the small document naming every
//! `(action, state, major)` triple a service declares at startup. This
//! tool lets an operator build that document by hand instead of
//! hand-writing `CanonicalEventTypeEntry` literals in Rust source.

mod cli;
mod error;
mod manifest;
mod validation;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use error::ManifestError;
use manifest::ManifestManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level.to_string())?;

    info!("starting fabric-manifest-cli v{}", env!("CARGO_PKG_VERSION"));

    let manager = ManifestManager::new();

    let result: anyhow::Result<()> = match cli.command {
        Commands::Create { file, format, service } => manager.create_manifest(&file, format, service).await.map_err(anyhow::Error::from),
        Commands::Read { file } => manager.read_manifest(&file).await.map_err(anyhow::Error::from),
        Commands::AddEntry { file, action, state, major } => manager.add_entry(&file, action, state, major).await.map_err(anyhow::Error::from),
        Commands::RemoveEntry { file, action, state } => manager.remove_entry(&file, &action, &state).await.map_err(anyhow::Error::from),
        Commands::Validate { file } => manager.validate_manifest(&file).await.map_err(anyhow::Error::from),
        Commands::List { directory } => manager.list_manifests(&directory).await.map_err(anyhow::Error::from),
        Commands::Compile { file } => manager.compile_manifest(&file).await.map_err(anyhow::Error::from),
    };

    match result {
        Ok(()) => {
            info!("command executed successfully");
        }
        Err(e) => {
            error!("command failed: {}", e);
            eprintln!("error: {}", e);

            if let Some(manifest_error) = e.downcast_ref::<ManifestError>() {
                match manifest_error {
                    ManifestError::FileNotFound(path) => {
                        eprintln!("tip: check if the file path '{}' is correct", path.display());
                    }
                    ManifestError::InvalidFormat { .. } => {
                        eprintln!("tip: supported formats are YAML (.yml, .yaml), JSON (.json), and TOML (.toml)");
                    }
                    ManifestError::ValidationError { .. } | ManifestError::InvalidEntry { .. } => {
                        eprintln!("tip: check the manifest's entries for a duplicate or malformed (action, state) pair");
                    }
                    _ => {}
                }
            }

            std::process::exit(1);
        }
    }

    info!("fabric-manifest-cli shutting down");
    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    Ok(())
}
