use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use assetvault_common::ProviderKind;
use assetvault_store::{MigrationOptions, SqliteCatalog, StorageConfig, StorageService};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "assetvault.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Provider-agnostic object storage")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "ASSETVAULT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serve this command from a different provider than the configured one
    #[arg(long)]
    provider: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file through the active provider
    Upload {
        file: PathBuf,
        #[arg(long)]
        folder: Option<String>,
        /// Defaults to a guess from the file extension
        #[arg(long)]
        content_type: Option<String>,
        /// Name recorded in the catalog; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print a time-limited download URL
    Url {
        key: String,
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },
    /// Show the catalog record for a key
    Info { key: String },
    /// Write an object's bytes to a file
    Download { key: String, output: PathBuf },
    /// Soft-delete a key, or remove it permanently with --hard
    Delete {
        key: String,
        #[arg(long)]
        hard: bool,
    },
    /// Undo a soft delete
    Restore { key: String },
    /// List soft-deleted records, newest first
    ListDeleted {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Aggregate usage across providers
    Stats,
    /// List registered providers and the active one
    Providers,
    /// Move one object to another provider
    Migrate { key: String, target: ProviderKind },
    /// Move every live object from one provider to another
    MigrateAll {
        source: ProviderKind,
        target: ProviderKind,
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Permanently remove soft-deleted records past the retention window
    Cleanup,
}

#[derive(Serialize)]
struct ProvidersView {
    active: ProviderKind,
    available: Vec<ProviderKind>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = StorageConfig::load(&args.config)?;
    let catalog = Arc::new(SqliteCatalog::open(&config.catalog_path)?);
    let service = config.build_service(catalog)?;

    if let Some(ref name) = args.provider {
        service.switch_provider(name)?;
    }

    run(&service, args.command).await
}

async fn run(service: &StorageService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Upload { file, folder, content_type, name } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("upload path has no file name")?,
            };
            let content_type = content_type
                .unwrap_or_else(|| mime_guess::from_path(&file).first_or_octet_stream().to_string());
            let record = service
                .upload(Bytes::from(data), &name, &content_type, folder.as_deref())
                .await?;
            print_json(&record)
        }
        Command::Url { key, expires } => {
            println!("{}", service.signed_url(&key, Duration::from_secs(expires)).await?);
            Ok(())
        }
        Command::Info { key } => print_json(&service.file_info(&key).await?),
        Command::Download { key, output } => {
            let data = service.download(&key).await?;
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(key = %key, path = %output.display(), size = data.len(), "Downloaded");
            Ok(())
        }
        Command::Delete { key, hard } => {
            if hard {
                service.hard_delete(&key).await?;
            } else {
                service.soft_delete(&key).await?;
            }
            Ok(())
        }
        Command::Restore { key } => Ok(service.restore(&key).await?),
        Command::ListDeleted { page, limit } => print_json(&service.list_deleted_files(page, limit).await?),
        Command::Stats => print_json(&service.storage_stats().await?),
        Command::Providers => print_json(&ProvidersView {
            active: service.active_provider_name(),
            available: service.available_providers(),
        }),
        Command::Migrate { key, target } => print_json(&service.migrate_file(&key, target).await?),
        Command::MigrateAll { source, target, batch_size, workers } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after in-flight transfers");
                    on_signal.cancel();
                }
            });
            let options = MigrationOptions { batch_size, workers };
            let report = service.migrate_all_files(source, target, options, &cancel).await?;
            print_json(&report)
        }
        Command::Cleanup => print_json(&service.cleanup_deleted_files().await?),
    }
}
