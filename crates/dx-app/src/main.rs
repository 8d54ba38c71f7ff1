//! Command-line host for the data explorer adapter
//!
//! Plays the Host Portal role: registers a file-backed resource, opens an
//! exploration session on it and prints the payloads the visualization layer
//! would receive.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dx_core::events::events::DegradedScan;
use dx_core::{ResourceDescriptor, TabularStore};
use dx_data::{
    AdapterConfig, AdapterError, AdapterFacade, CsvStore, ResourceCatalog, SqliteStore, UiRequest,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod create_sample_db;

/// explorer - schema inference and windowed paging over tabular files
#[derive(Parser)]
#[command(name = "explorer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Adapter configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a resource and print its first payload
    Open {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Open a resource, then apply page requests in order
    Page {
        #[command(flatten)]
        source: SourceArgs,
        /// Page request as JSON, e.g. '{"limit": 20, "sort": [{"field": "amount", "direction": "desc"}]}'
        #[arg(short, long = "request", required = true)]
        requests: Vec<String>,
    },
    /// Print the inferred columns of a resource
    Describe {
        #[command(flatten)]
        source: SourceArgs,
        /// Order columns by display name
        #[arg(long)]
        sorted: bool,
    },
    /// Write a demo SQLite database
    Demo {
        /// Output database path
        #[arg(default_value = "data/demo.db")]
        path: PathBuf,
        /// Rows per table
        #[arg(short = 'n', long, default_value = "20000")]
        rows: usize,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// CSV/TSV file or SQLite database
    path: PathBuf,

    /// Table to explore when the file is a SQLite database
    #[arg(short, long)]
    table: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Adapter errors get the same envelope the visualization layer would see
            match error.downcast_ref::<AdapterError>() {
                Some(adapter_error) => match serde_json::to_string_pretty(&adapter_error.to_response()) {
                    Ok(body) => println!("{}", body),
                    Err(_) => eprintln!("Error: {}", adapter_error),
                },
                None => eprintln!("Error: {:#}", error),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AdapterConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AdapterConfig::default(),
    };

    match cli.command {
        Commands::Open { source } => {
            let (facade, resource_id) = host(&source, config).await?;
            let payload = facade.open(&resource_id).await?;
            print_json(&payload, cli.pretty)?;
        }
        Commands::Page { source, requests } => {
            let (facade, resource_id) = host(&source, config).await?;
            let mut payload = facade.open(&resource_id).await?;
            for raw in &requests {
                let request: UiRequest =
                    serde_json::from_str(raw).with_context(|| format!("parsing page request {}", raw))?;
                payload = facade.page(&payload.cursor, &request).await?;
                print_json(&payload, cli.pretty)?;
            }
            facade.close(&payload.cursor)?;
        }
        Commands::Describe { source, sorted } => {
            let (facade, resource_id) = host(&source, config).await?;
            let columns = facade.describe(&resource_id, sorted).await?;
            print_json(&columns, cli.pretty)?;
        }
        Commands::Demo { path, rows } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            create_sample_db::create_sample_database(&path, rows)?;
            println!(
                "Wrote {} with tables: {}",
                path.display(),
                create_sample_db::DEMO_TABLES.join(", ")
            );
        }
    }
    Ok(())
}

/// Register the source in a catalog and build a facade over it
async fn host(source: &SourceArgs, config: AdapterConfig) -> Result<(AdapterFacade, String)> {
    let (descriptor, store) = load_store(source, &config).await?;
    let resource_id = descriptor.id.clone();

    let catalog = ResourceCatalog::new();
    catalog.register(descriptor, store);

    let facade = AdapterFacade::new(Arc::new(catalog), config)?;
    facade.events().subscribe_fn::<DegradedScan, _>(|scan| {
        info!(
            "Scanned {} rows of '{}' to evaluate the request locally",
            scan.rows_scanned, scan.store
        );
    });
    Ok((facade, resource_id))
}

async fn load_store(
    source: &SourceArgs,
    config: &AdapterConfig,
) -> Result<(ResourceDescriptor, Arc<dyn TabularStore>)> {
    let path = &source.path;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("resource")
        .to_string();

    match extension.as_str() {
        "csv" | "tsv" => {
            if source.table.is_some() {
                warn!("--table is ignored for {} files", extension);
            }
            let store = CsvStore::open_with(path, config.null_config.clone()).await?;
            info!("Loaded {} ({} columns)", file_name, store.headers().len());
            Ok((
                ResourceDescriptor::new(file_name).with_format(extension),
                Arc::new(store),
            ))
        }
        "db" | "sqlite" | "sqlite3" => {
            let table = match &source.table {
                Some(table) => table.clone(),
                None => first_table(path).await?,
            };
            let store = SqliteStore::open(path, table.clone()).await?;
            Ok((
                ResourceDescriptor::new(format!("{}:{}", file_name, table)).with_datastore(true),
                Arc::new(store),
            ))
        }
        other => bail!("unsupported file type '{}' (expected csv, tsv or a SQLite database)", other),
    }
}

async fn first_table(path: &Path) -> Result<String> {
    let tables = SqliteStore::list_tables(path).await?;
    match tables.into_iter().next() {
        Some(table) => {
            info!("No --table given; exploring '{}'", table);
            Ok(table)
        }
        None => bail!("{} contains no tables", path.display()),
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let body = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", body);
    Ok(())
}
