//! Command-line host for the SwKit offline worker.
//!
//! Loads a worker config, runs the worker against a disk-backed cache and
//! the real network, and exposes its entry points as subcommands.
//!
//! ## Usage
//!
//! ```bash
//! # Precache and activate the configured generation
//! swkit --config worker.json start
//!
//! # Dispatch one request through the active generation
//! swkit --config worker.json fetch /images/hero.png
//! swkit --config worker.json fetch /menu.html --navigate
//!
//! # List generations on disk
//! swkit --config worker.json stores
//!
//! # Show the notification a push would display
//! swkit --config worker.json push "Lunch menu is live"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use swkit_common::{init_logging, LogConfig, LogFormat};
use swkit_net::{Destination, HttpFetcher, LoaderConfig, Request};
use swkit_worker::{CacheStorage, FetchOutcome, OfflineWorker, WorkerConfig};
use tracing::debug;

const DEFAULT_STORAGE_DIR: &str = ".swkit-cache";

#[derive(Parser)]
#[command(name = "swkit")]
#[command(about = "Run the SwKit offline worker against a site")]
struct Cli {
    /// Worker config file
    #[arg(short, long, global = true, default_value = "swkit.json")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Compact)]
    log_format: Format,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => LogFormat::Pretty,
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the configured generation
    Start,

    /// Dispatch one request through the active generation
    Fetch {
        /// Path on the worker's origin
        path: String,
        /// Treat the request as a navigation
        #[arg(long)]
        navigate: bool,
        /// Destination category (image, font, style, script, document, other)
        #[arg(long)]
        destination: Option<Destination>,
    },

    /// List cache generations in storage
    Stores,

    /// Show the notification a push message would display
    Push {
        /// Push payload text
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format.into()));

    let config = Arc::new(WorkerConfig::from_file(&cli.config)?);
    debug!(config = %cli.config.display(), version = %config.version, "Loaded worker config");

    let storage = Arc::new(open_storage(&config).await?);
    let mut loader = LoaderConfig::default();
    if let Some(timeout) = config.fetch_timeout() {
        loader.default_timeout = timeout;
    }
    let fetcher = Arc::new(HttpFetcher::new(loader)?);
    let (worker, _events) = OfflineWorker::new(config.clone(), storage.clone(), fetcher)?;

    match cli.command {
        Commands::Start => start(&worker).await?,

        Commands::Fetch {
            path,
            navigate,
            destination,
        } => {
            if !worker.resume().await? {
                return Err(format!(
                    "no cache for {}; run `swkit start` first",
                    config.version
                )
                .into());
            }
            let url = config.resolve(&path)?;
            let mut request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            if let Some(destination) = destination {
                request = request.with_destination(destination);
            }
            fetch(&worker, request).await?;
        }

        Commands::Stores => {
            let names = storage.keys().await;
            if names.is_empty() {
                println!("No cache generations");
            }
            for name in names {
                let marker = if name == config.version { "*" } else { " " };
                let entries = storage.entries(&name).await.len();
                println!("{} {} ({} entries)", marker, name, entries);
            }
            println!("Total: {} bytes", storage.usage().await);
        }

        Commands::Push { message } => {
            let notification = worker.push(message.as_deref());
            println!("{}", serde_json::to_string_pretty(&notification)?);
        }
    }

    Ok(())
}

async fn open_storage(config: &WorkerConfig) -> Result<CacheStorage, Box<dyn std::error::Error>> {
    let dir = config
        .storage_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    let mut storage = CacheStorage::open_dir(dir).await?;
    if let Some(quota) = config.quota_bytes {
        storage = storage.with_quota(quota);
    }
    Ok(storage)
}

async fn start(worker: &OfflineWorker) -> Result<(), Box<dyn std::error::Error>> {
    let report = worker.start().await?;

    println!("Precache ({}):", report.precache.generation);
    println!("  Cached: {}", report.precache.cached.len());
    for failure in &report.precache.failed {
        println!("  Failed: {} ({})", failure.url, failure.reason);
    }

    match report.activation {
        Some(activation) => {
            println!("Activated: {}", activation.current);
            for name in &activation.removed {
                println!("  Removed: {}", name);
            }
            for (name, error) in &activation.failed {
                println!("  Not removed: {} ({})", name, error);
            }
        }
        None => println!("Installed, waiting for activation"),
    }
    Ok(())
}

async fn fetch(worker: &OfflineWorker, request: Request) -> Result<(), Box<dyn std::error::Error>> {
    match worker.fetch(request).await? {
        FetchOutcome::Respond(dispatched) => {
            let response = &dispatched.response;
            println!("Source:       {:?}", dispatched.source);
            println!("Status:       {}", response.status);
            println!(
                "Content-Type: {}",
                response.content_type().unwrap_or("(none)")
            );
            println!("Body:         {} bytes", response.body.len());
            if let Some(write) = dispatched.cache_write {
                // Let the detached cache write finish before the process exits.
                write.await?;
            }
        }
        FetchOutcome::Passthrough { request, reason } => {
            println!("Passthrough ({:?}): {}", reason, request.url);
        }
    }
    Ok(())
}
