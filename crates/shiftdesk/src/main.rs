//! Shiftdesk: shift table sync cache server
//!
//! Main binary with subcommands:
//! - `serve`: HTTP API backed by the process-wide sync cache
//! - `snapshot`: Print the stored shift table document once

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shiftdesk_cache::SyncConfig;
use shiftdesk_store::{DocumentStore, HttpDocumentStore, MemoryStore};

mod serve;

#[derive(Parser)]
#[command(name = "shiftdesk")]
#[command(about = "Shift table sync cache server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where shift tables are stored.
#[derive(Args, Debug)]
struct StoreArgs {
    /// Document store base URL
    #[arg(long, env = "SHIFTDESK_STORE_URL", required_unless_present = "in_memory")]
    store_url: Option<String>,

    /// Keep documents in process memory instead of a remote store
    #[arg(long, conflicts_with = "store_url")]
    in_memory: bool,
}

impl StoreArgs {
    fn open(&self) -> Result<Arc<dyn DocumentStore>> {
        match &self.store_url {
            Some(url) if !self.in_memory => {
                let store =
                    HttpDocumentStore::new(url.as_str()).map_err(|e| miette::miette!("{}", e))?;
                Ok(Arc::new(store))
            }
            _ => {
                tracing::warn!("using in-memory document store, data is lost on exit");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        #[command(flatten)]
        store: StoreArgs,

        /// HTTP server port
        #[arg(long, env = "SHIFTDESK_PORT", default_value = "3000")]
        port: u16,

        /// Recognized countries, comma separated
        #[arg(
            long,
            env = "SHIFTDESK_COUNTRIES",
            value_delimiter = ',',
            default_value = "Egypt,Morocco"
        )]
        countries: Vec<String>,

        /// Static files directory
        #[arg(long)]
        static_dir: Option<String>,

        /// Periodic sync interval in seconds
        #[arg(long, env = "SHIFTDESK_SYNC_INTERVAL", default_value = "30")]
        sync_interval: u64,

        /// Quiet period after a path update before syncing, in milliseconds
        #[arg(long, env = "SHIFTDESK_DEBOUNCE_MS", default_value = "1000")]
        debounce_ms: u64,

        /// Store calls per sync step before giving up
        #[arg(long, env = "SHIFTDESK_MAX_ATTEMPTS", default_value = "3")]
        max_attempts: u32,
    },

    /// Print the stored shift table document as JSON
    Snapshot {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "shiftdesk=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            store,
            port,
            countries,
            static_dir,
            sync_interval,
            debounce_ms,
            max_attempts,
        } => {
            let config = SyncConfig::default()
                .with_countries(countries)
                .with_sync_interval(Duration::from_secs(sync_interval))
                .with_debounce(Duration::from_millis(debounce_ms))
                .with_max_attempts(max_attempts);
            serve::run(store.open()?, config, port, static_dir.as_deref()).await?;
        }
        Commands::Snapshot { store } => {
            print_snapshot(store.open()?.as_ref()).await?;
        }
    }

    Ok(())
}

async fn print_snapshot(store: &dyn DocumentStore) -> Result<()> {
    let config = SyncConfig::default();
    let document = store
        .load_document(&config.collection, &config.document_id)
        .await
        .map_err(|e| miette::miette!("failed to load snapshot: {}", e))?;

    let json = serde_json::to_string_pretty(&document).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", json);
    Ok(())
}
