use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldcache::{CacheConfig, MemoryOptions, OperationType, RemoteOptions, StorageConfig};
use fieldcache_demo::script::{self, Invocation};
use fieldcache_demo::{scenario, DataStore, Gateway};

#[derive(Parser)]
#[command(name = "fieldcache-demo")]
#[command(about = "Users and groups served through a field-level cache", long_about = None)]
struct Cli {
    /// Storage backend, `memory` or `remote` (overrides CACHE_STORAGE_TYPE)
    #[arg(long, global = true)]
    storage: Option<String>,

    /// Default TTL in seconds (overrides CACHE_DEFAULT_TTL)
    #[arg(long, global = true)]
    ttl: Option<u64>,

    /// Memory store capacity (overrides CACHE_STORAGE_MEMORY_SIZE)
    #[arg(long, global = true)]
    max_entries: Option<usize>,

    /// Artificial latency of every user lookup, in milliseconds
    #[arg(long, global = true, default_value_t = 0)]
    latency_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in walkthrough and print each step
    Scenario,

    /// Run invocations from a script file, or stdin
    Script {
        /// Path to the script
        file: Option<PathBuf>,
    },

    /// Execute a single root field
    Field {
        /// `query` or `mutation`
        operation: String,

        /// Field name, e.g. `users`
        field: String,

        /// Arguments as a JSON object
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "fieldcache=info,fieldcache_demo=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(
        "Starting with {} storage, ttl {}s",
        config.storage.kind(),
        config.ttl_seconds
    );

    let data = DataStore::seeded().with_user_latency(Duration::from_millis(cli.latency_ms));
    let gateway = Gateway::new(config, data)
        .await
        .context("failed to build cache")?;

    match cli.command {
        Commands::Scenario => {
            let report = scenario::run(&gateway).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Script { file } => {
            let invocations = script::read_script(file.as_deref())
                .context("failed to load script")?;
            let outcomes = script::run(&gateway, &invocations).await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            println!("{}", serde_json::to_string_pretty(&gateway.cache().stats())?);
        }
        Commands::Field {
            operation,
            field,
            args,
        } => {
            let operation: OperationType = operation.parse().map_err(|e: String| anyhow!(e))?;
            let arguments = script::parse_arguments(args.as_deref().unwrap_or(""))
                .map_err(|e| anyhow!(e))?;
            let outcome = script::run_one(
                &gateway,
                &Invocation {
                    operation,
                    field,
                    arguments,
                },
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = CacheConfig::from_env()?;

    // Switching kinds starts from defaults; env options for the same kind are kept
    let storage = cli.storage.as_deref().map(|kind| match kind {
        "redis" => "remote",
        other => other,
    });
    match storage {
        None => {}
        Some(kind) if kind == config.storage.kind() => {}
        Some("memory") => config.storage = StorageConfig::Memory(MemoryOptions::default()),
        Some("remote") => config.storage = StorageConfig::Remote(RemoteOptions::default()),
        Some(other) => return Err(anyhow!("unknown storage '{}'", other)),
    }

    if let Some(ttl) = cli.ttl {
        config.ttl_seconds = ttl;
    }
    if let Some(max_entries) = cli.max_entries {
        match &mut config.storage {
            StorageConfig::Memory(memory) => memory.max_entries = max_entries,
            StorageConfig::Remote(_) => {
                return Err(anyhow!("--max-entries only applies to memory storage"))
            }
        }
    }

    config.validate()?;
    Ok(config)
}
