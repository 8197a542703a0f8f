//! # Dripflow — Sequence Automation Engine
//!
//! Trigger-driven drip campaigns over WhatsApp: contacts are enrolled into
//! sequences by CRM events, and a polling scheduler walks each subscription
//! through its steps at the times the step schedules allow.
//!
//! Usage:
//!   dripflow                          # Start engine + ingest (default port 3400)
//!   dripflow --port 8080              # Custom ingest port
//!   dripflow --poll-interval 10       # Faster scheduler polling

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dripflow_core::config::DripflowConfig;
use dripflow_core::traits::{DefinitionStore, MessageGateway, RuntimeStore};
use dripflow_engine::{EnrollmentManager, ReplyReactivator, Scheduler};
use dripflow_gateway::WhatsAppGateway;
use dripflow_store::{SqliteDefinitionStore, SqliteRuntimeStore};

mod ingest;

#[derive(Parser)]
#[command(name = "dripflow", version, about = "Sequence automation engine for drip campaigns")]
struct Cli {
    /// Config file (defaults to ~/.dripflow/config.toml when present)
    #[arg(short, long)]
    config: Option<String>,

    /// Trigger-event ingest port
    #[arg(short, long)]
    port: Option<u16>,

    /// Sequence/template database path
    #[arg(long)]
    definitions_db: Option<String>,

    /// Subscription database path
    #[arg(long)]
    runtime_db: Option<String>,

    /// Seconds between due-subscription polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Max subscriptions processed per poll
    #[arg(long)]
    batch_size: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "dripflow=debug,dripflow_engine=debug,tower_http=debug"
    } else {
        "dripflow=info,dripflow_engine=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => DripflowConfig::load_from(std::path::Path::new(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => DripflowConfig::load().context("loading config")?,
    };

    // CLI flags override the file.
    if let Some(port) = cli.port {
        config.ingest.port = port;
    }
    if let Some(path) = cli.definitions_db {
        config.stores.definitions_db = path;
    }
    if let Some(path) = cli.runtime_db {
        config.stores.runtime_db = path;
    }
    if let Some(secs) = cli.poll_interval {
        config.scheduler.poll_interval_secs = secs;
    }
    if let Some(n) = cli.batch_size {
        config.scheduler.batch_size = n;
    }

    let definitions_db = expand_path(&config.stores.definitions_db);
    let runtime_db = expand_path(&config.stores.runtime_db);
    for path in [&definitions_db, &runtime_db] {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let definitions: Arc<dyn DefinitionStore> = Arc::new(
        SqliteDefinitionStore::open(std::path::Path::new(&definitions_db))
            .with_context(|| format!("opening {definitions_db}"))?,
    );
    let runtime: Arc<dyn RuntimeStore> = Arc::new(
        SqliteRuntimeStore::open(std::path::Path::new(&runtime_db))
            .with_context(|| format!("opening {runtime_db}"))?,
    );
    let gateway: Arc<dyn MessageGateway> = Arc::new(WhatsAppGateway::new(&config.gateway));

    let scheduler = Arc::new(Scheduler::new(
        definitions.clone(),
        runtime.clone(),
        gateway,
        &config.scheduler,
    ));
    let state = ingest::AppState {
        enrollment: Arc::new(EnrollmentManager::new(definitions.clone(), runtime.clone())),
        reactivator: Arc::new(ReplyReactivator::new(definitions, runtime)),
    };

    println!("💧 Dripflow v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   📡 Event Ingest:  http://{}:{}/events/*",
        config.ingest.host, config.ingest.port
    );
    println!("   🗄️  Definitions:   {definitions_db}");
    println!("   🗄️  Runtime:       {runtime_db}");
    println!(
        "   ⏱️  Scheduler:     every {}s, batches of {}",
        config.scheduler.poll_interval_secs, config.scheduler.batch_size
    );
    println!();

    tokio::spawn(scheduler.run_loop());

    let addr = format!("{}:{}", config.ingest.host, config.ingest.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, ingest::router(state))
        .await
        .context("ingest server")?;

    Ok(())
}
