//! Key ledger HTTP server.
//!
//! Serves key issuance, key validation and referral code redemption over a
//! SQLite ledger file.
//!
//! Usage:
//!   keyledger-server --db ledger.db --port 8080 --pricing tiers.json

use anyhow::{Context, Result};
use clap::Parser;
use keyledger_core::{KeyLedger, LedgerConfig, RedemptionPolicy};
use keyledger_server::{AppState, build_router, load_or_generate_signer};
use keyledger_types::PricingCatalog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keyledger-server")]
#[command(about = "Key issuance and redemption ledger server")]
struct Args {
    /// Path to the ledger database file
    #[arg(short, long, default_value = "keyledger.db")]
    db: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// HTTP port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// JSON pricing catalog; the standard tiers are used when omitted
    #[arg(long)]
    pricing: Option<PathBuf>,

    /// JSON ledger configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the Ed25519 signing seed (created on first start)
    #[arg(short, long, default_value = "keyledger-signing.key")]
    signing_key: PathBuf,

    /// Time budget for one request, in milliseconds
    #[arg(long, default_value = "2000")]
    request_timeout_ms: u64,

    /// Let an account redeem the same referral code more than once
    #[arg(long)]
    allow_repeat_redemption: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Key ledger starting...");

    let mut config = match &args.config {
        Some(path) => LedgerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    if args.allow_repeat_redemption {
        config.redemption_policy = RedemptionPolicy::Unrestricted;
    }

    let catalog = match &args.pricing {
        Some(path) => PricingCatalog::from_json_file(path)
            .with_context(|| format!("Failed to load pricing from {}", path.display()))?,
        None => {
            warn!("No pricing file given, using the standard tiers");
            PricingCatalog::standard()
        }
    };

    let signer = load_or_generate_signer(&args.signing_key)?;
    let ledger = KeyLedger::open(&args.db, catalog, signer, &config)
        .with_context(|| format!("Failed to open ledger at {}", args.db.display()))?;
    info!(
        db = %args.db.display(),
        tiers = ledger.pricing().len(),
        policy = ?config.redemption_policy,
        "Ledger opened"
    );

    let state = Arc::new(AppState {
        ledger,
        request_timeout: Duration::from_millis(args.request_timeout_ms),
    });
    let app = build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    info!("Key ledger stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
