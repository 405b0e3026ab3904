//! BOOKIE — Dynamic-Parimutuel Bet Settlement Service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite store, and serves the settlement API with
//! graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use bookie::api;
use bookie::config::AppConfig;
use bookie::ledger::{Ledger, LedgerConfig};
use bookie::store::Store;

const BANNER: &str = r#"
 ____    ___    ___   _  __ ___  _____
| __ )  / _ \  / _ \ | |/ /|_ _|| ____|
|  _ \ | | | || | | || ' /  | | |  _|
| |_) || |_| || |_| || . \  | | | |___
|____/  \___/  \___/ |_|\_\|___||_____|

  Dynamic-Parimutuel Bet Settlement Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        port = cfg.service.port,
        store = %cfg.store.path,
        "BOOKIE starting up"
    );

    // -- Store -------------------------------------------------------------

    let store = Store::open(&cfg.store).await?;
    if cfg.store.seed_demo {
        store.seed_demo().await?;
    }

    // -- Ledger ------------------------------------------------------------

    let ledger_config = LedgerConfig {
        max_retries: cfg.settlement.max_retries,
        retry_backoff: Duration::from_millis(cfg.settlement.retry_backoff_ms),
        deadline: Duration::from_millis(cfg.settlement.deadline_ms),
    };
    let state: api::AppState = Arc::new(Ledger::new(store, ledger_config));

    // -- Serve -------------------------------------------------------------

    api::serve(state, cfg.service.port).await?;

    info!("BOOKIE shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bookie=info"));

    let json_logging = std::env::var("BOOKIE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
