// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FireRunner - Ephemeral GitLab CI runners on flintlock microVMs
//!
//! Receives GitLab webhook events, provisions a fresh microVM per build,
//! registers a one-shot runner inside it, watches the build to completion,
//! and tears everything down again.

use std::time::Duration;

use tracing::{info, warn};

use firerunner::config::{Config, LoggingConfig};
use firerunner::runtime::OrchestratorRuntime;

/// Bound on the whole graceful shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("firerunner: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load .env before the config so env overrides see it.
    let dotenv_missing = dotenvy::dotenv().err();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FIRERUNNER_CONFIG").ok())
        .unwrap_or_else(|| "config.yaml".to_string());

    let (config, config_loaded) = if std::path::Path::new(&config_path).exists() {
        (Config::load(&config_path)?, true)
    } else {
        let mut config = Config::default();
        config.apply_env_overrides();
        (config, false)
    };

    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting FireRunner");
    if let Some(e) = dotenv_missing {
        warn!("No .env file loaded: {e}");
    }
    if config_loaded {
        info!(path = %config_path, "Configuration loaded");
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
    }

    let runtime = OrchestratorRuntime::start(config).await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown(SHUTDOWN_TIMEOUT).await?;

    info!("FireRunner shut down");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));

    if logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
