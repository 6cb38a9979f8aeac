// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use fpg_config::load_config;
use fpg_daemon::{AppState, build_app, kbwatch};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fpg-daemon", version, about = "Fingerprint gateway daemon")]
struct Args {
    /// Bind address; overrides the configured value.
    #[arg(long)]
    bind: Option<String>,

    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable request/engine debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug,hyper=info,h2=info")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(args.config.as_deref()).context("load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    for warning in config.validate().context("validate configuration")? {
        warn!(%warning, "configuration warning");
    }

    fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("create temp dir {}", config.temp_dir))?;

    let state = Arc::new(AppState::new(Arc::new(config)));

    // Keeps KB/engine version metadata fresh for /kb/details and the
    // compatibility check.
    kbwatch::spawn(state.clone());

    let app = build_app(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("bind {}", state.config.bind_addr))?;
    info!(
        bind = %state.config.bind_addr,
        engine = %state.config.binary_path,
        workers = state.config.workers,
        "fingerprint gateway listening"
    );

    axum::serve(listener, app).await.context("serve")
}
