// src/main.rs

//! The main entry point for the mediarelay RTMP control plane.

use anyhow::{Context, Result};
use mediarelay::config::Config;
use mediarelay::connection::{ConnSettings, DefaultWorker, NoopPathManager};
use mediarelay::core::conn_id::SystemRandom;
use mediarelay::core::metrics::Metrics;
use mediarelay::forward::{ForwardTable, TcpForwardConnector};
use mediarelay::server::{self, RtmpServer, ServerDeps};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("mediarelay version {VERSION}");
        return Ok(());
    }

    // It can be provided via a --config flag; otherwise, it defaults to "mediarelay.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("mediarelay.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    if let Some(i) = args.iter().position(|arg| arg == "--address") {
        match args.get(i + 1) {
            Some(addr) => config.rtmp_address = addr.clone(),
            None => {
                eprintln!("--address flag requires a value");
                std::process::exit(1);
            }
        }
        if let Err(e) = config.validate() {
            eprintln!("Invalid --address: {e:#}");
            std::process::exit(1);
        }
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .init();

    for note in config.advisories() {
        warn!("{}", note);
    }

    if let Err(e) = run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let metrics = Arc::new(Metrics::new());

    let connector = Arc::new(TcpForwardConnector::new(config.write_timeout));
    let forwards = Arc::new(ForwardTable::new(&config.forwards, connector)?);
    for rule in &config.forwards {
        info!("Forwarding '{}' to {}", rule.source, rule.destination);
    }

    let deps = ServerDeps {
        worker: Arc::new(DefaultWorker),
        path_manager: Arc::new(NoopPathManager),
        forwards,
        metrics: Some(metrics.clone()),
        random: Arc::new(SystemRandom),
    };
    let rtmp = RtmpServer::open(
        &config.rtmp_address,
        ConnSettings::from(&config),
        deps,
        info_span!("rtmp"),
    )
    .await
    .context("Failed to start the RTMP listener")?;

    let mut http_tasks = JoinSet::new();
    if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.address.parse()?;
        let app = server::metrics_router(metrics.clone());
        http_tasks.spawn(server::run_http_server("Metrics server", addr, app, shutdown.clone()));
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }
    if config.api.enabled {
        let addr: SocketAddr = config.api.address.parse()?;
        let app = server::api_router(rtmp.api());
        http_tasks.spawn(server::run_http_server("API server", addr, app, shutdown.clone()));
    }

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = rtmp.closing() => {
                error!("RTMP listener stopped, shutting down.");
                break;
            }
            Some(res) = http_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("An HTTP server finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: HTTP server failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: HTTP server panicked: {e:?}. Shutting down."); break; }
                }
            }
        }
    }

    shutdown.cancel();
    rtmp.close().await;
    while http_tasks.join_next().await.is_some() {}
    info!("Shutdown complete.");
    Ok(())
}
