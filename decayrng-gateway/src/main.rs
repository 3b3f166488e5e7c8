// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! DecayRNG Gateway
//!
//! Connects to the detector's capture server, turns the timestamp stream
//! into debiased symbols and serves them over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   timestamps   ┌──────────────┐  intervals  ┌──────────────┐
//! │   Capture    │ ──────────────>│   Capture    │ ───────────>│    Engine    │
//! │   Server     │     (TCP)      │   Client     │   (mpsc)    │ (one mutex)  │
//! └──────────────┘                └──────────────┘             └──────────────┘
//!                                                                     │
//!                                                             REST API (axum)
//! ```

mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use decayrng_core::{
    calibrator::ResolutionLimit,
    capture::{feed, CaptureClient, CaptureConfig},
    metrics::Metrics,
    retry::RetryPolicy,
    Engine, GatewayConfig, SharedEngine,
};
use routes::AppState;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "decayrng-gateway")]
#[command(about = "DecayRNG Gateway - Serves debiased decay symbols via REST API")]
struct Args {
    /// Path to configuration file (ignored if --env-mode is set)
    #[arg(short, long, default_value = "config/gateway.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load configuration from environment variables instead of file
    #[arg(long, default_value = "false")]
    env_mode: bool,
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::{SIGINT, SIGTERM};
        use signal_hook_tokio::Signals;

        match Signals::new([SIGINT, SIGTERM]) {
            Ok(mut signals) => {
                if let Some(signal) = signals.next().await {
                    info!("Received signal: {:?}", signal);
                }
                return;
            }
            Err(e) => error!("Failed to register signal handlers: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C signal"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("DecayRNG Gateway v{}", decayrng_core::VERSION);

    // Load configuration
    let config = if args.env_mode {
        info!("Loading configuration from environment variables");
        GatewayConfig::from_env().context("Failed to load configuration from environment")?
    } else {
        info!("Loading configuration from file: {:?}", args.config);
        GatewayConfig::from_file(&args.config).context("Failed to load configuration from file")?
    };

    let engine_config = config.engine();
    info!("Listen address: {}", config.listen_address);
    info!("Capture server: {}", config.capture_address);
    info!(
        "Baseline: {} intervals, {} buckets ({} bits), drift check every {} (t > {}), {:?}",
        engine_config.baseline_capacity,
        engine_config.bucket_count(),
        engine_config.symbol_width(),
        engine_config.batch_length,
        engine_config.critical_value,
        engine_config.drift_policy
    );

    let engine = Engine::new(engine_config).context("Invalid engine configuration")?;
    let engine = SharedEngine::new(engine);
    let metrics = Metrics::new();
    let cancel = CancellationToken::new();

    // Capture link -> bounded channel -> engine
    let (tx, rx) = mpsc::channel(config.capture_queue_size);

    let capture_handle = {
        let client = CaptureClient::new(
            CaptureConfig {
                address: config.capture_address.clone(),
                retry_policy: RetryPolicy::new(
                    config.reconnect_initial_backoff(),
                    config.reconnect_max_backoff(),
                ),
            },
            metrics.clone(),
        );
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run(tx, cancel.clone()).await {
                error!("Capture client stopped: {}", e);
                cancel.cancel();
            }
        })
    };

    let feed_handle = {
        let limit =
            ResolutionLimit::new(config.timer_resolution_micros, config.bucket_safety_factor);
        let engine = engine.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match feed(engine, rx, metrics, Some(limit)).await {
                Ok(fed) => info!("Engine fed {} intervals", fed),
                Err(e) => {
                    error!("Engine feeder stopped: {}", e);
                    cancel.cancel();
                }
            }
        })
    };

    let state = AppState {
        engine,
        metrics,
        max_request_size: config.max_request_size,
        metrics_enabled: config.metrics_enabled,
    };
    let app = routes::router(state);

    // Parse listen address
    let addr: std::net::SocketAddr = config
        .listen_address
        .parse()
        .context("Invalid listen address")?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = wait_for_shutdown() => {}
                _ = cancel.cancelled() => {}
            }
            info!("Shutting down...");
            cancel.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    // The client drops its sender on exit, which ends the feeder
    if let Err(e) = capture_handle.await {
        error!("Capture task panicked: {}", e);
    }
    if let Err(e) = feed_handle.await {
        error!("Feeder task panicked: {}", e);
    }

    info!("Gateway shut down gracefully");
    Ok(())
}
