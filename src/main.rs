//! zmt - Z-Stack monitor and test bridge
//!
//! Serves the MT protocol over TCP in front of a simulated network stack,
//! with the internal RPC engine running alongside.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use zmt_core::{Engine, SimulatedStack};
use zmt_server::{
    build_dispatch_table, run_metrics_server, CallbackForwarder, CallbackMask, Config, Metrics,
    Server, ServerConfig,
};

/// How often engine counters are copied into the metrics gauges.
const ENGINE_STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if ZMT_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("ZMT_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("ZMT_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting zmt");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!(
        "  Subsystems: {}",
        config
            .mt
            .subsystems
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(",")
    );
    tracing::info!("  Max payload: {} bytes", config.mt.max_payload);
    match config.rpc.timeout_ms {
        Some(ms) => tracing::info!("  RPC timeout: {} ms", ms),
        None => tracing::info!("  RPC timeout: none"),
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Metrics
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        let metrics_clone = metrics.clone();
        let addr = config.metrics.bind_addr;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics_clone, shutdown_rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
        tracing::info!("  Metrics: enabled on {}", addr);
        Some(metrics)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    // Simulated stack and the engine serving in-process RPC
    let stack = SimulatedStack::new(&config.device);
    let (engine, engine_handle) = Engine::new(config.rpc.engine_config(), stack.clone());
    let engine = engine.with_events(stack.subscribe());
    let engine_task = tokio::spawn(engine.run(shutdown_tx.subscribe()));

    if let Some(ref metrics) = metrics {
        let metrics = metrics.clone();
        let handle = engine_handle.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ENGINE_STATS_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => metrics.update_engine_stats(&handle.stats()),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Dispatch table and MT bridge
    let mask = Arc::new(CallbackMask::new(&config.mt.callbacks));
    let table = build_dispatch_table(stack.clone(), mask.clone(), &config.mt, metrics.clone())?;
    tracing::info!("  Capabilities: 0x{:04X}", table.capabilities());

    let mut server_config = ServerConfig::new(config.network.bind_addr);
    server_config.idle_timeout = config.network.idle_timeout();
    server_config.max_connections = config.network.max_connections;
    if let Some(ref metrics) = metrics {
        server_config = server_config.with_metrics(metrics.clone());
    }
    let server = Arc::new(Server::new(
        server_config,
        table,
        stack.event_sender(),
        CallbackForwarder::new(mask, metrics),
    ));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_all = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        let _ = shutdown_all.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    let _ = shutdown_tx.send(());
    let _ = engine_task.await;

    tracing::info!("Server stopped");
    Ok(())
}
