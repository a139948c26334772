//! TCP server implementation.
//!
//! Each host connection is a byte stream of MT frames. The connection task
//! owns the socket: it decodes requests, dispatches them, and is the only
//! writer for replies and forwarded stack callbacks.

use crate::callbacks::CallbackForwarder;
use crate::dispatch::{subsystem_label, DispatchTable};
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::response::{ChannelSink, ResponseSink};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use zmt_core::{StackEvent, StackEventSender};
use zmt_protocol::{Decoder, Frame, DEFAULT_PORT};

/// Frames queued for a connection's writer.
const OUTBOUND_CAPACITY: usize = 64;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 8,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for the MT interface.
pub struct Server {
    config: ServerConfig,
    table: Arc<DispatchTable>,
    events: StackEventSender,
    forwarder: CallbackForwarder,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

/// Shared state handed to each connection task.
#[derive(Clone)]
struct ConnectionContext {
    table: Arc<DispatchTable>,
    forwarder: CallbackForwarder,
    stats: Arc<ServerStats>,
    config: ServerConfig,
}

impl Server {
    /// Creates a new server.
    ///
    /// `events` is the stack's event channel; every connection subscribes
    /// to it and forwards what the callback mask lets through.
    pub fn new(
        config: ServerConfig,
        table: DispatchTable,
        events: StackEventSender,
        forwarder: CallbackForwarder,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            table: Arc::new(table),
            events,
            forwarder,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();
        let ctx = ConnectionContext {
            table: self.table.clone(),
            forwarder: self.forwarder.clone(),
            stats: self.stats.clone(),
            config: self.config.clone(),
        };

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let ctx = ctx.clone();
                            let events = self.events.subscribe();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    &ctx,
                                    events,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                ctx.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = ctx.config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Host disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        ctx: &ConnectionContext,
        mut events: broadcast::Receiver<StackEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("Host connected: {}", addr);
        stream.set_nodelay(true)?;

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
        let mut sink = ChannelSink::new(out_tx);
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 4096];
        let mut last_activity = Instant::now();
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                Some(frame) = out_rx.recv() => {
                    Self::write_frame(&mut stream, addr, &frame, ctx).await?;
                }

                event = events.recv(), if events_open => {
                    match event {
                        Ok(event) => {
                            if let Some(frame) = ctx.forwarder.frame_for(&event) {
                                sink.send(frame);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("[{}] Callback stream lagged {} events", addr, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("[{}] Stack event channel closed", addr);
                            events_open = false;
                        }
                    }
                }

                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by host", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::debug!("[{}] Received {} bytes", addr, n);
                            last_activity = Instant::now();
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(ctx.config.idle_timeout) => {
                    if last_activity.elapsed() >= ctx.config.idle_timeout {
                        tracing::debug!("[{}] Idle timeout", addr);
                        return Ok(());
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            // Replies go out in request order, before the next request runs
            while let Some(frame) = decoder.decode_frame() {
                ctx.stats.frames_in.fetch_add(1, Ordering::Relaxed);
                if let Some(ref metrics) = ctx.config.metrics {
                    let subsystem = subsystem_label(frame.subsystem);
                    metrics
                        .frames_in_total
                        .with_label_values(&[subsystem.as_str(), frame.frame_type.short_name()])
                        .inc();
                }
                tracing::debug!("[{}] <- {} [{}]", addr, frame, hex::encode(&frame.payload));

                ctx.table.dispatch(&frame, &mut sink);

                while let Ok(reply) = out_rx.try_recv() {
                    Self::write_frame(&mut stream, addr, &reply, ctx).await?;
                }
            }
        }
    }

    async fn write_frame(
        stream: &mut TcpStream,
        addr: SocketAddr,
        frame: &Frame,
        ctx: &ConnectionContext,
    ) -> Result<(), ServerError> {
        let bytes = frame.encode()?;
        tracing::debug!("[{}] -> {} [{}]", addr, frame, hex::encode(&frame.payload));
        stream.write_all(&bytes).await?;

        ctx.stats.frames_out.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = ctx.config.metrics {
            metrics
                .frames_out_total
                .with_label_values(&[frame.frame_type.short_name()])
                .inc();
        }
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver that fires when the server shuts down.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }
}
