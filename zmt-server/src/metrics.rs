//! Prometheus metrics for the zmt server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use zmt_core::engine::EngineStatsSnapshot;

/// Handler duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05];

/// Prometheus metrics for the zmt server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total host connections accepted.
    pub connections_total: Counter,
    /// Currently active host connections.
    pub connections_active: Gauge,
    /// Frames received by subsystem and frame type.
    pub frames_in_total: CounterVec,
    /// Frames written to hosts by frame type.
    pub frames_out_total: CounterVec,
    /// Dispatch results by subsystem and status.
    pub dispatch_total: CounterVec,
    /// Handler duration by subsystem.
    pub handler_duration: HistogramVec,
    /// Callbacks forwarded to hosts by subsystem.
    pub callbacks_forwarded_total: CounterVec,
    /// Stack events not forwarded because the subsystem is unsubscribed.
    pub callbacks_suppressed_total: Counter,
    /// Requests served by the internal engine.
    pub rpc_requests: Gauge,
    /// Engine replies dropped because the caller's inbox was gone or full.
    pub rpc_replies_dropped: Gauge,
    /// Indications delivered to internal tasks.
    pub indications_delivered: Gauge,
    /// Indications dropped at full inboxes.
    pub indications_dropped: Gauge,
    /// Calls made by internal RPC clients.
    pub rpc_calls: Gauge,
    /// Internal RPC calls that gave up waiting for their reply.
    pub rpc_timeouts: Gauge,
    /// Internal RPC calls refused before reaching the engine.
    pub rpc_call_failures: GaugeVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "zmt_connections_total",
            "Total number of host connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "zmt_connections_active",
            "Number of currently active host connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Frames
        let frames_in_total = CounterVec::new(
            Opts::new("zmt_frames_in_total", "Frames received by subsystem and type"),
            &["subsystem", "type"],
        )?;
        registry.register(Box::new(frames_in_total.clone()))?;

        let frames_out_total = CounterVec::new(
            Opts::new("zmt_frames_out_total", "Frames sent by type"),
            &["type"],
        )?;
        registry.register(Box::new(frames_out_total.clone()))?;

        // Dispatch
        let dispatch_total = CounterVec::new(
            Opts::new(
                "zmt_dispatch_total",
                "Dispatch results by subsystem and status",
            ),
            &["subsystem", "status"],
        )?;
        registry.register(Box::new(dispatch_total.clone()))?;

        let handler_duration = HistogramVec::new(
            HistogramOpts::new(
                "zmt_handler_duration_seconds",
                "Command handler duration in seconds by subsystem",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["subsystem"],
        )?;
        registry.register(Box::new(handler_duration.clone()))?;

        // Callbacks
        let callbacks_forwarded_total = CounterVec::new(
            Opts::new(
                "zmt_callbacks_forwarded_total",
                "Callbacks forwarded to hosts by subsystem",
            ),
            &["subsystem"],
        )?;
        registry.register(Box::new(callbacks_forwarded_total.clone()))?;

        let callbacks_suppressed_total = Counter::with_opts(Opts::new(
            "zmt_callbacks_suppressed_total",
            "Stack events not forwarded because their subsystem is unsubscribed",
        ))?;
        registry.register(Box::new(callbacks_suppressed_total.clone()))?;

        // Internal RPC
        let rpc_requests = Gauge::with_opts(Opts::new(
            "zmt_rpc_requests",
            "Requests served by the internal engine",
        ))?;
        registry.register(Box::new(rpc_requests.clone()))?;

        let rpc_replies_dropped = Gauge::with_opts(Opts::new(
            "zmt_rpc_replies_dropped",
            "Engine replies dropped at missing or full inboxes",
        ))?;
        registry.register(Box::new(rpc_replies_dropped.clone()))?;

        let indications_delivered = Gauge::with_opts(Opts::new(
            "zmt_indications_delivered",
            "Indications delivered to internal tasks",
        ))?;
        registry.register(Box::new(indications_delivered.clone()))?;

        let indications_dropped = Gauge::with_opts(Opts::new(
            "zmt_indications_dropped",
            "Indications dropped at full inboxes",
        ))?;
        registry.register(Box::new(indications_dropped.clone()))?;

        let rpc_calls = Gauge::with_opts(Opts::new(
            "zmt_rpc_calls",
            "Calls made by internal RPC clients",
        ))?;
        registry.register(Box::new(rpc_calls.clone()))?;

        let rpc_timeouts = Gauge::with_opts(Opts::new(
            "zmt_rpc_timeouts",
            "Internal RPC calls that timed out waiting for a reply",
        ))?;
        registry.register(Box::new(rpc_timeouts.clone()))?;

        let rpc_call_failures = GaugeVec::new(
            Opts::new(
                "zmt_rpc_call_failures",
                "Internal RPC calls refused before reaching the engine",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rpc_call_failures.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            frames_in_total,
            frames_out_total,
            dispatch_total,
            handler_duration,
            callbacks_forwarded_total,
            callbacks_suppressed_total,
            rpc_requests,
            rpc_replies_dropped,
            indications_delivered,
            indications_dropped,
            rpc_calls,
            rpc_timeouts,
            rpc_call_failures,
        })
    }

    /// Copies the engine counters into their gauges.
    pub fn update_engine_stats(&self, stats: &EngineStatsSnapshot) {
        self.rpc_requests.set(stats.requests as f64);
        self.rpc_replies_dropped.set(stats.replies_dropped as f64);
        self.indications_delivered
            .set(stats.indications_delivered as f64);
        self.indications_dropped.set(stats.indications_dropped as f64);
        self.rpc_calls.set(stats.rpc.calls as f64);
        self.rpc_timeouts.set(stats.rpc.timeouts as f64);
        self.rpc_call_failures
            .with_label_values(&["no_envelope"])
            .set(stats.rpc.alloc_failures as f64);
        self.rpc_call_failures
            .with_label_values(&["queue"])
            .set(stats.rpc.send_failures as f64);
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn text_response(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.encode(),
        ),
        "/health" | "/healthz" => text_response(StatusCode::OK, "text/plain", "OK"),
        "/" => text_response(
            StatusCode::OK,
            "text/html",
            r#"<!DOCTYPE html>
<html>
<head><title>zmt Metrics</title></head>
<body>
<h1>zmt Metrics</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#,
        ),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}
