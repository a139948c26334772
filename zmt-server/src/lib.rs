//! # zmt-server
//!
//! MT server for zmt.
//!
//! This crate provides:
//! - The subsystem dispatch table and its length and routing rules
//! - Command handlers for SYS, MAC, AF, ZDO and UTIL
//! - Callback forwarding of stack events under a subscription mask
//! - The TCP serial bridge with idle timeout and graceful shutdown
//! - Prometheus metrics over HTTP

pub mod callbacks;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod response;
pub mod server;

pub use callbacks::{CallbackForwarder, CallbackMask};
pub use config::{Config, ConfigError, MetricsConfig, MtConfig, NetworkConfig, RpcSection};
pub use dispatch::{DispatchTable, DispatchTableBuilder, SubsystemHandler};
pub use error::ServerError;
pub use handlers::build_dispatch_table;
pub use metrics::{run_metrics_server, Metrics};
pub use response::{ChannelSink, FrameBuffer, ResponseBuilder, ResponseSink};
pub use server::{Server, ServerConfig, ServerStats};
