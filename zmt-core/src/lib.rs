//! # zmt-core
//!
//! Internal RPC layer for zmt.
//!
//! This crate provides:
//! - Envelopes drawn from a bounded allocator and routed through per-task inboxes
//! - The engine task that serves requests and fans out indications
//! - `RpcClient` with one-outstanding-request correlation, timeouts and typed calls
//! - The indication ownership registry that frees owned sub-buffers exactly once
//! - The simulated network stack and MAC shared with the MT command handlers

pub mod api;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod event;
pub mod inbox;
pub mod indication;
pub mod mac;
pub mod message;
pub mod ownership;
pub mod pool;
pub mod router;
pub mod rpc;
pub mod stack;

pub use engine::{CommandProcessor, Engine, EngineConfig, EngineHandle, Processed};
pub use envelope::{Envelope, InboxItem};
pub use error::CoreError;
pub use event::{EventId, EventKind};
pub use inbox::{TaskId, TaskInbox};
pub use indication::Indication;
pub use mac::{MacEvent, MacService, SimulatedMac};
pub use message::{Request, Response};
pub use ownership::{free_indication, release, FreeOutcome, ReleaseLedger, ReleaseReport};
pub use pool::{EnvelopePool, EnvelopeLease, MIN_ENVELOPE_SIZE};
pub use router::TaskRouter;
pub use rpc::{RpcClient, RpcConfig, RpcStats, DEFAULT_RPC_TIMEOUT};
pub use stack::{DeviceConfig, SimulatedStack, StackEvent, StackEventSender};
