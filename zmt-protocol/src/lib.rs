//! # zmt-protocol
//!
//! Wire protocol implementation for the Z-Stack Monitor and Test (MT) interface.
//!
//! This crate provides:
//! - Binary framing with a one-byte length prefix and a packed type/subsystem byte
//! - Streaming decoder for byte-stream transports
//! - Subsystem identifiers and capability bits
//! - RPC status codes and pass-through stack status values
//! - A fail-closed payload cursor for fixed-offset command fields

pub mod codec;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod status;
pub mod subsystem;

pub use codec::{Decoder, Encoder};
pub use cursor::PayloadReader;
pub use error::ProtocolError;
pub use frame::{Frame, FrameType, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
pub use status::{RpcStatus, Status};
pub use subsystem::{Subsystem, MAX_SUBSYSTEM};

/// Default TCP port for the MT serial bridge.
pub const DEFAULT_PORT: u16 = 2323;

/// Default maximum accepted payload length (MT RPC data max).
pub const DEFAULT_MAX_PAYLOAD: usize = 250;
