//! Outgoing frames.
//!
//! Handlers write replies and callbacks into a [`ResponseSink`]. The
//! transport decides where they go: a [`FrameBuffer`] keeps them in memory,
//! a [`ChannelSink`] hands them to a connection's writer task.

use bytes::{BufMut, BytesMut};
use tokio::sync::mpsc;
use zmt_protocol::{Encoder, Frame, Status, Subsystem};

/// Destination for frames produced while handling a request.
pub trait ResponseSink: Send {
    fn send(&mut self, frame: Frame);
}

/// Collects frames in order.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn take(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }
}

impl ResponseSink for FrameBuffer {
    fn send(&mut self, frame: Frame) {
        self.frames.push(frame);
    }
}

/// Forwards frames to a connection writer.
///
/// Never blocks. A full or closed channel drops the frame with a warning.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl ResponseSink for ChannelSink {
    fn send(&mut self, frame: Frame) {
        if let Err(e) = self.tx.try_send(frame) {
            let frame = match e {
                mpsc::error::TrySendError::Full(f) | mpsc::error::TrySendError::Closed(f) => f,
            };
            tracing::warn!("Dropping outgoing frame {}: writer unavailable", frame);
        }
    }
}

/// Builds a payload field by field, little-endian unless stated otherwise.
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    buf: BytesMut,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    pub fn bool(self, value: bool) -> Self {
        self.u8(u8::from(value))
    }

    pub fn status(self, status: Status) -> Self {
        self.u8(status.code())
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.buf.put_u32_le(value);
        self
    }

    /// The NV channel list goes out most significant byte first.
    pub fn u32_be(mut self, value: u32) -> Self {
        self.buf.put_u32(value);
        self
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.put_slice(value);
        self
    }

    /// Writes `value` into a fixed-width field, truncating or zero-padding.
    pub fn fixed(mut self, value: &[u8], width: usize) -> Self {
        let n = value.len().min(width);
        self.buf.put_slice(&value[..n]);
        self.buf.put_bytes(0, width - n);
        self
    }

    pub fn u16_list(mut self, values: &[u16]) -> Self {
        for value in values {
            self.buf.put_u16_le(*value);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn srsp(self, subsystem: Subsystem, command_id: u8) -> Frame {
        Encoder::srsp(subsystem, command_id, self.buf.freeze())
    }

    pub fn areq(self, subsystem: Subsystem, command_id: u8) -> Frame {
        Encoder::areq(subsystem, command_id, self.buf.freeze())
    }
}

/// A one-byte status SRSP.
pub fn status_srsp(subsystem: Subsystem, command_id: u8, status: Status) -> Frame {
    ResponseBuilder::with_capacity(1)
        .status(status)
        .srsp(subsystem, command_id)
}
