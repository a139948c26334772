//! Encoder and decoder for MT byte streams.

use crate::error::ProtocolError;
use crate::frame::{pack_cmd0, Frame, FrameType};
use crate::status::RpcStatus;
use crate::subsystem::Subsystem;
use bytes::{Bytes, BytesMut};

/// Builds and encodes outgoing frames.
pub struct Encoder;

impl Encoder {
    /// Encodes any frame.
    pub fn encode_frame(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        frame.encode()
    }

    /// Builds a synchronous response.
    pub fn srsp(subsystem: Subsystem, command_id: u8, payload: impl Into<Bytes>) -> Frame {
        Frame::new(FrameType::SyncResponse, subsystem, command_id, payload)
    }

    /// Builds an asynchronous event.
    pub fn areq(subsystem: Subsystem, command_id: u8, payload: impl Into<Bytes>) -> Frame {
        Frame::new(FrameType::AsyncRequest, subsystem, command_id, payload)
    }

    /// Builds the error SRSP for a failed synchronous request.
    ///
    /// The reply echoes the request's subsystem and command id in its own
    /// header and carries `[status, cmd0, cmd1]` of the request as payload.
    pub fn error_srsp(status: RpcStatus, request_cmd0: u8, request_cmd1: u8) -> Frame {
        let subsystem = crate::frame::subsystem_of(request_cmd0);
        Frame::with_raw_subsystem(
            FrameType::SyncResponse,
            subsystem,
            request_cmd1,
            vec![status.code(), request_cmd0, request_cmd1],
        )
    }

    /// Returns whether `frame` has the shape of an error SRSP answering a
    /// request with the given command bytes.
    ///
    /// A TEST_LOOPBACK echo of exactly `[status, cmd0, cmd1]` looks the same.
    pub fn is_error_srsp_for(frame: &Frame, request_cmd0: u8, request_cmd1: u8) -> bool {
        frame.frame_type == FrameType::SyncResponse
            && frame.cmd0() == pack_cmd0(FrameType::SyncResponse, request_cmd0)
            && frame.command_id == request_cmd1
            && frame.payload.len() == 3
            && frame.payload[0] != RpcStatus::Success.code()
            && frame.payload[1] == request_cmd0
            && frame.payload[2] == request_cmd1
    }
}

/// Reassembles frames from a byte stream.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Option<Frame> {
        Frame::decode_stream(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
