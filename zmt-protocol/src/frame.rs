//! Binary frame format for MT.
//!
//! Frame layout (3 bytes header + payload):
//!
//! ```text
//! +--------+------------------------+------------+-------------------+
//! | length | cmd0                   | cmd1       | payload           |
//! | 1 byte | type[7:6] | sub[4:0]   | command id | `length` bytes    |
//! +--------+------------------------+------------+-------------------+
//! ```
//!
//! Bit 5 of `cmd0` is reserved: written as zero, ignored on decode.

use crate::error::ProtocolError;
use crate::subsystem::Subsystem;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 3;

/// Largest payload the one-byte length field can describe.
pub const MAX_FRAME_PAYLOAD: usize = u8::MAX as usize;

const TYPE_SHIFT: u8 = 6;
const TYPE_MASK: u8 = 0b1100_0000;
const SUBSYSTEM_MASK: u8 = 0b0001_1111;

/// Frame type carried in the top bits of `cmd0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Poll for queued data.
    Poll = 0,
    /// Synchronous request (SREQ), answered by exactly one SRSP.
    SyncRequest = 1,
    /// Asynchronous request or event (AREQ).
    AsyncRequest = 2,
    /// Synchronous response (SRSP).
    SyncResponse = 3,
}

impl FrameType {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => FrameType::Poll,
            1 => FrameType::SyncRequest,
            2 => FrameType::AsyncRequest,
            _ => FrameType::SyncResponse,
        }
    }

    /// Extracts the frame type from a `cmd0` byte.
    pub fn from_cmd0(cmd0: u8) -> Self {
        Self::from_bits((cmd0 & TYPE_MASK) >> TYPE_SHIFT)
    }

    pub fn short_name(self) -> &'static str {
        match self {
            FrameType::Poll => "POLL",
            FrameType::SyncRequest => "SREQ",
            FrameType::AsyncRequest => "AREQ",
            FrameType::SyncResponse => "SRSP",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Packs a frame type and 5-bit subsystem id into a `cmd0` byte.
pub fn pack_cmd0(frame_type: FrameType, subsystem: u8) -> u8 {
    (frame_type.bits() << TYPE_SHIFT) | (subsystem & SUBSYSTEM_MASK)
}

/// Extracts the 5-bit subsystem id from a `cmd0` byte.
pub fn subsystem_of(cmd0: u8) -> u8 {
    cmd0 & SUBSYSTEM_MASK
}

/// A parsed MT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Raw 5-bit subsystem id. Ids without a defined [`Subsystem`] are kept so
    /// dispatch can reject them.
    pub subsystem: u8,
    /// Command id (`cmd1`).
    pub command_id: u8,
    /// Frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame for a known subsystem.
    pub fn new(
        frame_type: FrameType,
        subsystem: Subsystem,
        command_id: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::with_raw_subsystem(frame_type, subsystem.id(), command_id, payload)
    }

    /// Creates a frame from a raw subsystem id. Only the low five bits are kept.
    pub fn with_raw_subsystem(
        frame_type: FrameType,
        subsystem: u8,
        command_id: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            frame_type,
            subsystem: subsystem & SUBSYSTEM_MASK,
            command_id,
            payload: payload.into(),
        }
    }

    /// Builds a frame from its two command bytes.
    pub fn from_cmd(cmd0: u8, cmd1: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type: FrameType::from_cmd0(cmd0),
            subsystem: subsystem_of(cmd0),
            command_id: cmd1,
            payload: payload.into(),
        }
    }

    /// The packed type/subsystem byte.
    pub fn cmd0(&self) -> u8 {
        pack_cmd0(self.frame_type, self.subsystem)
    }

    /// The command id byte.
    pub fn cmd1(&self) -> u8 {
        self.command_id
    }

    /// Payload length as carried in the header.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The subsystem, if the id is a defined one.
    pub fn known_subsystem(&self) -> Option<Subsystem> {
        Subsystem::from_id(self.subsystem)
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = self.payload.len();
        if len > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: MAX_FRAME_PAYLOAD,
            });
        }

        buf.reserve(FRAME_HEADER_SIZE + len);
        buf.put_u8(len as u8);
        buf.put_u8(self.cmd0());
        buf.put_u8(self.command_id);
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Decodes exactly one frame occupying the whole of `buf`.
    ///
    /// The declared length must match the bytes that follow the header.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::TooShort { len: buf.len() });
        }

        let declared = buf[0] as usize;
        let actual = buf.len() - FRAME_HEADER_SIZE;
        if declared != actual {
            return Err(ProtocolError::LengthMismatch { declared, actual });
        }

        Ok(Self::from_cmd(
            buf[1],
            buf[2],
            Bytes::copy_from_slice(&buf[FRAME_HEADER_SIZE..]),
        ))
    }

    /// Decodes the next frame from a stream buffer.
    ///
    /// Returns `None` if more data is needed. Consumed bytes are removed from
    /// `buf`; the payload shares the buffer's allocation.
    pub fn decode_stream(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let total_len = FRAME_HEADER_SIZE + buf[0] as usize;
        if buf.len() < total_len {
            return None;
        }

        let mut raw = buf.split_to(total_len).freeze();
        let header = raw.split_to(FRAME_HEADER_SIZE);
        Some(Self::from_cmd(header[1], header[2], raw))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known_subsystem() {
            Some(sub) => write!(
                f,
                "{} {} {:#04x} len={}",
                self.frame_type,
                sub,
                self.command_id,
                self.payload.len()
            ),
            None => write!(
                f,
                "{} sub#{} {:#04x} len={}",
                self.frame_type,
                self.subsystem,
                self.command_id,
                self.payload.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(
            FrameType::SyncRequest,
            Subsystem::Util,
            0x10,
            Bytes::from_static(b"\x01\x02\x03"),
        );

        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + 3);
        let decoded = Frame::decode(&encoded).unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_cmd0_packing() {
        assert_eq!(pack_cmd0(FrameType::Poll, 7), 0x07);
        assert_eq!(pack_cmd0(FrameType::SyncRequest, 7), 0x47);
        assert_eq!(pack_cmd0(FrameType::AsyncRequest, 1), 0x81);
        assert_eq!(pack_cmd0(FrameType::SyncResponse, 21), 0xD5);

        assert_eq!(FrameType::from_cmd0(0xD5), FrameType::SyncResponse);
        assert_eq!(subsystem_of(0xD5), 21);
    }

    #[test]
    fn test_reserved_bit_ignored() {
        // 0x67 = SREQ with bit 5 set, subsystem 7
        let decoded = Frame::decode(&[0x00, 0x67, 0x00]).unwrap();
        assert_eq!(decoded.frame_type, FrameType::SyncRequest);
        assert_eq!(decoded.subsystem, 7);
        assert_eq!(decoded.cmd0(), 0x47);
    }

    #[test]
    fn test_too_short() {
        let result = Frame::decode(&[0x00, 0x47]);
        assert!(matches!(result, Err(ProtocolError::TooShort { len: 2 })));

        let result = Frame::decode(&[]);
        assert!(matches!(result, Err(ProtocolError::TooShort { len: 0 })));
    }

    #[test]
    fn test_length_mismatch() {
        // Declares 2 payload bytes, carries 1
        let result = Frame::decode(&[0x02, 0x47, 0x00, 0xAA]);
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared: 2,
                actual: 1
            })
        ));

        // Declares 0, carries 1
        let result = Frame::decode(&[0x00, 0x47, 0x00, 0xAA]);
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_payload_too_large() {
        let frame = Frame::new(
            FrameType::AsyncRequest,
            Subsystem::Af,
            0x81,
            vec![0u8; MAX_FRAME_PAYLOAD + 1],
        );
        let result = frame.encode();
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_max_payload_encodes() {
        let frame = Frame::new(
            FrameType::AsyncRequest,
            Subsystem::Af,
            0x81,
            vec![0x5Au8; MAX_FRAME_PAYLOAD],
        );
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], 0xFF);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(FrameType::SyncRequest, Subsystem::Sys, 0x01, Bytes::new());
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x41, 0x01]);

        let decoded = Frame::decode(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_raw_subsystem_masked() {
        let frame = Frame::with_raw_subsystem(FrameType::SyncRequest, 0xFF, 0x00, Bytes::new());
        assert_eq!(frame.subsystem, 0x1F);
        assert!(frame.known_subsystem().is_none());
    }

    #[test]
    fn test_incomplete_stream() {
        let mut buf = BytesMut::from(&[0x03, 0x47][..]);
        assert!(Frame::decode_stream(&mut buf).is_none());

        buf.extend_from_slice(&[0x10, 0x01]);
        assert!(Frame::decode_stream(&mut buf).is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_multiple_frames_in_stream() {
        let frame1 = Frame::new(FrameType::SyncRequest, Subsystem::Sys, 0x01, Bytes::new());
        let frame2 = Frame::new(
            FrameType::SyncRequest,
            Subsystem::Util,
            0x10,
            Bytes::from_static(b"hi"),
        );

        let mut buf = BytesMut::new();
        frame1.encode_into(&mut buf).unwrap();
        frame2.encode_into(&mut buf).unwrap();
        buf.extend_from_slice(&[0x01]);

        assert_eq!(Frame::decode_stream(&mut buf).unwrap(), frame1);
        assert_eq!(Frame::decode_stream(&mut buf).unwrap(), frame2);
        assert!(Frame::decode_stream(&mut buf).is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_frame_display() {
        let frame = Frame::new(FrameType::SyncRequest, Subsystem::Util, 0x00, Bytes::new());
        assert_eq!(frame.to_string(), "SREQ UTIL 0x00 len=0");

        let frame = Frame::with_raw_subsystem(FrameType::AsyncRequest, 30, 0x01, Bytes::new());
        assert_eq!(frame.to_string(), "AREQ sub#30 0x01 len=0");
    }

    mod proptest_frame {
        use super::*;
        use proptest::prelude::*;

        fn frame_type() -> impl Strategy<Value = FrameType> {
            (0u8..4).prop_map(FrameType::from_bits)
        }

        proptest! {
            #[test]
            fn decode_inverts_encode(
                ft in frame_type(),
                sub in 0u8..32,
                cmd in any::<u8>(),
                payload in prop::collection::vec(any::<u8>(), 0..=MAX_FRAME_PAYLOAD),
            ) {
                let frame = Frame::with_raw_subsystem(ft, sub, cmd, payload);
                let encoded = frame.encode().unwrap();
                prop_assert_eq!(Frame::decode(&encoded).unwrap(), frame.clone());

                let mut stream = BytesMut::from(&encoded[..]);
                prop_assert_eq!(Frame::decode_stream(&mut stream).unwrap(), frame);
                prop_assert!(stream.is_empty());
            }

            #[test]
            fn wrong_length_byte_is_rejected(
                declared in any::<u8>(),
                payload in prop::collection::vec(any::<u8>(), 0..64),
            ) {
                prop_assume!(declared as usize != payload.len());

                let mut buf = vec![declared, 0x47, 0x00];
                buf.extend_from_slice(&payload);

                let is_mismatch = matches!(
                    Frame::decode(&buf),
                    Err(ProtocolError::LengthMismatch { .. })
                );
                prop_assert!(is_mismatch);
            }
        }
    }
}
