//! AF subsystem.

use super::{into_status, HandlerResult};
use crate::dispatch::SubsystemHandler;
use crate::response::{status_srsp, ResponseSink};
use std::sync::Arc;
use zmt_core::message::{AfAddress, AfDataRequest, EndpointDescriptor};
use zmt_core::SimulatedStack;
use zmt_protocol::{Frame, FrameType, PayloadReader, ProtocolError, RpcStatus, Status, Subsystem};

pub const REGISTER: u8 = 0x00;
pub const DATA_REQUEST: u8 = 0x01;
pub const DATA_REQUEST_EXT: u8 = 0x02;
pub const DELETE: u8 = 0x04;
pub const DATA_CONFIRM: u8 = 0x80;
pub const INCOMING_MSG: u8 = 0x81;

/// Address modes of DATA_REQUEST_EXT.
const ADDR_MODE_GROUP: u8 = 0x01;
const ADDR_MODE_EXTENDED: u8 = 0x03;
const ADDR_MODE_BROADCAST: u8 = 0x0F;

pub struct AfHandler {
    stack: Arc<SimulatedStack>,
}

impl AfHandler {
    pub fn new(stack: Arc<SimulatedStack>) -> Self {
        Self { stack }
    }

    fn register(&self, r: &mut PayloadReader<'_>) -> Result<Status, ProtocolError> {
        let endpoint = r.read_u8()?;
        let profile_id = r.read_u16_le()?;
        let device_id = r.read_u16_le()?;
        let device_version = r.read_u8()?;
        let latency = r.read_u8()?;
        let in_count = r.read_u8()?;
        let input_clusters = r.read_u16_list(usize::from(in_count))?;
        let out_count = r.read_u8()?;
        let output_clusters = r.read_u16_list(usize::from(out_count))?;

        Ok(self.stack.af_register(EndpointDescriptor {
            endpoint,
            profile_id,
            device_id,
            device_version,
            latency,
            input_clusters,
            output_clusters,
        }))
    }

    fn data_request(&self, r: &mut PayloadReader<'_>) -> Result<AfDataRequest, ProtocolError> {
        let dst = AfAddress::Short(r.read_u16_le()?);
        let dst_endpoint = r.read_u8()?;
        let src_endpoint = r.read_u8()?;
        let cluster_id = r.read_u16_le()?;
        let trans_id = r.read_u8()?;
        let options = r.read_u8()?;
        let radius = r.read_u8()?;
        let len = r.read_u8()?;
        let payload = r.read_bytes(usize::from(len))?.to_vec();
        Ok(AfDataRequest {
            dst,
            dst_endpoint,
            dst_pan_id: 0,
            src_endpoint,
            cluster_id,
            trans_id,
            options,
            radius,
            payload,
        })
    }

    /// Short and group addresses occupy the first two bytes of the
    /// address field.
    fn data_request_ext(&self, r: &mut PayloadReader<'_>) -> Result<AfDataRequest, ProtocolError> {
        let mode = r.read_u8()?;
        let raw = r.read_array::<8>()?;
        let short = u16::from_le_bytes([raw[0], raw[1]]);
        let dst = match mode {
            ADDR_MODE_EXTENDED => AfAddress::Extended(raw),
            ADDR_MODE_GROUP => AfAddress::Group(short),
            ADDR_MODE_BROADCAST => AfAddress::Broadcast(short),
            _ => AfAddress::Short(short),
        };
        let dst_endpoint = r.read_u8()?;
        let dst_pan_id = r.read_u16_le()?;
        let src_endpoint = r.read_u8()?;
        let cluster_id = r.read_u16_le()?;
        let trans_id = r.read_u8()?;
        let options = r.read_u8()?;
        let radius = r.read_u8()?;
        let len = r.read_u16_le()?;
        let payload = r.read_bytes(usize::from(len))?.to_vec();
        Ok(AfDataRequest {
            dst,
            dst_endpoint,
            dst_pan_id,
            src_endpoint,
            cluster_id,
            trans_id,
            options,
            radius,
            payload,
        })
    }

    /// Data requests may arrive as AREQ, in which case nothing is written.
    fn send_data(
        &self,
        frame: &Frame,
        request: AfDataRequest,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let status = self.stack.af_data_request(&request);
        if frame.frame_type == FrameType::SyncRequest {
            sink.send(status_srsp(Subsystem::Af, frame.command_id, status));
        }
        Ok(())
    }
}

impl SubsystemHandler for AfHandler {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Af
    }

    fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        let mut r = PayloadReader::new(&frame.payload);
        let result = match frame.command_id {
            REGISTER => self
                .register(&mut r)
                .map(|status| sink.send(status_srsp(Subsystem::Af, REGISTER, status)))
                .map_err(RpcStatus::from),
            DATA_REQUEST => self
                .data_request(&mut r)
                .map_err(RpcStatus::from)
                .and_then(|req| self.send_data(frame, req, sink)),
            DATA_REQUEST_EXT => self
                .data_request_ext(&mut r)
                .map_err(RpcStatus::from)
                .and_then(|req| self.send_data(frame, req, sink)),
            DELETE => r
                .read_u8()
                .map(|endpoint| {
                    sink.send(status_srsp(Subsystem::Af, DELETE, self.stack.af_delete(endpoint)))
                })
                .map_err(RpcStatus::from),
            _ => Err(RpcStatus::ErrCommandId),
        };
        into_status(result)
    }
}
