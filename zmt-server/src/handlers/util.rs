//! UTIL subsystem.

use super::{into_status, HandlerResult};
use crate::callbacks::CallbackMask;
use crate::dispatch::SubsystemHandler;
use crate::response::{status_srsp, ResponseBuilder, ResponseSink};
use std::sync::Arc;
use zmt_core::SimulatedStack;
use zmt_protocol::{Frame, PayloadReader, RpcStatus, Status, Subsystem, MAX_FRAME_PAYLOAD};

pub const GET_DEVICE_INFO: u8 = 0x00;
pub const GET_NV_INFO: u8 = 0x01;
pub const SET_PANID: u8 = 0x02;
pub const SET_CHANNELS: u8 = 0x03;
pub const SET_SECLEVEL: u8 = 0x04;
pub const SET_PRECFGKEY: u8 = 0x05;
pub const CALLBACK_SUB_CMD: u8 = 0x06;
pub const TIME_ALIVE: u8 = 0x09;
pub const TEST_LOOPBACK: u8 = 0x10;
pub const ASSOC_COUNT: u8 = 0x48;

/// CALLBACK_SUB_CMD id that addresses every subsystem.
pub const SUBSCRIBE_ALL: u16 = 0xFFFF;

/// Fixed part of the GET_DEVICE_INFO reply.
const DEVICE_INFO_HEADER: usize = 14;
const MAX_ASSOC_LIST: usize = (MAX_FRAME_PAYLOAD - DEVICE_INFO_HEADER) / 2;

pub struct UtilHandler {
    stack: Arc<SimulatedStack>,
    callbacks: Arc<CallbackMask>,
}

impl UtilHandler {
    pub fn new(stack: Arc<SimulatedStack>, callbacks: Arc<CallbackMask>) -> Self {
        Self { stack, callbacks }
    }

    /// The association list is only present on router capable devices.
    fn device_info(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        let info = self.stack.device_info();
        let mut associated = info.associated.as_slice();
        if associated.len() > MAX_ASSOC_LIST {
            tracing::debug!(
                "Association list truncated from {} to {} entries",
                associated.len(),
                MAX_ASSOC_LIST
            );
            associated = &associated[..MAX_ASSOC_LIST];
        }

        sink.send(
            ResponseBuilder::with_capacity(DEVICE_INFO_HEADER + associated.len() * 2)
                .status(Status::SUCCESS)
                .bytes(&info.ieee_addr)
                .u16(info.short_addr)
                .u8(info.logical_type.capability_bits())
                .u8(info.device_state.code())
                .u8(associated.len() as u8)
                .u16_list(associated)
                .srsp(Subsystem::Util, GET_DEVICE_INFO),
        );
        Ok(())
    }

    fn nv_info(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        let nv = self.stack.nv_info();
        sink.send(
            ResponseBuilder::with_capacity(32)
                .status(Status::SUCCESS)
                .bytes(&nv.ieee_addr)
                .u32_be(nv.channel_mask)
                .u16(nv.pan_id)
                .u8(nv.security_level)
                .bytes(&nv.precfg_key)
                .srsp(Subsystem::Util, GET_NV_INFO),
        );
        Ok(())
    }

    fn set_pan_id(&self, r: &mut PayloadReader<'_>, sink: &mut dyn ResponseSink) -> HandlerResult {
        let pan_id = r.read_u16_le()?;
        sink.send(status_srsp(Subsystem::Util, SET_PANID, self.stack.set_pan_id(pan_id)));
        Ok(())
    }

    fn set_channels(
        &self,
        r: &mut PayloadReader<'_>,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let mask = r.read_u32_le()?;
        sink.send(status_srsp(
            Subsystem::Util,
            SET_CHANNELS,
            self.stack.set_channels(mask),
        ));
        Ok(())
    }

    fn set_sec_level(
        &self,
        r: &mut PayloadReader<'_>,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let level = r.read_u8()?;
        sink.send(status_srsp(
            Subsystem::Util,
            SET_SECLEVEL,
            self.stack.set_security_level(level),
        ));
        Ok(())
    }

    fn set_precfg_key(
        &self,
        r: &mut PayloadReader<'_>,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let key = r.read_array::<16>()?;
        sink.send(status_srsp(
            Subsystem::Util,
            SET_PRECFGKEY,
            self.stack.set_precfg_key(key),
        ));
        Ok(())
    }

    /// The subsystem sits in the high byte of the command word, the same
    /// place it occupies in cmd0.
    fn callback_sub(
        &self,
        r: &mut PayloadReader<'_>,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let command = r.read_u16_le()?;
        let enable = r.read_bool()?;

        let status = if command == SUBSCRIBE_ALL {
            self.callbacks.set_all(enable);
            Status::SUCCESS
        } else if self.callbacks.set(((command >> 8) & 0x1F) as u8, enable) {
            Status::SUCCESS
        } else {
            Status::INVALID_PARAMETER
        };
        sink.send(status_srsp(Subsystem::Util, CALLBACK_SUB_CMD, status));
        Ok(())
    }

    fn time_alive(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        sink.send(
            ResponseBuilder::with_capacity(4)
                .u32(self.stack.uptime_secs())
                .srsp(Subsystem::Util, TIME_ALIVE),
        );
        Ok(())
    }

    fn loopback(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> HandlerResult {
        sink.send(zmt_protocol::Encoder::srsp(
            Subsystem::Util,
            TEST_LOOPBACK,
            frame.payload.clone(),
        ));
        Ok(())
    }

    fn assoc_count(&self, r: &mut PayloadReader<'_>, sink: &mut dyn ResponseSink) -> HandlerResult {
        let start = r.read_u8()?;
        let end = r.read_u8()?;
        sink.send(
            ResponseBuilder::with_capacity(2)
                .u16(self.stack.assoc_count(start, end))
                .srsp(Subsystem::Util, ASSOC_COUNT),
        );
        Ok(())
    }
}

impl SubsystemHandler for UtilHandler {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Util
    }

    fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        let mut r = PayloadReader::new(&frame.payload);
        let result = match frame.command_id {
            GET_DEVICE_INFO => self.device_info(sink),
            GET_NV_INFO => self.nv_info(sink),
            SET_PANID => self.set_pan_id(&mut r, sink),
            SET_CHANNELS => self.set_channels(&mut r, sink),
            SET_SECLEVEL => self.set_sec_level(&mut r, sink),
            SET_PRECFGKEY => self.set_precfg_key(&mut r, sink),
            CALLBACK_SUB_CMD => self.callback_sub(&mut r, sink),
            TIME_ALIVE => self.time_alive(sink),
            TEST_LOOPBACK => self.loopback(frame, sink),
            ASSOC_COUNT => self.assoc_count(&mut r, sink),
            _ => Err(RpcStatus::ErrCommandId),
        };
        into_status(result)
    }
}
