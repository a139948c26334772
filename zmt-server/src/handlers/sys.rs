//! SYS subsystem.

use super::{into_status, HandlerResult};
use crate::dispatch::SubsystemHandler;
use crate::response::{status_srsp, ResponseBuilder, ResponseSink};
use std::sync::Arc;
use zmt_core::stack::ResetType;
use zmt_core::SimulatedStack;
use zmt_protocol::{Frame, PayloadReader, RpcStatus, Subsystem};

pub const RESET_REQ: u8 = 0x00;
pub const PING: u8 = 0x01;
pub const VERSION: u8 = 0x02;
pub const SET_EXTADDR: u8 = 0x03;
pub const GET_EXTADDR: u8 = 0x04;
pub const RANDOM: u8 = 0x0C;
pub const SET_TX_POWER: u8 = 0x14;
pub const RESET_IND: u8 = 0x80;

pub struct SysHandler {
    stack: Arc<SimulatedStack>,
    capabilities: u16,
}

impl SysHandler {
    /// `capabilities` is the bitmap PING reports.
    pub fn new(stack: Arc<SimulatedStack>, capabilities: u16) -> Self {
        Self {
            stack,
            capabilities,
        }
    }

    /// The reset indication follows from the stack event; nothing is
    /// written here.
    fn reset(&self, r: &mut PayloadReader<'_>) -> HandlerResult {
        let kind = match r.read_u8()? {
            1 => ResetType::Soft,
            _ => ResetType::Hard,
        };
        self.stack.reset(kind);
        Ok(())
    }

    fn ping(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        sink.send(
            ResponseBuilder::with_capacity(2)
                .u16(self.capabilities)
                .srsp(Subsystem::Sys, PING),
        );
        Ok(())
    }

    fn version(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        let v = self.stack.version();
        sink.send(
            ResponseBuilder::with_capacity(5)
                .u8(v.transport_rev)
                .u8(v.product)
                .u8(v.major)
                .u8(v.minor)
                .u8(v.maint)
                .srsp(Subsystem::Sys, VERSION),
        );
        Ok(())
    }

    fn set_ext_addr(
        &self,
        r: &mut PayloadReader<'_>,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let addr = r.read_array::<8>()?;
        let status = self.stack.set_ext_addr(addr);
        sink.send(status_srsp(Subsystem::Sys, SET_EXTADDR, status));
        Ok(())
    }

    fn get_ext_addr(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        sink.send(
            ResponseBuilder::with_capacity(8)
                .bytes(&self.stack.ext_addr())
                .srsp(Subsystem::Sys, GET_EXTADDR),
        );
        Ok(())
    }

    fn random(&self, sink: &mut dyn ResponseSink) -> HandlerResult {
        sink.send(
            ResponseBuilder::with_capacity(2)
                .u16(self.stack.random())
                .srsp(Subsystem::Sys, RANDOM),
        );
        Ok(())
    }

    fn set_tx_power(
        &self,
        r: &mut PayloadReader<'_>,
        sink: &mut dyn ResponseSink,
    ) -> HandlerResult {
        let requested = r.read_u8()? as i8;
        let applied = self.stack.set_tx_power(requested);
        sink.send(
            ResponseBuilder::with_capacity(1)
                .u8(applied as u8)
                .srsp(Subsystem::Sys, SET_TX_POWER),
        );
        Ok(())
    }
}

impl SubsystemHandler for SysHandler {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Sys
    }

    fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        let mut r = PayloadReader::new(&frame.payload);
        let result = match frame.command_id {
            RESET_REQ => self.reset(&mut r),
            PING => self.ping(sink),
            VERSION => self.version(sink),
            SET_EXTADDR => self.set_ext_addr(&mut r, sink),
            GET_EXTADDR => self.get_ext_addr(sink),
            RANDOM => self.random(sink),
            SET_TX_POWER => self.set_tx_power(&mut r, sink),
            _ => Err(RpcStatus::ErrCommandId),
        };
        into_status(result)
    }
}
