//! ZDO subsystem.
//!
//! Requests answer with a status SRSP straight away. The ZDP responses
//! arrive later as stack events.

use super::{into_status, HandlerResult};
use crate::dispatch::SubsystemHandler;
use crate::response::{status_srsp, ResponseBuilder, ResponseSink};
use std::sync::Arc;
use zmt_core::message::{AddrReqType, IeeeAddrReq, NwkAddrReq, PermitJoinReq, ZdoDescReq};
use zmt_core::SimulatedStack;
use zmt_protocol::{Frame, PayloadReader, ProtocolError, RpcStatus, Status, Subsystem};

pub const NWK_ADDR_REQ: u8 = 0x00;
pub const IEEE_ADDR_REQ: u8 = 0x01;
pub const NODE_DESC_REQ: u8 = 0x02;
pub const ACTIVE_EP_REQ: u8 = 0x05;
pub const MGMT_PERMIT_JOIN_REQ: u8 = 0x36;
pub const STARTUP_FROM_APP: u8 = 0x40;
pub const NWK_ADDR_RSP: u8 = 0x80;
pub const IEEE_ADDR_RSP: u8 = 0x81;
pub const NODE_DESC_RSP: u8 = 0x82;
pub const ACTIVE_EP_RSP: u8 = 0x85;
pub const STATE_CHANGE_IND: u8 = 0xC0;
pub const END_DEVICE_ANNCE_IND: u8 = 0xC1;
pub const PERMIT_JOIN_IND: u8 = 0xCB;

fn read_desc_req(r: &mut PayloadReader<'_>) -> Result<ZdoDescReq, ProtocolError> {
    Ok(ZdoDescReq {
        dst_addr: r.read_u16_le()?,
        nwk_addr_of_interest: r.read_u16_le()?,
    })
}

pub struct ZdoHandler {
    stack: Arc<SimulatedStack>,
}

impl ZdoHandler {
    pub fn new(stack: Arc<SimulatedStack>) -> Self {
        Self { stack }
    }

    fn request(&self, command_id: u8, r: &mut PayloadReader<'_>) -> Result<Status, RpcStatus> {
        let status = match command_id {
            NWK_ADDR_REQ => self.stack.zdo_nwk_addr_req(&NwkAddrReq {
                ieee_addr: r.read_array::<8>()?,
                req_type: AddrReqType::from_code(r.read_u8()?),
                start_index: r.read_u8()?,
            }),
            IEEE_ADDR_REQ => self.stack.zdo_ieee_addr_req(&IeeeAddrReq {
                nwk_addr: r.read_u16_le()?,
                req_type: AddrReqType::from_code(r.read_u8()?),
                start_index: r.read_u8()?,
            }),
            NODE_DESC_REQ => self.stack.zdo_node_desc_req(&read_desc_req(r)?),
            ACTIVE_EP_REQ => self.stack.zdo_active_ep_req(&read_desc_req(r)?),
            MGMT_PERMIT_JOIN_REQ => {
                // Address mode precedes the destination; only unicast and
                // broadcast short addresses are used here
                r.skip(1)?;
                self.stack.zdo_mgmt_permit_join(&PermitJoinReq {
                    dst_addr: r.read_u16_le()?,
                    duration: r.read_u8()?,
                    tc_significance: r.read_bool()?,
                })
            }
            _ => return Err(RpcStatus::ErrCommandId),
        };
        Ok(status)
    }

    fn startup(&self, r: &mut PayloadReader<'_>, sink: &mut dyn ResponseSink) -> HandlerResult {
        let delay = r.read_u16_le()?;
        let result = self.stack.startup(delay);
        sink.send(
            ResponseBuilder::with_capacity(1)
                .u8(result as u8)
                .srsp(Subsystem::Zdo, STARTUP_FROM_APP),
        );
        Ok(())
    }
}

impl SubsystemHandler for ZdoHandler {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Zdo
    }

    fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        let mut r = PayloadReader::new(&frame.payload);
        let result = if frame.command_id == STARTUP_FROM_APP {
            self.startup(&mut r, sink)
        } else {
            self.request(frame.command_id, &mut r)
                .map(|status| sink.send(status_srsp(Subsystem::Zdo, frame.command_id, status)))
        };
        into_status(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use zmt_core::message::DeviceState;
    use zmt_core::stack::StartupResult;
    use zmt_core::{DeviceConfig, StackEvent};

    #[test]
    fn test_nwk_addr_req_raises_response() {
        let stack = stack();
        let mut events = stack.subscribe();
        let handler = ZdoHandler::new(stack);

        let mut p = DeviceConfig::default().ieee_bytes().to_vec();
        p.extend_from_slice(&[0, 0]);
        let (status, out) = run(&handler, &sreq(Subsystem::Zdo, NWK_ADDR_REQ, &p));
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&out[0].payload[..], &[0x00]);

        match events.try_recv().unwrap() {
            StackEvent::NwkAddrRsp(rsp) => assert_eq!(rsp.nwk_addr, 0x0000),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_ieee_addr_req_short_payload() {
        let handler = ZdoHandler::new(stack());
        let (status, out) = run(
            &handler,
            &sreq(Subsystem::Zdo, IEEE_ADDR_REQ, &[0x00, 0x00, 0x00]),
        );
        assert_eq!(status, RpcStatus::ErrParameter);
        assert!(out.is_empty());
    }

    #[test]
    fn test_active_ep_req() {
        let stack = stack();
        let mut events = stack.subscribe();
        let handler = ZdoHandler::new(stack);

        let (_, out) = run(&handler, &sreq(Subsystem::Zdo, ACTIVE_EP_REQ, &[0, 0, 0x99, 0x99]));
        assert_eq!(out[0].command_id, ACTIVE_EP_REQ);
        match events.try_recv().unwrap() {
            StackEvent::ActiveEpRsp(rsp) => {
                assert_ne!(rsp.source.status, 0);
                assert!(rsp.endpoints.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_permit_join() {
        let stack = stack();
        let handler = ZdoHandler::new(stack.clone());

        let (_, out) = run(
            &handler,
            &sreq(Subsystem::Zdo, MGMT_PERMIT_JOIN_REQ, &[0x02, 0xFC, 0xFF, 60, 1]),
        );
        assert_eq!(&out[0].payload[..], &[0x00]);
        assert_eq!(stack.permit_join_duration(), 60);
    }

    #[test]
    fn test_permit_join_refused_on_end_device() {
        let config = DeviceConfig {
            logical_type: zmt_core::message::LogicalType::EndDevice,
            ..Default::default()
        };
        let handler = ZdoHandler::new(SimulatedStack::new(&config));
        let (_, out) = run(
            &handler,
            &sreq(Subsystem::Zdo, MGMT_PERMIT_JOIN_REQ, &[0x02, 0x00, 0x00, 60, 1]),
        );
        assert_eq!(&out[0].payload[..], &[Status::NWK_INVALID_REQUEST.code()]);
    }

    #[test]
    fn test_startup_from_app() {
        let stack = stack();
        let handler = ZdoHandler::new(stack.clone());

        let (_, out) = run(&handler, &sreq(Subsystem::Zdo, STARTUP_FROM_APP, &[0, 0]));
        assert_eq!(&out[0].payload[..], &[StartupResult::NewNetwork as u8]);
        assert_eq!(stack.device_state(), DeviceState::ZbCoord);

        let (_, out) = run(&handler, &sreq(Subsystem::Zdo, STARTUP_FROM_APP, &[0, 0]));
        assert_eq!(&out[0].payload[..], &[StartupResult::RestoredNetwork as u8]);
    }

    #[test]
    fn test_unknown_command() {
        let (status, _) = run(&ZdoHandler::new(stack()), &sreq(Subsystem::Zdo, 0x7E, &[]));
        assert_eq!(status, RpcStatus::ErrCommandId);
    }
}
