//! MAC subsystem.
//!
//! Requests go straight to the stack's [`MacService`]; confirms and
//! indications come back later as stack events and are written by the
//! callback forwarder.

use super::{into_status, HandlerResult};
use crate::dispatch::SubsystemHandler;
use crate::response::{status_srsp, ResponseBuilder, ResponseSink};
use std::sync::Arc;
use zmt_core::mac::{
    MacAddress, MacDataRequest, MacPollRequest, MacScanRequest, MacSecurity, MacStartRequest,
    MacSyncRequest, ATTR_BEACON_PAYLOAD, MAX_ATTRIBUTE_LEN,
};
use zmt_core::{MacService, SimulatedStack};
use zmt_protocol::{Frame, PayloadReader, ProtocolError, RpcStatus, Subsystem};

pub const RESET_REQ: u8 = 0x01;
pub const INIT: u8 = 0x02;
pub const START_REQ: u8 = 0x03;
pub const SYNC_REQ: u8 = 0x04;
pub const DATA_REQ: u8 = 0x05;
pub const GET_REQ: u8 = 0x08;
pub const SET_REQ: u8 = 0x09;
pub const SCAN_REQ: u8 = 0x0C;
pub const POLL_REQ: u8 = 0x0D;
pub const PURGE_REQ: u8 = 0x0E;
pub const DATA_CNF: u8 = 0x84;
pub const BEACON_NOTIFY_IND: u8 = 0x8B;
pub const SCAN_CNF: u8 = 0x8C;

fn read_security(r: &mut PayloadReader<'_>) -> Result<MacSecurity, ProtocolError> {
    Ok(MacSecurity::from_bytes(r.read_array::<{ MacSecurity::WIRE_LEN }>()?))
}

fn read_address(r: &mut PayloadReader<'_>) -> Result<MacAddress, ProtocolError> {
    let mode = r.read_u8()?;
    Ok(MacAddress::from_wire(mode, r.read_array::<8>()?))
}

pub struct MacHandler {
    stack: Arc<SimulatedStack>,
}

impl MacHandler {
    pub fn new(stack: Arc<SimulatedStack>) -> Self {
        Self { stack }
    }

    fn mac(&self) -> &dyn MacService {
        self.stack.mac()
    }

    fn start(&self, r: &mut PayloadReader<'_>) -> Result<MacStartRequest, ProtocolError> {
        Ok(MacStartRequest {
            start_time: r.read_u32_le()?,
            pan_id: r.read_u16_le()?,
            logical_channel: r.read_u8()?,
            channel_page: r.read_u8()?,
            beacon_order: r.read_u8()?,
            superframe_order: r.read_u8()?,
            pan_coordinator: r.read_bool()?,
            battery_life_ext: r.read_bool()?,
            coord_realignment: r.read_bool()?,
            realign_security: read_security(r)?,
            beacon_security: read_security(r)?,
        })
    }

    fn data(&self, r: &mut PayloadReader<'_>) -> Result<MacDataRequest, ProtocolError> {
        let dst = read_address(r)?;
        let dst_pan_id = r.read_u16_le()?;
        let src_addr_mode = r.read_u8()?;
        let handle = r.read_u8()?;
        let tx_options = r.read_u8()?;
        let channel = r.read_u8()?;
        let power = r.read_u8()?;
        let security = read_security(r)?;
        let msdu_len = r.read_u8()?;
        let msdu = r.read_bytes(usize::from(msdu_len))?.to_vec();
        Ok(MacDataRequest {
            dst,
            dst_pan_id,
            src_addr_mode,
            handle,
            tx_options,
            channel,
            power,
            security,
            msdu,
            gp_offset: r.read_u8()?,
            gp_duration: r.read_u8()?,
        })
    }

    fn scan(&self, r: &mut PayloadReader<'_>) -> Result<MacScanRequest, ProtocolError> {
        Ok(MacScanRequest {
            channels: r.read_u32_le()?,
            scan_type: r.read_u8()?,
            duration: r.read_u8()?,
            channel_page: r.read_u8()?,
            max_results: r.read_u8()?,
            security: read_security(r)?,
        })
    }

    fn poll(&self, r: &mut PayloadReader<'_>) -> Result<MacPollRequest, ProtocolError> {
        Ok(MacPollRequest {
            coord: read_address(r)?,
            coord_pan_id: r.read_u16_le()?,
            security: read_security(r)?,
        })
    }

    /// Replies with the status and the value in a zero-padded 16-byte field.
    fn get(&self, r: &mut PayloadReader<'_>, sink: &mut dyn ResponseSink) -> HandlerResult {
        let attribute = r.read_u8()?;
        let (status, value) = match self.mac().get(attribute) {
            Ok(value) => (zmt_protocol::Status::SUCCESS, value),
            Err(status) => (status, Vec::new()),
        };
        sink.send(
            ResponseBuilder::with_capacity(1 + MAX_ATTRIBUTE_LEN)
                .status(status)
                .fixed(&value, MAX_ATTRIBUTE_LEN)
                .srsp(Subsystem::Mac, GET_REQ),
        );
        Ok(())
    }

    fn set(&self, r: &mut PayloadReader<'_>) -> Result<zmt_protocol::Status, ProtocolError> {
        let attribute = r.read_u8()?;
        let value = r.rest();
        if attribute == ATTR_BEACON_PAYLOAD {
            if value.len() > MAX_ATTRIBUTE_LEN {
                tracing::debug!(
                    "Beacon payload truncated from {} to {} bytes",
                    value.len(),
                    MAX_ATTRIBUTE_LEN
                );
            }
            let mut payload = [0u8; MAX_ATTRIBUTE_LEN];
            let n = value.len().min(MAX_ATTRIBUTE_LEN);
            payload[..n].copy_from_slice(&value[..n]);
            return Ok(self.mac().set(attribute, &payload));
        }
        Ok(self.mac().set(attribute, value))
    }

    fn status_command(
        &self,
        command_id: u8,
        r: &mut PayloadReader<'_>,
    ) -> Result<zmt_protocol::Status, RpcStatus> {
        let mac = self.mac();
        let status = match command_id {
            RESET_REQ => mac.reset(r.read_bool()?),
            INIT => mac.init(),
            START_REQ => mac.start(&self.start(r)?),
            SYNC_REQ => mac.sync(&MacSyncRequest {
                logical_channel: r.read_u8()?,
                channel_page: r.read_u8()?,
                track_beacon: r.read_bool()?,
            }),
            DATA_REQ => mac.data_request(&self.data(r)?),
            SET_REQ => self.set(r)?,
            SCAN_REQ => mac.scan(&self.scan(r)?),
            POLL_REQ => mac.poll(&self.poll(r)?),
            PURGE_REQ => mac.purge(r.read_u8()?),
            _ => return Err(RpcStatus::ErrCommandId),
        };
        Ok(status)
    }
}

impl SubsystemHandler for MacHandler {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Mac
    }

    fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        let mut r = PayloadReader::new(&frame.payload);
        let result = if frame.command_id == GET_REQ {
            self.get(&mut r, sink)
        } else {
            self.status_command(frame.command_id, &mut r)
                .map(|status| sink.send(status_srsp(Subsystem::Mac, frame.command_id, status)))
        };
        into_status(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use zmt_core::mac::{MacEvent, ScanResults};
    use zmt_core::StackEvent;
    use zmt_protocol::Status;

    fn handler() -> MacHandler {
        MacHandler::new(stack())
    }

    fn start_payload(channel: u8) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&0x1A62u16.to_le_bytes());
        p.extend_from_slice(&[channel, 0, 15, 15, 1, 0, 0]);
        p.extend_from_slice(&[0u8; 22]);
        p
    }

    #[test]
    fn test_reset_and_init() {
        let handler = handler();
        let (status, out) = run(&handler, &sreq(Subsystem::Mac, RESET_REQ, &[1]));
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&out[0].payload[..], &[0x00]);

        let (_, out) = run(&handler, &sreq(Subsystem::Mac, INIT, &[]));
        assert_eq!(out[0].command_id, INIT);
        assert_eq!(&out[0].payload[..], &[0x00]);
    }

    #[test]
    fn test_start_request() {
        let handler = handler();
        let (status, out) = run(&handler, &sreq(Subsystem::Mac, START_REQ, &start_payload(11)));
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&out[0].payload[..], &[0x00]);

        // Collaborator status is passed through, not turned into an RPC error
        let (status, out) = run(&handler, &sreq(Subsystem::Mac, START_REQ, &start_payload(3)));
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&out[0].payload[..], &[Status::MAC_INVALID_PARAMETER.code()]);

        let short = &start_payload(11)[..30];
        let (status, out) = run(&handler, &sreq(Subsystem::Mac, START_REQ, short));
        assert_eq!(status, RpcStatus::ErrParameter);
        assert!(out.is_empty());
    }

    #[test]
    fn test_get_pads_to_sixteen() {
        let (_, out) = run(&handler(), &sreq(Subsystem::Mac, GET_REQ, &[0x50]));
        let payload = &out[0].payload;
        assert_eq!(payload.len(), 17);
        assert_eq!(payload[0], 0x00);
        assert_eq!(&payload[1..3], &[0xFF, 0xFF]);
        assert!(payload[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_get_unknown_attribute() {
        let (status, out) = run(&handler(), &sreq(Subsystem::Mac, GET_REQ, &[0x01]));
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(out[0].payload[0], Status::MAC_UNSUPPORTED_ATTRIBUTE.code());
        assert_eq!(out[0].len(), 17);
    }

    #[test]
    fn test_set_beacon_payload_capped() {
        let handler = handler();
        let mut payload = vec![ATTR_BEACON_PAYLOAD];
        payload.extend(1..=20u8);

        let (_, out) = run(&handler, &sreq(Subsystem::Mac, SET_REQ, &payload));
        assert_eq!(&out[0].payload[..], &[0x00]);

        let (_, out) = run(&handler, &sreq(Subsystem::Mac, GET_REQ, &[ATTR_BEACON_PAYLOAD]));
        let expected: Vec<u8> = (1..=16u8).collect();
        assert_eq!(&out[0].payload[1..], &expected[..]);
    }

    #[test]
    fn test_data_request_confirms() {
        let stack = stack();
        let mut events = stack.subscribe();
        let handler = MacHandler::new(stack);

        let mut p = vec![MacAddress::MODE_SHORT, 0x34, 0x12, 0, 0, 0, 0, 0, 0];
        p.extend_from_slice(&0x1A62u16.to_le_bytes());
        p.extend_from_slice(&[2, 7, 0, 11, 0]);
        p.extend_from_slice(&[0u8; 11]);
        p.push(3);
        p.extend_from_slice(b"abc");
        p.extend_from_slice(&[0, 0]);

        let (status, out) = run(&handler, &sreq(Subsystem::Mac, DATA_REQ, &p));
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&out[0].payload[..], &[0x00]);

        match events.try_recv().unwrap() {
            StackEvent::Mac(MacEvent::DataConfirm(cnf)) => assert_eq!(cnf.handle, 7),
            other => panic!("unexpected event {:?}", other),
        }

        // msdu length runs past the payload
        let mut truncated = p.clone();
        truncated.truncate(p.len() - 4);
        let (status, _) = run(&handler, &sreq(Subsystem::Mac, DATA_REQ, &truncated));
        assert_eq!(status, RpcStatus::ErrParameter);
    }

    #[test]
    fn test_energy_scan_confirms() {
        let stack = stack();
        let mut events = stack.subscribe();
        let handler = MacHandler::new(stack);

        let mut p = Vec::new();
        p.extend_from_slice(&0x07FF_F800u32.to_le_bytes());
        p.extend_from_slice(&[0, 3, 0, 0]);
        p.extend_from_slice(&[0u8; 11]);

        let (_, out) = run(&handler, &sreq(Subsystem::Mac, SCAN_REQ, &p));
        assert_eq!(&out[0].payload[..], &[0x00]);

        match events.try_recv().unwrap() {
            StackEvent::Mac(MacEvent::ScanConfirm(cnf)) => {
                assert!(matches!(cnf.results, ScanResults::Energy(_)));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_poll_and_purge() {
        let handler = handler();
        let mut p = vec![MacAddress::MODE_NONE];
        p.extend_from_slice(&[0u8; 8]);
        p.extend_from_slice(&[0x62, 0x1A]);
        p.extend_from_slice(&[0u8; 11]);
        let (_, out) = run(&handler, &sreq(Subsystem::Mac, POLL_REQ, &p));
        assert_eq!(&out[0].payload[..], &[Status::MAC_INVALID_PARAMETER.code()]);

        let (_, out) = run(&handler, &sreq(Subsystem::Mac, PURGE_REQ, &[9]));
        assert_ne!(out[0].payload[0], 0x00);
    }

    #[test]
    fn test_unknown_command() {
        let (status, out) = run(&handler(), &sreq(Subsystem::Mac, 0x20, &[]));
        assert_eq!(status, RpcStatus::ErrCommandId);
        assert!(out.is_empty());
    }
}
