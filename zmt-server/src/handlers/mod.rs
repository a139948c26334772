//! MT command handlers.
//!
//! One handler per served subsystem. Each reads its command fields in wire
//! order through a [`PayloadReader`](zmt_protocol::PayloadReader), calls the
//! simulated stack once and writes its own SRSP. Unknown command ids answer
//! `ErrCommandId`; a payload that ends early answers `ErrParameter`.

pub mod af;
pub mod mac;
pub mod sys;
pub mod util;
pub mod zdo;

pub use af::AfHandler;
pub use mac::MacHandler;
pub use sys::SysHandler;
pub use util::UtilHandler;
pub use zdo::ZdoHandler;

use crate::callbacks::CallbackMask;
use crate::config::MtConfig;
use crate::dispatch::DispatchTable;
use crate::error::ServerError;
use crate::metrics::Metrics;
use std::sync::Arc;
use zmt_core::SimulatedStack;
use zmt_protocol::{RpcStatus, Subsystem};

/// Outcome of a single command. `Err` carries the dispatch status.
pub type HandlerResult = Result<(), RpcStatus>;

/// Subsystems this server has handlers for.
pub const SUPPORTED_SUBSYSTEMS: [Subsystem; 5] = [
    Subsystem::Sys,
    Subsystem::Mac,
    Subsystem::Af,
    Subsystem::Zdo,
    Subsystem::Util,
];

pub(crate) fn into_status(result: HandlerResult) -> RpcStatus {
    match result {
        Ok(()) => RpcStatus::Success,
        Err(status) => status,
    }
}

/// Capability bits SYS PING reports for `enabled`.
pub fn capabilities_for(enabled: &[Subsystem]) -> u16 {
    SUPPORTED_SUBSYSTEMS
        .iter()
        .filter(|s| enabled.contains(s))
        .fold(0, |caps, s| caps | s.capability())
}

/// Builds the dispatch table for the subsystems enabled in `mt`.
pub fn build_dispatch_table(
    stack: Arc<SimulatedStack>,
    callbacks: Arc<CallbackMask>,
    mt: &MtConfig,
    metrics: Option<Arc<Metrics>>,
) -> Result<DispatchTable, ServerError> {
    let capabilities = capabilities_for(&mt.subsystems);

    let mut builder = DispatchTable::builder()
        .with_enabled(&mt.subsystems)
        .with_max_payload(mt.max_payload);
    if let Some(metrics) = metrics {
        builder = builder.with_metrics(metrics);
    }

    let table = builder
        .register(Arc::new(SysHandler::new(stack.clone(), capabilities)))?
        .register(Arc::new(MacHandler::new(stack.clone())))?
        .register(Arc::new(AfHandler::new(stack.clone())))?
        .register(Arc::new(ZdoHandler::new(stack.clone())))?
        .register(Arc::new(UtilHandler::new(stack, callbacks)))?
        .build();

    Ok(table)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::response::FrameBuffer;
    use crate::SubsystemHandler;
    use bytes::Bytes;
    use zmt_core::DeviceConfig;
    use zmt_protocol::{Frame, FrameType};

    pub fn stack() -> Arc<SimulatedStack> {
        SimulatedStack::new(&DeviceConfig::default())
    }

    pub fn sreq(subsystem: Subsystem, command_id: u8, payload: &[u8]) -> Frame {
        Frame::new(
            FrameType::SyncRequest,
            subsystem,
            command_id,
            Bytes::copy_from_slice(payload),
        )
    }

    pub fn areq(subsystem: Subsystem, command_id: u8, payload: &[u8]) -> Frame {
        Frame::new(
            FrameType::AsyncRequest,
            subsystem,
            command_id,
            Bytes::copy_from_slice(payload),
        )
    }

    /// Runs one frame through a handler and returns its status and output.
    pub fn run(handler: &dyn SubsystemHandler, frame: &Frame) -> (RpcStatus, Vec<Frame>) {
        let mut sink = FrameBuffer::new();
        let status = handler.handle(frame, &mut sink);
        (status, sink.take())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::response::FrameBuffer;
    use zmt_protocol::FrameType;

    #[test]
    fn test_capabilities_for() {
        assert_eq!(capabilities_for(&SUPPORTED_SUBSYSTEMS), 0x005B);
        assert_eq!(capabilities_for(&[Subsystem::Sys, Subsystem::Util]), 0x0041);
        // Enabled but unserved subsystems report nothing
        assert_eq!(capabilities_for(&[Subsystem::Nwk]), 0);
    }

    #[test]
    fn test_build_dispatch_table() {
        let mt = MtConfig::default();
        let callbacks = Arc::new(CallbackMask::new(&mt.callbacks));
        let table = build_dispatch_table(stack(), callbacks, &mt, None).unwrap();

        assert_eq!(table.subsystems(), SUPPORTED_SUBSYSTEMS.to_vec());
        assert_eq!(table.capabilities(), 0x005B);

        let mut sink = FrameBuffer::new();
        let status = table.dispatch(&sreq(Subsystem::Sys, sys::PING, &[]), &mut sink);
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&sink.frames()[0].payload[..], &0x005Bu16.to_le_bytes());
    }

    #[test]
    fn test_disabled_subsystem_answers_err_subsystem() {
        let mt = MtConfig {
            subsystems: vec![Subsystem::Sys],
            ..Default::default()
        };
        let callbacks = Arc::new(CallbackMask::new(&mt.callbacks));
        let table = build_dispatch_table(stack(), callbacks, &mt, None).unwrap();

        let mut sink = FrameBuffer::new();
        let status = table.dispatch(&sreq(Subsystem::Util, 0x00, &[]), &mut sink);
        assert_eq!(status, RpcStatus::ErrSubsystem);
        let reply = &sink.frames()[0];
        assert_eq!(reply.frame_type, FrameType::SyncResponse);
        assert_eq!(reply.payload[0], RpcStatus::ErrSubsystem.code());

        // PING only advertises what is served
        let status = table.dispatch(&sreq(Subsystem::Sys, sys::PING, &[]), &mut sink);
        assert_eq!(status, RpcStatus::Success);
        assert_eq!(&sink.frames()[1].payload[..], &[0x01, 0x00]);
    }
}
