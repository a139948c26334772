//! Subsystem dispatch.
//!
//! One slot per subsystem id, filled once at startup and read-only after
//! that. The table enforces the frame length limit, routes to the slot's
//! handler and turns a failure into an error SRSP when the request was
//! synchronous.

use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::response::ResponseSink;
use std::sync::Arc;
use zmt_protocol::{
    Encoder, Frame, FrameType, RpcStatus, Subsystem, DEFAULT_MAX_PAYLOAD, MAX_SUBSYSTEM,
};

const SLOTS: usize = MAX_SUBSYSTEM as usize;

/// Serves every command of one subsystem.
pub trait SubsystemHandler: Send + Sync {
    fn subsystem(&self) -> Subsystem;

    /// Handles one frame and returns its dispatch status.
    ///
    /// Successful commands write their own SRSP (for SREQ frames) or
    /// callbacks into `sink`. Error replies are left to the table.
    fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus;
}

/// Immutable subsystem dispatch table.
pub struct DispatchTable {
    slots: [Option<Arc<dyn SubsystemHandler>>; SLOTS],
    max_payload: usize,
    metrics: Option<Arc<Metrics>>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::new()
    }

    /// Processes one decoded frame.
    ///
    /// The length limit is checked before the subsystem, so an oversized
    /// frame reports ERR_LENGTH even when its subsystem is unknown. Only an
    /// SREQ gets an error reply; failed AREQ and POLL frames produce nothing.
    pub fn dispatch(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        let status = self.route(frame, sink);

        if let Some(ref metrics) = self.metrics {
            let subsystem = subsystem_label(frame.subsystem);
            metrics
                .dispatch_total
                .with_label_values(&[subsystem.as_str(), status.label()])
                .inc();
        }

        if !status.is_success() {
            tracing::debug!("Dispatch of {} failed: {}", frame, status);
            if frame.frame_type == FrameType::SyncRequest {
                sink.send(Encoder::error_srsp(status, frame.cmd0(), frame.cmd1()));
            }
        }
        status
    }

    fn route(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
        if frame.len() > self.max_payload {
            return RpcStatus::ErrLength;
        }

        let Some(handler) = self
            .slots
            .get(usize::from(frame.subsystem))
            .and_then(|slot| slot.as_ref())
        else {
            return RpcStatus::ErrSubsystem;
        };

        let _timer = self.metrics.as_ref().map(|m| {
            m.handler_duration
                .with_label_values(&[handler.subsystem().name()])
                .start_timer()
        });
        handler.handle(frame, sink)
    }

    /// Capability bits of the populated slots, as reported by SYS PING.
    pub fn capabilities(&self) -> u16 {
        self.subsystems()
            .into_iter()
            .fold(0, |caps, s| caps | s.capability())
    }

    /// Subsystems with a handler, in id order.
    pub fn subsystems(&self) -> Vec<Subsystem> {
        self.slots
            .iter()
            .flatten()
            .map(|handler| handler.subsystem())
            .collect()
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("subsystems", &self.subsystems())
            .field("max_payload", &self.max_payload)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

pub(crate) fn subsystem_label(id: u8) -> String {
    match Subsystem::from_id(id) {
        Some(sub) => sub.name().to_string(),
        None => format!("unknown_{}", id),
    }
}

/// Assembles a [`DispatchTable`].
pub struct DispatchTableBuilder {
    slots: [Option<Arc<dyn SubsystemHandler>>; SLOTS],
    enabled: Option<Vec<Subsystem>>,
    max_payload: usize,
    metrics: Option<Arc<Metrics>>,
}

impl DispatchTableBuilder {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            enabled: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
            metrics: None,
        }
    }

    /// Limits the table to these subsystems. Handlers for anything else are
    /// skipped on registration.
    pub fn with_enabled(mut self, subsystems: &[Subsystem]) -> Self {
        self.enabled = Some(subsystems.to_vec());
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether a handler for `subsystem` would be installed.
    pub fn is_enabled(&self, subsystem: Subsystem) -> bool {
        self.enabled
            .as_ref()
            .map_or(true, |enabled| enabled.contains(&subsystem))
    }

    /// Installs a handler in its subsystem's slot.
    pub fn register(mut self, handler: Arc<dyn SubsystemHandler>) -> Result<Self, ServerError> {
        let subsystem = handler.subsystem();
        if !self.is_enabled(subsystem) {
            tracing::debug!("Subsystem {} not enabled, skipping handler", subsystem);
            return Ok(self);
        }

        let slot = &mut self.slots[usize::from(subsystem.id())];
        if slot.is_some() {
            return Err(ServerError::DuplicateHandler(subsystem));
        }
        *slot = Some(handler);
        Ok(self)
    }

    pub fn build(self) -> DispatchTable {
        let table = DispatchTable {
            slots: self.slots,
            max_payload: self.max_payload,
            metrics: self.metrics,
        };
        tracing::info!(
            "Dispatch table ready: {:?} (max payload {})",
            table.subsystems(),
            table.max_payload
        );
        table
    }
}

impl Default for DispatchTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{status_srsp, FrameBuffer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zmt_protocol::Status;

    struct CountingHandler {
        subsystem: Subsystem,
        calls: AtomicUsize,
        result: RpcStatus,
    }

    impl CountingHandler {
        fn new(subsystem: Subsystem, result: RpcStatus) -> Arc<Self> {
            Arc::new(Self {
                subsystem,
                calls: AtomicUsize::new(0),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SubsystemHandler for CountingHandler {
        fn subsystem(&self) -> Subsystem {
            self.subsystem
        }

        fn handle(&self, frame: &Frame, sink: &mut dyn ResponseSink) -> RpcStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.result.is_success() && frame.frame_type == FrameType::SyncRequest {
                sink.send(status_srsp(self.subsystem, frame.command_id, Status::SUCCESS));
            }
            self.result
        }
    }

    fn table_with(handler: Arc<CountingHandler>, max_payload: usize) -> DispatchTable {
        DispatchTable::builder()
            .with_max_payload(max_payload)
            .register(handler)
            .unwrap()
            .build()
    }

    #[test]
    fn test_length_checked_before_lookup() {
        let handler = CountingHandler::new(Subsystem::Util, RpcStatus::Success);
        let table = table_with(handler.clone(), 128);
        let frame = Frame::new(FrameType::SyncRequest, Subsystem::Util, 0x00, vec![0u8; 250]);

        let mut sink = FrameBuffer::new();
        assert_eq!(table.dispatch(&frame, &mut sink), RpcStatus::ErrLength);
        assert_eq!(handler.calls(), 0);

        // Length errors win over unknown subsystems
        let frame = Frame::with_raw_subsystem(FrameType::SyncRequest, 20, 0x00, vec![0u8; 250]);
        assert_eq!(table.dispatch(&frame, &mut sink), RpcStatus::ErrLength);
        assert_eq!(handler.calls(), 0);
    }

    #[test]
    fn test_empty_slot_is_err_subsystem() {
        let handler = CountingHandler::new(Subsystem::Util, RpcStatus::Success);
        let table = table_with(handler.clone(), 250);
        let frame = Frame::new(FrameType::SyncRequest, Subsystem::Nwk, 0x01, vec![]);

        let mut sink = FrameBuffer::new();
        assert_eq!(table.dispatch(&frame, &mut sink), RpcStatus::ErrSubsystem);
        assert_eq!(handler.calls(), 0);

        let reply = &sink.frames()[0];
        assert!(Encoder::is_error_srsp_for(reply, frame.cmd0(), frame.cmd1()));
        assert_eq!(reply.payload[0], RpcStatus::ErrSubsystem.code());
    }

    #[test]
    fn test_error_reply_only_for_sreq() {
        let handler = CountingHandler::new(Subsystem::Af, RpcStatus::ErrCommandId);
        let table = table_with(handler.clone(), 250);

        let mut sink = FrameBuffer::new();
        let sreq = Frame::new(FrameType::SyncRequest, Subsystem::Af, 0x7F, vec![1]);
        assert_eq!(table.dispatch(&sreq, &mut sink), RpcStatus::ErrCommandId);
        assert_eq!(sink.len(), 1);
        let reply = &sink.frames()[0];
        assert_eq!(reply.frame_type, FrameType::SyncResponse);
        assert_eq!(reply.subsystem, Subsystem::Af.id());
        assert_eq!(reply.command_id, 0x7F);
        assert_eq!(&reply.payload[..], &[2, sreq.cmd0(), 0x7F]);

        let mut sink = FrameBuffer::new();
        let areq = Frame::new(FrameType::AsyncRequest, Subsystem::Af, 0x7F, vec![1]);
        assert_eq!(table.dispatch(&areq, &mut sink), RpcStatus::ErrCommandId);
        assert!(sink.is_empty());

        let poll = Frame::new(FrameType::Poll, Subsystem::Af, 0x7F, vec![]);
        assert_eq!(table.dispatch(&poll, &mut sink), RpcStatus::ErrCommandId);
        assert!(sink.is_empty());
        assert_eq!(handler.calls(), 3);
    }

    #[test]
    fn test_success_passes_handler_reply() {
        let handler = CountingHandler::new(Subsystem::Sys, RpcStatus::Success);
        let table = table_with(handler.clone(), 250);
        let frame = Frame::new(FrameType::SyncRequest, Subsystem::Sys, 0x01, vec![]);

        let mut sink = FrameBuffer::new();
        assert_eq!(table.dispatch(&frame, &mut sink), RpcStatus::Success);
        assert_eq!(sink.len(), 1);
        assert_eq!(&sink.frames()[0].payload[..], &[0]);
    }

    #[test]
    fn test_duplicate_and_disabled_registration() {
        let first = CountingHandler::new(Subsystem::Sys, RpcStatus::Success);
        let second = CountingHandler::new(Subsystem::Sys, RpcStatus::Success);
        let result = DispatchTable::builder()
            .register(first)
            .unwrap()
            .register(second);
        assert!(matches!(
            result,
            Err(ServerError::DuplicateHandler(Subsystem::Sys))
        ));

        let table = DispatchTable::builder()
            .with_enabled(&[Subsystem::Sys])
            .register(CountingHandler::new(Subsystem::Sys, RpcStatus::Success))
            .unwrap()
            .register(CountingHandler::new(Subsystem::Mac, RpcStatus::Success))
            .unwrap()
            .build();
        assert_eq!(table.subsystems(), vec![Subsystem::Sys]);
    }

    #[test]
    fn test_capabilities() {
        let table = DispatchTable::builder()
            .register(CountingHandler::new(Subsystem::Sys, RpcStatus::Success))
            .unwrap()
            .register(CountingHandler::new(Subsystem::Util, RpcStatus::Success))
            .unwrap()
            .register(CountingHandler::new(Subsystem::Zdo, RpcStatus::Success))
            .unwrap()
            .build();
        assert_eq!(table.capabilities(), 0x0001 | 0x0040 | 0x0010);
    }

    #[test]
    fn test_dispatch_counts_metrics() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let table = DispatchTable::builder()
            .with_metrics(metrics.clone())
            .register(CountingHandler::new(Subsystem::Sys, RpcStatus::Success))
            .unwrap()
            .build();

        let mut sink = FrameBuffer::new();
        table.dispatch(
            &Frame::new(FrameType::SyncRequest, Subsystem::Sys, 0x01, vec![]),
            &mut sink,
        );
        table.dispatch(
            &Frame::with_raw_subsystem(FrameType::SyncRequest, 30, 0x01, vec![]),
            &mut sink,
        );

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains("subsystem=\"SYS\""));
        assert!(encoded.contains("status=\"err_subsystem\""));
        assert!(encoded.contains("subsystem=\"unknown_30\""));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn unknown_subsystems_never_reach_handlers(
                subsystem in MAX_SUBSYSTEM..32u8,
                command_id in any::<u8>(),
                payload in proptest::collection::vec(any::<u8>(), 0..64),
            ) {
                let handlers: Vec<Arc<CountingHandler>> = Subsystem::ALL
                    .iter()
                    .map(|s| CountingHandler::new(*s, RpcStatus::Success))
                    .collect();
                let mut builder = DispatchTable::builder();
                for handler in &handlers {
                    builder = builder.register(handler.clone()).unwrap();
                }
                let table = builder.build();

                let frame = Frame::with_raw_subsystem(
                    FrameType::SyncRequest,
                    subsystem,
                    command_id,
                    payload,
                );
                let mut sink = FrameBuffer::new();
                prop_assert_eq!(table.dispatch(&frame, &mut sink), RpcStatus::ErrSubsystem);
                prop_assert!(handlers.iter().all(|h| h.calls() == 0));
                prop_assert_eq!(sink.len(), 1);
            }
        }
    }
}
