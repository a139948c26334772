//! The internal RPC message wrapper.

use crate::event::EventId;
use crate::inbox::TaskId;
use crate::indication::Indication;
use crate::message::{Request, Response};
use crate::pool::EnvelopeLease;
use zmt_protocol::Status;

/// A request travelling to the engine and, with status and response filled
/// in, back to the task that sent it.
///
/// Request and response share one allocation: the lease is released when
/// the caller drops the returned envelope.
#[derive(Debug)]
pub struct Envelope {
    pub event_id: EventId,
    pub status: Status,
    pub source_task: TaskId,
    /// Per-client call number. Zero for envelopes not sent by an
    /// [`RpcClient`](crate::rpc::RpcClient).
    pub call_seq: u64,
    pub request: Request,
    pub response: Option<Response>,
    lease: Option<EnvelopeLease>,
}

impl Envelope {
    pub fn new(source_task: TaskId, request: Request, lease: EnvelopeLease) -> Self {
        Self {
            event_id: request.event_id(),
            status: Status::SUCCESS,
            source_task,
            call_seq: 0,
            request,
            response: None,
            lease: Some(lease),
        }
    }

    /// Builds an envelope that does not count against a pool.
    pub fn unpooled(source_task: TaskId, request: Request) -> Self {
        Self {
            event_id: request.event_id(),
            status: Status::SUCCESS,
            source_task,
            call_seq: 0,
            request,
            response: None,
            lease: None,
        }
    }

    pub fn with_call_seq(mut self, call_seq: u64) -> Self {
        self.call_seq = call_seq;
        self
    }

    /// Bytes reserved for this envelope.
    pub fn allocated(&self) -> usize {
        self.lease.as_ref().map_or(0, |l| l.size())
    }
}

/// One entry in a task inbox.
#[derive(Debug)]
pub enum InboxItem {
    Reply(Envelope),
    Indication(Indication),
}

impl InboxItem {
    pub fn event_id(&self) -> EventId {
        match self {
            InboxItem::Reply(env) => env.event_id,
            InboxItem::Indication(ind) => ind.event_id(),
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, InboxItem::Reply(_))
    }

    /// Whether this is the reply to call `call_seq` for `event_id`.
    pub fn answers(&self, event_id: EventId, call_seq: u64) -> bool {
        match self {
            InboxItem::Reply(env) => env.event_id == event_id && env.call_seq == call_seq,
            InboxItem::Indication(_) => false,
        }
    }
}
