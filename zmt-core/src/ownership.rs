//! Indication release registry.
//!
//! The registry is a closed set. Each known indication id maps to a release
//! routine that drops every sub-buffer that type owns and then the envelope.
//! Ids outside the set are handed back untouched.

use crate::event::EventId;
use crate::indication::Indication;
use parking_lot::Mutex;
use std::collections::HashMap;

/// What a release routine freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseReport {
    pub event_id: EventId,
    /// Allocated sub-buffers dropped. Empty lists were never allocated.
    pub sub_buffers: usize,
}

/// Result of handing an indication to the registry.
#[derive(Debug)]
pub enum FreeOutcome {
    Freed(ReleaseReport),
    NotRecognized(Indication),
}

impl FreeOutcome {
    pub fn is_freed(&self) -> bool {
        matches!(self, FreeOutcome::Freed(_))
    }
}

fn drop_buffer<T>(buf: Vec<T>) -> usize {
    let allocated = usize::from(buf.capacity() > 0);
    drop(buf);
    allocated
}

/// Runs the release routine for `indication`.
///
/// Taking the indication by value makes a second release of the same
/// message impossible to express.
pub fn release(indication: Indication) -> FreeOutcome {
    let event_id = indication.event_id();
    let sub_buffers = match indication {
        Indication::SrcRtgInd(ind) => drop_buffer(ind.relays),
        Indication::NwkAddrRsp(rsp) | Indication::IeeeAddrRsp(rsp) => {
            drop_buffer(rsp.assoc_devices)
        }
        Indication::SimpleDescRsp(rsp) => {
            drop_buffer(rsp.input_clusters) + drop_buffer(rsp.output_clusters)
        }
        Indication::ActiveEpRsp(rsp) | Indication::MatchDescRsp(rsp) => {
            drop_buffer(rsp.endpoints)
        }
        Indication::UserDescRsp(rsp) => drop_buffer(rsp.descriptor),
        Indication::MgmtNwkDiscRsp(rsp) => drop_buffer(rsp.networks),
        Indication::MgmtLqiRsp(rsp) => drop_buffer(rsp.neighbors),
        Indication::MgmtRtgRsp(rsp) => drop_buffer(rsp.routes),
        Indication::MgmtBindRsp(rsp) => drop_buffer(rsp.bindings),
        Indication::MgmtNwkUpdateNotify(ind) => drop_buffer(ind.energy_values),
        Indication::AfIncomingMsg(msg) => drop_buffer(msg.payload),
        Indication::SysOtaMsg(msg) => drop_buffer(msg.data),

        // Envelope only
        Indication::ConcentratorInd(_)
        | Indication::JoinCnf(_)
        | Indication::LeaveInd(_)
        | Indication::PermitJoinInd { .. }
        | Indication::TcDeviceInd(_)
        | Indication::DeviceAnnounce(_)
        | Indication::NodeDescRsp(_)
        | Indication::PowerDescRsp(_)
        | Indication::ServerDiscRsp(_)
        | Indication::BindRsp(_)
        | Indication::EndDeviceBindRsp(_)
        | Indication::UnbindRsp(_)
        | Indication::MgmtLeaveRsp(_)
        | Indication::MgmtDirectJoinRsp(_)
        | Indication::MgmtPermitJoinRsp(_)
        | Indication::AfDataConfirm(_)
        | Indication::BdbNotification(_)
        | Indication::BdbIdentifyTime(_)
        | Indication::BdbBindNotification(_)
        | Indication::BdbTcLinkKeyExchange(_)
        | Indication::BdbTouchlinkTargetEnable { .. }
        | Indication::BdbCbkeTcLinkKeyExchange { .. }
        | Indication::BdbFilterNwkDescriptor { .. }
        | Indication::GpCommissioningMode(_)
        | Indication::GpDataInd(_)
        | Indication::GpSecurityReq(_)
        | Indication::PauseDevice { .. } => 0,

        other @ (Indication::NwkDiscCnf { .. }
        | Indication::LeaveCnf { .. }
        | Indication::SysResetInd { .. }
        | Indication::AfReflectError(_)
        | Indication::DevStateChange { .. }
        | Indication::Unrecognized { .. }) => {
            tracing::debug!("no release routine for {}", event_id);
            return FreeOutcome::NotRecognized(other);
        }
    };

    FreeOutcome::Freed(ReleaseReport {
        event_id,
        sub_buffers,
    })
}

/// Releases an indication, returning whether a routine was found.
///
/// An unrecognized indication is dropped after being reported; use
/// [`release`] to get it back instead.
pub fn free_indication(indication: Indication) -> bool {
    release(indication).is_freed()
}

/// Running totals per event id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerEntry {
    pub envelopes: u64,
    pub sub_buffers: u64,
    pub not_recognized: u64,
}

/// Registry front end that records every release.
#[derive(Debug, Default)]
pub struct ReleaseLedger {
    entries: Mutex<HashMap<EventId, LedgerEntry>>,
}

impl ReleaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `indication` and records the outcome.
    pub fn release(&self, indication: Indication) -> FreeOutcome {
        let event_id = indication.event_id();
        let outcome = release(indication);
        let mut entries = self.entries.lock();
        let entry = entries.entry(event_id).or_default();
        match &outcome {
            FreeOutcome::Freed(report) => {
                entry.envelopes += 1;
                entry.sub_buffers += report.sub_buffers as u64;
            }
            FreeOutcome::NotRecognized(_) => entry.not_recognized += 1,
        }
        outcome
    }

    pub fn entry(&self, event_id: EventId) -> LedgerEntry {
        self.entries
            .lock()
            .get(&event_id)
            .copied()
            .unwrap_or_default()
    }

    /// Envelopes released across all ids.
    pub fn total_envelopes(&self) -> u64 {
        self.entries.lock().values().map(|e| e.envelopes).sum()
    }
}
