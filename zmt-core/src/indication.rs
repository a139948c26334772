//! Unsolicited messages from the engine to consumer tasks.
//!
//! Variable-length parts of an indication are owned `Vec`s inside the
//! variant. The consumer owns the whole indication once it is dequeued and
//! hands it to [`crate::ownership::free_indication`] when done.

use crate::event::EventId;
use zmt_protocol::Status;

/// Source of a ZDO response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZdoSource {
    pub src_addr: u16,
    pub status: u8,
}

/// Network or IEEE address response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddrRsp {
    pub source: ZdoSource,
    pub ieee_addr: [u8; 8],
    pub nwk_addr: u16,
    pub start_index: u8,
    pub assoc_devices: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeDescRsp {
    pub source: ZdoSource,
    pub nwk_addr: u16,
    pub logical_type: u8,
    pub mac_capabilities: u8,
    pub manufacturer_code: u16,
    pub max_buffer_size: u8,
    pub server_mask: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerDescRsp {
    pub source: ZdoSource,
    pub nwk_addr: u16,
    pub power_mode: u8,
    pub available_sources: u8,
    pub current_source: u8,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimpleDescRsp {
    pub source: ZdoSource,
    pub nwk_addr: u16,
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

/// Active endpoint or match descriptor response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointListRsp {
    pub source: ZdoSource,
    pub nwk_addr: u16,
    pub endpoints: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserDescRsp {
    pub source: ZdoSource,
    pub nwk_addr: u16,
    pub descriptor: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerDiscRsp {
    pub source: ZdoSource,
    pub server_mask: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkDescriptor {
    pub ext_pan_id: [u8; 8],
    pub logical_channel: u8,
    pub stack_profile: u8,
    pub zigbee_version: u8,
    pub beacon_order: u8,
    pub superframe_order: u8,
    pub permit_joining: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MgmtNwkDiscRsp {
    pub source: ZdoSource,
    pub network_count: u8,
    pub start_index: u8,
    pub networks: Vec<NetworkDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NeighborLqi {
    pub ext_pan_id: [u8; 8],
    pub ext_addr: [u8; 8],
    pub nwk_addr: u16,
    pub device_type: u8,
    pub relationship: u8,
    pub depth: u8,
    pub lqi: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MgmtLqiRsp {
    pub source: ZdoSource,
    pub neighbor_entries: u8,
    pub start_index: u8,
    pub neighbors: Vec<NeighborLqi>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteEntry {
    pub dst_addr: u16,
    pub status: u8,
    pub next_hop: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MgmtRtgRsp {
    pub source: ZdoSource,
    pub routing_entries: u8,
    pub start_index: u8,
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindEntry {
    pub src_addr: [u8; 8],
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub dst_addr_mode: u8,
    pub dst_addr: [u8; 8],
    pub dst_endpoint: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MgmtBindRsp {
    pub source: ZdoSource,
    pub binding_entries: u8,
    pub start_index: u8,
    pub bindings: Vec<BindEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NwkUpdateNotify {
    pub source: ZdoSource,
    pub scanned_channels: u32,
    pub total_transmissions: u16,
    pub transmission_failures: u16,
    pub energy_values: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SrcRtgInd {
    pub src_addr: u16,
    pub relays: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConcentratorInd {
    pub nwk_addr: u16,
    pub ieee_addr: [u8; 8],
    pub path_cost: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinCnf {
    pub status: u8,
    pub device_nwk_addr: u16,
    pub parent_nwk_addr: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaveInd {
    pub src_addr: u16,
    pub ext_addr: [u8; 8],
    pub request: bool,
    pub remove_children: bool,
    pub rejoin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcDeviceInd {
    pub nwk_addr: u16,
    pub ext_addr: [u8; 8],
    pub parent_addr: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceAnnounce {
    pub src_addr: u16,
    pub nwk_addr: u16,
    pub ieee_addr: [u8; 8],
    pub capabilities: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZdoStatusRsp {
    pub source: ZdoSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AfDataConfirm {
    pub status: Status,
    pub endpoint: u8,
    pub trans_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AfIncomingMsg {
    pub group_id: u16,
    pub cluster_id: u16,
    pub src_addr: u16,
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub was_broadcast: bool,
    pub link_quality: u8,
    pub security_use: bool,
    pub timestamp: u32,
    pub trans_seq: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AfReflectError {
    pub status: Status,
    pub endpoint: u8,
    pub trans_id: u8,
    pub dst_addr: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OtaMsg {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdbNotification {
    pub status: u8,
    pub commissioning_mode: u8,
    pub remaining_modes: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdbIdentifyTime {
    pub endpoint: u8,
    pub identify_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdbBindNotification {
    pub cluster_id: u16,
    pub endpoint: u8,
    pub dst_ieee_addr: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdbKeyExchange {
    pub nwk_addr: u16,
    pub ext_addr: [u8; 8],
    pub status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpCommissioningMode {
    pub entering: bool,
    pub commissioning_window: u16,
    pub channel: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpDataInd {
    pub status: u8,
    pub rssi: i8,
    pub link_quality: u8,
    pub src_id: u32,
    pub seq_number: u8,
    pub command_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpSecurityReq {
    pub src_id: u32,
    pub endpoint: u8,
    pub security_level: u8,
    pub frame_counter: u32,
}

/// An unsolicited message delivered to a task inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    // ZDO responses and indications
    DeviceAnnounce(DeviceAnnounce),
    NwkAddrRsp(AddrRsp),
    IeeeAddrRsp(AddrRsp),
    NodeDescRsp(NodeDescRsp),
    PowerDescRsp(PowerDescRsp),
    SimpleDescRsp(SimpleDescRsp),
    ActiveEpRsp(EndpointListRsp),
    MatchDescRsp(EndpointListRsp),
    UserDescRsp(UserDescRsp),
    ServerDiscRsp(ServerDiscRsp),
    EndDeviceBindRsp(ZdoStatusRsp),
    BindRsp(ZdoStatusRsp),
    UnbindRsp(ZdoStatusRsp),
    MgmtNwkDiscRsp(MgmtNwkDiscRsp),
    MgmtLqiRsp(MgmtLqiRsp),
    MgmtRtgRsp(MgmtRtgRsp),
    MgmtBindRsp(MgmtBindRsp),
    MgmtLeaveRsp(ZdoStatusRsp),
    MgmtDirectJoinRsp(ZdoStatusRsp),
    MgmtPermitJoinRsp(ZdoStatusRsp),
    MgmtNwkUpdateNotify(NwkUpdateNotify),
    SrcRtgInd(SrcRtgInd),
    ConcentratorInd(ConcentratorInd),
    NwkDiscCnf { status: u8 },
    JoinCnf(JoinCnf),
    LeaveCnf { status: u8 },
    LeaveInd(LeaveInd),

    // Stack
    SysResetInd { reason: u8 },
    SysOtaMsg(OtaMsg),
    AfDataConfirm(AfDataConfirm),
    AfIncomingMsg(AfIncomingMsg),
    AfReflectError(AfReflectError),
    DevStateChange { state: u8 },
    TcDeviceInd(TcDeviceInd),
    PermitJoinInd { duration: u8 },

    // BDB
    BdbNotification(BdbNotification),
    BdbIdentifyTime(BdbIdentifyTime),
    BdbBindNotification(BdbBindNotification),
    BdbTcLinkKeyExchange(BdbKeyExchange),
    BdbTouchlinkTargetEnable { enabled: bool },
    BdbCbkeTcLinkKeyExchange { status: u8 },
    BdbFilterNwkDescriptor { count: u8 },

    // Green Power
    GpCommissioningMode(GpCommissioningMode),
    GpDataInd(GpDataInd),
    GpSecurityReq(GpSecurityReq),

    PauseDevice { paused: bool },

    /// An id this crate has no structure for; the raw body travels as-is.
    Unrecognized { event_id: EventId, body: Vec<u8> },
}

impl Indication {
    /// Returns the event id this indication is delivered under.
    pub fn event_id(&self) -> EventId {
        match self {
            Indication::DeviceAnnounce(_) => EventId::ZDO_DEVICE_ANNOUNCE,
            Indication::NwkAddrRsp(_) => EventId::ZDO_NWK_ADDR_RSP,
            Indication::IeeeAddrRsp(_) => EventId::ZDO_IEEE_ADDR_RSP,
            Indication::NodeDescRsp(_) => EventId::ZDO_NODE_DESC_RSP,
            Indication::PowerDescRsp(_) => EventId::ZDO_POWER_DESC_RSP,
            Indication::SimpleDescRsp(_) => EventId::ZDO_SIMPLE_DESC_RSP,
            Indication::ActiveEpRsp(_) => EventId::ZDO_ACTIVE_EP_RSP,
            Indication::MatchDescRsp(_) => EventId::ZDO_MATCH_DESC_RSP,
            Indication::UserDescRsp(_) => EventId::ZDO_USER_DESC_RSP,
            Indication::ServerDiscRsp(_) => EventId::ZDO_SERVER_DISC_RSP,
            Indication::EndDeviceBindRsp(_) => EventId::ZDO_END_DEVICE_BIND_RSP,
            Indication::BindRsp(_) => EventId::ZDO_BIND_RSP,
            Indication::UnbindRsp(_) => EventId::ZDO_UNBIND_RSP,
            Indication::MgmtNwkDiscRsp(_) => EventId::ZDO_MGMT_NWK_DISC_RSP,
            Indication::MgmtLqiRsp(_) => EventId::ZDO_MGMT_LQI_RSP,
            Indication::MgmtRtgRsp(_) => EventId::ZDO_MGMT_RTG_RSP,
            Indication::MgmtBindRsp(_) => EventId::ZDO_MGMT_BIND_RSP,
            Indication::MgmtLeaveRsp(_) => EventId::ZDO_MGMT_LEAVE_RSP,
            Indication::MgmtDirectJoinRsp(_) => EventId::ZDO_MGMT_DIRECT_JOIN_RSP,
            Indication::MgmtPermitJoinRsp(_) => EventId::ZDO_MGMT_PERMIT_JOIN_RSP,
            Indication::MgmtNwkUpdateNotify(_) => EventId::ZDO_MGMT_NWK_UPDATE_NOTIFY,
            Indication::SrcRtgInd(_) => EventId::ZDO_SRC_RTG_IND,
            Indication::ConcentratorInd(_) => EventId::ZDO_CONCENTRATOR_IND,
            Indication::NwkDiscCnf { .. } => EventId::ZDO_NWK_DISC_CNF,
            Indication::JoinCnf(_) => EventId::ZDO_JOIN_CNF,
            Indication::LeaveCnf { .. } => EventId::ZDO_LEAVE_CNF,
            Indication::LeaveInd(_) => EventId::ZDO_LEAVE_IND,
            Indication::SysResetInd { .. } => EventId::SYS_RESET_IND,
            Indication::SysOtaMsg(_) => EventId::SYS_OTA_MSG_REQ,
            Indication::AfDataConfirm(_) => EventId::AF_DATA_CONFIRM_IND,
            Indication::AfIncomingMsg(_) => EventId::AF_INCOMING_MSG_IND,
            Indication::AfReflectError(_) => EventId::AF_REFLECT_ERROR_IND,
            Indication::DevStateChange { .. } => EventId::DEV_STATE_CHANGE_IND,
            Indication::TcDeviceInd(_) => EventId::ZDO_TC_DEVICE_IND,
            Indication::PermitJoinInd { .. } => EventId::DEV_PERMIT_JOIN_IND,
            Indication::BdbNotification(_) => EventId::BDB_NOTIFICATION,
            Indication::BdbIdentifyTime(_) => EventId::BDB_IDENTIFY_TIME_CB,
            Indication::BdbBindNotification(_) => EventId::BDB_BIND_NOTIFICATION_CB,
            Indication::BdbTcLinkKeyExchange(_) => {
                EventId::BDB_TC_LINK_KEY_EXCHANGE_NOTIFICATION_IND
            }
            Indication::BdbTouchlinkTargetEnable { .. } => {
                EventId::BDB_TOUCHLINK_TARGET_ENABLE_IND
            }
            Indication::BdbCbkeTcLinkKeyExchange { .. } => {
                EventId::BDB_CBKE_TC_LINK_KEY_EXCHANGE_IND
            }
            Indication::BdbFilterNwkDescriptor { .. } => EventId::BDB_FILTER_NWK_DESCRIPTOR_IND,
            Indication::GpCommissioningMode(_) => EventId::GP_COMMISSIONING_MODE_IND,
            Indication::GpDataInd(_) => EventId::GP_DATA_IND,
            Indication::GpSecurityReq(_) => EventId::GP_SECURITY_REQ,
            Indication::PauseDevice { .. } => EventId::PAUSE_DEVICE_REQ,
            Indication::Unrecognized { event_id, .. } => *event_id,
        }
    }
}
