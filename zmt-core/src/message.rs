//! Request and response bodies carried by envelopes.

use crate::event::EventId;
use serde::{Deserialize, Serialize};

/// Firmware identity reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub transport_rev: u8,
    pub product: u8,
    pub major: u8,
    pub minor: u8,
    pub maint: u8,
}

/// Role of the device in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LogicalType {
    #[default]
    Coordinator = 0,
    Router = 1,
    EndDevice = 2,
}

impl LogicalType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Device-type bitmap reported by UTIL GET_DEVICE_INFO.
    pub fn capability_bits(self) -> u8 {
        match self {
            LogicalType::Coordinator => 0x01,
            LogicalType::Router => 0x02,
            LogicalType::EndDevice => 0x04,
        }
    }

    pub fn is_router_capable(self) -> bool {
        matches!(self, LogicalType::Coordinator | LogicalType::Router)
    }
}

/// Network state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceState {
    #[default]
    Hold = 0,
    Init = 1,
    NwkDisc = 2,
    NwkJoining = 3,
    EndDevice = 6,
    Router = 7,
    CoordStarting = 8,
    ZbCoord = 9,
    NwkOrphan = 10,
}

impl DeviceState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_on_network(self) -> bool {
        matches!(
            self,
            DeviceState::EndDevice | DeviceState::Router | DeviceState::ZbCoord
        )
    }
}

/// Which parameters a config read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigReadReq {
    pub pan_id: bool,
    pub channel_mask: bool,
    pub ext_pan_id: bool,
    pub tx_power: bool,
    pub precfg_key: bool,
}

impl ConfigReadReq {
    pub fn all() -> Self {
        Self {
            pan_id: true,
            channel_mask: true,
            ext_pan_id: true,
            tx_power: true,
            precfg_key: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigReadRsp {
    pub pan_id: Option<u16>,
    pub channel_mask: Option<u32>,
    pub ext_pan_id: Option<[u8; 8]>,
    pub tx_power: Option<i8>,
    pub precfg_key: Option<[u8; 16]>,
}

/// Parameters to change; `None` leaves a value as it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigWriteReq {
    pub pan_id: Option<u16>,
    pub channel_mask: Option<u32>,
    pub ext_pan_id: Option<[u8; 8]>,
    pub precfg_key: Option<[u8; 16]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NwkInfo {
    pub nwk_addr: u16,
    pub pan_id: u16,
    pub parent_nwk_addr: u16,
    pub ext_pan_id: [u8; 8],
    pub ieee_addr: [u8; 8],
    pub logical_channel: u8,
    pub device_state: DeviceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxPowerRsp {
    pub applied_dbm: i8,
}

/// A simple descriptor registered by an application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    #[serde(default)]
    pub latency: u8,
    #[serde(default)]
    pub input_clusters: Vec<u16>,
    #[serde(default)]
    pub output_clusters: Vec<u16>,
}

/// Destination of an AF data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfAddress {
    Short(u16),
    Extended([u8; 8]),
    Group(u16),
    Broadcast(u16),
}

impl Default for AfAddress {
    fn default() -> Self {
        AfAddress::Short(0)
    }
}

impl AfAddress {
    /// Short address, when the destination has one.
    pub fn short(self) -> Option<u16> {
        match self {
            AfAddress::Short(addr) | AfAddress::Group(addr) | AfAddress::Broadcast(addr) => {
                Some(addr)
            }
            AfAddress::Extended(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AfDataRequest {
    pub dst: AfAddress,
    pub dst_endpoint: u8,
    pub dst_pan_id: u16,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub trans_id: u8,
    pub options: u8,
    pub radius: u8,
    pub payload: Vec<u8>,
}

/// How much of the address list a ZDO address request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AddrReqType {
    #[default]
    Single = 0,
    Extended = 1,
}

impl AddrReqType {
    pub fn from_code(code: u8) -> Self {
        if code == 1 {
            AddrReqType::Extended
        } else {
            AddrReqType::Single
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NwkAddrReq {
    pub ieee_addr: [u8; 8],
    pub req_type: AddrReqType,
    pub start_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IeeeAddrReq {
    pub nwk_addr: u16,
    pub req_type: AddrReqType,
    pub start_index: u8,
}

/// Request addressed to a device about a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZdoDescReq {
    pub dst_addr: u16,
    pub nwk_addr_of_interest: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitJoinReq {
    pub dst_addr: u16,
    pub duration: u8,
    pub tc_significance: bool,
}

/// Request body of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SysReset { new_nwk_state: bool },
    SysVersion,
    SysConfigRead(ConfigReadReq),
    SysConfigWrite(ConfigWriteReq),
    SysSetTxPower { dbm: i8 },
    SysNwkInfoRead,
    DevStart { start_delay: u16 },
    DevZdoCallbacks { enable: bool },
    AfRegister(EndpointDescriptor),
    AfUnregister { endpoint: u8 },
    AfDataRequest(AfDataRequest),
    ZdoNwkAddr(NwkAddrReq),
    ZdoIeeeAddr(IeeeAddrReq),
    ZdoNodeDesc(ZdoDescReq),
    ZdoActiveEndpoint(ZdoDescReq),
    ZdoMgmtPermitJoin(PermitJoinReq),
}

impl Request {
    /// Event id this request is sent under.
    pub fn event_id(&self) -> EventId {
        match self {
            Request::SysReset { .. } => EventId::SYS_RESET_REQ,
            Request::SysVersion => EventId::SYS_VERSION_REQ,
            Request::SysConfigRead(_) => EventId::SYS_CONFIG_READ_REQ,
            Request::SysConfigWrite(_) => EventId::SYS_CONFIG_WRITE_REQ,
            Request::SysSetTxPower { .. } => EventId::SYS_SET_TX_POWER_REQ,
            Request::SysNwkInfoRead => EventId::SYS_NWK_INFO_READ_REQ,
            Request::DevStart { .. } => EventId::DEV_START_REQ,
            Request::DevZdoCallbacks { .. } => EventId::DEV_ZDO_CBS_REQ,
            Request::AfRegister(_) => EventId::AF_REGISTER_REQ,
            Request::AfUnregister { .. } => EventId::AF_UNREGISTER_REQ,
            Request::AfDataRequest(_) => EventId::AF_DATA_REQ,
            Request::ZdoNwkAddr(_) => EventId::ZDO_NWK_ADDR_REQ,
            Request::ZdoIeeeAddr(_) => EventId::ZDO_IEEE_ADDR_REQ,
            Request::ZdoNodeDesc(_) => EventId::ZDO_NODE_DESC_REQ,
            Request::ZdoActiveEndpoint(_) => EventId::ZDO_ACTIVE_ENDPOINT_REQ,
            Request::ZdoMgmtPermitJoin(_) => EventId::ZDO_MGMT_PERMIT_JOIN_REQ,
        }
    }

    /// Bytes the request occupies in an envelope allocation.
    pub fn wire_size(&self) -> usize {
        match self {
            Request::SysVersion | Request::SysNwkInfoRead => 0,
            Request::SysReset { .. }
            | Request::SysSetTxPower { .. }
            | Request::DevZdoCallbacks { .. }
            | Request::AfUnregister { .. } => 1,
            Request::DevStart { .. } => 2,
            Request::SysConfigRead(_) => 5,
            Request::SysConfigWrite(_) => 2 + 4 + 8 + 16 + 4,
            Request::AfRegister(desc) => {
                8 + 2 * (desc.input_clusters.len() + desc.output_clusters.len())
            }
            Request::AfDataRequest(req) => 20 + req.payload.len(),
            Request::ZdoNwkAddr(_) => 10,
            Request::ZdoIeeeAddr(_) => 4,
            Request::ZdoNodeDesc(_) | Request::ZdoActiveEndpoint(_) => 4,
            Request::ZdoMgmtPermitJoin(_) => 4,
        }
    }
}

/// Response body written into an envelope by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Version(VersionInfo),
    ConfigRead(ConfigReadRsp),
    NwkInfo(NwkInfo),
    TxPower(TxPowerRsp),
}

macro_rules! response_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Response {
                fn from(value: $ty) -> Self {
                    Response::$variant(value)
                }
            }

            impl TryFrom<Response> for $ty {
                type Error = Response;

                fn try_from(response: Response) -> Result<Self, Self::Error> {
                    match response {
                        Response::$variant(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

response_conversions! {
    Version => VersionInfo,
    ConfigRead => ConfigReadRsp,
    NwkInfo => NwkInfo,
    TxPower => TxPowerRsp,
}
