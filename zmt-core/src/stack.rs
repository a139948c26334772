//! Simulated network stack.
//!
//! The stack is the collaborator behind both boundaries: the MT command
//! handlers call it directly and the engine calls it through
//! [`CommandProcessor`]. Everything it reports asynchronously goes out as a
//! [`StackEvent`] on a broadcast channel.

use crate::engine::{CommandProcessor, Processed};
use crate::inbox::TaskId;
use crate::indication::{
    AddrRsp, AfDataConfirm, AfIncomingMsg, DeviceAnnounce, EndpointListRsp, Indication,
    NodeDescRsp, ZdoSource,
};
use crate::mac::{MacEvent, MacService, SimulatedMac};
use crate::message::{
    AddrReqType, AfAddress, AfDataRequest, ConfigReadReq, ConfigReadRsp, ConfigWriteReq,
    DeviceState, EndpointDescriptor, IeeeAddrReq, LogicalType, NwkAddrReq, NwkInfo,
    PermitJoinReq, Request, Response, TxPowerRsp, VersionInfo, ZdoDescReq,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use zmt_protocol::Status;

/// Sending half of the stack event channel.
pub type StackEventSender = broadcast::Sender<StackEvent>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// ZDP status: no such device.
const ZDP_DEVICE_NOT_FOUND: u8 = 0x81;

/// Lowest and highest application endpoint.
const MIN_ENDPOINT: u8 = 1;
const MAX_ENDPOINT: u8 = 240;

/// Transmit power range of the radio in dBm.
const MIN_TX_POWER: i8 = -22;
const MAX_TX_POWER: i8 = 5;

/// Relationship of an associated device to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Relation {
    Parent = 0,
    ChildRfd = 1,
    ChildRfdRxIdle = 2,
    ChildFfd = 3,
    ChildFfdRxIdle = 4,
    Neighbor = 5,
    Other = 6,
}

impl Relation {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedDevice {
    pub short_addr: u16,
    pub relation: Relation,
}

/// Identity and persisted network parameters of the simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// IEEE address as a 64-bit integer.
    pub ieee_addr: u64,
    pub short_addr: u16,
    pub pan_id: u16,
    pub ext_pan_id: u64,
    pub channel_mask: u32,
    pub logical_type: LogicalType,
    pub security_level: u8,
    pub precfg_key: [u8; 16],
    pub tx_power: i8,
    pub max_endpoints: usize,
    pub version: VersionInfo,
    pub associated_devices: Vec<AssociatedDevice>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ieee_addr: 0x00124B_0001_0203_04,
            short_addr: 0x0000,
            pan_id: 0x1A62,
            ext_pan_id: 0xDDDD_DDDD_DDDD_DDDD,
            channel_mask: 1 << 11,
            logical_type: LogicalType::Coordinator,
            security_level: 5,
            precfg_key: [
                0x01, 0x03, 0x05, 0x07, 0x09, 0x0B, 0x0D, 0x0F, 0x00, 0x02, 0x04, 0x06, 0x08,
                0x0A, 0x0C, 0x0D,
            ],
            tx_power: 0,
            max_endpoints: 16,
            version: VersionInfo {
                transport_rev: 2,
                product: 1,
                major: 2,
                minor: 7,
                maint: 1,
            },
            associated_devices: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn ieee_bytes(&self) -> [u8; 8] {
        self.ieee_addr.to_le_bytes()
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ZMT_DEVICE_PAN_ID") {
            if let Some(pan) = parse_u64(&val).and_then(|v| u16::try_from(v).ok()) {
                self.pan_id = pan;
            }
        }
        if let Ok(val) = std::env::var("ZMT_DEVICE_CHANNEL_MASK") {
            if let Some(mask) = parse_u64(&val).and_then(|v| u32::try_from(v).ok()) {
                self.channel_mask = mask;
            }
        }
        if let Ok(val) = std::env::var("ZMT_DEVICE_IEEE_ADDR") {
            if let Some(addr) = parse_u64(&val) {
                self.ieee_addr = addr;
            }
        }
        if let Ok(val) = std::env::var("ZMT_DEVICE_LOGICAL_TYPE") {
            match val.to_lowercase().as_str() {
                "coordinator" => self.logical_type = LogicalType::Coordinator,
                "router" => self.logical_type = LogicalType::Router,
                "end_device" => self.logical_type = LogicalType::EndDevice,
                _ => {}
            }
        }
    }
}

/// Parses decimal or `0x`-prefixed hex.
fn parse_u64(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Asynchronous output of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    ResetInd { reason: u8, version: VersionInfo },
    StateChange(DeviceState),
    DeviceAnnounce(DeviceAnnounce),
    AfDataConfirm(AfDataConfirm),
    AfIncoming(AfIncomingMsg),
    NwkAddrRsp(AddrRsp),
    IeeeAddrRsp(AddrRsp),
    NodeDescRsp(NodeDescRsp),
    ActiveEpRsp(EndpointListRsp),
    PermitJoin { duration: u8 },
    Mac(MacEvent),
}

impl StackEvent {
    /// The indication internal tasks receive for this event, if any.
    pub fn to_indication(&self) -> Option<Indication> {
        let ind = match self {
            StackEvent::ResetInd { reason, .. } => Indication::SysResetInd { reason: *reason },
            StackEvent::StateChange(state) => Indication::DevStateChange {
                state: state.code(),
            },
            StackEvent::DeviceAnnounce(ann) => Indication::DeviceAnnounce(*ann),
            StackEvent::AfDataConfirm(cnf) => Indication::AfDataConfirm(*cnf),
            StackEvent::AfIncoming(msg) => Indication::AfIncomingMsg(msg.clone()),
            StackEvent::NwkAddrRsp(rsp) => Indication::NwkAddrRsp(rsp.clone()),
            StackEvent::IeeeAddrRsp(rsp) => Indication::IeeeAddrRsp(rsp.clone()),
            StackEvent::NodeDescRsp(rsp) => Indication::NodeDescRsp(*rsp),
            StackEvent::ActiveEpRsp(rsp) => Indication::ActiveEpRsp(rsp.clone()),
            StackEvent::PermitJoin { duration } => Indication::PermitJoinInd {
                duration: *duration,
            },
            StackEvent::Mac(_) => return None,
        };
        Some(ind)
    }
}

/// Snapshot reported by UTIL GET_DEVICE_INFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub ieee_addr: [u8; 8],
    pub short_addr: u16,
    pub logical_type: LogicalType,
    pub device_state: DeviceState,
    /// Short addresses of associated devices; empty unless router capable.
    pub associated: Vec<u16>,
}

/// Persisted parameters reported by UTIL GET_NV_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvInfo {
    pub ieee_addr: [u8; 8],
    pub channel_mask: u32,
    pub pan_id: u16,
    pub security_level: u8,
    pub precfg_key: [u8; 16],
}

/// Reset flavour requested over SYS RESET_REQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    Hard,
    Soft,
}

impl ResetType {
    /// Reset reason reported in the following RESET_IND.
    pub fn reason(self) -> u8 {
        match self {
            ResetType::Hard => 0x00,
            ResetType::Soft => 0x01,
        }
    }
}

/// Outcome of starting the device on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StartupResult {
    RestoredNetwork = 0,
    NewNetwork = 1,
    LeaveAndNotStarted = 2,
}

struct StackState {
    ieee_addr: [u8; 8],
    short_addr: u16,
    pan_id: u16,
    ext_pan_id: [u8; 8],
    channel_mask: u32,
    logical_channel: u8,
    logical_type: LogicalType,
    device_state: DeviceState,
    security_level: u8,
    precfg_key: [u8; 16],
    tx_power: i8,
    associated: Vec<AssociatedDevice>,
    endpoints: BTreeMap<u8, EndpointDescriptor>,
    permit_join: u8,
    trans_seq: u8,
    ever_started: bool,
}

/// In-process network stack.
pub struct SimulatedStack {
    state: RwLock<StackState>,
    mac: Arc<dyn MacService>,
    events: StackEventSender,
    version: VersionInfo,
    max_endpoints: usize,
    started_at: Instant,
}

impl SimulatedStack {
    /// Creates a stack with a [`SimulatedMac`] on the same event channel.
    pub fn new(config: &DeviceConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mac = SimulatedMac::new(events.clone())
            .with_router_capable(config.logical_type.is_router_capable());
        Self::with_mac(config, Arc::new(mac), events)
    }

    /// Creates a stack around an existing MAC and event channel.
    pub fn with_mac(
        config: &DeviceConfig,
        mac: Arc<dyn MacService>,
        events: StackEventSender,
    ) -> Arc<Self> {
        let state = StackState {
            ieee_addr: config.ieee_bytes(),
            short_addr: config.short_addr,
            pan_id: config.pan_id,
            ext_pan_id: config.ext_pan_id.to_le_bytes(),
            channel_mask: config.channel_mask,
            logical_channel: lowest_channel(config.channel_mask),
            logical_type: config.logical_type,
            device_state: DeviceState::Hold,
            security_level: config.security_level,
            precfg_key: config.precfg_key,
            tx_power: config.tx_power,
            associated: config.associated_devices.clone(),
            endpoints: BTreeMap::new(),
            permit_join: 0,
            trans_seq: 0,
            ever_started: false,
        };
        Arc::new(Self {
            state: RwLock::new(state),
            mac,
            events,
            version: config.version,
            max_endpoints: config.max_endpoints,
            started_at: Instant::now(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StackEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> StackEventSender {
        self.events.clone()
    }

    pub fn mac(&self) -> &dyn MacService {
        self.mac.as_ref()
    }

    fn emit(&self, event: StackEvent) {
        tracing::trace!("stack event {:?}", event);
        let _ = self.events.send(event);
    }

    // ====================================================================
    // SYS
    // ====================================================================

    pub fn version(&self) -> VersionInfo {
        self.version
    }

    /// Resets the device. Network parameters survive; runtime state does not.
    pub fn reset(&self, kind: ResetType) {
        {
            let mut state = self.state.write();
            state.device_state = DeviceState::Hold;
            state.endpoints.clear();
            state.permit_join = 0;
        }
        self.mac.reset(kind == ResetType::Hard);
        tracing::info!("device reset ({:?})", kind);
        self.emit(StackEvent::ResetInd {
            reason: kind.reason(),
            version: self.version,
        });
    }

    pub fn ext_addr(&self) -> [u8; 8] {
        self.state.read().ieee_addr
    }

    pub fn set_ext_addr(&self, addr: [u8; 8]) -> Status {
        self.state.write().ieee_addr = addr;
        self.mac.set(crate::mac::ATTR_EXTENDED_ADDRESS, &addr)
    }

    pub fn random(&self) -> u16 {
        rand::random()
    }

    /// Applies a transmit power, clamped to the radio range. Returns the
    /// power actually set.
    pub fn set_tx_power(&self, dbm: i8) -> i8 {
        let applied = dbm.clamp(MIN_TX_POWER, MAX_TX_POWER);
        self.state.write().tx_power = applied;
        applied
    }

    pub fn tx_power(&self) -> i8 {
        self.state.read().tx_power
    }

    pub fn config_read(&self, req: &ConfigReadReq) -> ConfigReadRsp {
        let state = self.state.read();
        ConfigReadRsp {
            pan_id: req.pan_id.then_some(state.pan_id),
            channel_mask: req.channel_mask.then_some(state.channel_mask),
            ext_pan_id: req.ext_pan_id.then_some(state.ext_pan_id),
            tx_power: req.tx_power.then_some(state.tx_power),
            precfg_key: req.precfg_key.then_some(state.precfg_key),
        }
    }

    pub fn config_write(&self, req: &ConfigWriteReq) -> Status {
        if let Some(mask) = req.channel_mask {
            if mask & !VALID_CHANNELS != 0 {
                return Status::INVALID_PARAMETER;
            }
        }
        let mut state = self.state.write();
        if let Some(pan) = req.pan_id {
            state.pan_id = pan;
        }
        if let Some(mask) = req.channel_mask {
            state.channel_mask = mask;
            state.logical_channel = lowest_channel(mask);
        }
        if let Some(ext) = req.ext_pan_id {
            state.ext_pan_id = ext;
        }
        if let Some(key) = req.precfg_key {
            state.precfg_key = key;
        }
        Status::SUCCESS
    }

    pub fn nwk_info(&self) -> NwkInfo {
        let state = self.state.read();
        NwkInfo {
            nwk_addr: state.short_addr,
            pan_id: state.pan_id,
            parent_nwk_addr: if state.logical_type == LogicalType::Coordinator {
                0xFFFE
            } else {
                0x0000
            },
            ext_pan_id: state.ext_pan_id,
            ieee_addr: state.ieee_addr,
            logical_channel: state.logical_channel,
            device_state: state.device_state,
        }
    }

    // ====================================================================
    // UTIL
    // ====================================================================

    pub fn device_info(&self) -> DeviceInfo {
        let state = self.state.read();
        let associated = if state.logical_type.is_router_capable() {
            state.associated.iter().map(|d| d.short_addr).collect()
        } else {
            Vec::new()
        };
        DeviceInfo {
            ieee_addr: state.ieee_addr,
            short_addr: state.short_addr,
            logical_type: state.logical_type,
            device_state: state.device_state,
            associated,
        }
    }

    pub fn nv_info(&self) -> NvInfo {
        let state = self.state.read();
        NvInfo {
            ieee_addr: state.ieee_addr,
            channel_mask: state.channel_mask,
            pan_id: state.pan_id,
            security_level: state.security_level,
            precfg_key: state.precfg_key,
        }
    }

    pub fn set_pan_id(&self, pan_id: u16) -> Status {
        self.config_write(&ConfigWriteReq {
            pan_id: Some(pan_id),
            ..Default::default()
        })
    }

    pub fn set_channels(&self, mask: u32) -> Status {
        self.config_write(&ConfigWriteReq {
            channel_mask: Some(mask),
            ..Default::default()
        })
    }

    pub fn set_security_level(&self, level: u8) -> Status {
        if level > 7 {
            return Status::INVALID_PARAMETER;
        }
        self.state.write().security_level = level;
        Status::SUCCESS
    }

    pub fn set_precfg_key(&self, key: [u8; 16]) -> Status {
        self.config_write(&ConfigWriteReq {
            precfg_key: Some(key),
            ..Default::default()
        })
    }

    /// Seconds since the stack was created.
    pub fn uptime_secs(&self) -> u32 {
        self.started_at.elapsed().as_secs() as u32
    }

    /// Associated devices whose relation lies in `[start, end]`.
    pub fn assoc_count(&self, start: u8, end: u8) -> u16 {
        self.state
            .read()
            .associated
            .iter()
            .filter(|d| (start..=end).contains(&d.relation.code()))
            .count() as u16
    }

    /// Adds a device to the association table and announces it.
    pub fn associate(&self, short_addr: u16, ieee_addr: [u8; 8], relation: Relation) {
        let capabilities = match relation {
            Relation::ChildFfd | Relation::ChildFfdRxIdle => 0x8E,
            _ => 0x80,
        };
        self.state.write().associated.push(AssociatedDevice {
            short_addr,
            relation,
        });
        self.emit(StackEvent::DeviceAnnounce(DeviceAnnounce {
            src_addr: short_addr,
            nwk_addr: short_addr,
            ieee_addr,
            capabilities,
        }));
    }

    // ====================================================================
    // Device start
    // ====================================================================

    /// Brings the device onto its network.
    pub fn startup(&self, _start_delay: u16) -> StartupResult {
        let (restored, final_state) = {
            let mut state = self.state.write();
            if state.device_state.is_on_network() {
                return StartupResult::RestoredNetwork;
            }
            let restored = state.ever_started;
            state.ever_started = true;
            state.device_state = match state.logical_type {
                LogicalType::Coordinator => DeviceState::ZbCoord,
                LogicalType::Router => DeviceState::Router,
                LogicalType::EndDevice => DeviceState::EndDevice,
            };
            (restored, state.device_state)
        };

        if final_state == DeviceState::ZbCoord {
            self.emit(StackEvent::StateChange(DeviceState::CoordStarting));
        } else {
            self.emit(StackEvent::StateChange(DeviceState::NwkDisc));
        }
        self.emit(StackEvent::StateChange(final_state));
        tracing::info!("device started as {:?}", final_state);

        if restored {
            StartupResult::RestoredNetwork
        } else {
            StartupResult::NewNetwork
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.state.read().device_state
    }

    // ====================================================================
    // AF
    // ====================================================================

    pub fn af_register(&self, desc: EndpointDescriptor) -> Status {
        if !(MIN_ENDPOINT..=MAX_ENDPOINT).contains(&desc.endpoint) {
            return Status::INVALID_PARAMETER;
        }
        let mut state = self.state.write();
        if state.endpoints.contains_key(&desc.endpoint) {
            return Status::APS_DUPLICATE_ENTRY;
        }
        if state.endpoints.len() >= self.max_endpoints {
            return Status::AF_ENDPOINT_MAX;
        }
        tracing::debug!("registered endpoint {}", desc.endpoint);
        state.endpoints.insert(desc.endpoint, desc);
        Status::SUCCESS
    }

    pub fn af_delete(&self, endpoint: u8) -> Status {
        match self.state.write().endpoints.remove(&endpoint) {
            Some(_) => Status::SUCCESS,
            None => Status::INVALID_PARAMETER,
        }
    }

    pub fn endpoints(&self) -> Vec<u8> {
        self.state.read().endpoints.keys().copied().collect()
    }

    /// Sends application data. Frames addressed to this device loop back
    /// as incoming messages.
    pub fn af_data_request(&self, req: &AfDataRequest) -> Status {
        let (loopback, own_addr, trans_seq) = {
            let mut state = self.state.write();
            if !state.endpoints.contains_key(&req.src_endpoint) {
                return Status::INVALID_PARAMETER;
            }
            let loopback = match req.dst {
                AfAddress::Short(addr) => addr == state.short_addr,
                AfAddress::Extended(ieee) => ieee == state.ieee_addr,
                AfAddress::Group(_) | AfAddress::Broadcast(_) => false,
            } && state.endpoints.contains_key(&req.dst_endpoint);
            state.trans_seq = state.trans_seq.wrapping_add(1);
            (loopback, state.short_addr, state.trans_seq)
        };

        self.emit(StackEvent::AfDataConfirm(AfDataConfirm {
            status: Status::SUCCESS,
            endpoint: req.src_endpoint,
            trans_id: req.trans_id,
        }));

        if loopback {
            self.emit(StackEvent::AfIncoming(AfIncomingMsg {
                group_id: 0,
                cluster_id: req.cluster_id,
                src_addr: own_addr,
                src_endpoint: req.src_endpoint,
                dst_endpoint: req.dst_endpoint,
                was_broadcast: false,
                link_quality: 0xFF,
                security_use: false,
                timestamp: self.uptime_secs(),
                trans_seq,
                payload: req.payload.clone(),
            }));
        }
        Status::SUCCESS
    }

    // ====================================================================
    // ZDO
    // ====================================================================

    fn addr_rsp(&self, state: &StackState, req_type: AddrReqType, start_index: u8) -> AddrRsp {
        let assoc_devices = match req_type {
            AddrReqType::Single => Vec::new(),
            AddrReqType::Extended => state
                .associated
                .iter()
                .skip(usize::from(start_index))
                .map(|d| d.short_addr)
                .collect(),
        };
        AddrRsp {
            source: ZdoSource {
                src_addr: state.short_addr,
                status: 0,
            },
            ieee_addr: state.ieee_addr,
            nwk_addr: state.short_addr,
            start_index,
            assoc_devices,
        }
    }

    /// Looks up the network address of an IEEE address. Only this device
    /// answers; requests for others go unanswered.
    pub fn zdo_nwk_addr_req(&self, req: &NwkAddrReq) -> Status {
        let rsp = {
            let state = self.state.read();
            if req.ieee_addr != state.ieee_addr {
                return Status::SUCCESS;
            }
            self.addr_rsp(&state, req.req_type, req.start_index)
        };
        self.emit(StackEvent::NwkAddrRsp(rsp));
        Status::SUCCESS
    }

    pub fn zdo_ieee_addr_req(&self, req: &IeeeAddrReq) -> Status {
        let rsp = {
            let state = self.state.read();
            if req.nwk_addr != state.short_addr {
                return Status::SUCCESS;
            }
            self.addr_rsp(&state, req.req_type, req.start_index)
        };
        self.emit(StackEvent::IeeeAddrRsp(rsp));
        Status::SUCCESS
    }

    pub fn zdo_node_desc_req(&self, req: &ZdoDescReq) -> Status {
        let rsp = {
            let state = self.state.read();
            let mut rsp = NodeDescRsp {
                source: ZdoSource {
                    src_addr: req.dst_addr,
                    status: 0,
                },
                nwk_addr: req.nwk_addr_of_interest,
                ..Default::default()
            };
            if req.nwk_addr_of_interest == state.short_addr {
                rsp.logical_type = state.logical_type.code();
                rsp.mac_capabilities = if state.logical_type.is_router_capable() {
                    0x8E
                } else {
                    0x80
                };
                rsp.manufacturer_code = 0x0000;
                rsp.max_buffer_size = 80;
                rsp.server_mask = if state.logical_type == LogicalType::Coordinator {
                    0x0041
                } else {
                    0x0000
                };
            } else {
                rsp.source.status = ZDP_DEVICE_NOT_FOUND;
            }
            rsp
        };
        self.emit(StackEvent::NodeDescRsp(rsp));
        Status::SUCCESS
    }

    pub fn zdo_active_ep_req(&self, req: &ZdoDescReq) -> Status {
        let rsp = {
            let state = self.state.read();
            let found = req.nwk_addr_of_interest == state.short_addr;
            EndpointListRsp {
                source: ZdoSource {
                    src_addr: req.dst_addr,
                    status: if found { 0 } else { ZDP_DEVICE_NOT_FOUND },
                },
                nwk_addr: req.nwk_addr_of_interest,
                endpoints: if found {
                    state.endpoints.keys().copied().collect()
                } else {
                    Vec::new()
                },
            }
        };
        self.emit(StackEvent::ActiveEpRsp(rsp));
        Status::SUCCESS
    }

    pub fn zdo_mgmt_permit_join(&self, req: &PermitJoinReq) -> Status {
        {
            let mut state = self.state.write();
            if !state.logical_type.is_router_capable() {
                return Status::NWK_INVALID_REQUEST;
            }
            state.permit_join = req.duration;
        }
        self.emit(StackEvent::PermitJoin {
            duration: req.duration,
        });
        Status::SUCCESS
    }

    pub fn permit_join_duration(&self) -> u8 {
        self.state.read().permit_join
    }
}

/// Channels 11 to 26.
const VALID_CHANNELS: u32 = 0x07FF_F800;

fn lowest_channel(mask: u32) -> u8 {
    let valid = mask & VALID_CHANNELS;
    if valid == 0 {
        11
    } else {
        valid.trailing_zeros() as u8
    }
}

impl CommandProcessor for SimulatedStack {
    fn process(&self, _source: TaskId, request: &Request) -> Processed {
        match request {
            Request::SysReset { new_nwk_state } => {
                if *new_nwk_state {
                    self.state.write().ever_started = false;
                }
                self.reset(ResetType::Soft);
                Processed::status(Status::SUCCESS)
            }
            Request::SysVersion => Processed::response(Response::Version(self.version())),
            Request::SysConfigRead(req) => {
                Processed::response(Response::ConfigRead(self.config_read(req)))
            }
            Request::SysConfigWrite(req) => Processed::status(self.config_write(req)),
            Request::SysSetTxPower { dbm } => Processed::response(Response::TxPower(TxPowerRsp {
                applied_dbm: self.set_tx_power(*dbm),
            })),
            Request::SysNwkInfoRead => Processed::response(Response::NwkInfo(self.nwk_info())),
            Request::DevStart { start_delay } => {
                self.startup(*start_delay);
                Processed::status(Status::SUCCESS)
            }
            // Subscriptions belong to the engine
            Request::DevZdoCallbacks { .. } => Processed::status(Status::SUCCESS),
            Request::AfRegister(desc) => Processed::status(self.af_register(desc.clone())),
            Request::AfUnregister { endpoint } => Processed::status(self.af_delete(*endpoint)),
            Request::AfDataRequest(req) => Processed::status(self.af_data_request(req)),
            Request::ZdoNwkAddr(req) => Processed::status(self.zdo_nwk_addr_req(req)),
            Request::ZdoIeeeAddr(req) => Processed::status(self.zdo_ieee_addr_req(req)),
            Request::ZdoNodeDesc(req) => Processed::status(self.zdo_node_desc_req(req)),
            Request::ZdoActiveEndpoint(req) => Processed::status(self.zdo_active_ep_req(req)),
            Request::ZdoMgmtPermitJoin(req) => Processed::status(self.zdo_mgmt_permit_join(req)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_config() -> DeviceConfig {
        DeviceConfig {
            logical_type: LogicalType::Router,
            short_addr: 0x1234,
            associated_devices: vec![
                AssociatedDevice {
                    short_addr: 0x2001,
                    relation: Relation::ChildRfd,
                },
                AssociatedDevice {
                    short_addr: 0x2002,
                    relation: Relation::ChildFfd,
                },
                AssociatedDevice {
                    short_addr: 0x0000,
                    relation: Relation::Parent,
                },
            ],
            ..Default::default()
        }
    }

    fn endpoint(ep: u8) -> EndpointDescriptor {
        EndpointDescriptor {
            endpoint: ep,
            profile_id: 0x0104,
            device_id: 0x0100,
            ..Default::default()
        }
    }

    #[test]
    fn test_device_info_lists_children_only_when_router() {
        let stack = SimulatedStack::new(&router_config());
        assert_eq!(stack.device_info().associated, vec![0x2001, 0x2002, 0x0000]);

        let end_device = DeviceConfig {
            logical_type: LogicalType::EndDevice,
            ..router_config()
        };
        let stack = SimulatedStack::new(&end_device);
        assert!(stack.device_info().associated.is_empty());
    }

    #[test]
    fn test_assoc_count_by_relation() {
        let stack = SimulatedStack::new(&router_config());
        assert_eq!(stack.assoc_count(1, 4), 2);
        assert_eq!(stack.assoc_count(0, 6), 3);
        assert_eq!(stack.assoc_count(5, 6), 0);
    }

    #[test]
    fn test_af_register_rules() {
        let config = DeviceConfig {
            max_endpoints: 2,
            ..Default::default()
        };
        let stack = SimulatedStack::new(&config);
        assert!(stack.af_register(endpoint(1)).is_success());
        assert_eq!(stack.af_register(endpoint(1)), Status::APS_DUPLICATE_ENTRY);
        assert_eq!(stack.af_register(endpoint(0)), Status::INVALID_PARAMETER);
        assert!(stack.af_register(endpoint(2)).is_success());
        assert_eq!(stack.af_register(endpoint(3)), Status::AF_ENDPOINT_MAX);

        assert!(stack.af_delete(1).is_success());
        assert_eq!(stack.af_delete(1), Status::INVALID_PARAMETER);
        assert_eq!(stack.endpoints(), vec![2]);
    }

    #[tokio::test]
    async fn test_af_loopback() {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        let mut events = stack.subscribe();
        stack.af_register(endpoint(8));

        let req = AfDataRequest {
            dst: AfAddress::Short(0x0000),
            dst_endpoint: 8,
            src_endpoint: 8,
            cluster_id: 0x0006,
            trans_id: 42,
            payload: vec![0x01, 0x00, 0x02],
            ..Default::default()
        };
        assert!(stack.af_data_request(&req).is_success());

        match events.recv().await.unwrap() {
            StackEvent::AfDataConfirm(cnf) => assert_eq!(cnf.trans_id, 42),
            other => panic!("unexpected {:?}", other),
        }
        match events.recv().await.unwrap() {
            StackEvent::AfIncoming(msg) => assert_eq!(msg.payload, vec![0x01, 0x00, 0x02]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_af_data_from_unknown_endpoint() {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        let req = AfDataRequest {
            src_endpoint: 99,
            ..Default::default()
        };
        assert_eq!(stack.af_data_request(&req), Status::INVALID_PARAMETER);
    }

    #[tokio::test]
    async fn test_startup_state_changes() {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        let mut events = stack.subscribe();

        assert_eq!(stack.startup(0), StartupResult::NewNetwork);
        assert_eq!(
            events.recv().await.unwrap(),
            StackEvent::StateChange(DeviceState::CoordStarting)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StackEvent::StateChange(DeviceState::ZbCoord)
        );
        assert_eq!(stack.startup(0), StartupResult::RestoredNetwork);

        stack.reset(ResetType::Soft);
        assert_eq!(stack.device_state(), DeviceState::Hold);
        assert_eq!(stack.startup(0), StartupResult::RestoredNetwork);
    }

    #[tokio::test]
    async fn test_nwk_addr_req_extended() {
        let stack = SimulatedStack::new(&router_config());
        let mut events = stack.subscribe();

        let req = NwkAddrReq {
            ieee_addr: stack.ext_addr(),
            req_type: AddrReqType::Extended,
            start_index: 1,
        };
        assert!(stack.zdo_nwk_addr_req(&req).is_success());
        match events.recv().await.unwrap() {
            StackEvent::NwkAddrRsp(rsp) => {
                assert_eq!(rsp.nwk_addr, 0x1234);
                assert_eq!(rsp.assoc_devices, vec![0x2002, 0x0000]);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Unknown devices stay silent
        let other = NwkAddrReq {
            ieee_addr: [9; 8],
            ..req
        };
        assert!(stack.zdo_nwk_addr_req(&other).is_success());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_tx_power_clamped() {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        assert_eq!(stack.set_tx_power(20), MAX_TX_POWER);
        assert_eq!(stack.set_tx_power(-40), MIN_TX_POWER);
        assert_eq!(stack.set_tx_power(0), 0);
    }

    #[test]
    fn test_config_write_rejects_bad_channels() {
        let stack = SimulatedStack::new(&DeviceConfig::default());
        assert_eq!(stack.set_channels(0x0000_0001), Status::INVALID_PARAMETER);
        assert!(stack.set_channels(1 << 15).is_success());
        assert_eq!(stack.nwk_info().logical_channel, 15);

        let rsp = stack.config_read(&ConfigReadReq {
            channel_mask: true,
            ..Default::default()
        });
        assert_eq!(rsp.channel_mask, Some(1 << 15));
        assert_eq!(rsp.pan_id, None);
    }

    #[test]
    fn test_device_config_yaml() {
        let yaml = "ieee_addr: 0x00124B0001020304\npan_id: 0x2B00\nlogical_type: router\n";
        let config: DeviceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pan_id, 0x2B00);
        assert_eq!(config.logical_type, LogicalType::Router);
        assert_eq!(config.ieee_bytes()[0], 0x04);
        assert_eq!(config.max_endpoints, 16);
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("0x1A62"), Some(0x1A62));
        assert_eq!(parse_u64("42"), Some(42));
        assert_eq!(parse_u64("zz"), None);
    }
}
