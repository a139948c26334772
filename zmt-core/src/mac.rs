//! MAC layer collaborator.
//!
//! [`MacService`] is the boundary the MAC command handlers call through.
//! [`SimulatedMac`] keeps a PIB and produces confirms and beacon
//! notifications on the stack event channel.

use crate::stack::{StackEvent, StackEventSender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use zmt_protocol::Status;

/// PIB attribute holding the beacon payload.
pub const ATTR_BEACON_PAYLOAD: u8 = 0x45;
pub const ATTR_BEACON_PAYLOAD_LENGTH: u8 = 0x46;
pub const ATTR_PAN_ID: u8 = 0x50;
pub const ATTR_SHORT_ADDRESS: u8 = 0x53;
pub const ATTR_EXTENDED_ADDRESS: u8 = 0xE2;

/// Largest PIB value returned by a get.
pub const MAX_ATTRIBUTE_LEN: usize = 16;

/// Number of channels reported by an energy-detect scan.
pub const ED_SCAN_MAX_CHANNELS: usize = 27;

/// Data request option queueing the frame for indirect delivery.
pub const TX_OPTION_INDIRECT: u8 = 0x04;

const MAC_INVALID_HANDLE: Status = Status(0xE7);

/// A MAC address with its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacAddress {
    #[default]
    None,
    Short(u16),
    Extended([u8; 8]),
}

impl MacAddress {
    pub const MODE_NONE: u8 = 0;
    pub const MODE_SHORT: u8 = 2;
    pub const MODE_EXTENDED: u8 = 3;

    pub fn mode(&self) -> u8 {
        match self {
            MacAddress::None => Self::MODE_NONE,
            MacAddress::Short(_) => Self::MODE_SHORT,
            MacAddress::Extended(_) => Self::MODE_EXTENDED,
        }
    }

    /// Reads the 8-byte address field of an incoming command.
    ///
    /// Extended addresses arrive most significant byte first and are
    /// stored reversed.
    pub fn from_wire(mode: u8, raw: [u8; 8]) -> Self {
        match mode {
            Self::MODE_SHORT => MacAddress::Short(u16::from_le_bytes([raw[0], raw[1]])),
            Self::MODE_EXTENDED => {
                let mut ext = raw;
                ext.reverse();
                MacAddress::Extended(ext)
            }
            _ => MacAddress::None,
        }
    }

    /// Writes the 8-byte address field of an outgoing callback.
    ///
    /// Extended addresses go out in stored order.
    pub fn to_wire(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        match self {
            MacAddress::None => {}
            MacAddress::Short(addr) => out[..2].copy_from_slice(&addr.to_le_bytes()),
            MacAddress::Extended(ext) => out = *ext,
        }
        out
    }
}

/// Security parameters carried by MAC commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacSecurity {
    pub key_source: [u8; 8],
    pub security_level: u8,
    pub key_id_mode: u8,
    pub key_index: u8,
}

impl MacSecurity {
    pub const WIRE_LEN: usize = 11;

    pub fn from_bytes(raw: [u8; Self::WIRE_LEN]) -> Self {
        let mut key_source = [0u8; 8];
        key_source.copy_from_slice(&raw[..8]);
        Self {
            key_source,
            security_level: raw[8],
            key_id_mode: raw[9],
            key_index: raw[10],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[..8].copy_from_slice(&self.key_source);
        out[8] = self.security_level;
        out[9] = self.key_id_mode;
        out[10] = self.key_index;
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacStartRequest {
    pub start_time: u32,
    pub pan_id: u16,
    pub logical_channel: u8,
    pub channel_page: u8,
    pub beacon_order: u8,
    pub superframe_order: u8,
    pub pan_coordinator: bool,
    pub battery_life_ext: bool,
    pub coord_realignment: bool,
    pub realign_security: MacSecurity,
    pub beacon_security: MacSecurity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacSyncRequest {
    pub logical_channel: u8,
    pub channel_page: u8,
    pub track_beacon: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MacDataRequest {
    pub dst: MacAddress,
    pub dst_pan_id: u16,
    pub src_addr_mode: u8,
    pub handle: u8,
    pub tx_options: u8,
    pub channel: u8,
    pub power: u8,
    pub security: MacSecurity,
    pub msdu: Vec<u8>,
    pub gp_offset: u8,
    pub gp_duration: u8,
}

/// Scan types understood by the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanType {
    EnergyDetect = 0,
    Active = 1,
    Passive = 2,
    Orphan = 3,
    EnhancedActive = 5,
}

impl ScanType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ScanType::EnergyDetect),
            1 => Some(ScanType::Active),
            2 => Some(ScanType::Passive),
            3 => Some(ScanType::Orphan),
            5 => Some(ScanType::EnhancedActive),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacScanRequest {
    pub channels: u32,
    pub scan_type: u8,
    pub duration: u8,
    pub channel_page: u8,
    pub max_results: u8,
    pub security: MacSecurity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacPollRequest {
    pub coord: MacAddress,
    pub coord_pan_id: u16,
    pub security: MacSecurity,
}

/// A PAN heard during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PanDescriptor {
    pub coord: MacAddress,
    pub coord_pan_id: u16,
    pub superframe_spec: u16,
    pub logical_channel: u8,
    pub gts_permit: bool,
    pub link_quality: u8,
    pub security_failure: bool,
    pub timestamp: u32,
    pub security: MacSecurity,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeaconNotify {
    pub bsn: u8,
    pub pan: PanDescriptor,
    pub pend_addr_spec: u8,
    pub addr_list: Vec<u8>,
    pub sdu: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MacDataConfirm {
    pub status: Status,
    pub handle: u8,
    pub timestamp: u32,
    pub timestamp2: u16,
    pub retries: u8,
    pub link_quality: u8,
    pub correlation: u8,
    pub rssi: i8,
}

/// Scan result list, by scan type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanResults {
    #[default]
    None,
    Energy(Vec<u8>),
    Pans(Vec<PanDescriptor>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanConfirm {
    pub status: Status,
    pub scan_type: u8,
    pub channel_page: u8,
    pub unscanned_channels: u32,
    pub result_count: u8,
    pub results: ScanResults,
}

/// Asynchronous MAC output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacEvent {
    DataConfirm(MacDataConfirm),
    BeaconNotify(BeaconNotify),
    ScanConfirm(ScanConfirm),
}

/// Operations the MAC handlers invoke.
pub trait MacService: Send + Sync {
    fn reset(&self, set_default: bool) -> Status;
    fn init(&self) -> Status;
    fn start(&self, request: &MacStartRequest) -> Status;
    fn sync(&self, request: &MacSyncRequest) -> Status;
    fn data_request(&self, request: &MacDataRequest) -> Status;
    /// Reads a PIB attribute.
    fn get(&self, attribute: u8) -> Result<Vec<u8>, Status>;
    fn set(&self, attribute: u8, value: &[u8]) -> Status;
    fn scan(&self, request: &MacScanRequest) -> Status;
    fn poll(&self, request: &MacPollRequest) -> Status;
    fn purge(&self, handle: u8) -> Status;
}

fn default_pib() -> HashMap<u8, Vec<u8>> {
    let mut pib = HashMap::new();
    pib.insert(ATTR_BEACON_PAYLOAD, vec![0; MAX_ATTRIBUTE_LEN]);
    pib.insert(ATTR_BEACON_PAYLOAD_LENGTH, vec![0]);
    pib.insert(ATTR_PAN_ID, 0xFFFFu16.to_le_bytes().to_vec());
    pib.insert(ATTR_SHORT_ADDRESS, 0xFFFEu16.to_le_bytes().to_vec());
    pib.insert(ATTR_EXTENDED_ADDRESS, vec![0; 8]);
    pib
}

fn channel_bit(channel: u8) -> u32 {
    1u32.checked_shl(u32::from(channel)).unwrap_or(0)
}

struct MacState {
    pib: HashMap<u8, Vec<u8>>,
    started: bool,
    /// Handles of indirect frames waiting for their child.
    pending_handles: Vec<u8>,
}

/// In-process MAC.
pub struct SimulatedMac {
    state: Mutex<MacState>,
    neighbors: Vec<BeaconNotify>,
    router_capable: bool,
    events: StackEventSender,
    epoch: Instant,
}

impl SimulatedMac {
    pub fn new(events: StackEventSender) -> Self {
        Self {
            state: Mutex::new(MacState {
                pib: default_pib(),
                started: false,
                pending_handles: Vec::new(),
            }),
            neighbors: Vec::new(),
            router_capable: true,
            events,
            epoch: Instant::now(),
        }
    }

    /// Beacons reported by active and passive scans.
    pub fn with_neighbors(mut self, neighbors: Vec<BeaconNotify>) -> Self {
        self.neighbors = neighbors;
        self
    }

    /// Whether MAC START is permitted.
    pub fn with_router_capable(mut self, capable: bool) -> Self {
        self.router_capable = capable;
        self
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    fn emit(&self, event: MacEvent) {
        // No subscribers is not an error
        let _ = self.events.send(StackEvent::Mac(event));
    }

    fn symbol_clock(&self) -> u32 {
        // 16 us symbols at 2.4 GHz
        (self.epoch.elapsed().as_micros() / 16) as u32
    }

    fn energy_scan(&self, channels: u32) -> Vec<u8> {
        let mut energy = vec![0u8; ED_SCAN_MAX_CHANNELS];
        for (channel, level) in energy.iter_mut().enumerate() {
            if channels & channel_bit(channel as u8) != 0 {
                let busy = self
                    .neighbors
                    .iter()
                    .any(|n| usize::from(n.pan.logical_channel) == channel);
                *level = if busy { 0xB4 } else { 0x05 };
            }
        }
        energy
    }
}

impl MacService for SimulatedMac {
    fn reset(&self, set_default: bool) -> Status {
        let mut state = self.state.lock();
        if set_default {
            state.pib = default_pib();
        }
        state.started = false;
        state.pending_handles.clear();
        Status::SUCCESS
    }

    fn init(&self) -> Status {
        Status::SUCCESS
    }

    fn start(&self, request: &MacStartRequest) -> Status {
        if !self.router_capable {
            return Status::MAC_DENIED;
        }
        if !(11..=26).contains(&request.logical_channel) {
            return Status::MAC_INVALID_PARAMETER;
        }
        let mut state = self.state.lock();
        state
            .pib
            .insert(ATTR_PAN_ID, request.pan_id.to_le_bytes().to_vec());
        state.started = true;
        Status::SUCCESS
    }

    fn sync(&self, request: &MacSyncRequest) -> Status {
        if !(11..=26).contains(&request.logical_channel) {
            return Status::MAC_INVALID_PARAMETER;
        }
        Status::SUCCESS
    }

    fn data_request(&self, request: &MacDataRequest) -> Status {
        if request.dst == MacAddress::None && request.dst_pan_id == 0 {
            return Status::MAC_INVALID_PARAMETER;
        }
        if request.tx_options & TX_OPTION_INDIRECT != 0 {
            // Held until the child polls or the frame is purged
            self.state.lock().pending_handles.push(request.handle);
            return Status::SUCCESS;
        }
        let timestamp = self.symbol_clock();
        self.emit(MacEvent::DataConfirm(MacDataConfirm {
            status: Status::SUCCESS,
            handle: request.handle,
            timestamp,
            timestamp2: (timestamp & 0xFFFF) as u16,
            retries: 0,
            link_quality: 0xFF,
            correlation: 0x40,
            rssi: -40,
        }));
        Status::SUCCESS
    }

    fn get(&self, attribute: u8) -> Result<Vec<u8>, Status> {
        self.state
            .lock()
            .pib
            .get(&attribute)
            .cloned()
            .ok_or(Status::MAC_UNSUPPORTED_ATTRIBUTE)
    }

    fn set(&self, attribute: u8, value: &[u8]) -> Status {
        let mut state = self.state.lock();
        let Some(slot) = state.pib.get_mut(&attribute) else {
            return Status::MAC_UNSUPPORTED_ATTRIBUTE;
        };
        slot.fill(0);
        let n = value.len().min(slot.len());
        slot[..n].copy_from_slice(&value[..n]);
        Status::SUCCESS
    }

    fn scan(&self, request: &MacScanRequest) -> Status {
        let Some(scan_type) = ScanType::from_code(request.scan_type) else {
            return Status::MAC_INVALID_PARAMETER;
        };

        let results = match scan_type {
            ScanType::EnergyDetect => ScanResults::Energy(self.energy_scan(request.channels)),
            ScanType::Orphan => ScanResults::None,
            ScanType::Active | ScanType::Passive | ScanType::EnhancedActive => {
                let limit = if request.max_results == 0 {
                    usize::MAX
                } else {
                    usize::from(request.max_results)
                };
                let heard: Vec<&BeaconNotify> = self
                    .neighbors
                    .iter()
                    .filter(|n| request.channels & channel_bit(n.pan.logical_channel) != 0)
                    .take(limit)
                    .collect();
                for beacon in &heard {
                    self.emit(MacEvent::BeaconNotify((*beacon).clone()));
                }
                ScanResults::Pans(heard.iter().map(|b| b.pan).collect())
            }
        };

        let result_count = match &results {
            ScanResults::None => 0,
            ScanResults::Energy(levels) => levels.len() as u8,
            ScanResults::Pans(pans) => pans.len() as u8,
        };

        self.emit(MacEvent::ScanConfirm(ScanConfirm {
            status: Status::SUCCESS,
            scan_type: scan_type.code(),
            channel_page: request.channel_page,
            unscanned_channels: 0,
            result_count,
            results,
        }));
        Status::SUCCESS
    }

    fn poll(&self, request: &MacPollRequest) -> Status {
        if request.coord == MacAddress::None {
            return Status::MAC_INVALID_PARAMETER;
        }
        Status::SUCCESS
    }

    fn purge(&self, handle: u8) -> Status {
        let mut state = self.state.lock();
        let before = state.pending_handles.len();
        state.pending_handles.retain(|h| *h != handle);
        if state.pending_handles.len() == before {
            MAC_INVALID_HANDLE
        } else {
            Status::SUCCESS
        }
    }
}
