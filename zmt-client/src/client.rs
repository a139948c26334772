//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tokio::sync::broadcast;
use zmt_protocol::{Frame, FrameType, PayloadReader, Status, Subsystem};

/// Host-side command ids.
mod cmd {
    pub const SYS_RESET_REQ: u8 = 0x00;
    pub const SYS_PING: u8 = 0x01;
    pub const SYS_VERSION: u8 = 0x02;
    pub const SYS_SET_EXTADDR: u8 = 0x03;
    pub const SYS_GET_EXTADDR: u8 = 0x04;
    pub const SYS_RANDOM: u8 = 0x0C;
    pub const SYS_SET_TX_POWER: u8 = 0x14;
    pub const SYS_RESET_IND: u8 = 0x80;

    pub const UTIL_GET_DEVICE_INFO: u8 = 0x00;
    pub const UTIL_GET_NV_INFO: u8 = 0x01;
    pub const UTIL_SET_PANID: u8 = 0x02;
    pub const UTIL_SET_CHANNELS: u8 = 0x03;
    pub const UTIL_CALLBACK_SUB_CMD: u8 = 0x06;
    pub const UTIL_TIME_ALIVE: u8 = 0x09;
    pub const UTIL_TEST_LOOPBACK: u8 = 0x10;

    pub const MAC_SCAN_REQ: u8 = 0x0C;

    pub const AF_REGISTER: u8 = 0x00;
    pub const AF_DATA_REQUEST: u8 = 0x01;

    pub const ZDO_NWK_ADDR_REQ: u8 = 0x00;
}

/// CALLBACK_SUB_CMD value selecting every subsystem.
const SUBSCRIBE_ALL: u16 = 0xFFFF;

/// MAC security block length; scans are sent without security.
const MAC_SECURITY_LEN: usize = 11;

/// Firmware version reported by SYS VERSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub transport_rev: u8,
    pub product: u8,
    pub major: u8,
    pub minor: u8,
    pub maint: u8,
}

/// How the device restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Hard,
    Soft,
}

/// SYS RESET_IND contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetIndication {
    pub reason: u8,
    pub version: VersionInfo,
}

/// UTIL GET_DEVICE_INFO contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub status: Status,
    pub ieee_addr: [u8; 8],
    pub short_addr: u16,
    /// Capability bits: 0x01 coordinator, 0x02 router, 0x04 end device.
    pub device_type: u8,
    pub device_state: u8,
    /// Short addresses of associated devices.
    pub associated: Vec<u16>,
}

/// UTIL GET_NV_INFO contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvInfo {
    pub status: Status,
    pub ieee_addr: [u8; 8],
    pub channel_mask: u32,
    pub pan_id: u16,
    pub security_level: u8,
    pub precfg_key: [u8; 16],
}

/// MAC SCAN_REQ parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub channels: u32,
    /// 0 energy detect, 1 active, 2 passive, 3 orphan.
    pub scan_type: u8,
    pub duration: u8,
    pub channel_page: u8,
    pub max_results: u8,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            channels: 0x07FF_F800,
            scan_type: 0,
            duration: 3,
            channel_page: 0,
            max_results: 16,
        }
    }
}

/// AF REGISTER parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRegistration {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub latency: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

/// AF DATA_REQUEST parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfDataRequest {
    pub dst_addr: u16,
    pub dst_endpoint: u8,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub trans_id: u8,
    pub options: u8,
    pub radius: u8,
    pub data: Vec<u8>,
}

fn put_u16_list(buf: &mut BytesMut, list: &[u16]) -> Result<(), ClientError> {
    let count = u8::try_from(list.len()).map_err(|_| {
        ClientError::UnexpectedResponse(format!("{} clusters exceed a one-byte count", list.len()))
    })?;
    buf.put_u8(count);
    for id in list {
        buf.put_u16_le(*id);
    }
    Ok(())
}

/// Reads the leading status byte of a status-only SRSP.
fn status_of(frame: &Frame) -> Result<Status, ClientError> {
    Ok(Status(PayloadReader::new(&frame.payload).read_u8()?))
}

fn read_version(r: &mut PayloadReader<'_>) -> Result<VersionInfo, ClientError> {
    Ok(VersionInfo {
        transport_rev: r.read_u8()?,
        product: r.read_u8()?,
        major: r.read_u8()?,
        minor: r.read_u8()?,
        maint: r.read_u8()?,
    })
}

/// High-level client for a zmt bridge.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the bridge.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection (for background read loop).
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Subscribes to AREQ callbacks.
    pub fn subscribe_callbacks(&self) -> broadcast::Receiver<Frame> {
        self.conn.subscribe_callbacks()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn sreq(
        &self,
        subsystem: Subsystem,
        command_id: u8,
        payload: impl Into<bytes::Bytes>,
    ) -> Result<Frame, ClientError> {
        self.conn
            .request(Frame::new(FrameType::SyncRequest, subsystem, command_id, payload))
            .await
    }

    async fn status_request(
        &self,
        subsystem: Subsystem,
        command_id: u8,
        payload: impl Into<bytes::Bytes>,
    ) -> Result<Status, ClientError> {
        let rsp = self.sreq(subsystem, command_id, payload).await?;
        status_of(&rsp)
    }

    /// Sends any frame. SREQs wait for and return their SRSP.
    pub async fn raw(&self, frame: Frame) -> Result<Option<Frame>, ClientError> {
        if frame.frame_type == FrameType::SyncRequest {
            self.conn.request(frame).await.map(Some)
        } else {
            self.conn.send(&frame).await.map(|_| None)
        }
    }

    // =========================================================================
    // SYS
    // =========================================================================

    /// Returns the capability bits of the subsystems the bridge serves.
    pub async fn ping(&self) -> Result<u16, ClientError> {
        let rsp = self.sreq(Subsystem::Sys, cmd::SYS_PING, Vec::new()).await?;
        Ok(PayloadReader::new(&rsp.payload).read_u16_le()?)
    }

    pub async fn version(&self) -> Result<VersionInfo, ClientError> {
        let rsp = self.sreq(Subsystem::Sys, cmd::SYS_VERSION, Vec::new()).await?;
        read_version(&mut PayloadReader::new(&rsp.payload))
    }

    pub async fn get_ext_addr(&self) -> Result<[u8; 8], ClientError> {
        let rsp = self.sreq(Subsystem::Sys, cmd::SYS_GET_EXTADDR, Vec::new()).await?;
        Ok(PayloadReader::new(&rsp.payload).read_array::<8>()?)
    }

    pub async fn set_ext_addr(&self, addr: [u8; 8]) -> Result<Status, ClientError> {
        self.status_request(Subsystem::Sys, cmd::SYS_SET_EXTADDR, addr.to_vec())
            .await
    }

    pub async fn random(&self) -> Result<u16, ClientError> {
        let rsp = self.sreq(Subsystem::Sys, cmd::SYS_RANDOM, Vec::new()).await?;
        Ok(PayloadReader::new(&rsp.payload).read_u16_le()?)
    }

    /// Requests a transmit power in dBm and returns the power applied.
    pub async fn set_tx_power(&self, dbm: i8) -> Result<i8, ClientError> {
        let rsp = self
            .sreq(Subsystem::Sys, cmd::SYS_SET_TX_POWER, vec![dbm as u8])
            .await?;
        Ok(PayloadReader::new(&rsp.payload).read_u8()? as i8)
    }

    /// Resets the device and waits for its RESET_IND.
    ///
    /// RESET_REQ is an AREQ; the only answer is the indication.
    pub async fn reset(&self, kind: ResetKind) -> Result<ResetIndication, ClientError> {
        let mut callbacks = self.conn.subscribe_callbacks();
        let kind = match kind {
            ResetKind::Hard => 0,
            ResetKind::Soft => 1,
        };
        self.conn
            .send(&Frame::new(
                FrameType::AsyncRequest,
                Subsystem::Sys,
                cmd::SYS_RESET_REQ,
                vec![kind],
            ))
            .await?;

        let wait = async {
            loop {
                match callbacks.recv().await {
                    Ok(frame)
                        if frame.subsystem == Subsystem::Sys.id()
                            && frame.command_id == cmd::SYS_RESET_IND =>
                    {
                        let mut r = PayloadReader::new(&frame.payload);
                        return Ok(ResetIndication {
                            reason: r.read_u8()?,
                            version: read_version(&mut r)?,
                        });
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("reset: skipped {} callbacks", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::ConnectionClosed)
                    }
                }
            }
        };
        tokio::time::timeout(self.conn.config().request_timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    // =========================================================================
    // UTIL
    // =========================================================================

    pub async fn device_info(&self) -> Result<DeviceInfo, ClientError> {
        let rsp = self
            .sreq(Subsystem::Util, cmd::UTIL_GET_DEVICE_INFO, Vec::new())
            .await?;
        let mut r = PayloadReader::new(&rsp.payload);
        let status = Status(r.read_u8()?);
        let ieee_addr = r.read_array::<8>()?;
        let short_addr = r.read_u16_le()?;
        let device_type = r.read_u8()?;
        let device_state = r.read_u8()?;
        let count = r.read_u8()?;
        let associated = r.read_u16_list(usize::from(count))?;
        Ok(DeviceInfo {
            status,
            ieee_addr,
            short_addr,
            device_type,
            device_state,
            associated,
        })
    }

    pub async fn nv_info(&self) -> Result<NvInfo, ClientError> {
        let rsp = self
            .sreq(Subsystem::Util, cmd::UTIL_GET_NV_INFO, Vec::new())
            .await?;
        let mut r = PayloadReader::new(&rsp.payload);
        Ok(NvInfo {
            status: Status(r.read_u8()?),
            ieee_addr: r.read_array::<8>()?,
            // Sent most significant byte first
            channel_mask: u32::from_be_bytes(r.read_array::<4>()?),
            pan_id: r.read_u16_le()?,
            security_level: r.read_u8()?,
            precfg_key: r.read_array::<16>()?,
        })
    }

    pub async fn set_pan_id(&self, pan_id: u16) -> Result<Status, ClientError> {
        self.status_request(
            Subsystem::Util,
            cmd::UTIL_SET_PANID,
            pan_id.to_le_bytes().to_vec(),
        )
        .await
    }

    pub async fn set_channels(&self, mask: u32) -> Result<Status, ClientError> {
        self.status_request(
            Subsystem::Util,
            cmd::UTIL_SET_CHANNELS,
            mask.to_le_bytes().to_vec(),
        )
        .await
    }

    /// Seconds since the device started.
    pub async fn time_alive(&self) -> Result<u32, ClientError> {
        let rsp = self
            .sreq(Subsystem::Util, cmd::UTIL_TIME_ALIVE, Vec::new())
            .await?;
        Ok(PayloadReader::new(&rsp.payload).read_u32_le()?)
    }

    pub async fn loopback(&self, data: &[u8]) -> Result<Vec<u8>, ClientError> {
        let rsp = self
            .sreq(Subsystem::Util, cmd::UTIL_TEST_LOOPBACK, data.to_vec())
            .await?;
        Ok(rsp.payload.to_vec())
    }

    /// Enables or disables callback forwarding for one subsystem, or for all
    /// of them when `subsystem` is `None`.
    pub async fn callback_subscribe(
        &self,
        subsystem: Option<Subsystem>,
        enable: bool,
    ) -> Result<Status, ClientError> {
        let command = match subsystem {
            Some(s) => u16::from(s.id()) << 8,
            None => SUBSCRIBE_ALL,
        };
        let mut payload = BytesMut::with_capacity(3);
        payload.put_u16_le(command);
        payload.put_u8(u8::from(enable));
        self.status_request(Subsystem::Util, cmd::UTIL_CALLBACK_SUB_CMD, payload.freeze())
            .await
    }

    // =========================================================================
    // MAC / AF / ZDO
    // =========================================================================

    /// Starts a scan. The results arrive later as a MAC SCAN_CNF callback.
    pub async fn mac_scan(&self, params: &ScanParams) -> Result<Status, ClientError> {
        let mut payload = BytesMut::with_capacity(8 + MAC_SECURITY_LEN);
        payload.put_u32_le(params.channels);
        payload.put_u8(params.scan_type);
        payload.put_u8(params.duration);
        payload.put_u8(params.channel_page);
        payload.put_u8(params.max_results);
        payload.put_bytes(0, MAC_SECURITY_LEN);
        self.status_request(Subsystem::Mac, cmd::MAC_SCAN_REQ, payload.freeze())
            .await
    }

    pub async fn af_register(&self, reg: &EndpointRegistration) -> Result<Status, ClientError> {
        let mut payload = BytesMut::with_capacity(
            9 + 2 * (reg.input_clusters.len() + reg.output_clusters.len()),
        );
        payload.put_u8(reg.endpoint);
        payload.put_u16_le(reg.profile_id);
        payload.put_u16_le(reg.device_id);
        payload.put_u8(reg.device_version);
        payload.put_u8(reg.latency);
        put_u16_list(&mut payload, &reg.input_clusters)?;
        put_u16_list(&mut payload, &reg.output_clusters)?;
        self.status_request(Subsystem::Af, cmd::AF_REGISTER, payload.freeze())
            .await
    }

    /// Sends application data. The confirm arrives as an AF DATA_CONFIRM callback.
    pub async fn af_data_request(&self, req: &AfDataRequest) -> Result<Status, ClientError> {
        let len = u8::try_from(req.data.len()).map_err(|_| {
            ClientError::UnexpectedResponse(format!("{} data bytes exceed a frame", req.data.len()))
        })?;
        let mut payload = BytesMut::with_capacity(10 + req.data.len());
        payload.put_u16_le(req.dst_addr);
        payload.put_u8(req.dst_endpoint);
        payload.put_u8(req.src_endpoint);
        payload.put_u16_le(req.cluster_id);
        payload.put_u8(req.trans_id);
        payload.put_u8(req.options);
        payload.put_u8(req.radius);
        payload.put_u8(len);
        payload.put_slice(&req.data);
        self.status_request(Subsystem::Af, cmd::AF_DATA_REQUEST, payload.freeze())
            .await
    }

    /// Looks up the short address of `ieee_addr`. The answer arrives as a ZDO
    /// NWK_ADDR_RSP callback.
    pub async fn zdo_nwk_addr_req(
        &self,
        ieee_addr: [u8; 8],
        extended: bool,
        start_index: u8,
    ) -> Result<Status, ClientError> {
        let mut payload = BytesMut::with_capacity(10);
        payload.put_slice(&ieee_addr);
        payload.put_u8(u8::from(extended));
        payload.put_u8(start_index);
        self.status_request(Subsystem::Zdo, cmd::ZDO_NWK_ADDR_REQ, payload.freeze())
            .await
    }
}
