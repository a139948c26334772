//! Connection management.
//!
//! MT allows one outstanding synchronous request per link. A request holds
//! the request lock from the moment it is written until its SRSP arrives or
//! the wait times out. The SRSP is matched on `(subsystem, command_id)`.

use crate::error::ClientError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex, Notify};
use zmt_protocol::{Decoder, Encoder, Frame, FrameType, RpcStatus};

/// Default read buffer size (1 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Minimum read buffer size; one maximal frame must fit.
pub const MIN_READ_BUFFER_SIZE: usize = 258;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default capacity for the callback channel.
const CALLBACK_CHANNEL_CAPACITY: usize = 256;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bridge address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long a SREQ waits for its SRSP.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// The SREQ currently waiting for its answer.
struct PendingRequest {
    subsystem: u8,
    command_id: u8,
    tx: oneshot::Sender<Frame>,
}

impl PendingRequest {
    fn matches(&self, frame: &Frame) -> bool {
        frame.frame_type == FrameType::SyncResponse
            && frame.subsystem == self.subsystem
            && frame.command_id == self.command_id
    }
}

/// A connection to a zmt bridge.
pub struct Connection {
    config: ConnectionConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Taken by `read_loop` once it starts.
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Serializes synchronous requests.
    request_lock: Mutex<()>,
    pending: Mutex<Option<PendingRequest>>,
    connected: AtomicBool,
    closing: Notify,
    callbacks: broadcast::Sender<Frame>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (callbacks, _) = broadcast::channel(CALLBACK_CHANNEL_CAPACITY);
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            request_lock: Mutex::new(()),
            pending: Mutex::new(None),
            connected: AtomicBool::new(false),
            closing: Notify::new(),
            callbacks,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Subscribes to AREQ frames sent by the bridge.
    pub fn subscribe_callbacks(&self) -> broadcast::Receiver<Frame> {
        self.callbacks.subscribe()
    }

    /// Connects to the bridge.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!("Connected to {}", self.config.addr);
        Ok(())
    }

    async fn write(&self, frame: &Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await?;
        tracing::debug!("-> {} [{}]", frame, hex::encode(&encoded));
        Ok(())
    }

    /// Sends a SREQ and waits for the matching SRSP.
    ///
    /// An error SRSP for the request comes back as [`ClientError::Rpc`].
    pub async fn request(&self, frame: Frame) -> Result<Frame, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        if frame.frame_type != FrameType::SyncRequest {
            return Err(ClientError::UnexpectedResponse(format!(
                "request() needs a SREQ, got {}",
                frame.frame_type.short_name()
            )));
        }

        let _turn = self.request_lock.lock().await;

        let (tx, rx) = oneshot::channel();
        *self.pending.lock().await = Some(PendingRequest {
            subsystem: frame.subsystem,
            command_id: frame.command_id,
            tx,
        });

        if let Err(e) = self.write(&frame).await {
            self.pending.lock().await.take();
            return Err(e);
        }

        let response = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                tracing::debug!("{} timed out", frame);
                self.pending.lock().await.take();
                return Err(ClientError::Timeout);
            }
        };

        if Encoder::is_error_srsp_for(&response, frame.cmd0(), frame.cmd1()) {
            let status = RpcStatus::from_code(response.payload[0]).ok_or_else(|| {
                ClientError::UnexpectedResponse(format!(
                    "unknown RPC status 0x{:02X}",
                    response.payload[0]
                ))
            })?;
            return Err(ClientError::Rpc { status });
        }

        Ok(response)
    }

    /// Sends a frame without waiting for anything back.
    pub async fn send(&self, frame: &Frame) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        self.write(frame).await
    }

    /// Reads frames until the connection closes (call this in a background task).
    ///
    /// SRSPs complete the pending request; AREQs go to callback subscribers.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        let mut reader = self.reader.lock().await.take().ok_or(ClientError::NotConnected)?;
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let n = tokio::select! {
                read = reader.read(&mut buf) => read?,
                _ = self.closing.notified() => 0,
            };

            if n == 0 {
                tracing::debug!("read_loop: connection closed");
                self.connected.store(false, Ordering::SeqCst);
                self.pending.lock().await.take();
                return Err(ClientError::ConnectionClosed);
            }

            decoder.extend(&buf[..n]);
            while let Some(frame) = decoder.decode_frame() {
                tracing::debug!("<- {}", frame);
                self.route(frame).await;
            }
        }
    }

    async fn route(&self, frame: Frame) {
        match frame.frame_type {
            FrameType::SyncResponse => {
                let mut pending = self.pending.lock().await;
                // Error SRSPs echo the request's header, so they match too
                if pending.as_ref().is_some_and(|p| p.matches(&frame)) {
                    if let Some(p) = pending.take() {
                        let _ = p.tx.send(frame);
                    }
                } else {
                    tracing::debug!("read_loop: dropping unsolicited SRSP {}", frame);
                }
            }
            FrameType::AsyncRequest => {
                // No subscribers is fine
                let _ = self.callbacks.send(frame);
            }
            _ => tracing::debug!("read_loop: ignoring {}", frame),
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns whether a SREQ is waiting for its SRSP.
    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();
        self.closing.notify_waiters();
        self.pending.lock().await.take();

        tracing::debug!("Connection closed");
        Ok(())
    }
}
