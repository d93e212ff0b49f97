//! In-memory devices
//!
//! A [`LoopbackDevice`] behaves like a serial port whose far end is a
//! [`LoopbackPeer`] held by the caller. Every successful open creates a
//! fresh `tokio::io::duplex` pair and hands the peer end out through the
//! receiver returned by [`LoopbackDevice::new`]. Used for bench simulation
//! without hardware and throughout the test suite.

use super::{Device, DeviceProvider, DeviceReader, DeviceWriter};
use crate::protocol::OutgoingMessage;
use async_trait::async_trait;
use laserdeck_core::ConnectionError;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream, ReadBuf, ReadHalf,
    WriteHalf,
};
use tokio::sync::mpsc;

const DUPLEX_CAPACITY: usize = 64 * 1024;

type FaultSlot = Arc<Mutex<Option<io::Error>>>;

/// Device-side reader that fails once a fault has been injected
struct FaultyReader {
    inner: ReadHalf<DuplexStream>,
    fault: FaultSlot,
}

impl AsyncRead for FaultyReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(err) = self.fault.lock().take() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[derive(Default)]
struct LoopbackState {
    open: bool,
    io: Option<(DeviceReader, DeviceWriter)>,
    fail_next_open: Option<String>,
    report_already_open: bool,
    close_delay: Option<Duration>,
}

/// An in-memory serial port
pub struct LoopbackDevice {
    name: String,
    state: Mutex<LoopbackState>,
    peers: mpsc::UnboundedSender<LoopbackPeer>,
}

impl LoopbackDevice {
    /// Create a closed device and the receiver its peers arrive on
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, receiver) = mpsc::unbounded_channel();
        let device = Arc::new(Self {
            name: name.into(),
            state: Mutex::new(LoopbackState::default()),
            peers,
        });
        (device, receiver)
    }

    /// Make the next open fail with `reason`
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_open = Some(reason.into());
    }

    /// Make open report "already open" (after opening anyway)
    pub fn set_report_already_open(&self, enabled: bool) {
        self.state.lock().report_already_open = enabled;
    }

    /// Make the next close take `delay` to complete
    pub fn stall_next_close(&self, delay: Duration) {
        self.state.lock().close_delay = Some(delay);
    }

    fn create_pair(&self) -> Result<(DeviceReader, DeviceWriter), ConnectionError> {
        let (device_end, peer_end) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (reader, writer) = tokio::io::split(device_end);
        let fault: FaultSlot = Arc::new(Mutex::new(None));

        let (peer_reader, peer_writer) = tokio::io::split(peer_end);
        let peer = LoopbackPeer {
            reader: BufReader::new(peer_reader),
            writer: peer_writer,
            fault: fault.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| ConnectionError::FailedToOpen {
                port: self.name.clone(),
                reason: "peer receiver dropped".to_string(),
            })?;

        Ok((Box::new(FaultyReader { inner: reader, fault }), Box::new(writer)))
    }
}

#[async_trait]
impl Device for LoopbackDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn open(&self, _baud_rate: u32) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();

        if let Some(reason) = state.fail_next_open.take() {
            return Err(ConnectionError::FailedToOpen {
                port: self.name.clone(),
                reason,
            });
        }

        if state.open && !state.report_already_open {
            return Err(ConnectionError::AlreadyOpen {
                port: self.name.clone(),
            });
        }

        if state.io.is_none() {
            state.io = Some(self.create_pair()?);
        }
        state.open = true;

        if state.report_already_open {
            return Err(ConnectionError::AlreadyOpen {
                port: self.name.clone(),
            });
        }
        Ok(())
    }

    fn take_io(&self) -> Option<(DeviceReader, DeviceWriter)> {
        self.state.lock().io.take()
    }

    async fn close(&self) {
        let delay = self.state.lock().close_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.open = false;
        state.io = None;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

/// The far end of a [`LoopbackDevice`], playing the controller
pub struct LoopbackPeer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    fault: FaultSlot,
}

impl LoopbackPeer {
    /// Write raw bytes towards the device
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Write one newline-terminated frame towards the device
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.send_bytes(format!("{}\n", line).as_bytes()).await
    }

    /// Serialize `value` and send it as one frame
    pub async fn send_json(&mut self, value: &serde_json::Value) -> io::Result<()> {
        self.send_line(&value.to_string()).await
    }

    /// Next line written by the device, without its newline
    ///
    /// Returns `None` once the device end is gone.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Next message written by the device
    pub async fn next_message(&mut self) -> io::Result<Option<OutgoingMessage>> {
        match self.next_line().await? {
            Some(line) => OutgoingMessage::decode(&line)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
            None => Ok(None),
        }
    }

    /// Make the device's next read fail with `message`
    pub async fn inject_read_error(&mut self, message: &str) -> io::Result<()> {
        *self.fault.lock() = Some(io::Error::new(io::ErrorKind::BrokenPipe, message.to_string()));
        // Wake a reader parked on an empty pipe
        self.send_bytes(b"\n").await
    }
}

/// Hands out loopback devices
///
/// A requestable device becomes authorized once it has been requested.
#[derive(Default)]
pub struct LoopbackProvider {
    authorized: Mutex<Vec<Arc<LoopbackDevice>>>,
    requestable: Mutex<Option<Arc<LoopbackDevice>>>,
}

impl LoopbackProvider {
    /// A provider with nothing to offer
    pub fn empty() -> Self {
        Self::default()
    }

    /// A provider whose device is already authorized
    pub fn authorized(device: Arc<LoopbackDevice>) -> Self {
        Self {
            authorized: Mutex::new(vec![device]),
            requestable: Mutex::new(None),
        }
    }

    /// A provider whose device must be requested first
    pub fn requestable(device: Arc<LoopbackDevice>) -> Self {
        Self {
            authorized: Mutex::new(Vec::new()),
            requestable: Mutex::new(Some(device)),
        }
    }
}

#[async_trait]
impl DeviceProvider for LoopbackProvider {
    async fn authorized_devices(&self) -> Result<Vec<Arc<dyn Device>>, ConnectionError> {
        Ok(self
            .authorized
            .lock()
            .iter()
            .map(|device| device.clone() as Arc<dyn Device>)
            .collect())
    }

    async fn request_device(&self) -> Result<Arc<dyn Device>, ConnectionError> {
        let device = self
            .requestable
            .lock()
            .take()
            .ok_or(ConnectionError::NoDeviceAvailable)?;
        self.authorized.lock().push(device.clone());
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_open_hands_out_peer() {
        let (device, mut peers) = LoopbackDevice::new("loop0");
        device.open(115200).await.expect("open");
        assert!(device.is_open());

        let (mut reader, mut writer) = device.take_io().expect("io");
        let mut peer = peers.recv().await.expect("peer");

        writer.write_all(b"{\"a\":3,\"p\":{}}\n").await.expect("write");
        assert_eq!(
            peer.next_line().await.expect("read").as_deref(),
            Some(r#"{"a":3,"p":{}}"#)
        );

        peer.send_line("hello").await.expect("send");
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[tokio::test]
    async fn test_open_twice_reports_already_open() {
        let (device, _peers) = LoopbackDevice::new("loop0");
        device.open(115200).await.expect("open");
        assert!(matches!(
            device.open(115200).await,
            Err(ConnectionError::AlreadyOpen { .. })
        ));

        device.close().await;
        device.close().await;
        assert!(!device.is_open());
        assert!(device.take_io().is_none());
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let (device, mut peers) = LoopbackDevice::new("loop0");
        device.fail_next_open("busy");
        assert!(matches!(
            device.open(115200).await,
            Err(ConnectionError::FailedToOpen { ref reason, .. }) if reason == "busy"
        ));

        device.open(115200).await.expect("open");
        let (mut reader, _writer) = device.take_io().expect("io");
        let mut peer = peers.recv().await.expect("peer");
        peer.inject_read_error("unplugged").await.expect("inject");

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.to_string(), "unplugged");
    }

    #[tokio::test]
    async fn test_provider_remembers_requested_device() {
        let (device, _peers) = LoopbackDevice::new("loop0");
        let provider = LoopbackProvider::requestable(device);

        assert!(provider.authorized_devices().await.expect("list").is_empty());
        let requested = provider.request_device().await.expect("request");
        assert_eq!(requested.name(), "loop0");
        assert_eq!(provider.authorized_devices().await.expect("list").len(), 1);

        assert!(matches!(
            provider.request_device().await,
            Err(ConnectionError::NoDeviceAvailable)
        ));
    }
}
