//! Connection lifecycle
//!
//! The [`ConnectionManager`] owns the device and the read loop of the
//! current session. Connect and disconnect are serialized behind one lock,
//! and a disconnect waits for the read loop to release the device before
//! declaring the link down, so two read loops never share a device.

use crate::communication::{Device, DeviceProvider, DeviceReader};
use crate::dispatcher::Dispatcher;
use crate::encoder::OutboundEncoder;
use crate::link::Link;
use crate::protocol::{Framer, OutgoingCommand};
use laserdeck_core::{AppEvent, ConnectionError, ConnectionEvent, ConnectionState, LogKind};
use laserdeck_settings::ConnectionSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a read loop ended
#[derive(Debug)]
enum ReadOutcome {
    Cancelled,
    EndOfStream,
    Failed(std::io::Error),
}

/// One open device and the task reading it
struct Session {
    device: Arc<dyn Device>,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
}

struct ReadLoop {
    reader: DeviceReader,
    device: Arc<dyn Device>,
    link: Arc<Link>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    chunk_size: usize,
}

impl ReadLoop {
    async fn run(mut self) {
        let port = self.device.name();
        let mut framer = Framer::new();
        let mut buf = vec![0u8; self.chunk_size];

        let outcome = loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break ReadOutcome::Cancelled,
                read = self.reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => break ReadOutcome::EndOfStream,
                Ok(n) => {
                    for frame in framer.push(&buf[..n]) {
                        self.dispatcher.handle_frame(frame);
                    }
                }
                Err(e) => break ReadOutcome::Failed(e),
            }
        };

        tracing::debug!("Read loop for {} finished: {:?}", port, outcome);
        framer.reset();
        drop(self.reader);

        if let ReadOutcome::Failed(e) = &outcome {
            let err = ConnectionError::ReadFailed {
                reason: e.to_string(),
            };
            self.link.record_error(err.to_string());
        }

        self.link.clear_writer().await;
        self.device.close().await;

        if !matches!(outcome, ReadOutcome::Failed(_)) {
            self.link.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Owns the device and the connection state machine
pub struct ConnectionManager {
    provider: Arc<dyn DeviceProvider>,
    link: Arc<Link>,
    encoder: Arc<OutboundEncoder>,
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        link: Arc<Link>,
        encoder: Arc<OutboundEncoder>,
        dispatcher: Arc<Dispatcher>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            provider,
            link,
            encoder,
            dispatcher,
            settings,
            session: Mutex::new(None),
        }
    }

    /// Open a device and start reading it
    ///
    /// Any current session is torn down first. On failure the link moves
    /// to the Error state; the error is returned unless
    /// `suppress_errors` is set, in which case it is only logged.
    pub async fn connect(&self, suppress_errors: bool) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            self.teardown(previous).await;
        }

        match self.open_session().await {
            Ok(new_session) => {
                *session = Some(new_session);
                if let Err(e) = self.encoder.send(OutgoingCommand::SettingsGet).await {
                    tracing::warn!("Failed to request controller settings: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                self.link.record_error(e.to_string());
                self.link
                    .events()
                    .publish(AppEvent::Connection(ConnectionEvent::ConnectFailed {
                        error: e.to_string(),
                    }));
                if suppress_errors {
                    tracing::warn!("Connect failed: {}", e);
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Close the current session; a no-op when there is none
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(current) => self.teardown(current).await,
            None => {
                self.link.clear_error();
                self.link.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Name of the device while its read loop is running
    pub async fn port(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.reader_task.is_finished())
            .map(|s| s.device.name())
    }

    fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.disconnect_timeout_ms)
    }

    async fn acquire(&self) -> Result<Arc<dyn Device>, ConnectionError> {
        let authorized = self.provider.authorized_devices().await?;
        if let Some(device) = authorized.into_iter().next() {
            return Ok(device);
        }
        tracing::info!("No authorized device, requesting one");
        self.provider.request_device().await
    }

    async fn open_session(&self) -> Result<Session, ConnectionError> {
        let device = self.acquire().await?;
        let port = device.name();

        match device.open(self.settings.baud_rate).await {
            Ok(()) => {}
            Err(ConnectionError::AlreadyOpen { .. }) => {
                tracing::info!("{} is already open, reusing it", port);
            }
            Err(e) => return Err(e),
        }

        let Some((reader, writer)) = device.take_io() else {
            device.close().await;
            return Err(ConnectionError::FailedToOpen {
                port,
                reason: "device has no open stream".to_string(),
            });
        };

        self.link.install_writer(writer);
        self.link.set_state(ConnectionState::Connected);
        self.link.clear_error();
        self.link
            .events()
            .publish(AppEvent::Connection(ConnectionEvent::Opened { port: port.clone() }));
        tracing::info!("Connected to {}", port);

        let cancel = CancellationToken::new();
        let read_loop = ReadLoop {
            reader,
            device: device.clone(),
            link: self.link.clone(),
            dispatcher: self.dispatcher.clone(),
            cancel: cancel.clone(),
            chunk_size: self.settings.read_chunk_size.max(1),
        };
        let reader_task = tokio::spawn(read_loop.run());

        Ok(Session {
            device,
            cancel,
            reader_task,
        })
    }

    /// Stop the read loop, wait for it to let go, and release the device
    async fn teardown(&self, session: Session) {
        let Session {
            device,
            cancel,
            mut reader_task,
        } = session;
        let port = device.name();
        let timeout = self.disconnect_timeout();

        cancel.cancel();
        let forced = match tokio::time::timeout(timeout, &mut reader_task).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                tracing::warn!("Read loop for {} ended abnormally: {}", port, e);
                false
            }
            Err(_) => {
                reader_task.abort();
                let err = ConnectionError::DisconnectTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                };
                tracing::warn!("{}, force-closing {}", err, port);
                self.link.log().push(LogKind::Debug, err.to_string());
                self.link
                    .events()
                    .publish(AppEvent::Connection(ConnectionEvent::ForcedClose {
                        port: port.clone(),
                    }));
                true
            }
        };

        if forced {
            self.link.abandon_writer();
        } else {
            self.link.clear_writer().await;
        }

        device.close().await;
        self.link.clear_error();
        self.link.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from {}", port);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}
