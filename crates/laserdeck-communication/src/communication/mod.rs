//! Device abstraction
//!
//! A [`Device`] is one byte-stream transport that can be opened, split into
//! a reader and a writer, and closed. A [`DeviceProvider`] finds devices:
//! first among those already authorized, then through discovery.
//!
//! Devices know nothing about framing; that happens above them.

pub mod loopback;
pub mod serial;

use async_trait::async_trait;
use laserdeck_core::ConnectionError;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read half of an open device
pub type DeviceReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open device
pub type DeviceWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A byte-stream transport
#[async_trait]
pub trait Device: Send + Sync {
    /// Human readable name (port path or similar)
    fn name(&self) -> String;

    /// Open the device
    ///
    /// Returns [`ConnectionError::AlreadyOpen`] if it is open already;
    /// callers may treat that as success.
    async fn open(&self, baud_rate: u32) -> Result<(), ConnectionError>;

    /// Hand out the reader and writer of an open device
    ///
    /// Returns `None` if the device is not open or the halves were
    /// already taken.
    fn take_io(&self) -> Option<(DeviceReader, DeviceWriter)>;

    /// Close the device; closing a closed device is a no-op
    async fn close(&self);

    /// Check if the device is open
    fn is_open(&self) -> bool;
}

/// Source of devices
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Devices the user has already granted access to
    async fn authorized_devices(&self) -> Result<Vec<Arc<dyn Device>>, ConnectionError>;

    /// Discover a new device
    async fn request_device(&self) -> Result<Arc<dyn Device>, ConnectionError>;
}
