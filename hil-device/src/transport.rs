//! Contracts of the collaborators this crate drives but does not implement: the bus transport
//! that opens devices and exchanges control requests, and the registry that knows human-readable
//! device names.

use std::{io, time::Duration};

use thiserror::Error;
use tokio::sync::broadcast;

/// Errors reported by a [`Transport`] or [`DeviceHandle`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// The device is not present on the bus
    #[error("Device not found")]
    NotFound,
    /// The device is held by another process
    #[error("Device is busy")]
    Busy,
    /// The request was not answered in time
    #[error("Request timeout")]
    Timeout,
    /// The request may or may not have reached the device
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// A device found while enumerating the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbedDevice {
    /// Stable hardware id (serial number)
    pub id: String,
    pub platform_id: u32,
    /// Physical location on the bus, e.g. `3-3.4.2`
    pub port_path: String,
}

/// Bus presence change for the device at a port path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hotplug {
    Attached(String),
    Detached(String),
}

impl Hotplug {
    pub fn port_path(&self) -> &str {
        match self {
            Self::Attached(x) | Self::Detached(x) => x,
        }
    }
}

/// Raw reply to a control request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Result code set by the test library on the device
    pub result: i32,
    /// JSON payload, if any
    pub data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Graceful,
    /// Reset without waiting for the device to acknowledge. Such a request always fails at the
    /// host side.
    Forced,
}

/// The local bus carrying the devices under test.
pub trait Transport: Send + Sync + 'static {
    type Handle: DeviceHandle;

    /// List the devices currently present on the bus.
    fn enumerate(&self) -> impl Future<Output = Result<Vec<ProbedDevice>, TransportError>> + Send;

    /// Open the device at `port_path`.
    fn open(
        &self,
        port_path: &str,
    ) -> impl Future<Output = Result<Self::Handle, TransportError>> + Send;

    /// Subscribe to attach/detach notifications.
    fn hotplug(&self) -> broadcast::Receiver<Hotplug>;
}

/// An open connection to one device. Requests are reliable request/response exchanges.
pub trait DeviceHandle: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// Send a control request carrying a single JSON object.
    fn request(
        &self,
        payload: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Reply, TransportError>> + Send;

    /// Drop the device's session with the cloud before it is reflashed.
    fn disconnect_from_cloud(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Transfer a firmware image. The device re-enumerates afterwards.
    fn update_firmware(
        &self,
        firmware: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn reset(
        &self,
        kind: ResetKind,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the handle without processing pending requests.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A device known to the cloud account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDevice {
    pub id: String,
    pub name: Option<String>,
}

/// Source of human-readable device names.
pub trait DeviceRegistry: Send + Sync {
    fn devices(&self) -> impl Future<Output = anyhow::Result<Vec<RegisteredDevice>>> + Send;
}

/// Registry for stations without cloud access. Devices are only known by their ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRegistry;

impl DeviceRegistry for OfflineRegistry {
    async fn devices(&self) -> anyhow::Result<Vec<RegisteredDevice>> {
        Ok(Vec::new())
    }
}
