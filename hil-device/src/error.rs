use thiserror::Error;

use crate::transport::TransportError;

/// Errors for this crate
#[derive(Error, Debug)]
pub enum Error {
    /// The bus has no devices with a supported platform
    #[error("No devices found")]
    NoDevicesFound,
    /// A configured id or name does not match a discovered device
    #[error("Device not found: {0}")]
    UnknownDevice(String),
    /// Two fixtures share the same name
    #[error("Duplicate fixture name: {0}")]
    DuplicateFixture(String),
    /// A device is claimed by more than one fixture
    #[error("Device is already used in another fixture: {0}")]
    DeviceInMultipleFixtures(String),
    #[error("Unknown fixture: {0}")]
    UnknownFixture(String),
    #[error("Unknown platform ID: {0}")]
    UnknownPlatformId(u32),
    #[error("Unknown platform name: {0}")]
    UnknownPlatformName(String),
    #[error("Unknown platform tag: {0}")]
    UnknownPlatformTag(String),
    /// The requested queue is empty or does not exist
    #[error("No devices available for the target platform: {platform}")]
    NoDeviceAvailable { platform: String },
    /// A blocking wait ran past its deadline
    #[error("{0}")]
    Timeout(&'static str),
    /// The transport failed to open the device or to exchange a request
    #[error("Connection error: {source}")]
    Connection {
        #[source]
        source: TransportError,
    },
    /// The test library on the device reported a negative result code
    #[error("Runner command failed, code: {code}")]
    Runner { code: i32 },
    #[error("Unexpected test status: {0}")]
    UnexpectedStatus(i32),
    #[error("Invalid reply payload")]
    InvalidReply {
        #[source]
        source: serde_json::Error,
    },
    /// The device registry could not be queried
    #[error("Failed to fetch registered devices: {message}")]
    Registry { message: String },
    #[error("Invalid port path: {0}")]
    InvalidPortPath(String),
    /// `uhubctl` failed to power cycle a port
    #[error("Failed to power cycle hub port (exit code: {code:?}): {output}")]
    HubCycle { code: Option<i32>, output: String },
    /// An invariant of this crate was violated
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// Coarse classification of [`Error`], used to decide how failures propagate and how they are
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Timeout,
    Runner,
    NotFound,
    Internal,
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDevice(_)
            | Self::DuplicateFixture(_)
            | Self::DeviceInMultipleFixtures(_)
            | Self::UnknownFixture(_)
            | Self::UnknownPlatformId(_)
            | Self::UnknownPlatformName(_)
            | Self::UnknownPlatformTag(_)
            | Self::InvalidPortPath(_) => ErrorKind::Configuration,
            Self::NoDevicesFound | Self::NoDeviceAvailable { .. } => ErrorKind::NotFound,
            Self::Timeout(_)
            | Self::Connection {
                source: TransportError::Timeout,
            } => ErrorKind::Timeout,
            Self::Connection { .. }
            | Self::InvalidReply { .. }
            | Self::Registry { .. }
            | Self::HubCycle { .. } => ErrorKind::Connection,
            Self::Runner { .. } | Self::UnexpectedStatus(_) => ErrorKind::Runner,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub const fn is_runner(&self) -> bool {
        matches!(self, Self::Runner { .. })
    }

    pub const fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal)
    }
}

impl From<TransportError> for Error {
    fn from(source: TransportError) -> Self {
        Self::Connection { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
