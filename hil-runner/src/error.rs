use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors for this crate
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] hil_device::Error),
    /// The build collaborator failed. Carries the tool output.
    #[error("Failed to build application {app} for {platform}: {source:#}")]
    Build {
        app: String,
        platform: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Application not found: {0}")]
    AppNotFound(String),
    #[error("Failed to read firmware binary {}", path.display())]
    Firmware {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A suite declaration is invalid
    #[error("{file}: {message}")]
    Declaration { file: String, message: String },
    /// A filter does not name a known file, directory or tag
    #[error("{0}")]
    Filter(String),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Failed to read suite manifest {}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid suite manifest")]
    InvalidManifest(#[from] serde_json::Error),
    /// The test failed on the device. Displays the device log as is.
    #[error("{log}")]
    TestFailed { log: String },
    /// A host-side test body or hook failed
    #[error("{0:#}")]
    Host(anyhow::Error),
    /// An invariant of this crate was violated
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Internal errors are always reported with full diagnostics.
    pub fn is_internal(&self) -> bool {
        match self {
            Self::Device(e) => e.is_internal(),
            Self::Internal(_) => true,
            _ => false,
        }
    }

    pub(crate) fn declaration(file: &str, message: impl Into<String>) -> Self {
        Self::Declaration {
            file: file.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
