//! # Introduction
//!
//! This crate drives the physical devices of a hardware-in-the-loop test station. It owns the
//! connection lifecycle of every device (open/close serialization, attach/detach tracking,
//! flashing, resets), speaks the control protocol of the on-device test library and arbitrates
//! which test suite gets which device.
//!
//! The USB transport and the cloud device registry are not implemented here. Applications plug
//! them in through the [`Transport`] and [`DeviceRegistry`] traits.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hil_device::{DeviceManager, OfflineRegistry, StationConfig, Transport, platform};
//!
//! async fn run<T: Transport>(transport: T) -> hil_device::Result<()> {
//!     let config = StationConfig::default();
//!     let mut mgr = DeviceManager::init(Arc::new(transport), &OfflineRegistry, &config, None).await?;
//!
//!     let boron = platform::for_name("boron")?;
//!     let dev = mgr.get_device(boron, None)?;
//!     println!("{:?}", dev.tests().await?);
//!     mgr.release_device(&dev)?;
//!
//!     mgr.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `mock`: In-memory [`Transport`] with scripted devices, for tests of dependent crates.

mod config;
mod device;
mod error;
mod helpers;
pub mod hub;
mod manager;
pub mod platform;
pub mod protocol;
mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{FixtureConfig, StationConfig};
pub use device::{DEFAULT_TEST_TIMEOUT, Device};
pub use error::{Error, ErrorKind, Result};
pub use manager::DeviceManager;
pub use platform::Platform;
pub use protocol::{SystemMode, SystemThread, TestParams, TestResult};
pub use transport::{
    DeviceHandle, DeviceRegistry, Hotplug, OfflineRegistry, ProbedDevice, RegisteredDevice, Reply,
    ResetKind, Transport, TransportError,
};
