//! # Introduction
//!
//! Test suites of a hardware-in-the-loop station are declared once and run on every combination of
//! target platform, threading mode and system mode they support. This crate expands the declared
//! suites into that matrix, flashes the suite's applications to the devices checked out for each
//! combination, pairs the tests declared on the host with the tests found on the devices and runs
//! them.
//!
//! Device access goes through [`hil_device`]. Building applications from sources is left to an
//! [`AppBuilder`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hil_device::{OfflineRegistry, StationConfig, Transport};
//! use hil_runner::{NoBuilder, RunConfig, Runner, Suites};
//!
//! async fn run<T: Transport>(transport: T) -> hil_runner::Result<bool> {
//!     let mut suites = Suites::new();
//!     suites.suite("wiring/gpio/gpio.spec", "GPIO", |s| {
//!         s.platform(&["gen3"])?.test("Digital Read Write");
//!         Ok(())
//!     })?;
//!
//!     let config = RunConfig {
//!         binary_dir: Some("build/tests".into()),
//!         ..Default::default()
//!     };
//!     let runner = Runner::new(
//!         Arc::new(transport),
//!         OfflineRegistry,
//!         NoBuilder,
//!         StationConfig::default(),
//!         config,
//!     );
//!     let report = runner.run(suites).await?;
//!
//!     Ok(report.success)
//! }
//! ```

mod correlate;
mod error;
pub mod filter;
pub mod firmware;
pub mod manifest;
mod matrix;
mod orchestrator;
mod report;
mod runner;
mod suite;

pub use correlate::{PlannedTest, correlate, find_test_name};
pub use error::{Error, Result};
pub use filter::{Filters, Patterns};
pub use firmware::{AppBuilder, NoBuilder};
pub use manifest::SuiteManifest;
pub use matrix::{SuiteVariant, TestMatrixBuilder};
pub use orchestrator::{Phase, SuiteOrchestrator};
pub use report::{RunReport, SuiteReport, TestReport, TestStatus};
pub use runner::{RunConfig, Runner, select_suites};
pub use suite::{
    DeviceInfo, FixtureDecl, HostFn, Hooks, Suite, SuiteBuilder, Suites, TestContext, TestDecl,
    host_fn,
};
