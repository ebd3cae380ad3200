//! Control protocol spoken by the test library running on the device.
//!
//! Each request is a single JSON object whose `c` field holds a one letter op code. Replies carry
//! a numeric result code and an optional JSON payload.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

pub const STATUS_PASSED: i32 = 1;
pub const STATUS_FAILED: i32 = 2;
pub const STATUS_SKIPPED: i32 = 3;
pub const STATUS_RUNNING: i32 = 4;
pub const STATUS_WAITING: i32 = 5;
/// The device is about to reset on its own.
pub const RESET_PENDING: i32 = 6;

/// Control requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "c")]
pub enum Command<'a> {
    /// List tests
    #[serde(rename = "l")]
    ListTests,
    /// Select the runtime configuration for the next test
    #[serde(rename = "i")]
    Init {
        #[serde(rename = "m", skip_serializing_if = "Option::is_none")]
        system_mode: Option<&'static str>,
        #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
        system_thread: Option<u8>,
    },
    /// Start test by name
    #[serde(rename = "t")]
    Start {
        #[serde(rename = "t")]
        name: &'a str,
    },
    /// Get status
    #[serde(rename = "s")]
    Status,
    /// Get the log of the last failed test
    #[serde(rename = "L")]
    Log,
}

impl Command<'_> {
    pub fn init(params: &TestParams) -> Self {
        Self::Init {
            system_mode: params.system_mode.map(SystemMode::code),
            system_thread: params.system_thread.map(SystemThread::flag),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Firmware networking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemMode {
    Default,
    Automatic,
    SemiAutomatic,
    Manual,
    SafeMode,
}

impl SystemMode {
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::Automatic,
        Self::SemiAutomatic,
        Self::Manual,
        Self::SafeMode,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Self::Default => "d",
            Self::Automatic => "a",
            Self::SemiAutomatic => "s",
            Self::Manual => "m",
            Self::SafeMode => "S",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Automatic => "automatic",
            Self::SemiAutomatic => "semi-automatic",
            Self::Manual => "manual",
            Self::SafeMode => "safe-mode",
        }
    }
}

impl Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for SystemMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|x| x.as_str() == s)
            .ok_or_else(|| format!("Invalid system mode: {s}"))
    }
}

/// Firmware threading mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemThread {
    Disabled,
    Enabled,
}

impl SystemThread {
    pub const ALL: [Self; 2] = [Self::Disabled, Self::Enabled];

    pub const fn flag(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
        }
    }
}

impl Display for SystemThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for SystemThread {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|x| x.as_str() == s)
            .ok_or_else(|| format!("Invalid threading mode: {s}"))
    }
}

/// Runtime configuration a test is started with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TestParams {
    pub system_mode: Option<SystemMode>,
    pub system_thread: Option<SystemThread>,
}

/// Terminal outcome of an on-device test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    /// Carries the log fetched from the device
    Failed { log: String },
    Skipped,
}
