//! Results of a run.

use std::time::Duration;

use hil_device::{SystemMode, SystemThread};
use serde::Serialize;
use uuid::Uuid;

use crate::suite::DeviceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub title: String,
    pub status: TestStatus,
    /// Failure message. For on-device failures, the device log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl TestReport {
    pub(crate) fn new(title: &str, status: TestStatus, duration: Duration) -> Self {
        Self {
            title: title.to_string(),
            status,
            message: None,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub(crate) fn failed(title: &str, message: String, duration: Duration) -> Self {
        Self {
            message: Some(message),
            ..Self::new(title, TestStatus::Failed, duration)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    /// Title of the suite variant
    pub title: String,
    pub file: String,
    pub platform: String,
    pub system_thread: SystemThread,
    pub system_mode: SystemMode,
    pub devices: Vec<DeviceInfo>,
    /// Why the variant could not run its tests, if it could not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tests: Vec<TestReport>,
}

impl SuiteReport {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.tests.iter().all(|t| t.status != TestStatus::Failed)
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: Uuid,
    pub success: bool,
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    pub fn new(suites: Vec<SuiteReport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            success: suites.iter().all(SuiteReport::success),
            suites,
        }
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.suites.iter().map(|s| s.count(status)).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
