//! Declarative suite files.
//!
//! A manifest describes suites without host-side code, which is enough for suites that only drive
//! on-device tests and for listing what a test directory contains.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    suite::{FixtureDecl, SuiteBuilder, Suites},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteManifest {
    pub suites: Vec<SuiteEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SuiteEntry {
    pub name: String,
    /// Suite file, relative to the test directory
    pub file: String,
    pub platforms: Vec<String>,
    pub exclude_platforms: Vec<String>,
    pub system_threads: Vec<String>,
    pub system_modes: Vec<String>,
    pub tags: Vec<String>,
    pub fixtures: Vec<FixtureDecl>,
    /// Test timeout in milliseconds
    pub timeout: Option<u64>,
    pub tests: Vec<String>,
}

impl SuiteManifest {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Manifest {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&data)
    }

    /// Declare all the suites of the manifest.
    pub fn declare(&self, suites: &mut Suites) -> Result<()> {
        for entry in &self.suites {
            if entry.file.is_empty() {
                return Err(Error::declaration(&entry.name, "Suite file is not specified"));
            }

            suites.suite(&entry.file, &entry.name, |s| entry.apply(s))?;
        }
        Ok(())
    }
}

impl SuiteEntry {
    fn apply(&self, s: &mut SuiteBuilder) -> Result<()> {
        s.platform(&self.platforms)?
            .exclude_platform(&self.exclude_platforms)?
            .system_thread(&self.system_threads)?
            .system_mode(&self.system_modes)?
            .tag(&self.tags);
        for f in &self.fixtures {
            s.fixture(&f.name, f.app.as_deref());
        }
        if let Some(ms) = self.timeout {
            s.timeout(Duration::from_millis(ms));
        }
        for t in &self.tests {
            s.test(t);
        }
        Ok(())
    }
}
