//! Expansion of authored suites into concrete suite variants.

use std::{fmt::Display, sync::Arc, time::Duration};

use hil_device::{Platform, SystemMode, SystemThread, TestParams};
use tracing::warn;

use crate::{
    filter::Patterns,
    suite::{Suite, TestDecl},
};

/// One (platform, thread mode, system mode) combination of a suite.
#[derive(Debug, Clone)]
pub struct SuiteVariant {
    pub suite: Arc<Suite>,
    pub platform: Platform,
    pub system_thread: SystemThread,
    pub system_mode: SystemMode,
    pub title: String,
    /// Authored tests selected by the name patterns
    pub tests: Vec<TestDecl>,
}

impl SuiteVariant {
    pub const fn params(&self) -> TestParams {
        TestParams {
            system_mode: Some(self.system_mode),
            system_thread: Some(self.system_thread),
        }
    }

    /// Timeout of each test of the variant.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.suite.timeout.unwrap_or(default)
    }
}

impl Display for SuiteVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.title.fmt(f)
    }
}

pub struct TestMatrixBuilder<'a> {
    patterns: &'a Patterns,
}

impl<'a> TestMatrixBuilder<'a> {
    pub const fn new(patterns: &'a Patterns) -> Self {
        Self { patterns }
    }

    /// Generate the variants of `suite`.
    ///
    /// `fixture_platforms` holds the ids of the platforms of the devices in the fixtures the suite
    /// requires. A fixture spanning several platforms is run as a single mixed platform.
    pub fn build(&self, suite: &Arc<Suite>, fixture_platforms: &[u32]) -> Vec<SuiteVariant> {
        let platforms = self.platforms(suite, fixture_platforms);
        let tests: Vec<TestDecl> = suite
            .tests
            .iter()
            .filter(|t| self.patterns.matches(&t.title))
            .cloned()
            .collect();

        let mut variants = Vec::new();
        for platform in &platforms {
            for &system_thread in &suite.system_threads {
                for &system_mode in &suite.system_modes {
                    let mut title = format!(
                        "{} / {} / systemThread={system_thread}",
                        suite.title,
                        platform.name()
                    );
                    // Only shown if declared
                    if !suite.default_system_modes {
                        title.push_str(&format!(", systemMode={system_mode}"));
                    }

                    variants.push(SuiteVariant {
                        suite: suite.clone(),
                        platform: platform.clone(),
                        system_thread,
                        system_mode,
                        title,
                        tests: tests.clone(),
                    });
                }
            }
        }

        variants
    }

    fn platforms(&self, suite: &Suite, fixture_platforms: &[u32]) -> Vec<Platform> {
        if fixture_platforms.is_empty() {
            return suite.platforms.clone();
        }

        let ps: Vec<Platform> = suite
            .platforms
            .iter()
            .filter(|p| fixture_platforms.contains(&p.id()))
            .cloned()
            .collect();
        if ps.is_empty() {
            warn!(suite = %suite.title, "No target platform is available in the suite's fixtures");
        }

        if fixture_platforms.len() > 1 && ps.len() > 1 {
            vec![Platform::mixed(&ps)]
        } else {
            ps
        }
    }
}
