//! Declaration of test suites.
//!
//! Suites are plain data. Authors describe them through a [`SuiteBuilder`] handed out by a
//! [`Suites`] collection, which is then consumed by the test matrix builder.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use futures::future::BoxFuture;
use hil_device::{Platform, SystemMode, SystemThread, TestParams, platform};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Body of a host-side test or hook.
pub type HostFn = Arc<dyn Fn(TestContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`HostFn`].
pub fn host_fn<F, Fut>(f: F) -> HostFn
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// What host-side code gets to know about the suite variant it runs in.
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Title of the suite variant
    pub suite: String,
    /// Title of the current test. Not set for `*_all` hooks.
    pub test: Option<String>,
    pub platform: Platform,
    pub params: TestParams,
    pub devices: Vec<DeviceInfo>,
}

/// A device acquired by a suite variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: Option<String>,
    pub platform: String,
    pub fixture: Option<String>,
}

/// A fixture required by a suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureDecl {
    /// Name of a fixture of the station configuration
    pub name: String,
    /// Application to flash on the fixture's device. Defaults to an application named after the
    /// fixture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

#[derive(Clone)]
pub struct TestDecl {
    pub title: String,
    /// Host-side part of the test, run after its on-device counterpart
    pub body: Option<HostFn>,
}

impl fmt::Debug for TestDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDecl")
            .field("title", &self.title)
            .field("body", &self.body.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub before_all: Vec<HostFn>,
    pub after_all: Vec<HostFn>,
    pub before_each: Vec<HostFn>,
    pub after_each: Vec<HostFn>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_all", &self.before_all.len())
            .field("after_all", &self.after_all.len())
            .field("before_each", &self.before_each.len())
            .field("after_each", &self.after_each.len())
            .finish()
    }
}

/// Resolved configuration of an authored suite.
#[derive(Debug, Clone)]
pub struct Suite {
    pub title: String,
    /// Path of the suite file relative to the test directory. Its parent directory holds the
    /// suite's applications.
    pub file: String,
    /// Target platforms, sorted by id
    pub platforms: Vec<Platform>,
    pub system_threads: Vec<SystemThread>,
    pub system_modes: Vec<SystemMode>,
    /// No system mode was declared
    pub default_system_modes: bool,
    pub tags: Vec<String>,
    pub fixtures: Vec<FixtureDecl>,
    pub timeout: Option<Duration>,
    pub tests: Vec<TestDecl>,
    pub hooks: Hooks,
}

impl Suite {
    /// Directory of the suite file, relative to the test directory.
    pub fn dir(&self) -> &str {
        self.file.rsplit_once('/').map_or("", |(dir, _)| dir)
    }
}

pub const DEFAULT_SYSTEM_MODES: [SystemMode; 1] = [SystemMode::SemiAutomatic];
pub const DEFAULT_SYSTEM_THREADS: [SystemThread; 2] = [SystemThread::Disabled, SystemThread::Enabled];

/// Collects the declarations of one suite.
pub struct SuiteBuilder {
    file: String,
    title: String,
    platforms: Option<BTreeMap<u32, Platform>>,
    system_modes: BTreeSet<SystemMode>,
    system_threads: BTreeSet<SystemThread>,
    tags: BTreeSet<String>,
    fixtures: Vec<FixtureDecl>,
    timeout: Option<Duration>,
    tests: Vec<TestDecl>,
    hooks: Hooks,
}

impl SuiteBuilder {
    pub fn new(file: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            title: title.into(),
            platforms: None,
            system_modes: BTreeSet::new(),
            system_threads: BTreeSet::new(),
            tags: BTreeSet::new(),
            fixtures: Vec::new(),
            timeout: None,
            tests: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    /// Add target platforms, by name or tag.
    pub fn platform<S: AsRef<str>>(&mut self, names: &[S]) -> Result<&mut Self> {
        if names.is_empty() {
            return Ok(self);
        }

        let ps = platform::parse_platforms(names)
            .map_err(|e| Error::declaration(&self.file, e.to_string()))?;
        self.platforms
            .get_or_insert_default()
            .extend(ps.into_iter().map(|p| (p.id(), p.clone())));
        Ok(self)
    }

    /// Remove platforms, by name or tag, from the declared target platforms.
    pub fn exclude_platform<S: AsRef<str>>(&mut self, names: &[S]) -> Result<&mut Self> {
        if names.is_empty() {
            return Ok(self);
        }

        let ps = platform::parse_platforms(names)
            .map_err(|e| Error::declaration(&self.file, e.to_string()))?;
        if let Some(platforms) = self.platforms.as_mut() {
            for p in ps {
                platforms.remove(&p.id());
            }
        }
        Ok(self)
    }

    pub fn system_mode<S: AsRef<str>>(&mut self, modes: &[S]) -> Result<&mut Self> {
        for m in modes {
            let mode = m
                .as_ref()
                .parse()
                .map_err(|e: String| Error::declaration(&self.file, e))?;
            self.system_modes.insert(mode);
        }
        Ok(self)
    }

    pub fn system_thread<S: AsRef<str>>(&mut self, modes: &[S]) -> Result<&mut Self> {
        for m in modes {
            let mode = m
                .as_ref()
                .parse()
                .map_err(|e: String| Error::declaration(&self.file, e))?;
            self.system_threads.insert(mode);
        }
        Ok(self)
    }

    pub fn tag<S: AsRef<str>>(&mut self, tags: &[S]) -> &mut Self {
        self.tags
            .extend(tags.iter().map(|t| t.as_ref().to_string()));
        self
    }

    /// Require a device of the fixture `name`.
    pub fn fixture(&mut self, name: &str, app: Option<&str>) -> &mut Self {
        self.fixtures.push(FixtureDecl {
            name: name.to_string(),
            app: app.map(str::to_string),
        });
        self
    }

    /// Override the default test timeout.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare a test that only drives its on-device counterpart.
    pub fn test(&mut self, title: &str) -> &mut Self {
        self.tests.push(TestDecl {
            title: title.to_string(),
            body: None,
        });
        self
    }

    /// Declare a test with a host-side body.
    pub fn test_with(&mut self, title: &str, body: HostFn) -> &mut Self {
        self.tests.push(TestDecl {
            title: title.to_string(),
            body: Some(body),
        });
        self
    }

    pub fn before_all(&mut self, f: HostFn) -> &mut Self {
        self.hooks.before_all.push(f);
        self
    }

    pub fn after_all(&mut self, f: HostFn) -> &mut Self {
        self.hooks.after_all.push(f);
        self
    }

    pub fn before_each(&mut self, f: HostFn) -> &mut Self {
        self.hooks.before_each.push(f);
        self
    }

    pub fn after_each(&mut self, f: HostFn) -> &mut Self {
        self.hooks.after_each.push(f);
        self
    }

    /// Apply defaults and produce the resolved suite.
    pub fn build(self) -> Suite {
        let platforms = match self.platforms {
            Some(ps) => ps.into_values().collect(),
            None => {
                warn!(file = %self.file, suite = %self.title, "Target platform is not specified");
                platform::platforms().to_vec()
            }
        };

        let default_system_modes = self.system_modes.is_empty();
        let mut system_modes: Vec<SystemMode> = if default_system_modes {
            DEFAULT_SYSTEM_MODES.to_vec()
        } else {
            self.system_modes.into_iter().collect()
        };
        system_modes.sort_by_key(|m| m.as_str());

        let system_threads = if self.system_threads.is_empty() {
            DEFAULT_SYSTEM_THREADS.to_vec()
        } else {
            self.system_threads.into_iter().collect()
        };

        Suite {
            title: self.title,
            file: self.file,
            platforms,
            system_threads,
            system_modes,
            default_system_modes,
            tags: self.tags.into_iter().collect(),
            fixtures: self.fixtures,
            timeout: self.timeout,
            tests: self.tests,
            hooks: self.hooks,
        }
    }
}

/// The declared suites, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Suites {
    suites: Vec<Arc<Suite>>,
}

impl Suites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a suite of `file`.
    pub fn suite<F>(&mut self, file: &str, title: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut SuiteBuilder) -> Result<()>,
    {
        let mut builder = SuiteBuilder::new(file, title);
        f(&mut builder)?;
        self.add(builder.build());
        Ok(())
    }

    pub fn add(&mut self, suite: Suite) {
        self.suites.push(Arc::new(suite));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Suite>> {
        self.suites.iter()
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// Files declaring the suites, sorted.
    pub fn files(&self) -> BTreeSet<String> {
        self.suites.iter().map(|s| s.file.clone()).collect()
    }

    /// Tags of all the suites, sorted.
    pub fn tags(&self) -> BTreeSet<String> {
        self.suites
            .iter()
            .flat_map(|s| s.tags.iter().cloned())
            .collect()
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&Arc<Suite>) -> bool) {
        self.suites.retain(f);
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Arc<Suite>> {
        self.suites.iter_mut()
    }
}
