//! Lifecycle of one suite variant on its devices.
//!
//! A variant goes through the following phases:
//!
//! `Created → DevicesAcquired → [Skipped] → Flashed → TestsDiscovered → Running → TornDown`
//!
//! Dry runs stop at `Skipped` without touching the devices. Without flashing, `Flashed` is never
//! entered.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use futures::{
    StreamExt,
    future::{join_all, try_join_all},
    stream::FuturesUnordered,
};
use hil_device::{Device, DeviceManager, TestResult, Transport};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    correlate::{PlannedTest, correlate},
    filter::Patterns,
    firmware::{self, AppBuilder, AppSource},
    matrix::SuiteVariant,
    report::TestStatus,
    runner::RunConfig,
    suite::{DeviceInfo, FixtureDecl, TestContext},
};

/// Time given to the other devices of a failed test to finish on their own.
const ABORT_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    DevicesAcquired,
    Skipped,
    Flashed,
    TestsDiscovered,
    Running,
    TornDown,
}

struct Acquired<T: Transport> {
    device: Arc<Device<T>>,
    fixture: Option<FixtureDecl>,
}

impl<T: Transport> Acquired<T> {
    fn fixture_name(&self) -> Option<&str> {
        self.fixture.as_ref().map(|f| f.name.as_str())
    }
}

/// Drives the tests of one suite variant.
pub struct SuiteOrchestrator<'a, T: Transport, B: AppBuilder> {
    variant: SuiteVariant,
    manager: &'a DeviceManager<T>,
    builder: &'a B,
    config: &'a RunConfig,
    patterns: &'a Patterns,
    phase: Phase,
    devices: Vec<Acquired<T>>,
    tests: Vec<PlannedTest>,
}

impl<'a, T: Transport, B: AppBuilder> SuiteOrchestrator<'a, T, B> {
    pub fn new(
        variant: SuiteVariant,
        manager: &'a DeviceManager<T>,
        builder: &'a B,
        config: &'a RunConfig,
        patterns: &'a Patterns,
    ) -> Self {
        Self {
            variant,
            manager,
            builder,
            config,
            patterns,
            phase: Phase::Created,
            devices: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn variant(&self) -> &SuiteVariant {
        &self.variant
    }

    /// Tests to run, known once the variant is initialized.
    pub fn tests(&self) -> &[PlannedTest] {
        &self.tests
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .map(|a| DeviceInfo {
                id: a.device.id().to_string(),
                name: a.device.name().map(str::to_string),
                platform: a.device.platform().name().to_string(),
                fixture: a.fixture_name().map(str::to_string),
            })
            .collect()
    }

    /// Context handed to host-side code. `test` is not set for the `*_all` hooks.
    pub fn context(&self, test: Option<&str>) -> TestContext {
        TestContext {
            suite: self.variant.title.clone(),
            test: test.map(str::to_string),
            platform: self.variant.platform.clone(),
            params: self.variant.params(),
            devices: self.devices(),
        }
    }

    /// Acquire, flash and discover the tests of the devices of the variant.
    pub async fn init(&mut self) -> Result<()> {
        if self.phase != Phase::Created {
            return Err(Error::Internal("suite variant initialized twice"));
        }

        self.acquire()?;
        self.phase = Phase::DevicesAcquired;

        if self.config.dry_run {
            self.tests = correlate(&self.variant.tests, &BTreeMap::new());
            self.phase = Phase::Skipped;
            return Ok(());
        }

        if !self.config.no_flash {
            self.flash().await?;
            self.phase = Phase::Flashed;
        }

        self.discover().await?;
        self.phase = Phase::TestsDiscovered;

        Ok(())
    }

    fn acquire(&mut self) -> Result<()> {
        let fixtures: Vec<Option<FixtureDecl>> = if self.variant.suite.fixtures.is_empty() {
            vec![None]
        } else {
            self.variant.suite.fixtures.iter().cloned().map(Some).collect()
        };

        for fixture in fixtures {
            let name = fixture.as_ref().map(|f| f.name.as_str());
            match self.manager.get_device(&self.variant.platform, name) {
                Ok(device) => {
                    info!(device = %device, fixture = ?name, suite = %self.variant, "Acquired device");
                    self.devices.push(Acquired { device, fixture });
                }
                Err(e) => {
                    self.release_all();
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    fn release_all(&mut self) {
        for a in self.devices.drain(..) {
            if let Err(e) = self.manager.release_device(&a.device) {
                warn!(device = %a.device, "Failed to release device: {e}");
            }
        }
    }

    /// Firmware path of every device, in acquisition order.
    async fn resolve_firmware(&self) -> Result<Vec<PathBuf>> {
        let suite_dir = self.variant.suite.dir();
        let mut built: HashMap<(String, u32), PathBuf> = HashMap::new();
        let mut paths = Vec::with_capacity(self.devices.len());

        for a in &self.devices {
            let platform = a.device.platform();
            let apps = firmware::collect_apps(
                &self.config.test_dir,
                self.config.binary_dir.as_deref(),
                platform,
                suite_dir,
            )?;
            let app = firmware::select_app(&apps, a.fixture.as_ref(), suite_dir)?;

            let path = match apps.get(&app) {
                Some(AppSource::Binary(p)) => p.clone(),
                Some(AppSource::Sources(dir)) => {
                    let key = (dir.clone(), platform.id());
                    match built.get(&key) {
                        Some(p) => p.clone(),
                        None => {
                            info!(app = %app, platform = %platform, "Building application");
                            let p = self
                                .builder
                                .build_app(&self.config.test_dir.join(dir), platform)
                                .await
                                .map_err(|source| Error::Build {
                                    app: app.clone(),
                                    platform: platform.name().to_string(),
                                    source,
                                })?;
                            built.insert(key, p.clone());
                            p
                        }
                    }
                }
                None => return Err(Error::AppNotFound(app)),
            };
            debug!(device = %a.device, fixture = ?a.fixture_name(), "Firmware: {}", path.display());
            paths.push(path);
        }

        Ok(paths)
    }

    async fn flash(&self) -> Result<()> {
        let paths = self.resolve_firmware().await?;
        let images = try_join_all(paths.iter().map(|p| firmware::read_firmware(p))).await?;

        let results = join_all(self.devices.iter().zip(&images).map(|(a, image)| async move {
            info!(device = %a.device, fixture = ?a.fixture_name(), "Flashing device");
            a.device.flash(image).await
        }))
        .await;

        if let Some(e) = results.into_iter().find_map(Result::err) {
            // Siblings may be waiting for the device that failed
            self.reset_devices(0..self.devices.len()).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn discover(&mut self) -> Result<()> {
        let lists = try_join_all(self.devices.iter().map(|a| a.device.tests())).await?;

        let mut device_tests: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, names) in lists.into_iter().enumerate() {
            debug!(device = %self.devices[i].device, "Device tests: {names:?}");
            for name in names {
                device_tests.entry(name).or_default().push(i);
            }
        }

        let mut tests = correlate(&self.variant.tests, &device_tests);
        // Authored tests are already selected by the patterns
        let device_only = tests.split_off(self.variant.tests.len());
        tests.extend(
            device_only
                .into_iter()
                .filter(|t| self.patterns.matches(&t.title)),
        );
        self.tests = tests;

        Ok(())
    }

    /// Run the on-device part of `test`.
    ///
    /// If any device fails, the devices still running the test are reset after a grace delay.
    pub async fn run_test(&mut self, test: &PlannedTest) -> Result<TestStatus> {
        match self.phase {
            Phase::Skipped => return Ok(TestStatus::Skipped),
            Phase::TestsDiscovered | Phase::Running => {}
            _ => return Err(Error::Internal("suite variant is not initialized")),
        }
        let Some(name) = test.device_test.as_deref() else {
            return Ok(TestStatus::Passed);
        };
        if test.devices.iter().any(|&i| i >= self.devices.len()) {
            return Err(Error::Internal("test is mapped to an unknown device"));
        }
        self.phase = Phase::Running;

        let params = self.variant.params();
        let timeout = self.variant.timeout(self.config.test_timeout);
        let mut active = BTreeSet::new();

        for &i in &test.devices {
            let a = &self.devices[i];
            active.insert(i);
            info!(device = %a.device, fixture = ?a.fixture_name(), "Starting test: {name}");
            if let Err(e) = a.device.start_test(name, &params).await {
                // The test library refused, nothing is running
                if e.is_runner() {
                    active.remove(&i);
                }
                self.abort(active).await;
                return Err(e.into());
            }
        }

        let devices = &self.devices;
        let mut waits: FuturesUnordered<_> = test
            .devices
            .iter()
            .map(|&i| async move { (i, devices[i].device.wait_test(timeout).await) })
            .collect();

        let mut skipped = false;
        let mut failure = None;
        while let Some((i, res)) = waits.next().await {
            let a = &devices[i];
            match res {
                Ok(result) => {
                    active.remove(&i);
                    debug!(device = %a.device, fixture = ?a.fixture_name(), "Test {name}: {result:?}");
                    match result {
                        TestResult::Passed => {}
                        TestResult::Skipped => skipped = true,
                        TestResult::Failed { log } => {
                            failure = Some(Error::TestFailed { log });
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(device = %a.device, fixture = ?a.fixture_name(), "Test {name} did not complete: {e}");
                    failure = Some(e.into());
                    break;
                }
            }
        }

        if let Some(e) = failure {
            let _ = tokio::time::timeout(ABORT_GRACE, async {
                while let Some((i, res)) = waits.next().await {
                    if res.is_ok() {
                        active.remove(&i);
                    }
                }
            })
            .await;
            drop(waits);

            self.reset_devices(active).await;
            return Err(e);
        }

        Ok(if skipped {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        })
    }

    async fn abort(&self, active: BTreeSet<usize>) {
        if active.is_empty() {
            return;
        }
        tokio::time::sleep(ABORT_GRACE).await;
        self.reset_devices(active).await;
    }

    /// Reset the devices at `indices`. Failures are logged.
    async fn reset_devices(&self, indices: impl IntoIterator<Item = usize>) {
        let resets = indices
            .into_iter()
            .filter_map(|i| self.devices.get(i))
            .map(|a| async move {
                debug!(device = %a.device, fixture = ?a.fixture_name(), "Resetting device");
                if let Err(e) = a.device.reset().await {
                    warn!(device = %a.device, fixture = ?a.fixture_name(), "Failed to reset device: {e}");
                }
            });
        join_all(resets).await;
    }

    /// Reset, close and release every acquired device.
    pub async fn shutdown(&mut self) {
        if self.phase == Phase::TornDown {
            return;
        }

        // Dry runs never touched the devices
        if self.phase != Phase::Skipped {
            self.reset_devices(0..self.devices.len()).await;
        }
        for a in &self.devices {
            if let Err(e) = a.device.close().await {
                warn!(device = %a.device, fixture = ?a.fixture_name(), "Error while closing device: {e}");
            }
        }
        self.release_all();
        self.phase = Phase::TornDown;
    }
}

impl<T: Transport, B: AppBuilder> Drop for SuiteOrchestrator<'_, T, B> {
    fn drop(&mut self) {
        if !self.devices.is_empty() {
            debug!(suite = %self.variant, "Releasing devices of a suite that was not shut down");
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, fs};

    use hil_device::{
        OfflineRegistry, StationConfig,
        mock::{MockPort, MockTransport},
        platform,
        protocol::{STATUS_FAILED, STATUS_RUNNING, STATUS_SKIPPED},
    };

    use super::*;
    use crate::{
        firmware::NoBuilder,
        matrix::TestMatrixBuilder,
        suite::{Suite, SuiteBuilder},
    };

    struct Station {
        transport: Arc<MockTransport>,
        manager: DeviceManager<MockTransport>,
        _bins: tempfile::TempDir,
        config: RunConfig,
    }

    async fn station(devices: &[(&str, u32)], fixtures: &[(&str, &[&str])]) -> Station {
        let transport = Arc::new(MockTransport::new());
        for &(id, platform_id) in devices {
            transport.add_device(id, platform_id);
        }
        let station = StationConfig {
            fixtures: fixtures
                .iter()
                .map(|(name, devs)| hil_device::FixtureConfig {
                    name: name.to_string(),
                    devices: devs.iter().map(|d| d.to_string()).collect(),
                })
                .collect(),
            ..Default::default()
        };
        let manager = DeviceManager::init(transport.clone(), &OfflineRegistry, &station, None)
            .await
            .unwrap();

        let bins = tempfile::tempdir().unwrap();
        for p in platform::platforms() {
            let dir = bins.path().join(p.name()).join("wiring/suite");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("suite.bin"), b"firmware").unwrap();
        }
        let config = RunConfig {
            test_dir: bins.path().join("tests"),
            binary_dir: Some(bins.path().to_path_buf()),
            ..Default::default()
        };

        Station {
            transport,
            manager,
            _bins: bins,
            config,
        }
    }

    impl Station {
        fn port(&self, id: &str) -> Arc<MockPort> {
            self.transport.port(id).unwrap()
        }
    }

    fn variant(f: impl FnOnce(&mut SuiteBuilder), fixture_platforms: &[u32]) -> SuiteVariant {
        let mut b = SuiteBuilder::new("wiring/suite/suite.spec", "Suite");
        b.system_thread(&["enabled"]).unwrap();
        f(&mut b);
        let suite: Arc<Suite> = Arc::new(b.build());
        TestMatrixBuilder::new(&Patterns::default())
            .build(&suite, fixture_platforms)
            .remove(0)
    }

    #[tokio::test(start_paused = true)]
    async fn single_device() {
        let st = station(&[("a", 13)], &[]).await;
        let port = st.port("a");
        port.set_tests(&["test_01", "test_02"]);
        let patterns = Patterns::default();
        let v = variant(
            |b| {
                b.platform(&["boron"]).unwrap();
                b.test("Test 01");
            },
            &[],
        );

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        orch.init().await.unwrap();
        assert_eq!(orch.phase(), Phase::TestsDiscovered);
        assert_eq!(port.flashes(), 1);
        assert_eq!(st.manager.available(13, None), 0);

        let titles: Vec<&str> = orch.tests().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Test 01", "test_02"]);

        for t in orch.tests().to_vec() {
            assert_eq!(orch.run_test(&t).await.unwrap(), TestStatus::Passed);
        }
        assert_eq!(port.started_tests(), ["test_01", "test_02"]);

        orch.shutdown().await;
        assert_eq!(orch.phase(), Phase::TornDown);
        assert_eq!(st.manager.available(13, None), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run() {
        let mut st = station(&[("a", 13)], &[]).await;
        st.config.dry_run = true;
        let patterns = Patterns::default();
        let v = variant(
            |b| {
                b.platform(&["boron"]).unwrap();
                b.test("test_01");
            },
            &[],
        );

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        orch.init().await.unwrap();
        assert_eq!(orch.phase(), Phase::Skipped);
        let t = orch.tests()[0].clone();
        assert_eq!(orch.run_test(&t).await.unwrap(), TestStatus::Skipped);
        orch.shutdown().await;

        let port = st.port("a");
        assert_eq!(port.opens(), 0);
        assert_eq!(port.resets(), 0);
        assert_eq!(st.manager.available(13, None), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_and_failed() {
        let st = station(&[("a", 13)], &[]).await;
        let port = st.port("a");
        port.set_tests(&["skipped", "failed"]);
        port.set_statuses("skipped", &[STATUS_RUNNING, STATUS_SKIPPED]);
        port.set_statuses("failed", &[STATUS_FAILED]);
        port.set_log("assertion failed: x == 1\n");
        let patterns = Patterns::default();
        let v = variant(
            |s| {
                s.platform(&["boron"]).unwrap();
            },
            &[],
        );

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        orch.init().await.unwrap();
        let tests = orch.tests().to_vec();
        assert_eq!(tests[0].title, "failed");

        let err = orch.run_test(&tests[0]).await.unwrap_err();
        assert_eq!(err.to_string(), "assertion failed: x == 1");
        assert_eq!(orch.run_test(&tests[1]).await.unwrap(), TestStatus::Skipped);
        orch.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_resets_running_devices() {
        let st = station(&[("a", 13), ("b", 12)], &[("i2c", &["a", "b"])]).await;
        let (a, b) = (st.port("a"), st.port("b"));
        for port in [&a, &b] {
            port.set_tests(&["i2c_master_slave"]);
        }
        a.set_statuses("i2c_master_slave", &[STATUS_RUNNING, STATUS_FAILED]);
        a.set_log("slave did not respond");
        b.hang("i2c_master_slave");
        let patterns = Patterns::default();
        let v = variant(
            |s| {
                // One device per declaration
                s.platform(&["gen3"])
                    .unwrap()
                    .fixture("i2c", Some("suite"))
                    .fixture("i2c", Some("suite"));
            },
            &[12, 13],
        );
        assert!(v.platform.is_mixed());

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        orch.init().await.unwrap();
        let ids: HashSet<String> = orch.devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string()]));

        let resets_before = (a.resets(), b.resets());
        let test = orch.tests()[0].clone();
        assert_eq!(test.devices.len(), 2);

        let err = orch.run_test(&test).await.unwrap_err();
        assert!(matches!(err, Error::TestFailed { ref log } if log == "slave did not respond"));
        // Only the device still running the test is reset
        assert_eq!(a.resets(), resets_before.0);
        assert_eq!(b.resets(), resets_before.1 + 1);

        orch.shutdown().await;
        assert_eq!(st.manager.available(13, Some("i2c")), 1);
        assert_eq!(st.manager.available(12, Some("i2c")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flash_resets_all_devices() {
        let st = station(&[("a", 13), ("b", 13)], &[("pair", &["a", "b"])]).await;
        let (a, b) = (st.port("a"), st.port("b"));
        // Both devices of the fixture run the suite's application
        for id in ["a", "b"] {
            st.port(id).set_tests(&["test"]);
        }
        a.fail_flash(true);
        let patterns = Patterns::default();
        let v = variant(
            |s| {
                s.platform(&["boron"])
                    .unwrap()
                    .fixture("pair", Some("suite"))
                    .fixture("pair", Some("suite"));
            },
            &[13],
        );

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        let err = orch.init().await.unwrap_err();
        assert!(matches!(err, Error::Device(_)));
        assert_eq!(orch.phase(), Phase::DevicesAcquired);
        assert_eq!(a.resets(), 1);
        assert_eq!(b.resets(), 1);

        orch.shutdown().await;
        assert_eq!(st.manager.available(13, Some("pair")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_failure_releases_devices() {
        let st = station(&[("a", 13)], &[("master", &["a"])]).await;
        let patterns = Patterns::default();
        let v = variant(
            |s| {
                s.platform(&["boron"])
                    .unwrap()
                    .fixture("master", None)
                    .fixture("master", None);
            },
            &[13],
        );

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        let err = orch.init().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Device(hil_device::Error::NoDeviceAvailable { .. })
        ));
        assert!(orch.devices().is_empty());
        assert_eq!(st.manager.available(13, Some("master")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_flash() {
        let mut st = station(&[("a", 13)], &[]).await;
        st.config.no_flash = true;
        let port = st.port("a");
        port.set_tests(&["test_01"]);
        let patterns = Patterns::new(&["^nothing$"]);
        let v = variant(
            |s| {
                s.platform(&["boron"]).unwrap();
            },
            &[],
        );

        let mut orch = SuiteOrchestrator::new(v, &st.manager, &NoBuilder, &st.config, &patterns);
        orch.init().await.unwrap();
        assert_eq!(port.flashes(), 0);
        // Device tests are selected by the patterns too
        assert!(orch.tests().is_empty());
        orch.shutdown().await;
    }
}
