//! Top level driver of a test run.

use std::{
    collections::{BTreeSet, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use hil_device::{
    DEFAULT_TEST_TIMEOUT, DeviceManager, DeviceRegistry, StationConfig, Transport, platform,
};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    Error, Result,
    correlate::PlannedTest,
    filter::{Filters, Patterns},
    firmware::AppBuilder,
    matrix::{SuiteVariant, TestMatrixBuilder},
    orchestrator::SuiteOrchestrator,
    report::{RunReport, SuiteReport, TestReport, TestStatus},
    suite::{HostFn, Suite, Suites, TestContext},
};

/// Options of a test run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory the suite files are relative to
    pub test_dir: PathBuf,
    /// Directory of precompiled binaries, laid out as `<platform>/<suite dir>/*.bin`
    pub binary_dir: Option<PathBuf>,
    /// Acquire devices but do not touch them, reporting every test as skipped
    pub dry_run: bool,
    /// Run whatever firmware the devices already have
    pub no_flash: bool,
    /// Test name patterns
    pub patterns: Vec<String>,
    /// Suite filters
    pub filters: Vec<String>,
    /// Timeout of a test unless its suite overrides it
    pub test_timeout: Duration,
    /// Number of suite variants run at the same time
    pub concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_dir: PathBuf::from("."),
            binary_dir: None,
            dry_run: false,
            no_flash: false,
            patterns: Vec::new(),
            filters: Vec::new(),
            test_timeout: DEFAULT_TEST_TIMEOUT,
            concurrency: 1,
        }
    }
}

pub struct Runner<T: Transport, R: DeviceRegistry, B: AppBuilder> {
    transport: Arc<T>,
    registry: R,
    builder: B,
    station: StationConfig,
    config: RunConfig,
}

impl<T: Transport, R: DeviceRegistry, B: AppBuilder> Runner<T, R, B> {
    pub fn new(
        transport: Arc<T>,
        registry: R,
        builder: B,
        station: StationConfig,
        config: RunConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            builder,
            station,
            config,
        }
    }

    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Drop the suites excluded by the filters of the run.
    ///
    /// Returns the platforms to enumerate devices for, `None` meaning all of them.
    pub fn select(&self, suites: &mut Suites) -> Result<Option<HashSet<u32>>> {
        select_suites(&self.station, &self.config.filters, suites)
    }

    /// Run all the selected suites.
    ///
    /// Failures of a suite variant are recorded in the report. Only station level failures, like
    /// an invalid configuration or an empty bus, are returned as errors.
    pub async fn run(&self, mut suites: Suites) -> Result<RunReport> {
        let enabled = self.select(&mut suites)?;
        if suites.is_empty() {
            warn!("No test suites to run");
            return Ok(RunReport::new(Vec::new()));
        }

        debug!("Initializing device manager");
        let mut manager = DeviceManager::init(
            self.transport.clone(),
            &self.registry,
            &self.station,
            enabled.as_ref(),
        )
        .await?;

        let res = self.run_suites(&manager, &suites).await;
        manager.shutdown().await;

        res
    }

    async fn run_suites(&self, manager: &DeviceManager<T>, suites: &Suites) -> Result<RunReport> {
        let patterns = Patterns::new(&self.config.patterns);
        let matrix = TestMatrixBuilder::new(&patterns);

        debug!("Generating test matrix");
        let mut variants = Vec::new();
        for suite in suites.iter() {
            let fixtures: Vec<&str> = suite.fixtures.iter().map(|f| f.name.as_str()).collect();
            let fixture_platforms = manager.fixture_platforms(&fixtures)?;
            variants.extend(matrix.build(suite, &fixture_platforms));
        }
        info!("Running {} suite variants", variants.len());

        let reports: Vec<SuiteReport> = futures::stream::iter(variants)
            .map(|v| self.run_variant(manager, &patterns, v))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        Ok(RunReport::new(reports))
    }

    async fn run_variant(
        &self,
        manager: &DeviceManager<T>,
        patterns: &Patterns,
        variant: SuiteVariant,
    ) -> SuiteReport {
        let suite = variant.suite.clone();
        let mut report = SuiteReport {
            title: variant.title.clone(),
            file: suite.file.clone(),
            platform: variant.platform.name().to_string(),
            system_thread: variant.system_thread,
            system_mode: variant.system_mode,
            devices: Vec::new(),
            error: None,
            tests: Vec::new(),
        };

        info!(suite = %variant, "Running suite");
        let mut orch = SuiteOrchestrator::new(variant, manager, &self.builder, &self.config, patterns);

        let res = orch.init().await;
        report.devices = orch.devices();
        if let Err(e) = res {
            log_error(&report.title, "Failed to initialize suite", &e);
            report.error = Some(e.to_string());
            orch.shutdown().await;
            return report;
        }

        // Host code does not run in dry runs
        let host = !self.config.dry_run;
        let ctx = orch.context(None);

        let before_all = if host {
            run_hooks(&suite.hooks.before_all, &ctx).await
        } else {
            Ok(())
        };
        match before_all {
            Ok(()) => {
                for test in orch.tests().to_vec() {
                    let started = Instant::now();
                    let res = run_test(&mut orch, &suite, &test, host).await;
                    let elapsed = started.elapsed();

                    report.tests.push(match res {
                        Ok(status) => {
                            info!(suite = %report.title, "{}: {status:?}", test.title);
                            TestReport::new(&test.title, status, elapsed)
                        }
                        Err(e) => {
                            log_error(&report.title, &test.title, &e);
                            TestReport::failed(&test.title, e.to_string(), elapsed)
                        }
                    });
                }
            }
            Err(e) => {
                log_error(&report.title, "Before all hook failed", &e);
                report.error = Some(e.to_string());
            }
        }

        if host {
            if let Err(e) = run_hooks(&suite.hooks.after_all, &ctx).await {
                log_error(&report.title, "After all hook failed", &e);
                if report.error.is_none() {
                    report.error = Some(e.to_string());
                }
            }
        }

        orch.shutdown().await;
        report
    }
}

/// Drop the suites excluded by `filters`, given the platforms enabled on the `station`.
///
/// Returns the platforms to enumerate devices for, `None` meaning all of them. Platform filters
/// replace the platforms enabled on the station.
pub fn select_suites<S: AsRef<str>>(
    station: &StationConfig,
    filters: &[S],
    suites: &mut Suites,
) -> Result<Option<HashSet<u32>>> {
    let station = station.enabled_platforms()?;
    let enabled: BTreeSet<u32> = match &station {
        Some(ids) => ids.iter().copied().collect(),
        None => platform::platforms().iter().map(|p| p.id()).collect(),
    };

    let filters = Filters::parse(filters, suites, &enabled)?;
    filters.apply(suites);
    debug!("Selected {} suites", suites.len());

    Ok(match filters.platforms {
        Some(ids) => Some(ids.into_iter().collect()),
        None => station,
    })
}

/// One test of a variant: before-each hooks, the on-device part, the host-side body, after-each
/// hooks. After-each hooks run even if the test failed.
async fn run_test<T: Transport, B: AppBuilder>(
    orch: &mut SuiteOrchestrator<'_, T, B>,
    suite: &Suite,
    test: &PlannedTest,
    host: bool,
) -> Result<TestStatus> {
    if !host {
        return orch.run_test(test).await;
    }

    let ctx = orch.context(Some(&test.title));
    run_hooks(&suite.hooks.before_each, &ctx).await?;

    let res = async {
        let status = orch.run_test(test).await?;
        if status == TestStatus::Skipped {
            return Ok(status);
        }
        if let Some(body) = &test.body {
            body(ctx.clone()).await.map_err(Error::Host)?;
        }
        Ok(status)
    }
    .await;

    let after = run_hooks(&suite.hooks.after_each, &ctx).await;
    res.and_then(|status| after.map(|()| status))
}

async fn run_hooks(hooks: &[HostFn], ctx: &TestContext) -> Result<()> {
    for hook in hooks {
        hook(ctx.clone()).await.map_err(Error::Host)?;
    }
    Ok(())
}

fn log_error(suite: &str, what: &str, e: &Error) {
    if e.is_internal() {
        error!(suite = %suite, "{what}: {e:?}");
    } else {
        error!(suite = %suite, "{what}: {e}");
    }
}
