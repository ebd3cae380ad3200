//! E2E-style tests of complete runs against an emulated station.
//!
//! Time is paused, so settle delays, polling and grace windows complete instantly.


use std::sync::{Arc, Mutex};

use e2e_common::{Station, fixture};
use hil_device::{
    StationConfig,
    protocol::{STATUS_FAILED, STATUS_RUNNING},
};
use hil_runner::{HostFn, RunConfig, Suites, TestContext, TestStatus, host_fn};

type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, what: &'static str) -> HostFn {
    let events = events.clone();
    host_fn(move |ctx: TestContext| {
        let events = events.clone();
        async move {
            let entry = match ctx.test {
                Some(test) => format!("{what} {test}"),
                None => what.to_string(),
            };
            events.lock().unwrap().push(entry);
            anyhow::Ok(())
        }
    })
}

/// A single device runs both tests of a suite.
#[tokio::test(start_paused = true)]
async fn single_device_suite() {
    let station = Station::new();
    let port = station.add_device("e00fce68", 13, &["test_01", "test_02"]);
    station.add_binary("boron", "wiring/gpio");

    let mut suites = Suites::new();
    suites
        .suite("wiring/gpio/gpio.spec", "GPIO", |s| {
            s.platform(&["boron"])?
                .system_thread(&["enabled"])?
                .test("test_01")
                .test("test_02");
            Ok(())
        })
        .unwrap();

    let report = station
        .runner(StationConfig::default(), station.config())
        .run(suites)
        .await
        .expect("run failed");

    assert!(report.success, "{report:#?}");
    assert_eq!(report.suites.len(), 1);
    let suite = &report.suites[0];
    assert_eq!(suite.title, "GPIO / boron / systemThread=enabled");
    assert_eq!(suite.devices.len(), 1);
    assert_eq!(suite.devices[0].id, "e00fce68");
    let statuses: Vec<TestStatus> = suite.tests.iter().map(|t| t.status).collect();
    assert_eq!(statuses, [TestStatus::Passed, TestStatus::Passed]);

    assert_eq!(port.flashes(), 1);
    assert_eq!(port.started_tests(), ["test_01", "test_02"]);
}

/// Two platforms and two threading modes make four variants.
#[tokio::test(start_paused = true)]
async fn test_matrix() {
    let station = Station::new();
    let boron = station.add_device("a", 13, &["test_01"]);
    let argon = station.add_device("b", 12, &["test_01"]);
    station.add_binary("boron", "wiring/gpio");
    station.add_binary("argon", "wiring/gpio");

    let mut suites = Suites::new();
    suites
        .suite("wiring/gpio/gpio.spec", "GPIO", |s| {
            s.platform(&["boron", "argon"])?.test("test_01");
            Ok(())
        })
        .unwrap();

    let report = station
        .runner(StationConfig::default(), station.config())
        .run(suites)
        .await
        .expect("run failed");

    assert!(report.success, "{report:#?}");
    let titles: Vec<&str> = report.suites.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(
        titles,
        [
            "GPIO / argon / systemThread=disabled",
            "GPIO / argon / systemThread=enabled",
            "GPIO / boron / systemThread=disabled",
            "GPIO / boron / systemThread=enabled",
        ]
    );
    assert_eq!(report.count(TestStatus::Passed), 4);
    assert_eq!(boron.flashes(), 2);
    assert_eq!(argon.flashes(), 2);
}

/// A device failing a fixture test gets its sibling reset instead of left running.
#[tokio::test(start_paused = true)]
async fn fixture_partial_failure() {
    let station = Station::new();
    let master = station.add_device("a", 13, &["i2c_master_slave"]);
    let slave = station.add_device("b", 12, &["i2c_master_slave"]);
    master.set_statuses("i2c_master_slave", &[STATUS_RUNNING, STATUS_FAILED]);
    master.set_log("Slave did not acknowledge\n");
    slave.hang("i2c_master_slave");
    station.add_binary("boron", "wiring/i2c");
    station.add_binary("argon", "wiring/i2c");

    let mut suites = Suites::new();
    suites
        .suite("wiring/i2c/i2c.spec", "I2C", |s| {
            s.platform(&["gen3"])?
                .system_thread(&["enabled"])?
                .fixture("i2c", Some("app"))
                .fixture("i2c", Some("app"))
                .test("I2C Master Slave");
            Ok(())
        })
        .unwrap();

    let config = StationConfig {
        fixtures: vec![fixture("i2c", &["a", "b"])],
        ..Default::default()
    };
    let report = station
        .runner(config, station.config())
        .run(suites)
        .await
        .expect("run failed");

    assert!(!report.success);
    assert_eq!(report.suites.len(), 1);
    let suite = &report.suites[0];
    assert_eq!(suite.platform, "argon/boron");
    assert_eq!(suite.tests.len(), 1);
    assert_eq!(suite.tests[0].status, TestStatus::Failed);
    assert_eq!(
        suite.tests[0].message.as_deref(),
        Some("Slave did not acknowledge")
    );

    // One reset on teardown, plus one for the device left running
    assert_eq!(master.resets(), 1);
    assert_eq!(slave.resets(), 2);
}

/// A failed flash only fails its own variant.
#[tokio::test(start_paused = true)]
async fn flash_failure() {
    let station = Station::new();
    let boron = station.add_device("a", 13, &["test_01"]);
    let argon = station.add_device("b", 12, &["test_01"]);
    boron.fail_flash(true);
    station.add_binary("boron", "wiring/gpio");
    station.add_binary("argon", "wiring/gpio");

    let mut suites = Suites::new();
    suites
        .suite("wiring/gpio/gpio.spec", "GPIO", |s| {
            s.platform(&["boron", "argon"])?.system_thread(&["enabled"])?;
            Ok(())
        })
        .unwrap();

    let report = station
        .runner(StationConfig::default(), station.config())
        .run(suites)
        .await
        .expect("run failed");

    assert!(!report.success);
    let argon_suite = &report.suites[0];
    assert!(argon_suite.success());
    assert_eq!(argon_suite.tests.len(), 1);

    let boron_suite = &report.suites[1];
    assert!(boron_suite.error.is_some());
    assert!(boron_suite.tests.is_empty());
    assert!(boron.resets() >= 1);
    assert_eq!(argon.flashes(), 1);
}

/// Dry runs report every declared test as skipped without touching the devices.
#[tokio::test(start_paused = true)]
async fn dry_run() {
    let station = Station::new();
    let port = station.add_device("a", 13, &["test_01"]);

    let mut suites = Suites::new();
    suites
        .suite("wiring/gpio/gpio.spec", "GPIO", |s| {
            s.platform(&["boron"])?.test("test_01").test("test_02");
            Ok(())
        })
        .unwrap();

    let config = RunConfig {
        dry_run: true,
        ..station.config()
    };
    let report = station
        .runner(StationConfig::default(), config)
        .run(suites)
        .await
        .expect("run failed");

    assert!(report.success);
    assert_eq!(report.suites.len(), 2);
    assert_eq!(report.count(TestStatus::Skipped), 4);
    assert_eq!(port.opens(), 0);
    assert_eq!(port.flashes(), 0);
}

/// Hooks run around every test, and a failing host body fails its test.
#[tokio::test(start_paused = true)]
async fn hooks_and_host_bodies() {
    let station = Station::new();
    station.add_device("a", 13, &["test_01", "test_02"]);
    station.add_binary("boron", "wiring/gpio");

    let events: Events = Arc::default();
    let mut suites = Suites::new();
    suites
        .suite("wiring/gpio/gpio.spec", "GPIO", |s| {
            s.platform(&["boron"])?
                .system_thread(&["enabled"])?
                .before_all(record(&events, "before_all"))
                .after_all(record(&events, "after_all"))
                .before_each(record(&events, "before_each"))
                .after_each(record(&events, "after_each"))
                .test_with("test_01", record(&events, "body"))
                .test_with(
                    "test_02",
                    host_fn(|_| async { Err::<(), _>(anyhow::anyhow!("Unexpected pin state")) }),
                );
            Ok(())
        })
        .unwrap();

    let report = station
        .runner(StationConfig::default(), station.config())
        .run(suites)
        .await
        .expect("run failed");

    let tests = &report.suites[0].tests;
    assert_eq!(tests[0].status, TestStatus::Passed);
    assert_eq!(tests[1].status, TestStatus::Failed);
    assert_eq!(tests[1].message.as_deref(), Some("Unexpected pin state"));

    assert_eq!(
        *events.lock().unwrap(),
        [
            "before_all",
            "before_each test_01",
            "body test_01",
            "after_each test_01",
            "before_each test_02",
            "after_each test_02",
            "after_all",
        ]
    );
}

/// Variants run side by side on separate devices.
#[tokio::test(start_paused = true)]
async fn concurrent_variants() {
    let station = Station::new();
    let a = station.add_device("a", 13, &["test_01"]);
    let b = station.add_device("b", 13, &["test_01"]);
    station.add_binary("boron", "wiring/gpio");

    let mut suites = Suites::new();
    suites
        .suite("wiring/gpio/gpio.spec", "GPIO", |s| {
            s.platform(&["boron"])?;
            Ok(())
        })
        .unwrap();

    let config = RunConfig {
        concurrency: 2,
        ..station.config()
    };
    let report = station
        .runner(StationConfig::default(), config)
        .run(suites)
        .await
        .expect("run failed");

    assert!(report.success, "{report:#?}");
    assert_eq!(report.suites.len(), 2);
    assert_eq!(a.flashes(), 1);
    assert_eq!(b.flashes(), 1);
}
