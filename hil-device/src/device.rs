//! Connection lifecycle of a single device under test.
//!
//! A device goes through `Detached -> Attached -> Opening -> Open -> Closing -> Attached`, and
//! may detach at any time. Opens and closes are serialized with the `opening`/`closing` flags of
//! [`State`]; waiters are woken through the same watch channel that carries the state, so nobody
//! polls.

use std::{fmt::Display, sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{Instant, sleep, timeout_at},
};
use tracing::{debug, warn};

use crate::{
    Error, Result,
    helpers::retry_delay,
    hub,
    platform::Platform,
    protocol::{
        Command, RESET_PENDING, STATUS_FAILED, STATUS_PASSED, STATUS_RUNNING, STATUS_SKIPPED,
        STATUS_WAITING, TestParams, TestResult,
    },
    transport::{DeviceHandle, ResetKind, Transport, TransportError},
};

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);
const OPEN_RETRIES: usize = 2;
const DELAY_AFTER_ATTACH: Duration = Duration::from_secs(1);
const RESET_TIMEOUT: Duration = Duration::from_secs(10);
const FLASH_TIMEOUT: Duration = Duration::from_secs(90);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const HUB_CYCLE_DELAY: Duration = Duration::from_secs(2);

/// Up to the cellular registration timeout.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const OPEN_TIMEOUT_MSG: &str = "Timeout while opening the device";
const REATTACH_TIMEOUT_MSG: &str = "Timeout while waiting for the device to reattach";
const TEST_TIMEOUT_MSG: &str = "Test timeout";

struct State<H> {
    /// Present on the bus
    attached: bool,
    /// An operation is expected to make the device detach
    will_detach: bool,
    opening: bool,
    closing: bool,
    /// The device detached while `handle` was open
    need_close: bool,
    /// Bumped on every attach, so a handle opened across a re-enumeration can be detected
    generation: u64,
    last_attach: Option<Instant>,
    handle: Option<Arc<H>>,
}

impl<H> State<H> {
    const fn ready(&self) -> bool {
        self.attached && !self.will_detach
    }

    const fn idle(&self) -> bool {
        !self.opening && !self.closing
    }
}

#[derive(Clone, Copy)]
enum Op {
    Opening,
    Closing,
}

/// Clears the `opening`/`closing` flag when dropped, including when the owning future is
/// cancelled.
struct OpGuard<'a, H> {
    state: &'a watch::Sender<State<H>>,
    op: Op,
}

impl<H> Drop for OpGuard<'_, H> {
    fn drop(&mut self) {
        let op = self.op;
        self.state.send_modify(|s| match op {
            Op::Opening => s.opening = false,
            Op::Closing => {
                s.need_close = false;
                s.closing = false;
            }
        });
    }
}

/// Parsed reply to a control request.
#[derive(Debug, Clone)]
struct Response {
    result: i32,
    data: Option<serde_json::Value>,
}

/// One physical device under test.
pub struct Device<T: Transport> {
    id: String,
    name: Option<String>,
    platform: Platform,
    port_path: String,
    transport: Arc<T>,
    state: watch::Sender<State<T::Handle>>,
}

impl<T: Transport> Device<T> {
    pub fn new(
        id: String,
        name: Option<String>,
        platform: Platform,
        port_path: String,
        transport: Arc<T>,
    ) -> Self {
        let (state, _) = watch::channel(State {
            attached: false,
            will_detach: false,
            opening: false,
            closing: false,
            need_close: false,
            generation: 0,
            last_attach: None,
            handle: None,
        });

        Self {
            id,
            name,
            platform,
            port_path,
            transport,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", self.id, name),
            None => self.id.clone(),
        }
    }

    pub const fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    pub fn is_attached(&self) -> bool {
        self.state.borrow().attached
    }

    pub fn will_detach(&self) -> bool {
        self.state.borrow().will_detach
    }

    /// Whether a connection to the device is currently open.
    pub fn is_open(&self) -> bool {
        self.state
            .borrow()
            .handle
            .as_ref()
            .is_some_and(|h| h.is_open())
    }

    /// List the tests compiled into the running firmware.
    pub async fn tests(&self) -> Result<Vec<String>> {
        let rep = self.request(&Command::ListTests, REQUEST_TIMEOUT).await?;

        match rep.data {
            Some(data) => {
                serde_json::from_value(data).map_err(|source| Error::InvalidReply { source })
            }
            None => Ok(Vec::new()),
        }
    }

    /// Select the runtime configuration and start the test `name`.
    pub async fn start_test(&self, name: &str, params: &TestParams) -> Result<()> {
        self.request(&Command::init(params), REQUEST_TIMEOUT)
            .await?;
        self.request(&Command::Start { name }, REQUEST_TIMEOUT)
            .await?;

        Ok(())
    }

    /// Poll the status of the running test until it reaches a terminal state. The device log is
    /// fetched for failed tests.
    pub async fn wait_test(&self, timeout: Duration) -> Result<TestResult> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(TEST_TIMEOUT_MSG));
            }

            let rep = match self.request(&Command::Status, remaining).await {
                Ok(x) => x,
                Err(Error::Connection {
                    source: TransportError::Timeout,
                }) if Instant::now() >= deadline => {
                    return Err(Error::Timeout(TEST_TIMEOUT_MSG));
                }
                Err(e) => return Err(e),
            };

            match rep.result {
                STATUS_PASSED => return Ok(TestResult::Passed),
                STATUS_SKIPPED => return Ok(TestResult::Skipped),
                STATUS_FAILED => break,
                // The device resets on its own during some tests. The next request waits for it
                // to come back.
                STATUS_RUNNING | STATUS_WAITING | RESET_PENDING => {}
                code => return Err(Error::UnexpectedStatus(code)),
            }

            sleep(POLL_INTERVAL).await;
        }

        let rep = self.request(&Command::Log, REQUEST_TIMEOUT).await?;
        let log = match rep.data {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        Ok(TestResult::Failed { log })
    }

    /// Flash a firmware image and wait for the device to come back with it.
    pub async fn flash(&self, firmware: &[u8]) -> Result<()> {
        let handle = self.open().await?;

        if let Err(e) = handle.disconnect_from_cloud().await {
            self.close_quietly().await;
            return Err(e.into());
        }

        self.state.send_modify(|s| s.will_detach = true);
        if let Err(e) = handle.update_firmware(firmware, FLASH_TIMEOUT).await {
            // Nothing was flashed, so the device is not going anywhere
            self.state.send_modify(|s| s.will_detach = false);
            self.close_quietly().await;
            return Err(e.into());
        }
        drop(handle);

        self.close_quietly().await;
        self.wait_reattach().await
    }

    /// Reset the device.
    ///
    /// A graceful reset failing with an IO error is ambiguous: the device may have received the
    /// request and be resetting already. A forced reset is issued in that case, whose failure is
    /// expected and ignored. Any other failure is returned.
    pub async fn reset(&self) -> Result<()> {
        let handle = self.open().await?;

        self.state.send_modify(|s| s.will_detach = true);
        match handle.reset(ResetKind::Graceful, RESET_TIMEOUT).await {
            Ok(()) => {}
            Err(e @ TransportError::Io(_)) => {
                debug!(device = %self, "Graceful reset failed: {e}");
                if let Err(e) = handle.reset(ResetKind::Forced, RESET_TIMEOUT).await {
                    debug!(device = %self, "Forced reset reported: {e}");
                }
            }
            Err(e) => {
                // The request never reached the device
                self.state.send_modify(|s| s.will_detach = false);
                drop(handle);
                self.close_quietly().await;
                return Err(e.into());
            }
        }
        drop(handle);

        self.close_quietly().await;
        Ok(())
    }

    /// Power cycle the hub port the device is connected to.
    pub async fn power_cycle(&self) -> Result<()> {
        self.close_quietly().await;

        self.state.send_modify(|s| s.will_detach = true);
        let res = hub::cycle_port(&self.port_path, HUB_CYCLE_DELAY).await;
        if !matches!(res, Ok(true)) {
            self.state.send_modify(|s| s.will_detach = false);
        }

        res.map(|_| ())
    }

    /// Release the open connection, if any.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.begin(Op::Closing, None).await?;

        let mut handle = None;
        self.state.send_if_modified(|s| {
            handle = s.handle.take();
            handle.is_some()
        });

        match handle {
            Some(h) if h.is_open() => h.close().await.map_err(Into::into),
            _ => Ok(()),
        }
    }

    /// Update bus presence. Called by the hotplug listener.
    pub fn set_attached(&self, attached: bool) {
        self.state.send_if_modified(|s| {
            if s.attached == attached {
                return false;
            }

            if attached {
                s.last_attach = Some(Instant::now());
                s.generation += 1;
            } else {
                s.will_detach = false;
                if s.handle.as_ref().is_some_and(|h| h.is_open()) {
                    s.need_close = true;
                }
            }
            s.attached = attached;

            true
        });
    }

    async fn close_quietly(&self) {
        if let Err(e) = self.close().await {
            debug!(device = %self, "Error while closing device: {e}");
        }
    }

    async fn request(&self, cmd: &Command<'_>, timeout: Duration) -> Result<Response> {
        let handle = self.open().await?;

        let res = match handle.request(&cmd.to_json(), timeout).await {
            Ok(rep) if rep.result < 0 => Err(Error::Runner { code: rep.result }),
            Ok(rep) => match rep.data.as_deref().map(serde_json::from_str).transpose() {
                Ok(data) => Ok(Response {
                    result: rep.result,
                    data,
                }),
                Err(source) => Err(Error::InvalidReply { source }),
            },
            Err(e) => Err(e.into()),
        };
        drop(handle);

        let close = match &res {
            Ok(rep) if rep.result == RESET_PENDING => {
                self.state.send_modify(|s| s.will_detach = true);
                true
            }
            Ok(_) => false,
            // Test library failures leave the connection usable
            Err(e) => !e.is_runner(),
        };
        if close {
            self.close_quietly().await;
        }

        res
    }

    /// Wait until neither an open nor a close is in flight, then claim `op`.
    async fn begin(&self, op: Op, deadline: Option<Instant>) -> Result<OpGuard<'_, T::Handle>> {
        let mut rx = self.state.subscribe();

        loop {
            let claimed = self.state.send_if_modified(|s| {
                if !s.idle() {
                    return false;
                }
                match op {
                    Op::Opening => s.opening = true,
                    Op::Closing => s.closing = true,
                }
                true
            });
            if claimed {
                return Ok(OpGuard {
                    state: &self.state,
                    op,
                });
            }

            let idle = async { rx.wait_for(State::idle).await.map(|_| ()) };
            let res = match deadline {
                Some(d) => timeout_at(d, idle)
                    .await
                    .map_err(|_| Error::Timeout(OPEN_TIMEOUT_MSG))?,
                None => idle.await,
            };
            res.map_err(|_| Error::Internal("device state channel closed"))?;
        }
    }

    /// Wait until the device is attached and not expected to detach.
    async fn wait_ready(&self, deadline: Instant) -> Result<()> {
        let mut rx = self.state.subscribe();
        let ready = async { rx.wait_for(State::ready).await.map(|_| ()) };

        match timeout_at(deadline, ready).await {
            Ok(res) => res.map_err(|_| Error::Internal("device state channel closed")),
            Err(_) => {
                // Next time, do not wait for a detach that is not going to happen
                self.state.send_if_modified(|s| {
                    let stuck = s.attached && s.will_detach;
                    if stuck {
                        s.will_detach = false;
                    }
                    stuck
                });
                Err(Error::Timeout(OPEN_TIMEOUT_MSG))
            }
        }
    }

    async fn wait_reattach(&self) -> Result<()> {
        match self.wait_ready(Instant::now() + OPEN_TIMEOUT).await {
            Err(Error::Timeout(_)) if self.is_attached() => {
                warn!(device = %self, "Device did not re-enumerate after flashing");
                Ok(())
            }
            Err(Error::Timeout(_)) => Err(Error::Timeout(REATTACH_TIMEOUT_MSG)),
            res => res,
        }
    }

    async fn open(&self) -> Result<Arc<T::Handle>> {
        let deadline = Instant::now() + OPEN_TIMEOUT;
        let _guard = self.begin(Op::Opening, Some(deadline)).await?;

        let mut retries = OPEN_RETRIES;
        loop {
            self.wait_ready(deadline).await?;

            let mut stale = None;
            self.state.send_if_modified(|s| {
                if s.need_close {
                    s.need_close = false;
                    stale = s.handle.take();
                }
                stale.is_some()
            });
            if let Some(h) = stale {
                if let Err(e) = h.close().await {
                    debug!(device = %self, "Error while closing stale handle: {e}");
                }
            }

            let (current, generation, last_attach) = {
                let s = self.state.borrow();
                (s.handle.clone(), s.generation, s.last_attach)
            };
            if let Some(h) = current.filter(|h| h.is_open()) {
                return Ok(h);
            }

            // Hardware needs to settle before the first transaction
            let since_attach = last_attach.map_or(DELAY_AFTER_ATTACH, |t| t.elapsed());
            if since_attach < DELAY_AFTER_ATTACH {
                sleep(DELAY_AFTER_ATTACH - since_attach).await;
            }

            debug!(device = %self, "Opening device");
            let err = match self.transport.open(&self.port_path).await {
                Ok(h) => {
                    let h = Arc::new(h);
                    let stored = self.state.send_if_modified(|s| {
                        let valid = s.ready() && s.generation == generation;
                        if valid {
                            s.handle = Some(h.clone());
                        }
                        valid
                    });
                    if stored {
                        return Ok(h);
                    }

                    // Detached while being opened
                    if let Err(e) = h.close().await {
                        debug!(device = %self, "Error while closing device: {e}");
                    }
                    TransportError::NotFound
                }
                Err(e) => e,
            };

            if retries == 0 {
                return Err(err.into());
            }
            retries -= 1;
            debug!(device = %self, "Failed to open device: {err}");

            sleep(retry_delay()).await;
            if Instant::now() >= deadline {
                return Err(Error::Timeout(OPEN_TIMEOUT_MSG));
            }
        }
    }
}

impl<T: Transport> Display for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl<T: Transport> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("platform", &self.platform.name())
            .field("port_path", &self.port_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::{
        manager::forward_hotplug,
        mock::{MockPort, MockTransport},
        platform,
        protocol::{STATUS_FAILED, STATUS_RUNNING, SystemMode, SystemThread},
    };

    type TestDevice = Device<MockTransport>;

    fn setup() -> (Arc<MockPort>, Arc<TestDevice>) {
        let transport = Arc::new(MockTransport::new());
        let port = transport.add_device("e00fce68", 13);
        let dev = Arc::new(Device::new(
            port.id().to_string(),
            Some("boron-1".to_string()),
            platform::for_id(13).unwrap().clone(),
            port.port_path().to_string(),
            transport.clone(),
        ));
        dev.set_attached(true);
        tokio::spawn(forward_hotplug(transport.hotplug(), vec![dev.clone()]));

        (port, dev)
    }

    #[tokio::test(start_paused = true)]
    async fn handle_is_reused() {
        let (port, dev) = setup();
        port.set_tests(&["test_01", "test_02"]);

        let start = Instant::now();
        assert_eq!(dev.tests().await.unwrap(), ["test_01", "test_02"]);
        assert!(start.elapsed() >= DELAY_AFTER_ATTACH);
        assert!(dev.is_open());

        dev.tests().await.unwrap();
        assert_eq!(port.opens(), 1);
        assert_eq!(dev.to_string(), "e00fce68 (boron-1)");
    }

    #[tokio::test(start_paused = true)]
    async fn open_retries() {
        let (port, dev) = setup();

        port.fail_opens(OPEN_RETRIES);
        dev.tests().await.unwrap();
        assert_eq!(port.opens(), 1);

        dev.close().await.unwrap();
        port.fail_opens(OPEN_RETRIES + 1);
        let err = dev.tests().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection {
                source: TransportError::Busy
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn detach_during_open() {
        let (port, dev) = setup();

        let fired = AtomicBool::new(false);
        let d = dev.clone();
        port.on_open(move |p| {
            if !fired.swap(true, Ordering::SeqCst) {
                p.detach();
                d.set_attached(false);
            }
        });
        // The first open happens after the settle delay
        let p = port.clone();
        tokio::spawn(async move {
            sleep(DELAY_AFTER_ATTACH + Duration::from_millis(500)).await;
            p.attach();
        });

        dev.tests().await.unwrap();

        // The handle opened across the detach was discarded
        assert_eq!(port.opens(), 2);
        assert_eq!(port.closes(), 1);
        assert!(dev.is_open());
        assert!(dev.is_attached());
        assert!(!dev.will_detach());
    }

    #[tokio::test(start_paused = true)]
    async fn detach_while_open() {
        let (port, dev) = setup();

        dev.tests().await.unwrap();
        port.detach();
        sleep(Duration::from_millis(10)).await;
        assert!(!dev.is_attached());

        port.attach();
        dev.tests().await.unwrap();
        assert_eq!(port.opens(), 2);
        assert_eq!(port.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_timeout() {
        let (port, dev) = setup();
        port.detach();

        let err = dev.tests().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
        assert_eq!(err.to_string(), OPEN_TIMEOUT_MSG);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_wait() {
        let (port, dev) = setup();
        port.set_tests(&["pass", "fail", "skip"]);
        port.set_statuses("pass", &[STATUS_RUNNING, STATUS_RUNNING, STATUS_PASSED]);
        port.set_statuses("fail", &[STATUS_RUNNING, STATUS_FAILED]);
        port.set_statuses("skip", &[STATUS_SKIPPED]);
        port.set_log("  assertion failed: x == 1\n");

        let params = TestParams {
            system_mode: Some(SystemMode::SemiAutomatic),
            system_thread: Some(SystemThread::Enabled),
        };

        dev.start_test("pass", &params).await.unwrap();
        assert_eq!(dev.wait_test(DEFAULT_TEST_TIMEOUT).await.unwrap(), TestResult::Passed);

        dev.start_test("fail", &params).await.unwrap();
        assert_eq!(
            dev.wait_test(DEFAULT_TEST_TIMEOUT).await.unwrap(),
            TestResult::Failed {
                log: "assertion failed: x == 1".to_string()
            }
        );

        dev.start_test("skip", &params).await.unwrap();
        assert_eq!(dev.wait_test(DEFAULT_TEST_TIMEOUT).await.unwrap(), TestResult::Skipped);

        assert_eq!(port.started_tests(), ["pass", "fail", "skip"]);
        assert!(port.requests().contains(&r#"{"c":"i","m":"s","t":1}"#.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn runner_error_keeps_connection() {
        let (port, dev) = setup();
        port.set_tests(&["test_01"]);

        let err = dev
            .start_test("missing", &TestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Runner { code: -1 }));
        assert!(dev.is_open());
        assert_eq!(port.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_status() {
        let (port, dev) = setup();
        port.set_tests(&["test_01"]);
        port.set_statuses("test_01", &[42]);

        dev.start_test("test_01", &TestParams::default()).await.unwrap();
        assert!(matches!(
            dev.wait_test(DEFAULT_TEST_TIMEOUT).await,
            Err(Error::UnexpectedStatus(42))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (port, dev) = setup();
        port.set_tests(&["test_01"]);
        port.hang("test_01");

        dev.start_test("test_01", &TestParams::default()).await.unwrap();
        let err = dev.wait_test(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.to_string(), TEST_TIMEOUT_MSG);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_pending_reopens() {
        let (port, dev) = setup();
        port.set_tests(&["test_01"]);
        port.set_statuses("test_01", &[RESET_PENDING, STATUS_RUNNING, STATUS_PASSED]);

        dev.start_test("test_01", &TestParams::default()).await.unwrap();
        assert_eq!(dev.wait_test(DEFAULT_TEST_TIMEOUT).await.unwrap(), TestResult::Passed);
        assert_eq!(port.opens(), 2);
        assert!(!dev.will_detach());
    }

    #[tokio::test(start_paused = true)]
    async fn flash() {
        let (port, dev) = setup();

        dev.flash(&[0xde, 0xad]).await.unwrap();
        assert_eq!(port.flashes(), 1);
        assert!(dev.is_attached());
        assert!(!dev.will_detach());
        assert!(!dev.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn flash_without_reattach() {
        let (port, dev) = setup();
        port.stay_attached();

        dev.flash(&[0xde, 0xad]).await.unwrap();
        assert!(!dev.will_detach());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flash() {
        let (port, dev) = setup();
        port.fail_flash(true);

        let err = dev.flash(&[0xde, 0xad]).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Connection);
        assert!(!dev.will_detach());

        // No detach is expected, so the device opens right away
        let start = Instant::now();
        dev.tests().await.unwrap();
        assert!(start.elapsed() < OPEN_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn reset() {
        let (port, dev) = setup();

        dev.reset().await.unwrap();
        assert_eq!(port.graceful_resets(), 1);
        assert_eq!(port.forced_resets(), 0);

        // The device is back after re-enumerating
        dev.tests().await.unwrap();
        assert_eq!(port.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_reset_is_forced() {
        let (port, dev) = setup();
        port.fail_graceful_reset(true);

        dev.reset().await.unwrap();
        assert_eq!(port.graceful_resets(), 1);
        assert_eq!(port.forced_resets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reset() {
        let (port, dev) = setup();
        dev.tests().await.unwrap();

        port.vanish();
        let start = Instant::now();
        let err = dev.reset().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection {
                source: TransportError::NotFound
            }
        ));
        assert_eq!(port.forced_resets(), 0);
        assert!(!dev.will_detach());
        assert!(!dev.is_open());

        // Not waiting for a detach that is not going to happen
        assert!(dev.tests().await.is_err());
        assert!(start.elapsed() < OPEN_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let (port, dev) = setup();

        dev.close().await.unwrap();
        dev.tests().await.unwrap();
        dev.close().await.unwrap();
        dev.close().await.unwrap();
        assert_eq!(port.closes(), 1);
        assert!(!dev.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_open() {
        let (port, dev) = setup();
        port.set_tests(&["test_01"]);

        let (a, b) = tokio::join!(dev.tests(), dev.tests());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(port.opens(), 1);
    }
}
