//! In-memory transport for tests.
//!
//! Each [`MockPort`] emulates one device running the on-device test library: it answers control
//! requests from scripted data, counts the operations performed on it and re-enumerates on the
//! hotplug channel after a flash or a reset.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::broadcast;

use crate::{
    protocol::{RESET_PENDING, STATUS_PASSED, STATUS_RUNNING},
    transport::{
        DeviceHandle, DeviceRegistry, Hotplug, ProbedDevice, RegisteredDevice, Reply, ResetKind,
        Transport, TransportError,
    },
};

/// Time a device stays off the bus while re-enumerating.
pub const REENUMERATE_DELAY: Duration = Duration::from_millis(200);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type OpenHook = Box<dyn Fn(&MockPort) + Send + Sync>;

#[derive(Default)]
struct Script {
    tests: Vec<String>,
    statuses: HashMap<String, VecDeque<i32>>,
    log: String,
    open_failures: usize,
    flash_fails: bool,
    graceful_reset_fails: bool,
    reenumerate: bool,
    current_test: Option<String>,
    requests: Vec<String>,
}

/// One emulated device.
pub struct MockPort {
    id: String,
    platform_id: u32,
    port_path: String,
    attached: AtomicBool,
    script: Mutex<Script>,
    on_open: Mutex<Option<OpenHook>>,
    hotplug: broadcast::Sender<Hotplug>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    flashes: AtomicUsize,
    graceful_resets: AtomicUsize,
    forced_resets: AtomicUsize,
}

impl MockPort {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Tests reported by the firmware.
    pub fn set_tests(&self, tests: &[&str]) {
        lock(&self.script).tests = tests.iter().map(|x| x.to_string()).collect();
    }

    /// Statuses returned by consecutive polls of `test`. The last one repeats. Tests without a
    /// script pass on the first poll.
    pub fn set_statuses(&self, test: &str, statuses: &[i32]) {
        lock(&self.script)
            .statuses
            .insert(test.to_string(), statuses.iter().copied().collect());
    }

    /// Make `test` run until the device is reset.
    pub fn hang(&self, test: &str) {
        self.set_statuses(test, &[STATUS_RUNNING]);
    }

    pub fn set_log(&self, log: &str) {
        lock(&self.script).log = log.to_string();
    }

    /// Fail the next `count` opens with [`TransportError::Busy`].
    pub fn fail_opens(&self, count: usize) {
        lock(&self.script).open_failures = count;
    }

    pub fn fail_flash(&self, fail: bool) {
        lock(&self.script).flash_fails = fail;
    }

    /// Make graceful resets report an ambiguous IO error. The device still resets.
    pub fn fail_graceful_reset(&self, fail: bool) {
        lock(&self.script).graceful_reset_fails = fail;
    }

    /// Disable re-enumeration after flashing and resetting.
    pub fn stay_attached(&self) {
        lock(&self.script).reenumerate = false;
    }

    /// Run `f` every time the device is opened, before the open completes.
    pub fn on_open(&self, f: impl Fn(&MockPort) + Send + Sync + 'static) {
        *lock(&self.on_open) = Some(Box::new(f));
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
        let _ = self.hotplug.send(Hotplug::Attached(self.port_path.clone()));
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
        let _ = self.hotplug.send(Hotplug::Detached(self.port_path.clone()));
    }

    /// Drop off the bus without a hotplug notification.
    pub fn vanish(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn flashes(&self) -> usize {
        self.flashes.load(Ordering::SeqCst)
    }

    pub fn graceful_resets(&self) -> usize {
        self.graceful_resets.load(Ordering::SeqCst)
    }

    pub fn forced_resets(&self) -> usize {
        self.forced_resets.load(Ordering::SeqCst)
    }

    /// Resets of either kind.
    pub fn resets(&self) -> usize {
        self.graceful_resets() + self.forced_resets()
    }

    /// Payloads of all the control requests received so far.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.script).requests.clone()
    }

    /// Tests started so far, in order.
    pub fn started_tests(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| serde_json::from_str::<serde_json::Value>(r).ok())
            .filter(|v| v["c"] == "t")
            .filter_map(|v| v["t"].as_str().map(str::to_string))
            .collect()
    }

    /// Detach and attach again after [`REENUMERATE_DELAY`]. The running test is forgotten unless
    /// `keep_test` is set.
    fn reenumerate(self: &Arc<Self>, keep_test: bool) {
        let enabled = {
            let mut script = lock(&self.script);
            if !keep_test {
                script.current_test = None;
            }
            script.reenumerate
        };
        if !enabled {
            return;
        }

        let port = self.clone();
        tokio::spawn(async move {
            port.detach();
            tokio::time::sleep(REENUMERATE_DELAY).await;
            port.attach();
        });
    }

    fn handle(&self, payload: &str) -> Result<Reply, TransportError> {
        let mut script = lock(&self.script);
        script.requests.push(payload.to_string());

        let req: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| TransportError::Other(e.to_string()))?;
        let reply = match req["c"].as_str() {
            Some("l") => Reply {
                result: 0,
                data: serde_json::to_string(&script.tests).ok(),
            },
            Some("i") => Reply::default(),
            Some("t") => {
                let name = req["t"].as_str().unwrap_or_default().to_string();
                if script.tests.contains(&name) {
                    script.current_test = Some(name);
                    Reply::default()
                } else {
                    Reply {
                        result: -1,
                        data: None,
                    }
                }
            }
            Some("s") => {
                let status = match script.current_test.clone() {
                    Some(test) => match script.statuses.get_mut(&test) {
                        Some(seq) if seq.len() > 1 => seq.pop_front().unwrap_or(STATUS_PASSED),
                        Some(seq) => seq.front().copied().unwrap_or(STATUS_PASSED),
                        None => STATUS_PASSED,
                    },
                    None => -1,
                };
                Reply {
                    result: status,
                    data: None,
                }
            }
            Some("L") => Reply {
                result: 0,
                data: serde_json::to_string(&script.log).ok(),
            },
            _ => Reply {
                result: -1,
                data: None,
            },
        };

        Ok(reply)
    }
}

/// Emulated bus.
pub struct MockTransport {
    ports: Mutex<Vec<Arc<MockPort>>>,
    hotplug: broadcast::Sender<Hotplug>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (hotplug, _) = broadcast::channel(64);
        Self {
            ports: Mutex::new(Vec::new()),
            hotplug,
        }
    }

    /// Plug in a device. Port paths are assigned in order: `1-1.1`, `1-1.2`, ...
    pub fn add_device(&self, id: &str, platform_id: u32) -> Arc<MockPort> {
        let mut ports = lock(&self.ports);
        let port = Arc::new(MockPort {
            id: id.to_string(),
            platform_id,
            port_path: format!("1-1.{}", ports.len() + 1),
            attached: AtomicBool::new(true),
            script: Mutex::new(Script {
                reenumerate: true,
                ..Default::default()
            }),
            on_open: Mutex::new(None),
            hotplug: self.hotplug.clone(),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            flashes: AtomicUsize::new(0),
            graceful_resets: AtomicUsize::new(0),
            forced_resets: AtomicUsize::new(0),
        });
        ports.push(port.clone());
        port
    }

    pub fn port(&self, id: &str) -> Option<Arc<MockPort>> {
        lock(&self.ports).iter().find(|p| p.id == id).cloned()
    }

    fn port_at(&self, port_path: &str) -> Option<Arc<MockPort>> {
        lock(&self.ports)
            .iter()
            .find(|p| p.port_path == port_path)
            .cloned()
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    async fn enumerate(&self) -> Result<Vec<ProbedDevice>, TransportError> {
        Ok(lock(&self.ports)
            .iter()
            .filter(|p| p.is_attached())
            .map(|p| ProbedDevice {
                id: p.id.clone(),
                platform_id: p.platform_id,
                port_path: p.port_path.clone(),
            })
            .collect())
    }

    async fn open(&self, port_path: &str) -> Result<MockHandle, TransportError> {
        let port = self
            .port_at(port_path)
            .filter(|p| p.is_attached())
            .ok_or(TransportError::NotFound)?;

        {
            let mut script = lock(&port.script);
            if script.open_failures > 0 {
                script.open_failures -= 1;
                return Err(TransportError::Busy);
            }
        }

        if let Some(f) = lock(&port.on_open).as_ref() {
            f(&port);
        }
        port.opens.fetch_add(1, Ordering::SeqCst);

        Ok(MockHandle {
            port,
            open: AtomicBool::new(true),
        })
    }

    fn hotplug(&self) -> broadcast::Receiver<Hotplug> {
        self.hotplug.subscribe()
    }
}

pub struct MockHandle {
    port: Arc<MockPort>,
    open: AtomicBool,
}

impl MockHandle {
    fn check(&self) -> Result<(), TransportError> {
        if self.is_open() && self.port.is_attached() {
            Ok(())
        } else {
            Err(TransportError::NotFound)
        }
    }
}

impl DeviceHandle for MockHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn request(&self, payload: &str, _timeout: Duration) -> Result<Reply, TransportError> {
        self.check()?;
        let reply = self.port.handle(payload)?;
        if reply.result == RESET_PENDING {
            self.port.reenumerate(true);
        }
        Ok(reply)
    }

    async fn disconnect_from_cloud(&self) -> Result<(), TransportError> {
        self.check()
    }

    async fn update_firmware(
        &self,
        _firmware: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.check()?;
        self.port.flashes.fetch_add(1, Ordering::SeqCst);
        if lock(&self.port.script).flash_fails {
            return Err(TransportError::Other("Firmware update failed".to_string()));
        }

        self.port.reenumerate(false);
        Ok(())
    }

    async fn reset(&self, kind: ResetKind, _timeout: Duration) -> Result<(), TransportError> {
        match kind {
            ResetKind::Graceful => {
                self.check()?;
                self.port.graceful_resets.fetch_add(1, Ordering::SeqCst);
                self.port.reenumerate(false);
                if lock(&self.port.script).graceful_reset_fails {
                    return Err(TransportError::Io(std::io::Error::other("Transfer aborted")));
                }
                Ok(())
            }
            ResetKind::Forced => {
                self.port.forced_resets.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Other("Request was not acknowledged".to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.port.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Registry with a fixed list of named devices.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    devices: Vec<RegisteredDevice>,
    fail: bool,
}

impl MockRegistry {
    pub fn new(names: &[(&str, &str)]) -> Self {
        Self {
            devices: names
                .iter()
                .map(|(id, name)| RegisteredDevice {
                    id: id.to_string(),
                    name: Some(name.to_string()),
                })
                .collect(),
            fail: false,
        }
    }

    /// Registry whose lookups always fail.
    pub fn failing() -> Self {
        Self {
            devices: Vec::new(),
            fail: true,
        }
    }
}

impl DeviceRegistry for MockRegistry {
    async fn devices(&self) -> anyhow::Result<Vec<RegisteredDevice>> {
        if self.fail {
            anyhow::bail!("Unauthorized");
        }
        Ok(self.devices.clone())
    }
}
