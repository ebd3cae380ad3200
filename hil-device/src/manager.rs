//! Discovery of the devices under test and their checkout by test suites.
//!
//! Every discovered device is owned either by the unassigned pool or by exactly one fixture, for
//! the lifetime of the manager. Both are organized as FIFO queues indexed by platform id: a
//! checkout takes the device at the front, a release puts it at the back.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    config::StationConfig,
    device::Device,
    platform::{self, Platform},
    transport::{DeviceRegistry, Hotplug, ProbedDevice, Transport},
};

type Queue<T> = VecDeque<Arc<Device<T>>>;

struct Queues<T: Transport> {
    pool: HashMap<u32, Queue<T>>,
    fixtures: HashMap<String, HashMap<u32, Queue<T>>>,
}

impl<T: Transport> Queues<T> {
    fn platforms(&self, fixture: Option<&str>) -> Result<&HashMap<u32, Queue<T>>> {
        match fixture {
            Some(name) => self
                .fixtures
                .get(name)
                .ok_or_else(|| Error::UnknownFixture(name.to_string())),
            None => Ok(&self.pool),
        }
    }

    fn platforms_mut(&mut self, fixture: Option<&str>) -> Option<&mut HashMap<u32, Queue<T>>> {
        match fixture {
            Some(name) => self.fixtures.get_mut(name),
            None => Some(&mut self.pool),
        }
    }
}

/// Owner of all the devices under test.
pub struct DeviceManager<T: Transport> {
    devices: Vec<Arc<Device<T>>>,
    /// Fixture name by device id. Devices without an entry belong to the pool.
    owners: HashMap<String, String>,
    /// Checkout and release never await while holding the lock.
    queues: Mutex<Queues<T>>,
    hotplug: Option<JoinHandle<()>>,
}

impl<T: Transport> DeviceManager<T> {
    /// Discover the attached devices and partition them into fixtures and the pool.
    ///
    /// `enabled` restricts the pool to the given platform ids. Configuration errors are reported
    /// here rather than when a device is requested.
    pub async fn init<R: DeviceRegistry>(
        transport: Arc<T>,
        registry: &R,
        config: &StationConfig,
        enabled: Option<&HashSet<u32>>,
    ) -> Result<Self> {
        // Subscribe first so that no event is lost between enumerating and listening
        let rx = transport.hotplug();

        debug!("Enumerating devices");
        let probed: Vec<ProbedDevice> = transport
            .enumerate()
            .await?
            .into_iter()
            .filter(|d| {
                let known = platform::is_known_id(d.platform_id);
                if !known {
                    debug!(
                        "Skipping device with an unsupported platform ID {}: {}",
                        d.platform_id, d.id
                    );
                }
                known
            })
            .collect();
        if probed.is_empty() {
            return Err(Error::NoDevicesFound);
        }

        debug!("Retrieving device names");
        let names: HashMap<String, String> = registry
            .devices()
            .await
            .map_err(|e| Error::Registry {
                message: format!("{e:#}"),
            })?
            .into_iter()
            .filter_map(|d| d.name.map(|n| (d.id, n)))
            .collect();

        let devices = probed
            .into_iter()
            .map(|d| {
                let platform = platform::for_id(d.platform_id)?.clone();
                let name = names.get(&d.id).cloned();
                Ok(Arc::new(Device::new(
                    d.id,
                    name,
                    platform,
                    d.port_path,
                    transport.clone(),
                )))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut mgr = Self::index(devices, config, enabled)?;
        for dev in &mgr.devices {
            dev.set_attached(true);
        }
        mgr.hotplug = Some(tokio::spawn(forward_hotplug(rx, mgr.devices.clone())));

        Ok(mgr)
    }

    fn index(
        all: Vec<Arc<Device<T>>>,
        config: &StationConfig,
        enabled: Option<&HashSet<u32>>,
    ) -> Result<Self> {
        let find = |id_or_name: &str| {
            all.iter()
                .find(|d| d.id() == id_or_name)
                .or_else(|| all.iter().find(|d| d.name() == Some(id_or_name)))
                .ok_or_else(|| Error::UnknownDevice(id_or_name.to_string()))
        };
        let is_enabled =
            |d: &Arc<Device<T>>| enabled.is_none_or(|e| e.contains(&d.platform().id()));

        let mut allowed = HashSet::new();
        for id_or_name in &config.devices {
            let dev = find(id_or_name.as_str())?;
            if !is_enabled(dev) {
                debug!("Skipping device with a disabled platform: {id_or_name}");
                continue;
            }
            allowed.insert(dev.id().to_string());
        }

        let mut devices = Vec::new();
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut fixtures: HashMap<String, HashMap<u32, Queue<T>>> = HashMap::new();
        for fixture in &config.fixtures {
            if fixtures.contains_key(&fixture.name) {
                return Err(Error::DuplicateFixture(fixture.name.clone()));
            }

            let mut platforms: HashMap<u32, Queue<T>> = HashMap::new();
            for id_or_name in &fixture.devices {
                let dev = find(id_or_name.as_str())?;
                match owners.get(dev.id()) {
                    Some(owner) if *owner == fixture.name => continue,
                    Some(_) => return Err(Error::DeviceInMultipleFixtures(id_or_name.clone())),
                    None => {}
                }

                platforms
                    .entry(dev.platform().id())
                    .or_default()
                    .push_back(dev.clone());
                owners.insert(dev.id().to_string(), fixture.name.clone());
                devices.push(dev.clone());
            }
            fixtures.insert(fixture.name.clone(), platforms);
        }

        let mut pool: HashMap<u32, Queue<T>> = HashMap::new();
        for dev in &all {
            if owners.contains_key(dev.id())
                || !is_enabled(dev)
                || (!allowed.is_empty() && !allowed.contains(dev.id()))
            {
                continue;
            }
            pool.entry(dev.platform().id())
                .or_default()
                .push_back(dev.clone());
            devices.push(dev.clone());
        }

        if pool.is_empty() {
            info!("Device pool is empty");
        } else {
            for dev in pool.values().flatten() {
                info!(platform = %dev.platform(), "Pool device: {dev}");
            }
        }
        if fixtures.is_empty() {
            debug!("No fixtures configured");
        } else {
            for (dev, fixture) in devices
                .iter()
                .filter_map(|d| owners.get(d.id()).map(|f| (d, f)))
            {
                info!(fixture = %fixture, platform = %dev.platform(), "Fixture device: {dev}");
            }
        }

        Ok(Self {
            devices,
            owners,
            queues: Mutex::new(Queues { pool, fixtures }),
            hotplug: None,
        })
    }

    fn queues(&self) -> MutexGuard<'_, Queues<T>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out the next device for `platform`, from the fixture queue if `fixture` is given or
    /// from the pool otherwise.
    ///
    /// For a mixed platform, the device is taken from the first non-empty queue of its
    /// constituent platforms.
    pub fn get_device(
        &self,
        platform: &Platform,
        fixture: Option<&str>,
    ) -> Result<Arc<Device<T>>> {
        let mut queues = self.queues();
        queues.platforms(fixture)?;

        platform
            .constituent_ids()
            .into_iter()
            .find_map(|id| {
                queues
                    .platforms_mut(fixture)
                    .and_then(|p| p.get_mut(&id))
                    .and_then(VecDeque::pop_front)
            })
            .ok_or_else(|| Error::NoDeviceAvailable {
                platform: platform.name().to_string(),
            })
    }

    /// Return a checked out device to the back of the queue it was taken from.
    pub fn release_device(&self, dev: &Arc<Device<T>>) -> Result<()> {
        if !self.devices.iter().any(|d| Arc::ptr_eq(d, dev)) {
            return Err(Error::Internal("released device is not managed"));
        }

        let fixture = self.owners.get(dev.id()).map(String::as_str);
        let mut queues = self.queues();
        let queue = queues
            .platforms_mut(fixture)
            .and_then(|p| p.get_mut(&dev.platform().id()))
            .ok_or(Error::Internal("no queue for released device"))?;
        if queue.iter().any(|d| Arc::ptr_eq(d, dev)) {
            return Err(Error::Internal("device released twice"));
        }
        queue.push_back(dev.clone());

        Ok(())
    }

    /// Fixture the device belongs to, if any.
    pub fn fixture_of(&self, dev: &Device<T>) -> Option<&str> {
        self.owners.get(dev.id()).map(String::as_str)
    }

    /// Ids of all the platforms present in the given fixtures, sorted.
    pub fn fixture_platforms<S: AsRef<str>>(&self, fixtures: &[S]) -> Result<Vec<u32>> {
        let queues = self.queues();
        let mut ids = BTreeSet::new();
        for f in fixtures {
            ids.extend(queues.platforms(Some(f.as_ref()))?.keys().copied());
        }
        Ok(ids.into_iter().collect())
    }

    /// Names of the configured fixtures, sorted.
    pub fn fixtures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues().fixtures.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of devices currently available for checkout.
    pub fn available(&self, platform_id: u32, fixture: Option<&str>) -> usize {
        let queues = self.queues();
        queues
            .platforms(fixture)
            .ok()
            .and_then(|p| p.get(&platform_id))
            .map_or(0, VecDeque::len)
    }

    /// All managed devices, fixture devices first.
    pub fn devices(&self) -> &[Arc<Device<T>>] {
        &self.devices
    }

    /// Stop tracking hotplug events and close every device.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.hotplug.take() {
            task.abort();
        }
        for dev in &self.devices {
            if let Err(e) = dev.close().await {
                warn!(device = %dev, "Error while closing device: {e}");
            }
        }
    }
}

impl<T: Transport> Drop for DeviceManager<T> {
    fn drop(&mut self) {
        if let Some(task) = self.hotplug.take() {
            task.abort();
        }
    }
}

/// Route attach/detach events to the device at the matching port path.
pub(crate) async fn forward_hotplug<T: Transport>(
    mut rx: broadcast::Receiver<Hotplug>,
    devices: Vec<Arc<Device<T>>>,
) {
    loop {
        let ev = match rx.recv().await {
            Ok(x) => x,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {n} hotplug events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Some(dev) = devices.iter().find(|d| d.port_path() == ev.port_path()) {
            let attached = matches!(ev, Hotplug::Attached(_));
            debug!(device = %dev, attached, "Hotplug event");
            dev.set_attached(attached);
        }
    }
}
