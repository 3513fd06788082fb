//! In-memory device pool with problem-device quarantine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::{ConstraintRequest, Device, DeviceError, DevicePool, DeviceResult};

/// Lifecycle state of a pooled device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Free to reserve.
    Available,
    /// Held by a session.
    Reserved,
    /// Quarantined after an attributable failure; never handed out again.
    Problem,
}

struct PooledDevice {
    device: Arc<dyn Device>,
    state: DeviceState,
}

/// Fixed set of devices shared by every session of the process.
pub struct StaticDevicePool {
    devices: Mutex<Vec<PooledDevice>>,
}

impl StaticDevicePool {
    /// Pool over the given devices, all initially available.
    #[must_use]
    pub fn new(devices: Vec<Arc<dyn Device>>) -> Self {
        Self {
            devices: Mutex::new(
                devices
                    .into_iter()
                    .map(|device| PooledDevice {
                        device,
                        state: DeviceState::Available,
                    })
                    .collect(),
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PooledDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State of the named device, if it belongs to the pool.
    #[must_use]
    pub fn state_of(&self, device_name: &str) -> Option<DeviceState> {
        self.lock()
            .iter()
            .find(|d| d.device.name() == device_name)
            .map(|d| d.state)
    }

    /// Number of devices currently available.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|d| d.state == DeviceState::Available)
            .count()
    }
}

impl DevicePool for StaticDevicePool {
    fn reserve(
        &self,
        requests: &[ConstraintRequest],
        exclude: &[String],
    ) -> DeviceResult<Vec<Arc<dyn Device>>> {
        let mut guard = self.lock();

        // Constrained requests pick first so scarce devices are not taken
        // by requests that would accept anything.
        let mut ordered: Vec<&ConstraintRequest> = requests.iter().collect();
        ordered.sort_by_key(|r| !r.constraint.is_constrained());

        let mut chosen: Vec<usize> = Vec::new();
        for request in ordered {
            let candidates: Vec<usize> = guard
                .iter()
                .enumerate()
                .filter(|(idx, d)| {
                    d.state == DeviceState::Available
                        && !chosen.contains(idx)
                        && !exclude.iter().any(|name| name == d.device.name())
                        && request.accepts(d.device.as_ref())
                })
                .map(|(idx, _)| idx)
                .take(request.count)
                .collect();

            if candidates.len() < request.count {
                debug!(
                    platform = %request.platform,
                    constraint = request.constraint.0,
                    wanted = request.count,
                    found = candidates.len(),
                    "device request cannot be satisfied"
                );
                return Err(DeviceError::Unavailable(format!(
                    "need {} {} device(s) matching '{}', {} available",
                    request.count,
                    request.platform,
                    request.constraint.0,
                    candidates.len()
                )));
            }
            chosen.extend(candidates);
        }

        let mut reserved = Vec::with_capacity(chosen.len());
        for idx in chosen {
            if let Some(entry) = guard.get_mut(idx) {
                entry.state = DeviceState::Reserved;
                reserved.push(Arc::clone(&entry.device));
            }
        }
        info!(count = reserved.len(), "devices reserved from pool");
        Ok(reserved)
    }

    fn release(&self, devices: &[Arc<dyn Device>]) {
        let mut guard = self.lock();
        for device in devices {
            if let Some(entry) = guard
                .iter_mut()
                .find(|d| d.device.name() == device.name())
            {
                if entry.state == DeviceState::Reserved {
                    entry.state = DeviceState::Available;
                }
            }
        }
        debug!(count = devices.len(), "devices released to pool");
    }

    fn mark_problem(&self, device_name: &str) {
        let mut guard = self.lock();
        match guard.iter_mut().find(|d| d.device.name() == device_name) {
            Some(entry) => {
                entry.state = DeviceState::Problem;
                warn!(device = device_name, "device quarantined as problem device");
            }
            None => warn!(device = device_name, "cannot quarantine unknown device"),
        }
    }
}
