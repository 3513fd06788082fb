//! Device reservation with retry, retention and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{ConstraintRequest, Device, DeviceError, DevicePool};
use crate::{AppError, Result};

/// Devices currently held for one session, over a shared [`DevicePool`].
///
/// With retention on, devices survive [`release_unless_retained`](Self::release_unless_retained)
/// so the next pass or retry reuses them without touching the pool.
/// Held devices go back to the pool on [`release`](Self::release) or drop.
pub struct DeviceReservation {
    pool: Arc<dyn DevicePool>,
    reserved: Vec<Arc<dyn Device>>,
    problem_devices: Vec<String>,
    retain: bool,
}

impl DeviceReservation {
    /// Empty reservation over `pool`.
    #[must_use]
    pub fn new(pool: Arc<dyn DevicePool>, retain: bool) -> Self {
        Self {
            pool,
            reserved: Vec::new(),
            problem_devices: Vec::new(),
            retain,
        }
    }

    /// Devices currently held.
    #[must_use]
    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.reserved
    }

    /// Whether any device is held.
    #[must_use]
    pub fn has_devices(&self) -> bool {
        !self.reserved.is_empty()
    }

    /// Whether devices are kept across passes.
    #[must_use]
    pub fn is_retaining(&self) -> bool {
        self.retain
    }

    /// Devices quarantined through this reservation.
    #[must_use]
    pub fn problem_devices(&self) -> &[String] {
        &self.problem_devices
    }

    /// Make one reservation attempt.
    ///
    /// Returns `Ok(true)` immediately, without touching the pool, while
    /// devices are still held: retained from an earlier pass, or reserved
    /// ahead of a launch. Returns `Ok(false)` when the pool cannot currently
    /// satisfy `requests`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Reservation` if the pool itself fails.
    pub fn try_reserve(&mut self, requests: &[ConstraintRequest]) -> Result<bool> {
        if self.has_devices() {
            debug!(
                count = self.reserved.len(),
                retained = self.retain,
                "reusing held devices"
            );
            return Ok(true);
        }

        let wanted: usize = requests.iter().map(|r| r.count).sum();
        if wanted == 0 {
            return Ok(true);
        }

        match self.pool.reserve(requests, &self.problem_devices) {
            Ok(devices) if devices.len() >= wanted => {
                info!(count = devices.len(), "devices reserved");
                self.reserved = devices;
                Ok(true)
            }
            Ok(devices) => {
                warn!(
                    wanted,
                    got = devices.len(),
                    "pool returned too few devices; releasing partial reservation"
                );
                self.pool.release(&devices);
                Ok(false)
            }
            Err(DeviceError::Unavailable(reason)) => {
                debug!(%reason, "devices unavailable");
                Ok(false)
            }
            Err(err) => Err(AppError::Reservation(err.to_string())),
        }
    }

    /// Reserve devices, retrying up to `attempts` times `delay` apart.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if `cancel` fires first, or
    /// `AppError::Reservation` once the attempt budget is exhausted.
    pub async fn reserve_with_retry(
        &mut self,
        requests: &[ConstraintRequest],
        attempts: u32,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled("device reservation cancelled".into()));
            }
            if self.try_reserve(requests)? {
                return Ok(());
            }
            if attempt < attempts {
                info!(attempt, attempts, "reservation failed; retrying after delay");
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(AppError::Cancelled("device reservation cancelled".into()));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        let wanted: usize = requests.iter().map(|r| r.count).sum();
        warn!(attempts, wanted, "device reservation exhausted its attempts");
        Err(AppError::Reservation(format!(
            "unable to reserve {wanted} device(s) after {attempts} attempt(s)"
        )))
    }

    /// Quarantine a held device; it is excluded from every later attempt.
    pub fn mark_problem(&mut self, device_name: &str) {
        self.pool.mark_problem(device_name);
        if !self.problem_devices.iter().any(|d| d == device_name) {
            self.problem_devices.push(device_name.to_owned());
        }
        self.reserved.retain(|d| d.name() != device_name);
    }

    /// Return every held device to the pool.
    pub fn release(&mut self) {
        if self.reserved.is_empty() {
            return;
        }
        self.pool.release(&self.reserved);
        info!(count = self.reserved.len(), "devices released");
        self.reserved.clear();
    }

    /// Release held devices unless retention is on.
    pub fn release_unless_retained(&mut self) {
        if !self.retain {
            self.release();
        }
    }
}

impl Drop for DeviceReservation {
    fn drop(&mut self) {
        self.release();
    }
}
