use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::settings::AdmissionPolicy;

/// Reports how loaded the machine is, as a percentage of memory in use.
pub trait ResourceProbe: Send + Sync {
    fn memory_used_percent(&self) -> Option<f64>;
}

/// Reads `/proc/meminfo`. Reports nothing on platforms without it, which
/// leaves admission to the static cap alone.
pub struct SystemMemory;

impl ResourceProbe for SystemMemory {
    fn memory_used_percent(&self) -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        used_percent_from_meminfo(&meminfo)
    }
}

fn used_percent_from_meminfo(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

/// Snapshot of the live counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionCounters {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub completed: usize,
}

/// Gatekeeper for new fetches: a hard cap on in-flight requests plus an
/// optional pause while memory pressure is above the threshold.
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    counters: Arc<Mutex<AdmissionCounters>>,
    threshold: Option<f64>,
    check_interval: Duration,
    probe: Arc<dyn ResourceProbe>,
}

impl AdmissionController {
    pub fn new(policy: &AdmissionPolicy, probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent_fetches.max(1))),
            counters: Arc::new(Mutex::new(AdmissionCounters::default())),
            threshold: policy.pressure_threshold(),
            check_interval: policy.check_interval(),
            probe,
        }
    }

    /// Wait for a slot. While memory is above the threshold new fetches are
    /// held back, unless nothing is in flight at all. Pressure is judged
    /// after the semaphore wait, so a fetch that queued while memory was low
    /// is still held if it has risen since.
    pub async fn admit(&self) -> Result<AdmissionPermit, AcquireError> {
        loop {
            let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
            let pressure = self.pressure();
            {
                let mut c = lock(&self.counters);
                if pressure.is_none() || c.in_flight == 0 {
                    c.in_flight += 1;
                    c.peak_in_flight = c.peak_in_flight.max(c.in_flight);
                    return Ok(AdmissionPermit {
                        _permit: permit,
                        counters: Arc::clone(&self.counters),
                    });
                }
            }

            drop(permit);
            if let Some((used, threshold)) = pressure {
                debug!("memory at {:.1}% (> {:.1}%), holding admission", used, threshold);
            }
            tokio::time::sleep(self.check_interval).await;
        }
    }

    /// Current usage and the threshold it exceeds, if it does.
    fn pressure(&self) -> Option<(f64, f64)> {
        let threshold = self.threshold?;
        let used = self.probe.memory_used_percent()?;
        (used > threshold).then_some((used, threshold))
    }

    pub fn snapshot(&self) -> AdmissionCounters {
        *lock(&self.counters)
    }

    pub fn memory_used_percent(&self) -> Option<f64> {
        self.probe.memory_used_percent()
    }
}

/// Held for the duration of one fetch. Dropping it frees the slot and
/// counts the fetch as completed.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Mutex<AdmissionCounters>>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut c = lock(&self.counters);
        c.in_flight = c.in_flight.saturating_sub(1);
        c.completed += 1;
    }
}

// Counter updates never panic mid-update, so a poisoned lock still holds
// consistent numbers.
fn lock(m: &Mutex<AdmissionCounters>) -> MutexGuard<'_, AdmissionCounters> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
