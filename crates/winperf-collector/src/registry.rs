use std::{collections::HashMap, sync::Mutex};

use prometheus::{Gauge, Opts, Registry};
use tokio::sync::watch;
use tracing::{debug, error};
use winperf_common::{Result, WinperfError};

/// Bookkeeping wrapper around the process-wide registry.
///
/// Tracks which metric identities this counter set owns so they can all be
/// unregistered at once, and publishes the owned-entry count on a watch
/// channel for the stop handoff. The owned map is mutated by the collector
/// task; the stopping task only observes the count.
pub struct MetricRegistryAdapter {
    registry: Registry,
    owned: Mutex<HashMap<String, Gauge>>,
    pending: watch::Sender<usize>,
}

impl MetricRegistryAdapter {
    pub fn new(registry: Registry) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            registry,
            owned: Mutex::new(HashMap::new()),
            pending,
        }
    }

    /// Creates a gauge and registers it with the shared registry under
    /// `key`. An identity collision is reported as `AlreadyRegistered`,
    /// distinct from other failures; ownership is recorded only on success.
    pub fn register(&self, key: &str, opts: Opts) -> Result<Gauge> {
        let gauge = Gauge::with_opts(opts)?;
        match self.registry.register(Box::new(gauge.clone())) {
            Ok(()) => {
                let mut owned = self.lock_owned();
                owned.insert(key.to_string(), gauge.clone());
                self.pending.send_replace(owned.len());
                Ok(gauge)
            }
            Err(prometheus::Error::AlreadyReg) => {
                Err(WinperfError::AlreadyRegistered(key.to_string()))
            }
            Err(err) => Err(WinperfError::Registry(err)),
        }
    }

    /// Sets the value of an owned entry; false when `key` is not owned.
    pub fn set(&self, key: &str, value: f64) -> bool {
        match self.lock_owned().get(key) {
            Some(gauge) => {
                gauge.set(value);
                true
            }
            None => false,
        }
    }

    pub fn owned_len(&self) -> usize {
        self.lock_owned().len()
    }

    /// Unregisters every owned entry. A failed unregistration is logged and
    /// the entry kept, which leaves the pending count above zero and
    /// `wait_idle` blocked; no retry is attempted.
    pub fn unregister_all(&self) {
        let mut owned = self.lock_owned();
        owned.retain(|key, gauge| {
            match self.registry.unregister(Box::new(gauge.clone())) {
                Ok(()) => {
                    debug!(collector = %key, "unregistered collector");
                    false
                }
                Err(err) => {
                    error!(collector = %key, error = %err, "failed to unregister collector");
                    true
                }
            }
        });
        self.pending.send_replace(owned.len());
    }

    /// Resolves once no owned entry remains.
    pub async fn wait_idle(&self) {
        let mut pending = self.pending.subscribe();
        // The sender lives in self, so this only errs if self is dropped
        // mid-wait.
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    fn lock_owned(&self) -> std::sync::MutexGuard<'_, HashMap<String, Gauge>> {
        self.owned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
