use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use prometheus::{Opts, Registry};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use winperf_common::{CounterSetConfig, NativeCode, Result, SetState, WinperfError};
use winperf_provider::{
    AddOutcome, CounterId, CounterProvider, InstanceValue, PathValidation, ReadOutcome,
    traits::status,
};

use crate::{failure::FailureTracker, naming, registry::MetricRegistryAdapter};

/// Self-diagnostic gauge counting counters that could not be resolved or
/// that were evicted.
pub const FAILED_COLLECTORS: &str = "failed_collectors";

struct ResolvedCounter {
    id: CounterId,
    failures: FailureTracker,
}

enum ReadFailure {
    NoData,
    Native(NativeCode),
}

/// Owns one collection: resolves the configured paths against the provider,
/// runs the sampling loop, and keeps the shared registry in sync with the
/// instances that currently exist on the host.
///
/// `run` executes on one task; `stop` is intended to be called from another
/// and blocks until every registry entry owned by this set is gone.
pub struct CounterSetCollector {
    config: CounterSetConfig,
    provider: Arc<dyn CounterProvider>,
    metrics: MetricRegistryAdapter,
    state: watch::Sender<SetState>,
    stop: watch::Sender<bool>,
    stop_raised: AtomicBool,
}

impl CounterSetCollector {
    pub fn new(
        config: CounterSetConfig,
        provider: Arc<dyn CounterProvider>,
        registry: Registry,
    ) -> Self {
        let (state, _) = watch::channel(SetState::Initializing);
        let (stop, _) = watch::channel(false);
        Self {
            config,
            provider,
            metrics: MetricRegistryAdapter::new(registry),
            state,
            stop,
            stop_raised: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CounterSetConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn state(&self) -> SetState {
        *self.state.borrow()
    }

    /// Runs collection until the stop signal is raised or an unrecoverable
    /// setup failure occurs. Every owned registry entry is unregistered
    /// before this returns.
    pub async fn run(&self) -> Result<()> {
        info!(host = %self.config.host, "starting counter collection");
        let result = self.collect_loop().await;

        self.metrics.unregister_all();
        if self.metrics.owned_len() == 0 {
            self.state.send_replace(SetState::Stopped);
            info!(host = %self.config.host, "counter collection stopped");
        } else {
            error!(
                host = %self.config.host,
                remaining = self.metrics.owned_len(),
                "registry entries left behind after teardown"
            );
        }
        result
    }

    /// Raises the stop signal and waits until no owned registry entry
    /// remains, so a replacement collector never observes a window with
    /// colliding entries.
    pub async fn stop(&self) {
        self.raise_stop();
        self.metrics.wait_idle().await;
    }

    /// Single-fire: the signal is raised at most once no matter how often
    /// this is called.
    fn raise_stop(&self) {
        if self.stop_raised.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.send_if_modified(|state| {
            if *state == SetState::Stopped {
                false
            } else {
                *state = SetState::Stopping;
                true
            }
        });
        self.stop.send_replace(true);
    }

    async fn collect_loop(&self) -> Result<()> {
        let host = self.config.host.clone();

        let failed_collectors =
            match self.metrics.register(FAILED_COLLECTORS, failed_collectors_opts(&host)) {
                Ok(gauge) => gauge,
                Err(err) => {
                    error!(host = %host, error = %err, "failed to register the failed_collectors gauge");
                    return Err(err);
                }
            };

        let query = match self.provider.open_query(&host).await {
            Ok(query) => query,
            Err(code) => {
                // Collection for this set simply never starts; not escalated.
                error!(host = %host, code = %code, "failed to open counter query");
                return Ok(());
            }
        };

        let mut handles: BTreeMap<String, ResolvedCounter> = BTreeMap::new();
        for spec in &self.config.counters {
            let path = spec.qualified_path(&host);

            if let PathValidation::BadName(code) = self.provider.validate_path(&path).await {
                error!(host = %host, counter = %path, code = %code, "counter path failed validation");
                failed_collectors.inc();
                continue;
            }

            match self.provider.add_counter(query, &path).await {
                AddOutcome::Added(id) => {
                    handles.insert(
                        path,
                        ResolvedCounter {
                            id,
                            failures: FailureTracker::default(),
                        },
                    );
                }
                AddOutcome::NoSuchObject(code) => {
                    warn!(host = %host, counter = %path, code = %code, "counter object does not exist on host");
                    failed_collectors.inc();
                }
                AddOutcome::Failed(code) => {
                    error!(host = %host, counter = %path, code = %code, "failed to add counter to query");
                    failed_collectors.inc();
                }
            }
        }

        // The very first tick is a setup step: its failure is fatal.
        if let Err(code) = self.provider.collect(query).await {
            return Err(WinperfError::CollectFailed { host, code });
        }

        let mut stop_rx = self.stop.subscribe();
        let mut initialized = false;

        loop {
            if let Err(code) = self.provider.collect(query).await {
                warn!(host = %host, code = %code, "collection tick failed");
            }

            let paths: Vec<String> = handles.keys().cloned().collect();
            for path in paths {
                let Some(id) = handles.get(&path).map(|resolved| resolved.id) else {
                    continue;
                };

                match self.read_values(id).await {
                    Ok(items) => {
                        self.publish_samples(&host, &path, items, &mut handles)?;
                    }
                    Err(failure) => {
                        match &failure {
                            ReadFailure::NoData => {
                                warn!(host = %host, counter = %path, "no data exists for counter")
                            }
                            ReadFailure::Native(code) => {
                                error!(host = %host, counter = %path, code = %code, "failed to read formatted counter values")
                            }
                        }
                        if let Some(resolved) = handles.get_mut(&path)
                            && resolved.failures.record_failure()
                        {
                            failed_collectors.inc();
                            handles.remove(&path);
                            info!(
                                host = %host,
                                counter = %path,
                                "stopping collection of counter after 10 consecutive failed reads"
                            );
                        }
                    }
                }
            }

            if !initialized {
                initialized = true;
                self.state.send_if_modified(|state| {
                    if *state == SetState::Initializing {
                        *state = SetState::Active;
                        true
                    } else {
                        false
                    }
                });
                info!(host = %host, "completed first collection cycle");
            } else {
                debug!(host = %host, "completed collection cycle");
            }

            tokio::select! {
                _ = stop_rx.wait_for(|stopped| *stopped) => {
                    info!(host = %host, "stop signal received");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        Ok(())
    }

    /// Growable-buffer read: probe with a zero capacity, then retry with the
    /// capacity the provider reported. Wildcard counters can expand to any
    /// number of instances between samples, so the size is never assumed.
    async fn read_values(
        &self,
        counter: CounterId,
    ) -> std::result::Result<Vec<InstanceValue>, ReadFailure> {
        let sized = match self.provider.read_formatted(counter, 0).await {
            ReadOutcome::Items(items) => return Ok(items),
            ReadOutcome::MoreData { required } => {
                self.provider.read_formatted(counter, required).await
            }
            ReadOutcome::NoData => return Err(ReadFailure::NoData),
            ReadOutcome::Failed(code) => return Err(ReadFailure::Native(code)),
        };

        match sized {
            ReadOutcome::Items(items) => Ok(items),
            // The instance set grew again between the two calls.
            ReadOutcome::MoreData { .. } => {
                Err(ReadFailure::Native(NativeCode(status::MORE_DATA)))
            }
            ReadOutcome::NoData => Err(ReadFailure::NoData),
            ReadOutcome::Failed(code) => Err(ReadFailure::Native(code)),
        }
    }

    fn publish_samples(
        &self,
        host: &str,
        path: &str,
        items: Vec<InstanceValue>,
        handles: &mut BTreeMap<String, ResolvedCounter>,
    ) -> Result<()> {
        for item in items {
            let key = metric_key(path, &item.instance);

            if self.metrics.set(&key, item.value) {
                if let Some(resolved) = handles.get_mut(path) {
                    resolved.failures.record_success();
                }
                continue;
            }

            let identity = match naming::derive(path, &item.instance) {
                Ok(identity) => identity,
                Err(err) => {
                    error!(host = %host, counter = %path, error = %err, "failed to derive metric identity");
                    continue;
                }
            };

            match self.metrics.register(&key, identity.gauge_opts()) {
                Ok(_) => {
                    debug!(host = %host, counter = %path, instance = %item.instance, "collector registered")
                }
                Err(WinperfError::AlreadyRegistered(_)) => {
                    // Benign race: the identity is already published, most
                    // likely by a previous cycle of this set's host.
                    warn!(host = %host, counter = %path, instance = %item.instance, "collector already registered");
                }
                Err(err) => {
                    error!(host = %host, counter = %path, instance = %item.instance, error = %err, "failed to register collector");
                    self.raise_stop();
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}

fn metric_key(path: &str, instance: &str) -> String {
    format!("{path}|{instance}")
}

fn failed_collectors_opts(host: &str) -> Opts {
    Opts::new(
        FAILED_COLLECTORS,
        "The number of counters that failed to initialize",
    )
    .namespace(naming::METRIC_NAMESPACE)
    .const_label("hostname", host)
}
