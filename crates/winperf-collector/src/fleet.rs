use std::{collections::HashMap, sync::Arc};

use prometheus::Registry;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info};
use winperf_common::CounterSetConfig;
use winperf_provider::CounterProvider;

use crate::system::CounterSetCollector;

struct RunningSet {
    config: CounterSetConfig,
    collector: Arc<CounterSetCollector>,
    task: JoinHandle<()>,
}

/// Reconciles desired counter-set configurations with running collectors,
/// one per host. A changed configuration replaces the running collector:
/// the old one is stopped and drained before the new one starts, so the two
/// never hold colliding registry entries.
pub struct CollectorFleet {
    provider: Arc<dyn CounterProvider>,
    registry: Registry,
    running: Mutex<HashMap<String, RunningSet>>,
}

impl CollectorFleet {
    pub fn new(provider: Arc<dyn CounterProvider>, registry: Registry) -> Self {
        Self {
            provider,
            registry,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Brings the running collectors in line with `configs`: stops sets for
    /// removed hosts, replaces non-equivalent ones, and leaves equivalent
    /// ones untouched.
    pub async fn apply(&self, configs: Vec<CounterSetConfig>) {
        let mut running = self.running.lock().await;

        let desired: Vec<&str> = configs.iter().map(|config| config.host.as_str()).collect();
        let stale: Vec<String> = running
            .keys()
            .filter(|host| !desired.contains(&host.as_str()))
            .cloned()
            .collect();
        for host in stale {
            if let Some(set) = running.remove(&host) {
                info!(host = %host, "stopping collector for removed host");
                stop_set(set).await;
            }
        }

        for config in configs {
            if let Some(existing) = running.get(&config.host) {
                if existing.config.is_equivalent(&config) {
                    continue;
                }
                info!(host = %config.host, "replacing collector with changed configuration");
                if let Some(set) = running.remove(&config.host) {
                    stop_set(set).await;
                }
            }
            running.insert(config.host.clone(), self.spawn(config));
        }
    }

    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        for (host, set) in running.drain() {
            info!(host = %host, "stopping collector");
            stop_set(set).await;
        }
    }

    pub async fn running_hosts(&self) -> Vec<String> {
        let running = self.running.lock().await;
        let mut hosts: Vec<String> = running.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    pub async fn state_of(&self, host: &str) -> Option<winperf_common::SetState> {
        let running = self.running.lock().await;
        running.get(host).map(|set| set.collector.state())
    }

    fn spawn(&self, config: CounterSetConfig) -> RunningSet {
        let collector = Arc::new(CounterSetCollector::new(
            config.clone(),
            Arc::clone(&self.provider),
            self.registry.clone(),
        ));
        let runner = Arc::clone(&collector);
        let task = tokio::spawn(async move {
            if let Err(err) = runner.run().await {
                error!(host = %runner.host(), error = %err, "collector exited with error");
            }
        });
        RunningSet {
            config,
            collector,
            task,
        }
    }
}

async fn stop_set(set: RunningSet) {
    set.collector.stop().await;
    if let Err(err) = set.task.await {
        error!(error = %err, "collector task failed to join");
    }
}
