use std::{sync::Arc, time::Duration};

use prometheus::Registry;
use tokio::task::JoinHandle;
use winperf_collector::{CounterSetCollector, naming};
use winperf_common::{CounterSetConfig, CounterSpec, Result, SetState, WinperfError};
use winperf_provider::{CounterProvider, SimProvider, SimReadMode};

const INTERVAL: Duration = Duration::from_secs(1);

fn set_config(host: &str, paths: &[&str]) -> CounterSetConfig {
    CounterSetConfig {
        host: host.to_string(),
        interval: INTERVAL,
        counters: paths.iter().map(|path| CounterSpec::new(*path)).collect(),
    }
}

fn spawn_collector(collector: &Arc<CounterSetCollector>) -> JoinHandle<Result<()>> {
    let runner = Arc::clone(collector);
    tokio::spawn(async move { runner.run().await })
}

async fn wait_for_state(collector: &CounterSetCollector, state: SetState) {
    while collector.state() != state {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn gauge_value(registry: &Registry, name: &str, instance: &str) -> Option<f64> {
    let families = registry.gather();
    let family = families.iter().find(|family| family.get_name() == name)?;
    family
        .get_metric()
        .iter()
        .find(|metric| {
            metric
                .get_label()
                .iter()
                .any(|label| label.get_name() == "instance" && label.get_value() == instance)
        })
        .map(|metric| metric.get_gauge().get_value())
}

fn instance_count(registry: &Registry, name: &str) -> usize {
    registry
        .gather()
        .iter()
        .find(|family| family.get_name() == name)
        .map(|family| family.get_metric().len())
        .unwrap_or(0)
}

fn failed_collectors(registry: &Registry) -> f64 {
    registry
        .gather()
        .iter()
        .find(|family| family.get_name() == "winperf_failed_collectors")
        .map(|family| family.get_metric()[0].get_gauge().get_value())
        .unwrap_or(0.0)
}

#[tokio::test(start_paused = true)]
async fn non_wildcard_counter_publishes_one_labeled_entry() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\Processor(_Total)\% Processor Time";
    provider.define_counter(path, &[("_Total", 25.0)]);

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\Processor(_Total)\% Processor Time"]),
        provider,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    // Registered on the first cycle, set on the next.
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;

    let families = registry.gather();
    let family = families
        .iter()
        .find(|family| family.get_name() == "winperf_percent_Processor_Time")
        .expect("derived metric should be registered");
    assert_eq!(family.get_metric().len(), 1);

    let labels: Vec<(&str, &str)> = family.get_metric()[0]
        .get_label()
        .iter()
        .map(|label| (label.get_name(), label.get_value()))
        .collect();
    assert!(labels.contains(&("hostname", "HOST1")));
    assert!(labels.contains(&("category", "Processor")));
    assert!(labels.contains(&("instance", "_Total")));
    assert_eq!(
        gauge_value(&registry, "winperf_percent_Processor_Time", "_Total"),
        Some(25.0)
    );

    collector.stop().await;
    task.await.unwrap().unwrap();
    assert_eq!(collector.state(), SetState::Stopped);
    assert!(registry.gather().is_empty());
}

#[tokio::test(start_paused = true)]
async fn wildcard_counter_publishes_every_live_instance() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\LogicalDisk(*)\Free Megabytes";
    provider.define_counter(path, &[("C:", 1024.0), ("D:", 2048.0)]);

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\LogicalDisk(*)\Free Megabytes"]),
        Arc::clone(&provider) as Arc<dyn CounterProvider>,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;

    assert_eq!(instance_count(&registry, "winperf_Free_Megabytes"), 2);
    assert_eq!(gauge_value(&registry, "winperf_Free_Megabytes", "C:"), Some(1024.0));
    assert_eq!(gauge_value(&registry, "winperf_Free_Megabytes", "D:"), Some(2048.0));

    // A disk appears between samples; the next cycles pick it up.
    provider.set_instances(path, &[("C:", 1024.0), ("D:", 2048.0), ("E:", 512.0)]);
    tokio::time::sleep(INTERVAL * 2).await;

    assert_eq!(instance_count(&registry, "winperf_Free_Megabytes"), 3);
    assert_eq!(gauge_value(&registry, "winperf_Free_Megabytes", "E:"), Some(512.0));

    collector.stop().await;
    task.await.unwrap().unwrap();
    assert!(registry.gather().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_counter_is_evicted_exactly_at_the_threshold() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\Memory\Available Bytes";
    provider.define_counter(path, &[("", 4096.0)]);

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\Memory\Available Bytes"]),
        Arc::clone(&provider) as Arc<dyn CounterProvider>,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    // Let one successful set happen, then land between ticks.
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
    assert_eq!(gauge_value(&registry, "winperf_Available_Bytes", ""), Some(4096.0));

    provider.set_read_mode(path, SimReadMode::NoData);

    // Nine consecutive failures: still active, still retryable.
    tokio::time::sleep(INTERVAL * 9).await;
    assert_eq!(failed_collectors(&registry), 0.0);

    // The tenth evicts and bumps the diagnostic gauge exactly once.
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(failed_collectors(&registry), 1.0);

    // Recovery after eviction never happens: the handle is gone for good.
    provider.set_read_mode(path, SimReadMode::Normal);
    provider.set_instances(path, &[("", 9999.0)]);
    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(failed_collectors(&registry), 1.0);
    assert_eq!(gauge_value(&registry, "winperf_Available_Bytes", ""), Some(4096.0));

    collector.stop().await;
    task.await.unwrap().unwrap();
    assert!(registry.gather().is_empty());
}

#[tokio::test(start_paused = true)]
async fn successful_read_restarts_the_eviction_count() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\Memory\Available Bytes";
    provider.define_counter(path, &[("", 4096.0)]);

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\Memory\Available Bytes"]),
        Arc::clone(&provider) as Arc<dyn CounterProvider>,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
    assert_eq!(gauge_value(&registry, "winperf_Available_Bytes", ""), Some(4096.0));

    // Nine failures, then one good read: the counter starts over.
    provider.set_read_mode(path, SimReadMode::NoData);
    tokio::time::sleep(INTERVAL * 9).await;
    assert_eq!(failed_collectors(&registry), 0.0);
    provider.set_read_mode(path, SimReadMode::Normal);
    tokio::time::sleep(INTERVAL).await;

    // Nine more failures still do not evict; only the tenth consecutive
    // one after the reset does, with a single diagnostic increment.
    provider.set_read_mode(path, SimReadMode::NoData);
    tokio::time::sleep(INTERVAL * 9).await;
    assert_eq!(failed_collectors(&registry), 0.0);
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(failed_collectors(&registry), 1.0);

    collector.stop().await;
    task.await.unwrap().unwrap();
    assert!(registry.gather().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unstable_instance_set_counts_as_a_read_failure() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\LogicalDisk(*)\Free Megabytes";
    provider.define_counter(path, &[("C:", 1024.0)]);

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\LogicalDisk(*)\Free Megabytes"]),
        Arc::clone(&provider) as Arc<dyn CounterProvider>,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
    assert_eq!(gauge_value(&registry, "winperf_Free_Megabytes", "C:"), Some(1024.0));

    // The sized read keeps coming back short: no values are published for
    // those ticks, and each one counts toward eviction.
    provider.set_instances(path, &[("C:", 9999.0)]);
    provider.set_read_mode(path, SimReadMode::Growing);
    tokio::time::sleep(INTERVAL * 9).await;
    assert_eq!(failed_collectors(&registry), 0.0);
    assert_eq!(gauge_value(&registry, "winperf_Free_Megabytes", "C:"), Some(1024.0));

    tokio::time::sleep(INTERVAL).await;
    assert_eq!(failed_collectors(&registry), 1.0);

    collector.stop().await;
    task.await.unwrap().unwrap();
    assert!(registry.gather().is_empty());
}

#[tokio::test]
async fn unreachable_host_is_not_escalated() {
    let provider = Arc::new(SimProvider::new());
    let registry = Registry::new();
    let collector = CounterSetCollector::new(
        set_config("NOWHERE", &[r"\Memory\Available Bytes"]),
        provider,
        registry.clone(),
    );

    collector.run().await.unwrap();
    assert_eq!(collector.state(), SetState::Stopped);
    assert!(registry.gather().is_empty());
}

#[tokio::test]
async fn first_tick_failure_is_fatal() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    provider.define_counter(r"\\HOST1\Memory\Available Bytes", &[("", 4096.0)]);
    provider.fail_collects(1);

    let registry = Registry::new();
    let collector = CounterSetCollector::new(
        set_config("HOST1", &[r"\Memory\Available Bytes"]),
        provider,
        registry.clone(),
    );

    let err = collector.run().await.unwrap_err();
    assert!(matches!(err, WinperfError::CollectFailed { .. }));
    assert!(registry.gather().is_empty());
}

#[tokio::test(start_paused = true)]
async fn later_tick_failure_does_not_abort_reads() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\Memory\Available Bytes";
    provider.define_counter(path, &[("", 1.0)]);

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\Memory\Available Bytes"]),
        Arc::clone(&provider) as Arc<dyn CounterProvider>,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
    assert_eq!(gauge_value(&registry, "winperf_Available_Bytes", ""), Some(1.0));

    provider.set_instances(path, &[("", 2.0)]);
    provider.fail_collects(1);
    tokio::time::sleep(INTERVAL).await;

    // The tick failed but the per-counter read still ran.
    assert_eq!(gauge_value(&registry, "winperf_Available_Bytes", ""), Some(2.0));

    collector.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unresolvable_paths_count_against_the_diagnostic_gauge() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    provider.define_counter(r"\\HOST1\Memory\Available Bytes", &[("", 4096.0)]);
    provider.mark_bad_path(r"\\HOST1\Bogus(*)\Nope");

    let registry = Registry::new();
    let collector = Arc::new(CounterSetCollector::new(
        set_config(
            "HOST1",
            &[
                r"\Memory\Available Bytes",
                r"\Bogus(*)\Nope",
                r"\Gone\Counter",
            ],
        ),
        provider,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;

    assert_eq!(failed_collectors(&registry), 2.0);
    assert_eq!(gauge_value(&registry, "winperf_Available_Bytes", ""), Some(4096.0));

    collector.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn identity_collision_with_a_foreign_owner_is_benign() {
    let provider = Arc::new(SimProvider::new());
    provider.define_host("HOST1");
    let path = r"\\HOST1\Memory\Available Bytes";
    provider.define_counter(path, &[("", 4096.0)]);

    let registry = Registry::new();
    // Another counter set already published this identity.
    let identity = naming::derive(path, "").unwrap();
    let foreign = prometheus::Gauge::with_opts(identity.gauge_opts()).unwrap();
    registry.register(Box::new(foreign.clone())).unwrap();

    let collector = Arc::new(CounterSetCollector::new(
        set_config("HOST1", &[r"\Memory\Available Bytes"]),
        provider,
        registry.clone(),
    ));
    let task = spawn_collector(&collector);

    wait_for_state(&collector, SetState::Active).await;
    tokio::time::sleep(INTERVAL * 2).await;
    assert_eq!(collector.state(), SetState::Active);

    collector.stop().await;
    task.await.unwrap().unwrap();

    // Only owned entries are unregistered; the foreign gauge survives.
    let families = registry.gather();
    assert_eq!(families.len(), 1);
    assert_eq!(families[0].get_name(), "winperf_Available_Bytes");
}

#[tokio::test]
async fn stop_is_safe_to_call_more_than_once() {
    let provider = Arc::new(SimProvider::new());
    let registry = Registry::new();
    let collector = CounterSetCollector::new(
        set_config("HOST1", &[r"\Memory\Available Bytes"]),
        provider,
        registry,
    );

    collector.stop().await;
    collector.stop().await;
    assert_eq!(collector.state(), SetState::Stopping);
}
