use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use serde::Deserialize;
use winperf_common::NativeCode;

use crate::traits::{
    AddOutcome, CounterId, CounterProvider, InstanceValue, PathValidation, QueryId, ReadOutcome,
    status,
};

/// Declarative description of a simulated host landscape. Counter paths are
/// fully qualified (`\\HOST\Category(Instance)\Counter`) and map instance
/// names to values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimFixture {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub counters: HashMap<String, HashMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimReadMode {
    Normal,
    NoData,
    /// Every read reports a required capacity above the one offered, as when
    /// the instance set keeps growing between the probe and the sized read.
    Growing,
    Fail(NativeCode),
}

#[derive(Debug, Clone)]
struct SimCounter {
    instances: Vec<(String, f64)>,
    mode: SimReadMode,
}

#[derive(Debug, Default)]
struct SimState {
    hosts: HashSet<String>,
    counters: HashMap<String, SimCounter>,
    bad_paths: HashSet<String>,
    refused_hosts: HashSet<String>,
    queries: HashMap<u64, String>,
    handles: HashMap<u64, String>,
    failing_collects: u32,
    next_id: u64,
}

/// In-memory counter provider with scriptable failure modes, standing in for
/// the native subsystem in tests and in the agent's simulation mode.
#[derive(Debug, Default)]
pub struct SimProvider {
    state: Mutex<SimState>,
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: SimFixture) -> Self {
        let provider = Self::new();
        for host in fixture.hosts {
            provider.define_host(&host);
        }
        for (path, instances) in fixture.counters {
            let mut items: Vec<(String, f64)> = instances.into_iter().collect();
            items.sort_by(|left, right| left.0.cmp(&right.0));
            provider.define_counter_owned(path, items);
        }
        provider
    }

    pub fn define_host(&self, host: &str) {
        self.lock().hosts.insert(host.to_string());
    }

    pub fn define_counter(&self, path: &str, instances: &[(&str, f64)]) {
        let items = instances
            .iter()
            .map(|(instance, value)| ((*instance).to_string(), *value))
            .collect();
        self.define_counter_owned(path.to_string(), items);
    }

    fn define_counter_owned(&self, path: String, instances: Vec<(String, f64)>) {
        self.lock().counters.insert(
            path,
            SimCounter {
                instances,
                mode: SimReadMode::Normal,
            },
        );
    }

    /// Replaces the instance set behind a path, keeping its read mode.
    pub fn set_instances(&self, path: &str, instances: &[(&str, f64)]) {
        let mut state = self.lock();
        if let Some(counter) = state.counters.get_mut(path) {
            counter.instances = instances
                .iter()
                .map(|(instance, value)| ((*instance).to_string(), *value))
                .collect();
        }
    }

    pub fn set_read_mode(&self, path: &str, mode: SimReadMode) {
        let mut state = self.lock();
        if let Some(counter) = state.counters.get_mut(path) {
            counter.mode = mode;
        }
    }

    pub fn mark_bad_path(&self, path: &str) {
        self.lock().bad_paths.insert(path.to_string());
    }

    pub fn refuse_host(&self, host: &str) {
        self.lock().refused_hosts.insert(host.to_string());
    }

    /// Makes the next `count` collection ticks fail.
    pub fn fail_collects(&self, count: u32) {
        self.lock().failing_collects = count;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CounterProvider for SimProvider {
    async fn open_query(&self, host: &str) -> Result<QueryId, NativeCode> {
        let mut state = self.lock();
        if state.refused_hosts.contains(host) || !state.hosts.contains(host) {
            return Err(NativeCode(status::CSTATUS_NO_MACHINE));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.queries.insert(id, host.to_string());
        Ok(QueryId(id))
    }

    async fn validate_path(&self, path: &str) -> PathValidation {
        if self.lock().bad_paths.contains(path) {
            PathValidation::BadName(NativeCode(status::CSTATUS_BAD_COUNTERNAME))
        } else {
            PathValidation::Valid
        }
    }

    async fn add_counter(&self, query: QueryId, path: &str) -> AddOutcome {
        let mut state = self.lock();
        if !state.queries.contains_key(&query.0) {
            return AddOutcome::Failed(NativeCode(status::INVALID_HANDLE));
        }
        if !state.counters.contains_key(path) {
            return AddOutcome::NoSuchObject(NativeCode(status::CSTATUS_NO_OBJECT));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.handles.insert(id, path.to_string());
        AddOutcome::Added(CounterId(id))
    }

    async fn collect(&self, query: QueryId) -> Result<(), NativeCode> {
        let mut state = self.lock();
        if !state.queries.contains_key(&query.0) {
            return Err(NativeCode(status::INVALID_HANDLE));
        }
        if state.failing_collects > 0 {
            state.failing_collects -= 1;
            return Err(NativeCode(status::CSTATUS_INVALID_DATA));
        }
        Ok(())
    }

    async fn read_formatted(&self, counter: CounterId, capacity: usize) -> ReadOutcome {
        let state = self.lock();
        let Some(path) = state.handles.get(&counter.0) else {
            return ReadOutcome::Failed(NativeCode(status::INVALID_HANDLE));
        };
        let Some(sim) = state.counters.get(path) else {
            return ReadOutcome::NoData;
        };

        match sim.mode {
            SimReadMode::Fail(code) => ReadOutcome::Failed(code),
            SimReadMode::NoData => ReadOutcome::NoData,
            SimReadMode::Growing => ReadOutcome::MoreData {
                required: capacity + 1,
            },
            SimReadMode::Normal => {
                if sim.instances.is_empty() {
                    return ReadOutcome::NoData;
                }
                if capacity < sim.instances.len() {
                    return ReadOutcome::MoreData {
                        required: sim.instances.len(),
                    };
                }
                ReadOutcome::Items(
                    sim.instances
                        .iter()
                        .map(|(instance, value)| InstanceValue {
                            instance: instance.clone(),
                            value: *value,
                        })
                        .collect(),
                )
            }
        }
    }
}
