use std::{fmt, time::Duration};

/// Raw status code returned by the native counter subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeCode(pub u32);

impl fmt::Display for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A configured counter path template, relative to a host.
///
/// The path may name a concrete instance (`\Processor(_Total)\% Processor Time`)
/// or a wildcard over all instances (`\LogicalDisk(*)\Free Megabytes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSpec {
    pub path: String,
}

impl CounterSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_equivalent(&self, other: &CounterSpec) -> bool {
        self.path == other.path
    }

    /// Fully-qualified form of the path for the given host.
    pub fn qualified_path(&self, host: &str) -> String {
        format!(r"\\{host}{}", self.path)
    }
}

/// One unit of collection: a host, a sampling interval, and an ordered
/// collection of counter specs.
#[derive(Debug, Clone)]
pub struct CounterSetConfig {
    pub host: String,
    pub interval: Duration,
    pub counters: Vec<CounterSpec>,
}

impl CounterSetConfig {
    /// Equivalence decides whether a running collector must be replaced:
    /// same host, same interval, pairwise-equal paths in the same order.
    pub fn is_equivalent(&self, other: &CounterSetConfig) -> bool {
        if self.host != other.host
            || self.interval != other.interval
            || self.counters.len() != other.counters.len()
        {
            return false;
        }

        self.counters
            .iter()
            .zip(other.counters.iter())
            .all(|(left, right)| left.is_equivalent(right))
    }
}

/// Lifecycle of a counter set. `Stopped` is terminal and implies that no
/// registry entry owned by the set remains registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetState {
    Initializing,
    Active,
    Stopping,
    Stopped,
}
