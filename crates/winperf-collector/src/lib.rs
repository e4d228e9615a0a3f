pub mod failure;
pub mod fleet;
pub mod naming;
pub mod registry;
pub mod system;

pub use failure::{EVICTION_THRESHOLD, FailureTracker};
pub use fleet::CollectorFleet;
pub use naming::{METRIC_NAMESPACE, MetricIdentity};
pub use registry::MetricRegistryAdapter;
pub use system::CounterSetCollector;
