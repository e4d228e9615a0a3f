use async_trait::async_trait;
use winperf_common::NativeCode;

/// Status codes reported by the native counter subsystem.
pub mod status {
    pub const CSTATUS_NO_MACHINE: u32 = 0x8000_07D0;
    pub const MORE_DATA: u32 = 0x8000_07D2;
    pub const NO_DATA: u32 = 0x8000_07D5;
    pub const CSTATUS_NO_OBJECT: u32 = 0xC000_0BB8;
    pub const CSTATUS_INVALID_DATA: u32 = 0xC000_0BBA;
    pub const INVALID_HANDLE: u32 = 0xC000_0BBC;
    pub const CSTATUS_BAD_COUNTERNAME: u32 = 0xC000_0BC0;
}

/// Handle to an open query against one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub u64);

/// Handle to one counter path registered on a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(pub u64);

/// One formatted sample: a concrete instance name and its value. Wildcard
/// paths return one item per instance that exists at read time; the instance
/// name is empty for counters without instances.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceValue {
    pub instance: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathValidation {
    Valid,
    BadName(NativeCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(CounterId),
    /// The object named by the path does not currently exist on the host.
    NoSuchObject(NativeCode),
    Failed(NativeCode),
}

/// Result of one formatted-array read. The number of instances behind a
/// wildcard path is not known up front, so callers probe with a zero
/// capacity first and retry with the capacity reported by `MoreData`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Items(Vec<InstanceValue>),
    MoreData { required: usize },
    NoData,
    Failed(NativeCode),
}

/// The native performance-counter subsystem. All calls are treated as
/// synchronous and bounded; there is no per-call timeout.
#[async_trait]
pub trait CounterProvider: Send + Sync {
    async fn open_query(&self, host: &str) -> Result<QueryId, NativeCode>;
    async fn validate_path(&self, path: &str) -> PathValidation;
    async fn add_counter(&self, query: QueryId, path: &str) -> AddOutcome;
    /// Triggers one collection tick for every counter on the query.
    async fn collect(&self, query: QueryId) -> Result<(), NativeCode>;
    async fn read_formatted(&self, counter: CounterId, capacity: usize) -> ReadOutcome;
}
