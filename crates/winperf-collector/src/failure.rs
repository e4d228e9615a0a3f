/// Consecutive read failures after which a counter is permanently evicted.
pub const EVICTION_THRESHOLD: u32 = 10;

/// Consecutive-failure bookkeeping for one resolved counter handle.
///
/// `record_failure` reports the eviction decision exactly once, when the
/// count reaches the threshold; the caller removes the handle at that point
/// so the tracker is never consulted again.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
}

impl FailureTracker {
    /// Returns true when this failure crosses the eviction threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive == EVICTION_THRESHOLD
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
