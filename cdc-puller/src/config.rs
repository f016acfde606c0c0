use std::time::Duration;

use serde::Deserialize;

/// Tunables for a puller instance. Loading these from a file or environment
/// is outside this crate's scope; callers build a `PullerConfig` however
/// their own configuration layer sees fit and hand it to
/// [`crate::Puller::new`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PullerConfig {
    /// Fixed capacity of the channel buffer between the drain task and the
    /// resolved-ts publication path.
    pub chan_buffer_capacity: usize,

    /// Memory quota high watermark, in bytes. Admission into the memory
    /// buffer blocks once usage exceeds this.
    pub mem_quota_hi_bytes: usize,

    /// Memory quota low watermark, in bytes. Blocked admission resumes only
    /// once usage has drained back down to this, not merely below `hi`. The
    /// gap between the two is what keeps the limiter from thrashing.
    pub mem_quota_lo_bytes: usize,

    /// Capacity of the raw per-region event channel shared by all region
    /// feed tasks.
    pub event_channel_capacity: usize,

    /// Period of the observability tick that refreshes gauge metrics.
    pub observability_tick_ms: u64,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            chan_buffer_capacity: 128_000,
            mem_quota_hi_bytes: 512 * 1024 * 1024,
            mem_quota_lo_bytes: 384 * 1024 * 1024,
            event_channel_capacity: 10_000,
            observability_tick_ms: 60_000,
        }
    }
}

impl PullerConfig {
    pub fn observability_tick(&self) -> Duration {
        Duration::from_millis(self.observability_tick_ms)
    }
}
