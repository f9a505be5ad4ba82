//! Metrics for handle pools.
//!
//! The events are shared by all pools in the process. They use per-thread event instances to
//! minimize contention on the acquisition path.

use nm::{Event, Magnitude};

/// Histogram buckets for config application time in milliseconds.
///
/// Most config steps are a handful of statements against an already open handle, so we expect
/// the bulk of observations in the lowest buckets.
const CONFIG_APPLY_TIME_MS_BUCKETS: &[Magnitude] = &[0, 1, 2, 5, 10, 20, 50, 100, 500, 1000];

/// Histogram buckets for the time a drain spends waiting for checked-out handles.
const DRAIN_WAIT_TIME_MS_BUCKETS: &[Magnitude] = &[0, 1, 10, 100, 1000, 10_000, 60_000];

thread_local! {
    /// A new handle was generated and opened successfully.
    pub(crate) static HANDLES_CREATED: Event = Event::builder()
        .name("handle_pool_handles_created")
        .build();

    /// A handle was closed, for any reason.
    pub(crate) static HANDLES_DESTROYED: Event = Event::builder()
        .name("handle_pool_handles_destroyed")
        .build();

    /// An acquisition failed. All error kinds are counted together.
    pub(crate) static FLOW_OUT_FAILURES: Event = Event::builder()
        .name("handle_pool_flow_out_failures")
        .build();

    /// Time spent applying the config set to a stale handle.
    pub(crate) static CONFIG_APPLY_TIME_MS: Event = Event::builder()
        .name("handle_pool_config_apply_time_ms")
        .histogram(CONFIG_APPLY_TIME_MS_BUCKETS)
        .build();

    /// Time a drain spent waiting for checked-out handles to come back.
    pub(crate) static DRAIN_WAIT_TIME_MS: Event = Event::builder()
        .name("handle_pool_drain_wait_time_ms")
        .histogram(DRAIN_WAIT_TIME_MS_BUCKETS)
        .build();
}
