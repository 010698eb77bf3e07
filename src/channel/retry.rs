//! Shared backoff configuration for outbound HTTP calls.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Transport backoff: 500ms → 1s → 2s … capped at 5s, 3 retries, with
/// jitter. Delivery failures surviving all retries become `AgentTimeout`.
pub fn transport_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(5))
        .with_factor(2.0)
        .with_jitter()
        .with_max_times(3)
}

/// Backoff for judge and user-simulator chat calls: 1s → 2s → 4s, 2 retries.
pub fn llm_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(4))
        .with_factor(2.0)
        .with_jitter()
        .with_max_times(2)
}
