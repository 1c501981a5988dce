//! Configuration for the bounded-delegation demo.

use std::time::Duration;

/// Timings for one delegation call and the simulated upstream result.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound on the total wait for one delegation call.
    pub call_timeout: Duration,
    /// Simulated processing delay of the upstream.
    pub upstream_delay: Duration,
    /// Value the simulated upstream returns on success.
    pub upstream_value: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(200),
            upstream_delay: Duration::from_millis(150),
            upstream_value: 666,
        }
    }
}
