//! The background unit of work: a simulated slow upstream.
//!
//! Kept behind a trait so the delegation race in [`crate::fetch`] stays
//! independent of what the work actually is, and so upstream failures remain
//! distinguishable from the wrapper's own timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Failure produced by the upstream itself, independent of any timeout.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unavailable: {reason}")]
    Unavailable { reason: String },
}

/// One slow external operation producing a single result.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Fetches the record for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an [`UpstreamError`] if the upstream fails; the caller sees
    /// it unchanged.
    async fn fetch(&self, user_id: u64) -> Result<i64, UpstreamError>;
}

/// Stand-in for a real third-party call: sleeps for a fixed processing
/// delay, then succeeds with a fixed value.
#[derive(Debug, Clone)]
pub struct SimulatedUpstream {
    /// Simulated processing delay before the result is produced.
    pub delay: Duration,
    /// Value returned on success.
    pub value: i64,
}

#[async_trait]
impl Upstream for SimulatedUpstream {
    async fn fetch(&self, user_id: u64) -> Result<i64, UpstreamError> {
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = self.delay.as_millis() as u64;
        debug!(user_id, delay_ms, "upstream fetch started");
        tokio::time::sleep(self.delay).await;
        Ok(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn simulated_upstream_returns_configured_value() {
        let upstream = SimulatedUpstream {
            delay: Duration::from_millis(150),
            value: 666,
        };
        let value = upstream.fetch(10).await.unwrap();
        assert_eq!(value, 666);
    }
}
