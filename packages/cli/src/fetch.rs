//! Bounded delegation: race one background fetch against a request deadline.
//!
//! The caller derives a timeout context, launches the upstream fetch as a
//! concurrent task, and blocks on a selection between the context becoming
//! done and the result envelope arriving. Whichever fires first wins; the
//! delegation is attempted exactly once and never retried.
//!
//! The handoff is a `oneshot` channel, so the abandoned delivery after a
//! timeout still succeeds and the background task exits instead of hanging
//! on an unread channel. The envelope is sent once and consumed at most
//! once.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{info, warn};

use reqscope_core::Context;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::upstream::{Upstream, UpstreamError};

/// Typed trace attachment carried on the request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

/// Fetches a user record with an upper bound on the total wait.
///
/// Derives a timeout context from `ctx` (so an already-done parent resolves
/// the race immediately), spawns the upstream fetch, and returns whichever
/// of the two readiness events fires first:
///
/// - the result envelope: the upstream's value or error, unchanged;
/// - the derived context's deadline or cancellation: [`FetchError::Timeout`],
///   with any eventual upstream result discarded.
///
/// # Errors
///
/// [`FetchError::Timeout`] if the bounded wait expires first (a parent
/// cancelled before the call began counts as the same failure);
/// [`FetchError::Upstream`] passing through the upstream's own failure;
/// [`FetchError::Internal`] if the background task dropped its envelope
/// without sending.
pub async fn fetch_user_data(
    ctx: &Context,
    config: &FetchConfig,
    upstream: Arc<dyn Upstream>,
    user_id: u64,
) -> Result<i64, FetchError> {
    if let Some(trace_id) = ctx.value::<TraceId>() {
        info!(trace_id = %trace_id.0, user_id, "handling fetch");
    }

    let ctx = ctx.with_timeout(config.call_timeout);
    #[allow(clippy::cast_possible_truncation)]
    let timeout_ms = config.call_timeout.as_millis() as u64;

    let (resp_tx, resp_rx) = oneshot::channel::<Result<i64, UpstreamError>>();
    tokio::spawn(async move {
        let resp = upstream.fetch(user_id).await;
        // Send never blocks; if the waiter already gave up, the envelope is
        // dropped here and the task exits.
        let _ = resp_tx.send(resp);
    });

    tokio::select! {
        () = ctx.done() => {
            warn!(user_id, timeout_ms, "fetch abandoned: context done before upstream responded");
            Err(FetchError::Timeout { timeout_ms })
        }
        resp = resp_rx => match resp {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(FetchError::Upstream(err)),
            Err(_closed) => Err(FetchError::Internal(anyhow::anyhow!(
                "upstream task dropped its result envelope"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tokio::time::Instant;

    use super::*;
    use crate::upstream::SimulatedUpstream;

    fn config(timeout_ms: u64, delay_ms: u64) -> FetchConfig {
        FetchConfig {
            call_timeout: Duration::from_millis(timeout_ms),
            upstream_delay: Duration::from_millis(delay_ms),
            upstream_value: 666,
        }
    }

    fn simulated(config: &FetchConfig) -> Arc<dyn Upstream> {
        Arc::new(SimulatedUpstream {
            delay: config.upstream_delay,
            value: config.upstream_value,
        })
    }

    /// Upstream that fails immediately with its own error.
    struct FailingUpstream;

    #[async_trait]
    impl Upstream for FailingUpstream {
        async fn fetch(&self, _user_id: u64) -> Result<i64, UpstreamError> {
            Err(UpstreamError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
    }

    /// Upstream that counts completed fetches, to observe the background
    /// task finishing after the waiter has already timed out.
    struct CountingUpstream {
        delay: Duration,
        completed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Upstream for CountingUpstream {
        async fn fetch(&self, _user_id: u64) -> Result<i64, UpstreamError> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fast_upstream_wins_the_race() {
        let cfg = config(200, 150);
        let ctx = Context::background();

        let start = Instant::now();
        let value = fetch_user_data(&ctx, &cfg, simulated(&cfg), 10).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(value, 666);
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_upstream_times_out_at_the_deadline() {
        let cfg = config(200, 250);
        let ctx = Context::background();

        let start = Instant::now();
        let err = fetch_user_data(&ctx, &cfg, simulated(&cfg), 10).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, FetchError::Timeout { timeout_ms: 200 }));
        // Fails at the 200ms deadline, not the 250ms upstream delay.
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_parent_fails_without_waiting() {
        let cfg = config(200, 150);
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        let start = Instant::now();
        let err = fetch_user_data(&ctx, &cfg, simulated(&cfg), 10).await.unwrap_err();

        assert!(matches!(err, FetchError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_failure_passes_through_unchanged() {
        let cfg = config(200, 150);
        let ctx = Context::background();

        let err = fetch_user_data(&ctx, &cfg, Arc::new(FailingUpstream), 10)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Upstream(UpstreamError::Unavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_upstream_still_runs_to_completion() {
        let cfg = config(200, 250);
        let completed = Arc::new(AtomicU32::new(0));
        let upstream = Arc::new(CountingUpstream {
            delay: cfg.upstream_delay,
            completed: Arc::clone(&completed),
        });
        let ctx = Context::background();

        let err = fetch_user_data(&ctx, &cfg, upstream, 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));

        // Past the upstream delay: its delivery into the oneshot handoff
        // must not block even though no one is listening any more.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trace_attachment_survives_the_timeout_derivation() {
        let cfg = config(200, 150);
        let ctx = Context::background().with_value(TraceId("bar".to_string()));

        // Same derivation fetch_user_data performs internally: the attachment
        // must resolve through the timeout context, not just the parent.
        let derived = ctx.with_timeout(cfg.call_timeout);
        assert_eq!(derived.value::<TraceId>().unwrap().0, "bar");

        let value = fetch_user_data(&ctx, &cfg, simulated(&cfg), 10).await.unwrap();
        assert_eq!(value, 666);
    }

    proptest! {
        // The race is decided purely by the relative ordering of the two
        // delays; a paused clock makes the ordering deterministic.
        #[test]
        fn race_resolves_by_relative_delay(delay_ms in 1_u64..400, timeout_ms in 1_u64..400) {
            prop_assume!(delay_ms != timeout_ms);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            rt.block_on(async {
                let cfg = config(timeout_ms, delay_ms);
                let ctx = Context::background();
                let result = fetch_user_data(&ctx, &cfg, simulated(&cfg), 10).await;

                if delay_ms < timeout_ms {
                    prop_assert_eq!(result.unwrap(), 666);
                } else {
                    let timed_out = matches!(result.unwrap_err(), FetchError::Timeout { .. });
                    prop_assert!(timed_out);
                }
                Ok(())
            })?;
        }
    }
}
