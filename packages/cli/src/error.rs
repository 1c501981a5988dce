//! Error taxonomy for the bounded-delegation call.

use crate::upstream::UpstreamError;

/// Errors returned by [`crate::fetch::fetch_user_data`].
///
/// Exactly one variant is wrapper-introduced (`Timeout`); everything the
/// upstream produces passes through unchanged so the two failure sources
/// stay distinguishable.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The bounded wait expired before the upstream produced a result, or
    /// the incoming context was already done when the call began.
    #[error("fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// Failure produced by the upstream itself.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// The background task dropped its result envelope without sending.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
