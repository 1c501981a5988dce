//! reqscope Core — request-scoped contexts: cancellation trees, deadlines,
//! and typed value attachments.

pub mod cancel;
pub mod context;

pub use cancel::CancelToken;
pub use context::{CancelHandle, Context};
