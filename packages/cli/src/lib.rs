//! reqscope CLI — bounded delegation of one background fetch against a
//! request deadline.

pub mod config;
pub mod error;
pub mod fetch;
pub mod upstream;

pub use config::FetchConfig;
pub use error::FetchError;
pub use fetch::{fetch_user_data, TraceId};
pub use upstream::{SimulatedUpstream, Upstream, UpstreamError};
