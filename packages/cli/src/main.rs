//! Entry point: build a request context, delegate one bounded fetch, and
//! report the result and elapsed wall-clock time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reqscope_cli::config::FetchConfig;
use reqscope_cli::fetch::{fetch_user_data, TraceId};
use reqscope_cli::upstream::SimulatedUpstream;
use reqscope_core::Context;

/// Race one background fetch against a request deadline.
#[derive(Debug, Parser)]
#[command(name = "reqscope", version, about)]
struct Args {
    /// Identifier of the user to fetch.
    #[arg(long, env = "REQSCOPE_USER_ID", default_value_t = 10)]
    user_id: u64,

    /// Upper bound in milliseconds on the whole delegation call.
    #[arg(long, env = "REQSCOPE_TIMEOUT_MS", default_value_t = 200)]
    timeout_ms: u64,

    /// Simulated upstream processing delay in milliseconds.
    #[arg(long, env = "REQSCOPE_DELAY_MS", default_value_t = 150)]
    delay_ms: u64,

    /// Trace identifier attached to the request context.
    #[arg(long, env = "REQSCOPE_TRACE_ID", default_value = "bar")]
    trace_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = FetchConfig {
        call_timeout: Duration::from_millis(args.timeout_ms),
        upstream_delay: Duration::from_millis(args.delay_ms),
        ..FetchConfig::default()
    };
    let upstream = Arc::new(SimulatedUpstream {
        delay: config.upstream_delay,
        value: config.upstream_value,
    });

    let start = Instant::now();
    let ctx = Context::background().with_value(TraceId(args.trace_id));

    // Any error here is fatal: the process exits non-zero reporting it and
    // prints nothing further.
    let value = fetch_user_data(&ctx, &config, upstream, args.user_id).await?;

    let elapsed = start.elapsed();
    #[allow(clippy::cast_possible_truncation)]
    let elapsed_ms = elapsed.as_millis() as u64;
    info!(value, elapsed_ms, "fetch complete");
    println!("result: {value}");
    println!("took: {elapsed:?}");
    Ok(())
}
