//! Tracing setup for services emitting request logs via [`TracingSink`](crate::sink::TracingSink).
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     httplog::logging::setup_tracing()?;
//!     // ...
//! }
//! ```
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Console log filter (e.g. `info`, `httplog=debug`) | `info` |
//!
//! Without `pretty_logs`, output is plain text suitable for log aggregation,
//! with the record attributes as a trailing JSON object:
//! ```text
//! INFO httplog: GET /users/42 => HTTP 200 (1.2ms) attrs={"url.full":"http://localhost/users/42",...}
//! ```
//!
//! With `pretty_logs`, request records are colorized by level and the
//! attributes are dimmed:
//! ```text
//! 14:32:01.234 INFO  GET /users/42 => HTTP 200 (1.2ms) {"url.full":...}
//! ```

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[cfg(feature = "pretty_logs")]
mod pretty;

/// Installs a console subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber has already been installed.
pub fn setup_tracing() -> anyhow::Result<()> {
    Registry::default()
        .with(setup_console_layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("Tracing initialized successfully [reporting to console]");
    Ok(())
}

fn console_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(feature = "pretty_logs")]
fn setup_console_layer() -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
    tracing_subscriber::fmt::layer()
        .event_format(pretty::PrettyRequestLogFormat)
        .with_filter(console_filter())
        .boxed()
}

#[cfg(not(feature = "pretty_logs"))]
fn setup_console_layer() -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
    let format = tracing_subscriber::fmt::format()
        .with_ansi(false)
        .without_time();

    tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_filter(console_filter())
        .boxed()
}
