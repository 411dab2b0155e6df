//! # httplog
//!
//! Structured request logging for hyper and warp services.
//!
//! The [`RequestLogLayer`] wraps a service and emits exactly one structured
//! record per request: method, URL, status, duration, sizes, selected headers,
//! optionally the bodies, and whatever the handler recorded into the request's
//! attribute bag. It also recovers handler panics (with a trimmed stack trace)
//! and notices clients that went away before the response was complete.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use httplog::{Options, RequestLogLayer, TracingSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     httplog::logging::setup_tracing()?;
//!
//!     let routes = warp::path("health").map(|| "OK");
//!     let layer = RequestLogLayer::new(TracingSink, Options::from_env()?);
//!     httplog::web::warp::run_webserver(routes, layer).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`web`] - The request logging middleware, body capture and the warp server
//! - [`attrs`] - The per-request attribute bag
//! - [`sink`] - Record destinations (`tracing`, JSON lines)
//! - [`options`] - Configuration, also from `HTTPLOG_*` environment variables
//! - [`schema`] - Field naming schemas (ECS, OpenTelemetry, GCP)
//! - [`kv`] - Header extraction and key grouping
//! - [`panic`] - Panic payloads and stack traces
//! - [`logging`] - Tracing setup
//!
//! ## Feature Flags
//!
//! - `pretty_logs` - Colorful console output for development
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BIND_ADDRESS` | HTTP server bind address | (required by `run_webserver`) |
//! | `RUST_LOG` | Console log filter | `info` |
//! | `HTTPLOG_*` | Request logger options, see [`options`] | |

pub mod attrs;
pub mod error;
pub mod kv;
pub mod level;
pub mod logging;
pub mod options;
pub mod panic;
pub mod record;
pub mod schema;
pub mod sink;
pub mod web;

pub use attrs::LogAttrs;
pub use error::{AbortHandler, ClientAborted, abort_handler};
pub use kv::KeyValues;
pub use level::Level;
pub use options::{Options, RequestInfo};
pub use schema::Schema;
pub use sink::{JsonSink, LogSink, TracingSink};
pub use web::middleware::{LoggedBody, RequestLog, RequestLogLayer, wrap};
