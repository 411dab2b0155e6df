use crate::attrs::LogAttrs;
use crate::web::middleware::RequestLogLayer;
use anyhow::Context;
use hyper::Server;
use hyper::server::conn::AddrStream;
use hyper::service::make_service_fn;
use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{SignalKind, signal};
use tower::Layer;
use warp::{Filter, Rejection, Reply};

/// Extracts the attribute bag of the current request.
///
/// Outside a request logger this yields a detached bag, so handlers can record
/// attributes unconditionally.
pub fn log_attrs() -> impl Filter<Extract = (LogAttrs,), Error = Infallible> + Clone {
    warp::ext::optional::<LogAttrs>().map(Option::unwrap_or_default)
}

/// Serves `routes` on `BIND_ADDRESS`, logging every request via `layer`.
///
/// Each connection gets its own service instance carrying the peer address.
/// The server shuts down gracefully on CTRL-C or SIGHUP.
pub async fn run_webserver<F>(routes: F, layer: RequestLogLayer) -> anyhow::Result<()>
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
    F::Error: Into<Rejection> + 'static,
{
    let bind_address = env::var("BIND_ADDRESS")
        .context("Failed to read bind address. Please provide BIND_ADDRESS in the environment")?;
    let bind_address =
        SocketAddr::from_str(&bind_address).context("Failed to parse bind address.")?;

    tracing::info!("Starting server at {}", bind_address);

    let svc = warp::service(routes);
    let server = Server::try_bind(&bind_address)
        .with_context(|| format!("Failed to bind HTTP server to {}", bind_address))?
        .serve(make_service_fn(move |conn: &AddrStream| {
            let svc = layer.layer(svc.clone()).with_remote_addr(conn.remote_addr());
            async move { Ok::<_, Infallible>(svc) }
        }));

    tracing::info!(
        "Running HTTP server at effective address {}",
        server.local_addr()
    );
    server
        .with_graceful_shutdown(await_termination("HTTP server"))
        .await
        .context("HTTP server failed")?;
    tracing::info!("HTTP Server has terminated...");

    Ok(())
}

async fn await_termination(purpose: &str) {
    let ctrl_c = ctrl_c();
    if let Ok(mut sig_hup) = signal(SignalKind::hangup()) {
        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received CTRL-C. Shutting down: '{}'...", purpose);
            },
            _ = sig_hup.recv() => {
                tracing::info!("Received SIGHUP. Shutting down: '{}'...", purpose);
            }
        }
    } else {
        let _ = ctrl_c.await;
        tracing::info!("Received CTRL-C. Shutting down: '{}'...", purpose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KeyValues;
    use crate::level::Level;
    use crate::options::Options;
    use crate::sink::LogSink;
    use hyper::Body;
    use hyper::http::Request;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct MemorySink {
        records: Arc<Mutex<Vec<KeyValues>>>,
    }

    impl LogSink for MemorySink {
        fn enabled(&self, _level: Level) -> bool {
            true
        }

        fn info(&self, _level: Level, _message: &str, attrs: &KeyValues) {
            self.records.lock().unwrap().push(attrs.clone());
        }

        fn error(&self, _err: Option<&(dyn std::error::Error + 'static)>, _message: &str, attrs: &KeyValues) {
            self.records.lock().unwrap().push(attrs.clone());
        }
    }

    #[tokio::test]
    async fn warp_handlers_record_into_the_bag() {
        let routes = warp::path!("users" / u32)
            .and(log_attrs())
            .map(|id: u32, attrs: LogAttrs| {
                attrs.set("user.id", id);
                format!("user {}", id)
            });

        let sink = MemorySink::default();
        let svc = RequestLogLayer::new(sink.clone(), Options::default())
            .layer(warp::service(routes))
            .with_remote_addr("127.0.0.1:8080".parse().unwrap());

        let request = Request::builder()
            .uri("/users/42")
            .body(Body::empty())
            .unwrap();
        let response = svc.oneshot(request).await.unwrap();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, "user 42");

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].last(),
            Some(&("user.id".to_string(), json!(42)))
        );
    }

    #[tokio::test]
    async fn log_attrs_outside_a_logger_is_detached() {
        let attrs = warp::test::request()
            .filter(&log_attrs())
            .await
            .unwrap();

        attrs.set("ignored", true);
        assert_eq!(attrs.len(), 1);
    }
}
