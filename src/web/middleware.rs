//! The request logger: a tower middleware emitting one record per request.
//!
//! ```rust,ignore
//! let svc = ServiceBuilder::new()
//!     .layer(RequestLogLayer::new(TracingSink, Options::from_env()?))
//!     .service(warp::service(routes));
//! ```
//!
//! Each request is tracked by a finalizer which owns everything needed to
//! assemble the record. It travels from the handler future into the response
//! body ([`LoggedBody`]) and emits when it is dropped: after the body has been
//! streamed, after a panic has been handled, or when the host drops the future
//! or the body early because the client went away.

use crate::attrs::{ERROR_KEY, LogAttrs};
use crate::error::ClientAborted;
use crate::kv::{self, KeyValues};
use crate::level::Level;
use crate::options::{Options, RequestInfo};
use crate::panic;
use crate::sink::LogSink;
use crate::web::body::{CaptureBuffer, RequestCapture, render_body};
use bytes::{Buf, Bytes};
use futures_util::FutureExt;
use futures_util::future::poll_fn;
use hyper::Body;
use hyper::body::{HttpBody, SizeHint};
use hyper::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, REFERER, TRANSFER_ENCODING, USER_AGENT};
use hyper::http::{HeaderMap, Method, Request, Response, StatusCode};
use serde_json::{Value, json};
use std::any::Any;
use std::fmt::Display;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

struct Shared {
    sink: Arc<dyn LogSink>,
    options: Options,
}

/// Wraps `inner` so that every request it handles is logged to `sink`.
pub fn wrap<S>(inner: S, sink: impl LogSink + 'static, options: Options) -> RequestLog<S> {
    RequestLogLayer::new(sink, options).layer(inner)
}

/// [`Layer`] applying [`RequestLog`] to a service.
#[derive(Clone)]
pub struct RequestLogLayer {
    shared: Arc<Shared>,
}

impl RequestLogLayer {
    pub fn new(sink: impl LogSink + 'static, options: Options) -> Self {
        Self::with_shared_sink(Arc::new(sink), options)
    }

    pub fn with_shared_sink(sink: Arc<dyn LogSink>, options: Options) -> Self {
        panic::install_hook();
        Self {
            shared: Arc::new(Shared {
                sink,
                options: options.normalized(),
            }),
        }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog {
            inner,
            shared: self.shared.clone(),
            remote_addr: None,
        }
    }
}

/// Service logging the requests handled by the wrapped service.
#[derive(Clone)]
pub struct RequestLog<S> {
    inner: S,
    shared: Arc<Shared>,
    remote_addr: Option<SocketAddr>,
}

impl<S> RequestLog<S> {
    /// Sets the peer address reported for requests of this (per-connection)
    /// service.
    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }
}

impl<S, B> Service<Request<Body>> for RequestLog<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    B: HttpBody + Unpin + Send + 'static,
{
    type Response = Response<LoggedBody<B>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let options = &self.shared.options;
        let request = RequestInfo {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            remote_addr: self
                .remote_addr
                .or_else(|| req.extensions().get::<SocketAddr>().copied()),
        };

        let attrs = LogAttrs::new();
        req.extensions_mut().insert(attrs.clone());

        let log_request_body = options
            .log_request_body
            .as_ref()
            .is_some_and(|predicate| predicate(&request));
        let log_response_body = options
            .log_response_body
            .as_ref()
            .is_some_and(|predicate| predicate(&request));

        let request_capture = if log_request_body || options.log_extra_attrs.is_some() {
            let capture = RequestCapture::new(options.body_capture_limit);
            let body = std::mem::take(req.body_mut());
            *req.body_mut() = capture.tee(body);
            Some(capture)
        } else {
            None
        };

        let mut finalizer = Finalizer {
            shared: self.shared.clone(),
            request,
            attrs: attrs.clone(),
            log_request_body,
            request_capture,
            response_capture: log_response_body
                .then(|| CaptureBuffer::new(options.body_capture_limit)),
            start: Instant::now(),
            status: None,
            response_headers: HeaderMap::new(),
            bytes_written: 0,
            unread_bytes: 0,
            error_attrs: KeyValues::new(),
            completed: false,
            emitted: false,
        };

        // Use the instance that has been polled ready and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut handled = Box::pin(attrs.scope(async move { inner.call(req).await }));
            // The hook only records panics raised while polling; a payload resumed
            // without the hook must not pick up a backtrace of an earlier panic.
            let handled = poll_fn(move |cx| {
                panic::clear_backtrace();
                handled.as_mut().poll(cx)
            });
            let outcome = AssertUnwindSafe(handled).catch_unwind().await;
            if outcome.is_ok() {
                // Panics caught within the handler leave their backtrace behind.
                panic::clear_backtrace();
            }

            finalizer.drain_unread().await;

            match outcome {
                Ok(Ok(response)) => Ok(finalizer.into_response(response)),
                Ok(Err(err)) => {
                    finalizer.record_failure(&err);
                    drop(finalizer);
                    Err(err)
                }
                Err(payload) => finalizer.recover(payload),
            }
        })
    }
}

/// Collects the state of one request and emits its record exactly once, when
/// dropped.
struct Finalizer {
    shared: Arc<Shared>,
    request: RequestInfo,
    attrs: LogAttrs,
    log_request_body: bool,
    request_capture: Option<RequestCapture>,
    response_capture: Option<CaptureBuffer>,
    start: Instant,
    status: Option<StatusCode>,
    response_headers: HeaderMap,
    bytes_written: u64,
    unread_bytes: u64,
    /// Panic or failure details, logged ahead of the request fields.
    error_attrs: KeyValues,
    /// `false` until the response was handed over completely. A finalizer
    /// dropped before that marks the request as aborted by the client.
    completed: bool,
    emitted: bool,
}

impl Finalizer {
    async fn drain_unread(&mut self) {
        if let Some(capture) = &self.request_capture {
            self.unread_bytes = capture.drain_unread().await;
        }
    }

    fn into_response<B: HttpBody>(mut self, response: Response<B>) -> Response<LoggedBody<B>> {
        self.status = Some(response.status());
        self.response_headers = response.headers().clone();

        let (parts, body) = response.into_parts();
        let complete_on_drop = self.request.method == Method::HEAD
            || parts.status.is_informational()
            || parts.status == StatusCode::NO_CONTENT
            || parts.status == StatusCode::NOT_MODIFIED
            || body.is_end_stream();

        let expected_len = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .or_else(|| body.size_hint().exact());

        Response::from_parts(
            parts,
            LoggedBody {
                inner: Some(body),
                finalizer: Some(self),
                complete_on_drop,
                expected_len,
            },
        )
    }

    fn record_failure(&mut self, err: &impl Display) {
        let schema = &self.shared.options.schema;
        self.error_attrs
            .push((schema.error_message.to_string(), json!(err.to_string())));
        self.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
        self.completed = true;
    }

    /// Handles a panic of the wrapped handler.
    ///
    /// The record is always emitted first. Afterwards the panic either turns
    /// into a `500` response or, for [`AbortHandler`](crate::error::AbortHandler)
    /// and with recovery disabled, is resumed with the original payload.
    fn recover<B, E>(mut self, payload: Box<dyn Any + Send>) -> Result<Response<LoggedBody<B>>, E> {
        let abort = panic::is_abort(payload.as_ref());
        let backtrace = panic::take_backtrace();
        let schema = &self.shared.options.schema;

        self.error_attrs.push((
            schema.error_message.to_string(),
            json!(format!("panic: {}", panic::describe(payload.as_ref()))),
        ));
        if !abort && let Some(backtrace) = &backtrace {
            self.error_attrs.push((
                schema.error_stack_trace.to_string(),
                Value::from(panic::stack_frames(backtrace)),
            ));
        }

        let recover_panics = self.shared.options.recover_panics;
        if recover_panics {
            self.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
        }
        self.completed = true;
        drop(self);

        if abort || !recover_panics {
            std::panic::resume_unwind(payload);
        }

        let mut response = Response::new(LoggedBody::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        Ok(response)
    }

    fn emit(&mut self) {
        self.emitted = true;

        let duration = self.start.elapsed();
        // No explicit status means the default response status.
        let status = self.status.unwrap_or(StatusCode::OK);
        let shared = self.shared.clone();
        let options = &shared.options;

        if let Some(skip) = &options.skip
            && skip(&self.request, status)
        {
            return;
        }

        let level = Level::from_outcome(status, &self.request.method);
        if level < options.level || !shared.sink.enabled(level) {
            return;
        }

        let attrs = kv::group(self.assemble(status, duration), &options.group_delimiter);
        let message = format!(
            "{} {} => HTTP {} ({:?})",
            self.request.method,
            self.request.uri,
            status.as_u16(),
            duration
        );

        if level == Level::Error {
            shared.sink.error(None, &message, &attrs);
        } else {
            shared.sink.info(level, &message, &attrs);
        }
    }

    fn assemble(&mut self, status: StatusCode, duration: Duration) -> KeyValues {
        let options = &self.shared.options;
        let schema = &options.schema;
        let request = &self.request;

        let mut attrs = std::mem::take(&mut self.error_attrs);
        attrs.extend(
            [
                (schema.request_url, json!(request_url(request))),
                (schema.request_method, json!(request.method.as_str())),
                (schema.request_path, json!(request.uri.path())),
                (
                    schema.request_remote_ip,
                    json!(
                        request
                            .remote_addr
                            .map(|addr| addr.ip().to_string())
                            .unwrap_or_default()
                    ),
                ),
                (schema.request_host, json!(host(request))),
                (schema.request_scheme, json!(scheme(request))),
                (schema.request_proto, json!(format!("{:?}", request.version))),
                (
                    schema.request_headers,
                    Value::Object(kv::nest(kv::header_kvs(
                        &request.headers,
                        &options.log_request_headers,
                    ))),
                ),
                (schema.request_bytes, json!(content_length(&request.headers))),
                (
                    schema.request_user_agent,
                    json!(request.header(USER_AGENT.as_str()).unwrap_or_default()),
                ),
                (
                    schema.request_referer,
                    json!(request.header(REFERER.as_str()).unwrap_or_default()),
                ),
                (
                    schema.response_headers,
                    Value::Object(kv::nest(kv::header_kvs(
                        &self.response_headers,
                        &options.log_response_headers,
                    ))),
                ),
                (schema.response_status, json!(status.as_u16())),
                (schema.response_duration, json!(duration_ms(duration))),
                (schema.response_bytes, json!(self.bytes_written)),
            ]
            .map(|(key, value)| (key.to_string(), value)),
        );

        if !self.completed {
            attrs.push((ERROR_KEY.to_string(), json!(ClientAborted.to_string())));
            attrs.push((schema.error_type.to_string(), json!("ClientAborted")));
        }

        if self.unread_bytes > 0 {
            attrs.push((
                schema.request_bytes_unread.to_string(),
                json!(self.unread_bytes),
            ));
        }

        if self.log_request_body
            && let Some(capture) = &self.request_capture
        {
            let body = render_body(
                &capture.buffer().to_bytes(),
                header_str(&request.headers, CONTENT_TYPE.as_str()),
                &options.log_body_content_types,
                options.log_body_max_len,
            );
            attrs.push((schema.request_body.to_string(), json!(body)));
        }

        if let Some(capture) = &self.response_capture {
            let body = render_body(
                &capture.to_bytes(),
                header_str(&self.response_headers, CONTENT_TYPE.as_str()),
                &options.log_body_content_types,
                options.log_body_max_len,
            );
            attrs.push((schema.response_body.to_string(), json!(body)));
        }

        if let Some(extra_attrs) = &options.log_extra_attrs {
            let body = self
                .request_capture
                .as_ref()
                .map(|capture| capture.buffer().to_text())
                .unwrap_or_default();
            attrs.extend(extra_attrs(request, &body, status));
        }

        attrs.extend(self.attrs.get());
        attrs
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        if !self.emitted {
            self.emit();
        }
    }
}

/// Whole milliseconds, sub-millisecond parts are truncated.
fn duration_ms(duration: Duration) -> f64 {
    duration.as_millis() as f64
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn scheme(request: &RequestInfo) -> &str {
    request.uri.scheme_str().unwrap_or("http")
}

fn host(request: &RequestInfo) -> &str {
    request
        .uri
        .authority()
        .map(|authority| authority.as_str())
        .unwrap_or_else(|| header_str(&request.headers, HOST.as_str()))
}

fn request_url(request: &RequestInfo) -> String {
    let path_and_query = request
        .uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");
    format!("{}://{}{}", scheme(request), host(request), path_and_query)
}

/// The declared request body length, `-1` if unknown (chunked).
fn content_length(headers: &HeaderMap) -> i64 {
    if let Some(length) = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
    {
        length
    } else if headers.contains_key(TRANSFER_ENCODING) {
        -1
    } else {
        0
    }
}

/// Response body wrapper counting and capturing the bytes sent to the client.
///
/// The request's record is emitted once the body has been streamed completely
/// or, if the client goes away first, when the body is dropped.
pub struct LoggedBody<B> {
    inner: Option<B>,
    finalizer: Option<Finalizer>,
    /// Bodies the server may legitimately drop without polling.
    complete_on_drop: bool,
    /// Declared body length. hyper stops polling once it has written that
    /// many bytes, so reaching it completes the response.
    expected_len: Option<u64>,
}

impl<B> LoggedBody<B> {
    fn empty() -> Self {
        Self {
            inner: None,
            finalizer: None,
            complete_on_drop: true,
            expected_len: Some(0),
        }
    }

    fn finish(&mut self) {
        if let Some(mut finalizer) = self.finalizer.take() {
            finalizer.completed = true;
        }
    }

    fn observe(&mut self, chunk: &Bytes) {
        let Some(finalizer) = self.finalizer.as_mut() else {
            return;
        };

        finalizer.bytes_written += chunk.len() as u64;
        if let Some(capture) = &finalizer.response_capture {
            capture.append(chunk);
        }

        if self
            .expected_len
            .is_some_and(|expected_len| finalizer.bytes_written >= expected_len)
        {
            self.finish();
        }
    }
}

impl<B: HttpBody + Unpin> HttpBody for LoggedBody<B> {
    type Data = Bytes;
    type Error = B::Error;

    fn poll_data(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            this.finish();
            return Poll::Ready(None);
        };

        let polled = Pin::new(&mut *inner).poll_data(cx);
        let ended = inner.is_end_stream();
        let polled = match polled {
            Poll::Ready(Some(Ok(mut data))) => {
                let chunk = data.copy_to_bytes(data.remaining());
                this.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Pending => Poll::Pending,
        };
        if ended {
            this.finish();
        }

        polled
    }

    fn poll_trailers(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(None));
        };

        let polled = Pin::new(inner).poll_trailers(cx);
        if let Poll::Ready(Ok(_)) = &polled {
            this.finish();
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().is_none_or(|inner| inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        self.inner
            .as_ref()
            .map(|inner| inner.size_hint())
            .unwrap_or_else(|| SizeHint::with_exact(0))
    }
}

impl<B> Drop for LoggedBody<B> {
    fn drop(&mut self) {
        if self.complete_on_drop {
            self.finish();
        }
    }
}
