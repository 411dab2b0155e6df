//! Request/response body capture and redaction.
//!
//! Captured bytes are a copy: the handler and the client always see the
//! original stream, capture only observes it.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use hyper::Body;
use hyper::body::HttpBody;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

/// Marker appended to bodies cut at the configured maximum length.
pub const TRIMMED_MARKER: &str = "... [trimmed]";

/// A bounded, shared buffer receiving a copy of the bytes of a body.
///
/// Bytes beyond `limit` are counted as seen but not stored.
#[derive(Clone)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<BytesMut>>,
    limit: usize,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BytesMut::new())),
            limit,
        }
    }

    pub fn append(&self, chunk: &[u8]) {
        let mut buffer = self.lock();
        let room = self.limit.saturating_sub(buffer.len());
        buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock())
    }

    /// Returns the captured bytes as (lossy) UTF-8 text.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Captures the request body while the handler reads it.
///
/// If the handler drops the body before reading it to the end, the remaining
/// part is parked here so that it can be drained once the handler is done.
#[derive(Clone)]
pub struct RequestCapture {
    buffer: CaptureBuffer,
    unread: Arc<Mutex<Option<Body>>>,
}

impl RequestCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: CaptureBuffer::new(limit),
            unread: Arc::new(Mutex::new(None)),
        }
    }

    /// Wraps `body` so that every chunk the handler reads is copied into this
    /// capture.
    pub fn tee(&self, body: Body) -> Body {
        Body::wrap_stream(TeeStream {
            body,
            capture: self.clone(),
            finished: false,
        })
    }

    pub fn buffer(&self) -> &CaptureBuffer {
        &self.buffer
    }

    /// Reads and discards whatever the handler left unread, returning the
    /// number of bytes discarded.
    pub async fn drain_unread(&self) -> u64 {
        let unread = self
            .unread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(mut body) = unread else {
            return 0;
        };

        let mut discarded = 0;
        while let Some(chunk) = body.data().await {
            match chunk {
                Ok(chunk) => discarded += chunk.len() as u64,
                Err(err) => {
                    tracing::debug!("Stopped draining unread request body: {}", err);
                    break;
                }
            }
        }

        discarded
    }
}

struct TeeStream {
    body: Body,
    capture: RequestCapture,
    finished: bool,
}

impl Stream for TeeStream {
    type Item = Result<Bytes, hyper::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.body).poll_data(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => this.capture.buffer.append(chunk),
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.finished = true,
            Poll::Pending => {}
        }

        polled
    }
}

impl Drop for TeeStream {
    fn drop(&mut self) {
        if !self.finished && !self.body.is_end_stream() {
            let rest = std::mem::take(&mut self.body);
            *self
                .capture
                .unread
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(rest);
        }
    }
}

/// Renders a captured body for the log record.
///
/// Only bodies whose content type starts with one of `content_types` are
/// logged as text, others are replaced by a placeholder naming the content
/// type. Text longer than `max_len` bytes is cut at the nearest character
/// boundary and marked with [`TRIMMED_MARKER`].
pub fn render_body<S: AsRef<str>>(
    body: &[u8],
    content_type: &str,
    content_types: &[S],
    max_len: Option<usize>,
) -> String {
    if body.is_empty() {
        return String::new();
    }

    if !content_types
        .iter()
        .any(|allowed| content_type.starts_with(allowed.as_ref()))
    {
        return format!("[body redacted for Content-Type: {}]", content_type);
    }

    let text = String::from_utf8_lossy(body);
    match max_len {
        Some(max_len) if max_len > 0 && text.len() > max_len => {
            let mut end = max_len;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}{}", &text[..end], TRIMMED_MARKER)
        }
        _ => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: [&str; 1] = ["application/json"];

    #[test]
    fn redacts_unlisted_content_types() {
        assert_eq!(
            render_body(b"\x89PNG", "image/png", &JSON, Some(1024)),
            "[body redacted for Content-Type: image/png]"
        );
        assert_eq!(
            render_body(b"data", "", &JSON, Some(1024)),
            "[body redacted for Content-Type: ]"
        );
    }

    #[test]
    fn matches_content_type_by_prefix() {
        assert_eq!(
            render_body(b"{\"a\":1}", "application/json; charset=utf-8", &JSON, Some(1024)),
            "{\"a\":1}"
        );
    }

    #[test]
    fn truncates_long_bodies() {
        assert_eq!(
            render_body(b"0123456789", "application/json", &JSON, Some(4)),
            "0123... [trimmed]"
        );
        assert_eq!(
            render_body(b"0123", "application/json", &JSON, Some(4)),
            "0123"
        );
        assert_eq!(
            render_body(b"0123456789", "application/json", &JSON, None),
            "0123456789"
        );
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(
            render_body("aé".as_bytes(), "text/plain", &["text/plain"], Some(2)),
            "a... [trimmed]"
        );
    }

    #[test]
    fn empty_bodies_render_empty() {
        assert_eq!(render_body(b"", "image/png", &JSON, Some(4)), "");
    }

    #[test]
    fn capture_buffer_is_bounded() {
        let buffer = CaptureBuffer::new(5);
        buffer.append(b"abc");
        buffer.append(b"defgh");

        assert_eq!(buffer.to_bytes(), Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn tee_copies_what_the_handler_reads() {
        let capture = RequestCapture::new(1024);
        let body = capture.tee(Body::from("hello world"));

        let read = hyper::body::to_bytes(body).await.unwrap();

        assert_eq!(read, Bytes::from_static(b"hello world"));
        assert_eq!(capture.buffer().to_text(), "hello world");
        assert_eq!(capture.drain_unread().await, 0);
    }

    #[tokio::test]
    async fn drains_what_the_handler_left_unread() {
        let capture = RequestCapture::new(1024);
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("first"), Ok("second")];
        let mut body = capture.tee(Body::wrap_stream(futures_util::stream::iter(chunks)));

        let first = body.data().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"first"));
        drop(body);

        assert_eq!(capture.drain_unread().await, 6);
        assert_eq!(capture.buffer().to_text(), "first");
    }
}
