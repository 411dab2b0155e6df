//! Sentinel errors recorded in request logs.
//!
//! Neither type is ever returned to a caller as a failure of this crate: they
//! only describe *why* a request ended the way it did.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// Recorded under [`crate::attrs::ERROR_KEY`] when the client went away before
/// the response was sent completely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAborted;

impl Display for ClientAborted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "request aborted: client disconnected before response was sent"
        )
    }
}

impl Error for ClientAborted {}

/// Panic payload which signals that a handler deliberately aborted the
/// connection.
///
/// A panic carrying this value is logged and then always re-raised, even when
/// panic recovery is enabled. Use [`abort_handler`] to raise it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbortHandler;

impl Display for AbortHandler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "httplog: abort handler")
    }
}

impl Error for AbortHandler {}

/// Aborts the current handler by panicking with [`AbortHandler`].
pub fn abort_handler() -> ! {
    std::panic::panic_any(AbortHandler)
}
