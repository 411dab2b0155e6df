//! Per-request attribute bag.
//!
//! Every request passing through the [`RequestLogLayer`](crate::web::middleware::RequestLogLayer)
//! gets an empty [`LogAttrs`] bag. It is stored in the request's extensions and
//! is also reachable as ambient, task-local state while the wrapped handler
//! runs. Whatever ends up in the bag is appended to the request's log record,
//! after all built-in fields.
//!
//! ```rust,ignore
//! async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
//!     httplog::attrs::set(req.extensions(), [("user.id", json!(42))]);
//!
//!     // ...or, deeper down, without access to the request:
//!     httplog::attrs::set_current([("cache.hit", json!(true))]);
//!     # todo!()
//! }
//! ```

use crate::kv::KeyValues;
use hyper::http::Extensions;
use serde_json::Value;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fixed key under which [`set_error`] records errors.
pub const ERROR_KEY: &str = "error";

tokio::task_local! {
    static CURRENT_ATTRS: LogAttrs;
}

/// Handle to the attribute bag of a single request.
///
/// Cloning the handle does not copy the bag: all clones append to the same
/// sequence. Appends are never reordered or removed.
#[derive(Clone, Default)]
pub struct LogAttrs {
    inner: Arc<Mutex<KeyValues>>,
}

impl LogAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bag of the request currently being handled on this task.
    pub fn current() -> Option<LogAttrs> {
        CURRENT_ATTRS.try_with(|attrs| attrs.clone()).ok()
    }

    /// Runs the given future with this bag installed as the ambient bag.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_ATTRS.scope(self, fut).await
    }

    /// Appends a single key-value pair.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().push((key.into(), value.into()));
    }

    /// Appends all given pairs, in order.
    pub fn extend<I, K, V>(&self, attrs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.lock()
            .extend(attrs.into_iter().map(|(key, value)| (key.into(), value.into())));
    }

    /// Returns a snapshot of the bag's current contents.
    pub fn get(&self) -> KeyValues {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, KeyValues> {
        // A poisoned bag still holds valid pairs, so keep logging them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Appends the given pairs to the bag stored in `extensions`.
///
/// This is a no-op if the request is not being tracked by a request logger.
pub fn set<I, K, V>(extensions: &Extensions, attrs: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    if let Some(bag) = extensions.get::<LogAttrs>() {
        bag.extend(attrs);
    }
}

/// Records the error of `result` (if any) under [`ERROR_KEY`] and returns the
/// result unchanged.
///
/// ```rust,ignore
/// let user = attrs::set_error(req.extensions(), load_user(id).await)?;
/// ```
pub fn set_error<T, E: Display>(extensions: &Extensions, result: Result<T, E>) -> Result<T, E> {
    if let Err(err) = &result {
        set(extensions, [(ERROR_KEY, format!("{:#}", err))]);
    }

    result
}

/// Returns the current contents of the bag stored in `extensions`, or an empty
/// sequence if there is none.
pub fn get(extensions: &Extensions) -> KeyValues {
    extensions
        .get::<LogAttrs>()
        .map(LogAttrs::get)
        .unwrap_or_default()
}

/// Appends the given pairs to the ambient bag of the current task.
///
/// A no-op when called outside a tracked request.
pub fn set_current<I, K, V>(attrs: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    if let Some(bag) = LogAttrs::current() {
        bag.extend(attrs);
    }
}

/// Like [`set_error`], but records into the ambient bag of the current task.
pub fn set_current_error<T, E: Display>(result: Result<T, E>) -> Result<T, E> {
    if let Err(err) = &result {
        set_current([(ERROR_KEY, format!("{:#}", err))]);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_without_bag_is_a_no_op() {
        let extensions = Extensions::new();
        set(&extensions, [("key", json!("value"))]);

        assert!(get(&extensions).is_empty());
    }

    #[test]
    fn set_appends_in_order() {
        let mut extensions = Extensions::new();
        extensions.insert(LogAttrs::new());

        set(&extensions, [("a", json!(1)), ("b", json!(2))]);
        set(&extensions, [("a", json!(3))]);

        assert_eq!(
            get(&extensions),
            vec![
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(2)),
                ("a".to_string(), json!(3)),
            ]
        );
    }

    #[test]
    fn set_error_records_and_passes_through() {
        let mut extensions = Extensions::new();
        extensions.insert(LogAttrs::new());

        let ok: Result<u8, String> = set_error(&extensions, Ok(7));
        assert_eq!(ok, Ok(7));
        assert!(get(&extensions).is_empty());

        let err: Result<u8, String> = set_error(&extensions, Err("boom".to_string()));
        assert_eq!(err, Err("boom".to_string()));
        assert_eq!(
            get(&extensions),
            vec![(ERROR_KEY.to_string(), json!("boom"))]
        );
    }

    #[test]
    fn clones_share_the_same_bag() {
        let bag = LogAttrs::new();
        let clone = bag.clone();
        clone.set("shared", true);

        assert_eq!(bag.len(), 1);
    }

    #[tokio::test]
    async fn ambient_bag_is_only_visible_within_scope() {
        set_current([("outside", json!(1))]);
        assert!(LogAttrs::current().is_none());

        let bag = LogAttrs::new();
        bag.clone()
            .scope(async {
                set_current([("inside", json!(2))]);
                let _ = set_current_error::<(), _>(Err("failed"));
            })
            .await;

        assert_eq!(
            bag.get(),
            vec![
                ("inside".to_string(), json!(2)),
                (ERROR_KEY.to_string(), json!("failed")),
            ]
        );
    }
}
