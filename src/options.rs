//! Request logger configuration.
//!
//! [`Options`] are built in code, starting from [`Options::default`], and may
//! be overlaid with environment variables via [`Options::from_env`]:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HTTPLOG_LEVEL` | Minimum level of emitted records (`debug`, `info`, `warn`, `error`) | `info` |
//! | `HTTPLOG_SCHEMA` | Field naming schema (`ecs`, `otel`, `gcp`) | `ecs` |
//! | `HTTPLOG_GROUP_DELIMITER` | Delimiter for grouping keys into nested objects | (none) |
//! | `HTTPLOG_REQUEST_HEADERS` | Comma-separated request headers to log | `Content-Type,Origin` |
//! | `HTTPLOG_RESPONSE_HEADERS` | Comma-separated response headers to log | `Content-Type` |
//! | `HTTPLOG_RECOVER_PANICS` | Turn handler panics into `500` responses | `true` |
//! | `HTTPLOG_BODY_MAX_LEN` | Maximum logged body length, `0` for the default, `-1` for unlimited | `1024` |
//! | `HTTPLOG_BODY_CONTENT_TYPES` | Comma-separated content type prefixes of loggable bodies | see [`DEFAULT_BODY_CONTENT_TYPES`] |

use crate::kv::KeyValues;
use crate::level::Level;
use crate::schema::Schema;
use anyhow::Context;
use bytesize::MB;
use hyper::http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

/// Content types whose bodies are logged as text unless configured otherwise.
pub const DEFAULT_BODY_CONTENT_TYPES: [&str; 5] = [
    "application/json",
    "application/xml",
    "text/plain",
    "text/csv",
    "application/x-www-form-urlencoded",
];

/// Default maximum length of a logged body.
pub const DEFAULT_BODY_MAX_LEN: usize = 1024;

/// Default number of bytes captured per body.
pub const DEFAULT_BODY_CAPTURE_LIMIT: usize = MB as usize;

/// The parts of a request that predicates and extractors may inspect.
///
/// This is a snapshot taken when the request enters the logger: the request
/// itself is owned by the handler from then on.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestInfo {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Decides per request whether a body should be logged.
pub type RequestPredicate = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;

/// Decides per finished request whether to skip its log record entirely.
pub type SkipPredicate = Arc<dyn Fn(&RequestInfo, StatusCode) -> bool + Send + Sync>;

/// Computes additional attributes from the request, its body and the status.
pub type ExtraAttrs = Arc<dyn Fn(&RequestInfo, &str, StatusCode) -> KeyValues + Send + Sync>;

#[derive(Clone)]
pub struct Options {
    /// Records below this level are not emitted.
    pub level: Level,
    pub schema: Schema,
    /// Delimiter used to group keys into nested objects; empty disables
    /// grouping.
    pub group_delimiter: String,
    pub recover_panics: bool,
    pub log_request_headers: Vec<String>,
    pub log_response_headers: Vec<String>,
    pub log_request_body: Option<RequestPredicate>,
    pub log_response_body: Option<RequestPredicate>,
    pub log_body_content_types: Vec<String>,
    /// Maximum length of logged bodies, `None` for unlimited.
    pub log_body_max_len: Option<usize>,
    pub body_capture_limit: usize,
    pub skip: Option<SkipPredicate>,
    pub log_extra_attrs: Option<ExtraAttrs>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            level: Level::Info,
            schema: Schema::ECS,
            group_delimiter: String::new(),
            recover_panics: true,
            log_request_headers: vec!["Content-Type".to_string(), "Origin".to_string()],
            log_response_headers: vec!["Content-Type".to_string()],
            log_request_body: None,
            log_response_body: None,
            log_body_content_types: DEFAULT_BODY_CONTENT_TYPES
                .iter()
                .map(|content_type| content_type.to_string())
                .collect(),
            log_body_max_len: Some(DEFAULT_BODY_MAX_LEN),
            body_capture_limit: DEFAULT_BODY_CAPTURE_LIMIT,
            skip: None,
            log_extra_attrs: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the `HTTPLOG_*` environment variables on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::default().with_env()
    }

    /// Overlays the `HTTPLOG_*` environment variables onto these options.
    pub fn with_env(self) -> anyhow::Result<Self> {
        self.with_vars(|name| env::var(name).ok())
    }

    /// Overlays the `HTTPLOG_*` variables as returned by `lookup`.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(level) = lookup("HTTPLOG_LEVEL") {
            self.level = level.parse().context("Failed to parse HTTPLOG_LEVEL")?;
        }
        if let Some(schema) = lookup("HTTPLOG_SCHEMA") {
            self.schema = schema.parse().context("Failed to parse HTTPLOG_SCHEMA")?;
        }
        if let Some(delimiter) = lookup("HTTPLOG_GROUP_DELIMITER") {
            self.group_delimiter = delimiter;
        }
        if let Some(headers) = lookup("HTTPLOG_REQUEST_HEADERS") {
            self.log_request_headers = split_list(&headers);
        }
        if let Some(headers) = lookup("HTTPLOG_RESPONSE_HEADERS") {
            self.log_response_headers = split_list(&headers);
        }
        if let Some(recover) = lookup("HTTPLOG_RECOVER_PANICS") {
            self.recover_panics = recover
                .trim()
                .parse()
                .context("Failed to parse HTTPLOG_RECOVER_PANICS")?;
        }
        if let Some(max_len) = lookup("HTTPLOG_BODY_MAX_LEN") {
            let max_len: i64 = max_len
                .trim()
                .parse()
                .context("Failed to parse HTTPLOG_BODY_MAX_LEN")?;
            self.log_body_max_len = match max_len {
                ..0 => None,
                0 => Some(DEFAULT_BODY_MAX_LEN),
                n => Some(n as usize),
            };
        }
        if let Some(content_types) = lookup("HTTPLOG_BODY_CONTENT_TYPES") {
            self.log_body_content_types = split_list(&content_types);
        }

        Ok(self.normalized())
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_group_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.group_delimiter = delimiter.into();
        self
    }

    pub fn with_recover_panics(mut self, recover: bool) -> Self {
        self.recover_panics = recover;
        self
    }

    pub fn with_request_headers<S: Into<String>>(
        mut self,
        headers: impl IntoIterator<Item = S>,
    ) -> Self {
        self.log_request_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_response_headers<S: Into<String>>(
        mut self,
        headers: impl IntoIterator<Item = S>,
    ) -> Self {
        self.log_response_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_request_body(
        mut self,
        predicate: impl Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.log_request_body = Some(Arc::new(predicate));
        self
    }

    pub fn with_response_body(
        mut self,
        predicate: impl Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.log_response_body = Some(Arc::new(predicate));
        self
    }

    /// Sets the content type prefixes of loggable bodies. An empty list
    /// restores [`DEFAULT_BODY_CONTENT_TYPES`].
    pub fn with_body_content_types<S: Into<String>>(
        mut self,
        content_types: impl IntoIterator<Item = S>,
    ) -> Self {
        self.log_body_content_types = content_types.into_iter().map(Into::into).collect();
        self.normalized()
    }

    /// Sets the maximum length of logged bodies. Zero restores
    /// [`DEFAULT_BODY_MAX_LEN`].
    pub fn with_body_max_len(mut self, max_len: usize) -> Self {
        self.log_body_max_len = Some(max_len);
        self.normalized()
    }

    pub fn with_unlimited_body_len(mut self) -> Self {
        self.log_body_max_len = None;
        self
    }

    pub fn with_body_capture_limit(mut self, limit: usize) -> Self {
        self.body_capture_limit = limit;
        self.normalized()
    }

    pub fn with_skip(
        mut self,
        skip: impl Fn(&RequestInfo, StatusCode) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Arc::new(skip));
        self
    }

    pub fn with_extra_attrs(
        mut self,
        extractor: impl Fn(&RequestInfo, &str, StatusCode) -> KeyValues + Send + Sync + 'static,
    ) -> Self {
        self.log_extra_attrs = Some(Arc::new(extractor));
        self
    }

    /// Replaces empty or zero settings with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.log_body_content_types.is_empty() {
            self.log_body_content_types = Options::default().log_body_content_types;
        }
        if self.log_body_max_len == Some(0) {
            self.log_body_max_len = Some(DEFAULT_BODY_MAX_LEN);
        }
        if self.body_capture_limit == 0 {
            self.body_capture_limit = DEFAULT_BODY_CAPTURE_LIMIT;
        }
        self
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let options = Options::new()
            .with_body_content_types(Vec::<String>::new())
            .with_body_max_len(0)
            .with_body_capture_limit(0);

        assert_eq!(options.log_body_content_types, DEFAULT_BODY_CONTENT_TYPES);
        assert_eq!(options.log_body_max_len, Some(DEFAULT_BODY_MAX_LEN));
        assert_eq!(options.body_capture_limit, DEFAULT_BODY_CAPTURE_LIMIT);
    }

    #[test]
    fn default_allowlists() {
        let options = Options::default();

        assert_eq!(options.log_request_headers, ["Content-Type", "Origin"]);
        assert_eq!(options.log_response_headers, ["Content-Type"]);
        assert!(options.recover_panics);
        assert_eq!(options.level, Level::Info);
        assert!(options.group_delimiter.is_empty());
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| pairs.get(name).cloned()
    }

    #[test]
    fn overlays_variables() {
        let options = Options::default()
            .with_vars(vars(&[
                ("HTTPLOG_LEVEL", "warn"),
                ("HTTPLOG_SCHEMA", "gcp"),
                ("HTTPLOG_GROUP_DELIMITER", "."),
                ("HTTPLOG_REQUEST_HEADERS", "Accept, X-Request-Id"),
                ("HTTPLOG_RESPONSE_HEADERS", "Cache-Control"),
                ("HTTPLOG_RECOVER_PANICS", "false"),
                ("HTTPLOG_BODY_MAX_LEN", "64"),
                ("HTTPLOG_BODY_CONTENT_TYPES", "application/json,text/"),
            ]))
            .unwrap();

        assert_eq!(options.level, Level::Warn);
        assert_eq!(options.schema, Schema::GCP);
        assert_eq!(options.group_delimiter, ".");
        assert_eq!(options.log_request_headers, ["Accept", "X-Request-Id"]);
        assert_eq!(options.log_response_headers, ["Cache-Control"]);
        assert!(!options.recover_panics);
        assert_eq!(options.log_body_max_len, Some(64));
        assert_eq!(options.log_body_content_types, ["application/json", "text/"]);
    }

    #[test]
    fn missing_variables_keep_the_defaults() {
        let options = Options::default().with_vars(vars(&[])).unwrap();

        assert_eq!(options.level, Level::Info);
        assert_eq!(options.schema, Schema::ECS);
        assert_eq!(options.log_body_max_len, Some(DEFAULT_BODY_MAX_LEN));
        assert!(options.recover_panics);
    }

    #[test]
    fn body_max_len_negative_is_unlimited_and_zero_is_default() {
        let unlimited = Options::default()
            .with_vars(vars(&[("HTTPLOG_BODY_MAX_LEN", "-1")]))
            .unwrap();
        assert_eq!(unlimited.log_body_max_len, None);

        let default = Options::default()
            .with_unlimited_body_len()
            .with_vars(vars(&[("HTTPLOG_BODY_MAX_LEN", "0")]))
            .unwrap();
        assert_eq!(default.log_body_max_len, Some(DEFAULT_BODY_MAX_LEN));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        for (name, value) in [
            ("HTTPLOG_LEVEL", "loud"),
            ("HTTPLOG_SCHEMA", "splunk"),
            ("HTTPLOG_RECOVER_PANICS", "maybe"),
            ("HTTPLOG_BODY_MAX_LEN", "lots"),
        ] {
            let err = Options::default()
                .with_vars(vars(&[(name, value)]))
                .err()
                .unwrap();
            assert_eq!(err.to_string(), format!("Failed to parse {}", name));
        }
    }

    #[test]
    fn splits_comma_separated_lists() {
        assert_eq!(
            split_list(" Content-Type, ,X-Request-Id "),
            ["Content-Type", "X-Request-Id"]
        );
    }
}
