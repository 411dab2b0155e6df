//! Field naming schemas for emitted records.
//!
//! A [`Schema`] maps each field the request logger knows about to the key used
//! in the emitted record. Pick the schema matching your log backend:
//!
//! | Schema | Backend |
//! |--------|---------|
//! | [`Schema::ECS`] | Elastic Common Schema (default) |
//! | [`Schema::OTEL`] | OpenTelemetry semantic conventions |
//! | [`Schema::GCP`] | Google Cloud Logging `httpRequest` (combine with group delimiter `.`) |

use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub error_message: &'static str,
    pub error_type: &'static str,
    pub error_stack_trace: &'static str,
    pub request_url: &'static str,
    pub request_method: &'static str,
    pub request_path: &'static str,
    pub request_remote_ip: &'static str,
    pub request_host: &'static str,
    pub request_scheme: &'static str,
    pub request_proto: &'static str,
    pub request_headers: &'static str,
    pub request_body: &'static str,
    pub request_bytes: &'static str,
    pub request_bytes_unread: &'static str,
    pub request_user_agent: &'static str,
    pub request_referer: &'static str,
    pub response_headers: &'static str,
    pub response_body: &'static str,
    pub response_status: &'static str,
    pub response_duration: &'static str,
    pub response_bytes: &'static str,
}

impl Schema {
    pub const ECS: Schema = Schema {
        error_message: "error.message",
        error_type: "error.type",
        error_stack_trace: "error.stack_trace",
        request_url: "url.full",
        request_method: "http.request.method",
        request_path: "url.path",
        request_remote_ip: "client.ip",
        request_host: "url.domain",
        request_scheme: "url.scheme",
        request_proto: "http.version",
        request_headers: "http.request.headers",
        request_body: "http.request.body.content",
        request_bytes: "http.request.body.bytes",
        request_bytes_unread: "http.request.body.unread.bytes",
        request_user_agent: "user_agent.original",
        request_referer: "http.request.referrer",
        response_headers: "http.response.headers",
        response_body: "http.response.body.content",
        response_status: "http.response.status_code",
        response_duration: "event.duration",
        response_bytes: "http.response.body.bytes",
    };

    pub const OTEL: Schema = Schema {
        error_message: "exception.message",
        error_type: "exception.type",
        error_stack_trace: "exception.stacktrace",
        request_url: "url.full",
        request_method: "http.request.method",
        request_path: "url.path",
        request_remote_ip: "client.address",
        request_host: "server.address",
        request_scheme: "url.scheme",
        request_proto: "network.protocol.version",
        request_headers: "http.request.header",
        request_body: "http.request.body.content",
        request_bytes: "http.request.body.size",
        request_bytes_unread: "http.request.body.unread.size",
        request_user_agent: "user_agent.original",
        request_referer: "http.request.header.referer",
        response_headers: "http.response.header",
        response_body: "http.response.body.content",
        response_status: "http.response.status_code",
        response_duration: "http.server.request.duration",
        response_bytes: "http.response.body.size",
    };

    pub const GCP: Schema = Schema {
        error_message: "error",
        error_type: "error_type",
        error_stack_trace: "stack_trace",
        request_url: "httpRequest.requestUrl",
        request_method: "httpRequest.requestMethod",
        request_path: "httpRequest.requestPath",
        request_remote_ip: "httpRequest.remoteIp",
        request_host: "httpRequest.host",
        request_scheme: "httpRequest.scheme",
        request_proto: "httpRequest.protocol",
        request_headers: "httpRequest.requestHeaders",
        request_body: "httpRequest.requestBody",
        request_bytes: "httpRequest.requestSize",
        request_bytes_unread: "httpRequest.requestUnreadSize",
        request_user_agent: "httpRequest.userAgent",
        request_referer: "httpRequest.referer",
        response_headers: "httpRequest.responseHeaders",
        response_body: "httpRequest.responseBody",
        response_status: "httpRequest.status",
        response_duration: "httpRequest.latency",
        response_bytes: "httpRequest.responseSize",
    };
}

impl Default for Schema {
    fn default() -> Self {
        Schema::ECS
    }
}

impl FromStr for Schema {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecs" => Ok(Schema::ECS),
            "otel" | "opentelemetry" => Ok(Schema::OTEL),
            "gcp" => Ok(Schema::GCP),
            other => Err(anyhow::anyhow!("Unknown log schema: '{}'", other)),
        }
    }
}
