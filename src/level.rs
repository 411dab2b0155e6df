//! Severity levels and the mapping from request outcome to severity.

use hyper::http::{Method, StatusCode};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Severity of a request log record, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    /// Derives the severity of a finished request.
    ///
    /// Server errors are errors, client errors are warnings (except
    /// `429 Too Many Requests`, which is expected under load), CORS
    /// preflights are debug noise and everything else is informational.
    pub fn from_outcome(status: StatusCode, method: &Method) -> Level {
        match status.as_u16() {
            500.. => Level::Error,
            429 => Level::Info,
            400..=499 => Level::Warn,
            _ if method == Method::OPTIONS => Level::Debug,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(anyhow::anyhow!("Unknown log level: '{}'", other)),
        }
    }
}
