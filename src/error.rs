#![forbid(unsafe_code)]

use http::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for the bridge. Per-call errors map to a fixed HTTP status;
/// startup errors are fatal and never reach the HTTP layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("route for path `{path}` is not found")]
    RouteNotFound { path: String },
    #[error("method `{method}` is not allowed on path `{path}`")]
    MethodNotAllowed { method: String, path: String },
    #[error("invalid payload for path `{path}`: {reason}")]
    InvalidPayload { path: String, reason: String },
    #[error("failed to publish on topic `{topic}`: {reason}")]
    Publish { topic: String, reason: String },
    #[error("no reply after {timeout_ms} ms for path `{path}`")]
    ReplyTimeout { path: String, timeout_ms: u64 },
    #[error("schema registry lookup for subject `{subject}` failed: {reason}")]
    SchemaLookup { subject: String, reason: String },
    #[error(
        "response topic `{topic}` is declared with conflicting {field} (`{left}` vs `{right}`)"
    )]
    ConsumerPlanConflict {
        topic: String,
        field: &'static str,
        left: String,
        right: String,
    },
    #[error("consumer group failed to start: {reason}")]
    ConsumerStartup { reason: String },
    #[error(
        "consumer group not ready after {timeout_ms} ms ({running} of {total} workers running)"
    )]
    ConsumerReadiness {
        timeout_ms: u64,
        running: usize,
        total: usize,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Fixed per-kind HTTP status used by the inbound transport.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::ReplyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for error kinds that abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SchemaLookup { .. }
                | Error::ConsumerPlanConflict { .. }
                | Error::ConsumerStartup { .. }
                | Error::ConsumerReadiness { .. }
                | Error::Config(_)
        )
    }
}
