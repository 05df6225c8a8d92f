#![forbid(unsafe_code)]

use crate::consumer::{ConsumerGroup, WorkerStatus};
use crate::error::Result;
use crate::router::Router;
use crate::transport::broker::RecordPublisher;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state behind the HTTP listener: the router plus the consumer group
/// handle for health reporting.
pub struct BridgeState<P: RecordPublisher> {
    pub router: Router<P>,
    pub consumers: ConsumerGroup,
}

/// Build the axum application: a health endpoint plus a catch-all handler
/// that feeds every other (method, path) pair through the router.
pub fn build_app<P: RecordPublisher>(state: Arc<BridgeState<P>>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health::<P>))
        .fallback(handle::<P>)
        .with_state(state)
}

pub async fn serve<P: RecordPublisher>(
    listen: &str,
    state: Arc<BridgeState<P>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(listen = %listen, "http listener bound");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn handle<P: RecordPublisher>(
    State(state): State<Arc<BridgeState<P>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let forwarded: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    match state
        .router
        .route(method.as_str(), uri.path(), &body, &forwarded)
        .await
    {
        Ok(outcome) => {
            let status =
                StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                [(CONTENT_TYPE, outcome.content_type)],
                outcome.payload,
            )
                .into_response()
        }
        Err(err) => {
            let body = json!({ "error": err.to_string() }).to_string();
            (
                err.status_code(),
                [(CONTENT_TYPE, "application/json".to_string())],
                body,
            )
                .into_response()
        }
    }
}

async fn health<P: RecordPublisher>(State(state): State<Arc<BridgeState<P>>>) -> Response {
    let statuses = state.consumers.statuses();
    let all_running = statuses
        .iter()
        .all(|(_, status)| *status == WorkerStatus::Running);

    let workers: Vec<_> = statuses
        .iter()
        .map(|(topic, status)| json!({ "topic": topic, "status": status.as_str() }))
        .collect();

    let status = if all_running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if all_running { "UP" } else { "DOWN" },
        "workers": workers,
    })
    .to_string();

    (status, [(CONTENT_TYPE, "application/json".to_string())], body).into_response()
}
