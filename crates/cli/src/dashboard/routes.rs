use std::sync::Arc;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::{Extension, Json};
use serde::Deserialize;

use queuectl_infra::jobs::JobStore;
use queuectl_infra::MetricsRecorder;

use super::errors::store_error_to_response;

/// Records returned by `/api/executions` when no usable limit is given.
pub const DEFAULT_EXECUTIONS_LIMIT: usize = 20;

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    limit: Option<String>,
}

impl ExecutionsQuery {
    /// Positive integer limit, or the default for anything else.
    fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_EXECUTIONS_LIMIT)
    }
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn stats<S>(Extension(store): Extension<Arc<S>>) -> axum::response::Response
where
    S: MetricsRecorder + 'static,
{
    match store.execution_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

pub async fn jobs<S>(Extension(store): Extension<Arc<S>>) -> axum::response::Response
where
    S: JobStore + 'static,
{
    match store.counts_by_state().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

pub async fn executions<S>(
    Extension(store): Extension<Arc<S>>,
    Query(query): Query<ExecutionsQuery>,
) -> axum::response::Response
where
    S: MetricsRecorder + 'static,
{
    match store.recent_executions(query.limit()).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_error_to_response(e),
    }
}
