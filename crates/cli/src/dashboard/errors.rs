use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use queuectl_infra::jobs::JobStoreError;

/// Store failures surface as a 500 with a JSON body.
pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    tracing::error!(error = %err, "dashboard query failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "store_error",
        err.to_string(),
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
