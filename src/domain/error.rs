//! Shared error taxonomy, generalized from the teacher's hand-rolled
//! `AuthError` enum into a `thiserror`-backed type with attached data, since
//! the pipeline's error cases (a failed batch, a conflicting idempotency key)
//! need more than a status code and a message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("request body is not valid JSON")]
    MalformedBody,

    #[error("batch failed schema validation")]
    SchemaInvalid { errors: serde_json::Value },

    #[error("batch is empty")]
    EmptyBatch,

    #[error("batch mixes events from more than one tenant")]
    MixedTenant,

    #[error("idempotency key conflicts with a request carrying a different body")]
    IdempotencyConflict,

    #[error("an identical idempotent request is still being processed")]
    IdempotencyInProgress,

    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("unknown tenant header")]
    MissingTenant,

    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            PipelineError::MalformedBody => {
                (StatusCode::BAD_REQUEST, json!({"ok": false, "error": self.to_string()}))
            }
            PipelineError::SchemaInvalid { errors } => (
                StatusCode::BAD_REQUEST,
                json!({"ok": false, "error": self.to_string(), "details": errors}),
            ),
            PipelineError::EmptyBatch | PipelineError::MixedTenant | PipelineError::MissingTenant => {
                (StatusCode::BAD_REQUEST, json!({"ok": false, "error": self.to_string()}))
            }
            PipelineError::IdempotencyConflict => {
                (StatusCode::CONFLICT, json!({"ok": false, "error": self.to_string()}))
            }
            PipelineError::IdempotencyInProgress => (
                StatusCode::ACCEPTED,
                json!({"ok": false, "error": self.to_string()}),
            ),
            PipelineError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, json!({"ok": false, "error": self.to_string()}))
            }
            PipelineError::Transient(_) | PipelineError::Database(_) | PipelineError::Internal(_) => {
                tracing::error!(error = %self, "internal pipeline error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"ok": false, "error": "internal error"}),
                )
            }
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Maps a `PipelineError` to a process exit code for the job binaries, which
/// have no HTTP response to return but still need to signal failure to
/// whatever scheduler (cron, CI) invoked them.
pub fn job_exit_code(err: &PipelineError) -> i32 {
    match err {
        PipelineError::Database(_) | PipelineError::Transient(_) => 2,
        PipelineError::Internal(_) => 1,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_invalid_maps_to_bad_request() {
        let err = PipelineError::SchemaInvalid { errors: json!([]) };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn idempotency_conflict_maps_to_409() {
        let resp = PipelineError::IdempotencyConflict.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn idempotency_in_progress_maps_to_202() {
        let resp = PipelineError::IdempotencyInProgress.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn database_error_hides_details_from_response() {
        let err = PipelineError::Internal("boom".into());
        let code = job_exit_code(&err);
        assert_eq!(code, 1);
    }
}
