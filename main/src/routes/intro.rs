use axum::{response::IntoResponse, Json};
use retrieval_pipeline::RagService;
use serde_json::json;

/// Fixed greeting the client shows when a session opens. No model call.
pub async fn intro() -> impl IntoResponse {
    Json(json!({ "message": RagService::intro_message() }))
}
