use axum::{
    routing::{get, post},
    Router,
};

use crate::api_state::ApiState;

mod chat;
mod health;
mod intro;
mod summary;

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/patients/{patient_id}/intro", get(intro::intro))
        .route("/api/patients/{patient_id}/chat", post(chat::chat))
        .route(
            "/api/patients/{patient_id}/chat/stream",
            post(chat::chat_stream),
        )
        .route(
            "/api/patients/{patient_id}/summary",
            get(summary::patient_summary),
        )
        .route(
            "/api/patients/{patient_id}/summary/stream",
            get(summary::patient_summary_stream),
        )
        .with_state(state)
}
