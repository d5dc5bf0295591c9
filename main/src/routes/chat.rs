use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use retrieval_pipeline::{ChatTurn, RetrievalRequest, SystemContext};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
    #[serde(default)]
    pub system_context: Option<SystemContext>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: String,
}

fn to_retrieval_request(
    patient_id: String,
    input: ChatRequest,
) -> Result<RetrievalRequest, ApiError> {
    if input.question.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "question must not be empty".to_string(),
        ));
    }

    let system_context = input
        .system_context
        .unwrap_or_else(|| SystemContext::synthesized(&patient_id));

    Ok(RetrievalRequest {
        patient_id,
        question: input.question,
        history: input.conversation_history,
        system_context,
        session_id: input.session_id,
    })
}

pub async fn chat(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
    Json(input): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        patient_id = %patient_id,
        history_turns = input.conversation_history.len(),
        "Received chat request"
    );

    let request = to_retrieval_request(patient_id, input)?;
    let answer = state.service.answer_question(request).await?;

    Ok(Json(ChatResponse {
        answer: answer.answer,
        session_id: answer.session_id,
    }))
}

pub async fn chat_stream(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
    Json(input): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    info!(
        patient_id = %patient_id,
        history_turns = input.conversation_history.len(),
        "Received streaming chat request"
    );

    let request = to_retrieval_request(patient_id, input)?;
    let fragments = state.service.answer_question_stream(request).await?;

    let events = fragments.map(|fragment| {
        Ok(match fragment {
            Ok(text) => Event::default().data(text),
            Err(err) => {
                error!("Stream error mid-answer: {:?}", err);
                Event::default()
                    .event("error")
                    .data("answer generation failed")
            }
        })
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
