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
use retrieval_pipeline::{ContextMode, SystemContext};
use tracing::{error, info};

use crate::{api_state::ApiState, error::ApiError};

fn summary_context(patient_id: &str) -> SystemContext {
    let mut system_context = SystemContext::synthesized(patient_id);
    system_context.context_mode = ContextMode::Summary;
    system_context
}

pub async fn patient_summary(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    info!(patient_id = %patient_id, "Received summary request");

    let summary = state
        .service
        .generate_patient_summary(&patient_id, &summary_context(&patient_id))
        .await?;

    Ok(Json(summary))
}

pub async fn patient_summary_stream(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    info!(patient_id = %patient_id, "Received streaming summary request");

    let fragments = state
        .service
        .generate_patient_summary_stream(&patient_id, &summary_context(&patient_id))
        .await?;

    let events = fragments.map(|fragment| {
        Ok(match fragment {
            Ok(text) => Event::default().data(text),
            Err(err) => {
                error!("Stream error mid-summary: {:?}", err);
                Event::default()
                    .event("error")
                    .data("summary generation failed")
            }
        })
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
