use crate::error::AppError;
use crate::models::{IngestRequest, IngestResponse};
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};

/// Queue one upstream envelope for the pipeline. Never waits for queue
/// space; a full queue is reported as 503.
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if request.topic.len() > 256 {
        return Err(AppError::BadRequest("topic too long".to_string()));
    }

    let payload = request.payload_bytes();
    tracing::debug!(topic = %request.topic, bytes = payload.len(), "Ingest request");
    state.feed.submit(request.topic, payload)?;

    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted: true })))
}
