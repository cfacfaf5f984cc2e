use crate::error::AppError;
use crate::models::{DelayQuery, HealthResponse};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use live_state::SERVICE_VERSION;
use live_state::pipeline::ServiceStatistics;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: SERVICE_VERSION,
        uptime_secs: state.started_at.elapsed().as_secs(),
        sequence: state.live.store().sequence(),
        subscribers: state.live.broadcaster().subscriber_count(),
    })
}

/// Current (or delayed) versioned snapshot. The checksum doubles as the
/// `ETag`.
pub async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<DelayQuery>,
) -> Result<Response, AppError> {
    let delay_secs = state.check_delay(query.delay)?;
    let snapshot = state
        .live
        .delayed_snapshot(delay_secs)
        .ok_or_else(|| AppError::NotFound("no state received yet".to_string()))?;

    let etag = HeaderValue::from_str(&format!("\"{}\"", snapshot.checksum))
        .map_err(|e| AppError::InternalError(e.into()))?;

    Ok((
        [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Json(snapshot),
    )
        .into_response())
}

pub async fn get_stats(State(state): State<AppState>) -> Json<ServiceStatistics> {
    Json(state.live.statistics())
}
