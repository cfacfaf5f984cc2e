use crate::error::AppError;
use crate::handlers::{ingest, state, stream};
use crate::state::AppState;
use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    // Stream connections are long lived; limit how often a client may open one.
    let stream_routes = Router::new()
        .route("/live/sse", get(stream::sse_handler))
        .route("/live/ws", get(stream::ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_connections));

    let api_routes = Router::new()
        .route("/health", get(state::health))
        .route("/state", get(state::get_state))
        .route("/stats", get(state::get_stats))
        .route("/ingest", post(ingest::ingest))
        .merge(stream_routes);

    Router::new()
        .nest("/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn limit_connections(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Err(err) = state.rate_limiter.check_rate_limit(&client) {
        tracing::warn!(client = %client, path = %request.uri().path(), "Connection rate limited");
        return Err(err);
    }
    Ok(next.run(request).await)
}
