//! Read-only introspection surface. The core never writes through this API —
//! it only exposes what the scheduler/collector/detector have already
//! persisted, for operators and dashboards.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::error::AppError;
use crate::store::Store;
use crate::types::{MarketDescriptor, Tick};

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/streams", get(get_streams))
        .route("/streams/:market_id/ticks", get(get_stream_ticks))
        .route("/alerts/recent", get(get_recent_alerts))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub streams: usize,
}

#[derive(Serialize)]
pub struct AlertResponse {
    pub market_id: i64,
    pub last_alert_at: Option<i64>,
    pub last_alert_hash: Option<String>,
}

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let streams = state.store.list_streams().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: state.health.uptime_secs(),
        streams: streams.len(),
    }))
}

async fn get_streams(State(state): State<ApiState>) -> Result<Json<Vec<MarketDescriptor>>, AppError> {
    Ok(Json(state.store.list_streams().await?))
}

async fn get_stream_ticks(
    State(state): State<ApiState>,
    Path(market_id): Path<i64>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<Tick>>, AppError> {
    let limit = params.limit.unwrap_or(120);
    Ok(Json(state.store.recent_raw_ticks(market_id, limit).await?))
}

async fn get_recent_alerts(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<AlertResponse>>, AppError> {
    let limit = params.limit.unwrap_or(50);
    let rows = state.store.recent_alerts(limit).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(market_id, last_alert_at, last_alert_hash)| AlertResponse {
                market_id,
                last_alert_at,
                last_alert_hash,
            })
            .collect(),
    ))
}
