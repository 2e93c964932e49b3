use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use types::analysis::RiskAnalysis;
use types::ids::OrderId;
use types::order::Order;

use super::error::AppError;
use super::AppState;
use crate::feed::FEED_SYMBOL;
use crate::{SERVICE_NAME, SERVICE_VERSION};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub counters: BTreeMap<String, u64>,
    pub current_price: f64,
    pub volatility: f64,
    pub users_tracked: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilityResponse {
    pub symbol: &'static str,
    pub current_price: f64,
    pub volatility: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub pending: u64,
}

/// GET /health
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        timestamp: Utc::now(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        counters: state.metrics.export(),
        current_price: state.engine.current_price(),
        volatility: state.engine.current_volatility(),
        users_tracked: state.tracker.user_count(),
    })
}

/// GET /volatility
pub async fn volatility(State(state): State<AppState>) -> Json<VolatilityResponse> {
    Json(VolatilityResponse {
        symbol: FEED_SYMBOL,
        current_price: state.engine.current_price(),
        volatility: state.engine.current_volatility(),
        last_update: state.engine.last_update(),
    })
}

/// GET /analysis/:order_id
pub async fn analysis(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<RiskAnalysis>, AppError> {
    let stored = state
        .store
        .get(&OrderId::new(order_id.clone()))
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    stored
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no analysis for order {order_id}")))
}

/// GET /pending
pub async fn pending(State(state): State<AppState>) -> Json<PendingResponse> {
    let pending = match state.store.pending_count().await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "pending count unavailable");
            0
        }
    };
    Json(PendingResponse { pending })
}

/// POST /analyze: score a raw field map without going through the
/// stream. Same dual-format parse as stream messages; bare JSON
/// numbers are tolerated alongside the canonical string values.
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<HashMap<String, serde_json::Value>>,
) -> Result<Json<RiskAnalysis>, AppError> {
    let fields: HashMap<String, String> = body
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    let order =
        Order::from_stream_fields(&fields).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let analysis = state.scorer.analyze(&order).await;
    state
        .metrics
        .record_analysis(analysis.verdict, analysis.processing_time_ms);
    Ok(Json(analysis))
}
