use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::AppState;
use crate::database::{self, PoolStats};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub gateways: Vec<String>,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database = match &state.pool {
        Some(pool) => match database::health_check(pool).await {
            Ok(()) => "ok",
            Err(_) => "unavailable",
        },
        None => "in_memory",
    };
    let healthy = database != "unavailable";

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version,
        environment: state.environment.clone(),
        gateways: state
            .orchestrator
            .registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        database: database.to_string(),
        pool: state.pool.as_ref().map(database::get_pool_stats),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
