use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::application::render::PoolStats;
use crate::infra::http::HttpState;

const SERVICE_NAME: &str = "pdfsmith";

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime: f64,
    pub timestamp: String,
    pub pool: PoolStats,
    pub worker_connected: bool,
}

pub async fn index() -> impl IntoResponse {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let executor = state.documents.executor();
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    Json(HealthReport {
        status: "ok",
        uptime: state.started_at.elapsed().as_secs_f64(),
        timestamp,
        pool: executor.stats(),
        worker_connected: executor.worker_connected(),
    })
}
