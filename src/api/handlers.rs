use axum::{extract::State, Json};
use tracing::info;

use crate::api::{
    types::{AnalyzeRequest, AnalyzeResponse, ApiError, HealthResponse, ServiceInfo},
    AppState,
};

pub async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let analysis = state.service.analyze(&req.text).await?;
    info!(
        chars = req.text.chars().count(),
        sentences = analysis.len(),
        "review analyzed"
    );
    Ok(Json(AnalyzeResponse::from(analysis.as_ref())))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.backend.is_loaded(),
        model_name: state.model_label(),
        backend: state.backend.name(),
        cache_entries: state.service.cache().len(),
    })
}

pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: state.settings.app_name.clone(),
        version: state.settings.app_version.clone(),
        health: format!("{}/health", state.settings.api_prefix),
    })
}
