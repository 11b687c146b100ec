use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    model::{ReviewAnalysis, Topic},
};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SentenceResult {
    pub index: usize,
    pub text: String,
    pub topic: Topic,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub sentences: Vec<SentenceResult>,
}

impl From<&ReviewAnalysis> for AnalyzeResponse {
    fn from(analysis: &ReviewAnalysis) -> Self {
        Self {
            sentences: analysis
                .sentences()
                .iter()
                .map(|s| SentenceResult {
                    index: s.index(),
                    text: s.text().to_string(),
                    topic: s.topic(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_name: String,
    pub backend: &'static str,
    pub cache_entries: usize,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub health: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub details: String,
}

/// Rejected request, rendered as `400 {message, details}`.
#[derive(Debug)]
pub struct ApiError(pub ValidationError);

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            message: "invalid review text".into(),
            details: self.0.to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}
