use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::{
    config::Settings,
    inference::{BackendKind, InferenceBackend},
    service::ReviewService,
};

pub mod handlers;
pub mod types;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReviewService>,
    pub backend: Arc<dyn InferenceBackend>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Model identifier reported by `/health`.
    fn model_label(&self) -> String {
        match self.settings.backend {
            BackendKind::LlamaCpp => self.settings.model_path.display().to_string(),
            BackendKind::Disabled => "none".into(),
            _ => self.settings.model_name.clone(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let prefix = state.settings.api_prefix.clone();
    let cors = cors_layer(&state.settings.cors_origins);

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route(&format!("{prefix}/analyze"), post(handlers::analyze))
        .route(&format!("{prefix}/health"), get(handlers::health));

    // Unprefixed aliases for older clients.
    if !prefix.is_empty() {
        router = router
            .route("/analyze", post(handlers::analyze))
            .route("/health", get(handlers::health));
    }

    router.layer(cors).with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
