use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use review_topics::{
    api::{app, AppState},
    cache::ResultCache,
    classifier::HybridClassifier,
    config::Settings,
    error::{InferenceError, LoadError},
    inference::{disabled::DisabledBackend, BackendKind, InferenceBackend},
    service::ReviewService,
};

/// Loaded backend that answers every prompt with the same label.
struct FixedAnswer(&'static str);

impl InferenceBackend for FixedAnswer {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn load_model(&self) -> Result<(), LoadError> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn generate(&self, _prompt: &str, _max_new_tokens: usize) -> Result<String, InferenceError> {
        Ok(self.0.to_string())
    }
}

fn router_with(backend: Arc<dyn InferenceBackend>, settings: Settings) -> Router {
    let classifier = HybridClassifier::from_settings(backend.clone(), &settings);
    let service = ReviewService::new(
        classifier,
        ResultCache::new(settings.cache_max_entries),
        settings.max_text_length,
    );
    app(AppState {
        service: Arc::new(service),
        backend,
        settings: Arc::new(settings),
    })
}

fn keyword_router() -> Router {
    let settings = Settings {
        backend: BackendKind::Disabled,
        ..Settings::default()
    };
    router_with(Arc::new(DisabledBackend::new()), settings)
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn analyze_splits_and_classifies() {
    let (status, body) = send(
        keyword_router(),
        post_json(
            "/api/v1/analyze",
            json!({ "text": "The app crashes frequently. Customer support was helpful." }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "sentences": [
                { "index": 0, "text": "The app crashes frequently.", "topic": "Performance" },
                { "index": 1, "text": "Customer support was helpful.", "topic": "Support" }
            ]
        })
    );
}

#[tokio::test]
async fn unprefixed_alias_still_works() {
    let (status, body) = send(
        keyword_router(),
        post_json("/analyze", json!({ "text": "Cannot log in, password rejected." })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sentences"][0]["topic"], "Account");
}

#[tokio::test]
async fn model_labels_reach_the_response() {
    let settings = Settings::default();
    let router = router_with(Arc::new(FixedAnswer("UX")), settings);
    let (status, body) = send(
        router,
        post_json("/api/v1/analyze", json!({ "text": "I was charged twice." })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sentences"][0]["topic"], "UX");
}

#[tokio::test]
async fn blank_text_is_a_bad_request() {
    let (status, body) = send(
        keyword_router(),
        post_json("/api/v1/analyze", json!({ "text": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    assert!(body["details"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn oversized_text_is_a_bad_request() {
    let settings = Settings {
        backend: BackendKind::Disabled,
        max_text_length: 20,
        ..Settings::default()
    };
    let router = router_with(Arc::new(DisabledBackend::new()), settings);
    let (status, _) = send(
        router,
        post_json("/api/v1/analyze", json!({ "text": "x".repeat(21) })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_backend_state() {
    let (status, body) = send(keyword_router(), get("/api/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["backend"], "none");
    assert_eq!(body["cache_entries"], 0);
}

#[tokio::test]
async fn root_describes_the_service() {
    let (status, body) = send(keyword_router(), get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Customer Review Analysis API");
    assert_eq!(body["health"], "/api/v1/health");
}
