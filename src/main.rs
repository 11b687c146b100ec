use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use review_topics::{
    api::{self, AppState},
    cache::ResultCache,
    classifier::HybridClassifier,
    config::Settings,
    inference::{build_backend, spawn_model_load},
    logging::init_tracing,
    service::ReviewService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().context("failed to read configuration")?;
    init_tracing(settings.log_filter());

    info!(
        app = %settings.app_name,
        version = %settings.app_version,
        backend = %settings.backend,
        "starting review topic service"
    );

    // -----------------------------
    // Classification stack
    // -----------------------------
    let backend = build_backend(&settings);
    // Requests are served with keyword rules until this finishes.
    let _model_load = spawn_model_load(backend.clone());

    let classifier = HybridClassifier::from_settings(backend.clone(), &settings);
    let cache = ResultCache::new(settings.cache_max_entries);
    let service = Arc::new(ReviewService::new(
        classifier,
        cache,
        settings.max_text_length,
    ));

    let settings = Arc::new(settings);
    let state = AppState {
        service,
        backend,
        settings: settings.clone(),
    };

    // -----------------------------
    // Router
    // -----------------------------
    let app = api::app(state);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    info!(
        addr = %settings.bind_addr,
        analyze = %format!("{}/analyze", settings.api_prefix),
        "HTTP listening"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
