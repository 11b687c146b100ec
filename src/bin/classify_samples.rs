use std::env;

use anyhow::Result;

use review_topics::{
    classifier::HybridClassifier,
    config::Settings,
    inference::{build_backend, load_and_report},
    logging::init_tracing,
};

const SAMPLES: &[&str] = &[
    "The app keeps crashing after the last update.",
    "I was charged twice this month.",
    "Overall the idea is good.",
];

/// Classifies each argument (or a few built-in sentences) with the
/// configured backend and prints the topic and the branch that decided it.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    init_tracing(settings.log_filter());

    let backend = build_backend(&settings);
    let probe = backend.clone();
    tokio::task::spawn_blocking(move || load_and_report(probe.as_ref())).await?;

    let classifier = HybridClassifier::from_settings(backend, &settings);

    let args: Vec<String> = env::args().skip(1).collect();
    let inputs: Vec<&str> = if args.is_empty() {
        SAMPLES.to_vec()
    } else {
        args.iter().map(String::as_str).collect()
    };

    for text in inputs {
        let (topic, path) = classifier.classify_sentence_traced(text).await;
        println!("{topic:<12} [{path}] {text}");
    }
    Ok(())
}
