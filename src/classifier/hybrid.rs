use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    classifier::{keywords, segmenter},
    config::Settings,
    error::{InferenceError, ValidationError},
    inference::InferenceBackend,
    model::{ReviewAnalysis, Sentence, Topic},
    prompts::build_topic_prompt,
};

/// Which branch produced a sentence's topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationPath {
    /// No model loaded; keyword rules decided.
    Keyword,
    /// Model output, normalized onto the taxonomy.
    Model,
    /// Model was loaded but the call failed; keyword rules decided.
    Fallback,
}

impl fmt::Display for ClassificationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClassificationPath::Keyword => "keyword",
            ClassificationPath::Model => "model",
            ClassificationPath::Fallback => "fallback",
        })
    }
}

/// Keyword rules backed by an optional model. Never fails a sentence.
///
/// Model calls are admitted up to the backend's concurrency; waiting for
/// admission does not count against the inference timeout.
#[derive(Clone)]
pub struct HybridClassifier {
    backend: Arc<dyn InferenceBackend>,
    slots: Arc<Semaphore>,
    max_new_tokens: usize,
    timeout: Option<Duration>,
}

impl HybridClassifier {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        max_new_tokens: usize,
        timeout: Option<Duration>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(backend.max_concurrency().max(1)));
        Self {
            backend,
            slots,
            max_new_tokens,
            timeout,
        }
    }

    pub fn from_settings(backend: Arc<dyn InferenceBackend>, settings: &Settings) -> Self {
        Self::new(backend, settings.max_new_tokens, settings.inference_timeout)
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    pub async fn classify_sentence(&self, text: &str) -> Topic {
        self.classify_sentence_traced(text).await.0
    }

    pub async fn classify_sentence_traced(&self, text: &str) -> (Topic, ClassificationPath) {
        let keyword_topic = keywords::classify(text);
        if !self.backend.is_loaded() {
            return (keyword_topic, ClassificationPath::Keyword);
        }

        match self.run_inference(build_topic_prompt(text)).await {
            Ok(raw) => {
                let topic = Topic::normalize(&raw);
                debug!(raw = %raw, topic = %topic, "model classified sentence");
                (topic, ClassificationPath::Model)
            }
            Err(err) => {
                warn!(
                    backend = self.backend.name(),
                    error = %err,
                    fallback = %keyword_topic,
                    "inference failed, using keyword topic"
                );
                (keyword_topic, ClassificationPath::Fallback)
            }
        }
    }

    async fn run_inference(&self, prompt: String) -> Result<String, InferenceError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|err| InferenceError::Worker(err.to_string()))?;

        let backend = Arc::clone(&self.backend);
        let max_new_tokens = self.max_new_tokens;
        let abandoned = Arc::new(AtomicBool::new(false));
        let worker_abandoned = Arc::clone(&abandoned);

        // The permit travels with the worker, so a timed-out call keeps its
        // slot until the backend is actually free again.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            if worker_abandoned.load(Ordering::SeqCst) {
                return Err(InferenceError::Worker("caller gave up before start".into()));
            }
            backend.generate(&prompt, max_new_tokens)
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abandoned.store(true, Ordering::SeqCst);
                    return Err(InferenceError::Timeout(limit));
                }
            },
            None => task.await,
        };

        joined.map_err(|err| InferenceError::Worker(err.to_string()))?
    }

    /// Segments `text` and classifies every sentence concurrently.
    pub async fn analyze_review(&self, text: &str) -> Result<ReviewAnalysis, ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }

        let parts = segmenter::segment(text);
        let topics = join_all(parts.iter().map(|part| self.classify_sentence(part))).await;

        let sentences = parts
            .iter()
            .zip(topics)
            .enumerate()
            .map(|(index, (part, topic))| Sentence::new(index, part, topic))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(sentences = sentences.len(), "review analyzed");
        Ok(ReviewAnalysis::new(sentences))
    }
}
