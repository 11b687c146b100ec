use std::sync::Arc;

use tracing::debug;

use crate::{
    cache::ResultCache, classifier::HybridClassifier, error::ValidationError,
    model::ReviewAnalysis,
};

/// Request-level entry point: validation, cache, classification.
pub struct ReviewService {
    classifier: HybridClassifier,
    cache: ResultCache,
    max_text_length: usize,
}

impl ReviewService {
    pub fn new(classifier: HybridClassifier, cache: ResultCache, max_text_length: usize) -> Self {
        Self {
            classifier,
            cache,
            max_text_length,
        }
    }

    pub async fn analyze(&self, text: &str) -> Result<Arc<ReviewAnalysis>, ValidationError> {
        let len = text.chars().count();
        if len > self.max_text_length {
            return Err(ValidationError::TooLong {
                len,
                max: self.max_text_length,
            });
        }

        if let Some(hit) = self.cache.get(text) {
            debug!(sentences = hit.len(), "analysis cache hit");
            return Ok(hit);
        }

        let analysis = self.classifier.analyze_review(text).await?;
        Ok(self.cache.put(text, Arc::new(analysis)))
    }

    pub fn classifier(&self) -> &HybridClassifier {
        &self.classifier
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }
}
