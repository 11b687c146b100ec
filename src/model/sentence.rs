use serde::Serialize;

use crate::{error::ValidationError, model::topic::Topic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sentence {
    index: usize,
    text: String,
    topic: Topic,
}

impl Sentence {
    pub fn new(index: usize, text: &str, topic: Topic) -> Result<Self, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptySentence);
        }

        Ok(Self {
            index,
            text: text.to_string(),
            topic,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Classified sentences of one review, in segmentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewAnalysis {
    sentences: Vec<Sentence>,
}

impl ReviewAnalysis {
    pub fn new(sentences: Vec<Sentence>) -> Self {
        Self { sentences }
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}
