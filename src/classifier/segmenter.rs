use once_cell::sync::Lazy;
use regex::Regex;

// Terminal punctuation followed by at least one whitespace character.
static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("invalid sentence boundary pattern"));

/// Splits review text into trimmed sentences, keeping terminal punctuation
/// with the sentence it ends.
pub fn segment(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        // The punctuation mark is a single ASCII byte.
        let end = boundary.start() + 1;
        push_sentence(&text[start..end], &mut sentences);
        start = boundary.end();
    }

    push_sentence(&text[start..], &mut sentences);
    sentences
}

fn push_sentence(fragment: &str, sentences: &mut Vec<String>) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}
