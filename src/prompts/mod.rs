use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::model::Topic;

// NOTE:
// The few-shot template is shared by every backend. Backends only decide how
// the prompt becomes text, never what the prompt says.

/// Generation stops at the first of these; the model is expected to emit a
/// single topic word after the cue.
pub const STOP_SEQUENCES: &[&str] = &["\n", "Input:"];

const TOPICS_PLACEHOLDER: &str = "{topics}";

#[derive(Deserialize)]
struct PromptFile {
    instruction: String,
    examples: Vec<FewShotExample>,
    input_label: String,
    cue: String,
}

#[derive(Deserialize)]
struct FewShotExample {
    input: String,
    topic: Topic,
}

macro_rules! prompt_file {
    ($lang:literal) => {
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/lang/",
            $lang,
            "/topic_prompt.json"
        ))
    };
}

static TOPIC_PROMPT: Lazy<PromptFile> = Lazy::new(|| load_prompt_file(prompt_file!("en")));

fn load_prompt_file(raw: &str) -> PromptFile {
    serde_json::from_str(raw).expect("invalid topic prompt config")
}

/// Few-shot classification prompt ending in the cue the model completes.
pub fn build_topic_prompt(text: &str) -> String {
    let template = &*TOPIC_PROMPT;
    let topics = Topic::all_values().join(", ");

    let mut prompt = template.instruction.replace(TOPICS_PLACEHOLDER, &topics);
    prompt.push_str("\n\n");

    for example in &template.examples {
        push_line(&mut prompt, &template.input_label, &example.input);
        push_line(&mut prompt, &template.cue, example.topic.as_str());
    }

    push_line(&mut prompt, &template.input_label, text.trim());
    prompt.push_str(&template.cue);
    prompt
}

fn push_line(prompt: &mut String, label: &str, value: &str) {
    prompt.push_str(label);
    prompt.push(' ');
    prompt.push_str(value);
    prompt.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_matches_few_shot_layout() {
        let prompt = build_topic_prompt("Refunds take forever.");
        let expected = "Classify review sentences into: Billing, Performance, Support, UX, Account, Other.\n\
                        \n\
                        Input: The screen is frozen.\n\
                        Topic: Performance\n\
                        Input: I was charged double.\n\
                        Topic: Billing\n\
                        Input: The button is hard to find.\n\
                        Topic: UX\n\
                        Input: Refunds take forever.\n\
                        Topic:";
        assert_eq!(prompt, expected);
    }

    #[test]
    fn prompt_ends_with_cue() {
        assert!(build_topic_prompt("anything").ends_with("Topic:"));
    }

    #[test]
    fn examples_use_known_topics() {
        assert!(TOPIC_PROMPT.examples.len() >= 2);
        assert!(TOPIC_PROMPT
            .examples
            .iter()
            .all(|example| Topic::ALL.contains(&example.topic)));
    }
}
