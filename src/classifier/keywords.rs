use crate::model::Topic;

const PERFORMANCE_KEYWORDS: &[&str] = &["crash", "slow", "lag", "freeze", "hang", "performance"];
const BILLING_KEYWORDS: &[&str] = &["bill", "charg", "refund", "payment", "price", "cost"];
const SUPPORT_KEYWORDS: &[&str] = &["support", "help", "service", "assist", "response"];
const ACCOUNT_KEYWORDS: &[&str] = &["login", "password", "sign in", "account", "auth"];
const UX_KEYWORDS: &[&str] = &[
    "button",
    "ui",
    "interface",
    "design",
    "confusing",
    "hard to find",
];

// Evaluated top to bottom; the first category with a hit wins.
const RULES: [(Topic, &[&str]); 5] = [
    (Topic::Performance, PERFORMANCE_KEYWORDS),
    (Topic::Billing, BILLING_KEYWORDS),
    (Topic::Support, SUPPORT_KEYWORDS),
    (Topic::Account, ACCOUNT_KEYWORDS),
    (Topic::Ux, UX_KEYWORDS),
];

/// Substring heuristic used before, and instead of, model inference.
pub fn classify(text: &str) -> Topic {
    let normalized = text.to_lowercase();

    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| normalized.contains(kw)))
        .map(|(topic, _)| *topic)
        .unwrap_or(Topic::Other)
}
