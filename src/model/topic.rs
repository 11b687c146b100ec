use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed review taxonomy. Declaration order is the order used in prompts
/// and in the fuzzy pass of [`Topic::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Billing,
    Performance,
    Support,
    #[serde(rename = "UX")]
    Ux,
    Account,
    Other,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Billing,
        Topic::Performance,
        Topic::Support,
        Topic::Ux,
        Topic::Account,
        Topic::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Billing => "Billing",
            Topic::Performance => "Performance",
            Topic::Support => "Support",
            Topic::Ux => "UX",
            Topic::Account => "Account",
            Topic::Other => "Other",
        }
    }

    pub fn all_values() -> Vec<&'static str> {
        Self::ALL.iter().map(Topic::as_str).collect()
    }

    /// Maps free-form model output onto the taxonomy.
    ///
    /// Exact (case-insensitive) label match first, then the first label in
    /// declaration order that occurs inside the cleaned text. Anything else
    /// is `Other`.
    pub fn normalize(raw: &str) -> Topic {
        let cleaned = raw.trim().trim_end_matches('.').trim().to_lowercase();

        if let Some(topic) = Self::ALL
            .iter()
            .find(|topic| topic.as_str().to_lowercase() == cleaned)
        {
            return *topic;
        }

        Self::ALL
            .iter()
            .find(|topic| cleaned.contains(&topic.as_str().to_lowercase()))
            .copied()
            .unwrap_or(Topic::Other)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
