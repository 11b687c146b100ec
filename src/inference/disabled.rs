use crate::error::{InferenceError, LoadError};

use super::InferenceBackend;

/// Backend that never loads. The classifier runs on keywords alone.
pub struct DisabledBackend {
    name: &'static str,
    reason: LoadError,
}

impl DisabledBackend {
    pub fn new() -> Self {
        Self {
            name: "none",
            reason: LoadError::Disabled,
        }
    }

    /// Stand-in for a backend that was configured but compiled out.
    pub fn unsupported(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            reason: LoadError::Unsupported {
                backend: name,
                reason: reason.into(),
            },
        }
    }
}

impl Default for DisabledBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn load_model(&self) -> Result<(), LoadError> {
        Err(self.reason.clone())
    }

    fn is_loaded(&self) -> bool {
        false
    }

    fn generate(&self, _prompt: &str, _max_new_tokens: usize) -> Result<String, InferenceError> {
        Err(InferenceError::NotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_always_not_loaded() {
        let backend = DisabledBackend::new();
        assert!(backend.load_model().is_err());
        assert!(matches!(
            backend.generate("Topic:", 10),
            Err(InferenceError::NotLoaded)
        ));
    }

    #[test]
    fn unsupported_keeps_configured_name() {
        let backend = DisabledBackend::unsupported("llama_cpp", "not compiled in");
        assert_eq!(backend.name(), "llama_cpp");
        assert_eq!(
            backend.load_model(),
            Err(LoadError::Unsupported {
                backend: "llama_cpp",
                reason: "not compiled in".into()
            })
        );
    }
}
