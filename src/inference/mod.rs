pub mod disabled;
#[cfg(feature = "llama-cpp")]
pub mod llama_cpp_service;
pub mod pipeline;
pub mod seq2seq;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

use std::{fmt, str::FromStr, sync::Arc};

use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    config::Settings,
    error::{InferenceError, LoadError},
};

use disabled::DisabledBackend;
use pipeline::PipelineBackend;
use seq2seq::Seq2SeqBackend;

/// Text generation capability behind the hybrid classifier.
///
/// Every variant loads lazily and at most once. `generate` blocks the calling
/// thread; async callers go through `spawn_blocking`.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Idempotent. After a failure the same error is returned on every call
    /// and no new attempt is made.
    fn load_model(&self) -> Result<(), LoadError>;

    fn is_loaded(&self) -> bool;

    /// How many `generate` calls can make progress at once. Callers never
    /// dispatch more than this, so queueing happens before the call starts.
    fn max_concurrency(&self) -> usize {
        1
    }

    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Seq2Seq,
    Pipeline,
    LlamaCpp,
    Disabled,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Seq2Seq => "seq2seq",
            BackendKind::Pipeline => "pipeline",
            BackendKind::LlamaCpp => "llama_cpp",
            BackendKind::Disabled => "none",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "seq2seq" | "t5" => Ok(BackendKind::Seq2Seq),
            "pipeline" => Ok(BackendKind::Pipeline),
            "llama_cpp" | "llama-cpp" | "llamacpp" | "gguf" => Ok(BackendKind::LlamaCpp),
            "none" | "disabled" | "keywords" | "off" => Ok(BackendKind::Disabled),
            other => Err(format!(
                "unknown model backend '{other}' (expected seq2seq, pipeline, llama_cpp or none)"
            )),
        }
    }
}

/// Builds the configured backend. Nothing is loaded yet.
pub fn build_backend(settings: &Settings) -> Arc<dyn InferenceBackend> {
    match settings.backend {
        BackendKind::Seq2Seq => Arc::new(Seq2SeqBackend::new(settings)),
        BackendKind::Pipeline => Arc::new(PipelineBackend::new(settings)),
        BackendKind::LlamaCpp => llama_backend(settings),
        BackendKind::Disabled => Arc::new(DisabledBackend::new()),
    }
}

#[cfg(feature = "llama-cpp")]
fn llama_backend(settings: &Settings) -> Arc<dyn InferenceBackend> {
    Arc::new(llama_cpp_service::LlamaCppBackend::new(settings))
}

#[cfg(not(feature = "llama-cpp"))]
fn llama_backend(_settings: &Settings) -> Arc<dyn InferenceBackend> {
    Arc::new(DisabledBackend::unsupported(
        "llama_cpp",
        "rebuild with the `llama-cpp` feature",
    ))
}

/// Loads the model on the blocking pool so the listener can start serving
/// keyword results immediately.
pub fn spawn_model_load(backend: Arc<dyn InferenceBackend>) -> JoinHandle<bool> {
    tokio::task::spawn_blocking(move || load_and_report(backend.as_ref()))
}

pub fn load_and_report(backend: &dyn InferenceBackend) -> bool {
    info!(backend = backend.name(), "loading model");
    match backend.load_model() {
        Ok(()) => {
            info!(backend = backend.name(), "model loaded");
            true
        }
        Err(err) => {
            warn!(
                backend = backend.name(),
                error = %err,
                "model unavailable, continuing with keyword classification"
            );
            false
        }
    }
}

/// One-shot load slot shared by the concrete backends.
pub(crate) struct LoadGate<T> {
    slot: OnceCell<Result<T, LoadError>>,
}

impl<T> LoadGate<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: OnceCell::new(),
        }
    }

    pub(crate) fn load_with(
        &self,
        load: impl FnOnce() -> Result<T, LoadError>,
    ) -> Result<(), LoadError> {
        match self.slot.get_or_init(load) {
            Ok(_) => Ok(()),
            Err(err) => Err(err.clone()),
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        matches!(self.slot.get(), Some(Ok(_)))
    }

    pub(crate) fn get(&self) -> Result<&T, InferenceError> {
        match self.slot.get() {
            Some(Ok(loaded)) => Ok(loaded),
            _ => Err(InferenceError::NotLoaded),
        }
    }
}

impl From<candle::Error> for InferenceError {
    fn from(err: candle::Error) -> Self {
        InferenceError::Model(err.to_string())
    }
}

/// Cuts generated text at the earliest stop sequence.
pub(crate) fn trim_at_stop<'a>(text: &'a str, stop_sequences: &[&str]) -> &'a str {
    let cut = stop_sequences
        .iter()
        .filter(|seq| !seq.is_empty())
        .filter_map(|seq| text.find(seq))
        .min()
        .unwrap_or(text.len());
    &text[..cut]
}

/// Removes sentencepiece / byte-level BPE space markers left by decoders.
pub(crate) fn tidy_decoded_text(text: &str) -> String {
    text.replace('\u{0120}', " ")
        .replace('\u{2581}', " ")
        .replace('\u{200b}', "")
}

/// Final shape of every backend's output: trimmed, non-empty.
pub(crate) fn finish_output(raw: &str, stop_sequences: &[&str]) -> Result<String, InferenceError> {
    let tidy = tidy_decoded_text(raw);
    let text = trim_at_stop(tidy.trim_start(), stop_sequences).trim();
    if text.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn gate_loads_once() {
        let gate = LoadGate::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            gate.load_with(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7u32)
            })
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(gate.is_loaded());
        assert_eq!(*gate.get().unwrap(), 7);
    }

    #[test]
    fn gate_remembers_failure() {
        let gate: LoadGate<u32> = LoadGate::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let err = gate
                .load_with(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(LoadError::Artifacts("missing tokenizer.json".into()))
                })
                .unwrap_err();
            assert_eq!(err, LoadError::Artifacts("missing tokenizer.json".into()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!gate.is_loaded());
        assert!(matches!(gate.get(), Err(InferenceError::NotLoaded)));
    }

    #[test]
    fn unloaded_gate_reports_not_loaded() {
        let gate: LoadGate<()> = LoadGate::new();
        assert!(!gate.is_loaded());
        assert!(matches!(gate.get(), Err(InferenceError::NotLoaded)));
    }

    #[test]
    fn parses_backend_names() {
        assert_eq!("seq2seq".parse::<BackendKind>(), Ok(BackendKind::Seq2Seq));
        assert_eq!(" Pipeline ".parse::<BackendKind>(), Ok(BackendKind::Pipeline));
        assert_eq!("llama-cpp".parse::<BackendKind>(), Ok(BackendKind::LlamaCpp));
        assert_eq!("none".parse::<BackendKind>(), Ok(BackendKind::Disabled));
        assert!("onnx".parse::<BackendKind>().is_err());
    }

    #[test]
    fn backend_name_round_trips() {
        for kind in [
            BackendKind::Seq2Seq,
            BackendKind::Pipeline,
            BackendKind::LlamaCpp,
            BackendKind::Disabled,
        ] {
            assert_eq!(kind.as_str().parse::<BackendKind>(), Ok(kind));
        }
    }

    #[test]
    fn trims_at_earliest_stop() {
        assert_eq!(trim_at_stop(" Billing\nInput: x", &["Input:", "\n"]), " Billing");
        assert_eq!(trim_at_stop("Support", &["\n"]), "Support");
    }

    #[test]
    fn finish_output_cleans_markers() {
        assert_eq!(
            finish_output("\u{2581}Performance\nInput:", &["\n"]).unwrap(),
            "Performance"
        );
        assert!(matches!(
            finish_output("\nInput: more", &["\n", "Input:"]),
            Err(InferenceError::EmptyOutput)
        ));
    }

    #[test]
    fn disabled_selection_never_loads() {
        let settings = Settings {
            backend: BackendKind::Disabled,
            ..Settings::default()
        };
        let backend = build_backend(&settings);
        assert_eq!(backend.name(), "none");
        assert_eq!(backend.load_model(), Err(LoadError::Disabled));
        assert!(!backend.is_loaded());
        assert!(!load_and_report(backend.as_ref()));
    }

    #[cfg(not(feature = "llama-cpp"))]
    #[test]
    fn llama_without_feature_is_unsupported() {
        let settings = Settings {
            backend: BackendKind::LlamaCpp,
            ..Settings::default()
        };
        let backend = build_backend(&settings);
        assert_eq!(backend.name(), "llama_cpp");
        assert!(matches!(
            backend.load_model(),
            Err(LoadError::Unsupported { backend: "llama_cpp", .. })
        ));
    }
}
