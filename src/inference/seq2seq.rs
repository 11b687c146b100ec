use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    generation::LogitsProcessor,
    models::t5::{Config as T5Config, T5ForConditionalGeneration},
};
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    config::Settings,
    error::{InferenceError, LoadError},
    prompts::STOP_SEQUENCES,
};

use super::{
    finish_output,
    snapshot::{read_json, resolve_snapshot, select_device},
    InferenceBackend, LoadGate,
};

/// Encoder-decoder text-to-text model (flan-t5 family).
pub struct Seq2SeqBackend {
    model_name: String,
    revision: String,
    device: String,
    max_tokens: usize,
    runtime: LoadGate<T5Runtime>,
}

struct T5Runtime {
    model: Mutex<T5ForConditionalGeneration>,
    tokenizer: Tokenizer,
    config: T5Config,
    device: Device,
}

impl Seq2SeqBackend {
    pub fn new(settings: &Settings) -> Self {
        Self {
            model_name: settings.model_name.clone(),
            revision: settings.model_revision.clone(),
            device: settings.model_device.clone(),
            max_tokens: settings.max_tokens,
            runtime: LoadGate::new(),
        }
    }

    fn load_runtime(&self) -> Result<T5Runtime, LoadError> {
        let files = resolve_snapshot(&self.model_name, &self.revision)?;
        let device = select_device(&self.device)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|err| {
            LoadError::Artifacts(format!(
                "tokenizer load failed ({}): {err}",
                files.tokenizer.display()
            ))
        })?;
        let config: T5Config = read_json(&files.config)?;

        // T5 is numerically unstable in f16; stay in f32 on every device.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, DType::F32, &device) }
            .map_err(|err| LoadError::Model(format!("failed to map weights: {err}")))?;
        let model = T5ForConditionalGeneration::load(vb, &config)
            .map_err(|err| LoadError::Model(format!("t5 init failed: {err}")))?;

        info!(
            model = %self.model_name,
            revision = %self.revision,
            device = ?device,
            "seq2seq model ready"
        );

        Ok(T5Runtime {
            model: Mutex::new(model),
            tokenizer,
            config,
            device,
        })
    }
}

impl InferenceBackend for Seq2SeqBackend {
    fn name(&self) -> &'static str {
        "seq2seq"
    }

    fn load_model(&self) -> Result<(), LoadError> {
        self.runtime.load_with(|| self.load_runtime())
    }

    fn is_loaded(&self) -> bool {
        self.runtime.is_loaded()
    }

    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError> {
        self.runtime.get()?.generate(prompt, max_new_tokens, self.max_tokens)
    }
}

impl T5Runtime {
    fn generate(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        max_tokens: usize,
    ) -> Result<String, InferenceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|err| InferenceError::Tokenizer(err.to_string()))?;
        let input_ids = truncate_keeping_last(encoding.get_ids(), max_tokens);
        let input = Tensor::new(input_ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let start = self
            .config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32;
        let eos = self.config.eos_token_id as u32;
        let mut output = vec![start];
        // Seed is irrelevant without temperature: sampling is argmax.
        let mut logits_processor = LogitsProcessor::new(0, None, None);

        let mut model = self.model.lock();
        model.clear_kv_cache();
        let encoder_output = model.encode(&input)?;

        for step in 0..max_new_tokens {
            let decoder_input = if step == 0 || !self.config.use_cache {
                Tensor::new(output.as_slice(), &self.device)?.unsqueeze(0)?
            } else {
                let last = output[output.len() - 1];
                Tensor::new(&[last], &self.device)?.unsqueeze(0)?
            };
            let logits = model.decode(&decoder_input, &encoder_output)?.squeeze(0)?;
            let next = logits_processor.sample(&logits)?;
            if next == eos {
                break;
            }
            output.push(next);
        }
        drop(model);

        debug!(
            prompt_tokens = input_ids.len(),
            generated = output.len() - 1,
            "seq2seq generation finished"
        );

        let text = self
            .tokenizer
            .decode(&output[1..], true)
            .map_err(|err| InferenceError::Tokenizer(err.to_string()))?;
        finish_output(&text, STOP_SEQUENCES)
    }
}

/// Caps the encoder input at `max_tokens` while keeping the final token, which
/// is the end-of-sequence marker the tokenizer appends.
fn truncate_keeping_last(ids: &[u32], max_tokens: usize) -> Vec<u32> {
    if max_tokens == 0 || ids.len() <= max_tokens {
        return ids.to_vec();
    }
    let mut truncated = ids[..max_tokens - 1].to_vec();
    truncated.extend(ids.last().copied());
    truncated
}
