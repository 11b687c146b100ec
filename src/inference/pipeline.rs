use candle::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::phi3::{Config as Phi3Config, Model as Phi3Model};
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
    snapshot::{read_json, resolve_snapshot, select_device, ModelFiles},
    tidy_decoded_text, InferenceBackend, LoadGate,
};

const EOS_TOKENS: &[&str] = &["<|endoftext|>", "<|end|>", "</s>", "<eos>"];

/// Decoder-only text generation behind a single `run` call.
///
/// Only the continuation is returned; the prompt is never echoed back.
pub struct TextGenerationPipeline {
    model: Mutex<Phi3Model>,
    tokenizer: Tokenizer,
    device: Device,
    eos_ids: Vec<u32>,
    max_tokens: usize,
}

impl TextGenerationPipeline {
    pub fn load(files: &ModelFiles, device: Device, max_tokens: usize) -> Result<Self, LoadError> {
        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|err| {
            LoadError::Artifacts(format!(
                "tokenizer load failed ({}): {err}",
                files.tokenizer.display()
            ))
        })?;
        let config: Phi3Config = read_json(&files.config)?;

        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device) }
            .map_err(|err| LoadError::Model(format!("failed to map weights: {err}")))?;
        let model = Phi3Model::new(&config, vb)
            .map_err(|err| LoadError::Model(format!("phi3 init failed: {err}")))?;

        let eos_ids = EOS_TOKENS
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .collect();

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device,
            eos_ids,
            max_tokens,
        })
    }

    /// Greedy continuation of `prompt`, stopping at an end-of-sequence token,
    /// a stop sequence, or `max_new_tokens`.
    pub fn run(&self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|err| InferenceError::Tokenizer(err.to_string()))?;
        let mut tokens = keep_tail(encoding.get_ids(), self.max_tokens);
        let prompt_len = tokens.len();

        let mut model = self.model.lock();
        model.clear_kv_cache();

        let mut pos = 0usize;
        for _ in 0..max_new_tokens {
            // First step feeds the whole prompt, later steps only the last token.
            let ctx = if pos == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(ctx, &self.device)?.unsqueeze(0)?;

            let logits = model.forward(&input, pos)?;
            let seq_len = logits.dim(1)?;
            let logits = logits.i((0, seq_len - 1))?.to_dtype(DType::F32)?;
            pos += ctx.len();

            let next = argmax_u32(&logits)?;
            if self.eos_ids.contains(&next) {
                break;
            }
            tokens.push(next);

            if self.hit_stop_sequence(&tokens[prompt_len..])? {
                break;
            }
        }
        drop(model);

        debug!(
            prompt_tokens = prompt_len,
            generated = tokens.len() - prompt_len,
            "pipeline generation finished"
        );

        let text = self.decode(&tokens[prompt_len..])?;
        finish_output(&text, STOP_SEQUENCES)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, InferenceError> {
        if ids.is_empty() {
            return Ok(String::new());
        }
        self.tokenizer
            .decode(ids, true)
            .map(|text| tidy_decoded_text(&text))
            .map_err(|err| InferenceError::Tokenizer(err.to_string()))
    }

    fn hit_stop_sequence(&self, generated: &[u32]) -> Result<bool, InferenceError> {
        let text = self.decode(generated)?;
        let text = text.trim_start();
        Ok(!text.is_empty() && STOP_SEQUENCES.iter().any(|stop| text.contains(stop)))
    }
}

pub struct PipelineBackend {
    model_name: String,
    revision: String,
    device: String,
    max_tokens: usize,
    pipeline: LoadGate<TextGenerationPipeline>,
}

impl PipelineBackend {
    pub fn new(settings: &Settings) -> Self {
        Self {
            model_name: settings.model_name.clone(),
            revision: settings.model_revision.clone(),
            device: settings.model_device.clone(),
            max_tokens: settings.max_tokens,
            pipeline: LoadGate::new(),
        }
    }

    fn load_pipeline(&self) -> Result<TextGenerationPipeline, LoadError> {
        let files = resolve_snapshot(&self.model_name, &self.revision)?;
        let device = select_device(&self.device)?;
        info!(
            model = %self.model_name,
            shards = files.weights.len(),
            device = ?device,
            "loading text generation pipeline"
        );
        TextGenerationPipeline::load(&files, device, self.max_tokens)
    }
}

impl InferenceBackend for PipelineBackend {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn load_model(&self) -> Result<(), LoadError> {
        self.pipeline.load_with(|| self.load_pipeline())
    }

    fn is_loaded(&self) -> bool {
        self.pipeline.is_loaded()
    }

    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError> {
        self.pipeline.get()?.run(prompt, max_new_tokens)
    }
}

/// Keeps the last `max_tokens` prompt tokens so the trailing cue survives.
fn keep_tail(ids: &[u32], max_tokens: usize) -> Vec<u32> {
    if max_tokens == 0 || ids.len() <= max_tokens {
        return ids.to_vec();
    }
    ids[ids.len() - max_tokens..].to_vec()
}

fn argmax_u32(logits: &Tensor) -> Result<u32, InferenceError> {
    let values = logits.flatten_all()?.to_vec1::<f32>()?;
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, &val)| match best {
            Some((_, max)) if max >= val => best,
            _ => Some((idx, val)),
        })
        .map(|(idx, _)| idx as u32)
        .ok_or(InferenceError::EmptyOutput)
}
