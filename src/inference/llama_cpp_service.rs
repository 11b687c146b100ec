use std::{
    collections::VecDeque,
    ffi::CString,
    os::raw::c_char,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::{
    config::Settings,
    error::{InferenceError, LoadError},
    prompts::STOP_SEQUENCES,
};

use super::{finish_output, InferenceBackend, LoadGate};

#[allow(
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    dead_code,
    clippy::all
)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/llama_bindings.rs"));
}

const N_BATCH: i32 = 512;

// BOS is added, but markup inside review text stays plain text.
const ADD_SPECIAL: bool = true;
const PARSE_SPECIAL: bool = false;

static BACKEND_ONCE: OnceLock<()> = OnceLock::new();
static BACKEND_USERS: AtomicUsize = AtomicUsize::new(0);

fn init_backend() {
    BACKEND_ONCE.get_or_init(|| unsafe {
        ffi::llama_backend_init();
    });
    BACKEND_USERS.fetch_add(1, Ordering::SeqCst);
}

fn shutdown_backend() {
    if BACKEND_USERS.fetch_sub(1, Ordering::SeqCst) == 1 {
        unsafe {
            ffi::llama_backend_free();
        }
    }
}

/// Quantized GGUF model served through llama.cpp.
pub struct LlamaCppBackend {
    model_path: PathBuf,
    max_tokens: usize,
    max_new_tokens: usize,
    gpu_layers: Option<i32>,
    threads: Option<i32>,
    pool_size: usize,
    pool: LoadGate<ContextPool>,
}

impl LlamaCppBackend {
    pub fn new(settings: &Settings) -> Self {
        Self {
            model_path: settings.model_path.clone(),
            max_tokens: settings.max_tokens,
            max_new_tokens: settings.max_new_tokens,
            gpu_layers: settings.llama_gpu_layers,
            threads: settings.llama_threads,
            pool_size: settings.llama_pool_size,
            pool: LoadGate::new(),
        }
    }

    fn load_pool(&self) -> Result<ContextPool, LoadError> {
        let ctx_length = context_length(self.max_tokens, self.max_new_tokens)?;
        let path = self.model_path.as_path();
        if !path.exists() {
            return Err(LoadError::Artifacts(format!(
                "GGUF model not found at {}",
                path.display()
            )));
        }
        if self.pool_size == 0 {
            return Err(LoadError::Model(
                "context pool size must be at least 1".into(),
            ));
        }

        let shared = SharedModel::load(path, self.gpu_layers, self.max_tokens)?;
        let threads = self
            .threads
            .unwrap_or_else(|| num_cpus::get_physical() as i32);

        let contexts = (0..self.pool_size)
            .map(|_| LlamaContext::create(shared.clone(), ctx_length, threads))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            model = %path.display(),
            ctx = ctx_length,
            threads,
            gpu_layers = ?self.gpu_layers,
            pool = self.pool_size,
            "llama.cpp model ready"
        );
        Ok(ContextPool::new(contexts))
    }
}

impl InferenceBackend for LlamaCppBackend {
    fn name(&self) -> &'static str {
        "llama_cpp"
    }

    fn load_model(&self) -> Result<(), LoadError> {
        self.pool.load_with(|| self.load_pool())
    }

    fn is_loaded(&self) -> bool {
        self.pool.is_loaded()
    }

    fn max_concurrency(&self) -> usize {
        self.pool_size.max(1)
    }

    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError> {
        let pool = self.pool.get()?;
        let lease = pool.checkout();
        lease.run(prompt, max_new_tokens)
    }
}

struct SharedModel {
    model: *mut ffi::llama_model,
    vocab: *const ffi::llama_vocab,
    eos_token: ffi::llama_token,
    max_prompt_tokens: usize,
}

impl SharedModel {
    fn load(
        path: &Path,
        gpu_layers: Option<i32>,
        max_prompt_tokens: usize,
    ) -> Result<Arc<Self>, LoadError> {
        let path_cstr = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| LoadError::Artifacts("model path contains interior null byte".into()))?;

        init_backend();

        let mut model_params = unsafe { ffi::llama_model_default_params() };
        model_params.n_gpu_layers = gpu_layers.unwrap_or(0);
        model_params.main_gpu = 0;
        model_params.use_mmap = true;

        let model = unsafe { ffi::llama_model_load_from_file(path_cstr.as_ptr(), model_params) };
        if model.is_null() {
            shutdown_backend();
            return Err(LoadError::Model(format!(
                "failed to load model from {}",
                path.display()
            )));
        }

        let vocab = unsafe { ffi::llama_model_get_vocab(model) };
        if vocab.is_null() {
            unsafe {
                ffi::llama_model_free(model);
            }
            shutdown_backend();
            return Err(LoadError::Model("model vocabulary unavailable".into()));
        }

        Ok(Arc::new(Self {
            model,
            vocab,
            eos_token: unsafe { ffi::llama_vocab_eos(vocab) },
            max_prompt_tokens,
        }))
    }
}

impl Drop for SharedModel {
    fn drop(&mut self) {
        unsafe {
            if !self.model.is_null() {
                ffi::llama_model_free(self.model);
            }
        }
        shutdown_backend();
    }
}

struct LlamaContext {
    shared: Arc<SharedModel>,
    ctx: *mut ffi::llama_context,
    sampler: *mut ffi::llama_sampler,
    n_past: i32,
}

// Contexts are only touched while checked out of the pool.
unsafe impl Send for LlamaContext {}
unsafe impl Sync for LlamaContext {}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        unsafe {
            if !self.sampler.is_null() {
                ffi::llama_sampler_free(self.sampler);
            }
            if !self.ctx.is_null() {
                ffi::llama_free(self.ctx);
            }
        }
    }
}

impl LlamaContext {
    fn create(shared: Arc<SharedModel>, ctx_length: u32, threads: i32) -> Result<Self, LoadError> {
        let mut ctx_params = unsafe { ffi::llama_context_default_params() };
        ctx_params.n_ctx = ctx_length;
        ctx_params.n_batch = N_BATCH as u32;
        ctx_params.n_ubatch = N_BATCH as u32;
        ctx_params.n_threads = threads;
        ctx_params.n_threads_batch = threads;

        let ctx = unsafe { ffi::llama_init_from_model(shared.model, ctx_params) };
        if ctx.is_null() {
            return Err(LoadError::Model("failed to create llama context".into()));
        }

        let mut sampler_params = unsafe { ffi::llama_sampler_chain_default_params() };
        sampler_params.no_perf = true;

        let sampler = unsafe { ffi::llama_sampler_chain_init(sampler_params) };
        if sampler.is_null() {
            unsafe {
                ffi::llama_free(ctx);
            }
            return Err(LoadError::Model("failed to create sampler chain".into()));
        }
        // Zero temperature: always take the most likely token.
        unsafe {
            ffi::llama_sampler_chain_add(sampler, ffi::llama_sampler_init_greedy());
        }

        Ok(Self {
            shared,
            ctx,
            sampler,
            n_past: 0,
        })
    }

    fn run(&mut self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError> {
        unsafe {
            let mem = ffi::llama_get_memory(self.ctx);
            ffi::llama_memory_clear(mem, true);
            ffi::llama_sampler_reset(self.sampler);
        }
        self.n_past = 0;

        let mut prompt_tokens = self.tokenize(prompt)?;
        let max_prompt = self.shared.max_prompt_tokens;
        if max_prompt > 0 && prompt_tokens.len() > max_prompt {
            prompt_tokens.drain(..prompt_tokens.len() - max_prompt);
        }
        self.decode_sequence(&prompt_tokens)?;

        let mut generated = Vec::new();
        for _ in 0..max_new_tokens {
            let token = unsafe { ffi::llama_sampler_sample(self.sampler, self.ctx, -1) };
            if token == self.shared.eos_token || token == ffi::LLAMA_TOKEN_NULL {
                break;
            }
            unsafe {
                ffi::llama_sampler_accept(self.sampler, token);
            }
            generated.extend_from_slice(&self.render_token_bytes(token));

            let text = String::from_utf8_lossy(&generated);
            let text = text.trim_start();
            if !text.is_empty() && STOP_SEQUENCES.iter().any(|stop| text.contains(stop)) {
                break;
            }
            self.decode_sequence(std::slice::from_ref(&token))?;
        }

        debug!(
            prompt_tokens = prompt_tokens.len(),
            generated_bytes = generated.len(),
            "llama.cpp generation finished"
        );
        finish_output(&String::from_utf8_lossy(&generated), STOP_SEQUENCES)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<ffi::llama_token>, InferenceError> {
        let mut buf = vec![0 as ffi::llama_token; text.len().max(32)];
        let bytes = text.as_bytes();
        let text_ptr = bytes.as_ptr() as *const c_char;
        loop {
            let res = unsafe {
                ffi::llama_tokenize(
                    self.shared.vocab,
                    text_ptr,
                    bytes.len() as i32,
                    buf.as_mut_ptr(),
                    buf.len() as i32,
                    ADD_SPECIAL,
                    PARSE_SPECIAL,
                )
            };
            if res >= 0 {
                buf.truncate(res as usize);
                return Ok(buf);
            }
            let needed = (-res) as usize;
            if needed <= buf.len() {
                return Err(InferenceError::Tokenizer("llama_tokenize failed".into()));
            }
            buf.resize(needed, 0);
        }
    }

    fn decode_sequence(&mut self, tokens: &[ffi::llama_token]) -> Result<(), InferenceError> {
        for chunk in tokens.chunks(N_BATCH as usize) {
            let mut batch = unsafe { ffi::llama_batch_init(N_BATCH, 0, 1) };
            unsafe {
                let token_slice = std::slice::from_raw_parts_mut(batch.token, chunk.len());
                token_slice.copy_from_slice(chunk);

                let pos_slice = std::slice::from_raw_parts_mut(batch.pos, chunk.len());
                for (i, slot) in pos_slice.iter_mut().enumerate() {
                    *slot = (self.n_past + i as i32) as ffi::llama_pos;
                }

                let n_seq_slice = std::slice::from_raw_parts_mut(batch.n_seq_id, chunk.len());
                let seq_heads = std::slice::from_raw_parts_mut(batch.seq_id, chunk.len());
                let logits_slice = std::slice::from_raw_parts_mut(batch.logits, chunk.len());

                for i in 0..chunk.len() {
                    n_seq_slice[i] = 1;
                    *seq_heads[i] = 0;
                    logits_slice[i] = i8::from(i == chunk.len() - 1);
                }
            }
            batch.n_tokens = chunk.len() as i32;
            let code = unsafe { ffi::llama_decode(self.ctx, batch) };
            unsafe { ffi::llama_batch_free(batch) };
            if code != 0 {
                return Err(InferenceError::Model(format!(
                    "llama_decode failed with code {code}"
                )));
            }
            self.n_past += chunk.len() as i32;
        }
        Ok(())
    }

    fn render_token_bytes(&self, token: ffi::llama_token) -> Vec<u8> {
        let mut buf = vec![0u8; 64];
        loop {
            let res = unsafe {
                ffi::llama_token_to_piece(
                    self.shared.vocab,
                    token,
                    buf.as_mut_ptr() as *mut c_char,
                    buf.len() as i32,
                    0,
                    false,
                )
            };
            if res >= 0 {
                buf.truncate(res as usize);
                return buf;
            }
            buf.resize((-res) as usize, 0);
        }
    }
}

struct ContextPool {
    queue: Mutex<VecDeque<LlamaContext>>,
    available: Condvar,
}

/// A context checked out of the pool; returned on drop.
struct ContextLease<'a> {
    pool: &'a ContextPool,
    ctx: Option<LlamaContext>,
}

impl ContextPool {
    fn new(contexts: Vec<LlamaContext>) -> Self {
        Self {
            queue: Mutex::new(contexts.into()),
            available: Condvar::new(),
        }
    }

    /// Blocks until a context is free.
    fn checkout(&self) -> ContextLease<'_> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(ctx) = queue.pop_front() {
                return ContextLease {
                    pool: self,
                    ctx: Some(ctx),
                };
            }
            self.available.wait(&mut queue);
        }
    }
}

impl ContextLease<'_> {
    fn run(mut self, prompt: &str, max_new_tokens: usize) -> Result<String, InferenceError> {
        match self.ctx.as_mut() {
            Some(ctx) => ctx.run(prompt, max_new_tokens),
            None => Err(InferenceError::Worker("context lease already released".into())),
        }
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.queue.lock().push_back(ctx);
            self.pool.available.notify_one();
        }
    }
}

/// Context size: the capped prompt plus room for the short answer. The prompt
/// cap must be set, otherwise prompts can outgrow the context.
fn context_length(max_tokens: usize, max_new_tokens: usize) -> Result<u32, LoadError> {
    if max_tokens == 0 {
        return Err(LoadError::Model(
            "MAX_TOKENS must be positive for the llama_cpp backend".into(),
        ));
    }
    u32::try_from(max_tokens + max_new_tokens)
        .map_err(|_| LoadError::Model("MAX_TOKENS + MAX_NEW_TOKENS overflows the context".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::BackendKind;

    #[test]
    fn context_covers_prompt_and_answer() {
        assert_eq!(context_length(512, 10), Ok(522));
    }

    #[test]
    fn uncapped_prompt_is_rejected_before_loading() {
        assert!(matches!(context_length(0, 10), Err(LoadError::Model(_))));

        let settings = Settings {
            backend: BackendKind::LlamaCpp,
            max_tokens: 0,
            ..Settings::default()
        };
        let backend = LlamaCppBackend::new(&settings);
        let err = backend.load_model().unwrap_err();
        assert!(matches!(err, LoadError::Model(msg) if msg.contains("MAX_TOKENS")));
        assert!(!backend.is_loaded());
    }

    #[test]
    fn review_text_is_not_parsed_as_control_tokens() {
        assert!(ADD_SPECIAL);
        assert!(!PARSE_SPECIAL);
    }

    #[test]
    fn concurrency_follows_pool_size() {
        let settings = Settings {
            llama_pool_size: 3,
            ..Settings::default()
        };
        assert_eq!(LlamaCppBackend::new(&settings).max_concurrency(), 3);
    }
}
